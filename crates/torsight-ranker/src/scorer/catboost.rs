//! CatBoost-style artifact: oblivious (symmetric) trees shared by all
//! classes, with a multi-dimensional leaf table.
//!
//! Scoring evaluates the oblivious trees natively: one leaf index per tree
//! serves every class. Attribution lowers the requested class to ordinary
//! decision trees so it goes through the same TreeSHAP as the other families.

use std::path::Path;

use serde::Deserialize;
use torsight_common::{CandidateSet, Deadline, Result, ScorerId, TorsightError};
use torsight_features::{FeatureVector, FEATURE_COUNT};
use tracing::info;

use super::tree::{sigmoid, ClassForest, DecisionTree, Node, SplitOp};
use super::{
    artifact_error, check_class_coverage, explain_forest, rank_importance, FeatureImportance,
    ScoreVector, ScorerAdapter, ScorerAttribution,
};

const MAX_OBLIVIOUS_DEPTH: usize = 16;
/// Leaf weights of zero would give TreeSHAP an undefined split fraction.
const MIN_LEAF_WEIGHT: f64 = 1e-6;

#[derive(Debug, Clone, Deserialize)]
pub struct CbArtifact {
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub bias: Vec<f64>,
    pub class_guard_index: Vec<u32>,
    pub oblivious_trees: Vec<ObliviousTree>,
}

fn default_scale() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObliviousSplit {
    pub float_feature_index: usize,
    pub border: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObliviousTree {
    pub splits: Vec<ObliviousSplit>,
    /// `leaf * dimension + class`.
    pub leaf_values: Vec<f64>,
    #[serde(default)]
    pub leaf_weights: Vec<f64>,
}

impl ObliviousTree {
    /// Bit `d` of the leaf index is set when `x > border_d`.
    fn leaf_index(&self, x: &[f64]) -> usize {
        self.splits
            .iter()
            .enumerate()
            .fold(0, |acc, (d, split)| {
                if x[split.float_feature_index] > split.border {
                    acc | (1 << d)
                } else {
                    acc
                }
            })
    }

    fn weight(&self, leaf: usize) -> f64 {
        self.leaf_weights.get(leaf).copied().unwrap_or(1.0).max(MIN_LEAF_WEIGHT)
    }

    /// Full binary tree equivalent for one class, leaf values pre-multiplied by `scale`.
    fn lower(&self, class: usize, dimension: usize, scale: f64) -> std::result::Result<DecisionTree, String> {
        let mut nodes = Vec::with_capacity((2 << self.splits.len()) - 1);
        self.lower_from(0, 0, class, dimension, scale, &mut nodes);
        DecisionTree::new(nodes)
    }

    fn lower_from(
        &self,
        depth: usize,
        leaf_bits: usize,
        class: usize,
        dimension: usize,
        scale: f64,
        out: &mut Vec<Node>,
    ) -> f64 {
        let index = out.len();
        if depth == self.splits.len() {
            let cover = self.weight(leaf_bits);
            out.push(Node::Leaf {
                value: scale * self.leaf_values[leaf_bits * dimension + class],
                cover,
            });
            return cover;
        }
        out.push(Node::Leaf { value: 0.0, cover: 1.0 });
        let split = &self.splits[depth];
        let left = out.len();
        let left_cover = self.lower_from(depth + 1, leaf_bits, class, dimension, scale, out);
        let right = out.len();
        let right_cover = self.lower_from(depth + 1, leaf_bits | (1 << depth), class, dimension, scale, out);
        let cover = left_cover + right_cover;
        out[index] = Node::Split {
            feature: split.float_feature_index,
            threshold: split.border,
            op: SplitOp::Le,
            left,
            right,
            default_left: true,
            cover,
        };
        cover
    }
}

#[derive(Debug)]
pub struct CatBoostScorer {
    scale: f64,
    bias: Vec<f64>,
    /// Class position → guard_index.
    class_guard_index: Vec<u32>,
    trees: Vec<ObliviousTree>,
    importance: Vec<FeatureImportance>,
}

impl CatBoostScorer {
    pub fn load(path: &Path, candidates: &CandidateSet) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| artifact_error(path, e.to_string()))?;
        let artifact: CbArtifact =
            serde_json::from_str(&content).map_err(|e| artifact_error(path, e.to_string()))?;
        let scorer = Self::from_artifact(artifact, candidates).map_err(|e| artifact_error(path, e))?;
        info!(
            "Loaded catboost artifact from {} ({} classes, {} oblivious trees)",
            path.display(),
            scorer.class_guard_index.len(),
            scorer.trees.len()
        );
        Ok(scorer)
    }

    pub fn from_artifact(
        artifact: CbArtifact,
        candidates: &CandidateSet,
    ) -> std::result::Result<Self, String> {
        let dimension = artifact.class_guard_index.len();
        check_class_coverage(ScorerId::Catboost, &artifact.class_guard_index, candidates)?;
        if !artifact.scale.is_finite() {
            return Err("scale must be finite".into());
        }
        let bias = match artifact.bias.len() {
            0 => vec![0.0; dimension],
            1 => vec![artifact.bias[0]; dimension],
            n if n == dimension => artifact.bias,
            n => return Err(format!("bias has {n} entries, expected {dimension}")),
        };

        for (t, tree) in artifact.oblivious_trees.iter().enumerate() {
            let depth = tree.splits.len();
            if depth > MAX_OBLIVIOUS_DEPTH {
                return Err(format!("tree {t} depth {depth} exceeds {MAX_OBLIVIOUS_DEPTH}"));
            }
            let leaves = 1usize << depth;
            if tree.leaf_values.len() != leaves * dimension {
                return Err(format!(
                    "tree {t} has {} leaf values, expected {}",
                    tree.leaf_values.len(),
                    leaves * dimension
                ));
            }
            if !tree.leaf_weights.is_empty() && tree.leaf_weights.len() != leaves {
                return Err(format!("tree {t} has {} leaf weights, expected {leaves}", tree.leaf_weights.len()));
            }
            if let Some(split) = tree.splits.iter().find(|s| s.float_feature_index >= FEATURE_COUNT) {
                return Err(format!("tree {t} splits on feature {} outside the layout", split.float_feature_index));
            }
            if tree.leaf_values.iter().chain(&tree.leaf_weights).any(|v| !v.is_finite()) {
                return Err(format!("tree {t} has non-finite leaf data"));
            }
        }

        let importance = rank_importance(&prediction_values_change(&artifact.oblivious_trees, dimension));
        Ok(Self {
            scale: artifact.scale,
            bias,
            class_guard_index: artifact.class_guard_index,
            trees: artifact.oblivious_trees,
            importance,
        })
    }

    fn class_of(&self, guard_index: u32) -> Result<usize> {
        self.class_guard_index
            .iter()
            .position(|&g| g == guard_index)
            .ok_or(TorsightError::UnknownCandidate(guard_index))
    }

    fn class_forest(&self, class: usize) -> Result<ClassForest> {
        let dimension = self.class_guard_index.len();
        let trees = self
            .trees
            .iter()
            .map(|t| t.lower(class, dimension, self.scale))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| TorsightError::internal(ScorerId::Catboost.as_str(), e))?;
        Ok(ClassForest {
            guard_index: self.class_guard_index[class],
            base_margin: self.bias[class],
            trees,
        })
    }
}

/// For each split level, the weighted squared deviation of the paired
/// leaves from their mean, summed over classes and credited to the split feature.
fn prediction_values_change(trees: &[ObliviousTree], dimension: usize) -> Vec<f64> {
    let mut raw = vec![0.0; FEATURE_COUNT];
    for tree in trees {
        let leaves = 1usize << tree.splits.len();
        for (d, split) in tree.splits.iter().enumerate() {
            let bit = 1usize << d;
            for i in (0..leaves).filter(|i| i & bit == 0) {
                let j = i | bit;
                let (wi, wj) = (tree.weight(i), tree.weight(j));
                for class in 0..dimension {
                    let vi = tree.leaf_values[i * dimension + class];
                    let vj = tree.leaf_values[j * dimension + class];
                    let avg = (vi * wi + vj * wj) / (wi + wj);
                    raw[split.float_feature_index] += (vi - avg).powi(2) * wi + (vj - avg).powi(2) * wj;
                }
            }
        }
    }
    raw
}

impl ScorerAdapter for CatBoostScorer {
    fn id(&self) -> ScorerId {
        ScorerId::Catboost
    }

    fn score(&self, features: &FeatureVector, deadline: &Deadline) -> Result<ScoreVector> {
        features.validate()?;
        deadline.check("score")?;
        let x = features.as_slice();
        let dimension = self.class_guard_index.len();
        let mut sums = vec![0.0; dimension];
        for (t, tree) in self.trees.iter().enumerate() {
            if t % 64 == 0 {
                deadline.check("score")?;
            }
            let leaf = tree.leaf_index(x);
            let row = &tree.leaf_values[leaf * dimension..(leaf + 1) * dimension];
            for (sum, value) in sums.iter_mut().zip(row) {
                *sum += value;
            }
        }
        let scores = self
            .class_guard_index
            .iter()
            .zip(sums.iter().zip(&self.bias))
            .map(|(&guard, (sum, bias))| (guard, sigmoid(self.scale * sum + bias)))
            .collect();
        ScoreVector::new(ScorerId::Catboost, scores)
    }

    fn attributions(&self, features: &FeatureVector, guard_index: u32) -> Result<ScorerAttribution> {
        let forest = self.class_forest(self.class_of(guard_index)?)?;
        explain_forest(ScorerId::Catboost, &forest, features)
    }

    fn global_importance(&self) -> &[FeatureImportance] {
        &self.importance
    }

    fn tree_count(&self) -> usize {
        self.trees.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use torsight_common::GuardCandidate;

    fn candidates() -> CandidateSet {
        CandidateSet::new(
            [0u32, 1]
                .iter()
                .map(|&i| GuardCandidate {
                    guard_index: i,
                    fingerprint: format!("G{i}"),
                    ip: "192.0.2.1".parse().unwrap(),
                    country: "FR".into(),
                    bandwidth: 5.0,
                })
                .collect(),
        )
        .unwrap()
    }

    /// Depth-2 tree on features 0 and 10, two classes.
    fn artifact() -> CbArtifact {
        serde_json::from_value(json!({
            "scale": 0.5,
            "bias": [0.2, -0.2],
            "class_guard_index": [1, 0],
            "oblivious_trees": [{
                "splits": [
                    { "float_feature_index": 0, "border": 5.0 },
                    { "float_feature_index": 10, "border": 1.0 }
                ],
                "leaf_values": [1.0, -1.0,  2.0, -2.0,  -0.5, 0.5,  0.0, 0.0],
                "leaf_weights": [10.0, 20.0, 0.0, 30.0]
            }]
        }))
        .unwrap()
    }

    fn vector(bandwidth: f64, setup: f64) -> FeatureVector {
        let mut values = vec![0.0; FEATURE_COUNT];
        values[0] = bandwidth;
        values[10] = setup;
        FeatureVector::from_values(values).unwrap()
    }

    #[test]
    fn test_native_scoring() {
        let scorer = CatBoostScorer::from_artifact(artifact(), &candidates()).unwrap();
        // x0 = 6 > 5 sets bit 0, x10 = 0.5 leaves bit 1 clear → leaf 1
        let scores = scorer.score(&vector(6.0, 0.5), &Deadline::none()).unwrap();
        assert!((scores.get(1).unwrap() - sigmoid(0.5 * 2.0 + 0.2)).abs() < 1e-12);
        assert!((scores.get(0).unwrap() - sigmoid(0.5 * -2.0 - 0.2)).abs() < 1e-12);
    }

    #[test]
    fn test_lowered_tree_matches_native() {
        let scorer = CatBoostScorer::from_artifact(artifact(), &candidates()).unwrap();
        for (bw, setup) in [(1.0, 0.0), (6.0, 0.0), (1.0, 2.0), (6.0, 2.0), (5.0, 1.0)] {
            let v = vector(bw, setup);
            let native = scorer.score(&v, &Deadline::none()).unwrap();
            for class in 0..2 {
                let forest = scorer.class_forest(class).unwrap();
                let lowered = sigmoid(forest.margin(v.as_slice()));
                let guard = forest.guard_index;
                assert!((native.get(guard).unwrap() - lowered).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_attributions_are_additive_with_zero_weight_leaf() {
        let scorer = CatBoostScorer::from_artifact(artifact(), &candidates()).unwrap();
        let attribution = scorer.attributions(&vector(1.0, 2.0), 1).unwrap();
        assert!((attribution.total() - (attribution.score - attribution.baseline)).abs() < 1e-9);
        assert!(attribution.contributions.iter().skip(11).all(|c| *c == 0.0));
    }

    #[test]
    fn test_prediction_values_change_credits_split_features() {
        let scorer = CatBoostScorer::from_artifact(artifact(), &candidates()).unwrap();
        let importance = scorer.global_importance();
        assert_eq!(importance.len(), 2);
        let features: Vec<usize> = importance.iter().map(|i| i.index).collect();
        assert!(features.contains(&0) && features.contains(&10));
    }

    #[test]
    fn test_leaf_table_size_checked() {
        let mut artifact = artifact();
        artifact.oblivious_trees[0].leaf_values.pop();
        assert!(CatBoostScorer::from_artifact(artifact, &candidates()).is_err());
    }

    #[test]
    fn test_unknown_candidate() {
        let scorer = CatBoostScorer::from_artifact(artifact(), &candidates()).unwrap();
        assert!(matches!(
            scorer.attributions(&vector(1.0, 1.0), 7),
            Err(TorsightError::UnknownCandidate(7))
        ));
    }
}
