//! XGBoost-style artifact: flat node lists per tree, one forest per class.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use torsight_common::{CandidateSet, Deadline, Result, ScorerId};
use torsight_features::{FeatureVector, FEATURE_COUNT};
use tracing::info;

use super::tree::{logit, ClassForest, DecisionTree, Node, SplitOp};
use super::{
    artifact_error, check_class_coverage, explain_forest, find_forest, rank_importance,
    score_forests, FeatureImportance, FeatureRef, ScoreVector, ScorerAdapter, ScorerAttribution,
};

#[derive(Debug, Clone, Deserialize)]
pub struct XgbArtifact {
    /// Prior probability; converted to a margin with `logit`.
    #[serde(default = "default_base_score")]
    pub base_score: f64,
    #[serde(default)]
    pub num_feature: Option<usize>,
    pub classes: Vec<XgbClass>,
}

fn default_base_score() -> f64 {
    0.5
}

#[derive(Debug, Clone, Deserialize)]
pub struct XgbClass {
    pub guard_index: u32,
    pub trees: Vec<XgbTree>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct XgbTree {
    pub nodes: Vec<XgbNode>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum XgbNode {
    Split {
        nodeid: usize,
        split: FeatureRef,
        split_condition: f64,
        yes: usize,
        no: usize,
        missing: usize,
        cover: f64,
    },
    Leaf {
        nodeid: usize,
        leaf: f64,
        cover: f64,
    },
}

impl XgbNode {
    fn nodeid(&self) -> usize {
        match self {
            XgbNode::Split { nodeid, .. } | XgbNode::Leaf { nodeid, .. } => *nodeid,
        }
    }
}

#[derive(Debug)]
pub struct XgBoostScorer {
    forests: Vec<ClassForest>,
    importance: Vec<FeatureImportance>,
}

impl XgBoostScorer {
    pub fn load(path: &Path, candidates: &CandidateSet) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| artifact_error(path, e.to_string()))?;
        let artifact: XgbArtifact =
            serde_json::from_str(&content).map_err(|e| artifact_error(path, e.to_string()))?;
        let scorer = Self::from_artifact(artifact, candidates).map_err(|e| artifact_error(path, e))?;
        info!(
            "Loaded xgboost artifact from {} ({} classes, {} trees)",
            path.display(),
            scorer.forests.len(),
            scorer.tree_count()
        );
        Ok(scorer)
    }

    pub fn from_artifact(
        artifact: XgbArtifact,
        candidates: &CandidateSet,
    ) -> std::result::Result<Self, String> {
        if let Some(n) = artifact.num_feature {
            if n != FEATURE_COUNT {
                return Err(format!("artifact expects {n} features, layout has {FEATURE_COUNT}"));
            }
        }
        if !(artifact.base_score > 0.0 && artifact.base_score < 1.0) {
            return Err(format!("base_score {} must be in (0, 1)", artifact.base_score));
        }
        let guards: Vec<u32> = artifact.classes.iter().map(|c| c.guard_index).collect();
        check_class_coverage(ScorerId::Xgboost, &guards, candidates)?;

        let base_margin = logit(artifact.base_score);
        let mut cover_by_feature = vec![0.0; FEATURE_COUNT];
        let mut forests = Vec::with_capacity(artifact.classes.len());
        for class in artifact.classes {
            let mut trees = Vec::with_capacity(class.trees.len());
            for (t, tree) in class.trees.into_iter().enumerate() {
                let compiled = compile_tree(tree).map_err(|e| {
                    format!("class {} tree {}: {}", class.guard_index, t, e)
                })?;
                for node in compiled.nodes() {
                    if let Node::Split { feature, cover, .. } = node {
                        cover_by_feature[*feature] += cover;
                    }
                }
                trees.push(compiled);
            }
            forests.push(ClassForest {
                guard_index: class.guard_index,
                base_margin,
                trees,
            });
        }
        forests.sort_by_key(|f| f.guard_index);

        Ok(Self {
            forests,
            importance: rank_importance(&cover_by_feature),
        })
    }
}

/// Lower a node list keyed by `nodeid` into a root-first `DecisionTree`.
fn compile_tree(tree: XgbTree) -> std::result::Result<DecisionTree, String> {
    let positions: HashMap<usize, usize> = tree
        .nodes
        .iter()
        .enumerate()
        .map(|(pos, node)| (node.nodeid(), pos))
        .collect();
    if positions.len() != tree.nodes.len() {
        return Err("duplicate nodeid".into());
    }
    let root = *positions.get(&0).ok_or("missing root nodeid 0")?;
    let lookup = |id: usize| positions.get(&id).copied().ok_or(format!("dangling child nodeid {id}"));

    // Root goes first; the remaining nodes keep their relative order.
    let mut order: Vec<usize> = (0..tree.nodes.len()).collect();
    order.swap(0, root);
    let mut new_index = vec![0; tree.nodes.len()];
    for (new, &old) in order.iter().enumerate() {
        new_index[old] = new;
    }

    let mut nodes = Vec::with_capacity(tree.nodes.len());
    for &old in &order {
        let node = match &tree.nodes[old] {
            XgbNode::Split { split, split_condition, yes, no, missing, cover, .. } => Node::Split {
                feature: split.resolve()?,
                threshold: *split_condition,
                op: SplitOp::Lt,
                left: new_index[lookup(*yes)?],
                right: new_index[lookup(*no)?],
                default_left: missing == yes,
                cover: *cover,
            },
            XgbNode::Leaf { leaf, cover, .. } => Node::Leaf { value: *leaf, cover: *cover },
        };
        nodes.push(node);
    }
    DecisionTree::new(nodes)
}

impl ScorerAdapter for XgBoostScorer {
    fn id(&self) -> ScorerId {
        ScorerId::Xgboost
    }

    fn score(&self, features: &FeatureVector, deadline: &Deadline) -> Result<ScoreVector> {
        score_forests(ScorerId::Xgboost, &self.forests, features, deadline)
    }

    fn attributions(&self, features: &FeatureVector, guard_index: u32) -> Result<ScorerAttribution> {
        explain_forest(ScorerId::Xgboost, find_forest(&self.forests, guard_index)?, features)
    }

    fn global_importance(&self) -> &[FeatureImportance] {
        &self.importance
    }

    fn tree_count(&self) -> usize {
        self.forests.iter().map(|f| f.trees.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use torsight_common::GuardCandidate;

    fn candidates() -> CandidateSet {
        CandidateSet::new(
            [1u32, 2]
                .iter()
                .map(|&i| GuardCandidate {
                    guard_index: i,
                    fingerprint: format!("G{i}"),
                    ip: "192.0.2.1".parse().unwrap(),
                    country: "DE".into(),
                    bandwidth: 5.0,
                })
                .collect(),
        )
        .unwrap()
    }

    fn artifact() -> XgbArtifact {
        serde_json::from_value(json!({
            "base_score": 0.5,
            "num_feature": 75,
            "classes": [
                { "guard_index": 2, "trees": [ { "nodes": [
                    { "nodeid": 2, "leaf": -0.4, "cover": 30.0 },
                    { "nodeid": 0, "split": "f0", "split_condition": 5.0, "yes": 1, "no": 2, "missing": 2, "cover": 100.0 },
                    { "nodeid": 1, "leaf": 0.8, "cover": 70.0 }
                ] } ] },
                { "guard_index": 1, "trees": [ { "nodes": [
                    { "nodeid": 0, "split": 10, "split_condition": 1.0, "yes": 1, "no": 2, "missing": 1, "cover": 50.0 },
                    { "nodeid": 1, "leaf": 0.2, "cover": 25.0 },
                    { "nodeid": 2, "leaf": -0.2, "cover": 25.0 }
                ] } ] }
            ]
        }))
        .unwrap()
    }

    fn vector(bandwidth: f64) -> FeatureVector {
        let mut values = vec![0.0; FEATURE_COUNT];
        values[0] = bandwidth;
        values[10] = 2.0;
        FeatureVector::from_values(values).unwrap()
    }

    #[test]
    fn test_scores_follow_split_direction() {
        let scorer = XgBoostScorer::from_artifact(artifact(), &candidates()).unwrap();
        let low = scorer.score(&vector(1.0), &Deadline::none()).unwrap();
        let high = scorer.score(&vector(9.0), &Deadline::none()).unwrap();
        assert!(low.get(2).unwrap() > 0.5);
        assert!(high.get(2).unwrap() < 0.5);
        assert_eq!(low.len(), 2);
    }

    #[test]
    fn test_missing_goes_to_declared_branch() {
        let scorer = XgBoostScorer::from_artifact(artifact(), &candidates()).unwrap();
        let mut x = vec![0.0; FEATURE_COUNT];
        x[0] = f64::NAN;
        // forests are ordered by guard_index, so guard 2 is second
        assert_eq!(scorer.forests[1].trees[0].predict(&x), -0.4);
    }

    #[test]
    fn test_attributions_are_additive() {
        let scorer = XgBoostScorer::from_artifact(artifact(), &candidates()).unwrap();
        let attribution = scorer.attributions(&vector(3.0), 2).unwrap();
        assert!((attribution.total() - (attribution.score - attribution.baseline)).abs() < 1e-9);
        assert!(attribution.contributions[0] > 0.0);
    }

    #[test]
    fn test_importance_is_total_cover() {
        let scorer = XgBoostScorer::from_artifact(artifact(), &candidates()).unwrap();
        let importance = scorer.global_importance();
        assert_eq!(importance[0].feature, "exit_bandwidth");
        assert!((importance[0].importance_pct - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_class_coverage_enforced() {
        let mut artifact = artifact();
        artifact.classes.pop();
        assert!(XgBoostScorer::from_artifact(artifact, &candidates()).is_err());
    }

    #[test]
    fn test_unknown_candidate() {
        let scorer = XgBoostScorer::from_artifact(artifact(), &candidates()).unwrap();
        assert!(scorer.attributions(&vector(3.0), 42).is_err());
    }
}
