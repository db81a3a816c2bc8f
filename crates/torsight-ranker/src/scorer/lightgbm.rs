//! LightGBM-style artifact: nested tree structures, classes interleaved
//! by `tree_index % num_class`.

use std::path::Path;

use serde::Deserialize;
use torsight_common::{CandidateSet, Deadline, Result, ScorerId};
use torsight_features::{FeatureVector, FEATURE_COUNT};
use tracing::info;

use super::tree::{ClassForest, DecisionTree, Node, SplitOp};
use super::{
    artifact_error, check_class_coverage, explain_forest, find_forest, rank_importance,
    score_forests, FeatureImportance, ScoreVector, ScorerAdapter, ScorerAttribution,
};

#[derive(Debug, Clone, Deserialize)]
pub struct LgbArtifact {
    pub num_class: usize,
    pub class_guard_index: Vec<u32>,
    #[serde(default)]
    pub init_score: Vec<f64>,
    pub tree_info: Vec<LgbTreeInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LgbTreeInfo {
    pub tree_index: usize,
    pub tree_structure: LgbNode,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LgbNode {
    Split {
        split_feature: usize,
        threshold: f64,
        #[serde(default = "default_true")]
        default_left: bool,
        #[serde(default)]
        internal_count: f64,
        left_child: Box<LgbNode>,
        right_child: Box<LgbNode>,
    },
    Leaf {
        leaf_value: f64,
        #[serde(default = "default_leaf_count")]
        leaf_count: f64,
    },
}

fn default_true() -> bool {
    true
}

fn default_leaf_count() -> f64 {
    1.0
}

#[derive(Debug)]
pub struct LightGbmScorer {
    forests: Vec<ClassForest>,
    importance: Vec<FeatureImportance>,
}

impl LightGbmScorer {
    pub fn load(path: &Path, candidates: &CandidateSet) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| artifact_error(path, e.to_string()))?;
        let artifact: LgbArtifact =
            serde_json::from_str(&content).map_err(|e| artifact_error(path, e.to_string()))?;
        let scorer = Self::from_artifact(artifact, candidates).map_err(|e| artifact_error(path, e))?;
        info!(
            "Loaded lightgbm artifact from {} ({} classes, {} trees)",
            path.display(),
            scorer.forests.len(),
            scorer.tree_count()
        );
        Ok(scorer)
    }

    pub fn from_artifact(
        artifact: LgbArtifact,
        candidates: &CandidateSet,
    ) -> std::result::Result<Self, String> {
        let num_class = artifact.num_class;
        if num_class == 0 || artifact.class_guard_index.len() != num_class {
            return Err(format!(
                "num_class {} does not match {} class_guard_index entries",
                num_class,
                artifact.class_guard_index.len()
            ));
        }
        if !artifact.init_score.is_empty() && artifact.init_score.len() != num_class {
            return Err(format!("init_score has {} entries, expected {}", artifact.init_score.len(), num_class));
        }
        check_class_coverage(ScorerId::Lightgbm, &artifact.class_guard_index, candidates)?;

        let mut forests: Vec<ClassForest> = artifact
            .class_guard_index
            .iter()
            .enumerate()
            .map(|(class, &guard_index)| ClassForest {
                guard_index,
                base_margin: artifact.init_score.get(class).copied().unwrap_or(0.0),
                trees: Vec::new(),
            })
            .collect();

        let mut split_counts = vec![0.0; FEATURE_COUNT];
        for info in artifact.tree_info {
            let mut nodes = Vec::new();
            flatten(&info.tree_structure, &mut nodes)
                .map_err(|e| format!("tree {}: {}", info.tree_index, e))?;
            for node in &nodes {
                if let Node::Split { feature, .. } = node {
                    split_counts[*feature] += 1.0;
                }
            }
            let tree = DecisionTree::new(nodes).map_err(|e| format!("tree {}: {}", info.tree_index, e))?;
            forests[info.tree_index % num_class].trees.push(tree);
        }
        forests.sort_by_key(|f| f.guard_index);

        Ok(Self {
            forests,
            importance: rank_importance(&split_counts),
        })
    }
}

/// Pre-order flatten; returns the new node's index and its cover.
fn flatten(node: &LgbNode, out: &mut Vec<Node>) -> std::result::Result<(usize, f64), String> {
    let index = out.len();
    match node {
        LgbNode::Leaf { leaf_value, leaf_count } => {
            out.push(Node::Leaf { value: *leaf_value, cover: *leaf_count });
            Ok((index, *leaf_count))
        }
        LgbNode::Split { split_feature, threshold, default_left, internal_count, left_child, right_child } => {
            if *split_feature >= FEATURE_COUNT {
                return Err(format!("split_feature {split_feature} outside the layout"));
            }
            // Placeholder, patched once the children are placed.
            out.push(Node::Leaf { value: 0.0, cover: 1.0 });
            let (left, left_cover) = flatten(left_child, out)?;
            let (right, right_cover) = flatten(right_child, out)?;
            let cover = if *internal_count > 0.0 {
                *internal_count
            } else {
                left_cover + right_cover
            };
            out[index] = Node::Split {
                feature: *split_feature,
                threshold: *threshold,
                op: SplitOp::Le,
                left,
                right,
                default_left: *default_left,
                cover,
            };
            Ok((index, cover))
        }
    }
}

impl ScorerAdapter for LightGbmScorer {
    fn id(&self) -> ScorerId {
        ScorerId::Lightgbm
    }

    fn score(&self, features: &FeatureVector, deadline: &Deadline) -> Result<ScoreVector> {
        score_forests(ScorerId::Lightgbm, &self.forests, features, deadline)
    }

    fn attributions(&self, features: &FeatureVector, guard_index: u32) -> Result<ScorerAttribution> {
        explain_forest(ScorerId::Lightgbm, find_forest(&self.forests, guard_index)?, features)
    }

    fn global_importance(&self) -> &[FeatureImportance] {
        &self.importance
    }

    fn tree_count(&self) -> usize {
        self.forests.iter().map(|f| f.trees.len()).sum()
    }
}
