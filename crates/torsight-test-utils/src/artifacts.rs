//! Synthetic scoring artifacts in each family's JSON format.
//!
//! Every class gets depth-2 trees. The first three trees of each class are
//! rooted on the raw-field features (bandwidth, setup duration, volume) so
//! counterfactual probes see a response; the rest split on features drawn
//! from [`SPLIT_FEATURES`].

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use torsight_common::CandidateSet;
use torsight_features::layout::feature_index;
use torsight_features::FeatureVector;

pub const TREES_PER_CLASS: usize = 4;

const ROOT_FEATURES: [&str; 3] = ["exit_bandwidth", "circuit_setup_duration", "total_mb"];

pub const SPLIT_FEATURES: &[&str] = &[
    "exit_bandwidth",
    "circuit_setup_duration",
    "total_mb",
    "cell_count",
    "throughput_mb_per_s",
    "bandwidth_per_setup",
    "country_encoding",
    "mean_candidate_distance_km",
    "cooccurrence_total",
    "cooccurrence_top_share",
    "log1p_bandwidth",
    "bandwidth_zscore",
    "setup_bucket",
    "hour_of_day",
];

#[derive(Debug, Clone, Copy)]
struct Split {
    feature: usize,
    threshold: f64,
}

/// Depth-2 tree. Leaves are ordered left-left, left-right, right-left,
/// right-right, where "left" is the branch taken when the split holds.
#[derive(Debug, Clone)]
struct TreeShape {
    root: Split,
    left: Split,
    right: Split,
    leaves: [f64; 4],
    covers: [f64; 4],
}

struct Generator<'a> {
    rng: StdRng,
    anchor: &'a FeatureVector,
}

impl<'a> Generator<'a> {
    fn new(seed: u64, anchor: &'a FeatureVector) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            anchor,
        }
    }

    fn split_on(&mut self, name: &str) -> Split {
        let feature = feature_index(name).unwrap_or(0);
        let value = self.anchor.get(feature).unwrap_or(0.0);
        let threshold = if value.abs() > 1e-9 {
            value * self.rng.gen_range(0.85..1.15)
        } else {
            self.rng.gen_range(-0.5..0.5)
        };
        Split { feature, threshold }
    }

    fn random_split(&mut self) -> Split {
        let name = SPLIT_FEATURES[self.rng.gen_range(0..SPLIT_FEATURES.len())];
        self.split_on(name)
    }

    fn tree(&mut self, root_feature: Option<&str>) -> TreeShape {
        let root = match root_feature {
            Some(name) => self.split_on(name),
            None => self.random_split(),
        };
        TreeShape {
            root,
            left: self.random_split(),
            right: self.random_split(),
            leaves: [(); 4].map(|_| self.rng.gen_range(-1.5..1.5)),
            covers: [(); 4].map(|_| self.rng.gen_range(1.0..50.0)),
        }
    }

    fn class_trees(&mut self) -> Vec<TreeShape> {
        (0..TREES_PER_CLASS)
            .map(|t| self.tree(ROOT_FEATURES.get(t).copied()))
            .collect()
    }
}

/// XGBoost-style dump: one entry per class, `x < split_condition` → yes.
pub fn xgboost(candidates: &CandidateSet, anchor: &FeatureVector, seed: u64) -> Value {
    let mut gen = Generator::new(seed, anchor);
    let classes: Vec<Value> = candidates
        .indexes()
        .map(|guard_index| {
            let trees: Vec<Value> = gen.class_trees().iter().map(xgb_tree).collect();
            json!({ "guard_index": guard_index, "trees": trees })
        })
        .collect();
    json!({
        "base_score": 0.5,
        "num_feature": anchor.len(),
        "classes": classes,
    })
}

fn xgb_tree(spec: &TreeShape) -> Value {
    let [c0, c1, c2, c3] = spec.covers;
    let split = |nodeid: usize, s: Split, yes: usize, no: usize, cover: f64| {
        json!({
            "nodeid": nodeid,
            "split": format!("f{}", s.feature),
            "split_condition": s.threshold,
            "yes": yes,
            "no": no,
            "missing": yes,
            "cover": cover,
        })
    };
    let leaf = |nodeid: usize, value: f64, cover: f64| json!({ "nodeid": nodeid, "leaf": value, "cover": cover });
    json!({
        "nodes": [
            split(0, spec.root, 1, 2, c0 + c1 + c2 + c3),
            split(1, spec.left, 3, 4, c0 + c1),
            split(2, spec.right, 5, 6, c2 + c3),
            leaf(3, spec.leaves[0], c0),
            leaf(4, spec.leaves[1], c1),
            leaf(5, spec.leaves[2], c2),
            leaf(6, spec.leaves[3], c3),
        ]
    })
}

/// LightGBM-style model: trees interleaved by class, `x <= threshold` → left.
pub fn lightgbm(candidates: &CandidateSet, anchor: &FeatureVector, seed: u64) -> Value {
    let mut gen = Generator::new(seed, anchor);
    let guards: Vec<u32> = candidates.indexes().collect();
    let num_class = guards.len();
    let per_class: Vec<Vec<TreeShape>> = guards.iter().map(|_| gen.class_trees()).collect();

    let mut tree_info = Vec::with_capacity(num_class * TREES_PER_CLASS);
    for round in 0..TREES_PER_CLASS {
        for (class, trees) in per_class.iter().enumerate() {
            tree_info.push(json!({
                "tree_index": round * num_class + class,
                "tree_structure": lgb_node(&trees[round]),
            }));
        }
    }
    let init_score: Vec<f64> = (0..num_class).map(|_| gen.rng.gen_range(-0.2..0.2)).collect();
    json!({
        "num_class": num_class,
        "class_guard_index": guards,
        "init_score": init_score,
        "tree_info": tree_info,
    })
}

fn lgb_node(spec: &TreeShape) -> Value {
    let leaf = |i: usize| json!({ "leaf_value": spec.leaves[i], "leaf_count": spec.covers[i] });
    let split = |s: Split, left: Value, right: Value, count: f64| {
        json!({
            "split_feature": s.feature,
            "threshold": s.threshold,
            "default_left": true,
            "internal_count": count,
            "left_child": left,
            "right_child": right,
        })
    };
    let [c0, c1, c2, c3] = spec.covers;
    split(
        spec.root,
        split(spec.left, leaf(0), leaf(1), c0 + c1),
        split(spec.right, leaf(2), leaf(3), c2 + c3),
        c0 + c1 + c2 + c3,
    )
}

/// CatBoost-style oblivious trees shared across classes; leaf values are
/// laid out `leaf * dimension + class`.
pub fn catboost(candidates: &CandidateSet, anchor: &FeatureVector, seed: u64) -> Value {
    let mut gen = Generator::new(seed, anchor);
    let guards: Vec<u32> = candidates.indexes().collect();
    let dimension = guards.len();
    let trees: Vec<Value> = (0..TREES_PER_CLASS * 2)
        .map(|t| {
            let first = match ROOT_FEATURES.get(t) {
                Some(name) => gen.split_on(name),
                None => gen.random_split(),
            };
            let second = gen.random_split();
            let leaf_values: Vec<f64> = (0..4 * dimension).map(|_| gen.rng.gen_range(-1.0..1.0)).collect();
            let leaf_weights: Vec<f64> = (0..4).map(|_| gen.rng.gen_range(1.0..50.0)).collect();
            json!({
                "splits": [
                    { "float_feature_index": first.feature, "border": first.threshold },
                    { "float_feature_index": second.feature, "border": second.threshold },
                ],
                "leaf_values": leaf_values,
                "leaf_weights": leaf_weights,
            })
        })
        .collect();
    json!({
        "scale": 1.0,
        "bias": [0.0],
        "class_guard_index": guards,
        "oblivious_trees": trees,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::{candidates, reference_data, sample_observation};
    use torsight_features::FeatureTransformer;

    fn anchor() -> FeatureVector {
        FeatureTransformer::new(reference_data())
            .transform(&sample_observation())
            .unwrap()
    }

    #[test]
    fn test_artifacts_are_deterministic() {
        let anchor = anchor();
        let set = candidates();
        assert_eq!(xgboost(&set, &anchor, 7), xgboost(&set, &anchor, 7));
        assert_ne!(xgboost(&set, &anchor, 7), xgboost(&set, &anchor, 8));
        assert_eq!(catboost(&set, &anchor, 7), catboost(&set, &anchor, 7));
    }

    #[test]
    fn test_artifact_shapes() {
        let anchor = anchor();
        let set = candidates();
        let xgb = xgboost(&set, &anchor, 1);
        assert_eq!(xgb["classes"].as_array().unwrap().len(), set.len());
        let lgb = lightgbm(&set, &anchor, 1);
        assert_eq!(lgb["tree_info"].as_array().unwrap().len(), set.len() * TREES_PER_CLASS);
        let cb = catboost(&set, &anchor, 1);
        let first = &cb["oblivious_trees"][0];
        assert_eq!(first["leaf_values"].as_array().unwrap().len(), 4 * set.len());
        assert_eq!(first["splits"][0]["float_feature_index"], 0);
    }
}
