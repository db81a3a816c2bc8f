//! Scorer adapters: one pre-fitted gradient-boosted-tree artifact each,
//! behind a uniform "score all candidates" contract.
//!
//! Every family produces a margin per candidate class; the raw score is
//! `sigmoid(margin)` (one-vs-rest), so scores from different families live
//! on the same [0, 1] scale and can be averaged by the ensemble.

pub mod tree;
pub mod xgboost;
pub mod lightgbm;
pub mod catboost;
pub mod exclusive;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use torsight_common::{CandidateSet, Deadline, Result, ScorerId, TorsightError};
use torsight_features::{FeatureVector, FEATURE_COUNT, FEATURE_LAYOUT};

use self::tree::{margin_to_score_space, sigmoid, ClassForest};

pub use catboost::CatBoostScorer;
pub use exclusive::Exclusive;
pub use lightgbm::LightGbmScorer;
pub use xgboost::XgBoostScorer;

/// Uniform capability of every model family.
///
/// Implementations hold no request-scoped state; the registry shares them
/// across requests behind an `Arc`.
pub trait ScorerAdapter: Send + Sync + fmt::Debug {
    fn id(&self) -> ScorerId;

    /// Raw score in [0, 1] for every candidate.
    fn score(&self, features: &FeatureVector, deadline: &Deadline) -> Result<ScoreVector>;

    /// Per-feature contributions for one candidate, summing to
    /// `score - baseline`.
    fn attributions(&self, features: &FeatureVector, guard_index: u32) -> Result<ScorerAttribution>;

    /// Global importance ranking, computed once at load.
    fn global_importance(&self) -> &[FeatureImportance];

    fn tree_count(&self) -> usize;
}

/// Candidate identifier → raw score from one scorer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreVector {
    pub scorer: ScorerId,
    scores: BTreeMap<u32, f64>,
}

impl ScoreVector {
    pub fn new(scorer: ScorerId, scores: BTreeMap<u32, f64>) -> Result<Self> {
        if let Some((guard, score)) = scores.iter().find(|(_, s)| !(0.0..=1.0).contains(*s)) {
            return Err(TorsightError::internal(
                scorer.as_str(),
                format!("score {score} for candidate {guard} is outside [0, 1]"),
            ));
        }
        Ok(Self { scorer, scores })
    }

    pub fn get(&self, guard_index: u32) -> Option<f64> {
        self.scores.get(&guard_index).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, f64)> + '_ {
        self.scores.iter().map(|(&g, &s)| (g, s))
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// Additive decomposition of one candidate's score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScorerAttribution {
    pub scorer: ScorerId,
    pub guard_index: u32,
    pub score: f64,
    pub baseline: f64,
    /// Indexed by feature position.
    pub contributions: Vec<f64>,
}

impl ScorerAttribution {
    /// `(feature index, contribution)` pairs in layout order.
    pub fn pairs(&self) -> Vec<(usize, f64)> {
        self.contributions.iter().copied().enumerate().collect()
    }

    pub fn total(&self) -> f64 {
        self.contributions.iter().sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub rank: usize,
    pub index: usize,
    pub feature: String,
    /// Share of the model's total importance, in percent.
    pub importance_pct: f64,
}

/// Normalize raw per-feature importances to percentages and rank them,
/// ties broken by layout position. Features the model never uses are omitted.
pub(crate) fn rank_importance(raw: &[f64]) -> Vec<FeatureImportance> {
    let total: f64 = raw.iter().filter(|v| **v > 0.0).sum();
    if total <= 0.0 {
        return Vec::new();
    }
    let mut ranked: Vec<(usize, f64)> = raw
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, v)| *v > 0.0)
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked
        .into_iter()
        .enumerate()
        .map(|(rank, (index, value))| FeatureImportance {
            rank: rank + 1,
            index,
            feature: FEATURE_LAYOUT[index].to_string(),
            importance_pct: value / total * 100.0,
        })
        .collect()
}

/// The artifact's classes must name exactly the loaded candidate set.
pub(crate) fn check_class_coverage(
    scorer: ScorerId,
    class_guards: &[u32],
    candidates: &CandidateSet,
) -> std::result::Result<(), String> {
    let mut seen = std::collections::BTreeSet::new();
    for &guard in class_guards {
        if !candidates.contains(guard) {
            return Err(format!("{scorer} artifact has class for unknown guard_index {guard}"));
        }
        if !seen.insert(guard) {
            return Err(format!("{scorer} artifact repeats guard_index {guard}"));
        }
    }
    if seen.len() != candidates.len() {
        return Err(format!(
            "{scorer} artifact covers {} of {} candidates",
            seen.len(),
            candidates.len()
        ));
    }
    Ok(())
}

/// Score every class forest. Shared by the families that lower straight to trees.
pub(crate) fn score_forests(
    scorer: ScorerId,
    forests: &[ClassForest],
    features: &FeatureVector,
    deadline: &Deadline,
) -> Result<ScoreVector> {
    features.validate()?;
    let x = features.as_slice();
    let mut scores = BTreeMap::new();
    for forest in forests {
        deadline.check("score")?;
        scores.insert(forest.guard_index, sigmoid(forest.margin(x)));
    }
    ScoreVector::new(scorer, scores)
}

pub(crate) fn explain_forest(
    scorer: ScorerId,
    forest: &ClassForest,
    features: &FeatureVector,
) -> Result<ScorerAttribution> {
    features.validate()?;
    let x = features.as_slice();
    let margin = forest.margin(x);
    let expected = forest.expected_margin();
    let phi = forest.margin_shap(x);
    debug_assert_eq!(phi.len(), FEATURE_COUNT);
    let contributions = margin_to_score_space(&phi, margin, expected);
    if contributions.iter().any(|c| !c.is_finite()) {
        return Err(TorsightError::internal(scorer.as_str(), "non-finite attribution"));
    }
    Ok(ScorerAttribution {
        scorer,
        guard_index: forest.guard_index,
        score: sigmoid(margin),
        baseline: sigmoid(expected),
        contributions,
    })
}

pub(crate) fn find_forest(forests: &[ClassForest], guard_index: u32) -> Result<&ClassForest> {
    forests
        .binary_search_by_key(&guard_index, |f| f.guard_index)
        .map(|pos| &forests[pos])
        .map_err(|_| TorsightError::UnknownCandidate(guard_index))
}

/// Resolves a split feature given either as an index, as `"f<index>"`, or
/// as a layout name.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum FeatureRef {
    Index(usize),
    Name(String),
}

impl FeatureRef {
    pub(crate) fn resolve(&self) -> std::result::Result<usize, String> {
        let index = match self {
            FeatureRef::Index(i) => *i,
            FeatureRef::Name(name) => name
                .strip_prefix('f')
                .and_then(|rest| rest.parse().ok())
                .or_else(|| torsight_features::layout::feature_index(name))
                .ok_or_else(|| format!("unknown split feature `{name}`"))?,
        };
        if index >= FEATURE_COUNT {
            return Err(format!("split feature {index} is outside the {FEATURE_COUNT}-field layout"));
        }
        Ok(index)
    }
}

pub(crate) fn artifact_error(path: &std::path::Path, reason: impl Into<String>) -> TorsightError {
    TorsightError::ArtifactLoad {
        path: path.display().to_string(),
        reason: reason.into(),
    }
}
