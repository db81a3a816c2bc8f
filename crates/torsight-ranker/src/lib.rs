//! torsight-ranker: Guard-candidate scoring, ranking and explanation.
//!
//! Three gradient-boosted-tree scorer families sit behind one
//! [`scorer::ScorerAdapter`] trait; the [`ensemble::EnsembleRanker`] blends
//! them, and attribution and counterfactual analysis both re-enter the same
//! [`pipeline::RankingPipeline`]. [`engine::InferenceEngine`] is the façade
//! the serving layer talks to.

pub mod scorer;
pub mod registry;
pub mod weights;
pub mod ensemble;
pub mod pipeline;
pub mod attribution;
pub mod rationale;
pub mod counterfactual;
pub mod engine;

pub use attribution::{Attribution, AttributionEngine, FeatureContribution, GroupImpact};
pub use counterfactual::{
    CandidateDelta, CounterfactualEngine, CounterfactualReport, CriticalThreshold,
    CriticalThresholds, FeatureSensitivity, SensitivityLevel, SensitivityReport, ThresholdDirection,
};
pub use engine::{EngineHealth, FeatureImportanceReport, InferenceEngine, ModelInfo, ModelList};
pub use ensemble::{CombinedScores, ContributingScorer, EnsembleRanker, RankedEntry, RankedResult};
pub use pipeline::{PipelineRun, RankingPipeline};
pub use registry::{ScorerRegistry, ScorerStatus};
pub use scorer::{FeatureImportance, ScoreVector, ScorerAdapter, ScorerAttribution};
pub use weights::EnsembleWeights;
