//! The one predict path: transform → score → combine → rank.
//!
//! Attribution and counterfactual analysis re-enter this pipeline instead
//! of carrying their own scoring code, so their numbers always agree with
//! a plain prediction.

use std::sync::Arc;

use torsight_common::{CandidateSet, Deadline, ModelSelection, Observation, Result, TorsightError};
use torsight_features::{FeatureTransformer, FeatureVector};
use tracing::debug;

use crate::ensemble::{CombinedScores, EnsembleRanker, RankedResult};
use crate::registry::ScorerRegistry;
use crate::scorer::ScorerAdapter;

#[derive(Debug)]
pub struct RankingPipeline {
    transformer: FeatureTransformer,
    registry: ScorerRegistry,
    ranker: EnsembleRanker,
}

/// Everything one pass produced.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub features: FeatureVector,
    pub combined: CombinedScores,
    pub ranked: RankedResult,
}

impl RankingPipeline {
    pub fn new(transformer: FeatureTransformer, registry: ScorerRegistry, ranker: EnsembleRanker) -> Self {
        Self {
            transformer,
            registry,
            ranker,
        }
    }

    pub fn candidates(&self) -> &CandidateSet {
        self.transformer.reference().candidates()
    }

    pub fn transformer(&self) -> &FeatureTransformer {
        &self.transformer
    }

    pub fn registry(&self) -> &ScorerRegistry {
        &self.registry
    }

    pub fn ranker(&self) -> &EnsembleRanker {
        &self.ranker
    }

    /// Scorers a selection runs. A single unavailable scorer is an error;
    /// the ensemble only fails when nothing at all is loaded.
    pub fn scorers_for(&self, selection: ModelSelection) -> Result<Vec<Arc<dyn ScorerAdapter>>> {
        match selection {
            ModelSelection::Single(id) => Ok(vec![self.registry.get(id)?.clone()]),
            ModelSelection::Ensemble => {
                let available = self.registry.available();
                if available.is_empty() {
                    return Err(TorsightError::ScorerUnavailable {
                        scorer: ModelSelection::ENSEMBLE_ID.into(),
                        reason: "no scorer artifact loaded".into(),
                    });
                }
                available
                    .into_iter()
                    .map(|id| self.registry.get(id).cloned())
                    .collect()
            }
        }
    }

    pub fn transform(&self, observation: &Observation, deadline: &Deadline) -> Result<FeatureVector> {
        deadline.check("transform")?;
        self.transformer.transform(observation)
    }

    pub fn score_features(
        &self,
        features: &FeatureVector,
        selection: ModelSelection,
        deadline: &Deadline,
    ) -> Result<CombinedScores> {
        let scorers = self.scorers_for(selection)?;
        let mut vectors = Vec::with_capacity(scorers.len());
        for scorer in &scorers {
            deadline.check("score")?;
            vectors.push(scorer.score(features, deadline)?);
        }
        deadline.check("combine")?;
        self.ranker.combine(selection, &vectors)
    }

    pub fn score_observation(
        &self,
        observation: &Observation,
        selection: ModelSelection,
        deadline: &Deadline,
    ) -> Result<CombinedScores> {
        let features = self.transform(observation, deadline)?;
        self.score_features(&features, selection, deadline)
    }

    pub fn run(
        &self,
        observation: &Observation,
        selection: ModelSelection,
        top_k: usize,
        deadline: &Deadline,
    ) -> Result<PipelineRun> {
        let features = self.transform(observation, deadline)?;
        let combined = self.score_features(&features, selection, deadline)?;
        deadline.check("rank")?;
        let ranked = self.ranker.rank_combined(self.candidates(), &combined, top_k)?;
        debug!(
            model = %selection,
            top_k,
            degraded = ranked.degraded,
            "Ranked {} of {} candidates",
            ranked.len(),
            ranked.total_guards
        );
        Ok(PipelineRun {
            features,
            combined,
            ranked,
        })
    }
}
