//! Inference façade: the operations the serving layer exposes.
//!
//! Identifiers and bounds are validated here, before any transform or
//! scoring work starts. Everything else delegates to the pipeline and the
//! attribution and counterfactual engines, which share one
//! [`RankingPipeline`] behind an `Arc`.

use std::sync::Arc;

use serde::Serialize;
use torsight_common::{
    Deadline, ModelSelection, Observation, ObservationOverrides, RawField, Result, ScorerId,
};
use torsight_config::EngineConfig;
use torsight_features::{layout, FeatureTransformer, FeatureVector, ReferenceData, FEATURE_COUNT, FEATURE_VERSION};
use tracing::{info, warn};

use crate::attribution::{Attribution, AttributionEngine};
use crate::counterfactual::{CounterfactualEngine, CounterfactualReport, CriticalThresholds};
use crate::ensemble::{EnsembleRanker, RankedResult};
use crate::pipeline::RankingPipeline;
use crate::registry::{ScorerRegistry, ScorerStatus};
use crate::scorer::{rank_importance, FeatureImportance};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub family: String,
    pub status: ScorerStatus,
    pub reason: Option<String>,
    pub recommended: bool,
    pub weight: Option<f64>,
    pub tree_count: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelList {
    pub models: Vec<ModelInfo>,
    pub default_model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureImportanceReport {
    pub model_id: String,
    pub features: Vec<FeatureImportance>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineHealth {
    pub status: &'static str,
    pub models_loaded: usize,
    pub models_total: usize,
    pub candidate_count: usize,
    pub degraded: bool,
    pub feature_count: usize,
    pub layout_version: u8,
    pub layout_hash: String,
}

#[derive(Debug, Clone)]
pub struct InferenceEngine {
    pipeline: Arc<RankingPipeline>,
    attribution: AttributionEngine,
    counterfactual: CounterfactualEngine,
}

impl InferenceEngine {
    /// Load reference tables and every scorer artifact named by `config`.
    ///
    /// Reference data is mandatory; a scorer that fails to load only
    /// degrades the ensemble.
    pub fn load(config: &EngineConfig) -> Result<Self> {
        let reference = ReferenceData::load(
            &config.reference.countries,
            &config.reference.candidates,
            &config.reference.cooccurrence,
        )?;
        let registry = ScorerRegistry::load(&config.models, reference.candidates());
        let engine = Self::from_parts(Arc::new(reference), registry, config);
        let loaded = engine.registry().available().len();
        if loaded == 0 {
            warn!("No scorer loaded; every scoring request will fail until artifacts are fixed");
        } else {
            info!(
                "Inference engine ready: {}/{} scorers, {} candidates",
                loaded,
                ScorerId::ALL.len(),
                engine.pipeline.candidates().len()
            );
        }
        Ok(engine)
    }

    pub fn from_parts(reference: Arc<ReferenceData>, registry: ScorerRegistry, config: &EngineConfig) -> Self {
        let pipeline = Arc::new(RankingPipeline::new(
            FeatureTransformer::new(reference),
            registry,
            EnsembleRanker::new(&config.ensemble),
        ));
        Self {
            attribution: AttributionEngine::new(pipeline.clone(), config.attribution.clone()),
            counterfactual: CounterfactualEngine::new(pipeline.clone(), config.counterfactual.clone()),
            pipeline,
        }
    }

    pub fn pipeline(&self) -> &RankingPipeline {
        &self.pipeline
    }

    pub fn registry(&self) -> &ScorerRegistry {
        self.pipeline.registry()
    }

    pub fn attribution_engine(&self) -> &AttributionEngine {
        &self.attribution
    }

    pub fn counterfactual_engine(&self) -> &CounterfactualEngine {
        &self.counterfactual
    }

    /// `None` selects the ensemble.
    pub fn parse_model(model_id: Option<&str>) -> Result<ModelSelection> {
        model_id.map_or(Ok(ModelSelection::default()), str::parse)
    }

    pub fn predict(
        &self,
        observation: &Observation,
        model_id: Option<&str>,
        top_k: Option<i64>,
        deadline: &Deadline,
    ) -> Result<RankedResult> {
        let selection = Self::parse_model(model_id)?;
        let top_k = self.pipeline.ranker().resolve_top_k(top_k)?;
        Ok(self.pipeline.run(observation, selection, top_k, deadline)?.ranked)
    }

    pub fn explain(
        &self,
        observation: &Observation,
        guard_index: u32,
        model_id: Option<&str>,
        deadline: &Deadline,
    ) -> Result<Attribution> {
        let selection = Self::parse_model(model_id)?;
        self.attribution.explain(observation, guard_index, selection, deadline)
    }

    pub fn explain_vector(
        &self,
        features: &FeatureVector,
        guard_index: u32,
        model_id: Option<&str>,
        deadline: &Deadline,
    ) -> Result<Attribution> {
        let selection = Self::parse_model(model_id)?;
        self.attribution.explain_features(features, guard_index, selection, deadline)
    }

    pub fn counterfactual(
        &self,
        observation: &Observation,
        overrides: &ObservationOverrides,
        model_id: Option<&str>,
        top_k: Option<i64>,
        deadline: &Deadline,
    ) -> Result<CounterfactualReport> {
        let selection = Self::parse_model(model_id)?;
        let top_k = self.pipeline.ranker().resolve_top_k(top_k)?;
        self.counterfactual.analyze(observation, overrides, selection, top_k, deadline)
    }

    pub fn critical_threshold(
        &self,
        observation: &Observation,
        field: RawField,
        model_id: Option<&str>,
        deadline: &Deadline,
    ) -> Result<CriticalThresholds> {
        let selection = Self::parse_model(model_id)?;
        self.counterfactual.critical_threshold(observation, field, selection, deadline)
    }

    /// Global importance, precomputed at load. The ensemble ranking is the
    /// weight-averaged percentage over the scorers currently available.
    pub fn feature_importance(&self, model_id: &str) -> Result<FeatureImportanceReport> {
        let selection: ModelSelection = model_id.parse()?;
        let features = match selection {
            ModelSelection::Single(id) => self.registry().get(id)?.global_importance().to_vec(),
            ModelSelection::Ensemble => {
                let scorers = self.pipeline.scorers_for(selection)?;
                let available: Vec<ScorerId> = scorers.iter().map(|s| s.id()).collect();
                let contributors = self.pipeline.ranker().contributors(selection, &available)?;
                let mut blended = vec![0.0; FEATURE_COUNT];
                for contributor in &contributors {
                    let scorer = self.registry().get(contributor.id)?;
                    for item in scorer.global_importance() {
                        blended[item.index] += contributor.weight * item.importance_pct;
                    }
                }
                rank_importance(&blended)
            }
        };
        Ok(FeatureImportanceReport {
            model_id: selection.to_string(),
            features,
        })
    }

    pub fn list_models(&self) -> ModelList {
        let registry = self.registry();
        let weights = self.pipeline.ranker().weights();
        let mut models: Vec<ModelInfo> = ScorerId::ALL
            .into_iter()
            .map(|id| {
                let (status, reason) = registry.status(id);
                let tree_count = registry.get(id).ok().map(|s| s.tree_count());
                ModelInfo {
                    id: id.to_string(),
                    name: id.display_name().to_string(),
                    family: format!("gradient-boosted trees ({})", id.display_name()),
                    status,
                    reason: reason.map(str::to_string),
                    recommended: false,
                    weight: Some(weights.get(id)),
                    tree_count,
                }
            })
            .collect();

        let available = registry.available();
        let (status, reason) = if available.is_empty() {
            (ScorerStatus::Unavailable, Some("no scorer artifact loaded".to_string()))
        } else if registry.is_degraded() {
            (
                ScorerStatus::Loaded,
                Some(format!("degraded: {} of {} scorers", available.len(), ScorerId::ALL.len())),
            )
        } else {
            (ScorerStatus::Loaded, None)
        };
        models.push(ModelInfo {
            id: ModelSelection::ENSEMBLE_ID.to_string(),
            name: "Ensemble".to_string(),
            family: "weighted ensemble".to_string(),
            status,
            reason,
            recommended: true,
            weight: None,
            tree_count: None,
        });

        ModelList {
            models,
            default_model: ModelSelection::default().to_string(),
        }
    }

    pub fn health(&self) -> EngineHealth {
        let registry = self.registry();
        let models_loaded = registry.available().len();
        let degraded = registry.is_degraded();
        let status = match (models_loaded, degraded) {
            (0, _) => "unavailable",
            (_, true) => "degraded",
            _ => "healthy",
        };
        EngineHealth {
            status,
            models_loaded,
            models_total: ScorerId::ALL.len(),
            candidate_count: self.pipeline.candidates().len(),
            degraded,
            feature_count: FEATURE_COUNT,
            layout_version: FEATURE_VERSION,
            layout_hash: layout::layout_hash().to_string(),
        }
    }
}
