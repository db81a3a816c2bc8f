//! Loaded scorers, keyed by id.
//!
//! A family whose artifact fails to load stays registered as unavailable
//! with the reason; the process keeps serving with the remaining scorers.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use torsight_common::{CandidateSet, Result, ScorerId, TorsightError};
use torsight_config::ModelsConfig;
use tracing::{info, warn};

use crate::scorer::{
    CatBoostScorer, Exclusive, LightGbmScorer, ScorerAdapter, XgBoostScorer,
};

#[derive(Debug, Clone)]
pub enum ScorerSlot {
    Loaded(Arc<dyn ScorerAdapter>),
    Unavailable { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScorerStatus {
    Loaded,
    Unavailable,
}

#[derive(Debug, Clone, Default)]
pub struct ScorerRegistry {
    slots: BTreeMap<ScorerId, ScorerSlot>,
}

impl ScorerRegistry {
    /// Load every family's artifact. Failures are logged and recorded,
    /// never propagated.
    pub fn load(models: &ModelsConfig, candidates: &CandidateSet) -> Self {
        let mut registry = Self::default();
        for id in ScorerId::ALL {
            let path = models.path_for(id);
            let serialized = models.serialized(id);
            let loaded: Result<Arc<dyn ScorerAdapter>> = match id {
                ScorerId::Xgboost => XgBoostScorer::load(path, candidates).map(|s| wrap(s, serialized)),
                ScorerId::Lightgbm => LightGbmScorer::load(path, candidates).map(|s| wrap(s, serialized)),
                ScorerId::Catboost => CatBoostScorer::load(path, candidates).map(|s| wrap(s, serialized)),
            };
            match loaded {
                Ok(scorer) => {
                    if serialized {
                        info!("Scorer {} calls are serialized per instance", id);
                    }
                    registry.insert(scorer);
                }
                Err(e) => {
                    warn!("Scorer {} unavailable: {}", id, e);
                    registry.mark_unavailable(id, e.to_string());
                }
            }
        }
        if registry.is_degraded() {
            warn!(
                "Running degraded: {} of {} scorers available",
                registry.available().len(),
                ScorerId::ALL.len()
            );
        }
        registry
    }

    pub fn insert(&mut self, scorer: Arc<dyn ScorerAdapter>) {
        self.slots.insert(scorer.id(), ScorerSlot::Loaded(scorer));
    }

    pub fn mark_unavailable(&mut self, id: ScorerId, reason: impl Into<String>) {
        self.slots.insert(id, ScorerSlot::Unavailable { reason: reason.into() });
    }

    pub fn get(&self, id: ScorerId) -> Result<&Arc<dyn ScorerAdapter>> {
        match self.slots.get(&id) {
            Some(ScorerSlot::Loaded(scorer)) => Ok(scorer),
            Some(ScorerSlot::Unavailable { reason }) => Err(TorsightError::ScorerUnavailable {
                scorer: id.to_string(),
                reason: reason.clone(),
            }),
            None => Err(TorsightError::ScorerUnavailable {
                scorer: id.to_string(),
                reason: "not configured".into(),
            }),
        }
    }

    /// Loaded scorers in id order.
    pub fn available(&self) -> Vec<ScorerId> {
        self.slots
            .iter()
            .filter(|(_, slot)| matches!(slot, ScorerSlot::Loaded(_)))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn status(&self, id: ScorerId) -> (ScorerStatus, Option<&str>) {
        match self.slots.get(&id) {
            Some(ScorerSlot::Loaded(_)) => (ScorerStatus::Loaded, None),
            Some(ScorerSlot::Unavailable { reason }) => (ScorerStatus::Unavailable, Some(reason)),
            None => (ScorerStatus::Unavailable, Some("not configured")),
        }
    }

    /// True when any known family failed to load.
    pub fn is_degraded(&self) -> bool {
        ScorerId::ALL
            .iter()
            .any(|id| !matches!(self.slots.get(id), Some(ScorerSlot::Loaded(_))))
    }
}

fn wrap<S: ScorerAdapter + 'static>(scorer: S, serialized: bool) -> Arc<dyn ScorerAdapter> {
    if serialized {
        Arc::new(Exclusive::new(scorer))
    } else {
        Arc::new(scorer)
    }
}
