//! Ensemble weight vector.
//! Process-wide configuration, loaded once at startup.

use std::collections::BTreeMap;

use serde::Serialize;
use torsight_common::{Result, ScorerId, TorsightError};
use torsight_config::EnsembleConfig;

/// One weight per scorer family.
/// Need not sum to 1.0; [`renormalised`](Self::renormalised) does that over
/// whichever scorers are available for a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnsembleWeights {
    weights: BTreeMap<ScorerId, f64>,
}

impl Default for EnsembleWeights {
    /// XGBoost 0.40, LightGBM 0.30, CatBoost 0.30
    fn default() -> Self {
        Self::from_config(&EnsembleConfig::default())
    }
}

impl EnsembleWeights {
    pub fn from_config(config: &EnsembleConfig) -> Self {
        Self {
            weights: ScorerId::ALL
                .iter()
                .map(|&id| (id, config.weight_for(id)))
                .collect(),
        }
    }

    pub fn new(weights: impl IntoIterator<Item = (ScorerId, f64)>) -> Self {
        Self {
            weights: weights.into_iter().collect(),
        }
    }

    pub fn get(&self, id: ScorerId) -> f64 {
        self.weights.get(&id).copied().unwrap_or(0.0)
    }

    /// Weights restricted to `available` and rescaled to sum to 1.0,
    /// in scorer id order. Scorers with zero weight are dropped.
    pub fn renormalised(&self, available: &[ScorerId]) -> Result<Vec<(ScorerId, f64)>> {
        let mut ids: Vec<ScorerId> = available.to_vec();
        ids.sort();
        ids.dedup();
        let sum: f64 = ids.iter().map(|id| self.get(*id)).sum();
        if sum <= 0.0 {
            return Err(TorsightError::ScorerUnavailable {
                scorer: "ensemble".into(),
                reason: "no weighted scorer is available".into(),
            });
        }
        Ok(ids
            .into_iter()
            .filter(|id| self.get(*id) > 0.0)
            .map(|id| (id, self.get(id) / sum))
            .collect())
    }
}
