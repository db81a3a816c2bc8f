//! Weighted combination of scorer outputs into a ranked top-K list.
//!
//! combined(c) = Σ w[s] · score[s][c] over the contributing scorers, with
//! weights renormalized over whichever scorers are available.
//! confidence(c) = clamp(combined(c) × scale, 0, 100)
//!
//! Confidences are independent per candidate; they do not sum to 100.

use std::collections::BTreeMap;

use serde::Serialize;
use torsight_common::{CandidateSet, GuardCandidate, ModelSelection, Result, ScorerId, TorsightError};
use torsight_config::EnsembleConfig;

use crate::scorer::ScoreVector;
use crate::weights::EnsembleWeights;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContributingScorer {
    pub id: ScorerId,
    pub weight: f64,
}

/// Combined score of every candidate, before truncation.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedScores {
    pub selection: ModelSelection,
    pub contributors: Vec<ContributingScorer>,
    pub degraded: bool,
    scores: BTreeMap<u32, f64>,
}

impl CombinedScores {
    pub fn get(&self, guard_index: u32) -> Option<f64> {
        self.scores.get(&guard_index).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, f64)> + '_ {
        self.scores.iter().map(|(&g, &s)| (g, s))
    }

    /// Candidates ordered best first, ties by ascending guard_index.
    pub fn ordered(&self) -> Vec<(u32, f64)> {
        let mut ordered: Vec<(u32, f64)> = self.iter().collect();
        ordered.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ordered
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedEntry {
    pub rank: usize,
    #[serde(flatten)]
    pub candidate: GuardCandidate,
    /// Percentage in [0, 100].
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResult {
    pub model_used: String,
    pub top_k: usize,
    pub total_guards: usize,
    pub degraded: bool,
    pub contributing_scorers: Vec<ContributingScorer>,
    pub entries: Vec<RankedEntry>,
}

impl RankedResult {
    pub fn rank_of(&self, guard_index: u32) -> Option<usize> {
        self.entries
            .iter()
            .find(|e| e.candidate.guard_index == guard_index)
            .map(|e| e.rank)
    }

    pub fn top(&self) -> Option<&RankedEntry> {
        self.entries.first()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct EnsembleRanker {
    weights: EnsembleWeights,
    confidence_scale: f64,
    default_top_k: usize,
    max_top_k: usize,
}

impl EnsembleRanker {
    pub fn new(config: &EnsembleConfig) -> Self {
        Self {
            weights: EnsembleWeights::from_config(config),
            confidence_scale: config.confidence_scale,
            default_top_k: config.default_top_k,
            max_top_k: config.max_top_k,
        }
    }

    pub fn weights(&self) -> &EnsembleWeights {
        &self.weights
    }

    pub fn max_top_k(&self) -> usize {
        self.max_top_k
    }

    /// Apply the default and reject K ≤ 0 or K > max before any work.
    pub fn resolve_top_k(&self, requested: Option<i64>) -> Result<usize> {
        let k = requested.unwrap_or(self.default_top_k as i64);
        if k <= 0 || k as u64 > self.max_top_k as u64 {
            return Err(TorsightError::InvalidTopK {
                requested: k,
                max: self.max_top_k,
            });
        }
        Ok(k as usize)
    }

    pub fn confidence(&self, combined: f64) -> f64 {
        (combined * self.confidence_scale).clamp(0.0, 100.0)
    }

    /// Weights for a selection given the scorers that produced scores.
    pub fn contributors(
        &self,
        selection: ModelSelection,
        available: &[ScorerId],
    ) -> Result<Vec<ContributingScorer>> {
        match selection {
            ModelSelection::Single(id) => {
                if available.contains(&id) {
                    Ok(vec![ContributingScorer { id, weight: 1.0 }])
                } else {
                    Err(TorsightError::ScorerUnavailable {
                        scorer: id.to_string(),
                        reason: "no scores produced".into(),
                    })
                }
            }
            ModelSelection::Ensemble => Ok(self
                .weights
                .renormalised(available)?
                .into_iter()
                .map(|(id, weight)| ContributingScorer { id, weight })
                .collect()),
        }
    }

    /// An ensemble is degraded when a scorer with non-zero weight is missing.
    pub fn is_degraded(&self, selection: ModelSelection, available: &[ScorerId]) -> bool {
        selection == ModelSelection::Ensemble
            && ScorerId::ALL
                .iter()
                .any(|id| self.weights.get(*id) > 0.0 && !available.contains(id))
    }

    pub fn combine(&self, selection: ModelSelection, scores: &[ScoreVector]) -> Result<CombinedScores> {
        let available: Vec<ScorerId> = scores.iter().map(|s| s.scorer).collect();
        let contributors = self.contributors(selection, &available)?;
        let degraded = self.is_degraded(selection, &available);

        let mut combined: BTreeMap<u32, f64> = BTreeMap::new();
        for contributor in &contributors {
            let vector = scores
                .iter()
                .find(|s| s.scorer == contributor.id)
                .ok_or_else(|| TorsightError::internal(contributor.id.as_str(), "missing score vector"))?;
            for (guard, score) in vector.iter() {
                *combined.entry(guard).or_insert(0.0) += contributor.weight * score;
            }
        }
        for contributor in &contributors {
            let vector = scores.iter().find(|s| s.scorer == contributor.id);
            if vector.map_or(true, |v| v.len() != combined.len()) {
                return Err(TorsightError::internal(
                    contributor.id.as_str(),
                    "score vector does not cover every candidate",
                ));
            }
        }

        Ok(CombinedScores {
            selection,
            contributors,
            degraded,
            scores: combined,
        })
    }

    /// Sort, convert to confidences, and truncate to
    /// `min(top_k, candidates, max_top_k)`.
    pub fn rank_combined(
        &self,
        candidates: &CandidateSet,
        combined: &CombinedScores,
        top_k: usize,
    ) -> Result<RankedResult> {
        let limit = top_k.min(candidates.len()).min(self.max_top_k);
        let entries = combined
            .ordered()
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(i, (guard, score))| {
                Ok(RankedEntry {
                    rank: i + 1,
                    candidate: candidates.require(guard)?.clone(),
                    confidence: self.confidence(score),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(RankedResult {
            model_used: combined.selection.to_string(),
            top_k,
            total_guards: candidates.len(),
            degraded: combined.degraded,
            contributing_scorers: combined.contributors.clone(),
            entries,
        })
    }

    pub fn rank(
        &self,
        candidates: &CandidateSet,
        selection: ModelSelection,
        scores: &[ScoreVector],
        top_k: usize,
    ) -> Result<RankedResult> {
        let combined = self.combine(selection, scores)?;
        self.rank_combined(candidates, &combined, top_k)
    }
}
