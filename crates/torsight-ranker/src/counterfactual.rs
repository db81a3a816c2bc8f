//! "What if" analysis: re-rank under hypothetical raw-field changes.
//!
//! Every evaluation goes through [`RankingPipeline`]; there is no second
//! scoring path. Sensitivity probes are taken on a fixed ladder
//! `δ = k · resolution` for `k = 1..=⌊step / resolution⌋`, so a larger step
//! always probes a superset of a smaller one and the reported swing can
//! only grow with the step.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use torsight_common::{
    Deadline, ModelSelection, Observation, ObservationOverrides, RawField, Result, TorsightError,
};
use torsight_config::{CounterfactualConfig, ImpactAggregate};
use tracing::debug;

use crate::ensemble::{CombinedScores, RankedResult};
use crate::pipeline::{PipelineRun, RankingPipeline};

/// Tolerance when snapping the step onto the resolution grid.
const GRID_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SensitivityLevel {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateDelta {
    pub guard_index: u32,
    /// `top_k + 1` when the candidate is outside the original top K.
    pub original_rank: usize,
    pub new_rank: usize,
    /// `original_rank − new_rank`; positive means the candidate moved up.
    pub rank_change: i64,
    pub original_confidence: f64,
    pub new_confidence: f64,
    pub confidence_change: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureSensitivity {
    pub field: RawField,
    pub original_value: serde_json::Value,
    /// Present when the field was overridden.
    pub new_value: Option<serde_json::Value>,
    /// Largest confidence swing of the reference candidate over the probe ladder.
    pub step_swing: f64,
    /// Signed confidence change from applying this field's override alone.
    pub override_impact: Option<f64>,
    pub level: SensitivityLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensitivityReport {
    /// Top candidate of the original ranking, whose confidence is tracked.
    pub reference_guard: Option<u32>,
    pub step: f64,
    pub features: Vec<FeatureSensitivity>,
    pub overall_impact: f64,
    pub aggregate: ImpactAggregate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterfactualReport {
    pub model_used: String,
    pub top_k: usize,
    pub original: RankedResult,
    pub modified: RankedResult,
    pub comparison: Vec<CandidateDelta>,
    pub top_guard_changed: bool,
    pub average_confidence_change: f64,
    pub sensitivity: SensitivityReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdDirection {
    Increase,
    Decrease,
}

impl ThresholdDirection {
    fn factor(&self, relative_change: f64) -> f64 {
        match self {
            ThresholdDirection::Increase => 1.0 + relative_change,
            ThresholdDirection::Decrease => 1.0 - relative_change,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CriticalThreshold {
    pub direction: ThresholdDirection,
    /// Smallest relative change found that alters the top candidate.
    pub relative_change: f64,
    pub value: f64,
    pub new_top_guard: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CriticalThresholds {
    pub field: RawField,
    pub original_value: f64,
    pub original_top_guard: Option<u32>,
    pub increase: Option<CriticalThreshold>,
    pub decrease: Option<CriticalThreshold>,
}

#[derive(Debug, Clone)]
pub struct CounterfactualEngine {
    pipeline: Arc<RankingPipeline>,
    config: CounterfactualConfig,
}

impl CounterfactualEngine {
    pub fn new(pipeline: Arc<RankingPipeline>, config: CounterfactualConfig) -> Self {
        Self { pipeline, config }
    }

    pub fn config(&self) -> &CounterfactualConfig {
        &self.config
    }

    /// Rank the original and the modified observation and compare them.
    ///
    /// Overrides are applied to a copy before any scoring, so an invalid
    /// override fails the request without work.
    pub fn analyze(
        &self,
        original: &Observation,
        overrides: &ObservationOverrides,
        selection: ModelSelection,
        top_k: usize,
        deadline: &Deadline,
    ) -> Result<CounterfactualReport> {
        let modified_obs = original.with_overrides(overrides)?;

        let before = self.pipeline.run(original, selection, top_k, deadline)?;
        let after = self.pipeline.run(&modified_obs, selection, top_k, deadline)?;

        let (comparison, average_confidence_change) = self.compare(&before, &after, top_k);
        let top_guard_changed = before.ranked.top().map(|e| e.candidate.guard_index)
            != after.ranked.top().map(|e| e.candidate.guard_index);
        let sensitivity = self.sensitivity(original, overrides, &before.combined, selection, deadline)?;

        debug!(
            model = %selection,
            overrides = overrides.len(),
            top_guard_changed,
            "Counterfactual overall impact {:.3}",
            sensitivity.overall_impact
        );

        Ok(CounterfactualReport {
            model_used: selection.to_string(),
            top_k,
            original: before.ranked,
            modified: after.ranked,
            comparison,
            top_guard_changed,
            average_confidence_change,
            sensitivity,
        })
    }

    /// Deltas for every candidate in either ranking, largest confidence
    /// change first, limited to `comparison_limit`. The average runs over
    /// the full union before truncation.
    fn compare(&self, before: &PipelineRun, after: &PipelineRun, top_k: usize) -> (Vec<CandidateDelta>, f64) {
        let ranker = self.pipeline.ranker();
        let union: BTreeSet<u32> = before
            .ranked
            .entries
            .iter()
            .chain(&after.ranked.entries)
            .map(|e| e.candidate.guard_index)
            .collect();

        let mut deltas: Vec<CandidateDelta> = union
            .into_iter()
            .map(|guard| {
                let original_rank = before.ranked.rank_of(guard).unwrap_or(top_k + 1);
                let new_rank = after.ranked.rank_of(guard).unwrap_or(top_k + 1);
                let original_confidence = ranker.confidence(before.combined.get(guard).unwrap_or(0.0));
                let new_confidence = ranker.confidence(after.combined.get(guard).unwrap_or(0.0));
                CandidateDelta {
                    guard_index: guard,
                    original_rank,
                    new_rank,
                    rank_change: original_rank as i64 - new_rank as i64,
                    original_confidence,
                    new_confidence,
                    confidence_change: new_confidence - original_confidence,
                }
            })
            .collect();

        let average = if deltas.is_empty() {
            0.0
        } else {
            deltas.iter().map(|d| d.confidence_change).sum::<f64>() / deltas.len() as f64
        };

        deltas.sort_by(|a, b| {
            b.confidence_change
                .abs()
                .total_cmp(&a.confidence_change.abs())
                .then(a.guard_index.cmp(&b.guard_index))
        });
        deltas.truncate(self.config.comparison_limit);
        (deltas, average)
    }

    fn sensitivity(
        &self,
        original: &Observation,
        overrides: &ObservationOverrides,
        baseline: &CombinedScores,
        selection: ModelSelection,
        deadline: &Deadline,
    ) -> Result<SensitivityReport> {
        let reference_guard = baseline.ordered().first().map(|(guard, _)| *guard);
        let Some(guard) = reference_guard else {
            return Ok(SensitivityReport {
                reference_guard,
                step: self.config.step,
                features: Vec::new(),
                overall_impact: 0.0,
                aggregate: self.config.aggregate,
            });
        };
        let ranker = self.pipeline.ranker();
        let base_confidence = ranker.confidence(baseline.get(guard).unwrap_or(0.0));

        let fields: BTreeSet<RawField> = RawField::NUMERIC.into_iter().chain(overrides.fields()).collect();
        let mut features = Vec::with_capacity(fields.len());
        for field in fields {
            let step_swing = if field.is_numeric() {
                self.swing(original, field, guard, base_confidence, self.config.step, selection, deadline)?
            } else {
                0.0
            };
            let override_impact = match overrides.get(field) {
                Some(_) => {
                    let single = original.with_overrides(&overrides.only(field))?;
                    let confidence = self.confidence_of(&single, guard, selection, deadline)?;
                    Some(confidence - base_confidence)
                }
                None => None,
            };
            let magnitude = step_swing.max(override_impact.map_or(0.0, f64::abs));
            features.push(FeatureSensitivity {
                field,
                original_value: original.value_of(field),
                new_value: overrides.get(field).cloned(),
                step_swing,
                override_impact,
                level: self.level(magnitude),
            });
        }

        let impacts = features.iter().filter_map(|f| f.override_impact.map(f64::abs));
        let overall_impact = match self.config.aggregate {
            ImpactAggregate::Sum => impacts.sum(),
            ImpactAggregate::Max => impacts.fold(0.0, f64::max),
        };

        Ok(SensitivityReport {
            reference_guard,
            step: self.config.step,
            features,
            overall_impact,
            aggregate: self.config.aggregate,
        })
    }

    /// Largest confidence swing of `guard` when `field` alone is scaled by
    /// `1 ± δ` over the probe ladder up to `step`. Probes that leave the
    /// field's domain are skipped.
    #[allow(clippy::too_many_arguments)]
    fn swing(
        &self,
        observation: &Observation,
        field: RawField,
        guard: u32,
        base_confidence: f64,
        step: f64,
        selection: ModelSelection,
        deadline: &Deadline,
    ) -> Result<f64> {
        let Some(value) = observation.numeric(field) else {
            return Ok(0.0);
        };
        let mut swing: f64 = 0.0;
        for delta in probe_ladder(step, self.config.resolution) {
            for factor in [1.0 + delta, 1.0 - delta] {
                let Ok(probe) = observation.with_numeric(field, value * factor) else {
                    continue;
                };
                let confidence = self.confidence_of(&probe, guard, selection, deadline)?;
                swing = swing.max((confidence - base_confidence).abs());
            }
        }
        Ok(swing)
    }

    /// Reference-candidate swing for one numeric field at a given step.
    pub fn step_swing(
        &self,
        observation: &Observation,
        field: RawField,
        step: f64,
        selection: ModelSelection,
        deadline: &Deadline,
    ) -> Result<f64> {
        if !field.is_numeric() {
            return Err(TorsightError::invalid_override(field.name(), "field is not numeric"));
        }
        let baseline = self.pipeline.score_observation(observation, selection, deadline)?;
        let Some((guard, score)) = baseline.ordered().first().copied() else {
            return Ok(0.0);
        };
        let base_confidence = self.pipeline.ranker().confidence(score);
        self.swing(observation, field, guard, base_confidence, step, selection, deadline)
    }

    fn confidence_of(
        &self,
        observation: &Observation,
        guard: u32,
        selection: ModelSelection,
        deadline: &Deadline,
    ) -> Result<f64> {
        let combined = self.pipeline.score_observation(observation, selection, deadline)?;
        let score = combined.get(guard).ok_or(TorsightError::UnknownCandidate(guard))?;
        Ok(self.pipeline.ranker().confidence(score))
    }

    fn level(&self, magnitude: f64) -> SensitivityLevel {
        if magnitude > self.config.high_threshold {
            SensitivityLevel::High
        } else if magnitude > self.config.medium_threshold {
            SensitivityLevel::Medium
        } else {
            SensitivityLevel::Low
        }
    }

    /// Smallest relative change of a numeric field, in each direction, that
    /// changes the top-ranked candidate. Bisects over
    /// `(0, threshold_max_change]`; a direction whose endpoint leaves the top
    /// candidate unchanged reports `None`.
    pub fn critical_threshold(
        &self,
        observation: &Observation,
        field: RawField,
        selection: ModelSelection,
        deadline: &Deadline,
    ) -> Result<CriticalThresholds> {
        let Some(value) = observation.numeric(field) else {
            return Err(TorsightError::invalid_override(field.name(), "field is not numeric"));
        };
        let original_top = self.top_guard(observation, selection, deadline)?;

        let mut found = [None, None];
        for (slot, direction) in found
            .iter_mut()
            .zip([ThresholdDirection::Increase, ThresholdDirection::Decrease])
        {
            *slot = self.bisect(observation, field, value, direction, original_top, selection, deadline)?;
        }
        let [increase, decrease] = found;

        Ok(CriticalThresholds {
            field,
            original_value: value,
            original_top_guard: original_top,
            increase,
            decrease,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn bisect(
        &self,
        observation: &Observation,
        field: RawField,
        value: f64,
        direction: ThresholdDirection,
        original_top: Option<u32>,
        selection: ModelSelection,
        deadline: &Deadline,
    ) -> Result<Option<CriticalThreshold>> {
        let top_at = |relative: f64| -> Result<Option<u32>> {
            let probe = observation.with_numeric(field, value * direction.factor(relative))?;
            self.top_guard(&probe, selection, deadline)
        };

        let mut hi = self.config.threshold_max_change;
        let mut hi_top = top_at(hi)?;
        if hi_top == original_top {
            return Ok(None);
        }
        let mut lo = 0.0;
        for _ in 0..self.config.threshold_iterations {
            let mid = (lo + hi) / 2.0;
            let mid_top = top_at(mid)?;
            if mid_top == original_top {
                lo = mid;
            } else {
                hi = mid;
                hi_top = mid_top;
            }
        }

        Ok(hi_top.map(|new_top_guard| CriticalThreshold {
            direction,
            relative_change: hi,
            value: value * direction.factor(hi),
            new_top_guard,
        }))
    }

    fn top_guard(&self, observation: &Observation, selection: ModelSelection, deadline: &Deadline) -> Result<Option<u32>> {
        let combined = self.pipeline.score_observation(observation, selection, deadline)?;
        Ok(combined.ordered().first().map(|(guard, _)| *guard))
    }
}

/// Relative perturbations probed for a given step, smallest first.
/// The step is snapped down onto the resolution grid.
pub fn probe_ladder(step: f64, resolution: f64) -> Vec<f64> {
    if !(step > 0.0 && resolution > 0.0) {
        return Vec::new();
    }
    let rungs = (step / resolution + GRID_EPSILON).floor() as usize;
    (1..=rungs).map(|k| k as f64 * resolution).collect()
}
