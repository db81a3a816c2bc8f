//! Per-feature explanation of one candidate's score.
//!
//! Contributions come from the scorers' TreeSHAP values; for the ensemble
//! they are the weight-normalized sum over the contributing scorers, so the
//! additivity `Σ contribution = score − baseline` carries over unchanged.

use std::sync::Arc;

use serde::Serialize;
use torsight_common::{Deadline, ModelSelection, Observation, Result, TorsightError};
use torsight_config::AttributionConfig;
use torsight_features::{FeatureGroup, FeatureVector, FEATURE_COUNT, FEATURE_LAYOUT};
use tracing::debug;

use crate::ensemble::ContributingScorer;
use crate::pipeline::RankingPipeline;
use crate::rationale;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureContribution {
    pub rank: usize,
    pub index: usize,
    pub feature: String,
    pub group: FeatureGroup,
    pub value: f64,
    /// Signed, in score units.
    pub contribution: f64,
    /// Share of the total absolute contribution, in percent.
    pub impact_pct: f64,
}

impl FeatureContribution {
    pub fn raises_score(&self) -> bool {
        self.contribution > 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupImpact {
    pub group: FeatureGroup,
    pub contribution: f64,
    pub impact_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attribution {
    pub guard_index: u32,
    pub model_used: String,
    pub contributing_scorers: Vec<ContributingScorer>,
    pub degraded: bool,
    pub score: f64,
    pub baseline: f64,
    pub confidence: f64,
    pub top_features: Vec<FeatureContribution>,
    /// Every feature, ordered like `top_features`.
    pub contributions: Vec<FeatureContribution>,
    pub group_impact: Vec<GroupImpact>,
    pub rationale: String,
    pub total_features: usize,
}

impl Attribution {
    pub fn contribution_sum(&self) -> f64 {
        self.contributions.iter().map(|c| c.contribution).sum()
    }
}

#[derive(Debug, Clone)]
pub struct AttributionEngine {
    pipeline: Arc<RankingPipeline>,
    config: AttributionConfig,
}

impl AttributionEngine {
    pub fn new(pipeline: Arc<RankingPipeline>, config: AttributionConfig) -> Self {
        Self { pipeline, config }
    }

    pub fn config(&self) -> &AttributionConfig {
        &self.config
    }

    pub fn explain(
        &self,
        observation: &Observation,
        guard_index: u32,
        selection: ModelSelection,
        deadline: &Deadline,
    ) -> Result<Attribution> {
        self.pipeline.candidates().require(guard_index)?;
        let features = self.pipeline.transform(observation, deadline)?;
        self.explain_features(&features, guard_index, selection, deadline)
    }

    /// Explain a caller-built vector. It must match the current layout.
    pub fn explain_features(
        &self,
        features: &FeatureVector,
        guard_index: u32,
        selection: ModelSelection,
        deadline: &Deadline,
    ) -> Result<Attribution> {
        features.validate()?;
        self.pipeline.candidates().require(guard_index)?;

        let scorers = self.pipeline.scorers_for(selection)?;
        let available: Vec<_> = scorers.iter().map(|s| s.id()).collect();
        let ranker = self.pipeline.ranker();
        let contributors = ranker.contributors(selection, &available)?;

        let mut phi = vec![0.0; FEATURE_COUNT];
        let mut score = 0.0;
        let mut baseline = 0.0;
        for contributor in &contributors {
            deadline.check("attribute")?;
            let scorer = scorers
                .iter()
                .find(|s| s.id() == contributor.id)
                .ok_or_else(|| TorsightError::internal(contributor.id.as_str(), "scorer vanished"))?;
            let attribution = scorer.attributions(features, guard_index)?;
            if attribution.contributions.len() != FEATURE_COUNT {
                return Err(TorsightError::internal(
                    contributor.id.as_str(),
                    format!("{} contributions for a {FEATURE_COUNT}-field layout", attribution.contributions.len()),
                ));
            }
            score += contributor.weight * attribution.score;
            baseline += contributor.weight * attribution.baseline;
            for (acc, c) in phi.iter_mut().zip(&attribution.contributions) {
                *acc += contributor.weight * c;
            }
        }
        deadline.check("attribute")?;

        let contributions = rank_contributions(features, &phi);
        let top_features: Vec<_> = contributions.iter().take(self.config.top_n).cloned().collect();
        let group_impact = group_impact(&contributions);
        let rationale = rationale::render(
            &rationale::RationaleContext {
                guard_index,
                score,
                baseline,
                contributions: &contributions,
                groups: &group_impact,
            },
            &self.config,
        );
        debug!(
            guard_index,
            model = %selection,
            "Explained score {:.4} against baseline {:.4}",
            score,
            baseline
        );

        Ok(Attribution {
            guard_index,
            model_used: selection.to_string(),
            degraded: ranker.is_degraded(selection, &available),
            contributing_scorers: contributors,
            score,
            baseline,
            confidence: ranker.confidence(score),
            top_features,
            contributions,
            group_impact,
            rationale,
            total_features: FEATURE_COUNT,
        })
    }
}

/// Sort by magnitude, ties by layout position, and attach impact shares.
fn rank_contributions(features: &FeatureVector, phi: &[f64]) -> Vec<FeatureContribution> {
    let total_abs: f64 = phi.iter().map(|c| c.abs()).sum();
    let mut order: Vec<usize> = (0..phi.len()).collect();
    order.sort_by(|&a, &b| phi[b].abs().total_cmp(&phi[a].abs()).then(a.cmp(&b)));
    order
        .into_iter()
        .enumerate()
        .map(|(rank, index)| FeatureContribution {
            rank: rank + 1,
            index,
            feature: FEATURE_LAYOUT[index].to_string(),
            group: FeatureGroup::of(index).unwrap_or(FeatureGroup::Statistical),
            value: features.get(index).unwrap_or(0.0),
            contribution: phi[index],
            impact_pct: share(phi[index].abs(), total_abs),
        })
        .collect()
}

fn group_impact(contributions: &[FeatureContribution]) -> Vec<GroupImpact> {
    let total_abs: f64 = contributions.iter().map(|c| c.contribution.abs()).sum();
    FeatureGroup::ALL
        .into_iter()
        .map(|group| {
            let members = contributions.iter().filter(|c| c.group == group);
            let (contribution, abs) = members.fold((0.0, 0.0), |(sum, abs), c| {
                (sum + c.contribution, abs + c.contribution.abs())
            });
            GroupImpact {
                group,
                contribution,
                impact_pct: share(abs, total_abs),
            }
        })
        .collect()
}

fn share(part: f64, total: f64) -> f64 {
    if total > 0.0 {
        part / total * 100.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector() -> FeatureVector {
        FeatureVector::from_values((0..FEATURE_COUNT).map(|i| i as f64).collect()).unwrap()
    }

    #[test]
    fn test_rank_contributions_orders_by_magnitude() {
        let mut phi = vec![0.0; FEATURE_COUNT];
        phi[3] = -0.2;
        phi[30] = 0.5;
        phi[60] = 0.2;
        let ranked = rank_contributions(&vector(), &phi);
        assert_eq!(ranked.len(), FEATURE_COUNT);
        assert_eq!(ranked[0].index, 30);
        assert_eq!(ranked[0].group, FeatureGroup::Geographic);
        // equal magnitude: lower layout position first
        assert_eq!(ranked[1].index, 3);
        assert_eq!(ranked[2].index, 60);
        assert!(!ranked[1].raises_score());
        assert!((ranked[0].impact_pct - 500.0 / 9.0).abs() < 1e-9);
        assert_eq!(ranked[0].value, 30.0);
        let pct: f64 = ranked.iter().map(|c| c.impact_pct).sum();
        assert!((pct - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_contributions_have_zero_impact() {
        let ranked = rank_contributions(&vector(), &[0.0; FEATURE_COUNT]);
        assert!(ranked.iter().all(|c| c.impact_pct == 0.0));
        assert_eq!(ranked[0].index, 0);
    }

    #[test]
    fn test_group_impact_sums_per_group() {
        let mut phi = vec![0.0; FEATURE_COUNT];
        phi[0] = 0.3;
        phi[1] = -0.1;
        phi[45] = 0.4;
        let groups = group_impact(&rank_contributions(&vector(), &phi));
        assert_eq!(groups.len(), 4);
        assert!((groups[0].contribution - 0.2).abs() < 1e-12);
        assert!((groups[0].impact_pct - 50.0).abs() < 1e-9);
        assert_eq!(groups[2].group, FeatureGroup::Temporal);
        assert!((groups[2].impact_pct - 50.0).abs() < 1e-9);
        assert_eq!(groups[3].impact_pct, 0.0);
    }
}
