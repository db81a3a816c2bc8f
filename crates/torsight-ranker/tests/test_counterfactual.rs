//! Counterfactual comparison, sensitivity, and critical threshold search.

use std::collections::BTreeMap;

use pretty_assertions::assert_eq;
use serde_json::json;
use torsight_common::{Deadline, ModelSelection, ObservationOverrides, RawField, TorsightError};
use torsight_config::{EngineConfig, ImpactAggregate};
use torsight_ranker::{InferenceEngine, SensitivityLevel};
use torsight_test_utils::{sample_observation, Fixture};

fn engine_with(config: impl FnOnce(&mut EngineConfig)) -> InferenceEngine {
    let mut fixture = Fixture::new().unwrap();
    config(&mut fixture.config);
    InferenceEngine::load(&fixture.config).unwrap()
}

fn engine() -> InferenceEngine {
    engine_with(|_| {})
}

#[test]
fn test_identity_overrides_change_nothing() {
    let engine = engine();
    let report = engine
        .counterfactual(&sample_observation(), &ObservationOverrides::new(), None, Some(10), &Deadline::none())
        .unwrap();

    assert_eq!(report.original, report.modified);
    assert!(!report.top_guard_changed);
    assert_eq!(report.average_confidence_change, 0.0);
    assert_eq!(report.comparison.len(), 10);
    for delta in &report.comparison {
        assert_eq!(delta.rank_change, 0);
        assert_eq!(delta.confidence_change, 0.0);
    }
    assert_eq!(report.sensitivity.overall_impact, 0.0);
    assert!(report.sensitivity.features.iter().all(|f| f.override_impact.is_none()));
}

#[test]
fn test_overrides_rerank_through_the_same_pipeline() {
    let engine = engine();
    let obs = sample_observation();
    let overrides = ObservationOverrides::new()
        .with(RawField::Bandwidth, 15.0)
        .with(RawField::SetupDuration, 0.4);
    let report = engine
        .counterfactual(&obs, &overrides, None, Some(10), &Deadline::none())
        .unwrap();

    let modified_obs = obs.with_overrides(&overrides).unwrap();
    let direct = engine.predict(&modified_obs, None, Some(10), &Deadline::none()).unwrap();
    assert_eq!(report.modified, direct);

    assert!(report.comparison.len() <= 10);
    assert!(report
        .comparison
        .windows(2)
        .all(|w| w[0].confidence_change.abs() >= w[1].confidence_change.abs()));
    for delta in &report.comparison {
        assert_eq!(delta.rank_change, delta.original_rank as i64 - delta.new_rank as i64);
        assert!(delta.original_rank <= 11 && delta.new_rank <= 11);
        let expected = delta.new_confidence - delta.original_confidence;
        assert!((delta.confidence_change - expected).abs() < 1e-12);
    }
    assert_eq!(
        report.top_guard_changed,
        report.original.entries[0].candidate.guard_index != report.modified.entries[0].candidate.guard_index
    );

    let bandwidth = report
        .sensitivity
        .features
        .iter()
        .find(|f| f.field == RawField::Bandwidth)
        .unwrap();
    assert_eq!(bandwidth.original_value, json!(7.5));
    assert_eq!(bandwidth.new_value, Some(json!(15.0)));
    assert!(bandwidth.override_impact.is_some());

    let impacts: f64 = report
        .sensitivity
        .features
        .iter()
        .filter_map(|f| f.override_impact)
        .map(f64::abs)
        .sum();
    assert!((report.sensitivity.overall_impact - impacts).abs() < 1e-12);
}

#[test]
fn test_max_aggregate() {
    let engine = engine_with(|c| c.counterfactual.aggregate = ImpactAggregate::Max);
    let overrides = ObservationOverrides::new()
        .with(RawField::Bandwidth, 2.0)
        .with(RawField::TotalBytes, 4_000_000);
    let report = engine
        .counterfactual(&sample_observation(), &overrides, None, Some(10), &Deadline::none())
        .unwrap();
    let max = report
        .sensitivity
        .features
        .iter()
        .filter_map(|f| f.override_impact.map(f64::abs))
        .fold(0.0, f64::max);
    assert_eq!(report.sensitivity.aggregate, ImpactAggregate::Max);
    assert_eq!(report.sensitivity.overall_impact, max);
}

#[test]
fn test_sensitivity_levels_follow_thresholds() {
    let engine = engine();
    let report = engine
        .counterfactual(
            &sample_observation(),
            &ObservationOverrides::new().with(RawField::ExitCountry, "US"),
            None,
            Some(10),
            &Deadline::none(),
        )
        .unwrap();
    let config = engine.counterfactual_engine().config();
    assert!(report
        .sensitivity
        .features
        .iter()
        .any(|f| f.field == RawField::ExitCountry && f.step_swing == 0.0));
    for feature in &report.sensitivity.features {
        let magnitude = feature
            .step_swing
            .max(feature.override_impact.map_or(0.0, f64::abs));
        let expected = if magnitude > config.high_threshold {
            SensitivityLevel::High
        } else if magnitude > config.medium_threshold {
            SensitivityLevel::Medium
        } else {
            SensitivityLevel::Low
        };
        assert_eq!(feature.level, expected, "{}", feature.field);
    }
}

#[test]
fn test_sensitivity_is_monotonic_in_step() {
    let engine = engine();
    let obs = sample_observation();
    let cf = engine.counterfactual_engine();
    for field in RawField::NUMERIC {
        let mut previous = 0.0;
        for step in [0.05, 0.08, 0.1, 0.2, 0.35, 0.5] {
            let swing = cf
                .step_swing(&obs, field, step, ModelSelection::Ensemble, &Deadline::none())
                .unwrap();
            assert!(swing >= previous, "{field}: swing {swing} at step {step} < {previous}");
            previous = swing;
        }
    }
}

#[test]
fn test_invalid_overrides_are_rejected_before_scoring() {
    let engine = engine();
    let obs = sample_observation();
    // an expired deadline proves no scoring ran: validation fails first
    let expired = Deadline::after(std::time::Duration::ZERO);

    let negative = ObservationOverrides::new().with(RawField::Bandwidth, -3.0);
    let err = engine
        .counterfactual(&obs, &negative, None, Some(10), &expired)
        .unwrap_err();
    assert!(matches!(err, TorsightError::InvalidOverride { .. }));
    assert_eq!(err.field(), Some("bandwidth"));

    let bad_ip = ObservationOverrides::new().with(RawField::ExitIp, "999.1.1.1");
    assert!(matches!(
        engine.counterfactual(&obs, &bad_ip, None, Some(10), &expired),
        Err(TorsightError::InvalidOverride { .. })
    ));

    let raw = BTreeMap::from([("guard_bandwidth".to_string(), json!(3.0))]);
    assert!(matches!(
        ObservationOverrides::from_map(&raw),
        Err(TorsightError::InvalidOverride { .. })
    ));

    assert!(matches!(
        engine.counterfactual(&obs, &ObservationOverrides::new(), None, Some(0), &expired),
        Err(TorsightError::InvalidTopK { .. })
    ));
}

#[test]
fn test_critical_threshold_is_consistent() {
    let engine = engine();
    let obs = sample_observation();
    let max_change = engine.counterfactual_engine().config().threshold_max_change;
    for field in RawField::NUMERIC {
        let thresholds = engine
            .critical_threshold(&obs, field, None, &Deadline::none())
            .unwrap();
        assert_eq!(thresholds.field, field);
        let original_top = thresholds.original_top_guard.unwrap();
        for found in [&thresholds.increase, &thresholds.decrease].into_iter().flatten() {
            assert!(found.relative_change > 0.0 && found.relative_change <= max_change);
            assert_ne!(found.new_top_guard, original_top);
            let probe = obs.with_numeric(field, found.value).unwrap();
            let ranked = engine.predict(&probe, None, Some(1), &Deadline::none()).unwrap();
            assert_eq!(ranked.entries[0].candidate.guard_index, found.new_top_guard);
        }
    }

    assert!(matches!(
        engine.critical_threshold(&obs, RawField::ExitCountry, None, &Deadline::none()),
        Err(TorsightError::InvalidOverride { .. })
    ));
}
