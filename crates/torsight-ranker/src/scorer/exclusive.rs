//! Per-instance serialization for scorers that must not be called concurrently.

use std::sync::Mutex;

use torsight_common::{Deadline, Result, ScorerId, TorsightError};
use torsight_features::FeatureVector;

use super::{FeatureImportance, ScoreVector, ScorerAdapter, ScorerAttribution};

/// Wraps a scorer so that at most one call runs at a time on this instance.
/// Other scorers keep running in parallel; only callers of this one queue.
#[derive(Debug)]
pub struct Exclusive<S> {
    id: ScorerId,
    importance: Vec<FeatureImportance>,
    tree_count: usize,
    inner: Mutex<S>,
}

impl<S: ScorerAdapter> Exclusive<S> {
    pub fn new(inner: S) -> Self {
        Self {
            id: inner.id(),
            importance: inner.global_importance().to_vec(),
            tree_count: inner.tree_count(),
            inner: Mutex::new(inner),
        }
    }

    fn with_lock<T>(&self, f: impl FnOnce(&S) -> Result<T>) -> Result<T> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| TorsightError::internal(self.id.as_str(), "scorer lock poisoned"))?;
        f(&guard)
    }
}

impl<S: ScorerAdapter> ScorerAdapter for Exclusive<S> {
    fn id(&self) -> ScorerId {
        self.id
    }

    fn score(&self, features: &FeatureVector, deadline: &Deadline) -> Result<ScoreVector> {
        deadline.check("score")?;
        self.with_lock(|scorer| scorer.score(features, deadline))
    }

    fn attributions(&self, features: &FeatureVector, guard_index: u32) -> Result<ScorerAttribution> {
        self.with_lock(|scorer| scorer.attributions(features, guard_index))
    }

    fn global_importance(&self) -> &[FeatureImportance] {
        &self.importance
    }

    fn tree_count(&self) -> usize {
        self.tree_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use torsight_features::FEATURE_COUNT;

    /// Records the highest number of overlapping calls it has seen.
    #[derive(Debug, Default)]
    struct Probe {
        active: AtomicUsize,
        peak: Arc<AtomicUsize>,
    }

    impl ScorerAdapter for Probe {
        fn id(&self) -> ScorerId {
            ScorerId::Catboost
        }

        fn score(&self, _features: &FeatureVector, _deadline: &Deadline) -> Result<ScoreVector> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(5));
            self.active.fetch_sub(1, Ordering::SeqCst);
            ScoreVector::new(ScorerId::Catboost, BTreeMap::from([(0, 0.5)]))
        }

        fn attributions(&self, _features: &FeatureVector, guard_index: u32) -> Result<ScorerAttribution> {
            Err(TorsightError::UnknownCandidate(guard_index))
        }

        fn global_importance(&self) -> &[FeatureImportance] {
            &[]
        }

        fn tree_count(&self) -> usize {
            0
        }
    }

    #[test]
    fn test_calls_are_serialized() {
        let peak = Arc::new(AtomicUsize::new(0));
        let scorer = Arc::new(Exclusive::new(Probe { active: AtomicUsize::new(0), peak: peak.clone() }));
        let features = FeatureVector::from_values(vec![0.0; FEATURE_COUNT]).unwrap();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let scorer = scorer.clone();
                let features = features.clone();
                std::thread::spawn(move || scorer.score(&features, &Deadline::none()).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(scorer.id(), ScorerId::Catboost);
    }
}
