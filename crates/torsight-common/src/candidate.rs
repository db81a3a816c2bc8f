//! Guard candidates: the static prediction targets.

use std::collections::HashMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TorsightError};

/// A guard relay that can be ranked. `guard_index` is its identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardCandidate {
    pub guard_index: u32,
    pub fingerprint: String,
    pub ip: IpAddr,
    pub country: String,
    /// Advertised bandwidth in MB/s.
    pub bandwidth: f64,
}

/// The immutable candidate table, ordered by `guard_index`.
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    candidates: Vec<GuardCandidate>,
    positions: HashMap<u32, usize>,
}

impl CandidateSet {
    pub fn new(mut candidates: Vec<GuardCandidate>) -> Result<Self> {
        candidates.sort_by_key(|c| c.guard_index);
        let mut positions = HashMap::with_capacity(candidates.len());
        for (pos, candidate) in candidates.iter().enumerate() {
            if !(candidate.bandwidth.is_finite() && candidate.bandwidth > 0.0) {
                return Err(TorsightError::ReferenceData(format!(
                    "candidate {} has non-positive bandwidth {}",
                    candidate.guard_index, candidate.bandwidth
                )));
            }
            if positions.insert(candidate.guard_index, pos).is_some() {
                return Err(TorsightError::ReferenceData(format!(
                    "duplicate guard_index {}",
                    candidate.guard_index
                )));
            }
        }
        Ok(Self { candidates, positions })
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn get(&self, guard_index: u32) -> Option<&GuardCandidate> {
        self.positions.get(&guard_index).map(|&pos| &self.candidates[pos])
    }

    /// Look up a candidate, failing with `UnknownCandidate`.
    pub fn require(&self, guard_index: u32) -> Result<&GuardCandidate> {
        self.get(guard_index)
            .ok_or(TorsightError::UnknownCandidate(guard_index))
    }

    /// Dense position of a candidate (0..len), in `guard_index` order.
    pub fn position(&self, guard_index: u32) -> Option<usize> {
        self.positions.get(&guard_index).copied()
    }

    pub fn contains(&self, guard_index: u32) -> bool {
        self.positions.contains_key(&guard_index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &GuardCandidate> {
        self.candidates.iter()
    }

    pub fn as_slice(&self) -> &[GuardCandidate] {
        &self.candidates
    }

    pub fn indexes(&self) -> impl Iterator<Item = u32> + '_ {
        self.candidates.iter().map(|c| c.guard_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(index: u32, bandwidth: f64) -> GuardCandidate {
        GuardCandidate {
            guard_index: index,
            fingerprint: format!("GUARD{index:04}"),
            ip: "10.0.0.1".parse().unwrap(),
            country: "DE".into(),
            bandwidth,
        }
    }

    #[test]
    fn test_sorted_by_index() {
        let set = CandidateSet::new(vec![candidate(7, 1.0), candidate(2, 1.0)]).unwrap();
        let order: Vec<u32> = set.indexes().collect();
        assert_eq!(order, vec![2, 7]);
        assert_eq!(set.position(7), Some(1));
    }

    #[test]
    fn test_duplicate_index_rejected() {
        assert!(CandidateSet::new(vec![candidate(1, 1.0), candidate(1, 2.0)]).is_err());
    }

    #[test]
    fn test_require_unknown() {
        let set = CandidateSet::new(vec![candidate(1, 1.0)]).unwrap();
        assert!(matches!(set.require(99), Err(TorsightError::UnknownCandidate(99))));
    }

    #[test]
    fn test_non_positive_bandwidth_rejected() {
        assert!(CandidateSet::new(vec![candidate(1, 0.0)]).is_err());
    }
}
