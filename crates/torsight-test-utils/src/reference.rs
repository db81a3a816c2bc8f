//! Fixed reference tables and the canonical sample observation.

use std::sync::Arc;

use torsight_common::{CandidateSet, GuardCandidate, Observation};
use torsight_features::reference::CooccurrenceRecord;
use torsight_features::{CountryRecord, ReferenceData};

pub const CANDIDATE_COUNT: u32 = 24;

/// `(code, latitude, longitude, relay_share)`
const COUNTRIES: &[(&str, f64, f64, f64)] = &[
    ("DE", 51.17, 10.45, 0.21),
    ("US", 37.09, -95.71, 0.18),
    ("FR", 46.23, 2.21, 0.09),
    ("NL", 52.13, 5.29, 0.08),
    ("GB", 55.38, -3.44, 0.05),
    ("SE", 60.13, 18.64, 0.04),
    ("CH", 46.82, 8.23, 0.04),
    ("CA", 56.13, -106.35, 0.03),
    ("FI", 61.92, 25.75, 0.03),
    ("RO", 45.94, 24.97, 0.02),
    ("JP", 36.20, 138.25, 0.02),
    ("SG", 1.35, 103.82, 0.01),
];

/// Candidate countries, cycled over the guard indexes.
const CANDIDATE_COUNTRIES: [&str; 8] = ["DE", "FR", "NL", "US", "SE", "CH", "GB", "FI"];

/// Exit 45.33.32.156 in DE, 7.5 MB/s, 2.0 s setup, 500000 bytes, no timestamp.
pub fn sample_observation() -> Observation {
    match Observation::new("45.33.32.156", "DE", 7.5, 2.0, 500_000, None) {
        Ok(observation) => observation,
        Err(e) => panic!("sample observation must be valid: {e}"),
    }
}

pub fn countries() -> Vec<CountryRecord> {
    COUNTRIES
        .iter()
        .map(|&(code, latitude, longitude, relay_share)| CountryRecord {
            code: code.to_string(),
            latitude,
            longitude,
            relay_share,
        })
        .collect()
}

pub fn candidate_list() -> Vec<GuardCandidate> {
    (0..CANDIDATE_COUNT)
        .map(|i| GuardCandidate {
            guard_index: i,
            fingerprint: format!("{:040X}", (u128::from(i) + 1) * 0x9E37_79B9_7F4A_7C15),
            ip: format!("198.51.{}.{}", 100 + i / 8, 10 + i).parse().unwrap_or([198, 51, 100, 1].into()),
            country: CANDIDATE_COUNTRIES[i as usize % CANDIDATE_COUNTRIES.len()].to_string(),
            bandwidth: 2.0 + f64::from(i % 7) * 3.5 + f64::from(i) * 0.25,
        })
        .collect()
}

pub fn candidates() -> CandidateSet {
    match CandidateSet::new(candidate_list()) {
        Ok(set) => set,
        Err(e) => panic!("fixture candidates must be valid: {e}"),
    }
}

/// Historical counts for a handful of exit countries; DE is the busiest.
pub fn cooccurrence() -> Vec<CooccurrenceRecord> {
    let rows: &[(&str, u32, u64)] = &[
        ("DE", 0, 120),
        ("DE", 3, 45),
        ("DE", 8, 80),
        ("DE", 11, 12),
        ("DE", 17, 33),
        ("FR", 1, 60),
        ("FR", 9, 25),
        ("NL", 2, 40),
        ("NL", 10, 41),
        ("US", 3, 90),
        ("US", 19, 15),
        ("SE", 4, 7),
    ];
    rows.iter()
        .map(|&(exit_country, guard_index, count)| CooccurrenceRecord {
            exit_country: exit_country.to_string(),
            guard_index,
            count,
        })
        .collect()
}

pub fn reference_data() -> Arc<ReferenceData> {
    match ReferenceData::new(countries(), candidates(), cooccurrence()) {
        Ok(data) => Arc::new(data),
        Err(e) => panic!("fixture reference data must be valid: {e}"),
    }
}
