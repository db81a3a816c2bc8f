//! Feature layout: the authoritative order of the 75 feature fields.
//!
//! Adding, removing, or reordering a field changes what every scoring
//! artifact means, so any such edit must bump [`FEATURE_VERSION`].

use std::ops::Range;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const FEATURE_VERSION: u8 = 1;

pub const FEATURE_LAYOUT: &[&str] = &[
    // === (a) network metrics (0-24) ===
    "exit_bandwidth",
    "guard_bandwidth_est",
    "middle_bandwidth_est",
    "exit_guard_bw_ratio",
    "exit_middle_bw_ratio",
    "guard_middle_bw_ratio",
    "total_path_bandwidth",
    "min_path_bandwidth",
    "max_path_bandwidth",
    "path_bandwidth_std",
    "circuit_setup_duration",
    "build_latency_ms",
    "total_mb",
    "cell_count",
    "throughput_mb_per_s",
    "bandwidth_setup_product",
    "path_bandwidth_mb_product",
    "sent_mb_est",
    "recv_mb_est",
    "ln_bandwidth",
    "ln1p_total_bytes",
    "bandwidth_squared",
    "setup_squared",
    "bandwidth_per_setup",
    "mb_per_bandwidth",
    // === (b) geographic (25-39) ===
    "country_encoding",
    "country_known",
    "country_relay_share",
    "country_latitude",
    "country_longitude",
    "same_country_candidate_share",
    "mean_candidate_distance_km",
    "min_candidate_distance_km",
    "max_candidate_distance_km",
    "std_candidate_distance_km",
    "near_candidate_share",
    "is_ipv6",
    "address_prefix_bucket",
    "subnet_hash_bucket",
    "top_cooccurring_same_country",
    // === (c) temporal and co-occurrence (40-53) ===
    "hour_of_day",
    "hour_sin",
    "hour_cos",
    "day_of_week",
    "is_weekend",
    "timestamp_present",
    "setup_bucket",
    "cooccurrence_total",
    "cooccurrence_max",
    "cooccurrence_distinct",
    "cooccurrence_top_share",
    "cooccurrence_entropy",
    "cooccurrence_known",
    "ln1p_cooccurrence_total",
    // === (d) statistical transforms (54-74) ===
    "log1p_bandwidth",
    "log1p_setup",
    "log1p_total_mb",
    "log1p_cooccurrence_max",
    "log1p_mean_distance",
    "log1p_throughput",
    "total_mb_squared",
    "relay_share_squared",
    "same_country_share_squared",
    "sqrt_cell_count",
    "bandwidth_x_relay_share",
    "bandwidth_x_same_country_share",
    "setup_x_mean_distance_kkm",
    "throughput_x_top_share",
    "cooccurrence_total_x_relay_share",
    "latency_per_mb",
    "bandwidth_zscore",
    "bandwidth_percentile",
    "bandwidth_to_mean_candidate_ratio",
    "candidate_distance_range_km",
    "near_share_x_cooccurrence_known",
];

pub const FEATURE_COUNT: usize = 75;

/// The four concatenated feature groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureGroup {
    Network,
    Geographic,
    Temporal,
    Statistical,
}

impl FeatureGroup {
    pub const ALL: [FeatureGroup; 4] = [
        FeatureGroup::Network,
        FeatureGroup::Geographic,
        FeatureGroup::Temporal,
        FeatureGroup::Statistical,
    ];

    pub fn range(&self) -> Range<usize> {
        match self {
            FeatureGroup::Network => 0..25,
            FeatureGroup::Geographic => 25..40,
            FeatureGroup::Temporal => 40..54,
            FeatureGroup::Statistical => 54..FEATURE_COUNT,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FeatureGroup::Network => "network",
            FeatureGroup::Geographic => "geographic",
            FeatureGroup::Temporal => "temporal",
            FeatureGroup::Statistical => "statistical",
        }
    }

    pub fn of(index: usize) -> Option<FeatureGroup> {
        Self::ALL.into_iter().find(|g| g.range().contains(&index))
    }
}

/// SHA-256 over the version byte and the NUL-separated names, first 8 bytes as hex.
pub fn compute_layout_hash() -> String {
    let mut hasher = Sha256::new();
    hasher.update([FEATURE_VERSION]);
    for name in FEATURE_LAYOUT {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
    }
    hasher.finalize()[..8]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

pub fn layout_hash() -> &'static str {
    static HASH: OnceLock<String> = OnceLock::new();
    HASH.get_or_init(compute_layout_hash)
}

pub fn feature_index(name: &str) -> Option<usize> {
    FEATURE_LAYOUT.iter().position(|&n| n == name)
}

pub fn feature_name(index: usize) -> Option<&'static str> {
    FEATURE_LAYOUT.get(index).copied()
}

/// Layout description published to callers that build vectors themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutInfo {
    pub version: u8,
    pub hash: String,
    pub feature_count: usize,
    pub feature_names: Vec<String>,
}

impl LayoutInfo {
    pub fn current() -> Self {
        Self {
            version: FEATURE_VERSION,
            hash: layout_hash().to_string(),
            feature_count: FEATURE_COUNT,
            feature_names: FEATURE_LAYOUT.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_feature_count() {
        assert_eq!(FEATURE_LAYOUT.len(), FEATURE_COUNT);
    }

    #[test]
    fn test_names_are_unique() {
        let unique: HashSet<_> = FEATURE_LAYOUT.iter().collect();
        assert_eq!(unique.len(), FEATURE_COUNT);
    }

    #[test]
    fn test_groups_partition_layout() {
        let mut covered = 0;
        for group in FeatureGroup::ALL {
            let range = group.range();
            assert_eq!(range.start, covered);
            covered = range.end;
        }
        assert_eq!(covered, FEATURE_COUNT);
        assert_eq!(FeatureGroup::of(0), Some(FeatureGroup::Network));
        assert_eq!(FeatureGroup::of(39), Some(FeatureGroup::Geographic));
        assert_eq!(FeatureGroup::of(40), Some(FeatureGroup::Temporal));
        assert_eq!(FeatureGroup::of(74), Some(FeatureGroup::Statistical));
        assert_eq!(FeatureGroup::of(75), None);
    }

    #[test]
    fn test_group_boundaries_match_names() {
        assert_eq!(feature_name(FeatureGroup::Geographic.range().start), Some("country_encoding"));
        assert_eq!(feature_name(FeatureGroup::Temporal.range().start), Some("hour_of_day"));
        assert_eq!(feature_name(FeatureGroup::Statistical.range().start), Some("log1p_bandwidth"));
    }

    #[test]
    fn test_layout_hash_is_stable_hex() {
        let hash = layout_hash();
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, compute_layout_hash());
    }

    #[test]
    fn test_feature_index_lookup() {
        assert_eq!(feature_index("exit_bandwidth"), Some(0));
        assert_eq!(feature_index("near_share_x_cooccurrence_known"), Some(74));
        assert_eq!(feature_index("nonexistent"), None);
    }
}
