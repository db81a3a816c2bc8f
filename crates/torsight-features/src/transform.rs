//! Observation → feature vector.

use std::f64::consts::PI;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{Datelike, Timelike};
use torsight_common::{Observation, RawField, Result, TorsightError};
use tracing::debug;

use crate::layout::{FEATURE_COUNT, FEATURE_LAYOUT};
use crate::reference::{CooccurrenceStats, ReferenceData, NEAR_DISTANCE_KM};
use crate::vector::FeatureVector;

const GUARD_BANDWIDTH_FACTOR: f64 = 1.2;
const MIDDLE_BANDWIDTH_FACTOR: f64 = 1.1;
const RATIO_EPSILON: f64 = 0.001;
const CELL_SIZE_BYTES: u64 = 512;
const BYTES_PER_MB: f64 = 1_048_576.0;
const SENT_SHARE: f64 = 0.48;
const SUBNET_BUCKETS: u64 = 1024;
/// Setup-duration bucket upper bounds in seconds; the last bucket is open.
const SETUP_BUCKET_BOUNDS: [f64; 4] = [0.5, 1.0, 2.0, 5.0];

/// Stateless transformer over a shared reference snapshot.
#[derive(Debug, Clone)]
pub struct FeatureTransformer {
    reference: Arc<ReferenceData>,
}

impl FeatureTransformer {
    pub fn new(reference: Arc<ReferenceData>) -> Self {
        Self { reference }
    }

    pub fn reference(&self) -> &ReferenceData {
        &self.reference
    }

    /// Build the 75-field vector for one observation.
    ///
    /// An exit country missing from the reference table encodes as 0 and
    /// takes the unknown-distance sentinel; it never fails.
    pub fn transform(&self, obs: &Observation) -> Result<FeatureVector> {
        let values = self.values(obs);
        if let Some(i) = first_non_finite(&values) {
            return Err(self.overflow_error(obs, i));
        }
        debug!(country = obs.country(), "Transformed observation");
        FeatureVector::from_values(values)
    }

    fn values(&self, obs: &Observation) -> Vec<f64> {
        let mut values = Vec::with_capacity(FEATURE_COUNT);
        let network = push_network(&mut values, obs);
        let geo = self.push_geographic(&mut values, obs);
        let cooc = self.push_temporal(&mut values, obs);
        self.push_statistical(&mut values, obs, &network, &geo, &cooc);
        values
    }

    /// Blame the raw field whose neutral value makes every derived feature
    /// finite again. Falls back to the derived feature when no single raw
    /// field is responsible.
    fn overflow_error(&self, obs: &Observation, index: usize) -> TorsightError {
        let derived = FEATURE_LAYOUT[index];
        let culprit = RawField::NUMERIC.into_iter().find(|&field| {
            obs.with_numeric(field, 1.0)
                .is_ok_and(|neutral| first_non_finite(&self.values(&neutral)).is_none())
        });
        match culprit {
            Some(field) => TorsightError::invalid_observation(
                field.name(),
                format!("value is too extreme: derived feature `{derived}` is not finite"),
            ),
            None => TorsightError::invalid_observation(
                derived,
                "derived feature is not finite for this observation",
            ),
        }
    }

    fn push_geographic(&self, values: &mut Vec<f64>, obs: &Observation) -> Geographic {
        let reference = &self.reference;
        let code = obs.country();
        let encoding = reference.country_encoding(code);
        let record = reference.country(code);
        let relay_share = record.map_or(0.0, |r| r.relay_share);
        let same_share = reference.same_country_share(code);

        let distances = reference.candidate_distances(code);
        let n = distances.len() as f64;
        let mean = distances.iter().sum::<f64>() / n;
        let min = distances.iter().copied().fold(f64::INFINITY, f64::min);
        let max = distances.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let std = (distances.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n).sqrt();
        let near_share = distances.iter().filter(|&&d| d < NEAR_DISTANCE_KM).count() as f64 / n;

        let (is_v6, prefix, subnet) = address_buckets(obs.exit_ip());
        let top_same = reference
            .top_cooccurring_candidate(code)
            .is_some_and(|c| c.country == code);

        values.extend_from_slice(&[
            encoding as f64,
            flag(encoding > 0),
            relay_share,
            record.map_or(0.0, |r| r.latitude),
            record.map_or(0.0, |r| r.longitude),
            same_share,
            mean,
            min,
            max,
            std,
            near_share,
            is_v6,
            prefix,
            subnet,
            flag(top_same),
        ]);

        Geographic {
            relay_share,
            same_share,
            mean_distance: mean,
            distance_range: max - min,
            near_share,
        }
    }

    fn push_temporal(&self, values: &mut Vec<f64>, obs: &Observation) -> CooccurrenceStats {
        match obs.timestamp() {
            Some(ts) => {
                let hour = ts.hour() as f64;
                let weekday = ts.weekday().num_days_from_monday();
                let angle = 2.0 * PI * hour / 24.0;
                values.extend_from_slice(&[
                    hour,
                    angle.sin(),
                    angle.cos(),
                    weekday as f64,
                    flag(weekday >= 5),
                    1.0,
                ]);
            }
            None => values.extend_from_slice(&[-1.0, 0.0, 0.0, -1.0, 0.0, 0.0]),
        }

        values.push(setup_bucket(obs.setup_duration()));

        let stats = self
            .reference
            .cooccurrence(obs.country())
            .cloned()
            .unwrap_or_default();
        values.extend_from_slice(&[
            stats.total as f64,
            stats.max as f64,
            stats.distinct as f64,
            stats.top_share(),
            stats.entropy,
            flag(stats.total > 0),
            (stats.total as f64).ln_1p(),
        ]);
        stats
    }

    fn push_statistical(
        &self,
        values: &mut Vec<f64>,
        obs: &Observation,
        net: &Network,
        geo: &Geographic,
        cooc: &CooccurrenceStats,
    ) {
        let bandwidth = obs.bandwidth();
        let setup = obs.setup_duration();
        let reference = &self.reference;
        values.extend_from_slice(&[
            bandwidth.ln_1p(),
            setup.ln_1p(),
            net.total_mb.ln_1p(),
            (cooc.max as f64).ln_1p(),
            geo.mean_distance.ln_1p(),
            net.throughput.ln_1p(),
            net.total_mb.powi(2),
            geo.relay_share.powi(2),
            geo.same_share.powi(2),
            net.cells.sqrt(),
            bandwidth * geo.relay_share,
            bandwidth * geo.same_share,
            setup * geo.mean_distance / 1000.0,
            net.throughput * cooc.top_share(),
            cooc.total as f64 * geo.relay_share,
            net.latency_ms / (net.total_mb + RATIO_EPSILON),
            reference.bandwidth_zscore(bandwidth),
            reference.bandwidth_percentile(bandwidth),
            bandwidth / reference.mean_candidate_bandwidth(),
            geo.distance_range,
            geo.near_share * flag(cooc.total > 0),
        ]);
    }
}

fn first_non_finite(values: &[f64]) -> Option<usize> {
    values.iter().position(|v| !v.is_finite())
}

struct Network {
    total_mb: f64,
    cells: f64,
    throughput: f64,
    latency_ms: f64,
}

struct Geographic {
    relay_share: f64,
    same_share: f64,
    mean_distance: f64,
    distance_range: f64,
    near_share: f64,
}

fn push_network(values: &mut Vec<f64>, obs: &Observation) -> Network {
    let exit = obs.bandwidth();
    let guard = exit * GUARD_BANDWIDTH_FACTOR;
    let middle = exit * MIDDLE_BANDWIDTH_FACTOR;
    let path = [exit, guard, middle];
    let total: f64 = path.iter().sum();
    let mean = total / 3.0;
    let std = (path.iter().map(|b| (b - mean).powi(2)).sum::<f64>() / 3.0).sqrt();

    let setup = obs.setup_duration();
    let bytes = obs.total_bytes();
    let total_mb = bytes as f64 / BYTES_PER_MB;
    let cells = (bytes / CELL_SIZE_BYTES) as f64;
    let throughput = total_mb / setup;
    let latency_ms = setup * 1000.0;

    values.extend_from_slice(&[
        exit,
        guard,
        middle,
        exit / (guard + RATIO_EPSILON),
        exit / (middle + RATIO_EPSILON),
        guard / (middle + RATIO_EPSILON),
        total,
        path.iter().copied().fold(f64::INFINITY, f64::min),
        path.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        std,
        setup,
        latency_ms,
        total_mb,
        cells,
        throughput,
        exit * setup,
        total * total_mb,
        total_mb * SENT_SHARE,
        total_mb * (1.0 - SENT_SHARE),
        exit.ln(),
        (bytes as f64).ln_1p(),
        exit.powi(2),
        setup.powi(2),
        exit / setup,
        total_mb / exit,
    ]);

    Network {
        total_mb,
        cells,
        throughput,
        latency_ms,
    }
}

fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn setup_bucket(setup: f64) -> f64 {
    SETUP_BUCKET_BOUNDS
        .iter()
        .position(|&bound| setup < bound)
        .unwrap_or(SETUP_BUCKET_BOUNDS.len()) as f64
}

/// (is_ipv6, leading-octet bucket, subnet hash bucket). The subnet is the
/// /16 for IPv4 and the /32 for IPv6.
fn address_buckets(ip: IpAddr) -> (f64, f64, f64) {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            (0.0, octets[0] as f64, (fnv1a(&octets[..2]) % SUBNET_BUCKETS) as f64)
        }
        IpAddr::V6(v6) => {
            let octets = v6.octets();
            (1.0, octets[0] as f64, (fnv1a(&octets[..4]) % SUBNET_BUCKETS) as f64)
        }
    }
}

// FNV-1a 64; stable across platforms and releases, unlike `DefaultHasher`.
fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, &b| {
        (hash ^ b as u64).wrapping_mul(0x0000_0100_0000_01b3)
    })
}
