//! Static reference tables consumed by the transformer.
//!
//! Loaded once at startup from three CSV files and never mutated. Derived
//! lookups (pairwise country distances, per-exit-country co-occurrence
//! statistics, the candidate bandwidth profile) are precomputed at load so
//! the per-request transform only does table reads.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Read;
use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use torsight_common::observation::parse_country;
use torsight_common::{CandidateSet, GuardCandidate, Result, TorsightError};
use tracing::{debug, info};

/// Distance used when either end has no known coordinates: half the
/// Earth's circumference.
pub const UNKNOWN_DISTANCE_KM: f64 = 20037.5;
pub const EARTH_RADIUS_KM: f64 = 6371.0088;
/// Candidates closer than this count as "near" the exit country.
pub const NEAR_DISTANCE_KM: f64 = 1000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryRecord {
    pub code: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Share of the relay population hosted in this country, in [0, 1].
    pub relay_share: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct CandidateRow {
    guard_index: u32,
    fingerprint: String,
    ip: String,
    country: String,
    bandwidth: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CooccurrenceRecord {
    pub exit_country: String,
    pub guard_index: u32,
    pub count: u64,
}

/// Historical co-occurrence summary for one exit country.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CooccurrenceStats {
    pub total: u64,
    pub max: u64,
    pub distinct: usize,
    /// Guard with the highest count; ties go to the lower index.
    pub top_guard: Option<u32>,
    /// Shannon entropy (nats) of the per-guard distribution.
    pub entropy: f64,
}

impl CooccurrenceStats {
    fn from_counts(counts: &BTreeMap<u32, u64>) -> Self {
        let total: u64 = counts.values().sum();
        let mut top: Option<(u32, u64)> = None;
        for (&guard, &count) in counts {
            if count > 0 && top.map_or(true, |(_, best)| count > best) {
                top = Some((guard, count));
            }
        }
        let entropy = if total == 0 {
            0.0
        } else {
            counts
                .values()
                .filter(|&&c| c > 0)
                .map(|&c| {
                    let p = c as f64 / total as f64;
                    -p * p.ln()
                })
                .sum()
        };
        Self {
            total,
            max: top.map_or(0, |(_, c)| c),
            distinct: counts.values().filter(|&&c| c > 0).count(),
            top_guard: top.map(|(g, _)| g),
            entropy,
        }
    }

    pub fn top_share(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.max as f64 / self.total as f64
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReferenceData {
    countries: Vec<CountryRecord>,
    country_index: HashMap<String, usize>,
    /// Row-major `countries.len()²` great-circle distances.
    distances: Vec<f64>,
    candidates: CandidateSet,
    /// Country-table position of each candidate, aligned with `candidates`.
    candidate_country: Vec<Option<usize>>,
    cooccurrence: HashMap<String, CooccurrenceStats>,
    bandwidth_mean: f64,
    bandwidth_std: f64,
    sorted_bandwidths: Vec<f64>,
}

impl ReferenceData {
    pub fn new(
        countries: Vec<CountryRecord>,
        candidates: CandidateSet,
        cooccurrence: Vec<CooccurrenceRecord>,
    ) -> Result<Self> {
        if candidates.is_empty() {
            return Err(TorsightError::ReferenceData("candidate table is empty".into()));
        }

        let mut countries_checked = Vec::with_capacity(countries.len());
        let mut country_index = HashMap::with_capacity(countries.len());
        for mut record in countries {
            record.code = reference_code(&record.code)?;
            let in_range = record.latitude.abs() <= 90.0
                && record.longitude.abs() <= 180.0
                && (0.0..=1.0).contains(&record.relay_share);
            if !in_range {
                return Err(TorsightError::ReferenceData(format!(
                    "country {} has out-of-range coordinates or relay share",
                    record.code
                )));
            }
            if country_index.insert(record.code.clone(), countries_checked.len()).is_some() {
                return Err(TorsightError::ReferenceData(format!(
                    "duplicate country code {}",
                    record.code
                )));
            }
            countries_checked.push(record);
        }

        let n = countries_checked.len();
        let mut distances = vec![0.0; n * n];
        for i in 0..n {
            for j in (i + 1)..n {
                let d = haversine_km(&countries_checked[i], &countries_checked[j]);
                distances[i * n + j] = d;
                distances[j * n + i] = d;
            }
        }

        let candidate_country = candidates
            .iter()
            .map(|c| country_index.get(&c.country).copied())
            .collect();

        let mut grouped: HashMap<String, BTreeMap<u32, u64>> = HashMap::new();
        for row in cooccurrence {
            let exit_country = reference_code(&row.exit_country)?;
            if !candidates.contains(row.guard_index) {
                return Err(TorsightError::ReferenceData(format!(
                    "co-occurrence row references unknown guard_index {}",
                    row.guard_index
                )));
            }
            *grouped
                .entry(exit_country)
                .or_default()
                .entry(row.guard_index)
                .or_default() += row.count;
        }
        let cooccurrence = grouped
            .iter()
            .map(|(code, counts)| (code.clone(), CooccurrenceStats::from_counts(counts)))
            .collect();

        let mut sorted_bandwidths: Vec<f64> = candidates.iter().map(|c| c.bandwidth).collect();
        sorted_bandwidths.sort_by(|a, b| a.total_cmp(b));
        let count = sorted_bandwidths.len() as f64;
        let bandwidth_mean = sorted_bandwidths.iter().sum::<f64>() / count;
        let bandwidth_std = (sorted_bandwidths
            .iter()
            .map(|b| (b - bandwidth_mean).powi(2))
            .sum::<f64>()
            / count)
            .sqrt();

        debug!(
            countries = n,
            candidates = candidates.len(),
            cooccurrence_countries = grouped.len(),
            "Reference data assembled"
        );

        Ok(Self {
            countries: countries_checked,
            country_index,
            distances,
            candidates,
            candidate_country,
            cooccurrence,
            bandwidth_mean,
            bandwidth_std,
            sorted_bandwidths,
        })
    }

    pub fn from_readers<C, G, O>(countries: C, candidates: G, cooccurrence: O) -> Result<Self>
    where
        C: Read,
        G: Read,
        O: Read,
    {
        let countries = csv::Reader::from_reader(countries)
            .deserialize::<CountryRecord>()
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut rows = Vec::new();
        for row in csv::Reader::from_reader(candidates).deserialize::<CandidateRow>() {
            rows.push(candidate_from_row(row?)?);
        }
        let candidates = CandidateSet::new(rows)?;

        let cooccurrence = csv::Reader::from_reader(cooccurrence)
            .deserialize::<CooccurrenceRecord>()
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Self::new(countries, candidates, cooccurrence)
    }

    pub fn load(
        countries: impl AsRef<Path>,
        candidates: impl AsRef<Path>,
        cooccurrence: impl AsRef<Path>,
    ) -> Result<Self> {
        let data = Self::from_readers(
            open(countries.as_ref())?,
            open(candidates.as_ref())?,
            open(cooccurrence.as_ref())?,
        )?;
        info!(
            "Loaded reference data: {} countries, {} candidates, {} co-occurrence exit countries",
            data.countries.len(),
            data.candidates.len(),
            data.cooccurrence.len()
        );
        Ok(data)
    }

    pub fn candidates(&self) -> &CandidateSet {
        &self.candidates
    }

    pub fn country_count(&self) -> usize {
        self.countries.len()
    }

    /// 1-based position in the country table, or 0 for an unknown code.
    pub fn country_encoding(&self, code: &str) -> usize {
        self.country_index.get(code).map_or(0, |&i| i + 1)
    }

    pub fn country(&self, code: &str) -> Option<&CountryRecord> {
        self.country_index.get(code).map(|&i| &self.countries[i])
    }

    pub fn distance_km(&self, from: &str, to: &str) -> f64 {
        match (self.country_index.get(from), self.country_index.get(to)) {
            (Some(&i), Some(&j)) => self.distances[i * self.countries.len() + j],
            _ => UNKNOWN_DISTANCE_KM,
        }
    }

    /// Distance from a country to every candidate, in candidate order.
    pub fn candidate_distances(&self, from: &str) -> Vec<f64> {
        let n = self.countries.len();
        let origin = self.country_index.get(from).copied();
        self.candidate_country
            .iter()
            .map(|target| match (origin, target) {
                (Some(i), Some(j)) => self.distances[i * n + j],
                _ => UNKNOWN_DISTANCE_KM,
            })
            .collect()
    }

    /// Fraction of candidates hosted in `code`.
    pub fn same_country_share(&self, code: &str) -> f64 {
        let same = self.candidates.iter().filter(|c| c.country == code).count();
        same as f64 / self.candidates.len() as f64
    }

    pub fn cooccurrence(&self, exit_country: &str) -> Option<&CooccurrenceStats> {
        self.cooccurrence.get(exit_country)
    }

    pub fn top_cooccurring_candidate(&self, exit_country: &str) -> Option<&GuardCandidate> {
        self.cooccurrence(exit_country)
            .and_then(|s| s.top_guard)
            .and_then(|g| self.candidates.get(g))
    }

    pub fn mean_candidate_bandwidth(&self) -> f64 {
        self.bandwidth_mean
    }

    /// Z-score against the candidate bandwidth profile; 0 when the profile is flat.
    pub fn bandwidth_zscore(&self, bandwidth: f64) -> f64 {
        if self.bandwidth_std > 0.0 {
            (bandwidth - self.bandwidth_mean) / self.bandwidth_std
        } else {
            0.0
        }
    }

    /// Fraction of candidates with bandwidth ≤ `bandwidth`.
    pub fn bandwidth_percentile(&self, bandwidth: f64) -> f64 {
        let at_or_below = self.sorted_bandwidths.partition_point(|&b| b <= bandwidth);
        at_or_below as f64 / self.sorted_bandwidths.len() as f64
    }
}

fn reference_code(raw: &str) -> Result<String> {
    parse_country(raw).map_err(|_| {
        TorsightError::ReferenceData(format!("`{raw}` is not an ISO 3166 alpha-2 code"))
    })
}

fn candidate_from_row(row: CandidateRow) -> Result<GuardCandidate> {
    let ip: IpAddr = row.ip.trim().parse().map_err(|_| {
        TorsightError::ReferenceData(format!(
            "candidate {} has invalid ip `{}`",
            row.guard_index, row.ip
        ))
    })?;
    Ok(GuardCandidate {
        guard_index: row.guard_index,
        fingerprint: row.fingerprint,
        ip,
        country: reference_code(&row.country)?,
        bandwidth: row.bandwidth,
    })
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| {
        TorsightError::ReferenceData(format!("cannot open {}: {}", path.display(), e))
    })
}

fn haversine_km(a: &CountryRecord, b: &CountryRecord) -> f64 {
    let (lat1, lat2) = (a.latitude.to_radians(), b.latitude.to_radians());
    let dlat = lat2 - lat1;
    let dlon = (b.longitude - a.longitude).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}
