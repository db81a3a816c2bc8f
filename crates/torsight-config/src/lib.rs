//! Configuration loading for Torsight.
//! Reads torsight.toml from the current directory or the path in TORSIGHT_CONFIG.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use torsight_common::ScorerId;
use tracing::{info, warn};

pub const CONFIG_ENV_VAR: &str = "TORSIGHT_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "torsight.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub reference: ReferenceConfig,
    #[serde(default)]
    pub ensemble: EnsembleConfig,
    #[serde(default)]
    pub attribution: AttributionConfig,
    #[serde(default)]
    pub counterfactual: CounterfactualConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Artifact locations, one per model family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_xgboost_path")]
    pub xgboost: PathBuf,
    #[serde(default = "default_lightgbm_path")]
    pub lightgbm: PathBuf,
    #[serde(default = "default_catboost_path")]
    pub catboost: PathBuf,
    /// Scorers whose calls are serialized behind a per-instance lock.
    #[serde(default)]
    pub serialize_access: Vec<String>,
}

fn default_xgboost_path()  -> PathBuf { PathBuf::from("data/models/xgboost.json") }
fn default_lightgbm_path() -> PathBuf { PathBuf::from("data/models/lightgbm.json") }
fn default_catboost_path() -> PathBuf { PathBuf::from("data/models/catboost.json") }

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            xgboost: default_xgboost_path(),
            lightgbm: default_lightgbm_path(),
            catboost: default_catboost_path(),
            serialize_access: Vec::new(),
        }
    }
}

impl ModelsConfig {
    pub fn path_for(&self, id: ScorerId) -> &Path {
        match id {
            ScorerId::Xgboost => &self.xgboost,
            ScorerId::Lightgbm => &self.lightgbm,
            ScorerId::Catboost => &self.catboost,
        }
    }

    pub fn serialized(&self, id: ScorerId) -> bool {
        self.serialize_access
            .iter()
            .any(|s| s.trim().eq_ignore_ascii_case(id.as_str()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceConfig {
    #[serde(default = "default_countries_path")]
    pub countries: PathBuf,
    #[serde(default = "default_candidates_path")]
    pub candidates: PathBuf,
    #[serde(default = "default_cooccurrence_path")]
    pub cooccurrence: PathBuf,
}

fn default_countries_path()    -> PathBuf { PathBuf::from("data/reference/countries.csv") }
fn default_candidates_path()   -> PathBuf { PathBuf::from("data/reference/candidates.csv") }
fn default_cooccurrence_path() -> PathBuf { PathBuf::from("data/reference/cooccurrence.csv") }

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            countries: default_countries_path(),
            candidates: default_candidates_path(),
            cooccurrence: default_cooccurrence_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleConfig {
    /// Scorer id → weight. Renormalized over the scorers that loaded.
    #[serde(default = "default_weights")]
    pub weights: BTreeMap<String, f64>,
    #[serde(default = "default_confidence_scale")]
    pub confidence_scale: f64,
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
}

fn default_weights() -> BTreeMap<String, f64> {
    BTreeMap::from([
        ("xgboost".to_string(), 0.40),
        ("lightgbm".to_string(), 0.30),
        ("catboost".to_string(), 0.30),
    ])
}
fn default_confidence_scale() -> f64   { 100.0 }
fn default_top_k()            -> usize { 10 }
fn default_max_top_k()        -> usize { 50 }

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            weights: default_weights(),
            confidence_scale: default_confidence_scale(),
            default_top_k: default_top_k(),
            max_top_k: default_max_top_k(),
        }
    }
}

impl EnsembleConfig {
    /// Configured weight for a scorer; absent entries weigh nothing.
    pub fn weight_for(&self, id: ScorerId) -> f64 {
        self.weights
            .iter()
            .find(|(k, _)| k.trim().eq_ignore_ascii_case(id.as_str()))
            .map(|(_, w)| *w)
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionConfig {
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default = "default_rationale_lines")]
    pub rationale_lines: usize,
    /// Share of total impact above which a feature group is called out.
    #[serde(default = "default_group_threshold")]
    pub group_threshold_pct: f64,
    /// Share of total impact above which a single feature is called dominant.
    #[serde(default = "default_dominant_feature")]
    pub dominant_feature_pct: f64,
}

fn default_top_n()            -> usize { 10 }
fn default_rationale_lines()  -> usize { 5 }
fn default_group_threshold()  -> f64   { 20.0 }
fn default_dominant_feature() -> f64   { 25.0 }

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            rationale_lines: default_rationale_lines(),
            group_threshold_pct: default_group_threshold(),
            dominant_feature_pct: default_dominant_feature(),
        }
    }
}

/// How per-override swings combine into the overall impact figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactAggregate {
    #[default]
    Sum,
    Max,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterfactualConfig {
    /// Relative perturbation applied to each numeric field.
    #[serde(default = "default_step")]
    pub step: f64,
    /// Spacing of the probe ladder inside the step.
    #[serde(default = "default_resolution")]
    pub resolution: f64,
    /// Confidence swing (percentage points) above which sensitivity is high.
    #[serde(default = "default_high_threshold")]
    pub high_threshold: f64,
    #[serde(default = "default_medium_threshold")]
    pub medium_threshold: f64,
    #[serde(default)]
    pub aggregate: ImpactAggregate,
    #[serde(default = "default_comparison_limit")]
    pub comparison_limit: usize,
    #[serde(default = "default_threshold_iterations")]
    pub threshold_iterations: usize,
    /// Largest relative change explored by the critical threshold search.
    #[serde(default = "default_threshold_max_change")]
    pub threshold_max_change: f64,
}

fn default_step()                 -> f64   { 0.10 }
fn default_resolution()           -> f64   { 0.05 }
fn default_high_threshold()       -> f64   { 5.0 }
fn default_medium_threshold()     -> f64   { 2.0 }
fn default_comparison_limit()     -> usize { 10 }
fn default_threshold_iterations() -> usize { 20 }
fn default_threshold_max_change() -> f64   { 0.9 }

impl Default for CounterfactualConfig {
    fn default() -> Self {
        Self {
            step: default_step(),
            resolution: default_resolution(),
            high_threshold: default_high_threshold(),
            medium_threshold: default_medium_threshold(),
            aggregate: ImpactAggregate::default(),
            comparison_limit: default_comparison_limit(),
            threshold_iterations: default_threshold_iterations(),
            threshold_max_change: default_threshold_max_change(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_host()            -> String { "127.0.0.1".to_string() }
fn default_port()            -> u16    { 8000 }
fn default_request_timeout() -> u64    { 5000 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}


impl EngineConfig {
    /// Load configuration from torsight.toml.
    /// Checks TORSIGHT_CONFIG first, then the current directory. A missing
    /// file yields the built-in defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var(CONFIG_ENV_VAR)
            .unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());

        if !Path::new(&path).exists() {
            warn!("Config file not found: {}; using built-in defaults", path);
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }

        Self::from_path(&path)
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for key in self.ensemble.weights.keys().chain(self.models.serialize_access.iter()) {
            if key.parse::<ScorerId>().is_err() {
                bail!("unknown scorer id `{}` in configuration", key);
            }
        }
        for (key, weight) in &self.ensemble.weights {
            if !weight.is_finite() || *weight < 0.0 {
                bail!("ensemble weight for {} must be a finite value >= 0, got {}", key, weight);
            }
        }
        let total: f64 = self.ensemble.weights.values().sum();
        if total <= 0.0 {
            bail!("ensemble weights must have a positive sum, got {}", total);
        }
        if !(self.ensemble.confidence_scale.is_finite() && self.ensemble.confidence_scale > 0.0) {
            bail!("confidence_scale must be > 0, got {}", self.ensemble.confidence_scale);
        }
        if self.ensemble.max_top_k == 0 {
            bail!("max_top_k must be at least 1");
        }
        if self.ensemble.default_top_k == 0 || self.ensemble.default_top_k > self.ensemble.max_top_k {
            bail!(
                "default_top_k ({}) must be between 1 and max_top_k ({})",
                self.ensemble.default_top_k,
                self.ensemble.max_top_k
            );
        }
        if !(8..=15).contains(&self.attribution.top_n) {
            bail!("attribution.top_n must be between 8 and 15, got {}", self.attribution.top_n);
        }
        let cf = &self.counterfactual;
        if !(cf.step > 0.0 && cf.step < 1.0) {
            bail!("counterfactual.step must be in (0, 1), got {}", cf.step);
        }
        if !(cf.resolution > 0.0 && cf.resolution <= cf.step) {
            bail!(
                "counterfactual.resolution must be in (0, step], got {}",
                cf.resolution
            );
        }
        if !(cf.medium_threshold >= 0.0 && cf.high_threshold > cf.medium_threshold) {
            bail!(
                "sensitivity thresholds out of order: high {} must exceed medium {}",
                cf.high_threshold,
                cf.medium_threshold
            );
        }
        if !(cf.threshold_max_change > 0.0 && cf.threshold_max_change < 1.0) {
            bail!(
                "counterfactual.threshold_max_change must be in (0, 1), got {}",
                cf.threshold_max_change
            );
        }
        if self.server.request_timeout_ms == 0 {
            bail!("server.request_timeout_ms must be positive");
        }
        Ok(())
    }
}
