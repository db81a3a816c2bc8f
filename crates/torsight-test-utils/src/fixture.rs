//! On-disk fixture: reference CSVs plus one artifact per family in a
//! temporary directory, and an `EngineConfig` pointing at them.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tempfile::TempDir;
use torsight_common::ScorerId;
use torsight_config::EngineConfig;
use torsight_features::FeatureTransformer;

use crate::artifacts;
use crate::reference::{candidate_list, candidates, cooccurrence, countries, reference_data, sample_observation};

pub struct Fixture {
    dir: TempDir,
    pub config: EngineConfig,
}

impl Fixture {
    /// Fixture with [`DEFAULT_SEED`](crate::DEFAULT_SEED).
    pub fn new() -> anyhow::Result<Self> {
        Self::with_seed(crate::DEFAULT_SEED)
    }

    pub fn with_seed(seed: u64) -> anyhow::Result<Self> {
        let dir = tempfile::tempdir().context("creating fixture directory")?;
        let mut config = EngineConfig::default();

        config.reference.countries = write_csv(dir.path(), "countries.csv", countries())?;
        config.reference.candidates = write_csv(dir.path(), "candidates.csv", candidate_list())?;
        config.reference.cooccurrence = write_csv(dir.path(), "cooccurrence.csv", cooccurrence())?;

        let anchor = FeatureTransformer::new(reference_data())
            .transform(&sample_observation())
            .context("transforming the sample observation")?;
        let set = candidates();
        config.models.xgboost = write_json(dir.path(), "xgboost.json", &artifacts::xgboost(&set, &anchor, seed))?;
        config.models.lightgbm =
            write_json(dir.path(), "lightgbm.json", &artifacts::lightgbm(&set, &anchor, seed.wrapping_add(1)))?;
        config.models.catboost =
            write_json(dir.path(), "catboost.json", &artifacts::catboost(&set, &anchor, seed.wrapping_add(2)))?;

        Ok(Self { dir, config })
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Point a family at a file that does not exist.
    pub fn without(mut self, id: ScorerId) -> Self {
        let missing = self.dir.path().join(format!("{id}-missing.json"));
        match id {
            ScorerId::Xgboost => self.config.models.xgboost = missing,
            ScorerId::Lightgbm => self.config.models.lightgbm = missing,
            ScorerId::Catboost => self.config.models.catboost = missing,
        }
        self
    }

    /// Overwrite a family's artifact with malformed JSON.
    pub fn corrupt(&self, id: ScorerId) -> anyhow::Result<()> {
        let path = self.config.models.path_for(id);
        std::fs::write(path, b"{ \"classes\": [").with_context(|| format!("corrupting {}", path.display()))
    }
}

fn write_csv<T: serde::Serialize>(dir: &Path, name: &str, rows: Vec<T>) -> anyhow::Result<PathBuf> {
    let path = dir.join(name);
    let mut writer = csv::Writer::from_path(&path).with_context(|| format!("creating {}", path.display()))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(path)
}

fn write_json(dir: &Path, name: &str, value: &serde_json::Value) -> anyhow::Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_vec_pretty(value)?).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}
