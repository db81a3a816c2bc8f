//! Versioned feature vector.

use serde::{Deserialize, Serialize};
use torsight_common::{Result, TorsightError};

use crate::layout::{feature_index, layout_hash, FEATURE_COUNT, FEATURE_LAYOUT, FEATURE_VERSION};

/// The 75 feature values in layout order, tagged with the layout they follow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub version: u8,
    pub layout_hash: String,
    pub values: Vec<f64>,
}

impl FeatureVector {
    /// Wrap values produced for the current layout.
    pub fn from_values(values: Vec<f64>) -> Result<Self> {
        let vector = Self {
            version: FEATURE_VERSION,
            layout_hash: layout_hash().to_string(),
            values,
        };
        vector.validate()?;
        Ok(vector)
    }

    /// Check a vector (possibly built by a caller) against the current layout.
    pub fn validate(&self) -> Result<()> {
        if self.version != FEATURE_VERSION || self.layout_hash != layout_hash() {
            return Err(TorsightError::InvalidFeatureVector(format!(
                "layout mismatch: expected v{} ({}), got v{} ({})",
                FEATURE_VERSION,
                layout_hash(),
                self.version,
                self.layout_hash
            )));
        }
        if self.values.len() != FEATURE_COUNT {
            return Err(TorsightError::InvalidFeatureVector(format!(
                "expected {} values, got {}",
                FEATURE_COUNT,
                self.values.len()
            )));
        }
        if let Some((i, v)) = self.values.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            return Err(TorsightError::InvalidFeatureVector(format!(
                "value for `{}` is not finite: {}",
                FEATURE_LAYOUT[i], v
            )));
        }
        Ok(())
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied()
    }

    pub fn get_by_name(&self, name: &str) -> Option<f64> {
        feature_index(name).and_then(|i| self.get(i))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// (name, value) pairs in layout order.
    pub fn named(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        FEATURE_LAYOUT.iter().copied().zip(self.values.iter().copied())
    }
}
