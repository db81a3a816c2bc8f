//! Scorer identifiers and model selection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TorsightError};

/// One gradient-boosted-tree model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScorerId {
    Xgboost,
    Lightgbm,
    Catboost,
}

impl ScorerId {
    pub const ALL: [ScorerId; 3] = [ScorerId::Xgboost, ScorerId::Lightgbm, ScorerId::Catboost];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScorerId::Xgboost => "xgboost",
            ScorerId::Lightgbm => "lightgbm",
            ScorerId::Catboost => "catboost",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ScorerId::Xgboost => "XGBoost",
            ScorerId::Lightgbm => "LightGBM",
            ScorerId::Catboost => "CatBoost",
        }
    }
}

impl fmt::Display for ScorerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScorerId {
    type Err = TorsightError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "xgboost" => Ok(ScorerId::Xgboost),
            "lightgbm" => Ok(ScorerId::Lightgbm),
            "catboost" => Ok(ScorerId::Catboost),
            _ => Err(TorsightError::UnknownScorer(s.to_string())),
        }
    }
}

/// What a request asks to be scored with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelSelection {
    Ensemble,
    Single(ScorerId),
}

impl ModelSelection {
    pub const ENSEMBLE_ID: &'static str = "ensemble";

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelSelection::Ensemble => Self::ENSEMBLE_ID,
            ModelSelection::Single(id) => id.as_str(),
        }
    }
}

impl Default for ModelSelection {
    fn default() -> Self {
        ModelSelection::Ensemble
    }
}

impl fmt::Display for ModelSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelSelection {
    type Err = TorsightError;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case(Self::ENSEMBLE_ID) {
            Ok(ModelSelection::Ensemble)
        } else {
            s.parse().map(ModelSelection::Single)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_selection() {
        assert_eq!("ensemble".parse::<ModelSelection>().unwrap(), ModelSelection::Ensemble);
        assert_eq!(
            "LightGBM".parse::<ModelSelection>().unwrap(),
            ModelSelection::Single(ScorerId::Lightgbm)
        );
        assert!(matches!(
            "random_forest".parse::<ModelSelection>(),
            Err(TorsightError::UnknownScorer(_))
        ));
    }

    #[test]
    fn test_scorer_order_is_stable() {
        let mut ids = vec![ScorerId::Catboost, ScorerId::Xgboost, ScorerId::Lightgbm];
        ids.sort();
        assert_eq!(ids, ScorerId::ALL.to_vec());
    }
}
