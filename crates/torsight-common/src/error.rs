use thiserror::Error;

/// Every failure the inference core can report to its caller.
///
/// Caller errors (`Invalid*`, `Unknown*`) are raised before any scoring
/// work starts. `ScorerUnavailable` is only fatal when the request targets
/// that scorer directly; the ensemble degrades instead.
#[derive(Debug, Error)]
pub enum TorsightError {
    #[error("Invalid observation field `{field}`: {reason}")]
    InvalidObservation { field: String, reason: String },

    #[error("Invalid override for `{field}`: {reason}")]
    InvalidOverride { field: String, reason: String },

    #[error("Invalid top_k {requested}: must be between 1 and {max}")]
    InvalidTopK { requested: i64, max: usize },

    #[error("Unknown guard candidate: {0}")]
    UnknownCandidate(u32),

    #[error("Unknown scorer: {0}")]
    UnknownScorer(String),

    #[error("Scorer unavailable: {scorer} ({reason})")]
    ScorerUnavailable { scorer: String, reason: String },

    #[error("Internal scoring failure in {scorer}: {reason}")]
    InternalScoringFailure { scorer: String, reason: String },

    #[error("Invalid feature vector: {0}")]
    InvalidFeatureVector(String),

    #[error("Deadline exceeded during {stage}")]
    DeadlineExceeded { stage: &'static str },

    #[error("Artifact load failed for {path}: {reason}")]
    ArtifactLoad { path: String, reason: String },

    #[error("Reference data error: {0}")]
    ReferenceData(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl TorsightError {
    pub fn invalid_observation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        TorsightError::InvalidObservation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_override(field: impl Into<String>, reason: impl Into<String>) -> Self {
        TorsightError::InvalidOverride {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn internal(scorer: impl Into<String>, reason: impl Into<String>) -> Self {
        TorsightError::InternalScoringFailure {
            scorer: scorer.into(),
            reason: reason.into(),
        }
    }

    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            TorsightError::InvalidObservation { .. } => "invalid_observation",
            TorsightError::InvalidOverride { .. } => "invalid_override",
            TorsightError::InvalidTopK { .. } => "invalid_top_k",
            TorsightError::UnknownCandidate(_) => "unknown_candidate",
            TorsightError::UnknownScorer(_) => "unknown_scorer",
            TorsightError::ScorerUnavailable { .. } => "scorer_unavailable",
            TorsightError::InternalScoringFailure { .. } => "internal_scoring_failure",
            TorsightError::InvalidFeatureVector(_) => "invalid_feature_vector",
            TorsightError::DeadlineExceeded { .. } => "deadline_exceeded",
            TorsightError::ArtifactLoad { .. } => "artifact_load",
            TorsightError::ReferenceData(_) => "reference_data",
            TorsightError::Config(_) => "config",
            TorsightError::Io(_) => "io",
            TorsightError::Json(_) => "json",
            TorsightError::Csv(_) => "csv",
        }
    }

    /// Field the error refers to, when it is field-specific.
    pub fn field(&self) -> Option<&str> {
        match self {
            TorsightError::InvalidObservation { field, .. }
            | TorsightError::InvalidOverride { field, .. } => Some(field),
            _ => None,
        }
    }

    /// True for errors caused by the request rather than the process state.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            TorsightError::InvalidObservation { .. }
                | TorsightError::InvalidOverride { .. }
                | TorsightError::InvalidTopK { .. }
                | TorsightError::UnknownCandidate(_)
                | TorsightError::UnknownScorer(_)
                | TorsightError::InvalidFeatureVector(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TorsightError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_observation_carries_field() {
        let err = TorsightError::invalid_observation("bandwidth", "must be > 0");
        assert_eq!(err.kind(), "invalid_observation");
        assert_eq!(err.field(), Some("bandwidth"));
        assert!(err.is_caller_error());
        assert!(err.to_string().contains("bandwidth"));
    }

    #[test]
    fn test_internal_failure_is_not_caller_error() {
        let err = TorsightError::internal("xgboost", "poisoned lock");
        assert!(!err.is_caller_error());
        assert_eq!(err.field(), None);
    }
}
