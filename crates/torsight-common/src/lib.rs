//! torsight-common: Shared types, errors, and request plumbing used across all Torsight crates.

pub mod error;
pub mod observation;
pub mod candidate;
pub mod model;
pub mod deadline;

// Re-export commonly used types
pub use error::{Result, TorsightError};
pub use observation::{Observation, ObservationInput, ObservationOverrides, RawField};
pub use candidate::{CandidateSet, GuardCandidate};
pub use model::{ModelSelection, ScorerId};
pub use deadline::Deadline;
