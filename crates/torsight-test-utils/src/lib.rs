//! torsight-test-utils: Deterministic fixtures for tests across the workspace.
//!
//! Reference tables are small and fixed. Scorer artifacts are synthesized
//! from a seeded `StdRng`, with split thresholds placed around the feature
//! values of [`sample_observation`] so that perturbing its raw fields
//! actually moves scores.

pub mod artifacts;
pub mod fixture;
pub mod reference;

pub use fixture::Fixture;
pub use reference::{candidates, cooccurrence, countries, reference_data, sample_observation, CANDIDATE_COUNT};

/// Seed used by [`Fixture::new`].
pub const DEFAULT_SEED: u64 = 0x7057_1947;
