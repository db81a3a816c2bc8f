//! torsight-features: Raw observation → fixed 75-field feature vector.
//!
//! The layout module is the single source of truth for field order. The
//! transformer reads static reference tables (countries, candidates,
//! co-occurrence) loaded once at startup and shared behind an `Arc`.

pub mod layout;
pub mod vector;
pub mod reference;
pub mod transform;

pub use layout::{FeatureGroup, LayoutInfo, FEATURE_COUNT, FEATURE_LAYOUT, FEATURE_VERSION};
pub use vector::FeatureVector;
pub use reference::{CooccurrenceStats, CountryRecord, ReferenceData, UNKNOWN_DISTANCE_KM};
pub use transform::FeatureTransformer;
