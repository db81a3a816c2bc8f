//! torsight-web: HTTP surface over the guard ranking engine.
//!
//! Handlers validate and translate requests; every ranking, attribution
//! and counterfactual computation happens in `torsight-ranker`.

pub mod error;
pub mod extract;
pub mod handlers;
pub mod router;
pub mod state;
