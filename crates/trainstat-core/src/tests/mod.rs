//! Scenario and property tests for the statistics engine.
//!
//! These tests drive whole projects through updates and queries:
//! - **Scenarios**: worked examples with known statistics, failure and
//!   cancellation paths, invalidation on membership changes
//! - **Properties**: storage strategies and channel projections agree on
//!   random images
//!
//! # Test Structure
//!
//! - `scenarios.rs`: End-to-end worked examples
//! - `properties.rs`: Proptest properties over synthetic images
//! - `helpers.rs`: Images, sources and project builders

mod helpers;
mod scenarios;

// Re-export for convenience
pub use helpers::*;
