//! IoScope integration and property tests.
//!
//! Cross-crate scenarios: resolution walks against an in-memory
//! metadata tree, monitor event flows, shared-monitor lifecycle, and
//! property coverage of the identity cache.

pub mod harness;
pub mod lifecycle_integration;
pub mod monitor_integration;
pub mod proptest_cache;
pub mod resolve_integration;
