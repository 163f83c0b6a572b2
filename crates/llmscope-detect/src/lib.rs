//! Detection logic for the alerting pipeline.
//!
//! Everything in this crate is pure compute: windowed aggregation,
//! z-score anomaly classification against a rolling baseline, threshold
//! rule evaluation, and windowed counting of security events. Fetching
//! the underlying series and persisting the outcome belong to the server
//! and storage crates; keeping this layer free of I/O keeps every
//! classification decision unit-testable.

pub mod aggregate;
pub mod baseline;
pub mod rule;
pub mod security;
