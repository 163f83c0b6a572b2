//! HTTP server wiring for the llmscope detection and alerting pipeline.
//!
//! The binary entry point lives in `main.rs`; this library exposes the
//! building blocks (config, state, API routes, detection pipeline,
//! scheduler) so integration tests can assemble a full in-memory server.

pub mod api;
pub mod app;
pub mod config;
pub mod logging;
pub mod middleware;
pub mod pipeline;
pub mod rule_builder;
pub mod scheduler;
pub mod seed;
pub mod state;
