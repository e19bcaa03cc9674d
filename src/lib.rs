//! AUGUR: resilient multi-model stock price forecasting
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod cli;
pub mod config;
pub mod dashboard;
pub mod engine;
pub mod predictors;
pub mod sources;
pub mod types;
