//! codemend library crate
//!
//! Exposes the fix-orchestration pipeline so the CLI and tests can drive it
//! without going through process startup: collect diagnostics, batch them,
//! request AI repairs, apply results, persist outcomes.

pub mod apply;
pub mod batch;
pub mod client;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod runner;
pub mod store;
pub mod view;
