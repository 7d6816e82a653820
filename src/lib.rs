//! Mender drives source code through a bounded Scanner → Fixer → Validator
//! pipeline, backed by a language-model collaborator.
//!
//! The core lives in [`pipeline`]: run state, the pure reducer and router,
//! the orchestrator, checkpoints and per-run event streams. [`stages`] holds
//! the adapters that talk to the collaborator, and [`server`] exposes the
//! pipeline over HTTP.

pub mod config;
pub mod errors;
pub mod logging;
pub mod pipeline;
pub mod server;
pub mod stages;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
