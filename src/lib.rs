// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod analytics;
pub mod api;
pub mod config;
pub mod domain;
pub mod enrich;
pub mod error;
pub mod feed;
pub mod hub;
pub mod pipeline;
pub mod retriever;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::config::Config;
pub use crate::pipeline::{Orchestrator, PipelineOutcome, PipelineStats};
