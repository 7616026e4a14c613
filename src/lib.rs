// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod engine;
pub mod grid;
pub mod ingest;
pub mod metrics;

// ---- Re-exports for stable public API ----
pub use crate::api::create_router as router;
pub use crate::config::catalog::{SpeciesCatalog, SpeciesDescriptor};
pub use crate::engine::Engine;
pub use crate::grid::{aggregate, AggregationResult, GridCell, RiskTier, Summary, Thresholds};
pub use crate::ingest::error::FetchError;
pub use crate::ingest::types::OccurrenceRecord;
pub use crate::ingest::{fetch_all, fetch_all_settled, fetch_occurrences, FetchParams};
