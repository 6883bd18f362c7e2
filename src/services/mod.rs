//! Services layer for the disclosure index
//!
//! ## Services
//!
//! - **Ingestion**: idempotent, one-record-at-a-time conditional writes
//! - **Query**: scatter-gather range queries across month partitions

pub mod ingestion;
pub mod query;

pub use ingestion::{load_candidates, IngestFailure, IngestReport, IngestionService};
pub use query::{
    DateRange, QueryEngine, QueryEngineConfig, QueryFilter, QueryParams, QueryResult,
    DEFAULT_QUERY_TIMEOUT, MAX_RANGE_MONTHS,
};
