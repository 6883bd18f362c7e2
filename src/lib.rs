//! Disclosure Index - month-partitioned storage for dated disclosures
//!
//! Disclosures are written once, keyed by their upstream identifier and
//! tagged with the local calendar month of their disclosure time. Range
//! queries fan out across the months they overlap and merge the results.
//!
//! ## Components
//!
//! - **Retry**: bounded retry with exponential backoff for every store call
//! - **Partition**: UTC to local-month key derivation and range expansion
//! - **Ingestion**: idempotent conditional writes
//! - **Query**: scatter-gather reads, post-filtering, merge and windowing
//! - **DB**: the store contract with MongoDB and in-memory implementations

pub mod config;
pub mod db;
pub mod partition;
pub mod retry;
pub mod services;
pub mod types;

pub use config::Args;
pub use partition::{PartitionKey, PartitionKeyDeriver};
pub use retry::RetryPolicy;
pub use types::{IndexError, Result};
