//! Configuration for the disclosure index
//!
//! CLI arguments and environment variable handling using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::db::MAX_PAGE_SIZE;
use crate::partition::{PartitionKeyDeriver, DEFAULT_LOCAL_OFFSET_HOURS};
use crate::retry::RetryPolicy;
use crate::services::{QueryEngineConfig, QueryParams};
use crate::types::Result;

/// Disclosure Index - partitioned storage and range queries for disclosures
#[derive(Parser, Debug, Clone)]
#[command(name = "disclosure-index")]
#[command(about = "Month-partitioned disclosure ingestion and scatter-gather queries")]
pub struct Args {
    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "disclosures")]
    pub mongodb_db: String,

    /// Hours east of UTC used to derive local-month partition keys
    #[arg(long, env = "LOCAL_OFFSET_HOURS", default_value_t = DEFAULT_LOCAL_OFFSET_HOURS, allow_hyphen_values = true)]
    pub local_offset_hours: i32,

    /// Records per store page
    #[arg(long, env = "PAGE_SIZE", default_value = "100")]
    pub page_size: usize,

    /// Overall time budget per query in milliseconds
    #[arg(long, env = "QUERY_TIMEOUT_MS", default_value = "30000")]
    pub query_timeout_ms: u64,

    /// Retry configuration
    #[command(flatten)]
    pub retry: RetryArgs,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Retry policy configuration
#[derive(Parser, Debug, Clone)]
pub struct RetryArgs {
    /// Total attempts per store call, including the first
    #[arg(long, env = "RETRY_MAX_ATTEMPTS", default_value = "3")]
    pub retry_max_attempts: u32,

    /// Delay before the first retry in milliseconds
    #[arg(long, env = "RETRY_INITIAL_DELAY_MS", default_value = "200")]
    pub retry_initial_delay_ms: u64,

    /// Upper bound for any retry delay in milliseconds
    #[arg(long, env = "RETRY_MAX_DELAY_MS", default_value = "5000")]
    pub retry_max_delay_ms: u64,

    /// Backoff growth factor per attempt
    #[arg(long, env = "RETRY_BACKOFF_MULTIPLIER", default_value = "2.0")]
    pub retry_backoff_multiplier: f64,

    /// Randomize each delay within [50%, 100%]
    #[arg(long, env = "RETRY_JITTER", default_value = "true", action = clap::ArgAction::Set)]
    pub retry_jitter: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Ingest newline-delimited JSON disclosures from a file
    Ingest {
        /// Path to the JSONL file
        path: PathBuf,
    },

    /// Query disclosures
    Query {
        /// First local day (YYYY-MM-DD), requires --end
        #[arg(long)]
        start: Option<String>,

        /// Last local day (YYYY-MM-DD), requires --start
        #[arg(long)]
        end: Option<String>,

        /// Exact securities code
        #[arg(long)]
        group_code: Option<String>,

        /// Exact category
        #[arg(long)]
        category: Option<String>,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        offset: Option<usize>,
    },

    /// Fetch one disclosure by identifier
    Get {
        id: String,
    },
}

impl Command {
    /// Query parameters for the `query` subcommand
    pub fn query_params(&self) -> Option<QueryParams> {
        match self {
            Self::Query {
                start,
                end,
                group_code,
                category,
                limit,
                offset,
            } => Some(QueryParams {
                start_date: start.clone(),
                end_date: end.clone(),
                group_code: group_code.clone(),
                category: category.clone(),
                limit: *limit,
                offset: *offset,
            }),
            _ => None,
        }
    }
}

impl RetryArgs {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.retry_max_attempts)
            .with_delays(
                Duration::from_millis(self.retry_initial_delay_ms),
                Duration::from_millis(self.retry_max_delay_ms),
            )
            .with_multiplier(self.retry_backoff_multiplier)
            .with_jitter(self.retry_jitter)
    }
}

impl Args {
    pub fn deriver(&self) -> Result<PartitionKeyDeriver> {
        PartitionKeyDeriver::new(self.local_offset_hours)
    }

    pub fn query_config(&self) -> QueryEngineConfig {
        QueryEngineConfig {
            timeout: Duration::from_millis(self.query_timeout_ms),
            retry: self.retry.policy(),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !(-14..=14).contains(&self.local_offset_hours) {
            return Err("LOCAL_OFFSET_HOURS must be between -14 and 14".to_string());
        }

        if !(1..=MAX_PAGE_SIZE).contains(&self.page_size) {
            return Err(format!("PAGE_SIZE must be between 1 and {}", MAX_PAGE_SIZE));
        }

        if self.query_timeout_ms == 0 {
            return Err("QUERY_TIMEOUT_MS must be at least 1".to_string());
        }

        if self.retry.retry_max_attempts == 0 {
            return Err("RETRY_MAX_ATTEMPTS must be at least 1".to_string());
        }

        let multiplier = self.retry.retry_backoff_multiplier;
        if multiplier.is_nan() || multiplier < 1.0 {
            return Err("RETRY_BACKOFF_MULTIPLIER must be at least 1.0".to_string());
        }

        if self.retry.retry_initial_delay_ms > self.retry.retry_max_delay_ms {
            return Err(
                "RETRY_INITIAL_DELAY_MS must be less than or equal to RETRY_MAX_DELAY_MS".to_string(),
            );
        }

        Ok(())
    }
}
