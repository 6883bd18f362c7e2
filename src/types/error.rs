//! Error types for the disclosure index
//!
//! Context wrappers (partition, record, retry) are transparent to the
//! classification helpers, which inspect the innermost error.

/// Main error type for index operations
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Throughput exceeded: {0}")]
    Throttled(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Upstream returned HTTP {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Gave up after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<IndexError>,
    },

    #[error("Partition {key}: {source}")]
    Partition {
        key: String,
        #[source]
        source: Box<IndexError>,
    },

    #[error("Record {id}: {source}")]
    Record {
        id: String,
        #[source]
        source: Box<IndexError>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IndexError {
    /// Wrap with the partition that produced the error
    pub fn in_partition(self, key: impl Into<String>) -> Self {
        Self::Partition {
            key: key.into(),
            source: Box::new(self),
        }
    }

    /// Wrap with the record identifier that produced the error
    pub fn for_record(self, id: impl Into<String>) -> Self {
        Self::Record {
            id: id.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error, skipping context and retry wrappers
    pub fn root(&self) -> &IndexError {
        match self {
            Self::RetriesExhausted { source, .. }
            | Self::Partition { source, .. }
            | Self::Record { source, .. } => source.root(),
            other => other,
        }
    }

    /// Store-specific throughput exceeded
    pub fn is_throttled(&self) -> bool {
        matches!(self.root(), Self::Throttled(_))
    }

    /// Recognized transient kinds: network reset/timeout, HTTP 429/5xx,
    /// throughput exceeded. Used when a retry policy has no predicate.
    pub fn is_transient(&self) -> bool {
        match self.root() {
            Self::Throttled(_) | Self::Transient(_) => true,
            Self::Upstream { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }

    /// Input was rejected before reaching the store
    pub fn is_validation(&self) -> bool {
        matches!(self.root(), Self::Validation(_))
    }
}

// Implement From conversions for common error types

impl From<std::io::Error> for IndexError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::TimedOut
            | ErrorKind::BrokenPipe => Self::Transient(err.to_string()),
            _ => Self::Internal(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for IndexError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("JSON error: {}", err))
    }
}

/// Server codes signalling rate limiting (Cosmos DB 16500, Atlas ingress 462)
const THROTTLED_CODES: [i32; 2] = [16500, 462];

/// Server codes for failover and network conditions that clear on their own
const TRANSIENT_CODES: [i32; 12] = [
    6, 7, 89, 91, 189, 262, 9001, 10107, 11600, 11602, 13435, 13436,
];

impl From<mongodb::error::Error> for IndexError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::{ErrorKind, WriteFailure};

        let code = match err.kind.as_ref() {
            ErrorKind::Command(cmd) => Some(cmd.code),
            ErrorKind::Write(WriteFailure::WriteError(we)) => Some(we.code),
            ErrorKind::Write(WriteFailure::WriteConcernError(wce)) => Some(wce.code),
            _ => None,
        };

        if let Some(code) = code {
            if THROTTLED_CODES.contains(&code) {
                return Self::Throttled(err.to_string());
            }
            if TRANSIENT_CODES.contains(&code) {
                return Self::Transient(err.to_string());
            }
        }

        let network = matches!(
            err.kind.as_ref(),
            ErrorKind::Io(_) | ErrorKind::ConnectionPoolCleared { .. } | ErrorKind::ServerSelection { .. }
        );
        if network
            || err.contains_label("RetryableWriteError")
            || err.contains_label("TransientTransactionError")
        {
            return Self::Transient(err.to_string());
        }

        Self::Database(err.to_string())
    }
}

/// Result type alias for index operations
pub type Result<T> = std::result::Result<T, IndexError>;
