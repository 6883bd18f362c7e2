//! Store abstraction for the disclosure index
//!
//! The index needs four primitives from its backing store: a conditional
//! put, a primary-key lookup, an equality query on the partition key, and a
//! full-collection scan. Paged operations hand back an opaque [`Cursor`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::db::schemas::DisclosureDoc;
use crate::partition::PartitionKey;
use crate::types::Result;

/// Largest page a store will serve; one look-ahead row must still fit an `i64` limit
pub const MAX_PAGE_SIZE: usize = 10_000;

/// Continuation token returned by a paged read.
///
/// The index never looks inside it; it is passed back verbatim to fetch
/// the next page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One page of a paged read
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<DisclosureDoc>,
    /// Present when more items remain
    pub next_cursor: Option<Cursor>,
}

/// Result of a conditional write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PutOutcome {
    /// No record with this identifier existed; the write happened
    Inserted,
    /// A record with this identifier already existed; nothing was written
    AlreadyExists,
}

/// Attribute filter pushed down to a full-collection scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanFilter {
    pub group_code: Option<String>,
}

impl ScanFilter {
    pub fn group_code(code: impl Into<String>) -> Self {
        Self {
            group_code: Some(code.into()),
        }
    }

    pub fn matches(&self, doc: &DisclosureDoc) -> bool {
        self.group_code
            .as_deref()
            .map_or(true, |code| doc.group_code == code)
    }
}

/// Partitioned key-value store backing the index
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Write `doc` unless a record with the same identifier exists
    async fn put_if_absent(&self, doc: &DisclosureDoc) -> Result<PutOutcome>;

    /// Fetch one record by identifier
    async fn get_by_primary_key(&self, id: &str) -> Result<Option<DisclosureDoc>>;

    /// One page of records whose partition key equals `key`
    async fn query_by_partition_key(
        &self,
        key: &PartitionKey,
        cursor: Option<&Cursor>,
    ) -> Result<Page>;

    /// One page of a full-collection scan, optionally filtered
    async fn scan(&self, filter: &ScanFilter, cursor: Option<&Cursor>) -> Result<Page>;
}
