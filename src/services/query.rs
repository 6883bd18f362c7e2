//! Scatter-gather query engine
//!
//! A date-ranged query is answered by expanding the range into month
//! partitions, draining every partition concurrently, and merging:
//!
//! ```text
//! QueryFilter ─► expand_range ─► [2024-01] [2024-02] [2024-03]
//!                                    │         │         │   (paged, retried)
//!                                    └────┬────┴────┬────┘
//!                                      try_join_all (all or nothing)
//!                                           │
//!                     post-filter ─► sort desc ─► offset/limit
//! ```
//!
//! Queries without a date range fall back to a full scan, with the group
//! code pushed down when present. Nothing is cached; every query re-reads.

use chrono::{Datelike, NaiveDate};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::db::{Cursor, DisclosureDoc, Page, RecordStore, ScanFilter};
use crate::partition::{self, PartitionKey, PartitionKeyDeriver};
use crate::retry::{self, RetryPolicy};
use crate::types::{IndexError, Result};

/// Default overall time budget for one query
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Widest date range, in month partitions, a single query may fan out to
pub const MAX_RANGE_MONTHS: u32 = 120;

/// Raw query parameters as received at the API boundary
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryParams {
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub group_code: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

/// Inclusive local-day range with `start <= end`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(IndexError::Validation(format!(
                "start_date {} is after end_date {}",
                start, end
            )));
        }
        let months = i64::from(end.year() - start.year()) * 12 + i64::from(end.month())
            - i64::from(start.month())
            + 1;
        if months > i64::from(MAX_RANGE_MONTHS) {
            return Err(IndexError::Validation(format!(
                "{} to {} spans {} months, more than {}",
                start, end, months, MAX_RANGE_MONTHS
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse two `YYYY-MM-DD` dates
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Self::new(partition::parse_date(start)?, partition::parse_date(end)?)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }
}

/// Validated query filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilter {
    date_range: Option<DateRange>,
    group_code: Option<String>,
    category: Option<String>,
    limit: Option<usize>,
    offset: usize,
}

impl QueryFilter {
    /// Matches everything
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_date_range(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }

    pub fn with_group_code(mut self, code: impl Into<String>) -> Self {
        self.group_code = Some(code.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn date_range(&self) -> Option<&DateRange> {
        self.date_range.as_ref()
    }

    pub fn group_code(&self) -> Option<&str> {
        self.group_code.as_deref()
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl TryFrom<QueryParams> for QueryFilter {
    type Error = IndexError;

    fn try_from(params: QueryParams) -> Result<Self> {
        let start = non_blank(params.start_date);
        let end = non_blank(params.end_date);

        let date_range = match (start, end) {
            (Some(s), Some(e)) => Some(DateRange::parse(&s, &e)?),
            (None, None) => None,
            _ => {
                return Err(IndexError::Validation(
                    "start_date and end_date must be given together".into(),
                ))
            }
        };

        Ok(Self {
            date_range,
            group_code: non_blank(params.group_code),
            category: non_blank(params.category),
            limit: params.limit,
            offset: params.offset.unwrap_or(0),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Windowed query result
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub records: Vec<DisclosureDoc>,
    /// Matches before offset/limit
    pub total_matched: usize,
    /// Matches after offset/limit
    pub returned_count: usize,
    pub offset: usize,
    pub limit: Option<usize>,
}

/// Configuration for the query engine
#[derive(Debug, Clone)]
pub struct QueryEngineConfig {
    /// Overall budget for gathering; expiry fails the query
    pub timeout: Duration,
    /// Page fetch retry policy (narrowed to throughput errors)
    pub retry: RetryPolicy,
}

impl Default for QueryEngineConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_QUERY_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

/// Scatter-gather query engine over a [`RecordStore`]
pub struct QueryEngine {
    store: Arc<dyn RecordStore>,
    deriver: PartitionKeyDeriver,
    retry: RetryPolicy,
    timeout: Duration,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn RecordStore>, deriver: PartitionKeyDeriver, config: QueryEngineConfig) -> Self {
        Self {
            store,
            deriver,
            retry: config.retry.throughput_only(),
            timeout: config.timeout,
        }
    }

    /// Validate raw parameters, then query
    pub async fn query_params(&self, params: QueryParams) -> Result<QueryResult> {
        let filter = QueryFilter::try_from(params)?;
        self.query(&filter).await
    }

    /// Run a query. Any failing partition fails the whole query.
    pub async fn query(&self, filter: &QueryFilter) -> Result<QueryResult> {
        let started = Instant::now();

        let gathered = tokio::time::timeout(self.timeout, self.gather(filter))
            .await
            .map_err(|_| {
                IndexError::Timeout(format!(
                    "query exceeded {} ms budget",
                    self.timeout.as_millis()
                ))
            })??;
        let fetched = gathered.len();

        let mut matched = self.post_filter(filter, gathered)?;

        // Stable: equal timestamps keep merge order
        matched.sort_by(|a, b| b.disclosed_at.cmp(&a.disclosed_at));

        let total_matched = matched.len();
        let records: Vec<DisclosureDoc> = matched
            .into_iter()
            .skip(filter.offset())
            .take(filter.limit().unwrap_or(usize::MAX))
            .collect();

        info!(
            fetched,
            total_matched,
            returned = records.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Query complete"
        );

        Ok(QueryResult {
            returned_count: records.len(),
            records,
            total_matched,
            offset: filter.offset(),
            limit: filter.limit(),
        })
    }

    /// Fetch one disclosure by identifier
    pub async fn get(&self, id: &str) -> Result<Option<DisclosureDoc>> {
        retry::execute(&self.retry, "get_by_primary_key", || self.store.get_by_primary_key(id))
            .await
            .map_err(|e| e.for_record(id))
    }

    async fn gather(&self, filter: &QueryFilter) -> Result<Vec<DisclosureDoc>> {
        match (filter.date_range(), filter.group_code()) {
            (Some(range), _) => self.scatter(range).await,
            (None, Some(code)) => self.scan_all(&ScanFilter::group_code(code)).await,
            (None, None) => self.scan_all(&ScanFilter::default()).await,
        }
    }

    async fn scatter(&self, range: &DateRange) -> Result<Vec<DisclosureDoc>> {
        let partitions = partition::expand_dates(range.start(), range.end())?;
        debug!(partitions = partitions.len(), "Scattering query");

        let per_partition = try_join_all(partitions.iter().map(|key| self.drain_partition(key))).await?;

        Ok(per_partition.into_iter().flatten().collect())
    }

    async fn drain_partition(&self, key: &PartitionKey) -> Result<Vec<DisclosureDoc>> {
        let mut items = Vec::new();
        let mut cursor: Option<Cursor> = None;
        let mut pages = 0usize;

        loop {
            let page = retry::execute(&self.retry, "query_by_partition_key", || {
                self.store.query_by_partition_key(key, cursor.as_ref())
            })
            .await
            .map_err(|e| e.in_partition(key.as_str()))?;

            pages += 1;
            let next = next_cursor(&page, cursor.as_ref()).map_err(|e| e.in_partition(key.as_str()))?;
            items.extend(page.items);
            match next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        debug!(partition = %key, pages, records = items.len(), "Partition gathered");
        Ok(items)
    }

    async fn scan_all(&self, filter: &ScanFilter) -> Result<Vec<DisclosureDoc>> {
        let mut items = Vec::new();
        let mut cursor: Option<Cursor> = None;
        let mut pages = 0usize;

        loop {
            let page = retry::execute(&self.retry, "scan", || self.store.scan(filter, cursor.as_ref())).await?;

            pages += 1;
            let next = next_cursor(&page, cursor.as_ref())?;
            items.extend(page.items);
            match next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        debug!(group_code = ?filter.group_code, pages, records = items.len(), "Scan gathered");
        Ok(items)
    }

    /// Exact-match filters not pushed down, plus the exact day window
    fn post_filter(&self, filter: &QueryFilter, mut records: Vec<DisclosureDoc>) -> Result<Vec<DisclosureDoc>> {
        let window = match filter.date_range() {
            Some(range) => Some(self.deriver.local_day_window(range.start(), range.end())?),
            None => None,
        };
        // Scans without a date range already filtered on group code
        let group_code = filter.date_range().and(filter.group_code());

        records.retain(|doc| {
            group_code.map_or(true, |code| doc.group_code == code)
                && filter.category().map_or(true, |c| doc.category == c)
                && window.map_or(true, |(from, until)| doc.disclosed_at >= from && doc.disclosed_at < until)
        });

        Ok(records)
    }
}

/// A store that hands back the cursor it was given would loop forever
fn next_cursor(page: &Page, current: Option<&Cursor>) -> Result<Option<Cursor>> {
    match (&page.next_cursor, current) {
        (Some(next), Some(current)) if next == current => Err(IndexError::Internal(format!(
            "store returned a non-advancing cursor '{}'",
            next
        ))),
        (next, _) => Ok(next.clone()),
    }
}
