//! In-memory record store
//!
//! Implements the same paging and conditional-write contract as the MongoDB
//! store and stands in for it in service tests. Request counters and fault
//! injection let callers observe and disturb the scatter-gather path.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::db::schemas::DisclosureDoc;
use crate::db::store::{Cursor, Page, PutOutcome, RecordStore, ScanFilter, MAX_PAGE_SIZE};
use crate::partition::PartitionKey;
use crate::types::{IndexError, Result};

/// Default page size, matching a typical store page limit
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Store operation a fault applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Put,
    Get,
    PartitionQuery,
    Scan,
}

/// Kind of error an injected fault produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Throughput exceeded (retryable everywhere)
    Throttled,
    /// Network reset (retryable for writes)
    Transient,
    /// Permission denied (never retried)
    Terminal,
}

impl FaultKind {
    fn to_error(self, op: StoreOp) -> IndexError {
        match self {
            Self::Throttled => IndexError::Throttled(format!("{:?}: request rate is large", op)),
            Self::Transient => IndexError::Transient(format!("{:?}: connection reset", op)),
            Self::Terminal => IndexError::Database(format!("{:?}: permission denied", op)),
        }
    }
}

#[derive(Debug)]
struct Fault {
    op: StoreOp,
    partition: Option<PartitionKey>,
    kind: FaultKind,
    remaining: u32,
}

/// In-memory [`RecordStore`]
pub struct InMemoryRecordStore {
    records: RwLock<BTreeMap<String, DisclosureDoc>>,
    page_size: usize,
    latency: Option<Duration>,
    faults: Mutex<Vec<Fault>>,
    puts: AtomicUsize,
    scan_pages: AtomicUsize,
    partition_pages: Mutex<HashMap<PartitionKey, usize>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Page size is clamped to `1..=MAX_PAGE_SIZE`
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
            latency: None,
            faults: Mutex::new(Vec::new()),
            puts: AtomicUsize::new(0),
            scan_pages: AtomicUsize::new(0),
            partition_pages: Mutex::new(HashMap::new()),
        }
    }

    /// Delay every read by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail the next `times` calls of `op` with `kind`. A partition narrows
    /// partition queries to that key.
    pub fn inject_fault(
        &self,
        op: StoreOp,
        partition: Option<PartitionKey>,
        kind: FaultKind,
        times: u32,
    ) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.push(Fault {
                op,
                partition,
                kind,
                remaining: times,
            });
        }
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Conditional write attempts, including rejected ones
    pub fn put_requests(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Pages served for one partition
    pub fn page_requests(&self, key: &PartitionKey) -> usize {
        self.partition_pages
            .lock()
            .map(|pages| pages.get(key).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Partitions that received at least one page request
    pub fn partitions_queried(&self) -> Vec<PartitionKey> {
        let mut keys: Vec<PartitionKey> = self
            .partition_pages
            .lock()
            .map(|pages| pages.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Pages served by full-collection scans
    pub fn scan_requests(&self) -> usize {
        self.scan_pages.load(Ordering::SeqCst)
    }

    fn take_fault(&self, op: StoreOp, partition: Option<&PartitionKey>) -> Result<()> {
        let mut faults = self
            .faults
            .lock()
            .map_err(|_| IndexError::Internal("Fault table poisoned".into()))?;

        let hit = faults.iter_mut().find(|f| {
            f.op == op
                && f.remaining > 0
                && f.partition.as_ref().map_or(true, |p| Some(p) == partition)
        });

        match hit {
            Some(fault) => {
                fault.remaining -= 1;
                Err(fault.kind.to_error(op))
            }
            None => Ok(()),
        }
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    async fn collect_page<F>(&self, cursor: Option<&Cursor>, keep: F) -> Page
    where
        F: Fn(&DisclosureDoc) -> bool,
    {
        let records = self.records.read().await;
        let lower = match cursor {
            Some(c) => Bound::Excluded(c.as_str().to_string()),
            None => Bound::Unbounded,
        };

        let mut items: Vec<DisclosureDoc> = records
            .range((lower, Bound::Unbounded))
            .map(|(_, doc)| doc)
            .filter(|doc| keep(doc))
            .take(self.page_size.saturating_add(1))
            .cloned()
            .collect();

        let next_cursor = if items.len() > self.page_size {
            items.truncate(self.page_size);
            items.last().map(|d| Cursor::new(d.id.clone()))
        } else {
            None
        };

        Page { items, next_cursor }
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn put_if_absent(&self, doc: &DisclosureDoc) -> Result<PutOutcome> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.take_fault(StoreOp::Put, Some(doc.partition_key()))?;

        let mut records = self.records.write().await;
        if records.contains_key(&doc.id) {
            return Ok(PutOutcome::AlreadyExists);
        }
        records.insert(doc.id.clone(), doc.clone());
        Ok(PutOutcome::Inserted)
    }

    async fn get_by_primary_key(&self, id: &str) -> Result<Option<DisclosureDoc>> {
        self.delay().await;
        self.take_fault(StoreOp::Get, None)?;
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn query_by_partition_key(
        &self,
        key: &PartitionKey,
        cursor: Option<&Cursor>,
    ) -> Result<Page> {
        self.delay().await;
        if let Ok(mut pages) = self.partition_pages.lock() {
            *pages.entry(key.clone()).or_insert(0) += 1;
        }
        self.take_fault(StoreOp::PartitionQuery, Some(key))?;

        Ok(self
            .collect_page(cursor, |doc| doc.partition_key() == key)
            .await)
    }

    async fn scan(&self, filter: &ScanFilter, cursor: Option<&Cursor>) -> Result<Page> {
        self.delay().await;
        self.scan_pages.fetch_add(1, Ordering::SeqCst);
        self.take_fault(StoreOp::Scan, None)?;

        Ok(self.collect_page(cursor, |doc| filter.matches(doc)).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::CandidateDisclosure;
    use crate::partition::PartitionKeyDeriver;
    use chrono::Utc;

    fn doc(id: &str, disclosed_at: &str, group_code: &str) -> DisclosureDoc {
        let deriver = PartitionKeyDeriver::new(9).unwrap();
        let candidate = CandidateDisclosure {
            id: id.into(),
            group_code: group_code.into(),
            company_name: "Test Co".into(),
            category: "misc".into(),
            title: format!("Disclosure {}", id),
            disclosed_at: disclosed_at.into(),
            source_url: format!("https://example.com/{}.pdf", id),
            pdf_key: None,
        };
        DisclosureDoc::from_candidate(candidate, &deriver, Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn test_put_if_absent_rejects_second_write() {
        let store = InMemoryRecordStore::new();
        let first = doc("A1", "2024-03-01T00:00:00Z", "1111");

        assert_eq!(store.put_if_absent(&first).await.unwrap(), PutOutcome::Inserted);

        let mut changed = first.clone();
        changed.title = "Overwritten?".into();
        assert_eq!(store.put_if_absent(&changed).await.unwrap(), PutOutcome::AlreadyExists);

        let stored = store.get_by_primary_key("A1").await.unwrap().unwrap();
        assert_eq!(stored.title, "Disclosure A1");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_partition_pages_follow_cursor() {
        let store = InMemoryRecordStore::with_page_size(2);
        for i in 0..5 {
            store
                .put_if_absent(&doc(&format!("P{}", i), "2024-03-10T00:00:00Z", "1111"))
                .await
                .unwrap();
        }
        store
            .put_if_absent(&doc("Q0", "2024-04-10T00:00:00Z", "1111"))
            .await
            .unwrap();

        let key = PartitionKey::parse("2024-03").unwrap();
        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = store.query_by_partition_key(&key, cursor.as_ref()).await.unwrap();
            seen.extend(page.items.into_iter().map(|d| d.id));
            match page.next_cursor {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }

        assert_eq!(seen, vec!["P0", "P1", "P2", "P3", "P4"]);
        assert_eq!(store.page_requests(&key), 3);
    }

    #[tokio::test]
    async fn test_scan_filter_by_group_code() {
        let store = InMemoryRecordStore::new();
        store.put_if_absent(&doc("A", "2024-03-10T00:00:00Z", "1111")).await.unwrap();
        store.put_if_absent(&doc("B", "2024-05-10T00:00:00Z", "2222")).await.unwrap();

        let page = store.scan(&ScanFilter::group_code("2222"), None).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, "B");
        assert!(page.next_cursor.is_none());
        assert_eq!(store.scan_requests(), 1);
    }

    #[tokio::test]
    async fn test_oversized_page_size_is_clamped() {
        let store = InMemoryRecordStore::with_page_size(usize::MAX);
        store.put_if_absent(&doc("A", "2024-03-10T00:00:00Z", "1111")).await.unwrap();

        let key = PartitionKey::parse("2024-03").unwrap();
        let page = store.query_by_partition_key(&key, None).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(page.next_cursor.is_none());

        let page = store.scan(&ScanFilter::default(), None).await.unwrap();
        assert_eq!(page.items.len(), 1);
    }

    #[tokio::test]
    async fn test_fault_scoped_to_partition() {
        let store = InMemoryRecordStore::new();
        let march = PartitionKey::parse("2024-03").unwrap();
        let april = PartitionKey::parse("2024-04").unwrap();
        store.inject_fault(StoreOp::PartitionQuery, Some(march.clone()), FaultKind::Throttled, 1);

        assert!(store.query_by_partition_key(&april, None).await.is_ok());
        let err = store.query_by_partition_key(&march, None).await.unwrap_err();
        assert!(err.is_throttled());
        assert!(store.query_by_partition_key(&march, None).await.is_ok());
    }
}
