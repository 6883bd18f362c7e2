//! Idempotent ingestion
//!
//! Each disclosure is written once with a conditional put. Re-ingesting an
//! identifier is a no-op reported as [`PutOutcome::AlreadyExists`], which is
//! also what makes retrying a failed write safe.

use chrono::Utc;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::db::{CandidateDisclosure, DisclosureDoc, PutOutcome, RecordStore};
use crate::partition::PartitionKeyDeriver;
use crate::retry::{self, RetryPolicy};
use crate::types::{IndexError, Result};

/// Failed record in a batch
#[derive(Debug, Clone, Serialize)]
pub struct IngestFailure {
    pub id: String,
    pub error: String,
}

/// Outcome counts for a batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub inserted: usize,
    pub duplicates: usize,
    pub failed: Vec<IngestFailure>,
}

impl IngestReport {
    pub fn total(&self) -> usize {
        self.inserted + self.duplicates + self.failed.len()
    }
}

/// Writes disclosures into the store
pub struct IngestionService {
    store: Arc<dyn RecordStore>,
    deriver: PartitionKeyDeriver,
    retry: RetryPolicy,
}

impl IngestionService {
    /// Writes retry transient and throughput errors only
    pub fn new(store: Arc<dyn RecordStore>, deriver: PartitionKeyDeriver, retry: RetryPolicy) -> Self {
        Self {
            store,
            deriver,
            retry: retry.transient_only(),
        }
    }

    /// Validate a candidate and derive its partition key
    pub fn prepare(&self, candidate: CandidateDisclosure) -> Result<DisclosureDoc> {
        DisclosureDoc::from_candidate(candidate, &self.deriver, Utc::now())
    }

    /// Conditionally write one prepared document
    pub async fn ingest(&self, doc: &DisclosureDoc) -> Result<PutOutcome> {
        let outcome = retry::execute(&self.retry, "put_if_absent", || self.store.put_if_absent(doc))
            .await
            .map_err(|e| e.for_record(doc.id.as_str()))?;

        match outcome {
            PutOutcome::Inserted => debug!(
                record_id = %doc.id,
                partition = %doc.partition_key(),
                "Disclosure stored"
            ),
            PutOutcome::AlreadyExists => warn!(
                record_id = %doc.id,
                partition = %doc.partition_key(),
                "Disclosure already stored, skipping"
            ),
        }

        Ok(outcome)
    }

    /// Prepare and ingest candidates one at a time.
    ///
    /// Failures are collected rather than stopping the batch.
    pub async fn ingest_batch<I>(&self, candidates: I) -> IngestReport
    where
        I: IntoIterator<Item = CandidateDisclosure>,
    {
        let mut report = IngestReport::default();

        for candidate in candidates {
            let id = candidate.id.clone();
            let result = match self.prepare(candidate) {
                Ok(doc) => self.ingest(&doc).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(PutOutcome::Inserted) => report.inserted += 1,
                Ok(PutOutcome::AlreadyExists) => report.duplicates += 1,
                Err(e) => {
                    warn!(record_id = %id, error = %e, "Disclosure rejected");
                    report.failed.push(IngestFailure {
                        id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            inserted = report.inserted,
            duplicates = report.duplicates,
            failed = report.failed.len(),
            "Batch ingested"
        );

        report
    }
}

/// Read newline-delimited JSON candidates. Blank lines are skipped.
pub async fn load_candidates(path: &Path) -> Result<Vec<CandidateDisclosure>> {
    let text = tokio::fs::read_to_string(path).await?;

    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str::<CandidateDisclosure>(line).map_err(|e| {
                IndexError::Validation(format!("{} line {}: {}", path.display(), i + 1, e))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{FaultKind, InMemoryRecordStore, StoreOp};
    use std::io::Write;
    use std::time::Duration;

    fn candidate(id: &str, disclosed_at: &str) -> CandidateDisclosure {
        CandidateDisclosure {
            id: id.into(),
            group_code: "6758".into(),
            company_name: "Sony Group".into(),
            category: "決算".into(),
            title: format!("Notice {}", id),
            disclosed_at: disclosed_at.into(),
            source_url: format!("https://example.com/{}.pdf", id),
            pdf_key: Some(format!("pdf/{}.pdf", id)),
        }
    }

    fn service(store: Arc<InMemoryRecordStore>) -> IngestionService {
        let policy = RetryPolicy::default()
            .with_delays(Duration::from_millis(1), Duration::from_millis(2))
            .with_jitter(false);
        IngestionService::new(store, PartitionKeyDeriver::new(9).unwrap(), policy)
    }

    #[tokio::test]
    async fn test_ingest_twice_stores_once() {
        let store = Arc::new(InMemoryRecordStore::new());
        let svc = service(store.clone());
        let doc = svc.prepare(candidate("D1", "2024-01-31T15:30:00Z")).unwrap();

        assert_eq!(svc.ingest(&doc).await.unwrap(), PutOutcome::Inserted);
        assert_eq!(svc.ingest(&doc).await.unwrap(), PutOutcome::AlreadyExists);
        assert_eq!(store.len().await, 1);
        assert_eq!(doc.partition_key().as_str(), "2024-02");
    }

    #[tokio::test]
    async fn test_transient_put_is_retried() {
        let store = Arc::new(InMemoryRecordStore::new());
        store.inject_fault(StoreOp::Put, None, FaultKind::Transient, 2);
        let svc = service(store.clone());
        let doc = svc.prepare(candidate("D2", "2024-02-01T00:00:00Z")).unwrap();

        assert_eq!(svc.ingest(&doc).await.unwrap(), PutOutcome::Inserted);
        assert_eq!(store.put_requests(), 3);
    }

    #[tokio::test]
    async fn test_terminal_put_fails_fast_with_record_id() {
        let store = Arc::new(InMemoryRecordStore::new());
        store.inject_fault(StoreOp::Put, None, FaultKind::Terminal, 1);
        let svc = service(store.clone());
        let doc = svc.prepare(candidate("D3", "2024-02-01T00:00:00Z")).unwrap();

        let err = svc.ingest(&doc).await.unwrap_err();
        assert!(matches!(err, IndexError::Record { ref id, .. } if id == "D3"));
        assert_eq!(store.put_requests(), 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_exhausted_retries_propagate() {
        let store = Arc::new(InMemoryRecordStore::new());
        store.inject_fault(StoreOp::Put, None, FaultKind::Throttled, 10);
        let svc = service(store.clone());
        let doc = svc.prepare(candidate("D4", "2024-02-01T00:00:00Z")).unwrap();

        let err = svc.ingest(&doc).await.unwrap_err();
        assert!(err.to_string().contains("3 attempt"));
        assert!(err.is_throttled());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_batch_report() {
        let store = Arc::new(InMemoryRecordStore::new());
        let svc = service(store.clone());

        let report = svc
            .ingest_batch(vec![
                candidate("B1", "2024-03-01T00:00:00Z"),
                candidate("B2", "2024-02-30T00:00:00Z"),
                candidate("B1", "2024-03-01T00:00:00Z"),
                candidate("B3", "2024-03-02T00:00:00+09:00"),
            ])
            .await;

        assert_eq!(report.inserted, 2);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].id, "B2");
        assert_eq!(report.total(), 4);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_load_candidates_jsonl() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for c in [candidate("L1", "2024-03-01T00:00:00Z"), candidate("L2", "2024-03-02T00:00:00Z")] {
            writeln!(file, "{}", serde_json::to_string(&c).unwrap()).unwrap();
            writeln!(file).unwrap();
        }

        let loaded = load_candidates(file.path()).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].id, "L2");
    }

    #[tokio::test]
    async fn test_load_candidates_reports_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", serde_json::to_string(&candidate("L1", "2024-03-01T00:00:00Z")).unwrap()).unwrap();
        writeln!(file, "{{not json").unwrap();

        let err = load_candidates(file.path()).await.unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
