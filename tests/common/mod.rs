//! Shared fixtures for integration tests

#![allow(dead_code)]

use chrono::{DateTime, Duration, SecondsFormat, TimeZone, Utc};
use std::sync::Arc;

use disclosure_index::db::{CandidateDisclosure, InMemoryRecordStore};
use disclosure_index::services::{IngestionService, QueryEngine, QueryEngineConfig};
use disclosure_index::{PartitionKeyDeriver, RetryPolicy};

pub fn deriver() -> PartitionKeyDeriver {
    PartitionKeyDeriver::new(9).expect("valid offset")
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::default()
        .with_delays(
            std::time::Duration::from_millis(1),
            std::time::Duration::from_millis(4),
        )
        .with_jitter(false)
}

pub fn candidate(id: &str, disclosed_at: &str) -> CandidateDisclosure {
    CandidateDisclosure {
        id: id.to_string(),
        group_code: "7203".to_string(),
        company_name: "Toyota Motor".to_string(),
        category: "決算短信".to_string(),
        title: format!("Disclosure {}", id),
        disclosed_at: disclosed_at.to_string(),
        source_url: format!("https://example.com/{}.pdf", id),
        pdf_key: Some(format!("pdf/{}.pdf", id)),
    }
}

pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
        .single()
        .expect("valid instant")
}

pub fn iso(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// `count` candidates one minute apart starting at `start`
pub fn series(prefix: &str, start: DateTime<Utc>, count: usize) -> Vec<CandidateDisclosure> {
    (0..count)
        .map(|i| {
            let id = format!("{}{:04}", prefix, i);
            candidate(&id, &iso(start + Duration::minutes(i as i64)))
        })
        .collect()
}

pub struct Harness {
    pub store: Arc<InMemoryRecordStore>,
    pub ingestion: IngestionService,
    pub engine: QueryEngine,
}

impl Harness {
    pub fn new(store: InMemoryRecordStore) -> Self {
        Self::with_config(
            store,
            QueryEngineConfig {
                retry: fast_retry(),
                ..Default::default()
            },
        )
    }

    pub fn with_config(store: InMemoryRecordStore, config: QueryEngineConfig) -> Self {
        let store = Arc::new(store);
        let ingestion = IngestionService::new(store.clone(), deriver(), fast_retry());
        let engine = QueryEngine::new(store.clone(), deriver(), config);
        Self {
            store,
            ingestion,
            engine,
        }
    }

    pub async fn load(&self, candidates: Vec<CandidateDisclosure>) {
        let report = self.ingestion.ingest_batch(candidates).await;
        assert!(report.failed.is_empty(), "ingest failures: {:?}", report.failed);
    }
}
