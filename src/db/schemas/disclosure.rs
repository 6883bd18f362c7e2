//! Disclosure document schema
//!
//! One document per disclosure, keyed by its upstream identifier, with a
//! secondary index on the local-month partition key.

use bson::{doc, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::IntoIndexes;
use crate::partition::{PartitionKey, PartitionKeyDeriver};
use crate::types::Result;

/// Collection name for disclosures
pub const DISCLOSURE_COLLECTION: &str = "disclosures";

/// Record as handed over by the upstream scraper, before a partition key exists
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CandidateDisclosure {
    /// Upstream document identifier
    pub id: String,

    /// Securities code (4 digits)
    pub group_code: String,

    /// Issuer name
    pub company_name: String,

    /// Free-text classification tag
    #[serde(default)]
    pub category: String,

    pub title: String,

    /// Disclosure time as written upstream (ISO-8601 with offset)
    pub disclosed_at: String,

    pub source_url: String,

    /// Blob storage key of the downloaded PDF, when there is one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_key: Option<String>,
}

/// Disclosure document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DisclosureDoc {
    /// Upstream identifier, used as the primary key
    #[serde(rename = "_id")]
    pub id: String,

    pub group_code: String,

    pub company_name: String,

    #[serde(default)]
    pub category: String,

    pub title: String,

    pub disclosed_at: DateTime<Utc>,

    pub source_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_key: Option<String>,

    /// Set once when the document is prepared for its first write
    pub ingested_at: DateTime<Utc>,

    /// Local month of `disclosed_at`; derived once, never recomputed
    partition_key: PartitionKey,
}

impl DisclosureDoc {
    /// Validate a candidate and derive its partition key.
    ///
    /// This is the only way to build a document, so `partition_key` always
    /// matches `disclosed_at`.
    pub fn from_candidate(
        candidate: CandidateDisclosure,
        deriver: &PartitionKeyDeriver,
        ingested_at: DateTime<Utc>,
    ) -> Result<Self> {
        let disclosed_at = deriver
            .parse_timestamp(&candidate.disclosed_at)
            .map_err(|e| e.for_record(candidate.id.as_str()))?;
        let partition_key = deriver.key_for(disclosed_at);

        Ok(Self {
            id: candidate.id,
            group_code: candidate.group_code,
            company_name: candidate.company_name,
            category: candidate.category,
            title: candidate.title,
            disclosed_at,
            source_url: candidate.source_url,
            pdf_key: candidate.pdf_key,
            ingested_at,
            partition_key,
        })
    }

    pub fn partition_key(&self) -> &PartitionKey {
        &self.partition_key
    }
}

impl IntoIndexes for DisclosureDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Partition equality lookups, paged by _id
            (
                doc! { "partition_key": 1, "_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("partition_key_index".to_string())
                        .build(),
                ),
            ),
            // Group code scans without a date range
            (
                doc! { "group_code": 1, "_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("group_code_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(disclosed_at: &str) -> CandidateDisclosure {
        CandidateDisclosure {
            id: "S100T001".into(),
            group_code: "7203".into(),
            company_name: "Toyota Motor".into(),
            category: "決算".into(),
            title: "Quarterly results".into(),
            disclosed_at: disclosed_at.into(),
            source_url: "https://example.com/S100T001.pdf".into(),
            pdf_key: None,
        }
    }

    #[test]
    fn test_partition_key_derived_from_disclosed_at() {
        let deriver = PartitionKeyDeriver::new(9).unwrap();
        let doc = DisclosureDoc::from_candidate(candidate("2024-01-31T15:30:00Z"), &deriver, Utc::now())
            .unwrap();
        assert_eq!(doc.partition_key().as_str(), "2024-02");
    }

    #[test]
    fn test_invalid_timestamp_names_record() {
        let deriver = PartitionKeyDeriver::new(9).unwrap();
        let err = DisclosureDoc::from_candidate(candidate("2024-02-30T00:00:00Z"), &deriver, Utc::now())
            .unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("S100T001"));
    }

    #[test]
    fn test_bson_uses_id_as_primary_key() {
        let deriver = PartitionKeyDeriver::new(9).unwrap();
        let doc = DisclosureDoc::from_candidate(candidate("2024-03-01T00:00:00Z"), &deriver, Utc::now())
            .unwrap();
        let bson_doc = bson::to_document(&doc).unwrap();
        assert_eq!(bson_doc.get_str("_id").unwrap(), "S100T001");
        assert_eq!(bson_doc.get_str("partition_key").unwrap(), "2024-03");
        assert!(!bson_doc.contains_key("pdf_key"));
    }
}
