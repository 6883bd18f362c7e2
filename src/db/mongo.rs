//! MongoDB client, collection wrapper, and record store

use bson::{doc, Document};
use futures::TryStreamExt;
use mongodb::{
    error::{ErrorKind, WriteFailure},
    options::IndexOptions,
    Client, Collection, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

use crate::db::schemas::{DisclosureDoc, DISCLOSURE_COLLECTION};
use crate::db::store::{Cursor, Page, PutOutcome, RecordStore, ScanFilter, MAX_PAGE_SIZE};
use crate::partition::PartitionKey;
use crate::types::{IndexError, Result};

/// Server error code for a unique index violation
const DUPLICATE_KEY_CODE: i32 = 11000;

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Create a new MongoDB client
    pub async fn new(uri: &str, db_name: &str) -> Result<Self> {
        info!("Connecting to MongoDB at {}", uri);

        // Use serverSelectionTimeoutMS to avoid hanging on unreachable MongoDB
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri).await.map_err(|e| {
            IndexError::Config(format!("Failed to connect to MongoDB: {}", e))
        })?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(IndexError::from)?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Get a typed collection
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes,
    {
        MongoCollection::new(&self.client, &self.db_name, name).await
    }
}

/// Typed MongoDB collection with automatic indexing
#[derive(Debug, Clone)]
pub struct MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    inner: Collection<T>,
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes,
{
    /// Create a new collection and apply indexes
    pub async fn new(client: &Client, db_name: &str, collection_name: &str) -> Result<Self> {
        let collection = client.database(db_name).collection::<T>(collection_name);
        let mongo_collection = MongoCollection { inner: collection };

        mongo_collection.apply_indexes().await?;

        Ok(mongo_collection)
    }

    /// Apply schema-defined indexes
    async fn apply_indexes(&self) -> Result<()> {
        let schema_indices = T::into_indices();

        if schema_indices.is_empty() {
            return Ok(());
        }

        let indices: Vec<IndexModel> = schema_indices
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.inner.create_indexes(indices).await?;

        Ok(())
    }

    /// Insert unless the `_id` is taken
    pub async fn insert_if_absent(&self, item: &T) -> Result<PutOutcome> {
        match self.inner.insert_one(item).await {
            Ok(_) => Ok(PutOutcome::Inserted),
            Err(e) if is_duplicate_key(&e) => Ok(PutOutcome::AlreadyExists),
            Err(e) => Err(e.into()),
        }
    }

    /// Find one document by filter
    pub async fn find_one(&self, filter: Document) -> Result<Option<T>> {
        Ok(self.inner.find_one(filter).await?)
    }

    /// Find up to `limit` documents in `_id` order
    pub async fn find_sorted(&self, filter: Document, limit: usize) -> Result<Vec<T>> {
        let limit = i64::try_from(limit)
            .map_err(|_| IndexError::Config(format!("Page size too large: {}", limit)))?;

        let cursor = self
            .inner
            .find(filter)
            .sort(doc! { "_id": 1 })
            .limit(limit)
            .await?;

        Ok(cursor.try_collect::<Vec<T>>().await?)
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(we)) if we.code == DUPLICATE_KEY_CODE
    )
}

/// [`RecordStore`] over the disclosures collection.
///
/// Pages are keyset-paginated on `_id`; the cursor carries the last `_id`
/// of the previous page.
#[derive(Clone)]
pub struct MongoRecordStore {
    collection: MongoCollection<DisclosureDoc>,
    page_size: usize,
}

impl MongoRecordStore {
    /// Open the disclosures collection, creating indexes if needed
    pub async fn open(client: &MongoClient, page_size: usize) -> Result<Self> {
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(IndexError::Config(format!(
                "Page size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, page_size
            )));
        }
        let collection = client.collection::<DisclosureDoc>(DISCLOSURE_COLLECTION).await?;
        Ok(Self {
            collection,
            page_size,
        })
    }

    async fn page(&self, mut filter: Document, cursor: Option<&Cursor>) -> Result<Page> {
        if let Some(cursor) = cursor {
            filter.insert("_id", doc! { "$gt": cursor.as_str() });
        }

        // One extra row tells us whether another page exists
        let mut items = self
            .collection
            .find_sorted(filter, self.page_size.saturating_add(1))
            .await?;

        let next_cursor = if items.len() > self.page_size {
            items.truncate(self.page_size);
            items.last().map(|d| Cursor::new(d.id.clone()))
        } else {
            None
        };

        debug!(
            items = items.len(),
            has_more = next_cursor.is_some(),
            "Fetched page"
        );

        Ok(Page { items, next_cursor })
    }
}

#[async_trait::async_trait]
impl RecordStore for MongoRecordStore {
    async fn put_if_absent(&self, doc: &DisclosureDoc) -> Result<PutOutcome> {
        self.collection.insert_if_absent(doc).await
    }

    async fn get_by_primary_key(&self, id: &str) -> Result<Option<DisclosureDoc>> {
        self.collection.find_one(doc! { "_id": id }).await
    }

    async fn query_by_partition_key(
        &self,
        key: &PartitionKey,
        cursor: Option<&Cursor>,
    ) -> Result<Page> {
        self.page(doc! { "partition_key": key.as_str() }, cursor).await
    }

    async fn scan(&self, filter: &ScanFilter, cursor: Option<&Cursor>) -> Result<Page> {
        let mut query = Document::new();
        if let Some(code) = &filter.group_code {
            query.insert("group_code", code.as_str());
        }
        self.page(query, cursor).await
    }
}
