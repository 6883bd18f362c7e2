//! Storage layer for the disclosure index
//!
//! - `store`: the four-primitive [`RecordStore`] contract
//! - `mongo`: MongoDB implementation
//! - `memory`: in-memory implementation for tests

pub mod memory;
pub mod mongo;
pub mod schemas;
pub mod store;

pub use memory::{FaultKind, InMemoryRecordStore, StoreOp, DEFAULT_PAGE_SIZE};
pub use mongo::{IntoIndexes, MongoClient, MongoCollection, MongoRecordStore};
pub use schemas::{CandidateDisclosure, DisclosureDoc, DISCLOSURE_COLLECTION};
pub use store::{Cursor, Page, PutOutcome, RecordStore, ScanFilter, MAX_PAGE_SIZE};
