//! Database schemas for the disclosure index

mod disclosure;

pub use disclosure::{CandidateDisclosure, DisclosureDoc, DISCLOSURE_COLLECTION};
