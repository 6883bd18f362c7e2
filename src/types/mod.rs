//! Shared types for the disclosure index

mod error;

pub use error::{IndexError, Result};
