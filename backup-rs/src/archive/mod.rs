//! Message archive
//!
//! Storage and indexing of backed-up mailbox content.

pub mod mime;
pub mod store;

pub use store::{EmailRecord, IngestOutcome, MessageStore, SearchQuery};
