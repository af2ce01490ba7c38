//! Mailbox exports
//!
//! Builds downloadable bundles of archived messages, either plain EML
//! archives or Outlook-ready packages.

pub mod manager;
pub mod types;

pub use manager::ExportManager;
pub use types::{ExportFormat, ExportJob, ExportRequest, ExportStats, ExportStatus};
