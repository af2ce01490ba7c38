//! backup-rs: administration backend for mailbox archives
//!
//! A long-running service that keeps point-in-time copies of hosted
//! mailboxes and lets operators browse, manage and export them.
//!
//! # Features
//!
//! - **Backups**: batched, concurrency-bounded pulls from a pluggable
//!   mail provider into an on-disk archive with a relational index
//! - **Exports**: background-built ZIP bundles of raw EML files, with an
//!   Outlook-oriented variant
//! - **Administration**: a role-guarded REST API over domains, mailboxes,
//!   archived mail and export jobs
//! - **Portability**: one binary drives MySQL, PostgreSQL or SQLite
//!   through the same SQL surface
//!
//! # Modules
//!
//! - [`config`]: TOML configuration with environment overrides
//! - [`db`]: backend-agnostic pool, dialect handling and schema
//! - [`security`]: admin accounts, roles, password hashing, lockout
//! - [`archive`]: message storage, indexing and MIME parsing
//! - [`provider`]: the mail-source seam and the maildir implementation
//! - [`backup`]: the job queue, scheduler and tunable limits
//! - [`export`]: export job lifecycle and bundle writing
//! - [`api`]: the HTTP server, middleware and handlers

pub mod api;
pub mod archive;
pub mod backup;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod provider;
pub mod security;

// Re-export commonly used types
pub use config::Config;
pub use error::{BackupError, Result};
