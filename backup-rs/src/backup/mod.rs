//! Mailbox backup pipeline
//!
//! The queue pulls new messages from the configured [`crate::provider`] and
//! feeds them into the archive, bounded by the operator-tunable limits in
//! the `backup_config` row.

pub mod queue;
pub mod scheduler;
pub mod settings;

pub use queue::{BackupJob, BackupJobStatus, BackupQueue, QueueCounters};
pub use scheduler::spawn_scheduler;
pub use settings::BackupSettings;
