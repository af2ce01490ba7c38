//! Periodic backup runs
//!
//! Re-reads the saved settings on every tick so interval and limit changes
//! made through the API take effect without a restart.

use super::{BackupQueue, BackupSettings};
use crate::db::Db;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub fn spawn_scheduler(db: Db, queue: Arc<BackupQueue>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let mut sleep_minutes = 60i64;

            match BackupSettings::load(&db).await {
                Ok(Some(settings)) => {
                    sleep_minutes = settings.interval_minutes.max(1);
                    if settings.enabled {
                        queue.apply_limits(&settings).await;
                        match queue.run_all().await {
                            Ok(count) => info!("Scheduled backup queued {} mailboxes", count),
                            Err(e) => error!("Scheduled backup failed to start: {}", e),
                        }
                    } else {
                        debug!("Scheduled backups disabled, sleeping");
                    }
                }
                Ok(None) => debug!("No backup settings saved yet, sleeping"),
                Err(e) => error!("Could not load backup settings: {}", e),
            }

            tokio::time::sleep(Duration::from_secs(sleep_minutes as u64 * 60)).await;
        }
    })
}
