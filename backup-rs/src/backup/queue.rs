//! Backup job queue
//!
//! Jobs live in memory; one job per mailbox per run. A semaphore bounds how
//! many mailboxes are fetched at once, and full runs are released in batches
//! with a configurable pause between them so the upstream mail service is
//! not hammered.

use crate::archive::{IngestOutcome, MessageStore};
use crate::db::{now_rfc3339, Db};
use crate::provider::MailProvider;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupJobStatus {
    Waiting,
    Active,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupJob {
    pub id: String,
    pub user_id: String,
    pub email: String,
    pub status: BackupJobStatus,
    pub stored: u64,
    pub skipped: u64,
    pub error: Option<String>,
    pub started_at: String,
    pub finished_at: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueCounters {
    pub waiting: u32,
    pub active: u32,
    pub completed: u32,
    pub failed: u32,
}

pub struct BackupQueue {
    db: Db,
    store: MessageStore,
    provider: Arc<dyn MailProvider>,
    jobs: RwLock<HashMap<String, BackupJob>>,
    semaphore: RwLock<Arc<Semaphore>>,
    batch_size: RwLock<usize>,
    batch_delay: RwLock<Duration>,
}

impl BackupQueue {
    pub fn new(db: Db, store: MessageStore, provider: Arc<dyn MailProvider>) -> Self {
        Self {
            db,
            store,
            provider,
            jobs: RwLock::new(HashMap::new()),
            semaphore: RwLock::new(Arc::new(Semaphore::new(5))),
            batch_size: RwLock::new(50),
            batch_delay: RwLock::new(Duration::from_millis(1000)),
        }
    }

    /// Take over the concurrency and batching limits from saved settings.
    /// Affects jobs queued after the call; running jobs keep their permit.
    pub async fn apply_limits(&self, settings: &super::BackupSettings) {
        let max = settings.max_concurrent_users.max(1) as usize;
        *self.semaphore.write().await = Arc::new(Semaphore::new(max));
        *self.batch_size.write().await = settings.batch_size.max(1) as usize;
        *self.batch_delay.write().await =
            Duration::from_millis(settings.batch_delay_ms.max(0) as u64);
    }

    /// Queue a backup for one mailbox and return the job snapshot.
    pub async fn enqueue_user(self: &Arc<Self>, user_id: &str) -> crate::error::Result<BackupJob> {
        let row: Option<(String, String)> =
            sqlx::query_as(&self.db.sql("SELECT id, email FROM users WHERE id = ?"))
                .bind(user_id)
                .fetch_optional(self.db.pool())
                .await?;

        let Some((user_id, email)) = row else {
            return Err(crate::error::BackupError::NotFound(format!(
                "user {} not found",
                user_id
            )));
        };

        Ok(self.spawn_job(user_id, email).await)
    }

    /// Queue backups for every active mailbox, released in batches. Returns
    /// the number of mailboxes queued.
    pub async fn run_all(self: &Arc<Self>) -> crate::error::Result<usize> {
        let users: Vec<(String, String)> = sqlx::query_as(
            &self
                .db
                .sql("SELECT id, email FROM users WHERE status = ? ORDER BY email"),
        )
        .bind("active")
        .fetch_all(self.db.pool())
        .await?;

        let total = users.len();
        let batch_size = *self.batch_size.read().await;
        let batch_delay = *self.batch_delay.read().await;

        info!(
            "Queueing backup run for {} mailboxes (batches of {})",
            total, batch_size
        );

        let queue = self.clone();
        tokio::spawn(async move {
            let mut first = true;
            for batch in users.chunks(batch_size) {
                if !first {
                    tokio::time::sleep(batch_delay).await;
                }
                first = false;
                for (user_id, email) in batch {
                    queue.spawn_job(user_id.clone(), email.clone()).await;
                }
            }
        });

        Ok(total)
    }

    async fn spawn_job(self: &Arc<Self>, user_id: String, email: String) -> BackupJob {
        let job = BackupJob {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.clone(),
            email: email.clone(),
            status: BackupJobStatus::Waiting,
            stored: 0,
            skipped: 0,
            error: None,
            started_at: now_rfc3339(),
            finished_at: None,
        };

        self.jobs
            .write()
            .await
            .insert(job.id.clone(), job.clone());

        let queue = self.clone();
        let job_id = job.id.clone();
        tokio::spawn(async move {
            queue.run_job(&job_id, &user_id, &email).await;
        });

        job
    }

    async fn run_job(&self, job_id: &str, user_id: &str, email: &str) {
        let semaphore = self.semaphore.read().await.clone();
        let _permit = match semaphore.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        self.update_job(job_id, |job| job.status = BackupJobStatus::Active)
            .await;

        match self.backup_mailbox(user_id, email).await {
            Ok((stored, skipped)) => {
                info!(
                    "Backup of {} finished: {} stored, {} duplicates",
                    email, stored, skipped
                );
                self.update_job(job_id, |job| {
                    job.status = BackupJobStatus::Completed;
                    job.stored = stored;
                    job.skipped = skipped;
                    job.finished_at = Some(now_rfc3339());
                })
                .await;
            }
            Err(e) => {
                error!("Backup of {} failed: {}", email, e);
                self.update_job(job_id, |job| {
                    job.status = BackupJobStatus::Failed;
                    job.error = Some(e.to_string());
                    job.finished_at = Some(now_rfc3339());
                })
                .await;
            }
        }
    }

    async fn backup_mailbox(&self, user_id: &str, email: &str) -> anyhow::Result<(u64, u64)> {
        let messages = self.provider.fetch_messages(email).await?;

        let mut stored = 0u64;
        let mut skipped = 0u64;
        for raw in &messages {
            match self.store.ingest(user_id, email, "INBOX", raw).await? {
                IngestOutcome::Stored(_) => stored += 1,
                IngestOutcome::Duplicate => skipped += 1,
            }
        }

        sqlx::query(&self.db.sql("UPDATE users SET last_backup_at = ? WHERE id = ?"))
            .bind(now_rfc3339())
            .bind(user_id)
            .execute(self.db.pool())
            .await?;

        Ok((stored, skipped))
    }

    async fn update_job(&self, job_id: &str, apply: impl FnOnce(&mut BackupJob)) {
        if let Some(job) = self.jobs.write().await.get_mut(job_id) {
            apply(job);
        }
    }

    pub async fn get_job(&self, job_id: &str) -> Option<BackupJob> {
        self.jobs.read().await.get(job_id).cloned()
    }

    pub async fn counters(&self) -> QueueCounters {
        let jobs = self.jobs.read().await;
        let mut counters = QueueCounters::default();
        for job in jobs.values() {
            match job.status {
                BackupJobStatus::Waiting => counters.waiting += 1,
                BackupJobStatus::Active => counters.active += 1,
                BackupJobStatus::Completed => counters.completed += 1,
                BackupJobStatus::Failed => counters.failed += 1,
            }
        }
        counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Dialect;
    use crate::provider::MockMailProvider;
    use tempfile::TempDir;

    async fn setup(provider: MockMailProvider) -> (TempDir, Arc<BackupQueue>, String) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("q.db").display());
        let db = Db::connect_url(Dialect::Sqlite, &url).await.unwrap();
        db.init_schema().await.unwrap();

        let user_id = Uuid::new_v4().to_string();
        sqlx::query(&db.sql(
            "INSERT INTO users (id, domain_id, email, status, connected, created_at) \
             VALUES (?, ?, ?, ?, 1, ?)",
        ))
        .bind(&user_id)
        .bind("d1")
        .bind("user@example.com")
        .bind("active")
        .bind(now_rfc3339())
        .execute(db.pool())
        .await
        .unwrap();

        let store = MessageStore::new(db.clone(), dir.path().join("archive"));
        store.init().unwrap();

        let queue = Arc::new(BackupQueue::new(db, store, Arc::new(provider)));
        (dir, queue, user_id)
    }

    async fn wait_done(queue: &BackupQueue, job_id: &str) -> BackupJob {
        for _ in 0..100 {
            let job = queue.get_job(job_id).await.unwrap();
            if matches!(
                job.status,
                BackupJobStatus::Completed | BackupJobStatus::Failed
            ) {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job never finished");
    }

    #[tokio::test]
    async fn test_enqueue_stores_messages_and_stamps_user() {
        let mut provider = MockMailProvider::new();
        provider.expect_fetch_messages().returning(|_| {
            Ok(vec![
                b"Message-ID: <a@x>\r\nSubject: one\r\n\r\nhello".to_vec(),
                b"Message-ID: <b@x>\r\nSubject: two\r\n\r\nworld".to_vec(),
                b"Message-ID: <a@x>\r\nSubject: one\r\n\r\nhello".to_vec(),
            ])
        });

        let (_dir, queue, user_id) = setup(provider).await;
        let job = queue.enqueue_user(&user_id).await.unwrap();
        let job = wait_done(&queue, &job.id).await;

        assert_eq!(job.status, BackupJobStatus::Completed);
        assert_eq!(job.stored, 2);
        assert_eq!(job.skipped, 1);

        let (stamp,): (Option<String>,) = sqlx::query_as(
            &queue
                .db
                .sql("SELECT last_backup_at FROM users WHERE id = ?"),
        )
        .bind(&user_id)
        .fetch_one(queue.db.pool())
        .await
        .unwrap();
        assert!(stamp.is_some());

        let counters = queue.counters().await;
        assert_eq!(counters.completed, 1);
        assert_eq!(counters.failed, 0);
    }

    #[tokio::test]
    async fn test_provider_error_marks_job_failed() {
        let mut provider = MockMailProvider::new();
        provider
            .expect_fetch_messages()
            .returning(|_| Err(anyhow::anyhow!("connection refused")));

        let (_dir, queue, user_id) = setup(provider).await;
        let job = queue.enqueue_user(&user_id).await.unwrap();
        let job = wait_done(&queue, &job.id).await;

        assert_eq!(job.status, BackupJobStatus::Failed);
        assert!(job.error.unwrap().contains("connection refused"));
        assert_eq!(queue.counters().await.failed, 1);
    }

    #[tokio::test]
    async fn test_enqueue_unknown_user() {
        let provider = MockMailProvider::new();
        let (_dir, queue, _user_id) = setup(provider).await;
        assert!(queue.enqueue_user("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_run_all_queues_active_users_only() {
        let mut provider = MockMailProvider::new();
        provider.expect_fetch_messages().returning(|_| Ok(vec![]));

        let (_dir, queue, _user_id) = setup(provider).await;

        sqlx::query(&queue.db.sql(
            "INSERT INTO users (id, domain_id, email, status, connected, created_at) \
             VALUES (?, ?, ?, ?, 0, ?)",
        ))
        .bind("u-paused")
        .bind("d1")
        .bind("paused@example.com")
        .bind("paused")
        .bind(now_rfc3339())
        .execute(queue.db.pool())
        .await
        .unwrap();

        let queued = queue.run_all().await.unwrap();
        assert_eq!(queued, 1);
    }
}
