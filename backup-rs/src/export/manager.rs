//! Export manager
//!
//! Jobs are persisted in the `export_jobs` table so their history survives
//! restarts; the bundling itself runs in background tasks. A bundle is a
//! ZIP of raw EML files, and the Outlook-oriented format additionally
//! carries an import walkthrough.

use crate::archive::MessageStore;
use crate::db::{now_rfc3339, Db};
use crate::error::{BackupError, Result};
use chrono::Utc;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use tracing::{error, info};
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use super::types::*;

const MESSAGES_PER_MINUTE: i64 = 600;
const PROGRESS_FLUSH_EVERY: i64 = 50;

const PST_INSTRUCTIONS: &str = "How to import this archive into Outlook\r\n\
=======================================\r\n\
\r\n\
1. Extract this ZIP archive to a local folder.\r\n\
2. In Outlook, open File > Open & Export > Import/Export.\r\n\
3. Choose \"Import from another program or file\".\r\n\
4. Drag the extracted .eml files into the target Outlook folder,\r\n\
   or use a dedicated EML-to-PST converter for large archives.\r\n\
\r\n\
Messages are numbered in archive order and grouped by source folder.\r\n";

type ExportRow = (
    String,
    String,
    String,
    String,
    String,
    i64,
    i64,
    i64,
    Option<i64>,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    Option<String>,
);

const SELECT_COLUMNS: &str = "id, user_id, filename, format, status, progress, total_messages, \
                              exported_messages, file_size, error, start_date, end_date, \
                              created_at, completed_at";

#[derive(Clone)]
pub struct ExportManager {
    db: Db,
    store: MessageStore,
    export_dir: PathBuf,
}

impl ExportManager {
    pub fn new(db: Db, store: MessageStore, export_dir: PathBuf) -> Self {
        Self {
            db,
            store,
            export_dir,
        }
    }

    pub fn init(&self) -> Result<()> {
        if !self.export_dir.exists() {
            fs::create_dir_all(&self.export_dir)?;
        }
        Ok(())
    }

    /// Create a job and start bundling in the background. The returned job
    /// is still pending; poll it for progress.
    pub async fn create(&self, request: ExportRequest) -> Result<ExportJob> {
        let user: Option<(String,)> =
            sqlx::query_as(&self.db.sql("SELECT email FROM users WHERE id = ?"))
                .bind(&request.user_id)
                .fetch_optional(self.db.pool())
                .await?;

        let Some((email,)) = user else {
            return Err(BackupError::NotFound(format!(
                "user {} not found",
                request.user_id
            )));
        };

        let total = self
            .store
            .count_in_range(
                &request.user_id,
                request.start_date.as_deref(),
                request.end_date.as_deref(),
            )
            .await
            .map_err(|e| BackupError::Export(e.to_string()))?;

        // The job id keeps concurrent bundles for the same mailbox from
        // sharing one output file.
        let id = Uuid::new_v4().to_string();
        let job = ExportJob {
            id: id.clone(),
            user_id: request.user_id.clone(),
            filename: format!(
                "{}_{}_{}.zip",
                email.replace('@', "_"),
                Utc::now().format("%Y%m%d_%H%M%S"),
                &id[..8]
            ),
            format: request.format,
            status: ExportStatus::Pending,
            progress: 0,
            total_messages: total,
            exported_messages: 0,
            file_size: None,
            error: None,
            start_date: request.start_date.clone(),
            end_date: request.end_date.clone(),
            created_at: now_rfc3339(),
            completed_at: None,
            estimated_minutes: estimate_minutes(total),
        };

        sqlx::query(&self.db.sql(
            "INSERT INTO export_jobs (id, user_id, filename, format, status, progress, \
             total_messages, exported_messages, file_size, error, start_date, end_date, \
             created_at, completed_at) VALUES (?, ?, ?, ?, ?, 0, ?, 0, NULL, NULL, ?, ?, ?, NULL)",
        ))
        .bind(&job.id)
        .bind(&job.user_id)
        .bind(&job.filename)
        .bind(job.format.as_str())
        .bind(job.status.as_str())
        .bind(job.total_messages)
        .bind(&job.start_date)
        .bind(&job.end_date)
        .bind(&job.created_at)
        .execute(self.db.pool())
        .await?;

        self.spawn_run(job.id.clone());
        Ok(job)
    }

    fn spawn_run(&self, job_id: String) {
        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.run(&job_id).await {
                error!("Export {} failed: {}", job_id, e);
                let _ = manager.mark_failed(&job_id, &e.to_string()).await;
            }
        });
    }

    async fn run(&self, job_id: &str) -> Result<()> {
        let Some(job) = self.get(job_id).await? else {
            return Err(BackupError::NotFound(format!("export {} not found", job_id)));
        };

        sqlx::query(&self.db.sql("UPDATE export_jobs SET status = ? WHERE id = ?"))
            .bind(ExportStatus::Processing.as_str())
            .bind(job_id)
            .execute(self.db.pool())
            .await?;

        let output_path = self.export_dir.join(&job.filename);
        match self.write_bundle(&job, &output_path).await {
            Ok(exported) => {
                let file_size = fs::metadata(&output_path).map(|m| m.len() as i64)?;
                sqlx::query(&self.db.sql(
                    "UPDATE export_jobs SET status = ?, progress = 100, exported_messages = ?, \
                     file_size = ?, completed_at = ? WHERE id = ?",
                ))
                .bind(ExportStatus::Completed.as_str())
                .bind(exported)
                .bind(file_size)
                .bind(now_rfc3339())
                .bind(job_id)
                .execute(self.db.pool())
                .await?;
                info!(
                    "Export {} completed: {} messages, {} bytes",
                    job_id, exported, file_size
                );
                Ok(())
            }
            Err(e) => {
                let _ = fs::remove_file(&output_path);
                Err(e)
            }
        }
    }

    async fn write_bundle(&self, job: &ExportJob, output_path: &PathBuf) -> Result<i64> {
        let records = self
            .store
            .records_in_range(
                &job.user_id,
                job.start_date.as_deref(),
                job.end_date.as_deref(),
            )
            .await
            .map_err(|e| BackupError::Export(e.to_string()))?;

        let file = File::create(output_path)?;
        let mut zip = ZipWriter::new(file);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        let mut exported = 0i64;
        let total = records.len() as i64;
        for record in &records {
            let content = self
                .store
                .read_raw(record)
                .map_err(|e| BackupError::Export(e.to_string()))?;
            let entry = format!("{}/{:06}.eml", record.folder, exported + 1);
            zip.start_file(&entry, options)
                .map_err(|e| BackupError::Export(e.to_string()))?;
            zip.write_all(&content)?;
            exported += 1;

            if exported % PROGRESS_FLUSH_EVERY == 0 {
                // Never report done before the bundle is sealed
                let progress = (exported * 100 / total.max(1)).min(99);
                sqlx::query(&self.db.sql(
                    "UPDATE export_jobs SET progress = ?, exported_messages = ? WHERE id = ?",
                ))
                .bind(progress)
                .bind(exported)
                .bind(&job.id)
                .execute(self.db.pool())
                .await?;
            }
        }

        if job.format == ExportFormat::Pst {
            zip.start_file("IMPORT_INSTRUCTIONS.txt", options)
                .map_err(|e| BackupError::Export(e.to_string()))?;
            zip.write_all(PST_INSTRUCTIONS.as_bytes())?;
        }

        zip.finish()
            .map_err(|e| BackupError::Export(e.to_string()))?;
        Ok(exported)
    }

    async fn mark_failed(&self, job_id: &str, error: &str) -> Result<()> {
        sqlx::query(&self.db.sql(
            "UPDATE export_jobs SET status = ?, error = ?, completed_at = ? WHERE id = ?",
        ))
        .bind(ExportStatus::Failed.as_str())
        .bind(error)
        .bind(now_rfc3339())
        .bind(job_id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<ExportJob>> {
        let row: Option<ExportRow> = sqlx::query_as(&self.db.sql(&format!(
            "SELECT {} FROM export_jobs WHERE id = ?",
            SELECT_COLUMNS
        )))
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(job_from_row))
    }

    pub async fn list(
        &self,
        status: Option<ExportStatus>,
        user_id: Option<&str>,
        page: i64,
        limit: i64,
    ) -> Result<(Vec<ExportJob>, i64)> {
        let mut conditions = Vec::new();
        let mut binds: Vec<String> = Vec::new();

        if let Some(status) = status {
            conditions.push("status = ?");
            binds.push(status.as_str().to_string());
        }
        if let Some(user_id) = user_id {
            conditions.push("user_id = ?");
            binds.push(user_id.to_string());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        let count_sql = self
            .db
            .sql(&format!("SELECT COUNT(*) FROM export_jobs{}", where_clause));
        let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql);
        for bind in &binds {
            count_query = count_query.bind(bind);
        }
        let (total,) = count_query.fetch_one(self.db.pool()).await?;

        let limit = limit.clamp(1, 200);
        let offset = (page.max(1) - 1) * limit;
        let list_sql = self.db.sql(&format!(
            "SELECT {} FROM export_jobs{} ORDER BY created_at DESC LIMIT ? OFFSET ?",
            SELECT_COLUMNS, where_clause
        ));
        let mut list_query = sqlx::query_as::<_, ExportRow>(&list_sql);
        for bind in &binds {
            list_query = list_query.bind(bind);
        }
        let rows = list_query
            .bind(limit)
            .bind(offset)
            .fetch_all(self.db.pool())
            .await?;

        Ok((rows.into_iter().map(job_from_row).collect(), total))
    }

    /// Remove the job record and its bundle file if present.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let Some(job) = self.get(id).await? else {
            return Ok(false);
        };

        sqlx::query(&self.db.sql("DELETE FROM export_jobs WHERE id = ?"))
            .bind(id)
            .execute(self.db.pool())
            .await?;

        let path = self.export_dir.join(&job.filename);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(true)
    }

    /// Re-run a failed job from scratch. Anything else is rejected.
    pub async fn retry(&self, id: &str) -> Result<ExportJob> {
        let Some(job) = self.get(id).await? else {
            return Err(BackupError::NotFound(format!("export {} not found", id)));
        };
        if job.status != ExportStatus::Failed {
            return Err(BackupError::InvalidRequest(
                "only failed exports can be retried".to_string(),
            ));
        }

        sqlx::query(&self.db.sql(
            "UPDATE export_jobs SET status = ?, progress = 0, exported_messages = 0, \
             file_size = NULL, error = NULL, completed_at = NULL WHERE id = ?",
        ))
        .bind(ExportStatus::Pending.as_str())
        .bind(id)
        .execute(self.db.pool())
        .await?;

        self.spawn_run(id.to_string());
        self.get(id).await?.ok_or_else(|| {
            BackupError::NotFound(format!("export {} not found", id))
        })
    }

    /// Resolve the bundle path of a completed job.
    pub async fn download(&self, id: &str) -> Result<(ExportJob, PathBuf)> {
        let Some(job) = self.get(id).await? else {
            return Err(BackupError::NotFound(format!("export {} not found", id)));
        };
        if job.status != ExportStatus::Completed {
            return Err(BackupError::InvalidRequest(
                "export is not completed".to_string(),
            ));
        }

        let path = self.export_dir.join(&job.filename);
        if !path.exists() {
            return Err(BackupError::NotFound(
                "export file is missing on disk".to_string(),
            ));
        }
        Ok((job, path))
    }

    pub async fn stats(&self) -> Result<ExportStats> {
        let rows: Vec<(String, i64, Option<i64>, Option<i64>)> = sqlx::query_as(&self.db.sql(
            "SELECT status, COUNT(*), SUM(exported_messages), SUM(file_size) \
             FROM export_jobs GROUP BY status",
        ))
        .fetch_all(self.db.pool())
        .await?;

        let mut stats = ExportStats::default();
        for (status, count, messages, bytes) in rows {
            stats.total_jobs += count;
            match ExportStatus::from_str(&status) {
                ExportStatus::Pending => stats.pending += count,
                ExportStatus::Processing => stats.processing += count,
                ExportStatus::Completed => {
                    stats.completed += count;
                    stats.messages_exported += messages.unwrap_or(0);
                    stats.bytes_exported += bytes.unwrap_or(0);
                }
                ExportStatus::Failed => stats.failed += count,
            }
        }
        Ok(stats)
    }

}

fn estimate_minutes(total_messages: i64) -> i64 {
    (total_messages / MESSAGES_PER_MINUTE).max(1)
}

fn job_from_row(row: ExportRow) -> ExportJob {
    let (
        id,
        user_id,
        filename,
        format,
        status,
        progress,
        total_messages,
        exported_messages,
        file_size,
        error,
        start_date,
        end_date,
        created_at,
        completed_at,
    ) = row;

    ExportJob {
        id,
        user_id,
        filename,
        format: ExportFormat::from_str(&format).unwrap_or(ExportFormat::Eml),
        status: ExportStatus::from_str(&status),
        progress,
        total_messages,
        exported_messages,
        file_size,
        error,
        start_date,
        end_date,
        created_at,
        completed_at,
        estimated_minutes: estimate_minutes(total_messages),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Dialect;

    async fn setup() -> (tempfile::TempDir, ExportManager, String) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("e.db").display());
        let db = Db::connect_url(Dialect::Sqlite, &url).await.unwrap();
        db.init_schema().await.unwrap();

        let user_id = Uuid::new_v4().to_string();
        sqlx::query(&db.sql(
            "INSERT INTO users (id, domain_id, email, status, connected, created_at) \
             VALUES (?, ?, ?, ?, 1, ?)",
        ))
        .bind(&user_id)
        .bind("d1")
        .bind("exports@example.com")
        .bind("active")
        .bind(now_rfc3339())
        .execute(db.pool())
        .await
        .unwrap();

        let store = MessageStore::new(db.clone(), dir.path().join("archive"));
        store.init().unwrap();
        let manager = ExportManager::new(db, store, dir.path().join("exports"));
        manager.init().unwrap();
        (dir, manager, user_id)
    }

    async fn ingest_sample(manager: &ExportManager, user_id: &str, n: usize) {
        for i in 0..n {
            let raw = format!(
                "Message-ID: <m{}@example.com>\r\nSubject: msg {}\r\n\
                 Date: Mon, 1 Jul 2024 10:0{}:00 +0000\r\n\r\nbody {}",
                i, i, i, i
            );
            manager
                .store
                .ingest(user_id, "exports@example.com", "INBOX", raw.as_bytes())
                .await
                .unwrap();
        }
    }

    async fn wait_done(manager: &ExportManager, id: &str) -> ExportJob {
        for _ in 0..200 {
            let job = manager.get(id).await.unwrap().unwrap();
            if matches!(job.status, ExportStatus::Completed | ExportStatus::Failed) {
                return job;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("export never finished");
    }

    #[tokio::test]
    async fn test_eml_export_lifecycle() {
        let (_dir, manager, user_id) = setup().await;
        ingest_sample(&manager, &user_id, 3).await;

        let job = manager
            .create(ExportRequest {
                user_id: user_id.clone(),
                format: ExportFormat::Eml,
                start_date: None,
                end_date: None,
            })
            .await
            .unwrap();
        assert_eq!(job.total_messages, 3);
        assert_eq!(job.estimated_minutes, 1);

        let done = wait_done(&manager, &job.id).await;
        assert_eq!(done.status, ExportStatus::Completed);
        assert_eq!(done.progress, 100);
        assert_eq!(done.exported_messages, 3);
        assert!(done.file_size.unwrap() > 0);
        assert!(done.completed_at.is_some());

        let (_, path) = manager.download(&job.id).await.unwrap();
        let archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        assert_eq!(archive.len(), 3);
    }

    #[tokio::test]
    async fn test_pst_bundle_includes_instructions() {
        let (_dir, manager, user_id) = setup().await;
        ingest_sample(&manager, &user_id, 2).await;

        let job = manager
            .create(ExportRequest {
                user_id,
                format: ExportFormat::Pst,
                start_date: None,
                end_date: None,
            })
            .await
            .unwrap();
        let done = wait_done(&manager, &job.id).await;
        assert_eq!(done.status, ExportStatus::Completed);

        let (_, path) = manager.download(&job.id).await.unwrap();
        let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        assert!(archive.by_name("IMPORT_INSTRUCTIONS.txt").is_ok());
    }

    #[tokio::test]
    async fn test_date_range_narrows_export() {
        let (_dir, manager, user_id) = setup().await;
        ingest_sample(&manager, &user_id, 5).await;

        let job = manager
            .create(ExportRequest {
                user_id,
                format: ExportFormat::Eml,
                start_date: Some("2024-07-01T10:02:00+00:00".to_string()),
                end_date: Some("2024-07-01T10:03:00+00:00".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(job.total_messages, 2);

        let done = wait_done(&manager, &job.id).await;
        assert_eq!(done.exported_messages, 2);
    }

    #[tokio::test]
    async fn test_retry_only_failed_and_download_only_completed() {
        let (_dir, manager, user_id) = setup().await;
        ingest_sample(&manager, &user_id, 1).await;

        let job = manager
            .create(ExportRequest {
                user_id,
                format: ExportFormat::Eml,
                start_date: None,
                end_date: None,
            })
            .await
            .unwrap();
        let done = wait_done(&manager, &job.id).await;
        assert_eq!(done.status, ExportStatus::Completed);

        // Completed jobs cannot be retried
        assert!(manager.retry(&job.id).await.is_err());

        // Force a failure and retry it
        manager.mark_failed(&job.id, "boom").await.unwrap();
        assert!(manager.download(&job.id).await.is_err());
        let retried = manager.retry(&job.id).await.unwrap();
        assert!(retried.error.is_none());
        let done = wait_done(&manager, &job.id).await;
        assert_eq!(done.status, ExportStatus::Completed);
    }

    #[tokio::test]
    async fn test_concurrent_exports_keep_separate_bundles() {
        let (_dir, manager, user_id) = setup().await;
        ingest_sample(&manager, &user_id, 2).await;

        let request = || ExportRequest {
            user_id: user_id.clone(),
            format: ExportFormat::Eml,
            start_date: None,
            end_date: None,
        };
        let first = manager.create(request()).await.unwrap();
        let second = manager.create(request()).await.unwrap();
        assert_ne!(first.filename, second.filename);

        wait_done(&manager, &first.id).await;
        wait_done(&manager, &second.id).await;

        // Deleting one job must not take the other job's bundle with it
        assert!(manager.delete(&first.id).await.unwrap());
        let (_, path) = manager.download(&second.id).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_list_filter_and_delete() {
        let (_dir, manager, user_id) = setup().await;
        ingest_sample(&manager, &user_id, 1).await;

        let job = manager
            .create(ExportRequest {
                user_id: user_id.clone(),
                format: ExportFormat::Eml,
                start_date: None,
                end_date: None,
            })
            .await
            .unwrap();
        wait_done(&manager, &job.id).await;

        let (jobs, total) = manager
            .list(Some(ExportStatus::Completed), Some(&user_id), 1, 20)
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(jobs[0].id, job.id);

        let (_, none) = manager
            .list(Some(ExportStatus::Failed), None, 1, 20)
            .await
            .unwrap();
        assert_eq!(none, 0);

        let stats = manager.stats().await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.messages_exported, 1);

        assert!(manager.delete(&job.id).await.unwrap());
        assert!(manager.get(&job.id).await.unwrap().is_none());
        assert!(!manager.delete(&job.id).await.unwrap());
    }
}
