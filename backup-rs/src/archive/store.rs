//! On-disk message archive with a relational index
//!
//! Raw RFC 822 messages are stored one file per message under
//! `<root>/<user-email>/<uuid>.eml`; the `emails` table carries the
//! searchable metadata and the file path. Duplicate ingests (same
//! Message-ID for the same user) are skipped.

use crate::archive::mime::{self, MessagePart};
use crate::db::{now_rfc3339, Db};
use anyhow::Result;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};
use uuid::Uuid;

/// An indexed message
#[derive(Debug, Clone, serde::Serialize)]
pub struct EmailRecord {
    pub id: String,
    pub user_id: String,
    pub message_id: Option<String>,
    pub folder: String,
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub recipient: Option<String>,
    pub date: Option<String>,
    pub size: i64,
    #[serde(skip)]
    pub path: String,
    pub created_at: String,
}

/// Result of ingesting one raw message
#[derive(Debug)]
pub enum IngestOutcome {
    Stored(EmailRecord),
    /// Same Message-ID already archived for this user
    Duplicate,
}

/// Search filters, all optional except pagination
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub user_id: Option<String>,
    /// Substring match on subject or sender
    pub q: Option<String>,
    pub folder: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub page: i64,
    pub limit: i64,
}

type EmailRow = (
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    i64,
    String,
    String,
);

const SELECT_COLUMNS: &str = "id, user_id, message_id, folder, subject, sender, recipient, \
                              date, size, path, created_at";

#[derive(Clone)]
pub struct MessageStore {
    db: Db,
    root: PathBuf,
}

impl MessageStore {
    pub fn new(db: Db, root: PathBuf) -> Self {
        Self { db, root }
    }

    pub fn init(&self) -> Result<()> {
        if !self.root.exists() {
            fs::create_dir_all(&self.root)?;
        }
        Ok(())
    }

    /// Archive one raw message for a user. Parses the headers for the index
    /// and writes the message untouched to disk.
    pub async fn ingest(
        &self,
        user_id: &str,
        user_email: &str,
        folder: &str,
        raw: &[u8],
    ) -> Result<IngestOutcome> {
        let headers = mime::parse_headers(raw);
        let message_id = headers.get("message-id").map(|v| v.trim().to_string());

        if let Some(ref mid) = message_id {
            let existing: Option<(String,)> = sqlx::query_as(
                &self
                    .db
                    .sql("SELECT id FROM emails WHERE user_id = ? AND message_id = ?"),
            )
            .bind(user_id)
            .bind(mid)
            .fetch_optional(self.db.pool())
            .await?;

            if existing.is_some() {
                debug!("Skipping duplicate message {} for {}", mid, user_email);
                return Ok(IngestOutcome::Duplicate);
            }
        }

        let user_dir = self.root.join(user_email);
        fs::create_dir_all(&user_dir)?;

        let id = Uuid::new_v4().to_string();
        let path = user_dir.join(format!("{}.eml", id));
        fs::write(&path, raw)?;

        let date = headers
            .get("date")
            .and_then(|v| chrono::DateTime::parse_from_rfc2822(v.trim()).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc).to_rfc3339());

        let record = EmailRecord {
            id: id.clone(),
            user_id: user_id.to_string(),
            message_id,
            folder: folder.to_string(),
            subject: headers.get("subject").cloned(),
            sender: headers.get("from").map(|v| mime::address_of(v)),
            recipient: headers.get("to").cloned(),
            date,
            size: raw.len() as i64,
            path: path.to_string_lossy().to_string(),
            created_at: now_rfc3339(),
        };

        sqlx::query(&self.db.sql(
            "INSERT INTO emails (id, user_id, message_id, folder, subject, sender, recipient, \
             date, size, path, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        ))
        .bind(&record.id)
        .bind(&record.user_id)
        .bind(&record.message_id)
        .bind(&record.folder)
        .bind(&record.subject)
        .bind(&record.sender)
        .bind(&record.recipient)
        .bind(&record.date)
        .bind(record.size)
        .bind(&record.path)
        .bind(&record.created_at)
        .execute(self.db.pool())
        .await?;

        Ok(IngestOutcome::Stored(record))
    }

    /// Filtered, paginated search over the index. Returns the page and the
    /// total number of matching rows.
    pub async fn search(&self, query: &SearchQuery) -> Result<(Vec<EmailRecord>, i64)> {
        let mut conditions = Vec::new();
        let mut binds: Vec<String> = Vec::new();

        if let Some(ref user_id) = query.user_id {
            conditions.push("user_id = ?");
            binds.push(user_id.clone());
        }
        if let Some(ref q) = query.q {
            conditions.push("(subject LIKE ? OR sender LIKE ?)");
            let pattern = format!("%{}%", q);
            binds.push(pattern.clone());
            binds.push(pattern);
        }
        if let Some(ref folder) = query.folder {
            conditions.push("folder = ?");
            binds.push(folder.clone());
        }
        if let Some(ref from) = query.date_from {
            conditions.push("date >= ?");
            binds.push(from.clone());
        }
        if let Some(ref to) = query.date_to {
            conditions.push("date <= ?");
            binds.push(to.clone());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        let count_sql = self
            .db
            .sql(&format!("SELECT COUNT(*) FROM emails{}", where_clause));
        let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql);
        for bind in &binds {
            count_query = count_query.bind(bind);
        }
        let (total,) = count_query.fetch_one(self.db.pool()).await?;

        let limit = query.limit.clamp(1, 500);
        let page = query.page.max(1);
        let offset = (page - 1) * limit;

        let select_sql = self.db.sql(&format!(
            "SELECT {} FROM emails{} ORDER BY date DESC LIMIT {} OFFSET {}",
            SELECT_COLUMNS, where_clause, limit, offset
        ));
        let mut select_query = sqlx::query_as::<_, EmailRow>(&select_sql);
        for bind in &binds {
            select_query = select_query.bind(bind);
        }
        let rows = select_query.fetch_all(self.db.pool()).await?;

        Ok((rows.into_iter().map(record_from_row).collect(), total))
    }

    /// All records for a user inside an optional inclusive date range,
    /// oldest first. Used when bundling a mailbox.
    pub async fn records_in_range(
        &self,
        user_id: &str,
        date_from: Option<&str>,
        date_to: Option<&str>,
    ) -> Result<Vec<EmailRecord>> {
        let (where_clause, binds) = range_filter(user_id, date_from, date_to);

        let sql = self.db.sql(&format!(
            "SELECT {} FROM emails WHERE {} ORDER BY date, id",
            SELECT_COLUMNS, where_clause
        ));
        let mut query = sqlx::query_as::<_, EmailRow>(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let rows = query.fetch_all(self.db.pool()).await?;

        Ok(rows.into_iter().map(record_from_row).collect())
    }

    pub async fn count_in_range(
        &self,
        user_id: &str,
        date_from: Option<&str>,
        date_to: Option<&str>,
    ) -> Result<i64> {
        let (where_clause, binds) = range_filter(user_id, date_from, date_to);

        let sql = self
            .db
            .sql(&format!("SELECT COUNT(*) FROM emails WHERE {}", where_clause));
        let mut query = sqlx::query_as::<_, (i64,)>(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let (count,) = query.fetch_one(self.db.pool()).await?;
        Ok(count)
    }

    pub async fn get(&self, id: &str) -> Result<Option<EmailRecord>> {
        let row = sqlx::query_as::<_, EmailRow>(&self.db.sql(&format!(
            "SELECT {} FROM emails WHERE id = ?",
            SELECT_COLUMNS
        )))
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(record_from_row))
    }

    /// Raw message bytes for an indexed record.
    pub fn read_raw(&self, record: &EmailRecord) -> Result<Vec<u8>> {
        Ok(fs::read(&record.path)?)
    }

    /// Decode attachment `index` of a message.
    pub async fn attachment(&self, id: &str, index: usize) -> Result<Option<MessagePart>> {
        let Some(record) = self.get(id).await? else {
            return Ok(None);
        };

        let raw = self.read_raw(&record)?;
        let message = mime::parse_message(&raw);

        Ok(message.attachments.into_iter().nth(index))
    }

    /// Delete one message: index row and archived file.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let Some(record) = self.get(id).await? else {
            return Ok(false);
        };

        sqlx::query(&self.db.sql("DELETE FROM emails WHERE id = ?"))
            .bind(id)
            .execute(self.db.pool())
            .await?;
        let _ = fs::remove_file(&record.path);

        Ok(true)
    }

    pub async fn delete_bulk(&self, ids: &[String]) -> Result<u64> {
        let mut deleted = 0;
        for id in ids {
            if self.delete(id).await? {
                deleted += 1;
            }
        }
        info!("Bulk-deleted {} messages", deleted);
        Ok(deleted)
    }

    /// Remove every archived message of a user (used when the mailbox row is
    /// deleted).
    pub async fn delete_for_user(&self, user_id: &str) -> Result<u64> {
        let rows = sqlx::query_as::<_, (String,)>(
            &self.db.sql("SELECT path FROM emails WHERE user_id = ?"),
        )
        .bind(user_id)
        .fetch_all(self.db.pool())
        .await?;

        for (path,) in &rows {
            let _ = fs::remove_file(path);
        }

        let result = sqlx::query(&self.db.sql("DELETE FROM emails WHERE user_id = ?"))
            .bind(user_id)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected())
    }

    /// Message count and total archived bytes for a user.
    pub async fn user_stats(&self, user_id: &str) -> Result<(i64, i64)> {
        let row: (i64, Option<i64>) = sqlx::query_as(
            &self
                .db
                .sql("SELECT COUNT(*), SUM(size) FROM emails WHERE user_id = ?"),
        )
        .bind(user_id)
        .fetch_one(self.db.pool())
        .await?;

        Ok((row.0, row.1.unwrap_or(0)))
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }
}

fn range_filter(
    user_id: &str,
    date_from: Option<&str>,
    date_to: Option<&str>,
) -> (String, Vec<String>) {
    let mut where_clause = String::from("user_id = ?");
    let mut binds = vec![user_id.to_string()];
    if let Some(from) = date_from {
        where_clause.push_str(" AND date >= ?");
        binds.push(from.to_string());
    }
    if let Some(to) = date_to {
        where_clause.push_str(" AND date <= ?");
        binds.push(to.to_string());
    }
    (where_clause, binds)
}

fn record_from_row(row: EmailRow) -> EmailRecord {
    let (id, user_id, message_id, folder, subject, sender, recipient, date, size, path, created_at) =
        row;
    EmailRecord {
        id,
        user_id,
        message_id,
        folder,
        subject,
        sender,
        recipient,
        date,
        size,
        path,
        created_at,
    }
}
