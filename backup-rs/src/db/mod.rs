//! Database access layer
//!
//! One binary serves MySQL, PostgreSQL or SQLite. The backend is chosen once
//! at startup from the configuration; `Dialect` holds everything that differs
//! between them (placeholder syntax, the odd DDL detail) so the rest of the
//! crate writes portable SQL with `?` placeholders.

use crate::config::DatabaseConfig;
use crate::error::{BackupError, Result};
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use tracing::info;

/// Supported database backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    MySql,
    Postgres,
    Sqlite,
}

impl Dialect {
    pub fn from_db_type(db_type: &str) -> Result<Self> {
        match db_type {
            "mysql" => Ok(Self::MySql),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(BackupError::Config(format!(
                "unsupported DB_TYPE: {}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }

    /// Rewrite `?` placeholders to the backend's syntax. MySQL and SQLite
    /// take `?` as-is; PostgreSQL wants `$1`, `$2`, ...
    pub fn sql(&self, query: &str) -> String {
        match self {
            Self::Postgres => {
                let mut out = String::with_capacity(query.len() + 8);
                let mut n = 0;
                for ch in query.chars() {
                    if ch == '?' {
                        n += 1;
                        out.push('$');
                        out.push_str(&n.to_string());
                    } else {
                        out.push(ch);
                    }
                }
                out
            }
            _ => query.to_string(),
        }
    }
}

/// Connection pool plus the dialect it was opened with
#[derive(Clone)]
pub struct Db {
    pool: AnyPool,
    dialect: Dialect,
}

impl Db {
    /// Connect using the configured backend.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let dialect = Dialect::from_db_type(&config.db_type)?;
        Self::connect_url(dialect, &config.url()).await
    }

    pub async fn connect_url(dialect: Dialect, url: &str) -> Result<Self> {
        sqlx::any::install_default_drivers();

        let pool = AnyPoolOptions::new().max_connections(5).connect(url).await?;

        info!("Connected to {} database", dialect.as_str());
        Ok(Self { pool, dialect })
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Placeholder-adjusted SQL for this connection's backend.
    pub fn sql(&self, query: &str) -> String {
        self.dialect.sql(query)
    }

    /// Verify connectivity.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Create all tables if they do not exist yet. Idempotent; safe to run
    /// from every binary on startup. Ids are UUID strings and timestamps are
    /// RFC 3339 text so the schema is identical across the three backends.
    pub async fn init_schema(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS admin_users (
                id VARCHAR(64) PRIMARY KEY,
                username VARCHAR(190) NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                role VARCHAR(32) NOT NULL,
                last_login VARCHAR(64),
                created_at VARCHAR(64) NOT NULL,
                CONSTRAINT chk_admin_role CHECK (role IN ('viewer', 'admin', 'super_admin'))
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS auth_failures (
                username VARCHAR(190) NOT NULL,
                attempt_time VARCHAR(64) NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS domains (
                id VARCHAR(64) PRIMARY KEY,
                name VARCHAR(190) NOT NULL UNIQUE,
                description TEXT,
                enabled INTEGER NOT NULL,
                created_at VARCHAR(64) NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id VARCHAR(64) PRIMARY KEY,
                domain_id VARCHAR(64) NOT NULL,
                email VARCHAR(190) NOT NULL UNIQUE,
                status VARCHAR(16) NOT NULL,
                connected INTEGER NOT NULL,
                last_backup_at VARCHAR(64),
                created_at VARCHAR(64) NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS emails (
                id VARCHAR(64) PRIMARY KEY,
                user_id VARCHAR(64) NOT NULL,
                message_id VARCHAR(255),
                folder VARCHAR(128) NOT NULL,
                subject TEXT,
                sender VARCHAR(255),
                recipient TEXT,
                date VARCHAR(64),
                size BIGINT NOT NULL,
                path TEXT NOT NULL,
                created_at VARCHAR(64) NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS export_jobs (
                id VARCHAR(64) PRIMARY KEY,
                user_id VARCHAR(64) NOT NULL,
                filename VARCHAR(255) NOT NULL,
                format VARCHAR(8) NOT NULL,
                status VARCHAR(16) NOT NULL,
                progress BIGINT NOT NULL,
                total_messages BIGINT NOT NULL,
                exported_messages BIGINT NOT NULL,
                file_size BIGINT,
                error TEXT,
                start_date VARCHAR(64),
                end_date VARCHAR(64),
                created_at VARCHAR(64) NOT NULL,
                completed_at VARCHAR(64)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS backup_config (
                id BIGINT PRIMARY KEY,
                enabled INTEGER NOT NULL,
                interval_minutes BIGINT NOT NULL,
                max_concurrent_users BIGINT NOT NULL,
                batch_size BIGINT NOT NULL,
                batch_delay_ms BIGINT NOT NULL,
                updated_at VARCHAR(64) NOT NULL
            )
            "#,
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }
}

/// Current time as the RFC 3339 text stored in every timestamp column.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
