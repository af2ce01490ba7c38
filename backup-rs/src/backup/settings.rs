//! The single `backup_config` row
//!
//! Seeded from the configuration file on first run; afterwards edited
//! through the API and read by the scheduler.

use crate::config::BackupDefaults;
use crate::db::{now_rfc3339, Db};
use crate::error::{BackupError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSettings {
    pub enabled: bool,
    pub interval_minutes: i64,
    pub max_concurrent_users: i64,
    pub batch_size: i64,
    pub batch_delay_ms: i64,
    pub updated_at: String,
}

impl BackupSettings {
    pub async fn load(db: &Db) -> Result<Option<Self>> {
        let row: Option<(i64, i64, i64, i64, i64, String)> = sqlx::query_as(&db.sql(
            "SELECT enabled, interval_minutes, max_concurrent_users, batch_size, \
             batch_delay_ms, updated_at FROM backup_config WHERE id = 1",
        ))
        .fetch_optional(db.pool())
        .await?;

        Ok(row.map(
            |(enabled, interval, max_concurrent, batch_size, batch_delay, updated_at)| Self {
                enabled: enabled != 0,
                interval_minutes: interval,
                max_concurrent_users: max_concurrent,
                batch_size,
                batch_delay_ms: batch_delay,
                updated_at,
            },
        ))
    }

    /// Load the row, inserting the configured defaults when missing.
    pub async fn load_or_seed(db: &Db, defaults: &BackupDefaults) -> Result<Self> {
        if let Some(settings) = Self::load(db).await? {
            return Ok(settings);
        }

        let settings = Self {
            enabled: defaults.enabled,
            interval_minutes: defaults.interval_minutes,
            max_concurrent_users: defaults.max_concurrent_users,
            batch_size: defaults.batch_size,
            batch_delay_ms: defaults.batch_delay_ms,
            updated_at: now_rfc3339(),
        };

        sqlx::query(&db.sql(
            "INSERT INTO backup_config (id, enabled, interval_minutes, max_concurrent_users, \
             batch_size, batch_delay_ms, updated_at) VALUES (1, ?, ?, ?, ?, ?, ?)",
        ))
        .bind(settings.enabled as i64)
        .bind(settings.interval_minutes)
        .bind(settings.max_concurrent_users)
        .bind(settings.batch_size)
        .bind(settings.batch_delay_ms)
        .bind(&settings.updated_at)
        .execute(db.pool())
        .await?;

        Ok(settings)
    }

    /// Persist new values. Limits must be positive.
    pub async fn save(&mut self, db: &Db) -> Result<()> {
        if self.max_concurrent_users < 1 || self.batch_size < 1 || self.interval_minutes < 1 {
            return Err(BackupError::InvalidRequest(
                "backup limits must be positive".to_string(),
            ));
        }
        if self.batch_delay_ms < 0 {
            return Err(BackupError::InvalidRequest(
                "batch delay must not be negative".to_string(),
            ));
        }

        self.updated_at = now_rfc3339();

        sqlx::query(&db.sql(
            "UPDATE backup_config SET enabled = ?, interval_minutes = ?, \
             max_concurrent_users = ?, batch_size = ?, batch_delay_ms = ?, updated_at = ? \
             WHERE id = 1",
        ))
        .bind(self.enabled as i64)
        .bind(self.interval_minutes)
        .bind(self.max_concurrent_users)
        .bind(self.batch_size)
        .bind(self.batch_delay_ms)
        .bind(&self.updated_at)
        .execute(db.pool())
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Dialect;

    #[tokio::test]
    async fn test_seed_then_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("s.db").display());
        let db = Db::connect_url(Dialect::Sqlite, &url).await.unwrap();
        db.init_schema().await.unwrap();

        let defaults = crate::config::Config::default().backup;
        let mut settings = BackupSettings::load_or_seed(&db, &defaults).await.unwrap();
        assert!(!settings.enabled);

        settings.enabled = true;
        settings.batch_size = 25;
        settings.save(&db).await.unwrap();

        let reloaded = BackupSettings::load(&db).await.unwrap().unwrap();
        assert!(reloaded.enabled);
        assert_eq!(reloaded.batch_size, 25);

        // Seeding again does not clobber saved values
        let seeded = BackupSettings::load_or_seed(&db, &defaults).await.unwrap();
        assert_eq!(seeded.batch_size, 25);
    }

    #[tokio::test]
    async fn test_save_rejects_bad_limits() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("s.db").display());
        let db = Db::connect_url(Dialect::Sqlite, &url).await.unwrap();
        db.init_schema().await.unwrap();

        let defaults = crate::config::Config::default().backup;
        let mut settings = BackupSettings::load_or_seed(&db, &defaults).await.unwrap();
        settings.max_concurrent_users = 0;
        assert!(settings.save(&db).await.is_err());
    }
}
