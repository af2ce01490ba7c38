//! Admin account management
//!
//! Credentials live in the `admin_users` table; passwords are hashed with
//! Argon2. Failed logins are recorded in `auth_failures` for auditing.

use crate::db::{now_rfc3339, Db};
use crate::error::{BackupError, Result};
use crate::security::Role;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Username created by the bootstrap binary when no admin exists.
pub const DEFAULT_ADMIN_USERNAME: &str = "admin";
/// Initial password for a freshly created bootstrap account. Only ever
/// written for brand-new rows; existing passwords are never overwritten.
pub const DEFAULT_ADMIN_PASSWORD: &str = "changeme";

/// An administrator account row
#[derive(Debug, Clone, serde::Serialize)]
pub struct AdminUser {
    pub id: String,
    pub username: String,
    pub role: Role,
    pub last_login: Option<String>,
    pub created_at: String,
}

/// Result of the idempotent super-admin bootstrap
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// A super admin already existed; nothing was changed
    AlreadyPresent,
    /// No admins existed; the default account was created
    Created,
    /// Admins existed but none was super_admin; the oldest was promoted.
    /// Its password is left untouched.
    Promoted(String),
}

#[derive(Clone)]
pub struct Authenticator {
    db: Db,
}

impl Authenticator {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Hash a password with Argon2
    pub fn hash_password(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::default();

        let password_hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| BackupError::Config(format!("Failed to hash password: {}", e)))?;

        Ok(password_hash.to_string())
    }

    fn verify_hash(&self, password: &str, stored_hash: &str) -> Result<bool> {
        let parsed_hash =
            PasswordHash::new(stored_hash).map_err(|_| BackupError::AuthenticationFailed)?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }

    /// Create a new admin account
    pub async fn create_admin(
        &self,
        username: &str,
        password: &str,
        role: Role,
    ) -> Result<AdminUser> {
        info!("Creating admin account: {} ({})", username, role);

        let id = Uuid::new_v4().to_string();
        let password_hash = self.hash_password(password)?;
        let created_at = now_rfc3339();

        sqlx::query(&self.db.sql(
            "INSERT INTO admin_users (id, username, password_hash, role, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        ))
        .bind(&id)
        .bind(username)
        .bind(&password_hash)
        .bind(role.as_str())
        .bind(&created_at)
        .execute(self.db.pool())
        .await?;

        Ok(AdminUser {
            id,
            username: username.to_string(),
            role,
            last_login: None,
            created_at,
        })
    }

    /// Verify credentials. On success updates `last_login` and returns the
    /// account; on failure records an audit row and returns `None`.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<Option<AdminUser>> {
        debug!("Authentication attempt for {}", username);

        let row = sqlx::query_as::<_, (String, String, String, String, Option<String>, String)>(
            &self.db.sql(
                "SELECT id, username, password_hash, role, last_login, created_at \
                 FROM admin_users WHERE username = ?",
            ),
        )
        .bind(username)
        .fetch_optional(self.db.pool())
        .await?;

        let Some((id, username, stored_hash, role, _last_login, created_at)) = row else {
            warn!("Authentication failed: unknown account: {}", username);
            self.record_failure(username).await?;
            return Ok(None);
        };

        if !self.verify_hash(password, &stored_hash)? {
            warn!("Authentication failed: invalid password for {}", username);
            self.record_failure(&username).await?;
            return Ok(None);
        }

        let now = now_rfc3339();
        sqlx::query(
            &self
                .db
                .sql("UPDATE admin_users SET last_login = ? WHERE id = ?"),
        )
        .bind(&now)
        .bind(&id)
        .execute(self.db.pool())
        .await?;

        info!("Authentication successful for {}", username);

        let role = Role::from_str(&role).unwrap_or(Role::Viewer);
        Ok(Some(AdminUser {
            id,
            username,
            role,
            last_login: Some(now),
            created_at,
        }))
    }

    async fn record_failure(&self, username: &str) -> Result<()> {
        sqlx::query(
            &self
                .db
                .sql("INSERT INTO auth_failures (username, attempt_time) VALUES (?, ?)"),
        )
        .bind(username)
        .bind(now_rfc3339())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    pub async fn get_admin(&self, username: &str) -> Result<Option<AdminUser>> {
        let row = sqlx::query_as::<_, (String, String, String, Option<String>, String)>(
            &self.db.sql(
                "SELECT id, username, role, last_login, created_at \
                 FROM admin_users WHERE username = ?",
            ),
        )
        .bind(username)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(admin_from_row))
    }

    pub async fn get_admin_by_id(&self, id: &str) -> Result<Option<AdminUser>> {
        let row = sqlx::query_as::<_, (String, String, String, Option<String>, String)>(
            &self.db.sql(
                "SELECT id, username, role, last_login, created_at \
                 FROM admin_users WHERE id = ?",
            ),
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(admin_from_row))
    }

    pub async fn list_admins(&self) -> Result<Vec<AdminUser>> {
        let rows = sqlx::query_as::<_, (String, String, String, Option<String>, String)>(
            &self.db.sql(
                "SELECT id, username, role, last_login, created_at \
                 FROM admin_users ORDER BY created_at ASC",
            ),
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.into_iter().map(admin_from_row).collect())
    }

    pub async fn delete_admin(&self, id: &str) -> Result<bool> {
        info!("Deleting admin account {}", id);

        let result = sqlx::query(&self.db.sql("DELETE FROM admin_users WHERE id = ?"))
            .bind(id)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Set a new password for an account (super-admin reset; no old-password
    /// check).
    pub async fn reset_password(&self, id: &str, new_password: &str) -> Result<bool> {
        let password_hash = self.hash_password(new_password)?;

        let result = sqlx::query(
            &self
                .db
                .sql("UPDATE admin_users SET password_hash = ? WHERE id = ?"),
        )
        .bind(&password_hash)
        .bind(id)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Change a role. Refuses to demote the last remaining super admin.
    pub async fn update_role(&self, id: &str, role: Role) -> Result<bool> {
        if role < Role::SuperAdmin {
            if let Some(target) = self.get_admin_by_id(id).await? {
                if target.role == Role::SuperAdmin && self.count_super_admins().await? <= 1 {
                    return Err(BackupError::InvalidRequest(
                        "cannot demote the last super admin".to_string(),
                    ));
                }
            }
        }

        let result = sqlx::query(&self.db.sql("UPDATE admin_users SET role = ? WHERE id = ?"))
            .bind(role.as_str())
            .bind(id)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Change a password after verifying the current one.
    pub async fn change_password(
        &self,
        username: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<bool> {
        let row = sqlx::query_as::<_, (String, String)>(
            &self
                .db
                .sql("SELECT id, password_hash FROM admin_users WHERE username = ?"),
        )
        .bind(username)
        .fetch_optional(self.db.pool())
        .await?;

        let Some((id, stored_hash)) = row else {
            return Ok(false);
        };

        if !self.verify_hash(current_password, &stored_hash)? {
            return Ok(false);
        }

        self.reset_password(&id, new_password).await
    }

    pub async fn count_admins(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM admin_users")
            .fetch_one(self.db.pool())
            .await?;
        Ok(count.0)
    }

    pub async fn count_super_admins(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            &self
                .db
                .sql("SELECT COUNT(*) FROM admin_users WHERE role = ?"),
        )
        .bind(Role::SuperAdmin.as_str())
        .fetch_one(self.db.pool())
        .await?;
        Ok(count.0)
    }

    /// Idempotently ensure a super admin exists.
    ///
    /// - no admins at all: create `username` with `password` as super_admin;
    /// - admins exist but none is super_admin: promote the oldest account,
    ///   leaving its password as the operator set it;
    /// - a super admin exists: no-op.
    pub async fn ensure_super_admin(
        &self,
        username: &str,
        password: &str,
    ) -> Result<BootstrapOutcome> {
        if self.count_super_admins().await? > 0 {
            return Ok(BootstrapOutcome::AlreadyPresent);
        }

        if self.count_admins().await? == 0 {
            self.create_admin(username, password, Role::SuperAdmin)
                .await?;
            info!("Bootstrap: created super admin '{}'", username);
            return Ok(BootstrapOutcome::Created);
        }

        let oldest = sqlx::query_as::<_, (String, String)>(&self.db.sql(
            "SELECT id, username FROM admin_users ORDER BY created_at ASC LIMIT 1",
        ))
        .fetch_one(self.db.pool())
        .await?;

        sqlx::query(&self.db.sql("UPDATE admin_users SET role = ? WHERE id = ?"))
            .bind(Role::SuperAdmin.as_str())
            .bind(&oldest.0)
            .execute(self.db.pool())
            .await?;

        info!("Bootstrap: promoted '{}' to super_admin", oldest.1);
        Ok(BootstrapOutcome::Promoted(oldest.1))
    }
}

fn admin_from_row(
    (id, username, role, last_login, created_at): (String, String, String, Option<String>, String),
) -> AdminUser {
    AdminUser {
        id,
        username,
        role: Role::from_str(&role).unwrap_or(Role::Viewer),
        last_login,
        created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Dialect;

    async fn test_db(dir: &tempfile::TempDir) -> Db {
        let url = format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("auth.db").display()
        );
        let db = Db::connect_url(Dialect::Sqlite, &url).await.unwrap();
        db.init_schema().await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_create_and_authenticate() {
        let dir = tempfile::tempdir().unwrap();
        let auth = Authenticator::new(test_db(&dir).await);

        auth.create_admin("ops", "password123", Role::Admin)
            .await
            .unwrap();

        let user = auth.authenticate("ops", "password123").await.unwrap();
        assert!(user.is_some());
        let user = user.unwrap();
        assert_eq!(user.role, Role::Admin);
        assert!(user.last_login.is_some());

        assert!(auth.authenticate("ops", "wrong").await.unwrap().is_none());
        assert!(auth
            .authenticate("nobody", "password123")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_change_password_requires_current() {
        let dir = tempfile::tempdir().unwrap();
        let auth = Authenticator::new(test_db(&dir).await);

        auth.create_admin("ops", "oldpass", Role::Admin)
            .await
            .unwrap();

        assert!(!auth
            .change_password("ops", "wrongold", "newpass")
            .await
            .unwrap());
        assert!(auth
            .change_password("ops", "oldpass", "newpass")
            .await
            .unwrap());
        assert!(auth.authenticate("ops", "newpass").await.unwrap().is_some());
        assert!(auth.authenticate("ops", "oldpass").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bootstrap_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let auth = Authenticator::new(test_db(&dir).await);

        let outcome = auth
            .ensure_super_admin(DEFAULT_ADMIN_USERNAME, DEFAULT_ADMIN_PASSWORD)
            .await
            .unwrap();
        assert_eq!(outcome, BootstrapOutcome::Created);

        let outcome = auth
            .ensure_super_admin(DEFAULT_ADMIN_USERNAME, DEFAULT_ADMIN_PASSWORD)
            .await
            .unwrap();
        assert_eq!(outcome, BootstrapOutcome::AlreadyPresent);

        assert_eq!(auth.count_super_admins().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_bootstrap_promotion_keeps_password() {
        let dir = tempfile::tempdir().unwrap();
        let auth = Authenticator::new(test_db(&dir).await);

        auth.create_admin("ops", "operator-secret", Role::Admin)
            .await
            .unwrap();

        let outcome = auth
            .ensure_super_admin(DEFAULT_ADMIN_USERNAME, DEFAULT_ADMIN_PASSWORD)
            .await
            .unwrap();
        assert_eq!(outcome, BootstrapOutcome::Promoted("ops".to_string()));

        // The operator's password still works and the default was not applied
        let user = auth
            .authenticate("ops", "operator-secret")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.role, Role::SuperAdmin);
        assert!(auth
            .authenticate("ops", DEFAULT_ADMIN_PASSWORD)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_cannot_demote_last_super_admin() {
        let dir = tempfile::tempdir().unwrap();
        let auth = Authenticator::new(test_db(&dir).await);

        let sole = auth
            .create_admin("root", "password", Role::SuperAdmin)
            .await
            .unwrap();

        let err = auth.update_role(&sole.id, Role::Admin).await;
        assert!(err.is_err());

        // With a second super admin the demotion goes through
        auth.create_admin("root2", "password", Role::SuperAdmin)
            .await
            .unwrap();
        assert!(auth.update_role(&sole.id, Role::Admin).await.unwrap());
    }
}
