//! Integration tests for authentication and admin account management

use backup_rs::api::auth::JwtConfig;
use backup_rs::api::handlers::AppState;
use backup_rs::api::ApiServer;
use backup_rs::archive::MessageStore;
use backup_rs::backup::BackupQueue;
use backup_rs::db::{Db, Dialect};
use backup_rs::export::ExportManager;
use backup_rs::provider::MaildirProvider;
use backup_rs::security::{Authenticator, LoginRateLimiter, Role};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    authenticator: Authenticator,
    _dir: TempDir,
}

/// Start a full in-process server on an ephemeral port, without any admin
/// accounts.
async fn start_server() -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let db_url = format!("sqlite://{}?mode=rwc", dir.path().join("api.db").display());
    let db = Db::connect_url(Dialect::Sqlite, &db_url).await.unwrap();
    db.init_schema().await.unwrap();

    let store = MessageStore::new(db.clone(), dir.path().join("archive"));
    store.init().unwrap();
    let exports = ExportManager::new(db.clone(), store.clone(), dir.path().join("exports"));
    exports.init().unwrap();
    let provider = Arc::new(MaildirProvider::new(dir.path().join("incoming")));
    let queue = Arc::new(BackupQueue::new(db.clone(), store.clone(), provider.clone()));
    let authenticator = Authenticator::new(db.clone());

    let state = Arc::new(AppState {
        db,
        authenticator: authenticator.clone(),
        jwt_config: JwtConfig::new("test-secret".to_string(), 1),
        login_limiter: LoginRateLimiter::new(3, 60),
        store,
        exports,
        queue,
        provider,
    });

    let router = ApiServer::new(state, String::new()).router();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    TestServer {
        base_url: format!("http://{}/api", addr),
        client: reqwest::Client::new(),
        authenticator,
        _dir: dir,
    }
}

impl TestServer {
    async fn login(&self, username: &str, password: &str) -> String {
        let resp = self
            .client
            .post(format!("{}/auth/login", self.base_url))
            .json(&json!({"username": username, "password": password}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        body["token"].as_str().unwrap().to_string()
    }
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let server = start_server().await;

    // Public health endpoint works without a token
    let resp = server
        .client
        .get(format!("{}/health", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Missing token
    let resp = server
        .client
        .get(format!("{}/users", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    // Garbage token
    let resp = server
        .client
        .get(format!("{}/users", server.base_url))
        .bearer_auth("not-a-token")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_setup_works_once() {
    let server = start_server().await;

    let resp = server
        .client
        .post(format!("{}/auth/setup", server.base_url))
        .json(&json!({"username": "root", "password": "first-password"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["role"], "super_admin");

    // Any later attempt is refused, even with different credentials
    let resp = server
        .client
        .post(format!("{}/auth/setup", server.base_url))
        .json(&json!({"username": "intruder", "password": "whatever123"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    // The created account can log in
    server.login("root", "first-password").await;
}

#[tokio::test]
async fn test_login_failures_and_lockout() {
    let server = start_server().await;
    server
        .authenticator
        .create_admin("ops", "correct-password", Role::SuperAdmin)
        .await
        .unwrap();

    // Three wrong passwords exhaust the window
    for _ in 0..3 {
        let resp = server
            .client
            .post(format!("{}/auth/login", server.base_url))
            .json(&json!({"username": "ops", "password": "wrong"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 401);
    }

    // Now even the right password is rejected with 429
    let resp = server
        .client
        .post(format!("{}/auth/login", server.base_url))
        .json(&json!({"username": "ops", "password": "correct-password"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 429);

    // Other accounts are unaffected
    server
        .authenticator
        .create_admin("other", "other-password", Role::Viewer)
        .await
        .unwrap();
    server.login("other", "other-password").await;
}

#[tokio::test]
async fn test_me_and_change_password() {
    let server = start_server().await;
    server
        .authenticator
        .create_admin("ops", "old-password", Role::Admin)
        .await
        .unwrap();
    let token = server.login("ops", "old-password").await;

    let resp = server
        .client
        .get(format!("{}/auth/me", server.base_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["username"], "ops");
    assert_eq!(body["role"], "admin");

    // Wrong current password
    let resp = server
        .client
        .post(format!("{}/auth/change-password", server.base_url))
        .bearer_auth(&token)
        .json(&json!({"current_password": "nope", "new_password": "brand-new-pass"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = server
        .client
        .post(format!("{}/auth/change-password", server.base_url))
        .bearer_auth(&token)
        .json(&json!({"current_password": "old-password", "new_password": "brand-new-pass"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    server.login("ops", "brand-new-pass").await;
}

#[tokio::test]
async fn test_role_hierarchy_enforced() {
    let server = start_server().await;
    server
        .authenticator
        .create_admin("viewer", "viewer-pass", Role::Viewer)
        .await
        .unwrap();
    server
        .authenticator
        .create_admin("admin", "admin-pass1", Role::Admin)
        .await
        .unwrap();
    server
        .authenticator
        .create_admin("boss", "super-pass1", Role::SuperAdmin)
        .await
        .unwrap();

    let viewer = server.login("viewer", "viewer-pass").await;
    let admin = server.login("admin", "admin-pass1").await;
    let boss = server.login("boss", "super-pass1").await;

    // Viewer can read
    let resp = server
        .client
        .get(format!("{}/domains", server.base_url))
        .bearer_auth(&viewer)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Viewer cannot mutate
    let resp = server
        .client
        .post(format!("{}/domains", server.base_url))
        .bearer_auth(&viewer)
        .json(&json!({"name": "example.com"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    // Admin can mutate
    let resp = server
        .client
        .post(format!("{}/domains", server.base_url))
        .bearer_auth(&admin)
        .json(&json!({"name": "example.com"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    // Admin cannot reach account management
    let resp = server
        .client
        .get(format!("{}/auth/admin-list", server.base_url))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    // Super admin can
    let resp = server
        .client
        .get(format!("{}/auth/admin-list", server.base_url))
        .bearer_auth(&boss)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let admins: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(admins.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_last_super_admin_is_protected() {
    let server = start_server().await;
    let boss = server
        .authenticator
        .create_admin("boss", "super-pass1", Role::SuperAdmin)
        .await
        .unwrap();
    let vice = server
        .authenticator
        .create_admin("vice", "super-pass2", Role::SuperAdmin)
        .await
        .unwrap();
    let boss_token = server.login("boss", "super-pass1").await;
    let vice_token = server.login("vice", "super-pass2").await;

    // With two super admins, demoting one goes through
    let resp = server
        .client
        .put(format!("{}/auth/admin-update-role", server.base_url))
        .bearer_auth(&vice_token)
        .json(&json!({"id": boss.id, "role": "admin"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Boss's token still claims super_admin; the handler count check, not
    // the token, is what protects the sole remaining super admin
    let resp = server
        .client
        .put(format!("{}/auth/admin-update-role", server.base_url))
        .bearer_auth(&boss_token)
        .json(&json!({"id": vice.id, "role": "viewer"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    let resp = server
        .client
        .post(format!("{}/auth/admin-delete", server.base_url))
        .bearer_auth(&boss_token)
        .json(&json!({"id": vice.id}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    let vice = server.authenticator.get_admin("vice").await.unwrap().unwrap();
    assert_eq!(vice.role, Role::SuperAdmin);
}

#[tokio::test]
async fn test_admin_management_guards() {
    let server = start_server().await;
    let boss = server
        .authenticator
        .create_admin("boss", "super-pass1", Role::SuperAdmin)
        .await
        .unwrap();
    let token = server.login("boss", "super-pass1").await;

    // Create a viewer account through the API
    let resp = server
        .client
        .post(format!("{}/auth/admin-create", server.base_url))
        .bearer_auth(&token)
        .json(&json!({"username": "helper", "password": "helper-pass", "role": "viewer"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let helper: serde_json::Value = resp.json().await.unwrap();

    // Duplicate username
    let resp = server
        .client
        .post(format!("{}/auth/admin-create", server.base_url))
        .bearer_auth(&token)
        .json(&json!({"username": "helper", "password": "helper-pass", "role": "viewer"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    // Unknown role
    let resp = server
        .client
        .post(format!("{}/auth/admin-create", server.base_url))
        .bearer_auth(&token)
        .json(&json!({"username": "x", "password": "password123", "role": "owner"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Cannot delete yourself
    let resp = server
        .client
        .post(format!("{}/auth/admin-delete", server.base_url))
        .bearer_auth(&token)
        .json(&json!({"id": boss.id}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Cannot change your own role
    let resp = server
        .client
        .put(format!("{}/auth/admin-update-role", server.base_url))
        .bearer_auth(&token)
        .json(&json!({"id": boss.id, "role": "admin"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Promote the helper, then reset its password
    let resp = server
        .client
        .put(format!("{}/auth/admin-update-role", server.base_url))
        .bearer_auth(&token)
        .json(&json!({"id": helper["id"], "role": "admin"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = server
        .client
        .post(format!("{}/auth/admin-reset-password", server.base_url))
        .bearer_auth(&token)
        .json(&json!({"id": helper["id"], "new_password": "fresh-password"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    server.login("helper", "fresh-password").await;

    // Delete the helper
    let resp = server
        .client
        .post(format!("{}/auth/admin-delete", server.base_url))
        .bearer_auth(&token)
        .json(&json!({"id": helper["id"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}
