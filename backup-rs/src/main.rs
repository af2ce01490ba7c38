use backup_rs::api::auth::JwtConfig;
use backup_rs::api::handlers::AppState;
use backup_rs::api::ApiServer;
use backup_rs::archive::MessageStore;
use backup_rs::backup::{spawn_scheduler, BackupQueue, BackupSettings};
use backup_rs::config::Config;
use backup_rs::db::Db;
use backup_rs::export::ExportManager;
use backup_rs::provider::MaildirProvider;
use backup_rs::security::{Authenticator, LoginRateLimiter};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let config = Config::load("config.toml")?;

    // Initialize logging; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }

    info!("Starting backup-rs");
    info!("  API listening on: {}", config.server.listen_addr);
    info!("  Database backend: {}", config.database.db_type);
    info!("  Archive dir: {}", config.storage.archive_dir);

    // Database
    let db = Db::connect(&config.database).await?;
    db.init_schema().await?;

    // Storage
    let store = MessageStore::new(db.clone(), PathBuf::from(&config.storage.archive_dir));
    store.init()?;
    let exports = ExportManager::new(
        db.clone(),
        store.clone(),
        PathBuf::from(&config.storage.export_dir),
    );
    exports.init()?;

    // Backup pipeline
    let provider = Arc::new(MaildirProvider::new(PathBuf::from(
        &config.storage.incoming_dir,
    )));
    let queue = Arc::new(BackupQueue::new(
        db.clone(),
        store.clone(),
        provider.clone(),
    ));

    let settings = BackupSettings::load_or_seed(&db, &config.backup).await?;
    queue.apply_limits(&settings).await;
    spawn_scheduler(db.clone(), queue.clone());

    // HTTP API
    let state = Arc::new(AppState {
        db: db.clone(),
        authenticator: Authenticator::new(db),
        jwt_config: JwtConfig::new(
            config.server.jwt_secret.clone(),
            config.server.jwt_expiration_hours,
        ),
        login_limiter: LoginRateLimiter::new(5, 300),
        store,
        exports,
        queue,
        provider,
    });

    // Expired failure windows are dropped periodically so the limiter map
    // does not grow without bound under a spraying client
    let limiter_state = state.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(600)).await;
            limiter_state.login_limiter.cleanup().await;
        }
    });

    let server = ApiServer::new(state, config.server.listen_addr.clone());
    server.run().await?;

    Ok(())
}
