//! Idempotent super-admin bootstrap
//!
//! Guarantees exactly one usable super_admin account without ever clobbering
//! an existing operator: creates the default account when no admins exist,
//! promotes the oldest admin (password untouched) when admins exist but none
//! is super_admin, and does nothing otherwise. Safe to run on every deploy.

use backup_rs::config::Config;
use backup_rs::db::Db;
use backup_rs::security::auth::{DEFAULT_ADMIN_PASSWORD, DEFAULT_ADMIN_USERNAME};
use backup_rs::security::{Authenticator, BootstrapOutcome};
use clap::Parser;

#[derive(Parser)]
#[command(name = "create-admin")]
#[command(about = "Ensure a super admin account exists", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Username for the account created when no admins exist
    #[arg(long, default_value = DEFAULT_ADMIN_USERNAME)]
    username: String,

    /// Password for the account created when no admins exist
    #[arg(long, default_value = DEFAULT_ADMIN_PASSWORD)]
    password: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(&cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: &Cli) -> backup_rs::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::load(&cli.config)?;
    let db = Db::connect(&config.database).await?;
    db.init_schema().await?;

    let auth = Authenticator::new(db);
    match auth.ensure_super_admin(&cli.username, &cli.password).await? {
        BootstrapOutcome::AlreadyPresent => {
            println!("A super admin already exists; nothing to do");
        }
        BootstrapOutcome::Created => {
            println!("Created super admin account '{}'", cli.username);
            if cli.password == DEFAULT_ADMIN_PASSWORD {
                println!("Change the default password after first login");
            }
        }
        BootstrapOutcome::Promoted(username) => {
            println!(
                "Promoted existing admin '{}' to super admin (password unchanged)",
                username
            );
        }
    }

    Ok(())
}
