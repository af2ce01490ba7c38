//! MySQL CHECK-constraint migration
//!
//! Older deployments created `admin_users` with a role constraint that
//! predates the three-tier hierarchy, so promoting anyone to `super_admin`
//! fails at the database level. This rewrites the constraint in place and,
//! when the deployment has a single admin stuck on the old scheme, promotes
//! it (leaving its password alone). MySQL only; the SQLite and PostgreSQL
//! schemas were never shipped with the narrow constraint, so the script is
//! a no-op there.

use backup_rs::config::Config;
use backup_rs::db::{Db, Dialect};
use backup_rs::security::{Authenticator, Role};
use clap::Parser;

#[derive(Parser)]
#[command(name = "patch-role-constraint")]
#[command(about = "Widen the admin_users role constraint on MySQL", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
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

    // Decide before opening any connection
    if Dialect::from_db_type(&config.database.db_type)? != Dialect::MySql {
        println!(
            "Configured backend is {}; constraint patch only applies to MySQL. Nothing to do.",
            config.database.db_type
        );
        return Ok(());
    }

    let db = Db::connect(&config.database).await?;

    // The old constraint may be absent on instances created after the
    // schema was fixed
    let dropped = sqlx::query("ALTER TABLE admin_users DROP CHECK chk_admin_role")
        .execute(db.pool())
        .await
        .is_ok();
    if dropped {
        println!("Dropped old chk_admin_role constraint");
    } else {
        println!("No old chk_admin_role constraint to drop");
    }

    sqlx::query(
        "ALTER TABLE admin_users ADD CONSTRAINT chk_admin_role \
         CHECK (role IN ('viewer', 'admin', 'super_admin'))",
    )
    .execute(db.pool())
    .await?;
    println!("Installed chk_admin_role covering viewer, admin and super_admin");

    // Deployments from before the hierarchy have one admin and no super
    // admin; give that account the top role so management routes work.
    let auth = Authenticator::new(db);
    if auth.count_super_admins().await? == 0 {
        let admins = auth.list_admins().await?;
        if let [only] = admins.as_slice() {
            auth.update_role(&only.id, Role::SuperAdmin).await?;
            println!(
                "Promoted sole admin '{}' to super_admin (password unchanged)",
                only.username
            );
        }
    }

    Ok(())
}
