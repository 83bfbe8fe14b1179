//! Vector store operator CLI
//!
//! Maintenance commands against the namespace-partitioned vector store:
//! schema bootstrap, health, and per-namespace source inspection and deletion.
//!
//! ## Environment
//!
//! - `DATABASE_URL` and the `DB_*` pool settings (see `PostgresConfig`)
//! - `DB_SCHEMA`, `EMBEDDING_DIMENSION`, `VECTOR_BATCH_SIZE`, `GENERAL_COPY_EXEMPT_MARKER`
//! - `APP_ENV=production` switches logs to JSON

pub mod cli;
pub mod config;

use clap::Parser;
use core_config::tracing::{init_tracing, install_color_eyre};
use core_config::Environment;
use domain_vector::PgNamespaceStore;
use eyre::Result;
use serde_json::json;
use tracing::info;

use cli::{run_store_command, Cli, Command};
use config::Config;

pub async fn run() -> Result<()> {
    install_color_eyre();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let environment = Environment::from_env();
    init_tracing(&environment);

    observability::init_metrics();

    info!("Connecting to database...");
    let db = database::postgres::connect_from_config_with_retry(config.database.clone(), None)
        .await
        .map_err(|e| eyre::eyre!("Database connection failed: {}", e))?;

    let report = match &cli.command {
        Command::Health => {
            let status = database::postgres::check_health_detailed(&db).await;
            let report = json!({
                "healthy": status.healthy,
                "message": status.message,
                "response_time_ms": status.response_time_ms,
            });
            if !status.healthy {
                println!("{}", serde_json::to_string_pretty(&report)?);
                eyre::bail!("Database is unhealthy");
            }
            report
        }
        Command::Init => {
            let store = PgNamespaceStore::new(db, config.store.clone());
            store.ensure_ready().await?;
            info!(schema = %config.store.schema, "Vector store initialized");
            json!({
                "schema": config.store.schema,
                "shared_table": config.store.shared_table,
                "dimension": config.store.embedding_dimension,
                "status": "ready",
            })
        }
        command => {
            let store = PgNamespaceStore::new(db, config.store.clone());
            run_store_command(&store, command)
                .await?
                .unwrap_or_else(|| json!({}))
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
