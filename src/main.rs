//! schema-vault - Main entry point.
//!
//! Runs pending vault migrations, then executes one subcommand and prints its
//! result as JSON on stdout. Logs go to stderr.

use schema_vault::config::{Command, Config};
use schema_vault::db::{ConnectionResolver, PreparedConnection};
use schema_vault::error::DbError;
use schema_vault::models::Phase;
use schema_vault::tools::{MigrationRunner, Onboarder, SqlValidator, check_static};
use schema_vault::vault::Vault;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Exit status for a statement the validator rejected.
const EXIT_REJECTED: i32 = 2;

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Register the named `--database` entry with the resolver.
async fn connect(
    config: &Config,
    resolver: &ConnectionResolver,
    name: &str,
) -> Result<Arc<schema_vault::Connection>, Box<dyn std::error::Error>> {
    let db = config.database(name)?;
    Ok(resolver.resolve(&db.name, &db.connection_string, None).await?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse_args();
    config.validate()?;

    init_tracing(&config);

    info!(
        vault = %config.vault_dir.display(),
        "Starting schema-vault v{}",
        env!("CARGO_PKG_VERSION")
    );

    let vault = Vault::new(config.vault_dir.clone());

    // Pending migrations run before any command touches the vault
    let runner = MigrationRunner::builtin(vault.clone())?;
    let reports = runner.run_all()?;
    for report in reports.iter().filter(|r| !r.failed.is_empty()) {
        for failed in &report.failed {
            warn!(
                connection = %report.connection,
                migration = %failed.id,
                error = %failed.error,
                "Migration left pending"
            );
        }
    }

    let resolver = ConnectionResolver::new()
        .with_connect_timeout(config.connect_timeout_duration())
        .with_query_timeout(config.query_timeout_duration());
    let onboarder = Onboarder::new(vault.clone()).with_chunk_size(config.chunk_size);

    let result = run(&config, &vault, &resolver, &onboarder, reports).await;
    resolver.close_all().await;

    if let Err(e) = &result {
        error!(error = %e, "Command failed");
    }
    result
}

async fn run(
    config: &Config,
    vault: &Vault,
    resolver: &ConnectionResolver,
    onboarder: &Onboarder,
    migration_reports: Vec<schema_vault::models::MigrationReport>,
) -> Result<(), Box<dyn std::error::Error>> {
    match &config.command {
        Command::Migrate => print_json(&migration_reports),

        Command::Onboard {
            connection,
            scope,
            until_done,
        } => {
            let name = connection.connection.as_str();
            let conn = connect(config, resolver, name).await?;
            let rules = vault.load_ignore_rules(name)?;
            let scope = scope.scope();

            let mut reports = Vec::new();
            loop {
                let report = onboarder
                    .discover_chunk(name, &*conn, &rules, &scope)
                    .await?;
                let more = *until_done
                    && report.phase == Phase::Discovery
                    && !report.processed.is_empty();
                reports.push(report);
                if !more {
                    break;
                }
            }
            print_json(&reports)
        }

        Command::Status { connection } => {
            let name = connection.connection.as_str();
            let state = onboarder.status(name).await?;
            let stats = vault.load_schema(name)?.stats();
            print_json(&json!({ "onboarding": state, "schema": stats }))
        }

        Command::Review { connection, count } => {
            print_json(&onboarder.record_review(&connection.connection, *count).await?)
        }

        Command::Advance { connection, to } => {
            print_json(&onboarder.advance(&connection.connection, (*to).into()).await?)
        }

        Command::Reset { connection } => print_json(&onboarder.reset(&connection.connection).await?),

        Command::Validate {
            connection,
            sql,
            static_only,
        } => {
            let result = if *static_only {
                let db = config.database(&connection.connection)?;
                let prepared = PreparedConnection::parse(&db.connection_string, None)?;
                check_static(prepared.profile, sql)?
            } else {
                let conn = connect(config, resolver, &connection.connection).await?;
                let validator = SqlValidator::new(config.thresholds())?;
                match validator.validate(&conn, sql).await {
                    Ok(result) => result,
                    Err(DbError::ValidationRejected { keyword, excerpt }) => {
                        print_json(&json!({
                            "verdict": "rejected",
                            "rejected_keyword": keyword,
                            "excerpt": excerpt,
                        }))?;
                        resolver.close_all().await;
                        std::process::exit(EXIT_REJECTED);
                    }
                    Err(e) => return Err(e.into()),
                }
            };
            print_json(&result)?;
            if result.is_rejected() {
                resolver.close_all().await;
                std::process::exit(EXIT_REJECTED);
            }
            Ok(())
        }
    }
}
