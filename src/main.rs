//! pgscope - main entry point.
//!
//! Plans the DDL for one TimescaleDB table from command-line flags and
//! optionally applies it.

use clap::Parser;
use pgscope::config::Config;
use pgscope::db::{Driver, PgDriver, Pool, PoolRegistry, RecordingDriver};
use pgscope::error::DbResult;
use pgscope::models::SchemaDescriptor;
use pgscope::sql::{Statement, TablePlan};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use url::Url;

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so the planned SQL on stdout stays pipeable
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

fn descriptor_from(config: &Config) -> DbResult<SchemaDescriptor> {
    let mut builder = SchemaDescriptor::builder(&config.schema, &config.table).columns(
        config
            .columns
            .iter()
            .map(|c| (c.name.clone(), c.type_token.clone())),
    );
    if let Some(time_index) = &config.time_index {
        builder = builder.time_index(time_index);
    }
    if !config.primary_keys.is_empty() {
        builder = builder.primary_keys(config.primary_keys.iter().cloned());
    }
    builder.build()
}

/// Run every statement in one transaction on a fresh pool, closing it after.
async fn run_plan<D: Driver>(
    driver: D,
    dsn: String,
    options: pgscope::PoolOptions,
    statements: Vec<String>,
) -> DbResult<usize> {
    let registry = PoolRegistry::new();
    let pool = Pool::builder(driver, dsn)
        .name("pgscope")
        .options(options)
        .registry(&registry)
        .build()?;

    let count = statements.len();
    pool.scope(async {
        pool.transaction(move |tx| {
            Box::pin(async move {
                for sql in &statements {
                    tx.execute_statement(&Statement::raw(sql.as_str())).await?;
                }
                Ok(())
            })
        })
        .await
    })
    .await?;
    Ok(count)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    init_tracing(&config);

    let descriptor = descriptor_from(&config)?;
    let mut plan = TablePlan::new(&descriptor);
    if let Some(interval) = &config.chunk_interval {
        plan = plan.chunk_interval(interval);
    }
    let statements = plan.statements()?;

    info!(
        table = %descriptor.qualified_name(),
        statements = statements.len(),
        "pgscope v{}",
        env!("CARGO_PKG_VERSION")
    );

    for sql in &statements {
        println!("{}\n", sql);
    }

    if config.dry_run {
        let driver = RecordingDriver::new();
        let options = config.pool_options(&mut Url::parse("postgresql://localhost/dry-run")?)?;
        run_plan(
            driver.clone(),
            "postgresql://localhost/dry-run".to_string(),
            options,
            statements,
        )
        .await?;

        println!("-- dry run: {} statement(s) committed", driver.statements().len());
        for sql in driver.sql_log() {
            println!("--   {}", sql.lines().next().unwrap_or_default());
        }
        return Ok(());
    }

    if config.apply {
        let Some(database) = &config.database else {
            eprintln!("Error: --apply needs a database URL (--database or PGSCOPE_DATABASE_URL).");
            std::process::exit(2);
        };
        let mut url = Url::parse(database)?;
        let options = config.pool_options(&mut url)?;

        match run_plan(PgDriver::new(), url.to_string(), options, statements).await {
            Ok(count) => {
                info!(count, table = %descriptor.qualified_name(), "Plan applied");
                eprintln!("Applied {} statement(s)", count);
            }
            Err(e) => {
                error!(error = %e, "Failed to apply plan");
                return Err(e.into());
            }
        }
    }

    Ok(())
}
