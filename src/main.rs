use clap::{Parser, Subcommand};
use marketplace_warehouse::app::{CatalogUseCase, SalesTrafficUseCase};
use marketplace_warehouse::config::{self, Config};
use marketplace_warehouse::logging;
use marketplace_warehouse::storage::Store;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "marketplace_warehouse")]
#[command(about = "Load marketplace extracts through raw, staging and warehouse tables")]
#[command(version = "0.1.0")]
struct Cli {
    /// Print the run summary as JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Append the newest catalog listings extract to the raw table
    LoadRaw {
        /// Load this file instead of discovering the newest one
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Rebuild the catalog staging snapshot from the latest raw load
    Stage,
    /// Merge catalog staging into the SKU/ASIN dimension
    MergeDimension,
    /// Rebuild the sales & traffic daily fact from its staging history
    BuildFact,
    /// Run load-raw, stage and merge-dimension in order
    Catalog {
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let _log_guard = logging::init_logging(&config::log_dir());

    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        error!("Run failed: {}", e);
        return Err(e);
    }
    Ok(())
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let mut store = Store::open(&config.db_url)?;
    for namespace in config.layout.namespace_names() {
        store.ensure_namespace(namespace)?;
    }
    info!("Store ready at {}", config.db_url);

    let catalog = CatalogUseCase::from_config(&config);
    let sales_traffic = SalesTrafficUseCase::from_layout(&config.layout);

    match &cli.command {
        Commands::LoadRaw { file } => {
            let r = catalog.load_raw(&mut store, file.as_deref())?;
            emit(cli.json, &r, || {
                println!("✓ Latest catalog file: {}", r.source_file);
                println!("✓ Loaded RAW into {} rows={} load_id={}", r.raw_table, r.rows, r.load_id);
            })?;
        }
        Commands::Stage => {
            let r = catalog.stage(&mut store)?;
            emit(cli.json, &r, || {
                println!("Processing load_id: {}", r.load_id);
                println!("Read {} rows from RAW", r.rows_read);
                if r.rows_dropped_missing_key > 0 {
                    println!("Dropped {} rows without keys", r.rows_dropped_missing_key);
                }
                if r.duplicates_removed > 0 {
                    println!("Removed {} duplicate rows", r.duplicates_removed);
                }
                println!("✓ Staged {} rows into {}", r.rows_staged, r.staging_table);
            })?;
        }
        Commands::MergeDimension => {
            let r = catalog.merge_dimension(&mut store)?;
            emit(cli.json, &r, || {
                println!(
                    "✓ DIM table built/updated: {} inserted={} updated={} unchanged={}",
                    r.dimension_table, r.inserted, r.updated, r.unchanged
                );
            })?;
        }
        Commands::BuildFact => {
            let r = sales_traffic.build_fact(&mut store)?;
            emit(cli.json, &r, || {
                if r.duplicates_removed > 0 {
                    println!("Removed {} duplicate rows", r.duplicates_removed);
                }
                println!("✓ Built FACT: {} rows={}", r.fact_table, r.rows_written);
                println!(
                    "✓ Date range: {} to {}",
                    r.date_min.as_deref().unwrap_or("-"),
                    r.date_max.as_deref().unwrap_or("-")
                );
            })?;
        }
        Commands::Catalog { file } => {
            let r = catalog.run(&mut store, file.as_deref())?;
            emit(cli.json, &r, || {
                println!("✓ RAW {} rows={} load_id={}", r.ingest.raw_table, r.ingest.rows, r.ingest.load_id);
                println!(
                    "✓ STAGING {} rows={} (dropped={}, duplicates={})",
                    r.staging.staging_table,
                    r.staging.rows_staged,
                    r.staging.rows_dropped_missing_key,
                    r.staging.duplicates_removed
                );
                println!(
                    "✓ DIM {} inserted={} updated={} unchanged={}",
                    r.dimension.dimension_table,
                    r.dimension.inserted,
                    r.dimension.updated,
                    r.dimension.unchanged
                );
            })?;
        }
    }
    Ok(())
}

fn emit<T: Serialize>(json: bool, report: &T, text: impl FnOnce()) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        text();
    }
    Ok(())
}
