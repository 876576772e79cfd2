//! Barvault CLI: fetch and cache management commands.
//!
//! Commands:
//! - `fetch`: load symbols through the range cache, fetching only gaps
//! - `cache status`: report cached keys, ranges and sizes
//! - `sources`: list the sources a config provides

use anyhow::{bail, Context, Result};
use barvault_core::config::{EngineConfig, StoreBackend};
use barvault_core::logging::{init_logging, LogFormat};
use barvault_core::manager::QueryResult;
use barvault_core::store::{KeyStatus, ParquetRangeStore, RangeStore};
use barvault_core::{DataRequest, Interval};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "barvault",
    about = "Barvault CLI: incremental market data cache"
)]
struct Cli {
    /// Log format: pretty, json or compact. Overrides the config file.
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load symbols, fetching only the ranges the store does not have yet.
    Fetch {
        /// Symbols or generated instrument names (e.g., SPY QQQ SPY/QQQ).
        #[arg(required = true)]
        symbols: Vec<String>,

        /// Start date (YYYY-MM-DD). Defaults to one year ago.
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD), inclusive. Defaults to today.
        #[arg(long)]
        end: Option<String>,

        /// Bar interval (1m, 5m, 1h, 1d, 1w, ...).
        #[arg(long, default_value = "1d")]
        interval: Interval,

        /// Source name as registered in the config. Cached ranges are keyed by
        /// symbol and interval only, so rows already cached from another
        /// source are reused; use a separate --store-dir per source to keep
        /// them apart.
        #[arg(long, default_value = "yahoo")]
        source: String,

        /// Engine config (TOML). Defaults apply without one.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Store directory. Overrides the config and forces the Parquet backend.
        #[arg(long)]
        store_dir: Option<PathBuf>,

        /// Compute the configured features.
        #[arg(long, default_value_t = false)]
        features: bool,

        /// Also materialize generated instruments built from the requested symbols.
        #[arg(long, default_value_t = false)]
        generated: bool,

        /// Write the loaded rows to this CSV file.
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// List the sources available under a config.
    Sources {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Report cached keys, ranges, row counts and sizes.
    Status {
        /// Store directory. Defaults to ./data/cache.
        #[arg(long, default_value = "data/cache")]
        store_dir: PathBuf,

        /// Print JSON instead of a table.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Fetch {
            symbols,
            start,
            end,
            interval,
            source,
            config,
            store_dir,
            features,
            generated,
            export,
        } => {
            let mut engine = load_config(config.as_deref())?;
            if let Some(dir) = store_dir {
                engine.store.backend = StoreBackend::Parquet;
                engine.store.dir = dir;
            }
            setup_logging(&engine, cli.log_format)?;

            let request = DataRequest::new(symbols, parse_start(start.as_deref())?, parse_end(end.as_deref())?)
                .interval(interval)
                .source(source)
                .with_features(features)
                .with_generated(generated);
            run_fetch(&engine, &request, export.as_deref())
        }
        Commands::Cache { action } => match action {
            CacheAction::Status { store_dir, json } => run_cache_status(&store_dir, json),
        },
        Commands::Sources { config } => {
            let engine = load_config(config.as_deref())?;
            for (name, source) in &engine.sources {
                println!("{name:<12} {}", serde_json::to_string(source)?);
            }
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn setup_logging(engine: &EngineConfig, format: Option<LogFormat>) -> Result<()> {
    let mut logging = engine.logging.clone();
    if let Some(format) = format {
        logging.format = format;
    }
    init_logging(&logging).map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("invalid date '{s}'"))
}

fn parse_start(start: Option<&str>) -> Result<DateTime<Utc>> {
    let date = match start {
        Some(s) => parse_date(s)?,
        None => Utc::now().date_naive() - chrono::Duration::days(365),
    };
    Ok(date.and_time(chrono::NaiveTime::MIN).and_utc())
}

/// End dates are inclusive: the window runs to the last second of the day.
fn parse_end(end: Option<&str>) -> Result<DateTime<Utc>> {
    let date = match end {
        Some(s) => parse_date(s)?,
        None => Utc::now().date_naive(),
    };
    match date.and_hms_opt(23, 59, 59) {
        Some(dt) => Ok(dt.and_utc()),
        None => bail!("invalid end date {date}"),
    }
}

fn run_fetch(engine: &EngineConfig, request: &DataRequest, export: Option<&Path>) -> Result<()> {
    if request.window.start > request.window.end {
        bail!("--start must not be after --end");
    }

    let manager = engine.build()?;
    let result = manager.get_data(request)?;
    print_summary(request, &result);

    if let Some(path) = export {
        let written = manager.export_csv(path)?;
        println!("Exported {written} rows to {}", path.display());
    }

    if !result.failures.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_summary(request: &DataRequest, result: &QueryResult) {
    println!();
    println!(
        "=== {} bars from {} ({}) ===",
        request.interval, request.source, request.window
    );
    println!("{:<14} {:>8} {:<22} {:<22}", "Symbol", "Rows", "First", "Last");
    println!("{}", "-".repeat(68));
    for (symbol, rows) in &result.series {
        let first = rows.first().map(|r| r.timestamp.to_rfc3339()).unwrap_or_default();
        let last = rows.last().map(|r| r.timestamp.to_rfc3339()).unwrap_or_default();
        println!("{symbol:<14} {:>8} {first:<22} {last:<22}", rows.len());
    }
    for (symbol, err) in &result.failures {
        eprintln!("Error for {symbol}: {err}");
    }
    for (symbol, err) in &result.feature_failures {
        eprintln!("Features skipped for {symbol}: {err}");
    }
    println!();
}

fn run_cache_status(store_dir: &Path, json: bool) -> Result<()> {
    if !store_dir.exists() {
        println!("Store directory does not exist: {}", store_dir.display());
        return Ok(());
    }

    let store = ParquetRangeStore::new(store_dir);
    let mut keys = store.status()?;
    keys.sort_by(|a, b| (&a.symbol, a.interval).cmp(&(&b.symbol, b.interval)));

    if json {
        println!("{}", serde_json::to_string_pretty(&keys)?);
        return Ok(());
    }

    if keys.is_empty() {
        println!("Store is empty: {}", store_dir.display());
        return Ok(());
    }

    let sizes: Vec<u64> = keys
        .iter()
        .map(|k| dir_size(&store.key_dir(&k.symbol, k.interval)))
        .collect();

    println!("Store: {}", store_dir.display());
    println!("Keys: {}", keys.len());
    println!("Total size: {}", format_size(sizes.iter().sum()));
    println!();
    println!(
        "{:<12} {:<5} {:>8} {:>10}  {}",
        "Symbol", "Int", "Rows", "Size", "Ranges"
    );
    println!("{}", "-".repeat(72));
    for (key, size) in keys.iter().zip(&sizes) {
        println!(
            "{:<12} {:<5} {:>8} {:>10}  {}",
            key.symbol,
            key.interval,
            key.row_count,
            format_size(*size),
            format_ranges(key)
        );
    }

    Ok(())
}

fn format_ranges(key: &KeyStatus) -> String {
    key.ranges
        .iter()
        .map(|r| r.window().to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn dir_size(path: &Path) -> u64 {
    let mut size = 0u64;
    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            if let Ok(meta) = entry.metadata() {
                size += meta.len();
            }
        }
    }
    size
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
