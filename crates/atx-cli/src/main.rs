//! 🚀 atx-cli: the front door. Loads config, sets up logging, runs one export, prints the receipt.
//!
//! 🎬 *[narrator voice]* "It was 3am. The scheduler fired. Nobody was watching.
//! Except the logs. The logs are always watching." 🦆

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_FULL};
use tracing::error;
use tracing_subscriber::EnvFilter;

use atx::common::RunReport;

/// Export admin activity logs into object storage, one gzipped object per record.
#[derive(Parser, Debug)]
#[command(name = "atx")]
#[command(about = "Export admin activity logs to object storage, skipping what's already there")]
#[command(version)]
struct Args {
    /// TOML config file (default: ./atx.toml if present). Environment variables (ATX_*) are always read too.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Anchor every window to this instant instead of now (RFC 3339)
    #[arg(long)]
    base_time: Option<DateTime<Utc>>,

    /// Correlation id for every log line of this run (default: a fresh UUID)
    #[arg(long)]
    run_id: Option<String>,

    /// Log as JSON lines instead of pretty text
    #[arg(long, default_value = "false")]
    json: bool,
}

const DEFAULT_CONFIG_FILE: &str = "atx.toml";

/// 🔍 Which TOML file to merge, if any.
///
/// A missing default file is fine (env-only). A missing explicit file is an error.
fn resolve_config_path(explicit: Option<&Path>, default: &Path) -> Result<Option<PathBuf>> {
    match explicit {
        Some(path) => {
            let exists = path
                .try_exists()
                .with_context(|| format!("💀 Couldn't check whether '{}' exists", path.display()))?;
            if !exists {
                anyhow::bail!("💀 Config file '{}' does not exist", path.display());
            }
            Ok(Some(path.to_path_buf()))
        }
        None => {
            let exists = default
                .try_exists()
                .with_context(|| format!("💀 Couldn't check whether '{}' exists", default.display()))?;
            Ok(exists.then(|| default.to_path_buf()))
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn report_table(report: &RunReport) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["application", "records"]);
    for (app, count) in &report.per_app {
        table.add_row(vec![
            Cell::new(app),
            Cell::new(count).set_alignment(CellAlignment::Right),
        ]);
    }
    table.add_row(vec![
        Cell::new("total"),
        Cell::new(report.record_count).set_alignment(CellAlignment::Right),
    ]);
    table
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json);

    let config_file = resolve_config_path(args.config.as_deref(), Path::new(DEFAULT_CONFIG_FILE))?;

    let mut app_config = atx::app_config::load_config(config_file.as_deref())
        .context("💀 Couldn't load the configuration. Check the TOML file and the ATX_* variables")?;
    if let Some(base_time) = args.base_time {
        app_config.base_time = Some(base_time);
    }
    if let Some(run_id) = args.run_id {
        app_config.run_id = Some(run_id);
    }

    match atx::run(app_config).await {
        Ok(report) => {
            println!(
                "run {} @ {}: {} written, {} already there",
                report.run_id, report.base_time, report.objects_written, report.objects_skipped
            );
            println!("{}", report_table(&report));
            Ok(())
        }
        Err(err) => {
            error!("💀 error: {}", err);
            // 🧅 peel the onion, one layer at a time
            for cause in err.chain().skip(1) {
                error!("⚠️  cause: {}", cause);
            }
            std::process::exit(1);
        }
    }
}
