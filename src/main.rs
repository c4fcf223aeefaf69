//! # wfcollector CLI
//!
//! Collects file objects, daily metrics and spectra for an SDS archive.
//!
//! ## Usage
//!
//! ```bash
//! wfcollector --config ./config/wfcollector.toml <selection> [modifiers]
//! ```
//!
//! Exactly one selection is required:
//!
//! | Flag | Selects |
//! |------|---------|
//! | `--file NAME` | one archive file |
//! | `--dir PATH` | every archive file below a directory |
//! | `--list JSON` | a JSON array of filenames |
//! | `--date YYYY-MM-DD [--range N]` | N days from a date (negative goes back) |
//! | `--past PRESET` | `today`, `yesterday`, `week`, `fortnight`, `month` |
//! | `--glob PATTERN` | `NET.STA.LOC.CHA.Q.YEAR.DAY` with wildcards |
//!
//! ## Examples
//!
//! ```bash
//! # Yesterday's files, file objects only
//! wfcollector --past yesterday
//!
//! # Recompute metrics and spectra for one station-year
//! wfcollector --glob 'NL.HGN.*.BH?.D.2020.*' --force --store-metrics --store-psd
//! ```

use clap::Parser;
use std::path::PathBuf;
use tracing::warn;

use wfcollector::cancel::CancellationToken;
use wfcollector::collector::StoreOptions;
use wfcollector::config;
use wfcollector::ingest::{self, RunOptions};
use wfcollector::locator::{PastPreset, SelectionOptions};
use wfcollector::logging::{self, LogConfig};

/// Incremental metadata collector for SDS waveform archives.
#[derive(Parser)]
#[command(
    name = "wfcollector",
    about = "Incremental metadata collector for SDS waveform archives",
    version,
    long_about = "Selects files from an SDS archive, detects which changed since the last run \
    by content fingerprint, and reprocesses each changed day together with its neighbours \
    on a pool of timeout-bounded workers."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, default_value = "./config/wfcollector.toml")]
    config: PathBuf,

    /// Print the effective configuration and exit.
    #[arg(long)]
    print_config: bool,

    /// A single archive file, e.g. `NL.HGN.02.BHZ.D.2020.001`.
    #[arg(long)]
    file: Option<String>,

    /// Every archive file below this directory.
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Archive filenames matching a `NET.STA.LOC.CHA.Q.YEAR.DAY` wildcard pattern.
    #[arg(long)]
    glob: Option<String>,

    /// JSON array of archive filenames.
    #[arg(long)]
    list: Option<String>,

    /// First day of a date range (YYYY-MM-DD).
    #[arg(long)]
    date: Option<String>,

    /// Number of days starting at `--date`; negative counts go backward.
    #[arg(long, requires = "date", allow_negative_numbers = true)]
    range: Option<i64>,

    /// Window counted back from today.
    #[arg(long, value_enum)]
    past: Option<PastPreset>,

    /// Reprocess selected files even when their fingerprint is known.
    #[arg(long)]
    force: bool,

    /// Store power spectral densities.
    #[arg(long)]
    store_psd: bool,

    /// Store daily waveform metrics.
    #[arg(long)]
    store_metrics: bool,

    /// Append logs to this file instead of stderr.
    #[arg(long)]
    logfile: Option<PathBuf>,

    /// Verbose logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init_logging(LogConfig {
        debug: cli.debug,
        logfile: cli.logfile.as_deref(),
    })?;

    let cfg = config::load_config(&cli.config)?;

    if cli.print_config {
        print!("{}", toml::to_string_pretty(&cfg)?);
        return Ok(());
    }

    let selection = SelectionOptions {
        file: cli.file,
        dir: cli.dir,
        glob: cli.glob,
        list: cli.list,
        date: cli.date,
        range: cli.range,
        past: cli.past,
    }
    .into_selection()?;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; draining workers");
            trigger.cancel();
        }
    });

    let summary = ingest::run(
        &cfg,
        RunOptions {
            selection,
            force: cli.force,
            store: StoreOptions {
                metrics: cli.store_metrics,
                spectra: cli.store_psd,
            },
        },
        shutdown,
    )
    .await?;

    summary.print();
    Ok(())
}
