//! Tracing setup for the `wfcollector` binary.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "wfcollector=info,wfcollector_core=info";
const DEBUG_LOG_FILTER: &str = "wfcollector=debug,wfcollector_core=debug";

pub struct LogConfig<'a> {
    pub debug: bool,
    pub logfile: Option<&'a Path>,
}

/// Install the global subscriber. `RUST_LOG` takes precedence over `debug`.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let default = if config.debug {
        DEBUG_LOG_FILTER
    } else {
        DEFAULT_LOG_FILTER
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    match config.logfile {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create log directory: {}", parent.display())
                })?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(Mutex::new(file))
                        .with_ansi(false)
                        .with_thread_ids(true)
                        .with_filter(filter),
                )
                .try_init()
                .context("Failed to install tracing subscriber")?;
        }
        None => {
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_filter(filter),
                )
                .try_init()
                .context("Failed to install tracing subscriber")?;
        }
    }

    Ok(())
}
