//! Collection run orchestration.
//!
//! ```text
//! Selection ──locate──▶ candidates ──expand──▶ work set ──schedule──▶ summary
//! ```
//!
//! Locating runs on the blocking pool and change detection against a single
//! store connection; the work set is then handed to the worker pool, whose
//! workers open their own connections. An interrupt before dispatch ends the
//! run with nothing selected.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::cancel::CancellationToken;
use crate::collector::{CollectorFactory, StoreOptions};
use crate::config::Config;
use crate::detect;
use crate::locator::{ArchiveLocator, Selection};
use crate::scheduler::{RunReport, Scheduler, SchedulerOptions, WorkItem};
use crate::sqlite_store::SqliteStore;

/// Inputs for one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub selection: Selection,
    pub force: bool,
    pub store: StoreOptions,
}

/// Counts printed at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub considered: usize,
    pub selected: usize,
    pub completed: usize,
    pub timeouts: usize,
    pub failures: usize,
    pub cancelled: usize,
    pub interrupted: bool,
}

impl RunSummary {
    fn from_report(considered: usize, selected: usize, report: &RunReport) -> Self {
        Self {
            considered,
            selected,
            completed: report.completed(),
            timeouts: report.timeouts(),
            failures: report.failures(),
            cancelled: report.cancelled(),
            interrupted: report.interrupted,
        }
    }

    pub fn print(&self) {
        println!("collect");
        println!("  files considered: {}", self.considered);
        println!("  files selected: {}", self.selected);
        println!("  completed: {}", self.completed);
        println!("  timeouts: {}", self.timeouts);
        println!("  failures: {}", self.failures);
        println!("  cancelled: {}", self.cancelled);
        if self.interrupted {
            println!("interrupted");
        } else {
            println!("ok");
        }
    }
}

/// Locate, detect changes and process. Returns before any work is
/// dispatched when nothing needs processing.
pub async fn run(
    config: &Config,
    options: RunOptions,
    shutdown: CancellationToken,
) -> Result<RunSummary> {
    if (options.store.metrics || options.store.spectra) && !config.analysis.is_enabled() {
        bail!("--store-metrics and --store-psd require [analysis] command to be configured");
    }

    let root = &config.archive.root;
    let locator = ArchiveLocator::new(root, config.filtering.chain()?);
    let selection = options.selection.clone();
    let walk = tokio::task::spawn_blocking(move || locator.locate(&selection));
    let candidates = tokio::select! {
        biased;
        _ = shutdown.cancelled() => {
            warn!("Interrupted while locating files");
            return Ok(RunSummary {
                interrupted: true,
                ..RunSummary::default()
            });
        }
        located = walk => located.context("Archive scan aborted")??,
    };

    if candidates.is_empty() {
        info!("No files found for processing");
        return Ok(RunSummary::default());
    }

    let store = SqliteStore::open(&config.store).await?;
    let work = detect::expand(&candidates, root, &store, options.force, &shutdown).await;
    store.close().await;
    let work = work?;

    if shutdown.is_cancelled() {
        return Ok(RunSummary {
            considered: candidates.len(),
            interrupted: true,
            ..RunSummary::default()
        });
    }

    if work.is_empty() {
        info!("No files found for processing");
        return Ok(RunSummary {
            considered: candidates.len(),
            ..RunSummary::default()
        });
    }

    let selected = work.len();
    let items: Vec<WorkItem> = work
        .into_iter()
        .map(|filename| WorkItem::new(filename, options.force))
        .collect();

    let mut scheduler = Scheduler::new(SchedulerOptions {
        workers: config.scheduler.workers,
        chunk_size: config.scheduler.chunk_size,
        task_timeout: config.scheduler.task_timeout(),
        grace_period: config.scheduler.grace_period(),
    });
    let factory = Arc::new(CollectorFactory::new(config.clone(), options.store));
    let report = scheduler.run(items, factory, shutdown).await;

    Ok(RunSummary::from_report(candidates.len(), selected, &report))
}
