//! Per-file collection task.
//!
//! For each work item a [`CollectorWorker`] writes, in order:
//!
//! 1. the file object (fingerprint, size, modification time),
//! 2. daily metrics, when enabled,
//! 3. spectral segments, when enabled.
//!
//! Every write replaces what was stored under the filename before. Failure
//! of an analysis stage is logged and does not fail the task; store failures
//! do.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::{debug, error, info};

use wfcollector_core::identity::{DataType, FileIdentity, FileStat};
use wfcollector_core::models::{Collection, FileObject, ResultDocument};
use wfcollector_core::store::ResultStore;

use crate::analysis::{self, Analyzer};
use crate::config::{Config, SpectraConfig};
use crate::inventory::InventoryCache;
use crate::scheduler::{TaskContext, WorkItem, Worker, WorkerFactory};
use crate::sqlite_store::SqliteStore;

/// Version recorded in every stored document.
pub const COLLECTOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// What a run stores besides file objects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOptions {
    pub metrics: bool,
    pub spectra: bool,
}

#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub root: PathBuf,
    pub options: StoreOptions,
    pub spectra: SpectraConfig,
}

pub struct CollectorWorker {
    settings: Arc<CollectorSettings>,
    store: Arc<dyn ResultStore>,
    inventory: InventoryCache,
    analyzer: Option<Analyzer>,
}

impl CollectorWorker {
    pub fn new(
        settings: Arc<CollectorSettings>,
        store: Arc<dyn ResultStore>,
        inventory: InventoryCache,
        analyzer: Option<Analyzer>,
    ) -> Self {
        Self {
            settings,
            store,
            inventory,
            analyzer,
        }
    }

    async fn store_file_object(&self, identity: FileIdentity) -> Result<FileIdentity> {
        let root = self.settings.root.clone();
        // Hashing reads the whole file; keep it off the async workers.
        let (identity, stat, hash) = tokio::task::spawn_blocking(move || {
            let hash = identity.fingerprint(&root)?.to_string();
            let stat: FileStat = identity.stat(&root)?;
            Ok::<_, wfcollector_core::identity::IdentityError>((identity, stat, hash))
        })
        .await
        .context("Fingerprint task aborted")??;

        let document = FileObject::new(COLLECTOR_VERSION, &identity, stat, &hash)
            .into_document()
            .context("Failed to encode file object")?;

        let removed = self
            .store
            .replace_document(Collection::FileObject, &identity.filename(), &document)
            .await?;
        if removed > 0 {
            info!("Digital Object for {} removed from collection", identity);
        }
        info!("Storing new Digital Object for {}", identity);
        Ok(identity)
    }

    async fn store_metrics(&self, identity: &FileIdentity, analyzer: &Analyzer) -> Result<()> {
        let files = identity.neighbor_paths(&self.settings.root);
        let record = match analyzer.metrics(identity, &files).await {
            Ok(record) => record,
            Err(err) => {
                error!(
                    "Critical exception ({:#}) during metric calculation for filename {}",
                    err, identity
                );
                return Ok(());
            }
        };

        let document = analysis::metrics_document(COLLECTOR_VERSION, identity, record)
            .into_document()
            .context("Failed to encode metrics")?;

        let removed = self
            .store
            .replace_document(Collection::Metrics, &identity.filename(), &document)
            .await?;
        if removed > 0 {
            info!(
                "Removed {} metric object(s) from database for {}",
                removed, identity
            );
        }
        info!("Saving new metrics object for {}", identity);
        Ok(())
    }

    async fn store_spectra(&mut self, identity: &FileIdentity, analyzer: &Analyzer) -> Result<()> {
        if identity.data_type() == DataType::Infrasound {
            info!("Skipping spectra for infrasound channel {}", identity.channel());
            return Ok(());
        }
        debug!("Start calculating spectra for {}", identity);

        let files = identity.neighbor_paths(&self.settings.root);
        let record = match self.inventory.response(identity).await {
            Ok(response) => {
                analyzer
                    .spectra(identity, &files, response, &self.settings.spectra)
                    .await
            }
            Err(err) => Err(err),
        };
        let record = match record {
            Ok(record) => record,
            Err(err) => {
                error!(
                    "Critical exception ({:#}) during spectra calculation for filename {}",
                    err, identity
                );
                return Ok(());
            }
        };

        let documents = analysis::spectra_documents(COLLECTOR_VERSION, identity, &record)
            .into_iter()
            .map(|doc| doc.into_document())
            .collect::<serde_json::Result<Vec<ResultDocument>>>()
            .context("Failed to encode spectra")?;

        let removed = self
            .store
            .replace_documents(Collection::Spectra, &identity.filename(), &documents)
            .await?;
        if removed > 0 {
            info!(
                "Removed {} spectra object(s) from database for {}",
                removed, identity
            );
        }
        info!(
            "Saving {} new spectra object(s) for {}",
            documents.len(),
            identity
        );
        Ok(())
    }
}

#[async_trait]
impl Worker for CollectorWorker {
    async fn process(&mut self, item: &WorkItem, task: &TaskContext) -> Result<()> {
        let identity = FileIdentity::parse(&item.filename)?;
        if item.forced {
            info!("Start processing file {} (forced)", identity);
        } else {
            info!("Start processing file {}", identity);
        }

        let identity = self.store_file_object(identity).await?;

        let options = self.settings.options;
        let Some(analyzer) = self.analyzer.clone() else {
            return Ok(());
        };

        if options.metrics {
            if task.is_cancelled() {
                bail!("cancelled before metrics for {}", identity);
            }
            self.store_metrics(&identity, &analyzer).await?;
        }

        if options.spectra {
            if task.is_cancelled() {
                bail!("cancelled before spectra for {}", identity);
            }
            self.store_spectra(&identity, &analyzer).await?;
        }

        Ok(())
    }
}

/// Builds one [`CollectorWorker`] per pool worker, each with its own store
/// connection, response cache and analysis runner.
pub struct CollectorFactory {
    config: Config,
    settings: Arc<CollectorSettings>,
}

impl CollectorFactory {
    pub fn new(config: Config, options: StoreOptions) -> Self {
        let settings = Arc::new(CollectorSettings {
            root: config.archive.root.clone(),
            options,
            spectra: config.spectra.clone(),
        });
        Self { config, settings }
    }
}

#[async_trait]
impl WorkerFactory for CollectorFactory {
    type Worker = CollectorWorker;

    async fn create(&self, worker_id: usize) -> Result<CollectorWorker> {
        let store = SqliteStore::open(&self.config.store).await?;
        let inventory = InventoryCache::new(self.config.archive.fdsn_station_url.clone())?;
        let analyzer = Analyzer::from_config(&self.config.analysis);
        debug!("Worker {} initialized", worker_id);
        Ok(CollectorWorker::new(
            self.settings.clone(),
            Arc::new(store),
            inventory,
            analyzer,
        ))
    }
}
