//! Change detection.
//!
//! A day's derived results depend on up to one day of padding on either
//! side, so a changed file invalidates its whole neighbour window
//! (previous, self, next). Unchanged files contribute nothing.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use wfcollector_core::identity::FileIdentity;
use wfcollector_core::store::ResultStore;

use crate::cancel::CancellationToken;

/// Deduplicated set of filenames selected for (re)processing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkSet {
    filenames: BTreeSet<String>,
}

impl WorkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, filename: impl Into<String>) -> bool {
        self.filenames.insert(filename.into())
    }

    pub fn extend<I: IntoIterator<Item = String>>(&mut self, filenames: I) {
        self.filenames.extend(filenames);
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.filenames.contains(filename)
    }

    pub fn len(&self) -> usize {
        self.filenames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filenames.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.filenames.iter().map(String::as_str)
    }
}

impl IntoIterator for WorkSet {
    type Item = String;
    type IntoIter = std::collections::btree_set::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.filenames.into_iter()
    }
}

/// Expand candidates into the work set.
///
/// With `force`, every candidate's neighbour window is selected. Otherwise
/// only candidates whose fingerprint is unknown to the store are. Candidates
/// that cannot be fingerprinted are logged and skipped; store failures abort.
///
/// Stops between candidates once `shutdown` fires and returns what was
/// selected so far.
pub async fn expand(
    candidates: &[FileIdentity],
    root: &Path,
    store: &dyn ResultStore,
    force: bool,
    shutdown: &CancellationToken,
) -> Result<WorkSet> {
    let mut work = WorkSet::new();

    for candidate in candidates {
        if shutdown.is_cancelled() {
            warn!("Interrupted during change detection; stopping");
            return Ok(work);
        }
        if force {
            debug!("Forcing update on file {} and neighbours", candidate);
            work.extend(candidate.neighbor_filenames(root));
            continue;
        }

        let owned = candidate.clone();
        let owned_root = root.to_path_buf();
        let hashed = tokio::task::spawn_blocking(move || {
            owned.fingerprint(&owned_root).map(str::to_string)
        })
        .await
        .context("Fingerprint task aborted")?;
        let fingerprint = match hashed {
            Ok(hash) => hash,
            Err(err) => {
                warn!("Skipping {}: {}", candidate, err);
                continue;
            }
        };

        let known = store
            .exists(&fingerprint)
            .await
            .with_context(|| format!("Failed to look up fingerprint of {}", candidate))?;

        if known {
            debug!("No sha256 checksum changes detected for file {}", candidate);
        } else {
            let window = candidate.neighbor_filenames(root);
            debug!(
                "File {} with hash {} is not recorded; scheduling {:?}",
                candidate, fingerprint, window
            );
            work.extend(window);
        }
    }

    info!(
        "The file set changed from {} input file(s) to {} file(s) for processing",
        candidates.len(),
        work.len()
    );

    Ok(work)
}
