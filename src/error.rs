//! Error kinds callers branch on.
//!
//! Per-file kinds (`InvalidIdentifier`, `Io`) are contained by the pipeline
//! and only surface in logs and counts; task timeouts and failures travel as
//! scheduler outcomes. Selection and store kinds abort the run before any
//! work is dispatched.

use std::path::PathBuf;

use thiserror::Error;
use wfcollector_core::identity::IdentityError;

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error(transparent)]
    InvalidIdentifier(IdentityError),

    #[error("multiple file input options were given ({0}); choose one")]
    AmbiguousSelection(String),

    #[error("no file input option was given")]
    NoSelection,

    #[error("invalid selection: {0}")]
    InvalidSelection(String),

    #[error("{} does not exist", .0.display())]
    NotFound(PathBuf),

    #[error(transparent)]
    Io(IdentityError),

    #[error("result store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<IdentityError> for CollectorError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::InvalidIdentifier { .. } => CollectorError::InvalidIdentifier(err),
            IdentityError::Io { .. } => CollectorError::Io(err),
        }
    }
}
