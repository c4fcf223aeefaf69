//! # wfcollector
//!
//! Incremental metadata collector for an SDS waveform archive.
//!
//! Selects archive files, works out which of them changed since the last
//! run, and reprocesses each changed day together with its neighbours on a
//! pool of timeout-bounded workers. Results land in a document store keyed
//! by filename.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌───────────┐   ┌────────────┐
//! │ Locator  │──▶│ Detector │──▶│ Scheduler │──▶│ ResultStore│
//! │ (select) │   │ (sha256) │   │ (workers) │   │  (SQLite)  │
//! └──────────┘   └──────────┘   └─────┬─────┘   └────────────┘
//!                                     │
//!                               ┌─────▼─────┐
//!                               │ analysis  │
//!                               │ command   │
//!                               └───────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`locator`] | Candidate selection from the archive |
//! | [`detect`] | Fingerprint-based change detection |
//! | [`scheduler`] | Worker pool with per-task deadlines |
//! | [`collector`] | Per-file processing task |
//! | [`analysis`] | External metrics / spectra command |
//! | [`inventory`] | Station response cache |
//! | [`sqlite_store`] | SQLite result store |
//! | [`ingest`] | Run orchestration |

pub mod analysis;
pub mod cancel;
pub mod collector;
pub mod config;
pub mod db;
pub mod detect;
pub mod error;
pub mod ingest;
pub mod inventory;
pub mod locator;
pub mod logging;
pub mod migrate;
pub mod progress;
pub mod scheduler;
pub mod sqlite_store;
