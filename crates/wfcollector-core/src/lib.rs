//! # wfcollector core
//!
//! Runtime-free building blocks for the waveform metadata collector:
//! SDS file identities, the allow/deny filter chain, persisted document
//! types, and the result store abstraction.
//!
//! This crate has no tokio, sqlx, or network dependencies. The only I/O it
//! performs is reading archived files to fingerprint them and checking
//! whether neighbouring files exist.

pub mod filter;
pub mod identity;
pub mod models;
pub mod store;
