//! sheetsync - offline-first cache for spreadsheet-backed forms
//!
//! Records of each form live in a local `SQLite` cache and are reconciled
//! with a remote source through full snapshots, watermark deltas, and
//! single-row point reads.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line interface using clap
//! - [`model`] - Data types (Record, `RemoteRecord`, `FormMeta`)
//! - [`storage`] - Record store over `SQLite` or in-memory backends
//! - [`sync`] - Freshness policy, merge planning, and the sync engine
//! - [`remote`] - Remote reader trait and the JSONL snapshot source
//! - [`config`] - Configuration management
//! - [`time`] - Timestamp decoding and clocks
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod remote;
pub mod storage;
pub mod sync;
pub mod time;

pub use error::{Error, Result};
