//! Data models for sheetsync.
//!
//! This module contains the domain models:
//! - `Record` - one cached form entry, timestamps canonicalized
//! - `RemoteRecord` - an entry as the remote sheet hands it over
//! - `FormMeta` - per-form sync bookkeeping, and `MetaUpdate` for writes to it

pub mod meta;
pub mod record;

pub use meta::{FormMeta, MetaUpdate};
pub use record::{Record, RemoteRecord};
