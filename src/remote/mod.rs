//! Remote record source.
//!
//! The transport is not ours: anything that can list a form's rows (fully
//! or since a watermark) and fetch one row can drive the engine.
//! [`SnapshotReader`] is the bundled implementation over JSONL files.

mod snapshot;

use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::model::RemoteRecord;
use crate::time::EpochMs;

pub use snapshot::{SnapshotHeader, SnapshotReader, write_snapshot};

/// Result of listing a form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    /// Every row, or only rows changed since the requested watermark
    pub records: Vec<RemoteRecord>,
    /// Closed-world set of live ids, when the source can afford it
    #[serde(default)]
    pub all_ids: Option<Vec<String>>,
    #[serde(default)]
    pub header_shape: Vec<String>,
    /// Marker for the next delta read, in any timestamp encoding
    #[serde(default)]
    pub remote_watermark: Option<Value>,
    #[serde(default)]
    pub is_delta: bool,
    #[serde(default)]
    pub schema_hash: Option<String>,
}

/// Result of fetching one row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointResponse {
    /// Whatever sits at the requested position; may not be the requested id
    pub record: Option<RemoteRecord>,
    pub row_index: Option<u32>,
}

/// Read side of the remote source.
pub trait RemoteReader: Send + Sync {
    /// List a form. `since_watermark` asks for a delta read.
    fn list_records(
        &self,
        form_id: &str,
        since_watermark: Option<EpochMs>,
    ) -> impl Future<Output = Result<ListResponse>> + Send;

    /// Fetch one row, using `row_index_hint` to skip a scan when given.
    fn get_record(
        &self,
        form_id: &str,
        entry_id: &str,
        row_index_hint: Option<u32>,
    ) -> impl Future<Output = Result<PointResponse>> + Send;
}
