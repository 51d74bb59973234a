//! JSONL snapshot files as a remote source.
//!
//! One file per form, `<form_id>.jsonl`. Each line carries a `type` tag:
//!
//! ```json
//! {"type":"header","columns":["Name","Email"],"watermark":1700000000000}
//! {"type":"record","entryId":"entry_1","data":{"Name":"Ada"},"modifiedAt":"2023-11-14 22:13:20"}
//! ```
//!
//! Row order in the file is the sheet's row order, so a row-index hint is
//! the zero-based position among record lines.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::RemoteRecord;
use crate::remote::{ListResponse, PointResponse, RemoteReader};
use crate::time::{EpochMs, TimeCodec};

/// First line of a snapshot file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotHeader {
    #[serde(default)]
    pub columns: Vec<String>,
    /// When the snapshot was taken, in any timestamp encoding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watermark: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SnapshotLine {
    Header(SnapshotHeader),
    Record(RemoteRecord),
}

#[derive(Debug, Default)]
struct Snapshot {
    header: SnapshotHeader,
    records: Vec<RemoteRecord>,
}

/// Reads forms from a directory of snapshot files.
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    dir: PathBuf,
    codec: TimeCodec,
}

impl SnapshotReader {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, codec: TimeCodec) -> Self {
        Self {
            dir: dir.into(),
            codec,
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a form's snapshot file.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for ids that would escape the directory.
    pub fn path_for(&self, form_id: &str) -> Result<PathBuf> {
        snapshot_path(&self.dir, form_id)
    }

    fn load(&self, form_id: &str) -> Result<Snapshot> {
        read_snapshot(&self.path_for(form_id)?)
    }

    /// The snapshot's watermark, or the newest row if it has none.
    fn watermark(&self, snapshot: &Snapshot) -> Option<Value> {
        snapshot.header.watermark.clone().or_else(|| {
            snapshot
                .records
                .iter()
                .filter_map(|r| r.modified_ms(&self.codec))
                .max()
                .map(Value::from)
        })
    }
}

impl RemoteReader for SnapshotReader {
    async fn list_records(
        &self,
        form_id: &str,
        since_watermark: Option<EpochMs>,
    ) -> Result<ListResponse> {
        let snapshot = self.load(form_id)?;
        let remote_watermark = self.watermark(&snapshot);
        let all_ids = snapshot.records.iter().map(|r| r.entry_id.clone()).collect();

        let records: Vec<RemoteRecord> = snapshot
            .records
            .into_iter()
            .enumerate()
            .filter_map(|(pos, mut record)| {
                let changed = since_watermark.is_none_or(|since| {
                    record.modified_ms(&self.codec).is_some_and(|ms| ms > since)
                });
                if !changed {
                    return None;
                }
                record.row_index = record.row_index.or(u32::try_from(pos).ok());
                Some(record)
            })
            .collect();

        debug!(
            form_id,
            rows = records.len(),
            delta = since_watermark.is_some(),
            "Read snapshot"
        );
        Ok(ListResponse {
            records,
            all_ids: Some(all_ids),
            header_shape: snapshot.header.columns,
            remote_watermark,
            is_delta: since_watermark.is_some(),
            schema_hash: snapshot.header.schema_hash,
        })
    }

    async fn get_record(
        &self,
        form_id: &str,
        entry_id: &str,
        row_index_hint: Option<u32>,
    ) -> Result<PointResponse> {
        let snapshot = self.load(form_id)?;

        let position = match row_index_hint {
            Some(hint) => Some(hint as usize),
            None => snapshot.records.iter().position(|r| r.entry_id == entry_id),
        };
        let Some(position) = position else {
            return Ok(PointResponse::default());
        };

        let row_index = u32::try_from(position).ok();
        let record = snapshot.records.into_iter().nth(position).map(|mut r| {
            r.row_index = row_index;
            r
        });
        Ok(PointResponse { record, row_index })
    }
}

fn snapshot_path(dir: &Path, form_id: &str) -> Result<PathBuf> {
    if form_id.is_empty()
        || form_id.starts_with('.')
        || form_id.contains(['/', '\\'])
    {
        return Err(Error::InvalidArgument(format!("Invalid form id: {form_id:?}")));
    }
    Ok(dir.join(format!("{form_id}.jsonl")))
}

fn read_snapshot(path: &Path) -> Result<Snapshot> {
    if !path.exists() {
        return Err(Error::SnapshotNotFound {
            path: path.to_path_buf(),
        });
    }

    let reader = BufReader::new(File::open(path)?);
    let mut snapshot = Snapshot::default();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        let parsed: SnapshotLine =
            serde_json::from_str(&line).map_err(|e| Error::InvalidSnapshot {
                line: line_num + 1,
                message: e.to_string(),
            })?;
        match parsed {
            SnapshotLine::Header(header) => snapshot.header = header,
            SnapshotLine::Record(record) => snapshot.records.push(record),
        }
    }

    Ok(snapshot)
}

/// Write a form's snapshot file atomically.
///
/// The content goes to a `.jsonl.tmp` sibling, is synced to disk, then
/// renamed over the target, so readers never see a partial file.
///
/// # Errors
///
/// Returns an error if the form id is invalid or any file operation fails.
pub fn write_snapshot(
    dir: &Path,
    form_id: &str,
    header: &SnapshotHeader,
    records: &[RemoteRecord],
) -> Result<PathBuf> {
    let path = snapshot_path(dir, form_id)?;
    let temp_path = path.with_extension("jsonl.tmp");
    fs::create_dir_all(dir)?;

    {
        let mut writer = BufWriter::new(File::create(&temp_path)?);
        serde_json::to_writer(&mut writer, &SnapshotLine::Header(header.clone()))?;
        writer.write_all(b"\n")?;
        for record in records {
            serde_json::to_writer(&mut writer, &SnapshotLine::Record(record.clone()))?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }

    fs::rename(&temp_path, &path)?;
    Ok(path)
}
