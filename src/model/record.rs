//! Record model.
//!
//! A `RemoteRecord` is what the sheet hands back: timestamps in whatever
//! encoding the cell happened to hold. It is decoded exactly once, into a
//! `Record`, before it reaches the store. Stored records only carry
//! canonical epoch milliseconds for comparison.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::time::{EpochMs, TimeCodec, TimestampSources, format_epoch_ms};

/// A cached form entry.
///
/// `(form_id, entry_id)` is the storage primary key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Unique within the form
    pub entry_id: String,

    pub form_id: String,

    /// Field path -> value
    #[serde(default)]
    pub data: BTreeMap<String, Value>,

    /// Field path -> last change of that field (canonical)
    #[serde(default)]
    pub data_timestamps: BTreeMap<String, EpochMs>,

    /// Display form of the creation time
    #[serde(default)]
    pub created_at: String,

    /// Display form of the last modification time
    #[serde(default)]
    pub modified_at: String,

    pub created_at_epoch_ms: Option<EpochMs>,

    pub modified_at_epoch_ms: Option<EpochMs>,

    /// Ordinal sequence number assigned by the remote source
    pub sequence: Option<i64>,

    pub created_by: Option<String>,

    pub modified_by: Option<String>,

    /// Best-effort position of this row in the remote source
    pub row_index: Option<u32>,

    /// When this row was last written locally. `None` once the content
    /// is remote-confirmed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub written_at: Option<EpochMs>,
}

impl Record {
    /// Create a brand-new local entry.
    #[must_use]
    pub fn new_local(
        form_id: &str,
        entry_id: &str,
        data: BTreeMap<String, Value>,
        actor: Option<&str>,
        now: EpochMs,
    ) -> Self {
        let data_timestamps = data.keys().map(|k| (k.clone(), now)).collect();
        Self {
            entry_id: entry_id.to_string(),
            form_id: form_id.to_string(),
            data,
            data_timestamps,
            created_at: format_epoch_ms(now),
            modified_at: format_epoch_ms(now),
            created_at_epoch_ms: Some(now),
            modified_at_epoch_ms: Some(now),
            sequence: None,
            created_by: actor.map(String::from),
            modified_by: actor.map(String::from),
            row_index: None,
            written_at: None,
        }
    }

    /// Apply a local field edit on top of this record.
    ///
    /// Only fields whose value actually changes get a fresh field timestamp.
    #[must_use]
    pub fn edited(&self, patch: BTreeMap<String, Value>, actor: Option<&str>, now: EpochMs) -> Self {
        let mut next = self.clone();
        for (path, value) in patch {
            if next.data.get(&path) != Some(&value) {
                next.data_timestamps.insert(path.clone(), now);
                next.data.insert(path, value);
            }
        }
        next.modified_at = format_epoch_ms(now);
        next.modified_at_epoch_ms = Some(now);
        if let Some(actor) = actor {
            next.modified_by = Some(actor.to_string());
        }
        next
    }

    /// Canonical modified time; unknown reads as the oldest possible moment.
    #[must_use]
    pub fn modified_ms(&self) -> EpochMs {
        self.modified_at_epoch_ms.unwrap_or(0)
    }

    /// Whether a local write newer than `anchor` has landed on this row.
    #[must_use]
    pub fn written_after(&self, anchor: EpochMs) -> bool {
        self.written_at.is_some_and(|at| at > anchor)
    }
}

/// An entry as read from the remote sheet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord {
    pub entry_id: String,

    #[serde(default)]
    pub data: BTreeMap<String, Value>,

    /// Field path -> raw temporal value (any encoding)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data_timestamps: BTreeMap<String, Value>,

    /// Display value: a string or a bare number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at_epoch_ms: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at_epoch_ms: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at_date: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at_date: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_index: Option<u32>,
}

impl RemoteRecord {
    /// Canonical modified time, without decoding the rest of the record.
    #[must_use]
    pub fn modified_ms(&self, codec: &TimeCodec) -> Option<EpochMs> {
        codec.resolve(TimestampSources::new(
            self.modified_at_epoch_ms,
            self.modified_at_date,
            self.modified_at.as_ref(),
        ))
    }

    /// Canonical creation time.
    #[must_use]
    pub fn created_ms(&self, codec: &TimeCodec) -> Option<EpochMs> {
        codec.resolve(TimestampSources::new(
            self.created_at_epoch_ms,
            self.created_at_date,
            self.created_at.as_ref(),
        ))
    }

    /// Decode into the canonical stored form.
    ///
    /// Field timestamps that cannot be decoded are dropped rather than
    /// guessed at.
    #[must_use]
    pub fn decode(self, form_id: &str, codec: &TimeCodec) -> Record {
        let created = self.created_ms(codec);
        let modified = self.modified_ms(codec);
        let data_timestamps = self
            .data_timestamps
            .iter()
            .filter_map(|(path, raw)| codec.to_epoch_ms(raw).map(|ms| (path.clone(), ms)))
            .collect();

        Record {
            created_at: display_value(self.created_at.as_ref(), created),
            modified_at: display_value(self.modified_at.as_ref(), modified),
            entry_id: self.entry_id,
            form_id: form_id.to_string(),
            data: self.data,
            data_timestamps,
            created_at_epoch_ms: created,
            modified_at_epoch_ms: modified,
            sequence: self.sequence,
            created_by: self.created_by,
            modified_by: self.modified_by,
            row_index: self.row_index,
            written_at: None,
        }
    }
}

impl From<&Record> for RemoteRecord {
    fn from(record: &Record) -> Self {
        Self {
            entry_id: record.entry_id.clone(),
            data: record.data.clone(),
            data_timestamps: record
                .data_timestamps
                .iter()
                .map(|(path, ms)| (path.clone(), Value::from(*ms)))
                .collect(),
            created_at: Some(Value::String(record.created_at.clone())),
            modified_at: Some(Value::String(record.modified_at.clone())),
            created_at_epoch_ms: record.created_at_epoch_ms,
            modified_at_epoch_ms: record.modified_at_epoch_ms,
            created_at_date: None,
            modified_at_date: None,
            sequence: record.sequence,
            created_by: record.created_by.clone(),
            modified_by: record.modified_by.clone(),
            row_index: record.row_index,
        }
    }
}

/// Keep the sheet's own string if it sent one, else render the canonical value.
fn display_value(raw: Option<&Value>, canonical: Option<EpochMs>) -> String {
    match raw {
        Some(Value::String(s)) => s.clone(),
        _ => canonical.map(format_epoch_ms).unwrap_or_default(),
    }
}
