//! Per-form sync metadata.

use serde::{Deserialize, Serialize};

use crate::sync::{EntryIndex, IndexUpdate};
use crate::time::EpochMs;

/// Bookkeeping stored alongside each form's cached records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormMeta {
    pub form_id: String,

    /// Last successful sync of any kind
    pub last_synced_at: Option<EpochMs>,

    /// Marker sent with the next delta read
    pub last_remote_read_watermark: Option<EpochMs>,

    /// Most recent local write not yet covered by a confirmed full snapshot
    pub last_local_mutation_at: Option<EpochMs>,

    /// Remote column layout
    #[serde(default)]
    pub header_shape: Vec<String>,

    pub schema_hash: Option<String>,

    /// entry id -> ordinal in ascending-id order. Only a hint; validated on use.
    #[serde(default)]
    pub entry_index: EntryIndex,
}

impl FormMeta {
    #[must_use]
    pub fn new(form_id: &str) -> Self {
        Self {
            form_id: form_id.to_string(),
            ..Self::default()
        }
    }

    /// Move the read watermark forward; never backwards.
    pub fn advance_watermark(&mut self, remote_watermark: Option<EpochMs>) {
        self.last_remote_read_watermark =
            max_opt(self.last_remote_read_watermark, remote_watermark);
    }

    /// Record a local write at `at`; never regresses.
    pub fn note_local_mutation(&mut self, at: EpochMs) {
        self.last_local_mutation_at = max_opt(self.last_local_mutation_at, Some(at));
    }

    /// Forget the pending local mutation if a full snapshot at
    /// `remote_watermark` already covers it.
    pub fn confirm_snapshot(&mut self, remote_watermark: Option<EpochMs>) {
        if let (Some(local), Some(remote)) = (self.last_local_mutation_at, remote_watermark) {
            if remote >= local {
                self.last_local_mutation_at = None;
            }
        }
    }
}

/// A metadata write, folded into whatever is stored at commit time.
///
/// Writers only describe what they observed. Time marks never move
/// backwards however commits interleave, and the local-mutation mark is
/// only cleared if nothing newer than `confirm_local_up_to` was stored
/// since the writer loaded it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetaUpdate {
    pub synced_at: Option<EpochMs>,
    pub remote_watermark: Option<EpochMs>,
    pub local_mutation_at: Option<EpochMs>,
    /// A full snapshot at this watermark covers local writes up to it
    pub confirm_local_up_to: Option<EpochMs>,
    /// Replaces the stored layout when set
    pub header_shape: Option<Vec<String>>,
    /// Replaces the stored hash when set
    pub schema_hash: Option<String>,
    pub index: IndexUpdate,
}

impl MetaUpdate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold into the stored row (or a fresh one).
    #[must_use]
    pub fn apply(self, form_id: &str, stored: Option<FormMeta>) -> FormMeta {
        let mut meta = stored.unwrap_or_else(|| FormMeta::new(form_id));
        meta.last_synced_at = max_opt(meta.last_synced_at, self.synced_at);
        meta.advance_watermark(self.remote_watermark);
        if let Some(at) = self.local_mutation_at {
            meta.note_local_mutation(at);
        }
        meta.confirm_snapshot(self.confirm_local_up_to);
        if let Some(header) = self.header_shape {
            meta.header_shape = header;
        }
        if self.schema_hash.is_some() {
            meta.schema_hash = self.schema_hash;
        }
        meta.entry_index.apply(self.index);
        meta
    }
}

fn max_opt(a: Option<EpochMs>, b: Option<EpochMs>) -> Option<EpochMs> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watermark_never_regresses() {
        let mut meta = FormMeta::new("f");
        meta.advance_watermark(Some(200));
        meta.advance_watermark(Some(100));
        meta.advance_watermark(None);
        assert_eq!(meta.last_remote_read_watermark, Some(200));
    }

    #[test]
    fn test_local_mutation_confirmation() {
        let mut meta = FormMeta::new("f");
        meta.note_local_mutation(300);
        meta.note_local_mutation(250);
        assert_eq!(meta.last_local_mutation_at, Some(300));

        meta.confirm_snapshot(Some(299));
        assert_eq!(meta.last_local_mutation_at, Some(300));
        meta.confirm_snapshot(None);
        assert_eq!(meta.last_local_mutation_at, Some(300));
        meta.confirm_snapshot(Some(300));
        assert_eq!(meta.last_local_mutation_at, None);
    }

    #[test]
    fn test_update_never_rolls_back_stored_marks() {
        let mut stored = FormMeta::new("f");
        stored.last_synced_at = Some(500);
        stored.last_remote_read_watermark = Some(400);
        stored.note_local_mutation(1_100);

        // Loaded before the local write landed: no local mark, older sync.
        let update = MetaUpdate {
            synced_at: Some(450),
            remote_watermark: Some(900),
            confirm_local_up_to: Some(900),
            ..MetaUpdate::new()
        };
        let merged = update.apply("f", Some(stored));
        assert_eq!(merged.last_synced_at, Some(500));
        assert_eq!(merged.last_remote_read_watermark, Some(900));
        assert_eq!(merged.last_local_mutation_at, Some(1_100));
    }

    #[test]
    fn test_update_confirms_covered_local_mark() {
        let mut stored = FormMeta::new("f");
        stored.note_local_mutation(800);
        stored.header_shape = vec!["Old".to_string()];

        let update = MetaUpdate {
            confirm_local_up_to: Some(900),
            header_shape: Some(vec!["New".to_string()]),
            index: IndexUpdate::Admit("a".to_string()),
            ..MetaUpdate::new()
        };
        let merged = update.apply("f", Some(stored));
        assert_eq!(merged.last_local_mutation_at, None);
        assert_eq!(merged.header_shape, vec!["New"]);
        assert_eq!(merged.entry_index.position("a"), Some(0));

        let fresh = MetaUpdate::new().apply("g", None);
        assert_eq!(fresh, FormMeta::new("g"));
    }
}
