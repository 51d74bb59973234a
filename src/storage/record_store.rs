//! Persistent per-form record cache.
//!
//! `RecordStore` turns merge plans and point writes into atomic
//! [`WriteBatch`]es against any [`StoreBackend`]. It never talks to the
//! remote; the engine hands it decoded records.
//!
//! # Write fences
//!
//! A local point write stamps `written_at` on its row. Anchored merges and
//! anchored point writes leave alone any row written after their anchor,
//! so a slow fetch cannot clobber an edit that landed while it was in
//! flight. The fence is checked again inside the commit, and metadata is
//! sent as a [`MetaUpdate`] folded into whatever is stored by then.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::{FormMeta, MetaUpdate, Record};
use crate::storage::backend::{StoreBackend, WriteBatch};
use crate::sync::index::{EntryIndex, IndexUpdate, Located, binary_search};
use crate::sync::merge::{self, latest_by_id};
use crate::time::{Clock, EpochMs};

/// Who produced a point write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteOrigin {
    /// A user action on this device; not yet confirmed by the remote.
    #[default]
    Local,
    /// A refresh of remote content.
    Remote,
}

#[derive(Debug, Clone, Default)]
pub struct FullSyncOptions {
    pub schema_hash: Option<String>,
    /// Fetch start time. When set, the cache is merged instead of replaced.
    pub merge_anchor: Option<EpochMs>,
    pub remote_watermark: Option<EpochMs>,
}

#[derive(Debug, Clone, Default)]
pub struct DeltaMergeOptions {
    pub merge_anchor: Option<EpochMs>,
    pub remote_watermark: Option<EpochMs>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UpsertOptions {
    pub row_index: Option<u32>,
    pub write_anchor: Option<EpochMs>,
    pub origin: WriteOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Written,
    /// A fresher stored state won; nothing was written.
    Superseded,
}

/// Counts from one sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Rows left as they were: cached copy newer, add refused, or fenced
    pub skipped: usize,
}

impl MergeStats {
    #[must_use]
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

/// Everything cached for one form.
#[derive(Debug, Clone, Default)]
pub struct FormSnapshot {
    /// Ascending by entry id
    pub records: Vec<Record>,
    pub meta: Option<FormMeta>,
}

/// The cache. Cheap to share behind an `Arc`.
pub struct RecordStore<B> {
    backend: B,
    clock: Arc<dyn Clock>,
}

impl<B: StoreBackend> RecordStore<B> {
    pub fn new(backend: B, clock: Arc<dyn Clock>) -> Self {
        Self { backend, clock }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[must_use]
    pub fn now_ms(&self) -> EpochMs {
        self.clock.now_ms()
    }

    /// Replace or merge a form's whole table with a full remote read.
    ///
    /// Without a merge anchor the cache is cleared and rewritten. With one,
    /// the read is merged as a closed-world set so rows written locally
    /// after the anchor survive.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to load or commit.
    pub async fn full_sync(
        &self,
        form_id: &str,
        records: Vec<Record>,
        header_shape: Vec<String>,
        opts: FullSyncOptions,
    ) -> Result<MergeStats> {
        let FullSyncOptions {
            schema_hash,
            merge_anchor,
            remote_watermark,
        } = opts;

        let Some(anchor) = merge_anchor else {
            return self
                .replace_all(form_id, records, header_shape, schema_hash, remote_watermark)
                .await;
        };

        let all_ids: HashSet<String> = records.iter().map(|r| r.entry_id.clone()).collect();
        self.apply_merge(
            form_id,
            records,
            Some(&all_ids),
            remote_watermark,
            Some(anchor),
            |update| {
                update.header_shape = Some(header_shape);
                update.schema_hash = schema_hash;
                update.confirm_local_up_to = remote_watermark;
            },
        )
        .await
    }

    /// Merge a subset of changed rows.
    ///
    /// Rows missing from `changed` are only deleted when `all_ids` proves
    /// them gone.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to load or commit.
    pub async fn delta_merge(
        &self,
        form_id: &str,
        changed: Vec<Record>,
        all_ids: Option<&HashSet<String>>,
        header_shape: Option<Vec<String>>,
        schema_hash: Option<String>,
        opts: DeltaMergeOptions,
    ) -> Result<MergeStats> {
        self.apply_merge(
            form_id,
            changed,
            all_ids,
            opts.remote_watermark,
            opts.merge_anchor,
            |update| {
                update.header_shape = header_shape;
                update.schema_hash = schema_hash;
            },
        )
        .await
    }

    async fn replace_all(
        &self,
        form_id: &str,
        records: Vec<Record>,
        header_shape: Vec<String>,
        schema_hash: Option<String>,
        remote_watermark: Option<EpochMs>,
    ) -> Result<MergeStats> {
        let now = self.clock.now_ms();
        let previous: HashSet<String> = self
            .backend
            .load_records(form_id)
            .await?
            .into_iter()
            .map(|r| r.entry_id)
            .collect();

        let mut sorted: Vec<Record> = latest_by_id(records).into_values().collect();
        sorted.sort_by(|a, b| a.entry_id.cmp(&b.entry_id));

        let mut stats = MergeStats::default();
        let mut batch = WriteBatch::new().clear().fence(Some(now));
        for mut record in sorted.iter().cloned() {
            if previous.contains(&record.entry_id) {
                stats.updated += 1;
            } else {
                stats.created += 1;
            }
            record.form_id = form_id.to_string();
            record.written_at = None;
            batch = batch.put(record);
        }
        let kept: HashSet<&str> = sorted.iter().map(|r| r.entry_id.as_str()).collect();
        stats.deleted = previous.iter().filter(|id| !kept.contains(id.as_str())).count();

        let update = MetaUpdate {
            synced_at: Some(now),
            remote_watermark,
            confirm_local_up_to: remote_watermark,
            header_shape: Some(header_shape),
            schema_hash,
            index: IndexUpdate::Replace(EntryIndex::from_records(&sorted)),
            ..MetaUpdate::new()
        };

        self.backend.commit(form_id, batch.meta(update)).await?;
        info!(
            form_id,
            created = stats.created,
            updated = stats.updated,
            deleted = stats.deleted,
            "Replaced cached form"
        );
        Ok(stats)
    }

    async fn apply_merge<F>(
        &self,
        form_id: &str,
        incoming: Vec<Record>,
        all_ids: Option<&HashSet<String>>,
        remote_watermark: Option<EpochMs>,
        merge_anchor: Option<EpochMs>,
        update_meta: F,
    ) -> Result<MergeStats>
    where
        F: FnOnce(&mut MetaUpdate) + Send,
    {
        let now = self.clock.now_ms();
        let existing = self.backend.load_records(form_id).await?;
        let local_mutation_at = self
            .backend
            .load_meta(form_id)
            .await?
            .and_then(|meta| meta.last_local_mutation_at);

        let plan = merge::plan(
            existing,
            incoming,
            all_ids,
            remote_watermark,
            local_mutation_at,
        );
        debug!(
            form_id,
            updates = plan.common_update_ids.len(),
            deletes = plan.cache_only_delete_ids.len(),
            adds = plan.incoming_only_add_ids.len(),
            rejected = plan.rejected_add_ids.len(),
            closed_world = plan.closed_world,
            cache_ahead = plan.cache_ahead,
            max_existing_ms = plan.max_existing_modified_ms,
            max_incoming_ms = plan.max_incoming_modified_ms,
            "Planned merge"
        );

        // Refused adds must stay above the watermark so a later delta sees them again.
        let held_back = plan
            .rejected_add_ids
            .iter()
            .filter_map(|id| plan.incoming.get(id))
            .map(Record::modified_ms)
            .filter(|&ms| ms > 0)
            .min();
        let watermark = match held_back {
            Some(oldest) => remote_watermark.map(|w| w.min(oldest - 1)),
            None => remote_watermark,
        };
        if watermark != remote_watermark {
            debug!(
                form_id,
                remote_watermark = ?remote_watermark,
                held_at = ?watermark,
                "Watermark held below refused adds"
            );
        }

        let fenced = |id: &str| {
            merge_anchor.is_some_and(|anchor| {
                plan.existing
                    .get(id)
                    .is_some_and(|cached| cached.written_after(anchor))
            })
        };

        let mut stats = MergeStats {
            skipped: plan.retained_ids.len() + plan.rejected_add_ids.len(),
            ..MergeStats::default()
        };
        let mut live: BTreeSet<&str> = plan.existing.keys().map(String::as_str).collect();
        let mut batch = WriteBatch::new().fence(merge_anchor);

        for id in &plan.cache_only_delete_ids {
            if fenced(id) {
                stats.skipped += 1;
                continue;
            }
            live.remove(id.as_str());
            batch = batch.delete(id.clone());
            stats.deleted += 1;
        }

        for id in plan
            .common_update_ids
            .iter()
            .chain(plan.incoming_only_add_ids.iter())
        {
            if fenced(id) {
                stats.skipped += 1;
                continue;
            }
            let Some(remote_copy) = plan.incoming.get(id) else {
                continue;
            };
            let cached = plan.existing.get(id);
            let mut record = remote_copy.clone();
            record.form_id = form_id.to_string();
            record.written_at = None;
            record.row_index = record.row_index.or_else(|| cached.and_then(|c| c.row_index));
            if cached.is_some() {
                stats.updated += 1;
            } else {
                stats.created += 1;
                live.insert(id.as_str());
            }
            batch = batch.put(record);
        }

        let mut update = MetaUpdate {
            synced_at: Some(now),
            remote_watermark: watermark,
            index: IndexUpdate::Replace(EntryIndex::from_sorted_ids(live)),
            ..MetaUpdate::new()
        };
        update_meta(&mut update);

        self.backend.commit(form_id, batch.meta(update)).await?;
        info!(
            form_id,
            created = stats.created,
            updated = stats.updated,
            deleted = stats.deleted,
            skipped = stats.skipped,
            "Merged remote read"
        );
        Ok(stats)
    }

    /// Write one record.
    ///
    /// Dropped when the stored row was written after `write_anchor`. A
    /// remote-origin write also never replaces a stored copy with a
    /// strictly newer modified time.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to load or commit.
    pub async fn point_upsert(
        &self,
        form_id: &str,
        mut record: Record,
        opts: UpsertOptions,
    ) -> Result<UpsertOutcome> {
        let now = self.clock.now_ms();
        let stored = self.backend.load_record(form_id, &record.entry_id).await?;

        if let (Some(anchor), Some(current)) = (opts.write_anchor, stored.as_ref()) {
            if current.written_after(anchor) {
                debug!(
                    form_id,
                    entry_id = %record.entry_id,
                    anchor,
                    written_at = ?current.written_at,
                    "Point write superseded by a later local write"
                );
                return Ok(UpsertOutcome::Superseded);
            }
        }
        if opts.origin == WriteOrigin::Remote
            && stored
                .as_ref()
                .is_some_and(|current| current.modified_ms() > record.modified_ms())
        {
            debug!(form_id, entry_id = %record.entry_id, "Cached copy newer than refresh");
            return Ok(UpsertOutcome::Superseded);
        }

        record.form_id = form_id.to_string();
        record.row_index = opts
            .row_index
            .or(record.row_index)
            .or_else(|| stored.as_ref().and_then(|s| s.row_index));

        let mut update = MetaUpdate::new();
        if stored.is_none() {
            update.index = IndexUpdate::Admit(record.entry_id.clone());
        }
        match opts.origin {
            WriteOrigin::Local => {
                record.written_at = Some(now);
                update.local_mutation_at = Some(now);
            }
            WriteOrigin::Remote => record.written_at = None,
        }

        debug!(form_id, entry_id = %record.entry_id, origin = ?opts.origin, "Point upsert");
        let mut batch = WriteBatch::new().fence(opts.write_anchor).put(record);
        if update != MetaUpdate::new() {
            batch = batch.meta(update);
        }
        self.backend.commit(form_id, batch).await?;
        Ok(UpsertOutcome::Written)
    }

    /// Create or edit an entry as a local write.
    ///
    /// Edits only re-stamp fields whose value changes. New entries without
    /// an id get `entry_<12 hex>`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read or write fails.
    pub async fn save_local(
        &self,
        form_id: &str,
        entry_id: Option<&str>,
        patch: BTreeMap<String, Value>,
        actor: Option<&str>,
    ) -> Result<Record> {
        let now = self.clock.now_ms();
        let existing = match entry_id {
            Some(id) => self.read_entry(form_id, id).await?,
            None => None,
        };

        let record = match (existing, entry_id) {
            (Some(current), _) => current.edited(patch, actor, now),
            (None, Some(id)) => Record::new_local(form_id, id, patch, actor, now),
            (None, None) => {
                let id = format!("entry_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);
                Record::new_local(form_id, &id, patch, actor, now)
            }
        };

        let entry_id = record.entry_id.clone();
        self.point_upsert(form_id, record, UpsertOptions::default())
            .await?;
        info!(form_id, entry_id = %entry_id, "Saved entry");
        self.read_entry(form_id, &entry_id)
            .await?
            .ok_or_else(|| Error::EntryNotFound {
                form_id: form_id.to_string(),
                entry_id,
            })
    }

    /// Remove one record and its index entry.
    ///
    /// Returns `false` if it was not cached.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to load or commit.
    pub async fn point_delete(&self, form_id: &str, entry_id: &str) -> Result<bool> {
        if self.backend.load_record(form_id, entry_id).await?.is_none() {
            return Ok(false);
        }
        let update = MetaUpdate {
            local_mutation_at: Some(self.clock.now_ms()),
            index: IndexUpdate::Retire(entry_id.to_string()),
            ..MetaUpdate::new()
        };

        self.backend
            .commit(form_id, WriteBatch::new().delete(entry_id).meta(update))
            .await?;
        debug!(form_id, entry_id, "Point delete");
        Ok(true)
    }

    /// All cached rows of a form plus its metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend read fails.
    pub async fn read_all(&self, form_id: &str) -> Result<FormSnapshot> {
        let records = self.backend.load_records(form_id).await?;
        let meta = self.backend.load_meta(form_id).await?;
        Ok(FormSnapshot { records, meta })
    }

    /// One cached row.
    ///
    /// Tries the index ordinal first and validates it. On any miss the id
    /// is binary searched and the repaired index is persisted.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend read or index write fails.
    pub async fn read_entry(&self, form_id: &str, entry_id: &str) -> Result<Option<Record>> {
        let Some(mut meta) = self.backend.load_meta(form_id).await? else {
            let records = self.backend.load_records(form_id).await?;
            return Ok(binary_search(&records, entry_id).map(|pos| records[pos].clone()));
        };

        if let Some(ordinal) = meta.entry_index.position(entry_id) {
            if let Some(record) = self.backend.record_at(form_id, ordinal).await? {
                if record.entry_id == entry_id {
                    return Ok(Some(record));
                }
            }
        }

        let mut records = self.backend.load_records(form_id).await?;
        let before = meta.entry_index.clone();
        let located = meta.entry_index.locate(&records, entry_id);
        if meta.entry_index != before {
            debug!(form_id, entry_id, entries = meta.entry_index.len(), "Repaired entry index");
            let update = MetaUpdate {
                index: IndexUpdate::Replace(meta.entry_index),
                ..MetaUpdate::new()
            };
            self.backend
                .commit(form_id, WriteBatch::new().meta(update))
                .await?;
        }

        Ok(match located {
            Located::Hit(pos) | Located::Repaired(pos) => Some(records.swap_remove(pos)),
            Located::Missing => None,
        })
    }

    /// Metadata only, without loading rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend read fails.
    pub async fn read_meta(&self, form_id: &str) -> Result<Option<FormMeta>> {
        self.backend.load_meta(form_id).await
    }

    /// Record a sync that changed nothing: bump `last_synced_at` and move
    /// the watermark forward.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to load or commit.
    pub async fn touch_watermark(
        &self,
        form_id: &str,
        remote_watermark: Option<EpochMs>,
    ) -> Result<()> {
        let update = MetaUpdate {
            synced_at: Some(self.clock.now_ms()),
            remote_watermark,
            ..MetaUpdate::new()
        };
        self.backend
            .commit(form_id, WriteBatch::new().meta(update))
            .await
    }

    /// Every form with anything cached.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend read fails.
    pub async fn forms(&self) -> Result<Vec<String>> {
        self.backend.form_ids().await
    }
}
