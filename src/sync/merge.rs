//! Three-way merge planning between the cache and a remote read.
//!
//! Pure function, no I/O. The store applies the plan.
//!
//! # Rules
//!
//! 1. Each side is reduced to one record per id (greatest modified time).
//! 2. Ids on both sides update when `incoming.modified >= existing.modified`.
//!    Ties go to the remote copy.
//! 3. Ids only in the cache are deleted only if the read carried a
//!    closed-world id set that excludes them, and the cache is not ahead of
//!    the remote (`local_mutation_at > remote_watermark`, both known).
//!    Absence from a delta read only means "unchanged since the watermark".
//! 4. Ids only in the remote read are added only if the remote is at least
//!    as fresh as the last local mutation and the row has a positive
//!    modified time.

use std::collections::{HashMap, HashSet};

use crate::model::Record;
use crate::time::EpochMs;

/// The reconciliation plan for one form.
#[derive(Debug, Clone, Default)]
pub struct MergePlan {
    /// Cached records, latest per id
    pub existing: HashMap<String, Record>,
    /// Remote records, latest per id
    pub incoming: HashMap<String, Record>,
    /// In both; remote copy wins
    pub common_update_ids: Vec<String>,
    /// In both; cached copy is strictly newer and stays
    pub retained_ids: Vec<String>,
    /// Cache-only ids proven gone remotely
    pub cache_only_delete_ids: Vec<String>,
    /// Remote-only ids to insert
    pub incoming_only_add_ids: Vec<String>,
    /// Remote-only ids refused by the freshness or validity gate
    pub rejected_add_ids: Vec<String>,
    pub max_existing_modified_ms: EpochMs,
    pub max_incoming_modified_ms: EpochMs,
    /// Whether a closed-world id set was available
    pub closed_world: bool,
    /// Whether an unconfirmed local write postdates the remote snapshot
    pub cache_ahead: bool,
}

impl MergePlan {
    /// True when applying the plan would change nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.common_update_ids.is_empty()
            && self.cache_only_delete_ids.is_empty()
            && self.incoming_only_add_ids.is_empty()
    }
}

/// Compute the plan.
///
/// `all_ids` is the closed-world set of ids live remotely, when the read
/// could supply one. Both timestamps must already be canonical.
#[must_use]
pub fn plan(
    existing: Vec<Record>,
    incoming: Vec<Record>,
    all_ids: Option<&HashSet<String>>,
    remote_watermark: Option<EpochMs>,
    local_mutation_at: Option<EpochMs>,
) -> MergePlan {
    let existing = latest_by_id(existing);
    let incoming = latest_by_id(incoming);

    let remote = remote_watermark.unwrap_or(0);
    let local = local_mutation_at.unwrap_or(0);
    let cache_ahead = local > 0 && remote > 0 && local > remote;
    let remote_fresh = local_mutation_at.is_none() || remote >= local;

    let mut plan = MergePlan {
        max_existing_modified_ms: max_modified(&existing),
        max_incoming_modified_ms: max_modified(&incoming),
        closed_world: all_ids.is_some(),
        cache_ahead,
        ..MergePlan::default()
    };

    for (id, cached) in &existing {
        match incoming.get(id) {
            Some(remote_copy) => {
                if remote_copy.modified_ms() >= cached.modified_ms() {
                    plan.common_update_ids.push(id.clone());
                } else {
                    plan.retained_ids.push(id.clone());
                }
            }
            None => {
                let proven_gone = all_ids.is_some_and(|ids| !ids.contains(id));
                if proven_gone && !cache_ahead {
                    plan.cache_only_delete_ids.push(id.clone());
                }
            }
        }
    }

    for (id, remote_copy) in &incoming {
        if existing.contains_key(id) {
            continue;
        }
        if remote_fresh && remote_copy.modified_ms() > 0 {
            plan.incoming_only_add_ids.push(id.clone());
        } else {
            plan.rejected_add_ids.push(id.clone());
        }
    }

    plan.common_update_ids.sort();
    plan.retained_ids.sort();
    plan.cache_only_delete_ids.sort();
    plan.incoming_only_add_ids.sort();
    plan.rejected_add_ids.sort();

    plan.existing = existing;
    plan.incoming = incoming;
    plan
}

/// Keep one record per id: the one with the greatest modified time, the
/// later occurrence on a tie.
pub(crate) fn latest_by_id(records: Vec<Record>) -> HashMap<String, Record> {
    let mut latest: HashMap<String, Record> = HashMap::with_capacity(records.len());
    for record in records {
        let replace = latest
            .get(&record.entry_id)
            .is_none_or(|current| record.modified_ms() >= current.modified_ms());
        if replace {
            latest.insert(record.entry_id.clone(), record);
        }
    }
    latest
}

fn max_modified(records: &HashMap<String, Record>) -> EpochMs {
    records.values().map(Record::modified_ms).max().unwrap_or(0)
}
