//! Entry id -> ordinal index over a form's records.
//!
//! Ordinals are positions in ascending-id order. The index is a hint only:
//! every hit is validated against the record actually stored at that
//! ordinal, and a miss falls back to binary search and rebuilds the index.

use std::collections::BTreeMap;
use std::ops::Bound;

use serde::{Deserialize, Serialize};

use crate::model::Record;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryIndex(BTreeMap<String, usize>);

/// Change to a stored index, applied where the write is committed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum IndexUpdate {
    #[default]
    Keep,
    Replace(EntryIndex),
    /// A new id was stored; later ids move up one ordinal.
    Admit(String),
    /// An id was removed; later ids move down one ordinal.
    Retire(String),
}

/// Result of resolving an id against a sorted record slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Located {
    /// The index pointed at the right row.
    Hit(usize),
    /// Found by binary search; the index was stale or missing this id.
    Repaired(usize),
    /// Not present.
    Missing,
}

impl EntryIndex {
    /// Build from ids already in ascending order.
    pub fn from_sorted_ids<'a, I>(ids: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self(
            ids.into_iter()
                .enumerate()
                .map(|(pos, id)| (id.to_string(), pos))
                .collect(),
        )
    }

    /// Build from records already in ascending-id order.
    #[must_use]
    pub fn from_records(records: &[Record]) -> Self {
        Self::from_sorted_ids(records.iter().map(|r| r.entry_id.as_str()))
    }

    #[must_use]
    pub fn position(&self, entry_id: &str) -> Option<usize> {
        self.0.get(entry_id).copied()
    }

    pub fn insert(&mut self, entry_id: &str, position: usize) {
        self.0.insert(entry_id.to_string(), position);
    }

    /// Add a newly stored id after its predecessor, shifting later ids.
    pub fn admit(&mut self, entry_id: &str) {
        if self.0.contains_key(entry_id) {
            return;
        }
        let position = self
            .0
            .range::<str, _>((Bound::Unbounded, Bound::Excluded(entry_id)))
            .next_back()
            .map_or(0, |(_, pos)| pos + 1);
        for (_, pos) in self
            .0
            .range_mut::<str, _>((Bound::Excluded(entry_id), Bound::Unbounded))
        {
            *pos += 1;
        }
        self.0.insert(entry_id.to_string(), position);
    }

    /// Drop a removed id, shifting later ids back.
    pub fn retire(&mut self, entry_id: &str) {
        if self.0.remove(entry_id).is_none() {
            return;
        }
        for (_, pos) in self
            .0
            .range_mut::<str, _>((Bound::Excluded(entry_id), Bound::Unbounded))
        {
            *pos = pos.saturating_sub(1);
        }
    }

    pub fn apply(&mut self, update: IndexUpdate) {
        match update {
            IndexUpdate::Keep => {}
            IndexUpdate::Replace(index) => *self = index,
            IndexUpdate::Admit(id) => self.admit(&id),
            IndexUpdate::Retire(id) => self.retire(&id),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Find `entry_id` in `sorted`, validating the hint first.
    ///
    /// On anything but a clean hit the whole index is rebuilt from `sorted`,
    /// since one stale ordinal usually means its neighbours shifted too.
    pub fn locate(&mut self, sorted: &[Record], entry_id: &str) -> Located {
        if let Some(pos) = self.position(entry_id) {
            if sorted.get(pos).is_some_and(|r| r.entry_id == entry_id) {
                return Located::Hit(pos);
            }
        }

        let found = binary_search(sorted, entry_id);
        *self = Self::from_records(sorted);
        match found {
            Some(pos) => Located::Repaired(pos),
            None => Located::Missing,
        }
    }
}

/// Binary search by entry id over records in ascending-id order.
#[must_use]
pub fn binary_search(sorted: &[Record], entry_id: &str) -> Option<usize> {
    sorted
        .binary_search_by(|r| r.entry_id.as_str().cmp(entry_id))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(ids: &[&str]) -> Vec<Record> {
        ids.iter()
            .map(|id| Record::new_local("form", id, BTreeMap::new(), None, 1))
            .collect()
    }

    #[test]
    fn test_hit() {
        let sorted = rows(&["a", "b", "c"]);
        let mut index = EntryIndex::from_records(&sorted);
        assert_eq!(index.locate(&sorted, "b"), Located::Hit(1));
    }

    #[test]
    fn test_stale_ordinal_is_repaired() {
        let sorted = rows(&["a", "b", "c"]);
        let mut index = EntryIndex::from_records(&sorted);
        index.insert("c", 0);

        assert_eq!(index.locate(&sorted, "c"), Located::Repaired(2));
        assert_eq!(index.position("c"), Some(2));
        assert_eq!(index.locate(&sorted, "c"), Located::Hit(2));
    }

    #[test]
    fn test_out_of_range_ordinal_is_repaired() {
        let sorted = rows(&["a", "b"]);
        let mut index = EntryIndex::default();
        index.insert("b", 9);
        assert_eq!(index.locate(&sorted, "b"), Located::Repaired(1));
    }

    #[test]
    fn test_admit_and_retire_shift_later_ordinals() {
        let mut index = EntryIndex::from_records(&rows(&["a", "c", "d"]));

        index.admit("b");
        assert_eq!(index, EntryIndex::from_records(&rows(&["a", "b", "c", "d"])));
        index.admit("0");
        assert_eq!(index.position("0"), Some(0));
        assert_eq!(index.position("d"), Some(4));

        index.retire("c");
        assert_eq!(index, EntryIndex::from_records(&rows(&["0", "a", "b", "d"])));
        index.retire("zzz");
        assert_eq!(index.len(), 4);
    }

    #[test]
    fn test_missing_drops_stale_entry() {
        let sorted = rows(&["a", "c"]);
        let mut index = EntryIndex::from_records(&rows(&["a", "b", "c"]));
        assert_eq!(index.locate(&sorted, "b"), Located::Missing);
        assert_eq!(index.position("b"), None);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_serializes_as_plain_map() {
        let index = EntryIndex::from_sorted_ids(["a", "b"]);
        let json = serde_json::to_value(&index).unwrap();
        assert_eq!(json, serde_json::json!({"a": 0, "b": 1}));
    }
}
