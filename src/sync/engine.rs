//! Fetch orchestration.
//!
//! `SyncEngine` decides, per call, whether to answer from the cache,
//! answer from the cache and refresh behind it, or go to the remote first.
//! Store and remote errors propagate to the caller. Background refresh
//! errors are logged and dropped.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::SyncSettings;
use crate::error::Result;
use crate::model::Record;
use crate::remote::RemoteReader;
use crate::storage::{
    DeltaMergeOptions, FullSyncOptions, MergeStats, RecordStore, StoreBackend, UpsertOptions,
    UpsertOutcome, WriteOrigin,
};
use crate::sync::freshness::{self, Freshness};
use crate::sync::hash::{has_changed, schema_hash};
use crate::sync::tasks::TaskRegistry;
use crate::time::{EpochMs, TimeCodec};

/// How a list call reached the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Full,
    Delta,
    /// Delta read with nothing in it; only the watermark moved
    Unchanged,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions {
    /// Defaults to the stored value
    pub last_synced_at: Option<EpochMs>,
    /// Defaults to the stored value
    pub last_watermark: Option<EpochMs>,
    pub force_full_sync: bool,
}

#[derive(Debug, Clone)]
pub struct ListOutcome {
    /// The merged cache, ascending by id
    pub records: Vec<Record>,
    pub mode: SyncMode,
    pub stats: MergeStats,
    pub remote_watermark: Option<EpochMs>,
}

/// Result of a cache-first list read.
#[derive(Debug, Clone)]
pub struct EntriesView {
    pub records: Vec<Record>,
    pub freshness: Freshness,
    /// Set when the call synced before answering
    pub synced: Option<SyncMode>,
    /// Whether a refresh was queued behind the answer
    pub background: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
    pub force_sync: bool,
    pub row_index_hint: Option<u32>,
}

/// Path taken by a single-entry read, as logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchState {
    ServeFromCache,
    BackgroundRefresh,
    SynchronousFetch,
    /// The point fetch missed; re-list once and search
    DeltaFallback,
}

/// How to answer a single-entry read before any fetch happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchDecision {
    ServeFromCache,
    BackgroundRefresh,
    SynchronousFetch,
}

impl From<FetchDecision> for FetchState {
    fn from(decision: FetchDecision) -> Self {
        match decision {
            FetchDecision::ServeFromCache => Self::ServeFromCache,
            FetchDecision::BackgroundRefresh => Self::BackgroundRefresh,
            FetchDecision::SynchronousFetch => Self::SynchronousFetch,
        }
    }
}

/// Choose how to answer a single-entry read.
///
/// A cached entry is served if the form synced very recently or is not due
/// for a synchronous refresh.
#[must_use]
pub fn decide_fetch(
    has_cached: bool,
    freshness: &Freshness,
    recent_sync_grace_ms: i64,
) -> FetchDecision {
    if !has_cached {
        return FetchDecision::SynchronousFetch;
    }
    if freshness.age_or_max() < recent_sync_grace_ms {
        return FetchDecision::ServeFromCache;
    }
    if freshness.should_sync {
        FetchDecision::SynchronousFetch
    } else if freshness.should_background {
        FetchDecision::BackgroundRefresh
    } else {
        FetchDecision::ServeFromCache
    }
}

/// Cache-first reader over a [`RecordStore`] and a [`RemoteReader`].
pub struct SyncEngine<B, R> {
    store: Arc<RecordStore<B>>,
    remote: Arc<R>,
    codec: TimeCodec,
    settings: SyncSettings,
    tasks: Arc<TaskRegistry>,
}

impl<B, R> Clone for SyncEngine<B, R> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            remote: Arc::clone(&self.remote),
            codec: self.codec,
            settings: self.settings.clone(),
            tasks: Arc::clone(&self.tasks),
        }
    }
}

impl<B, R> SyncEngine<B, R>
where
    B: StoreBackend + 'static,
    R: RemoteReader + 'static,
{
    pub fn new(store: Arc<RecordStore<B>>, remote: Arc<R>, settings: SyncSettings) -> Self {
        Self {
            store,
            remote,
            codec: settings.codec(),
            tasks: Arc::new(TaskRegistry::new(settings.max_pending_tasks)),
            settings,
        }
    }

    pub fn store(&self) -> &RecordStore<B> {
        &self.store
    }

    #[must_use]
    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Read a form from the remote and fold it into the cache.
    ///
    /// Asks for a delta when a watermark is known and the form has synced
    /// before, unless `force_full_sync`.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote read or any store operation fails.
    pub async fn list_entries(&self, form_id: &str, opts: ListOptions) -> Result<ListOutcome> {
        let stored = self.store.read_meta(form_id).await?;
        let last_synced_at = opts
            .last_synced_at
            .or_else(|| stored.as_ref().and_then(|m| m.last_synced_at));
        let cache_watermark = opts
            .last_watermark
            .or_else(|| stored.as_ref().and_then(|m| m.last_remote_read_watermark));
        let since = if opts.force_full_sync || last_synced_at.is_none() {
            None
        } else {
            cache_watermark
        };

        let fetch_started = self.store.now_ms();
        let response = self.remote.list_records(form_id, since).await?;
        let remote_watermark = response
            .remote_watermark
            .as_ref()
            .and_then(|raw| self.codec.to_epoch_ms(raw));

        let records: Vec<Record> = response
            .records
            .into_iter()
            .map(|r| r.decode(form_id, &self.codec))
            .collect();
        let undated = records.iter().filter(|r| r.modified_at_epoch_ms.is_none()).count();
        if undated > 0 {
            warn!(form_id, undated, "Remote rows without a readable modified time");
        }
        let all_ids: Option<HashSet<String>> =
            response.all_ids.map(|ids| ids.into_iter().collect());

        let header = response.header_shape;
        let hash = response.schema_hash.or_else(|| {
            (!header.is_empty()).then(|| schema_hash(&header))
        });
        if let Some(hash) = hash.as_deref() {
            let previous = stored.as_ref().and_then(|m| m.schema_hash.as_deref());
            if previous.is_some() && has_changed(hash, previous) {
                info!(form_id, "Remote column layout changed");
            }
        }

        // Re-read: a local write may have landed while the fetch was in flight.
        let pending_local = self
            .store
            .read_meta(form_id)
            .await?
            .and_then(|m| m.last_local_mutation_at);

        let (mode, stats) = if response.is_delta {
            if records.is_empty() && all_ids.is_none() {
                self.store
                    .touch_watermark(form_id, cache_watermark.max(remote_watermark))
                    .await?;
                (SyncMode::Unchanged, MergeStats::default())
            } else {
                let stats = self
                    .store
                    .delta_merge(
                        form_id,
                        records,
                        all_ids.as_ref(),
                        (!header.is_empty()).then_some(header),
                        hash,
                        DeltaMergeOptions {
                            merge_anchor: Some(fetch_started),
                            remote_watermark,
                        },
                    )
                    .await?;
                (SyncMode::Delta, stats)
            }
        } else {
            let stats = self
                .store
                .full_sync(
                    form_id,
                    records,
                    header,
                    FullSyncOptions {
                        schema_hash: hash,
                        merge_anchor: pending_local.map(|_| fetch_started),
                        remote_watermark,
                    },
                )
                .await?;
            (SyncMode::Full, stats)
        };

        debug!(form_id, mode = ?mode, since = ?since, "Listed entries");
        let snapshot = self.store.read_all(form_id).await?;
        Ok(ListOutcome {
            records: snapshot.records,
            mode,
            stats,
            remote_watermark,
        })
    }

    /// Cache-first list read using the list thresholds.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache read fails, or the synchronous sync
    /// when one is needed.
    pub async fn entries(&self, form_id: &str, force: bool) -> Result<EntriesView> {
        let snapshot = self.store.read_all(form_id).await?;
        let last_synced_at = snapshot.meta.as_ref().and_then(|m| m.last_synced_at);
        let has_data = !snapshot.records.is_empty() || last_synced_at.is_some();
        let freshness = freshness::evaluate(
            last_synced_at,
            has_data,
            force,
            self.settings.list_thresholds(),
            self.store.now_ms(),
        );
        debug!(form_id, ?freshness, "List freshness");

        if freshness.should_sync {
            let outcome = self
                .list_entries(
                    form_id,
                    ListOptions {
                        force_full_sync: force,
                        ..ListOptions::default()
                    },
                )
                .await?;
            return Ok(EntriesView {
                records: outcome.records,
                freshness,
                synced: Some(outcome.mode),
                background: false,
            });
        }

        let background = freshness.should_background && self.spawn_list_refresh(form_id);
        Ok(EntriesView {
            records: snapshot.records,
            freshness,
            synced: None,
            background,
        })
    }

    /// Read one entry, cache first.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache read fails, or the synchronous fetch
    /// (including its one delta fallback) fails.
    pub async fn get_entry(
        &self,
        form_id: &str,
        entry_id: &str,
        opts: GetOptions,
    ) -> Result<Option<Record>> {
        let cached = self.store.read_entry(form_id, entry_id).await?;
        let last_synced_at = self
            .store
            .read_meta(form_id)
            .await?
            .and_then(|m| m.last_synced_at);
        let freshness = freshness::evaluate(
            last_synced_at,
            cached.is_some(),
            opts.force_sync,
            self.settings.entry_thresholds(),
            self.store.now_ms(),
        );
        let hint = opts
            .row_index_hint
            .or_else(|| cached.as_ref().and_then(|r| r.row_index));

        let decision = decide_fetch(
            cached.is_some(),
            &freshness,
            self.settings.recent_sync_grace_ms,
        );
        debug!(
            form_id,
            entry_id,
            state = ?FetchState::from(decision),
            age_ms = ?freshness.age_ms,
            "Entry read"
        );

        match decision {
            FetchDecision::ServeFromCache => Ok(cached),
            FetchDecision::BackgroundRefresh => {
                self.spawn_point_refresh(form_id, entry_id, hint);
                Ok(cached)
            }
            FetchDecision::SynchronousFetch => self.fetch_entry(form_id, entry_id, hint).await,
        }
    }

    async fn fetch_entry(
        &self,
        form_id: &str,
        entry_id: &str,
        hint: Option<u32>,
    ) -> Result<Option<Record>> {
        let fetch_started = self.store.now_ms();
        let response = self.remote.get_record(form_id, entry_id, hint).await?;

        match response.record {
            Some(remote) if remote.entry_id == entry_id => {
                let row_index = response.row_index.or(remote.row_index);
                let record = remote.decode(form_id, &self.codec);
                self.store
                    .point_upsert(
                        form_id,
                        record,
                        UpsertOptions {
                            row_index,
                            write_anchor: Some(fetch_started),
                            origin: WriteOrigin::Remote,
                        },
                    )
                    .await?;
                return self.store.read_entry(form_id, entry_id).await;
            }
            Some(other) => debug!(
                form_id,
                entry_id,
                found = %other.entry_id,
                state = ?FetchState::DeltaFallback,
                "Hinted row shifted"
            ),
            None => debug!(
                form_id,
                entry_id,
                state = ?FetchState::DeltaFallback,
                "Point fetch found nothing"
            ),
        }

        let outcome = self.list_entries(form_id, ListOptions::default()).await?;
        Ok(outcome.records.into_iter().find(|r| r.entry_id == entry_id))
    }

    fn spawn_point_refresh(&self, form_id: &str, entry_id: &str, hint: Option<u32>) -> bool {
        let engine = self.clone();
        let form_id = form_id.to_string();
        let entry_id = entry_id.to_string();
        let key = format!("entry:{form_id}:{entry_id}");
        let spawned_at = self.store.now_ms();

        self.tasks.spawn(key, async move {
            if let Err(e) = engine.refresh_point(&form_id, &entry_id, hint, spawned_at).await {
                warn!(form_id = %form_id, entry_id = %entry_id, error = %e, "Background entry refresh failed");
            }
        })
    }

    async fn refresh_point(
        &self,
        form_id: &str,
        entry_id: &str,
        hint: Option<u32>,
        write_anchor: EpochMs,
    ) -> Result<()> {
        let response = self.remote.get_record(form_id, entry_id, hint).await?;
        let Some(remote) = response.record.filter(|r| r.entry_id == entry_id) else {
            debug!(form_id, entry_id, "Background refresh missed; leaving cache as is");
            return Ok(());
        };
        let row_index = response.row_index.or(remote.row_index);
        let outcome = self
            .store
            .point_upsert(
                form_id,
                remote.decode(form_id, &self.codec),
                UpsertOptions {
                    row_index,
                    write_anchor: Some(write_anchor),
                    origin: WriteOrigin::Remote,
                },
            )
            .await?;
        debug!(form_id, entry_id, written = outcome == UpsertOutcome::Written, "Background entry refresh");
        Ok(())
    }

    fn spawn_list_refresh(&self, form_id: &str) -> bool {
        let engine = self.clone();
        let form_id = form_id.to_string();
        let key = format!("list:{form_id}");

        self.tasks.spawn(key, async move {
            if let Err(e) = engine.list_entries(&form_id, ListOptions::default()).await {
                warn!(form_id = %form_id, error = %e, "Background list refresh failed");
            }
        })
    }

    /// Create or edit an entry locally. See [`RecordStore::save_local`].
    ///
    /// # Errors
    ///
    /// Returns an error if the store read or write fails.
    pub async fn save_entry(
        &self,
        form_id: &str,
        entry_id: Option<&str>,
        patch: BTreeMap<String, Value>,
        actor: Option<&str>,
    ) -> Result<Record> {
        self.store.save_local(form_id, entry_id, patch, actor).await
    }

    /// Delete an entry locally. Returns `false` if it was not cached.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails.
    pub async fn delete_entry(&self, form_id: &str, entry_id: &str) -> Result<bool> {
        self.store.point_delete(form_id, entry_id).await
    }

    /// Number of background refreshes still in flight.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.tasks.pending()
    }

    /// Wait for every background refresh to finish.
    pub async fn flush_pending(&self) {
        self.tasks.flush_pending().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RemoteRecord;
    use crate::remote::{ListResponse, PointResponse};
    use crate::storage::MemoryBackend;
    use crate::time::ManualClock;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const NOW: EpochMs = 1_700_000_000_000;

    #[derive(Default)]
    struct FakeRemote {
        rows: Mutex<Vec<RemoteRecord>>,
        watermark: Mutex<EpochMs>,
        closed_world: bool,
        fail: AtomicBool,
        list_calls: AtomicUsize,
        point_calls: AtomicUsize,
    }

    impl FakeRemote {
        fn with_rows(rows: Vec<RemoteRecord>, watermark: EpochMs) -> Self {
            Self {
                rows: Mutex::new(rows),
                watermark: Mutex::new(watermark),
                ..Self::default()
            }
        }

        fn set_rows(&self, rows: Vec<RemoteRecord>, watermark: EpochMs) {
            *self.rows.lock().unwrap() = rows;
            *self.watermark.lock().unwrap() = watermark;
        }

        fn check(&self) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(crate::error::Error::Remote("offline".to_string()));
            }
            Ok(())
        }
    }

    impl RemoteReader for FakeRemote {
        async fn list_records(
            &self,
            _form_id: &str,
            since_watermark: Option<EpochMs>,
        ) -> Result<ListResponse> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            self.check()?;
            let rows = self.rows.lock().unwrap().clone();
            let all_ids = self
                .closed_world
                .then(|| rows.iter().map(|r| r.entry_id.clone()).collect());
            let records = rows
                .into_iter()
                .enumerate()
                .filter(|(_, r)| {
                    since_watermark.is_none_or(|since| r.modified_at_epoch_ms.unwrap_or(0) > since)
                })
                .map(|(pos, mut r)| {
                    r.row_index = u32::try_from(pos).ok();
                    r
                })
                .collect();
            Ok(ListResponse {
                records,
                all_ids,
                header_shape: vec!["name".to_string()],
                remote_watermark: Some(json!(*self.watermark.lock().unwrap())),
                is_delta: since_watermark.is_some(),
                schema_hash: None,
            })
        }

        async fn get_record(
            &self,
            _form_id: &str,
            entry_id: &str,
            row_index_hint: Option<u32>,
        ) -> Result<PointResponse> {
            self.point_calls.fetch_add(1, Ordering::SeqCst);
            self.check()?;
            let rows = self.rows.lock().unwrap().clone();
            let position = match row_index_hint {
                Some(hint) => Some(hint as usize),
                None => rows.iter().position(|r| r.entry_id == entry_id),
            };
            let record = position.and_then(|pos| rows.get(pos).cloned());
            Ok(PointResponse {
                record,
                row_index: position.and_then(|pos| u32::try_from(pos).ok()),
            })
        }
    }

    fn row(id: &str, name: &str, modified: EpochMs) -> RemoteRecord {
        let mut data = BTreeMap::new();
        data.insert("name".to_string(), json!(name));
        RemoteRecord {
            entry_id: id.to_string(),
            data,
            modified_at_epoch_ms: Some(modified),
            ..RemoteRecord::default()
        }
    }

    type TestEngine = SyncEngine<MemoryBackend, FakeRemote>;

    fn setup(remote: FakeRemote) -> (TestEngine, Arc<ManualClock>, Arc<FakeRemote>) {
        let clock = Arc::new(ManualClock::new(NOW));
        let store = Arc::new(RecordStore::new(MemoryBackend::new(), clock.clone()));
        let remote = Arc::new(remote);
        let engine = SyncEngine::new(store, Arc::clone(&remote), SyncSettings::default());
        (engine, clock, remote)
    }

    fn ids(records: &[Record]) -> Vec<&str> {
        records.iter().map(|r| r.entry_id.as_str()).collect()
    }

    fn name(record: &Record) -> &Value {
        &record.data["name"]
    }

    #[test]
    fn test_decide_fetch() {
        let limits = crate::sync::freshness::FreshnessThresholds::new(1_000, 100);
        let at = |age: i64, force: bool| freshness::evaluate(Some(NOW - age), true, force, limits, NOW);

        assert_eq!(decide_fetch(false, &at(0, false), 10), FetchDecision::SynchronousFetch);
        assert_eq!(decide_fetch(true, &at(50, false), 10), FetchDecision::ServeFromCache);
        assert_eq!(decide_fetch(true, &at(500, false), 10), FetchDecision::BackgroundRefresh);
        assert_eq!(decide_fetch(true, &at(5_000, false), 10), FetchDecision::SynchronousFetch);
        assert_eq!(decide_fetch(true, &at(50, true), 10), FetchDecision::SynchronousFetch);
        // A forced read right after a sync still comes from cache.
        assert_eq!(decide_fetch(true, &at(5, true), 10), FetchDecision::ServeFromCache);
        assert_eq!(
            FetchState::from(FetchDecision::BackgroundRefresh),
            FetchState::BackgroundRefresh
        );
    }

    #[tokio::test]
    async fn test_cold_list_is_full_then_delta() {
        let (engine, clock, remote) = setup(FakeRemote::with_rows(
            vec![row("b", "Bo", NOW - 500), row("a", "Al", NOW - 900)],
            NOW - 100,
        ));

        let first = engine.list_entries("form", ListOptions::default()).await.unwrap();
        assert_eq!(first.mode, SyncMode::Full);
        assert_eq!(first.stats.created, 2);
        assert_eq!(ids(&first.records), vec!["a", "b"]);
        assert_eq!(first.remote_watermark, Some(NOW - 100));

        clock.advance(1_000);
        remote.set_rows(
            vec![row("b", "Bo", NOW - 500), row("a", "Al", NOW - 900), row("c", "Cy", NOW + 500)],
            NOW + 600,
        );
        let second = engine.list_entries("form", ListOptions::default()).await.unwrap();
        assert_eq!(second.mode, SyncMode::Delta);
        assert_eq!(second.stats.created, 1);
        assert_eq!(ids(&second.records), vec!["a", "b", "c"]);

        let meta = engine.store().read_meta("form").await.unwrap().unwrap();
        assert_eq!(meta.last_remote_read_watermark, Some(NOW + 600));
        assert_eq!(meta.last_synced_at, Some(NOW + 1_000));
        assert!(meta.schema_hash.is_some());
    }

    #[tokio::test]
    async fn test_empty_delta_only_moves_watermark() {
        let (engine, clock, remote) =
            setup(FakeRemote::with_rows(vec![row("a", "Al", NOW - 900)], NOW - 100));
        engine.list_entries("form", ListOptions::default()).await.unwrap();

        clock.advance(5_000);
        *remote.watermark.lock().unwrap() = NOW + 4_000;
        let outcome = engine.list_entries("form", ListOptions::default()).await.unwrap();
        assert_eq!(outcome.mode, SyncMode::Unchanged);
        assert_eq!(outcome.stats, MergeStats::default());
        assert_eq!(ids(&outcome.records), vec!["a"]);

        let meta = engine.store().read_meta("form").await.unwrap().unwrap();
        assert_eq!(meta.last_remote_read_watermark, Some(NOW + 4_000));
        assert_eq!(meta.last_synced_at, Some(NOW + 5_000));
    }

    #[tokio::test]
    async fn test_full_sync_keeps_offline_entry() {
        let remote = FakeRemote {
            closed_world: true,
            ..FakeRemote::with_rows(vec![row("a", "Al", NOW - 900)], NOW - 100)
        };
        let (engine, clock, _remote) = setup(remote);
        engine.list_entries("form", ListOptions::default()).await.unwrap();

        clock.advance(10);
        let mut patch = BTreeMap::new();
        patch.insert("name".to_string(), json!("Offline"));
        let local = engine
            .save_entry("form", Some("offline"), patch, Some("tester"))
            .await
            .unwrap();
        assert_eq!(local.written_at, Some(NOW + 10));

        let outcome = engine
            .list_entries(
                "form",
                ListOptions {
                    force_full_sync: true,
                    ..ListOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.mode, SyncMode::Full);
        assert_eq!(outcome.stats.deleted, 0);
        assert_eq!(ids(&outcome.records), vec!["a", "offline"]);
        let meta = engine.store().read_meta("form").await.unwrap().unwrap();
        assert_eq!(meta.last_local_mutation_at, Some(NOW + 10));
    }

    #[tokio::test]
    async fn test_get_entry_serves_fresh_cache() {
        let (engine, clock, remote) =
            setup(FakeRemote::with_rows(vec![row("a", "Al", NOW - 900)], NOW - 100));
        engine.list_entries("form", ListOptions::default()).await.unwrap();
        clock.advance(10_000);

        let found = engine
            .get_entry("form", "a", GetOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(name(&found), &json!("Al"));
        assert_eq!(remote.point_calls.load(Ordering::SeqCst), 0);
        assert_eq!(engine.pending_tasks(), 0);
    }

    #[tokio::test]
    async fn test_get_entry_refreshes_in_background() {
        let (engine, clock, remote) =
            setup(FakeRemote::with_rows(vec![row("a", "Al", NOW - 900)], NOW - 100));
        engine.list_entries("form", ListOptions::default()).await.unwrap();

        clock.advance(61_000);
        remote.set_rows(vec![row("a", "Alice", NOW + 1_000)], NOW + 1_000);

        let served = engine
            .get_entry("form", "a", GetOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(name(&served), &json!("Al"));

        engine.flush_pending().await;
        assert_eq!(remote.point_calls.load(Ordering::SeqCst), 1);
        let refreshed = engine.store().read_entry("form", "a").await.unwrap().unwrap();
        assert_eq!(name(&refreshed), &json!("Alice"));
        assert_eq!(refreshed.written_at, None);
    }

    #[tokio::test]
    async fn test_background_failure_is_swallowed() {
        let (engine, clock, remote) =
            setup(FakeRemote::with_rows(vec![row("a", "Al", NOW - 900)], NOW - 100));
        engine.list_entries("form", ListOptions::default()).await.unwrap();

        clock.advance(61_000);
        remote.fail.store(true, Ordering::SeqCst);
        let served = engine.get_entry("form", "a", GetOptions::default()).await.unwrap();
        assert!(served.is_some());
        engine.flush_pending().await;
        assert_eq!(engine.pending_tasks(), 0);
    }

    #[tokio::test]
    async fn test_get_entry_fetches_uncached() {
        let (engine, _clock, remote) = setup(FakeRemote::with_rows(
            vec![row("a", "Al", NOW - 900), row("b", "Bo", NOW - 800)],
            NOW - 100,
        ));

        let found = engine
            .get_entry("form", "b", GetOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(name(&found), &json!("Bo"));
        assert_eq!(found.row_index, Some(1));
        assert_eq!(remote.point_calls.load(Ordering::SeqCst), 1);
        assert_eq!(remote.list_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shifted_hint_falls_back_to_delta() {
        let (engine, clock, remote) = setup(FakeRemote::with_rows(
            vec![row("a", "Al", NOW - 900), row("b", "Bo", NOW - 800)],
            NOW - 100,
        ));
        engine.list_entries("form", ListOptions::default()).await.unwrap();

        // A new row is inserted at the top; b's cached row index now points at a.
        clock.advance(5_000);
        remote.set_rows(
            vec![
                row("0new", "Zed", NOW + 1_000),
                row("a", "Al", NOW - 900),
                row("b", "Bo", NOW - 800),
            ],
            NOW + 1_000,
        );

        let found = engine
            .get_entry(
                "form",
                "b",
                GetOptions {
                    force_sync: true,
                    ..GetOptions::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.entry_id, "b");
        assert_eq!(remote.list_calls.load(Ordering::SeqCst), 2);
        let cached = engine.store().read_all("form").await.unwrap();
        assert_eq!(ids(&cached.records), vec!["0new", "a", "b"]);
    }

    #[tokio::test]
    async fn test_deleted_entry_resolves_to_none() {
        let remote = FakeRemote {
            closed_world: true,
            ..FakeRemote::with_rows(
                vec![row("a", "Al", NOW - 900), row("b", "Bo", NOW - 800)],
                NOW - 100,
            )
        };
        let (engine, clock, remote) = setup(remote);
        engine.list_entries("form", ListOptions::default()).await.unwrap();

        clock.advance(5_000);
        remote.set_rows(vec![row("a", "Al", NOW - 900)], NOW + 1_000);
        let found = engine
            .get_entry(
                "form",
                "b",
                GetOptions {
                    force_sync: true,
                    ..GetOptions::default()
                },
            )
            .await
            .unwrap();
        assert!(found.is_none());
        assert!(engine.store().read_entry("form", "b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_entries_cache_first() {
        let (engine, clock, remote) =
            setup(FakeRemote::with_rows(vec![row("a", "Al", NOW - 900)], NOW - 100));

        let cold = engine.entries("form", false).await.unwrap();
        assert_eq!(cold.synced, Some(SyncMode::Full));
        assert_eq!(ids(&cold.records), vec!["a"]);

        clock.advance(1_000);
        let fresh = engine.entries("form", false).await.unwrap();
        assert!(fresh.freshness.is_fresh);
        assert_eq!(fresh.synced, None);
        assert_eq!(remote.list_calls.load(Ordering::SeqCst), 1);

        clock.advance(40_000);
        let stale = engine.entries("form", false).await.unwrap();
        assert!(stale.background);
        engine.flush_pending().await;
        assert_eq!(remote.list_calls.load(Ordering::SeqCst), 2);

        let forced = engine.entries("form", true).await.unwrap();
        assert_eq!(forced.synced, Some(SyncMode::Full));
    }

    #[tokio::test]
    async fn test_save_and_delete_entry() {
        let (engine, clock, _remote) = setup(FakeRemote::default());

        let mut patch = BTreeMap::new();
        patch.insert("name".to_string(), json!("New"));
        let created = engine.save_entry("form", None, patch, None).await.unwrap();
        assert!(created.entry_id.starts_with("entry_"));
        assert_eq!(created.entry_id.len(), "entry_".len() + 12);

        clock.advance(100);
        let mut edit = BTreeMap::new();
        edit.insert("name".to_string(), json!("Renamed"));
        let edited = engine
            .save_entry("form", Some(&created.entry_id), edit, Some("tester"))
            .await
            .unwrap();
        assert_eq!(edited.data_timestamps["name"], NOW + 100);
        assert_eq!(edited.created_at_epoch_ms, Some(NOW));
        assert_eq!(edited.modified_by.as_deref(), Some("tester"));

        assert!(engine.delete_entry("form", &created.entry_id).await.unwrap());
        assert!(!engine.delete_entry("form", &created.entry_id).await.unwrap());
    }
}
