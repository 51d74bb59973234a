//! Configuration management.
//!
//! Everything lives under `~/.sheetsync/`:
//! - **Settings**: `~/.sheetsync/config.json` (freshness thresholds, timezone)
//! - **Database**: `~/.sheetsync/data/cache.db`
//!
//! Environment variables override the settings file; CLI flags override both.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sync::freshness::FreshnessThresholds;
use crate::sync::tasks::DEFAULT_MAX_PENDING;
use crate::time::TimeCodec;

/// Tunables for the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    /// Per-form record lists: refresh before answering at this age
    pub list_max_age_ms: i64,
    /// Per-form record lists: refresh in the background at this age
    pub list_background_age_ms: i64,
    pub entry_max_age_ms: i64,
    pub entry_background_age_ms: i64,
    /// A single-entry read this soon after a sync is always served from cache
    pub recent_sync_grace_ms: i64,
    /// Sheet-local offset applied to serial days and zone-less strings
    pub timezone_offset_minutes: i32,
    pub max_pending_tasks: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            list_max_age_ms: 300_000,
            list_background_age_ms: 30_000,
            entry_max_age_ms: 600_000,
            entry_background_age_ms: 60_000,
            recent_sync_grace_ms: 2_000,
            timezone_offset_minutes: 0,
            max_pending_tasks: DEFAULT_MAX_PENDING,
        }
    }
}

impl SyncSettings {
    /// Load from the global settings file, then apply environment overrides.
    ///
    /// A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the file or an override cannot be parsed.
    pub fn load() -> Result<Self> {
        let mut settings = match config_path() {
            Some(path) => Self::load_file(&path)?,
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Load a settings file without environment overrides.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the file exists but cannot be read or parsed.
    pub fn load_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {e}")))?;

        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {e}")))
    }

    /// Apply `SHEETSYNC_<FIELD>` overrides read through `lookup`.
    ///
    /// Empty values are ignored.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the variable if a value is not a number.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_from(&lookup, "SHEETSYNC_LIST_MAX_AGE_MS", &mut self.list_max_age_ms)?;
        override_from(
            &lookup,
            "SHEETSYNC_LIST_BACKGROUND_AGE_MS",
            &mut self.list_background_age_ms,
        )?;
        override_from(&lookup, "SHEETSYNC_ENTRY_MAX_AGE_MS", &mut self.entry_max_age_ms)?;
        override_from(
            &lookup,
            "SHEETSYNC_ENTRY_BACKGROUND_AGE_MS",
            &mut self.entry_background_age_ms,
        )?;
        override_from(
            &lookup,
            "SHEETSYNC_RECENT_SYNC_GRACE_MS",
            &mut self.recent_sync_grace_ms,
        )?;
        override_from(
            &lookup,
            "SHEETSYNC_TIMEZONE_OFFSET_MINUTES",
            &mut self.timezone_offset_minutes,
        )?;
        override_from(&lookup, "SHEETSYNC_MAX_PENDING_TASKS", &mut self.max_pending_tasks)?;
        Ok(())
    }

    #[must_use]
    pub fn list_thresholds(&self) -> FreshnessThresholds {
        FreshnessThresholds::new(self.list_max_age_ms, self.list_background_age_ms)
    }

    #[must_use]
    pub fn entry_thresholds(&self) -> FreshnessThresholds {
        FreshnessThresholds::new(self.entry_max_age_ms, self.entry_background_age_ms)
    }

    #[must_use]
    pub fn codec(&self) -> TimeCodec {
        TimeCodec::new(self.timezone_offset_minutes)
    }
}

fn override_from<F, T>(lookup: &F, key: &str, target: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let Some(raw) = lookup(key) else {
        return Ok(());
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(());
    }
    *target = raw
        .parse()
        .map_err(|_| Error::Config(format!("{key} must be a number, got {raw:?}")))?;
    Ok(())
}

/// Get the global sheetsync directory location (`~/.sheetsync/`).
#[must_use]
pub fn global_sheetsync_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".sheetsync"))
}

/// Path of the settings file.
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    global_sheetsync_dir().map(|dir| dir.join("config.json"))
}

/// Resolve the database path.
///
/// Priority:
/// 1. If `explicit_path` is provided, use it directly
/// 2. `SHEETSYNC_DB` environment variable
/// 3. Global location: `~/.sheetsync/data/cache.db`
#[must_use]
pub fn resolve_db_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }

    if let Ok(db_path) = std::env::var("SHEETSYNC_DB") {
        if !db_path.trim().is_empty() {
            return Some(PathBuf::from(db_path));
        }
    }

    global_sheetsync_dir().map(|dir| dir.join("data").join("cache.db"))
}

/// Resolve the snapshot directory used as the remote source.
///
/// # Errors
///
/// Returns `Error::Config` when neither `--source` nor `SHEETSYNC_SOURCE`
/// is set.
pub fn resolve_source_dir(explicit_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit_path {
        return Ok(path.to_path_buf());
    }

    std::env::var("SHEETSYNC_SOURCE")
        .ok()
        .filter(|dir| !dir.trim().is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| {
            Error::Config("No snapshot source: pass --source or set SHEETSYNC_SOURCE".into())
        })
}

/// Get the default actor name for local writes.
///
/// Priority:
/// 1. `SHEETSYNC_ACTOR` environment variable
/// 2. System username
#[must_use]
pub fn default_actor() -> Option<String> {
    ["SHEETSYNC_ACTOR", "USER", "USERNAME"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = SyncSettings::default();
        assert_eq!(settings.list_thresholds(), FreshnessThresholds::new(300_000, 30_000));
        assert_eq!(settings.entry_thresholds(), FreshnessThresholds::new(600_000, 60_000));
        assert_eq!(settings.recent_sync_grace_ms, 2_000);
        assert_eq!(settings.max_pending_tasks, 16);
    }

    #[test]
    fn test_load_file_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"listMaxAgeMs": 1000, "timezoneOffsetMinutes": -300}"#).unwrap();

        let settings = SyncSettings::load_file(&path).unwrap();
        assert_eq!(settings.list_max_age_ms, 1_000);
        assert_eq!(settings.timezone_offset_minutes, -300);
        assert_eq!(settings.entry_max_age_ms, 600_000);
    }

    #[test]
    fn test_load_file_missing_and_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("none.json");
        assert_eq!(SyncSettings::load_file(&missing).unwrap(), SyncSettings::default());

        let broken = dir.path().join("broken.json");
        fs::write(&broken, "{").unwrap();
        assert!(matches!(SyncSettings::load_file(&broken), Err(Error::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = SyncSettings::default();
        settings
            .apply_env(env(&[
                ("SHEETSYNC_LIST_MAX_AGE_MS", "42"),
                ("SHEETSYNC_MAX_PENDING_TASKS", " 3 "),
                ("SHEETSYNC_ENTRY_MAX_AGE_MS", ""),
            ]))
            .unwrap();
        assert_eq!(settings.list_max_age_ms, 42);
        assert_eq!(settings.max_pending_tasks, 3);
        assert_eq!(settings.entry_max_age_ms, 600_000);

        let err = settings
            .apply_env(env(&[("SHEETSYNC_RECENT_SYNC_GRACE_MS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("SHEETSYNC_RECENT_SYNC_GRACE_MS"));
    }

    #[test]
    fn test_resolve_db_path_with_explicit() {
        let explicit = PathBuf::from("/custom/path/cache.db");
        let result = resolve_db_path(Some(&explicit));
        assert_eq!(result, Some(explicit));
    }

    #[test]
    fn test_resolve_source_dir_explicit() {
        let explicit = PathBuf::from("/snapshots");
        assert_eq!(resolve_source_dir(Some(&explicit)).unwrap(), explicit);
    }
}
