//! Cache freshness classification.
//!
//! Pure: the same function is applied with separate thresholds for
//! per-form lists and single-entry reads.

use serde::{Deserialize, Serialize};

use crate::time::EpochMs;

/// Age limits for one kind of cached entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreshnessThresholds {
    /// At or beyond this age the caller must refresh before answering.
    pub max_age_ms: i64,
    /// At or beyond this age the cached answer is served but refreshed behind it.
    pub background_age_ms: i64,
}

impl FreshnessThresholds {
    #[must_use]
    pub const fn new(max_age_ms: i64, background_age_ms: i64) -> Self {
        Self {
            max_age_ms,
            background_age_ms,
        }
    }
}

/// Outcome of [`evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Freshness {
    /// `None` when the cache has never been synced (infinitely old).
    pub age_ms: Option<i64>,
    pub should_sync: bool,
    pub should_background: bool,
    pub is_fresh: bool,
}

impl Freshness {
    /// Age for comparisons, with "never synced" as the maximum.
    #[must_use]
    pub fn age_or_max(&self) -> i64 {
        self.age_ms.unwrap_or(i64::MAX)
    }
}

/// Classify cache age.
///
/// `should_sync` wins over `should_background`; `is_fresh` is neither.
#[must_use]
pub fn evaluate(
    last_synced_at: Option<EpochMs>,
    has_data: bool,
    force_sync: bool,
    thresholds: FreshnessThresholds,
    now: EpochMs,
) -> Freshness {
    let age_ms = last_synced_at.map(|at| now.saturating_sub(at));
    let age = age_ms.unwrap_or(i64::MAX);

    let should_sync = force_sync || !has_data || age >= thresholds.max_age_ms;
    let should_background = !should_sync && age >= thresholds.background_age_ms;

    Freshness {
        age_ms,
        should_sync,
        should_background,
        is_fresh: !should_sync && !should_background,
    }
}
