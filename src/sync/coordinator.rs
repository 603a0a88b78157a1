//! Refresh decisions over cache integrity metadata.
//!
//! Pure functions, no I/O. Callers combine the signals:
//! - discovery stale: re-enumerate every upstream container (expensive, rare)
//! - full sync stale: re-fetch everything from the known containers
//! - otherwise: incremental fetch against the known containers
//!
//! [`appears_incomplete`] on a freshly fetched result means "retry once, and
//! if still short keep the previous record".

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::model::DocketRecord;
use crate::sync::integrity::compute_metadata;
use crate::sync::types::{IntegrityMetadata, RefreshPlan};

/// Peak counts at or below this never trigger the incompleteness guard.
pub const MIN_PEAK_FOR_INCOMPLETE: usize = 100;

/// Tunables for refresh decisions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncPolicy {
    /// Full sync is due after this many days.
    pub max_sync_age_days: i64,
    /// Discovery is due after this many days.
    pub max_discovery_age_days: i64,
    /// Ratio of current to peak count below which a result looks truncated.
    pub incomplete_threshold: f64,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            max_sync_age_days: 7,
            max_discovery_age_days: 7,
            incomplete_threshold: 0.8,
        }
    }
}

fn is_stale(at: Option<DateTime<Utc>>, max_age_days: i64, now: DateTime<Utc>) -> bool {
    at.is_none_or(|at| now - at > Duration::days(max_age_days))
}

/// Whether a full re-fetch is due.
///
/// True if there is no metadata, no recorded full sync, or the last full
/// sync is older than `max_age_days`.
#[must_use]
pub fn needs_full_sync(
    meta: Option<&IntegrityMetadata>,
    max_age_days: i64,
    now: DateTime<Utc>,
) -> bool {
    is_stale(meta.and_then(|m| m.last_full_sync_at), max_age_days, now)
}

/// Whether upstream containers must be re-discovered.
///
/// True if no containers are known, or the last discovery pass is missing
/// or older than `max_age_days`.
#[must_use]
pub fn needs_discovery(
    meta: Option<&IntegrityMetadata>,
    max_age_days: i64,
    now: DateTime<Utc>,
) -> bool {
    let Some(meta) = meta else {
        return true;
    };
    let has_sources = meta
        .discovered_source_ids
        .as_ref()
        .is_some_and(|ids| !ids.is_empty());

    !has_sources || is_stale(meta.last_discovery_at, max_age_days, now)
}

/// Highest count ever observed for a cache.
///
/// Falls back to the recorded count on records written before peaks were
/// tracked.
#[must_use]
pub fn effective_peak(meta: &IntegrityMetadata) -> usize {
    meta.peak_item_count
        .unwrap_or(meta.item_count)
        .max(meta.item_count)
}

/// Whether `current_count` looks like a truncated result relative to `peak`.
///
/// Only fires when the peak is above [`MIN_PEAK_FOR_INCOMPLETE`], so small
/// datasets that genuinely shrink are accepted.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn is_suspicious_shrink(peak: usize, current_count: usize, threshold: f64) -> bool {
    if peak <= MIN_PEAK_FOR_INCOMPLETE {
        return false;
    }
    (current_count as f64) / (peak as f64) < threshold
}

/// Whether a fetched docket count looks truncated against the cache history.
#[must_use]
pub fn appears_incomplete(
    meta: Option<&IntegrityMetadata>,
    current_count: usize,
    threshold: f64,
) -> bool {
    meta.is_some_and(|m| is_suspicious_shrink(effective_peak(m), current_count, threshold))
}

/// Choose the kind of fetch for the next refresh.
///
/// `meta` is `None` when there is no usable cache (absent, unreachable or
/// discarded as corrupt), which always forces discovery.
#[must_use]
pub fn plan_refresh(
    meta: Option<&IntegrityMetadata>,
    policy: &SyncPolicy,
    force: bool,
    now: DateTime<Utc>,
) -> RefreshPlan {
    if force || needs_discovery(meta, policy.max_discovery_age_days, now) {
        RefreshPlan::Discovery
    } else if needs_full_sync(meta, policy.max_sync_age_days, now) {
        RefreshPlan::Full
    } else {
        RefreshPlan::Incremental
    }
}

/// Build metadata for a freshly fetched docket set.
///
/// The peak never decreases: it is the maximum of the previous peak, the
/// previous count and the new count. Full-sync and discovery dates advance
/// only when the corresponding pass ran.
#[must_use]
pub fn next_metadata(
    previous: Option<&IntegrityMetadata>,
    items: &[DocketRecord],
    plan: RefreshPlan,
    source_ids: &[String],
    now: DateTime<Utc>,
) -> IntegrityMetadata {
    let mut meta = compute_metadata(items, now);

    let previous_peak = previous.map_or(0, effective_peak);
    meta.peak_item_count = Some(previous_peak.max(items.len()));

    meta.last_full_sync_at = match plan {
        RefreshPlan::Discovery | RefreshPlan::Full => Some(now),
        RefreshPlan::Incremental => previous.and_then(|p| p.last_full_sync_at),
    };

    meta.last_discovery_at = match plan {
        RefreshPlan::Discovery => Some(now),
        RefreshPlan::Full | RefreshPlan::Incremental => previous.and_then(|p| p.last_discovery_at),
    };

    meta.discovered_source_ids = Some(source_ids.to_vec());
    meta
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(count: usize, peak: Option<usize>) -> IntegrityMetadata {
        IntegrityMetadata {
            item_count: count,
            peak_item_count: peak,
            ..compute_metadata(&[], Utc::now())
        }
    }

    #[test]
    fn test_needs_full_sync_staleness() {
        let now = Utc::now();
        let mut m = meta(10, None);

        m.last_full_sync_at = Some(now - Duration::days(10));
        assert!(needs_full_sync(Some(&m), 7, now));

        m.last_full_sync_at = Some(now - Duration::days(1));
        assert!(!needs_full_sync(Some(&m), 7, now));

        m.last_full_sync_at = None;
        assert!(needs_full_sync(Some(&m), 7, now));
        assert!(needs_full_sync(None, 7, now));
    }

    #[test]
    fn test_needs_discovery() {
        let now = Utc::now();
        let mut m = meta(10, None);
        m.last_discovery_at = Some(now - Duration::days(1));

        m.discovered_source_ids = None;
        assert!(needs_discovery(Some(&m), 7, now));

        m.discovered_source_ids = Some(Vec::new());
        assert!(needs_discovery(Some(&m), 7, now));

        m.discovered_source_ids = Some(vec!["proj_1".into()]);
        assert!(!needs_discovery(Some(&m), 7, now));

        m.last_discovery_at = Some(now - Duration::days(8));
        assert!(needs_discovery(Some(&m), 7, now));
    }

    #[test]
    fn test_appears_incomplete() {
        let m = meta(200, Some(200));
        assert!(appears_incomplete(Some(&m), 50, 0.8));
        assert!(!appears_incomplete(Some(&m), 190, 0.8));

        let small = meta(50, Some(50));
        assert!(!appears_incomplete(Some(&small), 5, 0.8));

        assert!(!appears_incomplete(None, 0, 0.8));
    }

    #[test]
    fn test_legacy_peak_falls_back_to_count() {
        let m = meta(300, None);
        assert_eq!(effective_peak(&m), 300);
        assert!(appears_incomplete(Some(&m), 100, 0.8));
    }

    #[test]
    fn test_plan_refresh() {
        let now = Utc::now();
        let policy = SyncPolicy::default();
        let mut m = meta(10, None);
        m.discovered_source_ids = Some(vec!["proj_1".into()]);
        m.last_discovery_at = Some(now - Duration::days(1));
        m.last_full_sync_at = Some(now - Duration::days(1));

        assert_eq!(plan_refresh(Some(&m), &policy, false, now), RefreshPlan::Incremental);
        assert_eq!(plan_refresh(Some(&m), &policy, true, now), RefreshPlan::Discovery);
        assert_eq!(plan_refresh(None, &policy, false, now), RefreshPlan::Discovery);

        m.last_full_sync_at = Some(now - Duration::days(8));
        assert_eq!(plan_refresh(Some(&m), &policy, false, now), RefreshPlan::Full);
    }

    #[test]
    fn test_next_metadata_peak_is_monotonic() {
        let now = Utc::now();
        let previous = meta(198, Some(200));
        let items: Vec<_> = (0..199)
            .map(|i| DocketRecord::new(&i.to_string(), "Job"))
            .collect();

        let next = next_metadata(Some(&previous), &items, RefreshPlan::Full, &[], now);
        assert_eq!(next.item_count, 199);
        assert_eq!(next.peak_item_count, Some(200));
        assert_eq!(next.last_full_sync_at, Some(now));
    }

    #[test]
    fn test_next_metadata_incremental_carries_dates() {
        let now = Utc::now();
        let earlier = now - Duration::days(2);
        let mut previous = meta(1, Some(1));
        previous.last_full_sync_at = Some(earlier);
        previous.last_discovery_at = Some(earlier);
        let items = vec![DocketRecord::new("1", "A"), DocketRecord::new("2", "B")];
        let ids = vec!["proj_1".to_string()];

        let next = next_metadata(Some(&previous), &items, RefreshPlan::Incremental, &ids, now);
        assert_eq!(next.peak_item_count, Some(2));
        assert_eq!(next.last_full_sync_at, Some(earlier));
        assert_eq!(next.last_discovery_at, Some(earlier));
        assert_eq!(next.discovered_source_ids, Some(ids));
    }
}
