//! Integrity checksums and classification for cache records.
//!
//! The checksum covers only each docket's unique key (`full_name`), not its
//! full field set. A corruption that rewrites non-key fields without changing
//! identity or count is not detectable here; the structural scan in
//! [`scan_field_issues`] is the only guard against that, and it is heuristic.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};

use crate::model::DocketRecord;
use crate::sync::types::{
    CacheRecord, FieldIssue, FieldIssueKind, IntegrityMetadata, IntegrityStatus,
    CACHE_FORMAT_VERSION,
};

/// Separator between keys in the checksum input.
const KEY_DELIMITER: &str = "\n";

/// Due dates further out than this are treated as implausible.
const MAX_FUTURE_DUE_DAYS: i64 = 3650;

/// Source modification times further out than this are treated as clock skew.
const MAX_FUTURE_UPDATE_HOURS: i64 = 24;

/// Compute the checksum of a docket set.
///
/// Keys are sorted and deduplicated before hashing, so the result does not
/// depend on the input order.
#[must_use]
pub fn checksum(items: &[DocketRecord]) -> String {
    let keys: BTreeSet<&str> = items.iter().map(|d| d.full_name.as_str()).collect();
    let joined = keys.into_iter().collect::<Vec<_>>().join(KEY_DELIMITER);

    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Build fresh integrity metadata for a docket set.
///
/// History fields (peak, sync and discovery dates) are left empty; the
/// refresh pipeline fills them from the previous record.
#[must_use]
pub fn compute_metadata(items: &[DocketRecord], now: DateTime<Utc>) -> IntegrityMetadata {
    IntegrityMetadata {
        version: CACHE_FORMAT_VERSION,
        item_count: items.len(),
        checksum: checksum(items),
        computed_at: now,
        peak_item_count: None,
        last_full_sync_at: None,
        discovered_source_ids: None,
        last_discovery_at: None,
    }
}

/// Classify a record against its integrity metadata.
///
/// Version is checked first, then count, then checksum.
#[must_use]
pub fn classify(record: &CacheRecord) -> IntegrityStatus {
    let Some(meta) = &record.integrity else {
        return IntegrityStatus::MissingIntegrity;
    };

    if meta.version != CACHE_FORMAT_VERSION {
        return IntegrityStatus::VersionMismatch {
            found: meta.version,
            expected: CACHE_FORMAT_VERSION,
        };
    }

    if meta.item_count != record.dockets.len() {
        return IntegrityStatus::CountMismatch {
            found: record.dockets.len(),
            expected: meta.item_count,
        };
    }

    if meta.checksum != checksum(&record.dockets) {
        return IntegrityStatus::ChecksumMismatch;
    }

    IntegrityStatus::Valid
}

/// Scan dockets for structural data-quality problems.
///
/// Independent of the checksum: flags empty required fields, keys that do
/// not contain their docket number, and implausible future dates.
#[must_use]
pub fn scan_field_issues(items: &[DocketRecord], now: DateTime<Utc>) -> Vec<FieldIssue> {
    let latest_due = (now + Duration::days(MAX_FUTURE_DUE_DAYS)).date_naive();
    let latest_update = now + Duration::hours(MAX_FUTURE_UPDATE_HOURS);
    let mut issues = Vec::new();

    for (index, docket) in items.iter().enumerate() {
        let mut push = |kind| {
            issues.push(FieldIssue {
                full_name: docket.full_name.clone(),
                index,
                kind,
            });
        };

        for (field, value) in [
            ("fullName", &docket.full_name),
            ("number", &docket.number),
            ("jobName", &docket.job_name),
        ] {
            if value.trim().is_empty() {
                push(FieldIssueKind::EmptyField(field.to_string()));
            }
        }

        let number = docket.number.trim();
        if !number.is_empty() && !docket.full_name.contains(number) {
            push(FieldIssueKind::KeyMismatch);
        }

        if docket.due_date.is_some_and(|due| due > latest_due) {
            push(FieldIssueKind::FutureDate("dueDate".to_string()));
        }
        if docket.updated_at.is_some_and(|at| at > latest_update) {
            push(FieldIssueKind::FutureDate("updatedAt".to_string()));
        }
    }

    issues
}

/// Classify a record and apply the structural-scan override.
///
/// If more than 10% of dockets carry structural issues the record is treated
/// as corrupted even when its checksum matches, since a valid checksum can
/// cover systematically bad data.
#[must_use]
pub fn assess(record: &CacheRecord, now: DateTime<Utc>) -> IntegrityStatus {
    let status = classify(record);
    if !status.is_valid() {
        return status;
    }

    let issues = scan_field_issues(&record.dockets, now);
    let affected: HashSet<usize> = issues.iter().map(|i| i.index).collect();
    let total = record.dockets.len();

    if total > 0 && affected.len() * 10 > total {
        return IntegrityStatus::Corrupted {
            reason: format!("{} of {total} dockets have structural issues", affected.len()),
        };
    }

    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dockets(n: usize) -> Vec<DocketRecord> {
        (0..n)
            .map(|i| DocketRecord::new(&format!("{}", 24000 + i), &format!("Job {i}")))
            .collect()
    }

    fn record_with_integrity(items: Vec<DocketRecord>) -> CacheRecord {
        let now = Utc::now();
        let integrity = compute_metadata(&items, now);
        CacheRecord {
            dockets: items,
            last_sync: now,
            integrity: Some(integrity),
        }
    }

    #[test]
    fn test_checksum_order_independent() {
        let items = dockets(20);
        let mut shuffled = items.clone();
        shuffled.reverse();
        shuffled.swap(3, 11);

        assert_eq!(checksum(&items), checksum(&shuffled));
        assert_eq!(checksum(&items), checksum(&items));
        assert_eq!(checksum(&items).len(), 64);
    }

    #[test]
    fn test_checksum_ignores_duplicate_keys() {
        let items = dockets(3);
        let mut doubled = items.clone();
        doubled.push(items[0].clone());
        assert_eq!(checksum(&items), checksum(&doubled));
    }

    #[test]
    fn test_checksum_changes_with_key() {
        let items = dockets(3);
        let mut renamed = items.clone();
        renamed[1].full_name = "99999_Other".to_string();
        assert_ne!(checksum(&items), checksum(&renamed));
    }

    #[test]
    fn test_classify_valid() {
        let record = record_with_integrity(dockets(5));
        assert_eq!(classify(&record), IntegrityStatus::Valid);
    }

    #[test]
    fn test_classify_missing_integrity() {
        let record = CacheRecord {
            dockets: dockets(2),
            last_sync: Utc::now(),
            integrity: None,
        };
        let status = classify(&record);
        assert_eq!(status, IntegrityStatus::MissingIntegrity);
        assert!(status.is_valid());
    }

    #[test]
    fn test_classify_version_checked_before_count() {
        let mut record = record_with_integrity(dockets(5));
        record.dockets.pop();
        if let Some(meta) = record.integrity.as_mut() {
            meta.version = 1;
        }
        assert_eq!(
            classify(&record),
            IntegrityStatus::VersionMismatch {
                found: 1,
                expected: CACHE_FORMAT_VERSION
            }
        );
    }

    #[test]
    fn test_classify_truncation() {
        let mut record = record_with_integrity(dockets(10));
        record.dockets.remove(4);
        assert_eq!(
            classify(&record),
            IntegrityStatus::CountMismatch {
                found: 9,
                expected: 10
            }
        );
    }

    #[test]
    fn test_classify_mutated_key() {
        let mut record = record_with_integrity(dockets(10));
        record.dockets[2].full_name = "24002_Renamed".to_string();
        assert_eq!(classify(&record), IntegrityStatus::ChecksumMismatch);
    }

    #[test]
    fn test_non_key_mutation_is_undetected() {
        let mut record = record_with_integrity(dockets(10));
        record.dockets[2].owner = Some("someone else".to_string());
        assert_eq!(classify(&record), IntegrityStatus::Valid);
    }

    #[test]
    fn test_scan_flags_empty_and_mismatched_keys() {
        let mut items = dockets(3);
        items[0].job_name = "  ".to_string();
        items[1].full_name = "12_Unrelated".to_string();

        let issues = scan_field_issues(&items, Utc::now());
        assert!(issues
            .iter()
            .any(|i| i.index == 0 && i.kind == FieldIssueKind::EmptyField("jobName".into())));
        assert!(issues
            .iter()
            .any(|i| i.index == 1 && i.kind == FieldIssueKind::KeyMismatch));
        assert!(issues.iter().all(|i| i.index != 2));
    }

    #[test]
    fn test_scan_flags_future_dates() {
        let now = Utc::now();
        let far = NaiveDate::from_ymd_opt(2999, 1, 1).unwrap();
        let items = vec![
            DocketRecord::new("1", "A").with_due_date(far),
            DocketRecord::new("2", "B").with_due_date(now.date_naive()),
        ];
        let issues = scan_field_issues(&items, now);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, FieldIssueKind::FutureDate("dueDate".into()));
    }

    #[test]
    fn test_assess_overrides_checksum_when_many_issues() {
        let mut items = dockets(10);
        items[0].number = String::new();
        items[1].number = String::new();
        let record = record_with_integrity(items);

        assert_eq!(classify(&record), IntegrityStatus::Valid);
        assert!(matches!(
            assess(&record, Utc::now()),
            IntegrityStatus::Corrupted { .. }
        ));
    }

    #[test]
    fn test_assess_tolerates_ten_percent() {
        let mut items = dockets(10);
        items[0].number = String::new();
        let record = record_with_integrity(items);
        assert_eq!(assess(&record, Utc::now()), IntegrityStatus::Valid);
    }
}
