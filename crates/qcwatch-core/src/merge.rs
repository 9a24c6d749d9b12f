//! Timeline merge: audit entries + off-platform entries.
//!
//! Audit and off-platform entries live in disjoint id spaces and are never
//! deduplicated against each other. Within each source, later observations
//! of the same record replace earlier ones (re-finalization after a
//! correction). Overlapping time ranges are preserved as-is — the
//! underlying activities can legitimately overlap — and `find_overlaps`
//! lets a surface flag them for manual judgment.

use std::collections::HashMap;

use crate::entry::DashboardEntry;

/// Merge the two entry sources into one `started_at`-ordered timeline.
///
/// Dedup key for audit entries is the QA operation id; for off-platform
/// entries it is the entry's own generated id. The entry with the later
/// `observed_at` wins and replaces the earlier record rather than
/// appending. Ties keep the later-supplied entry.
#[must_use]
pub fn merge_entries(
    audit: &[DashboardEntry],
    off_platform: &[DashboardEntry],
) -> Vec<DashboardEntry> {
    let mut merged = dedup_by_key(audit, audit_key);
    merged.extend(dedup_by_key(off_platform, |entry| entry.id.clone()));

    merged.sort_by(|a, b| {
        a.started_at
            .cmp(&b.started_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    merged
}

/// Keep one entry per key, the one with the latest `observed_at`.
fn dedup_by_key(
    entries: &[DashboardEntry],
    key: impl Fn(&DashboardEntry) -> String,
) -> Vec<DashboardEntry> {
    let mut latest: HashMap<String, &DashboardEntry> = HashMap::new();
    for entry in entries {
        latest
            .entry(key(entry))
            .and_modify(|kept| {
                if entry.observed_at >= kept.observed_at {
                    *kept = entry;
                }
            })
            .or_insert(entry);
    }
    latest.into_values().cloned().collect()
}

/// Dedup key for an audit entry: the QA operation id when present, else
/// the entry id (only reconstructed/degenerate records lack one).
fn audit_key(entry: &DashboardEntry) -> String {
    entry
        .qa_operation_id
        .clone()
        .unwrap_or_else(|| entry.id.clone())
}

/// A pair of entries whose time ranges overlap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlap {
    pub first_id: String,
    pub second_id: String,
    /// Overlapping span (ms).
    pub overlap_ms: i64,
}

/// Find cross-source overlaps in an already-merged timeline.
///
/// Only audit/off-platform pairs are reported: overlap within one source
/// is ordinary (parallel audits do not occur, and a user double-logging
/// off-platform time is their own record-keeping).
#[must_use]
pub fn find_overlaps(merged: &[DashboardEntry]) -> Vec<Overlap> {
    let mut overlaps = Vec::new();
    for (i, a) in merged.iter().enumerate() {
        for b in &merged[i + 1..] {
            if a.kind == b.kind {
                continue;
            }
            let a_end = a.started_at.saturating_add(a.duration_ms);
            let b_end = b.started_at.saturating_add(b.duration_ms);
            let overlap_ms = a_end.min(b_end) - a.started_at.max(b.started_at);
            if overlap_ms > 0 {
                overlaps.push(Overlap {
                    first_id: a.id.clone(),
                    second_id: b.id.clone(),
                    overlap_ms,
                });
            }
        }
    }
    overlaps
}
