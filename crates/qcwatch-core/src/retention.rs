//! Entry retention and cleanup.
//!
//! Prevents unbounded growth of the persisted entry set. Only finalized
//! entries (completed or canceled) are eligible; in-flight entries are
//! always preserved regardless of age.
//!
//! # Cleanup order
//!
//! 1. Delete finalized entries older than `max_age_days`
//! 2. Delete excess finalized entries beyond `max_entries` (oldest first)
//!
//! Either knob set to 0 disables that policy.

use tracing::{debug, info};

use crate::config::RetentionConfig;
use crate::entry::DashboardEntry;

const DAY_MS: i64 = 86_400_000;

/// Result of a retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneResult {
    /// Entries deleted by the age policy.
    pub deleted_by_age: usize,
    /// Entries deleted by the count limit.
    pub deleted_by_count: usize,
}

impl PruneResult {
    /// Total entries deleted.
    #[must_use]
    pub fn total_deleted(&self) -> usize {
        self.deleted_by_age + self.deleted_by_count
    }

    /// Whether any cleanup was performed.
    #[must_use]
    pub fn any_work_done(&self) -> bool {
        self.total_deleted() > 0
    }
}

/// Run the retention sweep over the entry set in place.
pub fn prune_entries(
    entries: &mut Vec<DashboardEntry>,
    config: &RetentionConfig,
    now: i64,
) -> PruneResult {
    let mut result = PruneResult::default();

    if config.max_age_days > 0 {
        let cutoff = now.saturating_sub((config.max_age_days as i64).saturating_mul(DAY_MS));
        let before = entries.len();
        entries.retain(|entry| !entry.status.is_finalized() || entry.started_at >= cutoff);
        result.deleted_by_age = before - entries.len();
        if result.deleted_by_age > 0 {
            info!(
                deleted = result.deleted_by_age,
                max_age_days = config.max_age_days,
                "Pruned old entries by age"
            );
        }
    }

    if config.max_entries > 0 {
        result.deleted_by_count = prune_excess(entries, config.max_entries);
        if result.deleted_by_count > 0 {
            info!(
                deleted = result.deleted_by_count,
                max = config.max_entries,
                "Pruned excess entries by count"
            );
        }
    }

    if !result.any_work_done() {
        debug!(total = entries.len(), "Retention sweep found nothing to prune");
    }
    result
}

/// Drop the oldest finalized entries until at most `max` remain.
fn prune_excess(entries: &mut Vec<DashboardEntry>, max: usize) -> usize {
    let finalized: usize = entries
        .iter()
        .filter(|entry| entry.status.is_finalized())
        .count();
    if finalized <= max {
        return 0;
    }
    let excess = finalized - max;

    // Ids of the oldest finalized entries.
    let mut victims: Vec<(i64, String)> = entries
        .iter()
        .filter(|entry| entry.status.is_finalized())
        .map(|entry| (entry.started_at, entry.id.clone()))
        .collect();
    victims.sort();
    victims.truncate(excess);
    let victim_ids: std::collections::HashSet<String> =
        victims.into_iter().map(|(_, id)| id).collect();

    entries.retain(|entry| !victim_ids.contains(&entry.id));
    excess
}
