//! Engine runtime: one event at a time, one write per transition.
//!
//! `Engine` owns the correlator, the entry set, and the store handle. All
//! state-machine work is synchronous and in-memory; the single snapshot
//! write that commits a transition is the only suspension point. A failed
//! write leaves the in-memory state marked dirty and is retried on the
//! next event or tick, so a transition is never lost while the process
//! lives.
//!
//! `run_engine` is the async shell: an mpsc channel of interceptor
//! messages multiplexed with a periodic tick. Events are processed
//! strictly in arrival order; no other task touches engine state.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::QcwatchConfig;
use crate::correlator::SessionCorrelator;
use crate::entry::{DashboardEntry, EntryKind};
use crate::error::Result;
use crate::event::RawCapture;
use crate::merge::merge_entries;
use crate::normalizer::normalize;
use crate::persist::{LoadOutcome, Snapshot, load_snapshot, save_snapshot};
use crate::query::{EntryFilter, list_entries};
use crate::retention::prune_entries;
use crate::store::KvStore;

/// Messages accepted by the engine loop.
#[derive(Debug)]
pub enum EngineMessage {
    /// A raw intercepted network call.
    Capture(RawCapture),
    /// A manually logged off-platform entry.
    OffPlatform(DashboardEntry),
    /// Flush and stop.
    Shutdown,
}

/// The correlation engine with its durability handle.
pub struct Engine {
    correlator: SessionCorrelator,
    audit_entries: Vec<DashboardEntry>,
    off_platform_entries: Vec<DashboardEntry>,
    store: Box<dyn KvStore>,
    config: QcwatchConfig,
    /// Set when the last snapshot write failed; retried on the next step.
    dirty: bool,
}

impl Engine {
    /// Reconstruct engine state entirely from the store.
    ///
    /// Returns the engine plus the load outcome so callers can surface a
    /// migration signal when the snapshot was unusable.
    pub fn load(store: Box<dyn KvStore>, config: QcwatchConfig) -> Result<(Self, LoadOutcome)> {
        let outcome = load_snapshot(store.as_ref())?;
        let snapshot = outcome.clone().into_snapshot();

        let (audit_entries, off_platform_entries) = snapshot
            .entries
            .into_iter()
            .partition(|entry| entry.kind == EntryKind::Audit);

        let engine = Self {
            correlator: SessionCorrelator::from_sessions(
                config.correlator.clone(),
                snapshot.sessions,
            ),
            audit_entries,
            off_platform_entries,
            store,
            config,
            dirty: false,
        };
        info!(
            sessions = engine.correlator.in_flight_count(),
            audit_entries = engine.audit_entries.len(),
            off_platform_entries = engine.off_platform_entries.len(),
            "Engine state loaded"
        );
        Ok((engine, outcome))
    }

    /// Apply one intercepted call. Unrecognized calls are a no-op.
    pub fn handle_capture(&mut self, capture: &RawCapture) {
        let Some(event) = normalize(capture) else {
            return;
        };
        let emitted = self.correlator.ingest(&event);
        self.apply_audit_entries(emitted);
        self.persist();
    }

    /// Record a manually logged off-platform entry.
    pub fn add_off_platform(&mut self, entry: DashboardEntry) {
        debug!(entry_id = %entry.id, "Off-platform entry added");
        self.off_platform_entries.push(entry);
        self.persist();
    }

    /// Periodic re-evaluation: grace windows, abandonment, retention, and
    /// the retry of any failed write.
    pub fn handle_tick(&mut self, now: i64) {
        let finalized = self.correlator.tick(now);
        let had_work = !finalized.is_empty();
        self.apply_audit_entries(finalized);

        let pruned = self.sweep_retention(now);
        if had_work || pruned.any_work_done() || self.dirty {
            self.persist();
        }
    }

    /// Run the retention sweep immediately and persist the result.
    pub fn prune(&mut self, now: i64) -> crate::retention::PruneResult {
        let result = self.sweep_retention(now);
        if result.any_work_done() || self.dirty {
            self.persist();
        }
        result
    }

    fn sweep_retention(&mut self, now: i64) -> crate::retention::PruneResult {
        let mut result = prune_entries(&mut self.audit_entries, &self.config.retention, now);
        let off = prune_entries(&mut self.off_platform_entries, &self.config.retention, now);
        result.deleted_by_age += off.deleted_by_age;
        result.deleted_by_count += off.deleted_by_count;
        result
    }

    /// The combined, ordered timeline.
    #[must_use]
    pub fn entries(&self) -> Vec<DashboardEntry> {
        merge_entries(&self.audit_entries, &self.off_platform_entries)
    }

    /// Filtered read over the combined timeline.
    #[must_use]
    pub fn query(&self, filter: &EntryFilter) -> Vec<DashboardEntry> {
        list_entries(&self.entries(), filter)
    }

    /// Number of in-flight sessions (diagnostics).
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.correlator.in_flight_count()
    }

    /// Whether the last write failed and a retry is pending.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Upsert correlator output into the audit entry set by entry id.
    fn apply_audit_entries(&mut self, emitted: Vec<DashboardEntry>) {
        for entry in emitted {
            match self
                .audit_entries
                .iter_mut()
                .find(|existing| existing.id == entry.id)
            {
                Some(existing) => *existing = entry,
                None => self.audit_entries.push(entry),
            }
        }
    }

    /// Commit the current state as one snapshot write.
    fn persist(&mut self) {
        let snapshot = Snapshot::new(self.correlator.sessions(), self.entries());
        match save_snapshot(self.store.as_ref(), &snapshot) {
            Ok(()) => {
                self.dirty = false;
            }
            Err(err) => {
                // State stays in memory; the next event or tick retries.
                warn!(error = %err, "Snapshot write failed; will retry");
                self.dirty = true;
            }
        }
    }
}

/// Current wall-clock time (epoch ms).
#[must_use]
pub fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| i64::try_from(d.as_millis()).ok())
        .unwrap_or(0)
}

/// Drive the engine until the channel closes or `Shutdown` arrives.
///
/// The tick interval realizes the grace window and abandonment sweeps;
/// there are no blocking waits anywhere in the engine.
pub async fn run_engine(
    mut engine: Engine,
    mut rx: mpsc::Receiver<EngineMessage>,
    tick_interval: Duration,
) -> Engine {
    // First tick lands one full interval out; an immediate tick would
    // re-evaluate sessions before any event has been processed.
    let first = tokio::time::Instant::now() + tick_interval;
    let mut ticker = tokio::time::interval_at(first, tick_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            message = rx.recv() => match message {
                Some(EngineMessage::Capture(capture)) => engine.handle_capture(&capture),
                Some(EngineMessage::OffPlatform(entry)) => engine.add_off_platform(entry),
                Some(EngineMessage::Shutdown) | None => {
                    engine.handle_tick(now_ms());
                    info!("Engine loop stopped");
                    return engine;
                }
            },
            _ = ticker.tick() => engine.handle_tick(now_ms()),
        }
    }
}
