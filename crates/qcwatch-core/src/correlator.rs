//! Work-session correlation state machine.
//!
//! Consumes normalized lifecycle events in arrival order and maintains one
//! in-flight `Session` per QA operation id. Arrival order is whatever the
//! interceptor delivered, not wall-clock order: the hosting context can be
//! suspended and restarted at any point, so events for unknown sessions are
//! a first-class path (best-effort reconstruction), and a later-observed
//! `Begin` for an id that already completed is redundant, not a reset.
//!
//! # State machine
//!
//! ```text
//! NotStarted --Begin--> InProgress --Complete--> PendingTransition
//!     InProgress --Transition--> finalized (completed-via-transition)
//!     PendingTransition --Transition--> finalized (completed)
//!     PendingTransition --grace expiry--> finalized (completed)
//!     InProgress --abandonment timeout--> finalized (canceled)
//! ```
//!
//! Every `ingest`/`tick` call returns the dashboard entries that step
//! finalized or updated, so the caller can persist before the next event.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::CorrelatorConfig;
use crate::entry::{DashboardEntry, EntryStatus};
use crate::event::{EventKind, LifecycleEvent};

/// In-flight correlation status for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Begin observed, no terminating event yet.
    InProgress,
    /// Complete observed; waiting out the grace window for a trailing
    /// Transition.
    PendingTransition,
}

/// In-flight correlation state for one QA operation.
///
/// Owned exclusively by the correlator; persisted inside the snapshot so a
/// host restart reconstructs the table instead of losing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub qa_operation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_level: Option<u32>,
    pub started_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_time_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition_time: Option<i64>,
    pub status: SessionStatus,
    /// Set when the session was rebuilt from a terminating event alone.
    #[serde(default)]
    pub reconstructed: bool,
}

impl Session {
    fn from_begin(event: &LifecycleEvent) -> Self {
        Self {
            qa_operation_id: event.qa_operation_id.clone(),
            batch_id: event.related_batch_id.clone(),
            attempt_id: event.attempt_id.clone(),
            review_level: event.review_level,
            started_at: event.observed_at,
            max_time_seconds: event.max_time_seconds,
            completion_time: None,
            transition_time: None,
            status: SessionStatus::InProgress,
            reconstructed: false,
        }
    }

    /// Best-effort session for an orphaned terminating event.
    ///
    /// Start time is unknown; approximate it as `observed_at - max_time`
    /// when the allotted time is known, else `observed_at`. The resulting
    /// duration is an estimate either way, so the session is flagged.
    fn reconstruct(event: &LifecycleEvent) -> Self {
        let started_at = event
            .max_time_seconds
            .filter(|max| *max > 0)
            .map_or(event.observed_at, |max| {
                event.observed_at.saturating_sub(max.saturating_mul(1_000))
            });
        Self {
            qa_operation_id: event.qa_operation_id.clone(),
            batch_id: event.related_batch_id.clone(),
            attempt_id: event.attempt_id.clone(),
            review_level: event.review_level,
            started_at,
            max_time_seconds: event.max_time_seconds,
            completion_time: None,
            transition_time: None,
            status: SessionStatus::InProgress,
            reconstructed: true,
        }
    }

    /// Later of the completion/transition timestamps, when either is set.
    fn terminal_time(&self) -> Option<i64> {
        match (self.completion_time, self.transition_time) {
            (Some(c), Some(t)) => Some(c.max(t)),
            (Some(c), None) => Some(c),
            (None, Some(t)) => Some(t),
            (None, None) => None,
        }
    }

    /// Merge enrichment fields from a later event without resetting state.
    fn absorb(&mut self, event: &LifecycleEvent) {
        if self.batch_id.is_none() {
            self.batch_id = event.related_batch_id.clone();
        }
        if self.attempt_id.is_none() {
            self.attempt_id = event.attempt_id.clone();
        }
        if self.review_level.is_none() {
            self.review_level = event.review_level;
        }
        if self.max_time_seconds.is_none() {
            self.max_time_seconds = event.max_time_seconds;
        }
    }
}

/// The session correlation state machine.
#[derive(Debug)]
pub struct SessionCorrelator {
    config: CorrelatorConfig,
    sessions: HashMap<String, Session>,
}

impl SessionCorrelator {
    #[must_use]
    pub fn new(config: CorrelatorConfig) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
        }
    }

    /// Rebuild the in-flight table from persisted sessions (host restart).
    #[must_use]
    pub fn from_sessions(config: CorrelatorConfig, sessions: Vec<Session>) -> Self {
        let sessions = sessions
            .into_iter()
            .map(|s| (s.qa_operation_id.clone(), s))
            .collect();
        Self { config, sessions }
    }

    /// Current in-flight sessions, for persistence.
    #[must_use]
    pub fn sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.qa_operation_id.cmp(&b.qa_operation_id));
        sessions
    }

    /// Number of in-flight sessions.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.sessions.len()
    }

    /// Apply one lifecycle event.
    ///
    /// Returns the entries this event finalized or updated, in emission
    /// order. The returned entries share ids with earlier emissions for
    /// the same QA operation; later observations replace earlier ones
    /// downstream.
    pub fn ingest(&mut self, event: &LifecycleEvent) -> Vec<DashboardEntry> {
        match event.kind {
            EventKind::Begin => self.ingest_begin(event),
            EventKind::Complete => self.ingest_complete(event),
            EventKind::Transition => self.ingest_transition(event),
        }
    }

    fn ingest_begin(&mut self, event: &LifecycleEvent) -> Vec<DashboardEntry> {
        if let Some(session) = self.sessions.get_mut(&event.qa_operation_id) {
            // Retried network calls and late-delivered Begins are
            // heartbeats, never a restart.
            session.absorb(event);
            debug!(
                qa_operation_id = %event.qa_operation_id,
                "Redundant Begin treated as heartbeat"
            );
            return Vec::new();
        }

        let session = Session::from_begin(event);
        info!(
            qa_operation_id = %event.qa_operation_id,
            started_at = session.started_at,
            "Session started"
        );
        let entry = in_progress_entry(&session, event.observed_at);
        self.sessions.insert(event.qa_operation_id.clone(), session);
        vec![entry]
    }

    fn ingest_complete(&mut self, event: &LifecycleEvent) -> Vec<DashboardEntry> {
        let Some(session) = self.sessions.get_mut(&event.qa_operation_id) else {
            return vec![self.finalize_orphan(event)];
        };

        session.absorb(event);
        // A repeat Complete on a pending session updates the completion
        // time; the grace window restarts from the later observation.
        session.completion_time = Some(event.observed_at);
        session.status = SessionStatus::PendingTransition;
        debug!(
            qa_operation_id = %event.qa_operation_id,
            completion_time = event.observed_at,
            "Session completed, grace window open"
        );
        vec![in_progress_entry(session, event.observed_at)]
    }

    fn ingest_transition(&mut self, event: &LifecycleEvent) -> Vec<DashboardEntry> {
        let Some(mut session) = self.sessions.remove(&event.qa_operation_id) else {
            return vec![self.finalize_orphan(event)];
        };

        session.absorb(event);
        session.transition_time = Some(event.observed_at);
        // Arriving before Complete means completed-via-transition; either
        // way the transition is the last signal we will see.
        let entry = finalized_entry(&session, EntryStatus::Completed, event.observed_at);
        info!(
            qa_operation_id = %event.qa_operation_id,
            duration_ms = entry.duration_ms,
            "Session finalized on transition"
        );
        vec![entry]
    }

    /// Reconstruct and immediately finalize a session for an orphaned
    /// terminating event (host restart lost the Begin).
    fn finalize_orphan(&self, event: &LifecycleEvent) -> DashboardEntry {
        let mut session = Session::reconstruct(event);
        match event.kind {
            EventKind::Transition => session.transition_time = Some(event.observed_at),
            _ => session.completion_time = Some(event.observed_at),
        }
        info!(
            qa_operation_id = %event.qa_operation_id,
            kind = ?event.kind,
            "Orphaned terminating event; finalizing reconstructed session"
        );
        finalized_entry(&session, EntryStatus::Completed, event.observed_at)
    }

    /// Re-evaluate all in-flight sessions against `now`.
    ///
    /// Finalizes pending sessions whose grace window elapsed and cancels
    /// abandoned in-progress sessions. Returns the finalized entries.
    pub fn tick(&mut self, now: i64) -> Vec<DashboardEntry> {
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, session)| self.is_due(session, now))
            .map(|(id, _)| id.clone())
            .collect();

        let mut finalized = Vec::with_capacity(expired.len());
        for id in expired {
            let Some(session) = self.sessions.remove(&id) else {
                continue;
            };
            let entry = match session.status {
                SessionStatus::PendingTransition => {
                    debug!(qa_operation_id = %id, "Grace window elapsed without transition");
                    finalized_entry(&session, EntryStatus::Completed, now)
                }
                SessionStatus::InProgress => {
                    info!(qa_operation_id = %id, started_at = session.started_at, "Session abandoned");
                    finalized_entry(&session, EntryStatus::Canceled, now)
                }
            };
            finalized.push(entry);
        }
        finalized
    }

    /// Whether a session's grace window or abandonment timeout has elapsed.
    fn is_due(&self, session: &Session, now: i64) -> bool {
        match session.status {
            SessionStatus::PendingTransition => session
                .completion_time
                .is_some_and(|c| now.saturating_sub(c) >= self.config.grace_window_ms),
            SessionStatus::InProgress => {
                let age = now.saturating_sub(session.started_at);
                match session.max_time_seconds.filter(|max| *max > 0) {
                    Some(max) => {
                        let cutoff = (max.saturating_mul(1_000) as f64
                            * self.config.timeout_multiplier) as i64;
                        age >= cutoff
                    }
                    None => age >= self.config.fallback_abandon_ms,
                }
            }
        }
    }
}

/// Build the updated (non-terminal) entry for a live session.
fn in_progress_entry(session: &Session, observed_at: i64) -> DashboardEntry {
    let status = match session.status {
        SessionStatus::InProgress => EntryStatus::InProgress,
        SessionStatus::PendingTransition => EntryStatus::PendingTransition,
    };
    let mut entry = entry_from_session(session, observed_at);
    entry.status = status;
    entry.duration_ms = session
        .terminal_time()
        .unwrap_or(observed_at)
        .saturating_sub(session.started_at)
        .max(0);
    entry
}

/// Build the terminal entry for a finalized session.
///
/// Completed entries measure duration from start to the later of the
/// completion/transition timestamps. Canceled entries credit no time.
fn finalized_entry(session: &Session, status: EntryStatus, observed_at: i64) -> DashboardEntry {
    let mut entry = entry_from_session(session, observed_at);
    entry.status = status;
    match status {
        EntryStatus::Canceled => {
            entry.duration_ms = 0;
        }
        _ => {
            let ended_at = session.terminal_time().unwrap_or(observed_at);
            entry.ended_at = Some(ended_at);
            entry.duration_ms = ended_at.saturating_sub(session.started_at).max(0);
        }
    }
    entry
}

fn entry_from_session(session: &Session, observed_at: i64) -> DashboardEntry {
    let mut entry = DashboardEntry::audit(&session.qa_operation_id, session.started_at);
    entry.attempt_id = session.attempt_id.clone();
    entry.review_level = session.review_level;
    entry.max_time_seconds = session.max_time_seconds;
    entry.completion_time = session.completion_time;
    entry.transition_time = session.transition_time;
    entry.reconstructed = session.reconstructed;
    entry.observed_at = observed_at;
    entry.project_id = session.batch_id.clone();
    entry
}
