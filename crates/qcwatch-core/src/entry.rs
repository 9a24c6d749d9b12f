//! Dashboard entry types — the durable, user-visible unit of the timeline.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Entry source discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Derived from intercepted audit lifecycle events.
    Audit,
    /// Manually logged off-platform activity.
    OffPlatform,
}

/// Entry lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryStatus {
    Completed,
    InProgress,
    Canceled,
    PendingTransition,
}

impl EntryStatus {
    /// Whether the entry has reached a terminal state.
    #[must_use]
    pub const fn is_finalized(self) -> bool {
        matches!(self, Self::Completed | Self::Canceled)
    }
}

/// One row of the combined work timeline.
///
/// Audit entries carry the QA-operation fields; off-platform entries carry
/// the activity fields. A single struct (rather than an enum) keeps the
/// persisted shape flat and lets the query layer filter uniformly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardEntry {
    /// Stable id: derived from the QA operation id for audits, generated
    /// for off-platform entries.
    pub id: String,
    /// Entry source.
    pub kind: EntryKind,
    /// Start of the work span (epoch ms).
    pub started_at: i64,
    /// Length of the work span (ms), always >= 0.
    pub duration_ms: i64,
    /// Lifecycle status.
    pub status: EntryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    // Audit-only fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qa_operation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_level: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_time_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition_time: Option<i64>,
    /// Set when the entry was finalized from partial data (orphaned
    /// terminating event after a restart). Surfaces as a data-quality
    /// flag, never an error.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reconstructed: bool,
    /// When this entry was last produced by the correlator (epoch ms).
    /// Later observations replace earlier ones during merge.
    #[serde(default)]
    pub observed_at: i64,

    // Off-platform-only fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_type: Option<String>,
    /// Calendar day for off-platform entries (YYYY-MM-DD).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

impl DashboardEntry {
    /// Blank audit entry; the correlator fills in the lifecycle fields.
    #[must_use]
    pub fn audit(qa_operation_id: &str, started_at: i64) -> Self {
        Self {
            id: audit_entry_id(qa_operation_id),
            kind: EntryKind::Audit,
            started_at,
            duration_ms: 0,
            status: EntryStatus::InProgress,
            project_id: None,
            project_name: None,
            description: None,
            qa_operation_id: Some(qa_operation_id.to_string()),
            attempt_id: None,
            review_level: None,
            max_time_seconds: None,
            ended_at: None,
            completion_time: None,
            transition_time: None,
            reconstructed: false,
            observed_at: started_at,
            activity_type: None,
            date: None,
        }
    }

    /// New off-platform entry with a generated id.
    #[must_use]
    pub fn off_platform(
        started_at: i64,
        duration_ms: i64,
        activity_type: impl Into<String>,
        description: Option<String>,
    ) -> Self {
        Self {
            id: generate_off_platform_id(),
            kind: EntryKind::OffPlatform,
            started_at,
            duration_ms: duration_ms.max(0),
            status: EntryStatus::Completed,
            project_id: None,
            project_name: None,
            description,
            qa_operation_id: None,
            attempt_id: None,
            review_level: None,
            max_time_seconds: None,
            ended_at: None,
            completion_time: None,
            transition_time: None,
            reconstructed: false,
            observed_at: started_at,
            activity_type: Some(activity_type.into()),
            date: Some(format_entry_date(started_at)),
        }
    }

    /// Whether an audit entry ran past its allotted time.
    #[must_use]
    pub fn is_over_time(&self) -> bool {
        match (self.kind, self.max_time_seconds) {
            (EntryKind::Audit, Some(max)) if max > 0 => self.duration_ms > max * 1_000,
            _ => false,
        }
    }
}

/// Stable entry id for an audit entry.
#[must_use]
pub fn audit_entry_id(qa_operation_id: &str) -> String {
    format!("audit_{qa_operation_id}")
}

/// Generated id for an off-platform entry.
fn generate_off_platform_id() -> String {
    let nonce: u64 = rand::rng().random();
    format!("off_{nonce:016x}")
}

/// Calendar day (UTC) for an epoch-ms timestamp, YYYY-MM-DD.
fn format_entry_date(epoch_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(epoch_ms)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}
