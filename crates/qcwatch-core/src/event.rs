//! Lifecycle event types.
//!
//! `RawCapture` is the tuple delivered by the network interceptor
//! collaborator; `LifecycleEvent` is the typed form produced by the
//! normalizer and consumed by the correlator. Lifecycle events are
//! ephemeral — they are never persisted directly.

use serde::{Deserialize, Serialize};

/// A raw intercepted network call, as delivered by the interceptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCapture {
    /// Request URL.
    pub url: String,
    /// HTTP method (uppercase).
    pub method: String,
    /// Request body, when one was captured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<serde_json::Value>,
    /// Response body, when one was captured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<serde_json::Value>,
    /// Observation timestamp (epoch ms).
    pub timestamp: i64,
}

/// Which lifecycle step a capture represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// An audit was started.
    Begin,
    /// An audit was submitted/completed.
    Complete,
    /// An audit moved to another review level.
    Transition,
}

/// A typed lifecycle event keyed by QA operation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// Lifecycle step.
    pub kind: EventKind,
    /// QA operation identifier.
    pub qa_operation_id: String,
    /// Batch / related-object identifier, when present in the payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_batch_id: Option<String>,
    /// Attempt identifier, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt_id: Option<String>,
    /// Review level, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_level: Option<u32>,
    /// Allotted time for the audit (seconds), when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_time_seconds: Option<i64>,
    /// When the call was observed (epoch ms).
    pub observed_at: i64,
}

impl LifecycleEvent {
    /// Minimal event with only the required fields set.
    pub fn new(kind: EventKind, qa_operation_id: impl Into<String>, observed_at: i64) -> Self {
        Self {
            kind,
            qa_operation_id: qa_operation_id.into(),
            related_batch_id: None,
            attempt_id: None,
            review_level: None,
            max_time_seconds: None,
            observed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_serde_uses_snake_case() {
        assert_eq!(serde_json::to_string(&EventKind::Begin).unwrap(), "\"begin\"");
        assert_eq!(
            serde_json::to_string(&EventKind::Complete).unwrap(),
            "\"complete\""
        );
        assert_eq!(
            serde_json::to_string(&EventKind::Transition).unwrap(),
            "\"transition\""
        );
    }

    #[test]
    fn lifecycle_event_new_sets_required_fields() {
        let event = LifecycleEvent::new(EventKind::Begin, "qaop_1", 1_000);
        assert_eq!(event.kind, EventKind::Begin);
        assert_eq!(event.qa_operation_id, "qaop_1");
        assert_eq!(event.observed_at, 1_000);
        assert!(event.related_batch_id.is_none());
        assert!(event.max_time_seconds.is_none());
    }

    #[test]
    fn raw_capture_serde_roundtrip() {
        let capture = RawCapture {
            url: "https://app.outlier.ai/api/audits/begin".to_string(),
            method: "POST".to_string(),
            request_body: Some(serde_json::json!({"qaOperationId": "qaop_1"})),
            response_body: None,
            timestamp: 42,
        };
        let json = serde_json::to_string(&capture).unwrap();
        let back: RawCapture = serde_json::from_str(&json).unwrap();
        assert_eq!(back.url, capture.url);
        assert_eq!(back.timestamp, 42);
        assert!(back.response_body.is_none());
    }
}
