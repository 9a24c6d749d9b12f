//! Event normalization: raw intercepted calls → typed lifecycle events.
//!
//! The host application makes many calls that are irrelevant to tracking;
//! this module is a filter, not a hard boundary. A capture that matches no
//! recognized endpoint, or whose payload cannot be parsed, is dropped with
//! a debug log and never surfaces as an error.
//!
//! # Recognized endpoints
//!
//! All three lifecycle endpoints are POST calls:
//! - `.../qaOperations/<id>/begin` (also accepted: `/start`)
//! - `.../qaOperations/<id>/complete` (also accepted: `/submit`)
//! - `.../qaOperations/<id>/transition`
//!
//! The QA operation id is taken from the URL path when present, otherwise
//! from the request body (`qaOperationId` or nested `qaOperation._id`).

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::event::{EventKind, LifecycleEvent, RawCapture};

/// Compiled endpoint patterns, in match priority order.
static ENDPOINT_PATTERNS: LazyLock<Vec<(EventKind, Regex)>> = LazyLock::new(|| {
    vec![
        (
            EventKind::Begin,
            Regex::new(r"/qa[_-]?[Oo]perations?/(?:(?<id>[0-9a-fA-F]{24})/)?(?:begin|start)\b")
                .expect("begin pattern is valid"),
        ),
        (
            EventKind::Complete,
            Regex::new(r"/qa[_-]?[Oo]perations?/(?:(?<id>[0-9a-fA-F]{24})/)?(?:complete|submit)\b")
                .expect("complete pattern is valid"),
        ),
        (
            EventKind::Transition,
            Regex::new(r"/qa[_-]?[Oo]perations?/(?:(?<id>[0-9a-fA-F]{24})/)?transition\b")
                .expect("transition pattern is valid"),
        ),
    ]
});

/// Normalize a raw intercepted call into a lifecycle event.
///
/// Returns `None` for calls that do not match a recognized endpoint or
/// that carry no extractable QA operation id. Never fails on malformed
/// bodies — a parse miss is "no event".
pub fn normalize(capture: &RawCapture) -> Option<LifecycleEvent> {
    if !capture.method.eq_ignore_ascii_case("POST") {
        return None;
    }

    let (kind, path_id) = match_endpoint(&capture.url)?;

    let qa_operation_id = path_id.or_else(|| {
        extract_operation_id(capture.request_body.as_ref())
            .or_else(|| extract_operation_id(capture.response_body.as_ref()))
    });

    let Some(qa_operation_id) = qa_operation_id else {
        debug!(url = %capture.url, ?kind, "Dropping lifecycle call without operation id");
        return None;
    };

    let mut event = LifecycleEvent::new(kind, qa_operation_id, capture.timestamp);

    // Enrichment fields are best-effort; either body may carry them.
    for body in [capture.request_body.as_ref(), capture.response_body.as_ref()]
        .into_iter()
        .flatten()
    {
        if event.related_batch_id.is_none() {
            event.related_batch_id = extract_str(
                body,
                &["relatedObjectId", "qaOperationRelatedObjectId", "batchId"],
            );
        }
        if event.attempt_id.is_none() {
            event.attempt_id = extract_str(body, &["attemptId", "attempt_id"]);
        }
        if event.review_level.is_none() {
            event.review_level = extract_u32(body, &["reviewLevel", "level"]);
        }
        if event.max_time_seconds.is_none() {
            event.max_time_seconds = extract_i64(body, &["maxTimeSeconds", "maxTime"]);
        }
    }

    Some(event)
}

/// Match a URL against the endpoint patterns.
///
/// Returns the event kind and the operation id when the URL carries one.
fn match_endpoint(url: &str) -> Option<(EventKind, Option<String>)> {
    for (kind, pattern) in ENDPOINT_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(url) {
            let id = caps.name("id").map(|m| m.as_str().to_string());
            return Some((*kind, id));
        }
    }
    None
}

/// Extract a QA operation id from a JSON body.
///
/// Accepted shapes, in priority order:
/// - flattened: `{"qaOperationId": "..."}`
/// - nested: `{"qaOperation": {"_id": "..."}}`
fn extract_operation_id(body: Option<&Value>) -> Option<String> {
    let body = body?;
    extract_str(body, &["qaOperationId"]).or_else(|| {
        body.get("qaOperation")
            .and_then(|op| op.get("_id"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from)
    })
}

fn extract_str(body: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| body.get(key))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn extract_u32(body: &Value, keys: &[&str]) -> Option<u32> {
    keys.iter()
        .find_map(|key| body.get(key))
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
}

fn extract_i64(body: &Value, keys: &[&str]) -> Option<i64> {
    keys.iter()
        .find_map(|key| body.get(key))
        .and_then(Value::as_i64)
}
