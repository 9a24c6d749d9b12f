//! Entry filtering for dashboard and CLI surfaces.
//!
//! Defines canonical filter defaults, validation rules, and the pure
//! `list_entries` read so filtering semantics stay consistent across
//! surfaces. Nothing here mutates the entry set.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entry::{DashboardEntry, EntryKind};

/// Raw filter input from a caller surface (dates as YYYY-MM-DD strings).
#[derive(Debug, Clone, Default)]
pub struct EntryFilterInput {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub project_id: Option<String>,
    pub kind: Option<EntryKind>,
    pub activity_type: Option<String>,
    pub show_only_over_time: bool,
}

/// Canonical validated filter. Date bounds are epoch ms, inclusive start
/// and exclusive end.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<EntryKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_type: Option<String>,
    #[serde(default)]
    pub show_only_over_time: bool,
}

/// Filter validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("invalid date (expected YYYY-MM-DD): {0}")]
    InvalidDate(String),

    #[error("empty date range: start {start} is not before end {end}")]
    EmptyRange { start: String, end: String },
}

impl EntryFilterInput {
    /// Validate the input into a canonical filter.
    ///
    /// A date names a whole UTC calendar day: `start_date` becomes that
    /// day's first instant, `end_date` the *following* day's first instant,
    /// so a single-day range is expressed as equal start and end dates.
    pub fn validate(self) -> Result<EntryFilter, FilterError> {
        let start_ms = self
            .start_date
            .as_deref()
            .map(|d| day_start_ms(d))
            .transpose()?;
        let end_ms = self
            .end_date
            .as_deref()
            .map(|d| day_start_ms(d).map(|ms| ms + 86_400_000))
            .transpose()?;

        if let (Some(start), Some(end)) = (start_ms, end_ms) {
            if start >= end {
                return Err(FilterError::EmptyRange {
                    start: self.start_date.unwrap_or_default(),
                    end: self.end_date.unwrap_or_default(),
                });
            }
        }

        Ok(EntryFilter {
            start_ms,
            end_ms,
            project_id: self.project_id,
            kind: self.kind,
            activity_type: self.activity_type,
            show_only_over_time: self.show_only_over_time,
        })
    }
}

/// Pure read: the entries matching a filter, input order preserved.
#[must_use]
pub fn list_entries(entries: &[DashboardEntry], filter: &EntryFilter) -> Vec<DashboardEntry> {
    entries
        .iter()
        .filter(|entry| matches(entry, filter))
        .cloned()
        .collect()
}

fn matches(entry: &DashboardEntry, filter: &EntryFilter) -> bool {
    if let Some(start) = filter.start_ms {
        if entry.started_at < start {
            return false;
        }
    }
    if let Some(end) = filter.end_ms {
        if entry.started_at >= end {
            return false;
        }
    }
    if let Some(kind) = filter.kind {
        if entry.kind != kind {
            return false;
        }
    }
    if let Some(project_id) = &filter.project_id {
        if entry.project_id.as_ref() != Some(project_id) {
            return false;
        }
    }
    if let Some(activity_type) = &filter.activity_type {
        if entry.activity_type.as_ref() != Some(activity_type) {
            return false;
        }
    }
    if filter.show_only_over_time && !entry.is_over_time() {
        return false;
    }
    true
}

fn day_start_ms(date: &str) -> Result<i64, FilterError> {
    let parsed = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| FilterError::InvalidDate(date.to_string()))?;
    let midnight = parsed
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| FilterError::InvalidDate(date.to_string()))?;
    Ok(midnight.and_utc().timestamp_millis())
}
