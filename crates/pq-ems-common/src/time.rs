//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the grouping runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};

/// Current wall-clock time truncated to millisecond precision, matching what
/// the event store keeps for `grouped_at`.
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// Render a millisecond span the way the dashboard labels cascade lengths.
pub fn format_span_ms(span_ms: i64) -> String {
    let span_ms = span_ms.max(0);
    if span_ms < 1_000 {
        return format!("{span_ms} ms");
    }
    let secs = span_ms / 1_000;
    if secs < 60 {
        return format!("{}.{:03} s", secs, span_ms % 1_000);
    }
    format!("{}m {:02}s", secs / 60, secs % 60)
}
