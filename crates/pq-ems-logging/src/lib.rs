//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Structured logging adapters and sinks."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Context-carrying logging helpers for grouping runs.

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

#[doc(hidden)]
pub use tracing;

/// Initialize a baseline tracing subscriber suitable for development.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer())
        .try_init();
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogContext<'a> {
    /// Substation the log line concerns.
    pub substation: Option<&'a str>,
    /// Event identifier (mother, child, or a plain event).
    pub event: Option<&'a str>,
    /// Correlation id of the grouping run.
    pub run: Option<&'a str>,
    /// Grouping flavour (`automatic`, `manual`, `ungroup`).
    pub grouping: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a substation identifier.
    pub fn with_substation(mut self, substation: &'a str) -> Self {
        self.substation = Some(substation);
        self
    }

    /// Attach an event identifier.
    pub fn with_event(mut self, event: &'a str) -> Self {
        self.event = Some(event);
        self
    }

    /// Attach a run correlation id.
    pub fn with_run(mut self, run: &'a str) -> Self {
        self.run = Some(run);
        self
    }

    /// Attach the grouping flavour.
    pub fn with_grouping(mut self, grouping: &'a str) -> Self {
        self.grouping = Some(grouping);
        self
    }
}

/// Outcome attached to grouping lifecycle log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupingOutcome {
    /// Every update reached the store.
    Applied,
    /// Some updates failed; storage diverges from the computed plan.
    Partial,
    /// The run was rejected or nothing reached the store.
    Failed,
}

impl GroupingOutcome {
    /// Lowercase label written into the `outcome` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupingOutcome::Applied => "applied",
            GroupingOutcome::Partial => "partial",
            GroupingOutcome::Failed => "failed",
        }
    }
}

/// Emit a standardized grouping lifecycle event.
pub fn log_grouping_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: GroupingOutcome,
) {
    let ctx = context.copied().unwrap_or_default();
    match outcome {
        GroupingOutcome::Applied => tracing::info!(
            event,
            outcome = outcome.as_str(),
            substation = ctx.substation.unwrap_or(""),
            event_id = ctx.event.unwrap_or(""),
            run = ctx.run.unwrap_or(""),
            grouping = ctx.grouping.unwrap_or(""),
            message = %message
        ),
        GroupingOutcome::Partial => tracing::warn!(
            event,
            outcome = outcome.as_str(),
            substation = ctx.substation.unwrap_or(""),
            event_id = ctx.event.unwrap_or(""),
            run = ctx.run.unwrap_or(""),
            grouping = ctx.grouping.unwrap_or(""),
            message = %message
        ),
        GroupingOutcome::Failed => tracing::error!(
            event,
            outcome = outcome.as_str(),
            substation = ctx.substation.unwrap_or(""),
            event_id = ctx.event.unwrap_or(""),
            run = ctx.run.unwrap_or(""),
            grouping = ctx.grouping.unwrap_or(""),
            message = %message
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn macros_emit_without_panic() {
        init();
        let ctx = LogContext::new()
            .with_substation("SS-101")
            .with_event("evt-1");
        pq_info!(context = ctx, "mother selected");
        pq_debug!("debug message");
        pq_warn!(context = ctx.with_grouping("manual"), "skipping {}", "evt-2");
        pq_error!(context = ctx, "persist failed: {}", 42);
    }

    #[test]
    fn init_does_not_panic() {
        init();
    }

    #[test]
    fn grouping_event_helper_emits() {
        init();
        let ctx = LogContext::new().with_run("run-1");
        log_grouping_event(
            Some(&ctx),
            "grouping.automatic",
            "3 groups applied",
            GroupingOutcome::Applied,
        );
        log_grouping_event(
            None,
            "grouping.automatic",
            "1 update failed",
            GroupingOutcome::Partial,
        );
        assert_eq!(GroupingOutcome::Failed.as_str(), "failed");
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn grouping_event_carries_event_id() {
        let captured = Captured::default();
        let sink = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || sink.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let ctx = LogContext::new()
                .with_run("ungroup-1")
                .with_event("evt-mother-9");
            log_grouping_event(
                Some(&ctx),
                "grouping.ungroup",
                "2 children cleared",
                GroupingOutcome::Failed,
            );
        });

        let text = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(text.contains("event_id=\"evt-mother-9\""), "{text}");
        assert!(text.contains("run=\"ungroup-1\""), "{text}");
    }
}
