//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Structured logging adapters and sinks."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
/// Shared expansion for the level-specific macros. Not part of the public surface.
#[doc(hidden)]
#[macro_export]
macro_rules! __pq_event {
    ($level:expr, $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        $crate::tracing::event!(
            $level,
            substation = ctx.substation.unwrap_or(""),
            event_id = ctx.event.unwrap_or(""),
            run = ctx.run.unwrap_or(""),
            grouping = ctx.grouping.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an informational log enriched with substation/event context.
#[macro_export]
macro_rules! pq_info {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__pq_event!($crate::tracing::Level::INFO, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__pq_event!($crate::tracing::Level::INFO, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a debug log enriched with substation/event context.
#[macro_export]
macro_rules! pq_debug {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__pq_event!($crate::tracing::Level::DEBUG, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__pq_event!($crate::tracing::Level::DEBUG, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a warning enriched with substation/event context.
#[macro_export]
macro_rules! pq_warn {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__pq_event!($crate::tracing::Level::WARN, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__pq_event!($crate::tracing::Level::WARN, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit an error log enriched with substation/event context.
#[macro_export]
macro_rules! pq_error {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__pq_event!($crate::tracing::Level::ERROR, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__pq_event!($crate::tracing::Level::ERROR, $crate::LogContext::default(), $($arg)+)
    };
}
