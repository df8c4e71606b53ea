//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the grouping runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{info, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "PQ_EMS_LOG";

static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();
static STDOUT_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Line layout of one log sink.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Fmt layer for one sink. JSON lines drop the target; files never get ANSI colours.
fn sink_layer<S, W>(format: LogFormat, writer: W, ansi: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let timer = fmt::time::UtcTime::rfc_3339();
    match format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(timer)
            .json()
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_ansi(ansi)
            .with_timer(timer)
            .with_writer(writer)
            .boxed(),
    }
}

/// `PQ_EMS_LOG`, then `RUST_LOG`, then the configured `level`.
fn resolve_filter(config: &LoggingConfig) -> EnvFilter {
    match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(&directive).unwrap_or_else(|err| {
            eprintln!(
                "invalid {LOG_ENV} directive ({err}); using configured level {}",
                config.level
            );
            EnvFilter::new(&config.level)
        }),
        Err(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level)),
    }
}

/// Initialize the tracing subscriber from the `[logging]` section.
///
/// Stdout uses `stdout_format`. When `file_enabled` is set, a daily rolling file
/// `<prefix>-<service>.log` under `directory` uses `file_format`.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let _ = STDOUT_GUARD.set(stdout_guard);

    let file_layer = if config.file_enabled {
        std::fs::create_dir_all(&config.directory)?;
        let prefix = config.file_prefix.as_deref().unwrap_or(service_name);
        let appender = daily(&config.directory, format!("{prefix}-{service_name}.log"));
        let (file_writer, file_guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(file_guard);
        Some(sink_layer(config.file_format, file_writer, false))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(resolve_filter(config))
        .with(sink_layer(config.stdout_format, stdout_writer, true))
        .with(file_layer)
        .try_init()
        .ok();

    info!(
        service = %service_name,
        stdout = ?config.stdout_format,
        file = ?config.file_enabled.then_some(config.file_format),
        log_dir = %config.directory.display(),
        "tracing initialised"
    );
    Ok(())
}
