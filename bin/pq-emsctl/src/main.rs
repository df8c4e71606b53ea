//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Control CLI for operators grouping power-quality events."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use pq_ems_common::{init_tracing, AppConfig, LoadedAppConfig};
use pq_ems_events::GroupingOptions;
use pq_ems_logging as logging;
use pq_ems_store::{EventFilter, GroupingMetrics, GroupingService, JsonFileEventStore};
use tracing::debug;

mod commands;
mod render;

const DEFAULT_CONFIG_CANDIDATES: &[&str] = &["configs/pq-ems.toml", "/etc/pq-ems/pq-ems.toml"];

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "PQ-EMS power-quality event grouping utility",
    long_about = None
)]
struct Cli {
    /// Configuration file; overrides PQ_EMS_CONFIG and the default locations.
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Event snapshot to operate on; overrides `store.snapshot_path`.
    #[arg(long, value_name = "FILE", global = true)]
    snapshot: Option<PathBuf>,

    /// Print results as JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    /// Dump Prometheus metrics to stderr after the command.
    #[arg(long = "print-metrics", global = true)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Group ungrouped events into automatic mother/child cascades.
    Auto(commands::AutoArgs),
    /// Group the listed events by operator decision.
    Manual(commands::ManualArgs),
    /// Dissolve the group headed by a mother event.
    Ungroup(commands::UngroupArgs),
    /// Detach a single child from its mother.
    Detach(commands::DetachArgs),
    /// Print the mother/child cascade tree.
    Tree(render::TreeArgs),
    /// Verify the grouping invariants of the snapshot.
    Check(ScopeArgs),
}

/// Row selection shared by the subcommands.
#[derive(Debug, Clone, Default, Args)]
pub struct ScopeArgs {
    /// Restrict to one substation.
    #[arg(long, value_name = "ID")]
    pub substation: Option<String>,
    /// Inclusive lower bound, RFC 3339.
    #[arg(long, value_name = "TIME")]
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound, RFC 3339.
    #[arg(long, value_name = "TIME")]
    pub to: Option<DateTime<Utc>>,
}

impl ScopeArgs {
    pub fn filter(&self) -> EventFilter {
        EventFilter {
            substation_id: self.substation.as_deref().map(Into::into),
            from: self.from,
            to: self.to,
            ..EventFilter::all()
        }
    }
}

/// Everything a subcommand needs: bound service, metrics, output mode.
pub struct Session {
    pub service: GroupingService<JsonFileEventStore>,
    pub metrics: Option<Arc<GroupingMetrics>>,
    pub json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let loaded = load_config(cli.config.as_deref())?;
    match &loaded {
        Some(loaded) => init_tracing("pq-emsctl", &loaded.config.logging)?,
        None => logging::init(),
    }
    if let Some(loaded) = &loaded {
        debug!(config = %loaded.source.display(), "configuration loaded");
    }

    let config = loaded.map(|l| l.config).unwrap_or_default();
    let overrides = match &cli.command {
        Commands::Auto(args) => (args.window_ms, args.max_children),
        _ => (None, None),
    };
    let session = open_session(config, cli.snapshot.as_deref(), overrides, cli.json)?;

    let result = match cli.command {
        Commands::Auto(args) => commands::auto(&session, args).await,
        Commands::Manual(args) => commands::manual(&session, args).await,
        Commands::Ungroup(args) => commands::ungroup(&session, args).await,
        Commands::Detach(args) => commands::detach(&session, args).await,
        Commands::Tree(args) => render::tree(&session, args).await,
        Commands::Check(scope) => render::check(&session, scope).await,
    };

    if cli.print_metrics {
        if let Some(metrics) = &session.metrics {
            eprint!("{}", metrics.render()?);
        }
    }
    result
}

fn load_config(explicit: Option<&Path>) -> Result<Option<LoadedAppConfig>> {
    if let Some(path) = explicit {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config: AppConfig = contents
            .parse()
            .with_context(|| format!("invalid config file {}", path.display()))?;
        return Ok(Some(LoadedAppConfig {
            config,
            source: path.to_path_buf(),
        }));
    }

    let env_set = std::env::var(AppConfig::ENV_CONFIG_PATH).is_ok_and(|v| !v.trim().is_empty());
    let any_default = DEFAULT_CONFIG_CANDIDATES
        .iter()
        .any(|candidate| Path::new(candidate).exists());
    if env_set || any_default {
        return AppConfig::load_with_source(DEFAULT_CONFIG_CANDIDATES).map(Some);
    }
    Ok(None)
}

fn open_session(
    config: AppConfig,
    snapshot: Option<&Path>,
    (window_ms, max_children): (Option<i64>, Option<usize>),
    json: bool,
) -> Result<Session> {
    let path = snapshot.unwrap_or(&config.store.snapshot_path);
    let store = JsonFileEventStore::open(path)
        .with_context(|| format!("unable to open event snapshot {}", path.display()))?;

    let configured = config.grouping.options();
    let options = GroupingOptions {
        window_ms: window_ms.unwrap_or(configured.window_ms),
        max_children_per_group: max_children.or(configured.max_children_per_group),
    };
    let mut service = GroupingService::new(Arc::new(store), options)
        .context("invalid grouping options")?
        .with_request_timeout(config.store.request_timeout);

    let metrics = if config.metrics.enabled {
        let metrics = Arc::new(GroupingMetrics::new(Arc::new(prometheus::Registry::new()))?);
        service = service.with_metrics(metrics.clone());
        Some(metrics)
    } else {
        None
    };

    Ok(Session {
        service,
        metrics,
        json,
    })
}
