//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the grouping runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Shared primitives for the PQ-EMS workspace.
//! This crate exposes configuration loading, tracing setup, and the time
//! helpers used by the grouping core and its tooling.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    AppConfig, GroupingConfig, LoadedAppConfig, LoggingConfig, MetricsConfig, StoreConfig,
};
pub use logging::{init_tracing, LogFormat};
