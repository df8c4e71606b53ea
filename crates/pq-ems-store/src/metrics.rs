//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Event store abstractions and storage bindings."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use prometheus::{self, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

/// Metrics published by grouping runs.
#[derive(Clone)]
pub struct GroupingMetrics {
    groups_created: IntCounterVec,
    events_grouped: IntCounterVec,
    persist_failures: IntCounterVec,
    duration: HistogramVec,
    registry: Arc<Registry>,
}

impl GroupingMetrics {
    /// Register all grouping metrics with the provided registry.
    pub fn new(registry: Arc<Registry>) -> Result<Self, prometheus::Error> {
        let groups_created = IntCounterVec::new(
            Opts::new(
                "pq_ems_groups_created_total",
                "Total number of mother/child groups written by grouping runs",
            ),
            &["substation", "grouping"],
        )?;
        registry.register(Box::new(groups_created.clone()))?;

        let events_grouped = IntCounterVec::new(
            Opts::new(
                "pq_ems_events_grouped_total",
                "Total number of events attached to a mother as children",
            ),
            &["substation", "grouping"],
        )?;
        registry.register(Box::new(events_grouped.clone()))?;

        let persist_failures = IntCounterVec::new(
            Opts::new(
                "pq_ems_persist_failures_total",
                "Total number of per-event grouping updates the store rejected",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(persist_failures.clone()))?;

        let histogram_opts = HistogramOpts::new(
            "pq_ems_grouping_duration_seconds",
            "Wall time of a grouping operation including fetch and persist",
        )
        .buckets(prometheus::exponential_buckets(0.001, 2.0, 12)?);
        let duration = HistogramVec::new(histogram_opts, &["operation"])?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self {
            groups_created,
            events_grouped,
            persist_failures,
            duration,
            registry,
        })
    }

    /// Register against a fresh private registry.
    pub fn unregistered() -> Result<Self, prometheus::Error> {
        Self::new(Arc::new(Registry::new()))
    }

    /// Record one group written for a substation.
    pub fn record_group(&self, substation: &str, grouping: &str, children: usize) {
        self.groups_created
            .with_label_values(&[substation, grouping])
            .inc();
        self.events_grouped
            .with_label_values(&[substation, grouping])
            .inc_by(children as u64);
    }

    /// Add to the count of rejected updates for an operation.
    pub fn record_persist_failures(&self, operation: &str, failures: usize) {
        if failures > 0 {
            self.persist_failures
                .with_label_values(&[operation])
                .inc_by(failures as u64);
        }
    }

    /// Observe the wall time of one operation.
    pub fn observe_duration(&self, operation: &str, seconds: f64) {
        self.duration.with_label_values(&[operation]).observe(seconds);
    }

    /// Registry the metrics were registered with.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Render every registered family in the Prometheus text format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let mut buf = Vec::new();
        prometheus::TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|err| prometheus::Error::Msg(err.to_string()))
    }
}

impl std::fmt::Debug for GroupingMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupingMetrics").finish_non_exhaustive()
    }
}
