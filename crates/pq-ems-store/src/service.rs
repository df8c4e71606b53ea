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
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use pq_ems_events::{
    compute_automatic_groups, group_manually, remove_child, ungroup, Detachment, Event, EventId,
    EventUpdate, GroupingOptions, GroupingPlan, Ungrouping,
};
use pq_ems_logging::{log_grouping_event, pq_debug, pq_info, GroupingOutcome, LogContext};
use serde::Serialize;

use crate::metrics::GroupingMetrics;
use crate::persist::{persist_updates, PersistReport};
use crate::store::{EventFilter, EventStore};
use crate::{ServiceError, StoreError};

/// Plan computed by a grouping operation and what became of its writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupingRun {
    /// Correlation id attached to every log line of the run.
    pub run_id: String,
    /// Groups and updates computed from the fetched snapshot.
    pub plan: GroupingPlan,
    /// Per-event persistence outcome, in plan order.
    pub report: PersistReport,
}

/// Dissolved group and what became of its writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UngroupRun {
    /// Correlation id attached to every log line of the run.
    pub run_id: String,
    /// Mother and children that were cleared.
    pub ungrouping: Ungrouping,
    /// Per-event persistence outcome.
    pub report: PersistReport,
}

/// Detached child and what became of its writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetachRun {
    /// Correlation id attached to every log line of the run.
    pub run_id: String,
    /// Child removed and whether its mother was cleared too.
    pub detachment: Detachment,
    /// Per-event persistence outcome.
    pub report: PersistReport,
}

/// Fetch, compute, persist: the grouping core bound to an injected store.
pub struct GroupingService<S> {
    store: Arc<S>,
    options: GroupingOptions,
    metrics: Option<Arc<GroupingMetrics>>,
    request_timeout: Option<Duration>,
}

impl<S: EventStore> GroupingService<S> {
    /// Bind a store with validated grouping options.
    pub fn new(store: Arc<S>, options: GroupingOptions) -> Result<Self, ServiceError> {
        options.validate()?;
        Ok(Self {
            store,
            options,
            metrics: None,
            request_timeout: None,
        })
    }

    /// Record Prometheus metrics for every run.
    pub fn with_metrics(mut self, metrics: Arc<GroupingMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Bound every individual store call.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// The injected store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Options applied to automatic runs.
    pub fn options(&self) -> &GroupingOptions {
        &self.options
    }

    /// Read the snapshot selected by `filter`, honouring the request timeout.
    pub async fn fetch(&self, filter: &EventFilter) -> Result<Vec<Event>, ServiceError> {
        let fetch = self.store.fetch_events(filter);
        let events = match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, fetch)
                .await
                .map_err(|_| StoreError::Timeout(limit))??,
            None => fetch.await?,
        };
        Ok(events)
    }

    /// Group the ungrouped events selected by `filter` into automatic cascades.
    pub async fn run_automatic(
        &self,
        filter: &EventFilter,
        now: DateTime<Utc>,
    ) -> Result<GroupingRun, ServiceError> {
        let started = Instant::now();
        let run_id = run_id("automatic", now);
        let ctx = LogContext::new().with_run(&run_id).with_grouping("automatic");

        let events = self.fetch(filter).await?;
        let plan = match compute_automatic_groups(&events, &self.options, now) {
            Ok(plan) => plan,
            Err(err) => {
                log_grouping_event(
                    Some(&ctx),
                    "grouping.automatic",
                    &err.to_string(),
                    GroupingOutcome::Failed,
                );
                return Err(err.into());
            }
        };
        pq_info!(
            context = ctx,
            "{} events fetched, {} groups computed",
            events.len(),
            plan.groups.len()
        );

        let report = self.persist("automatic", &plan.updates).await;
        self.finish_plan("automatic", &ctx, &plan, &report, started);
        Ok(GroupingRun {
            run_id,
            plan,
            report,
        })
    }

    /// Group the listed events by operator decision.
    pub async fn group_manually(
        &self,
        event_ids: &[EventId],
        filter: &EventFilter,
        now: DateTime<Utc>,
    ) -> Result<GroupingRun, ServiceError> {
        let started = Instant::now();
        let run_id = run_id("manual", now);
        let ctx = LogContext::new().with_run(&run_id).with_grouping("manual");

        let events = self.fetch(filter).await?;
        let plan = match group_manually(event_ids, &events, now) {
            Ok(plan) => plan,
            Err(err) => {
                log_grouping_event(
                    Some(&ctx),
                    "grouping.manual",
                    &err.to_string(),
                    GroupingOutcome::Failed,
                );
                return Err(err.into());
            }
        };

        let report = self.persist("manual", &plan.updates).await;
        self.finish_plan("manual", &ctx, &plan, &report, started);
        Ok(GroupingRun {
            run_id,
            plan,
            report,
        })
    }

    /// Dissolve the group headed by `mother_id`.
    pub async fn ungroup(
        &self,
        mother_id: &EventId,
        filter: &EventFilter,
    ) -> Result<UngroupRun, ServiceError> {
        let started = Instant::now();
        let run_id = run_id("ungroup", Utc::now());
        let ctx = LogContext::new()
            .with_run(&run_id)
            .with_grouping("ungroup")
            .with_event(mother_id.as_str());

        let events = self.fetch(filter).await?;
        let ungrouping = match ungroup(mother_id, &events) {
            Ok(ungrouping) => ungrouping,
            Err(err) => {
                log_grouping_event(
                    Some(&ctx),
                    "grouping.ungroup",
                    &err.to_string(),
                    GroupingOutcome::Failed,
                );
                return Err(err.into());
            }
        };

        let report = self.persist("ungroup", &ungrouping.updates).await;
        let message = format!(
            "mother cleared with {} children, {} writes failed",
            ungrouping.child_ids.len(),
            report.failed()
        );
        log_grouping_event(Some(&ctx), "grouping.ungroup", &message, outcome_of(&report));
        self.observe("ungroup", started);
        Ok(UngroupRun {
            run_id,
            ungrouping,
            report,
        })
    }

    /// Detach one child from its mother.
    pub async fn remove_child(
        &self,
        child_id: &EventId,
        filter: &EventFilter,
    ) -> Result<DetachRun, ServiceError> {
        let started = Instant::now();
        let run_id = run_id("detach", Utc::now());
        let ctx = LogContext::new()
            .with_run(&run_id)
            .with_grouping("detach")
            .with_event(child_id.as_str());

        let events = self.fetch(filter).await?;
        let detachment = match remove_child(child_id, &events) {
            Ok(detachment) => detachment,
            Err(err) => {
                log_grouping_event(
                    Some(&ctx),
                    "grouping.detach",
                    &err.to_string(),
                    GroupingOutcome::Failed,
                );
                return Err(err.into());
            }
        };

        let report = self.persist("detach", &detachment.updates).await;
        let message = format!(
            "child detached from {}, mother cleared: {}",
            detachment.mother_id, detachment.mother_cleared
        );
        log_grouping_event(Some(&ctx), "grouping.detach", &message, outcome_of(&report));
        self.observe("detach", started);
        Ok(DetachRun {
            run_id,
            detachment,
            report,
        })
    }

    async fn persist(&self, operation: &str, updates: &[EventUpdate]) -> PersistReport {
        let report = persist_updates(self.store.as_ref(), updates, self.request_timeout).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_persist_failures(operation, report.failed());
        }
        report
    }

    fn finish_plan(
        &self,
        operation: &str,
        ctx: &LogContext<'_>,
        plan: &GroupingPlan,
        report: &PersistReport,
        started: Instant,
    ) {
        let failed = report.failed_ids();
        for group in &plan.groups {
            let group_ctx = ctx
                .with_substation(group.substation_id.as_str())
                .with_event(group.mother_id.as_str());
            let intact = !failed.contains(&group.mother_id)
                && group.child_ids.iter().all(|id| !failed.contains(id));
            pq_debug!(
                context = group_ctx,
                "{} children attached, persisted: {}",
                group.child_ids.len(),
                intact
            );
            if intact {
                if let Some(metrics) = &self.metrics {
                    metrics.record_group(
                        group.substation_id.as_str(),
                        group.grouping_type.as_ref(),
                        group.child_ids.len(),
                    );
                }
            }
        }

        let message = format!(
            "{} groups, {} updates, {} writes failed",
            plan.groups.len(),
            plan.updates.len(),
            failed.len()
        );
        log_grouping_event(
            Some(ctx),
            &format!("grouping.{operation}"),
            &message,
            outcome_of(report),
        );
        self.observe(operation, started);
    }

    fn observe(&self, operation: &str, started: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.observe_duration(operation, started.elapsed().as_secs_f64());
        }
    }
}

impl<S> std::fmt::Debug for GroupingService<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupingService")
            .field("options", &self.options)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

fn run_id(operation: &str, now: DateTime<Utc>) -> String {
    format!("{operation}-{}", now.timestamp_millis())
}

fn outcome_of(report: &PersistReport) -> GroupingOutcome {
    if report.is_complete() {
        GroupingOutcome::Applied
    } else if report.succeeded() > 0 {
        GroupingOutcome::Partial
    } else {
        GroupingOutcome::Failed
    }
}
