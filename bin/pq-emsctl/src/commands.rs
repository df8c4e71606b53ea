//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Control CLI for operators grouping power-quality events."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use anyhow::{bail, Result};
use clap::Args;
use pq_ems_common::time::now_millis;
use pq_ems_events::{compute_automatic_groups, EventId, GroupingPlan};
use pq_ems_store::PersistReport;
use serde::Serialize;

use crate::{ScopeArgs, Session};

#[derive(Debug, Args)]
pub struct AutoArgs {
    #[command(flatten)]
    pub scope: ScopeArgs,
    /// Override `grouping.window_ms`.
    #[arg(long = "window-ms", value_name = "MS")]
    pub window_ms: Option<i64>,
    /// Override `grouping.max_children_per_group`.
    #[arg(long = "max-children", value_name = "N")]
    pub max_children: Option<usize>,
    /// Compute and print the plan without writing it.
    #[arg(long = "dry-run")]
    pub dry_run: bool,
}

#[derive(Debug, Args)]
pub struct ManualArgs {
    /// Events to group; the earliest becomes the mother.
    #[arg(value_name = "EVENT_ID", num_args = 2.., required = true)]
    pub event_ids: Vec<String>,
}

#[derive(Debug, Args)]
pub struct UngroupArgs {
    /// Mother event of the group to dissolve.
    #[arg(value_name = "MOTHER_ID")]
    pub mother_id: String,
}

#[derive(Debug, Args)]
pub struct DetachArgs {
    /// Child event to detach.
    #[arg(value_name = "CHILD_ID")]
    pub child_id: String,
}

pub async fn auto(session: &Session, args: AutoArgs) -> Result<()> {
    let filter = args.scope.filter();
    if args.dry_run {
        let events = session.service.fetch(&filter).await?;
        let plan = compute_automatic_groups(&events, session.service.options(), now_millis())?;
        return emit(session, &plan, || print_plan(&plan, None));
    }

    let run = session.service.run_automatic(&filter, now_millis()).await?;
    emit(session, &run, || print_plan(&run.plan, Some(&run.report)))?;
    ensure_persisted(&run.report)
}

pub async fn manual(session: &Session, args: ManualArgs) -> Result<()> {
    let ids: Vec<EventId> = args.event_ids.into_iter().map(EventId::from).collect();
    let run = session
        .service
        .group_manually(&ids, &ScopeArgs::default().filter(), now_millis())
        .await?;
    emit(session, &run, || print_plan(&run.plan, Some(&run.report)))?;
    ensure_persisted(&run.report)
}

pub async fn ungroup(session: &Session, args: UngroupArgs) -> Result<()> {
    let run = session
        .service
        .ungroup(&EventId::from(args.mother_id), &ScopeArgs::default().filter())
        .await?;
    emit(session, &run, || {
        println!(
            "ungrouped {} ({} children cleared)",
            run.ungrouping.mother_id,
            run.ungrouping.child_ids.len()
        );
        print_report(&run.report);
    })?;
    ensure_persisted(&run.report)
}

pub async fn detach(session: &Session, args: DetachArgs) -> Result<()> {
    let run = session
        .service
        .remove_child(&EventId::from(args.child_id), &ScopeArgs::default().filter())
        .await?;
    emit(session, &run, || {
        let d = &run.detachment;
        println!("detached {} from {}", d.child_id, d.mother_id);
        if d.mother_cleared {
            println!("{} had no children left and was cleared", d.mother_id);
        }
        print_report(&run.report);
    })?;
    ensure_persisted(&run.report)
}

fn emit<T: Serialize>(session: &Session, value: &T, text: impl FnOnce()) -> Result<()> {
    if session.json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        text();
    }
    Ok(())
}

fn print_plan(plan: &GroupingPlan, report: Option<&PersistReport>) {
    if plan.is_empty() {
        println!("no groups formed");
    }
    for group in &plan.groups {
        let children: Vec<&str> = group.child_ids.iter().map(EventId::as_str).collect();
        println!(
            "{} [{}] mother {} <- {}",
            group.substation_id,
            group.grouping_type,
            group.mother_id,
            children.join(", ")
        );
    }
    println!(
        "{} groups, {} children, {} updates",
        plan.groups.len(),
        plan.child_count(),
        plan.updates.len()
    );
    match report {
        Some(report) => print_report(report),
        None => println!("dry run: nothing written"),
    }
}

fn print_report(report: &PersistReport) {
    for outcome in report.outcomes.iter().filter(|o| !o.is_ok()) {
        println!(
            "  not persisted: {} ({})",
            outcome.event_id,
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }
}

fn ensure_persisted(report: &PersistReport) -> Result<()> {
    let failed = report.failed_ids();
    if !failed.is_empty() {
        let ids: Vec<&str> = failed.iter().map(EventId::as_str).collect();
        bail!(
            "{} of {} updates were not persisted: {}",
            failed.len(),
            report.outcomes.len(),
            ids.join(", ")
        );
    }
    Ok(())
}
