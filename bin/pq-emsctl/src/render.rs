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
use pq_ems_common::time::format_span_ms;
use pq_ems_events::{
    build_forest, check_grouping_invariants, EventId, ExpansionState, Forest, TreeRow,
};

use crate::{ScopeArgs, Session};

#[derive(Debug, Args)]
pub struct TreeArgs {
    #[command(flatten)]
    pub scope: ScopeArgs,
    /// Show mothers collapsed, children hidden.
    #[arg(long)]
    pub collapsed: bool,
    /// Expand only these mothers (implies --collapsed for the rest).
    #[arg(long = "expand", value_name = "MOTHER_ID")]
    pub expand: Vec<String>,
}

pub async fn tree(session: &Session, args: TreeArgs) -> Result<()> {
    let events = session.service.fetch(&args.scope.filter()).await?;
    let forest = build_forest(&events);
    if session.json {
        println!("{}", serde_json::to_string_pretty(&forest)?);
        return Ok(());
    }

    let expansion = expansion_for(&forest, &args);
    for row in forest.visible_rows(&expansion) {
        println!("{}", format_row(&forest, &row));
    }
    println!("{} roots, {} events", forest.len(), forest.event_count());
    Ok(())
}

pub async fn check(session: &Session, scope: ScopeArgs) -> Result<()> {
    let events = session.service.fetch(&scope.filter()).await?;
    let violations = check_grouping_invariants(&events);
    if session.json {
        let lines: Vec<String> = violations.iter().map(ToString::to_string).collect();
        println!("{}", serde_json::to_string_pretty(&lines)?);
    } else {
        for violation in &violations {
            println!("{violation}");
        }
    }
    if !violations.is_empty() {
        bail!("{} grouping violations in {} events", violations.len(), events.len());
    }
    if !session.json {
        println!("{} events consistent", events.len());
    }
    Ok(())
}

fn expansion_for(forest: &Forest, args: &TreeArgs) -> ExpansionState {
    if args.expand.is_empty() {
        return if args.collapsed {
            ExpansionState::new()
        } else {
            ExpansionState::all_expanded(forest)
        };
    }
    let mut expansion = ExpansionState::new();
    for id in &args.expand {
        expansion.expand(EventId::from(id.as_str()));
    }
    expansion
}

fn format_row(forest: &Forest, row: &TreeRow<'_>) -> String {
    let event = row.event;
    let marker = match (row.depth, row.child_count, row.expanded) {
        (0, 0, _) => "   ",
        (0, _, true) => "[-]",
        (0, _, false) => "[+]",
        _ => "  `-",
    };
    let mut line = format!(
        "{marker} {} {} {} {} {} {:.3} {} ms",
        event.id,
        event.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
        event.substation_id,
        event.event_type,
        event.severity,
        event.magnitude,
        event.duration_ms
    );
    if event.grouping.is_manual() {
        line.push_str(" manual");
    }
    if row.depth == 0 && row.child_count > 0 {
        if let Some(node) = forest.find(&event.id) {
            let summary = node.summary();
            line.push_str(&format!(
                " ({} children, span {}, worst {})",
                summary.child_count,
                format_span_ms(summary.span_ms),
                summary.worst_severity
            ));
        }
    }
    line
}
