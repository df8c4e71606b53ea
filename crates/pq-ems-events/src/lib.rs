//! ---
//! ems_section: "08-energy-models-optimization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Power-quality event grouping and cascade trees."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Power-quality event model, mother/child grouping, and the display forest.
//!
//! Nothing in this crate performs I/O: callers hand in a snapshot of events
//! and receive plans describing the grouping columns to write back.

pub mod errors;
pub mod grouping;
pub mod model;
pub mod tree;

pub use errors::{GroupingError, Result};
pub use grouping::{
    apply_updates, compute_automatic_groups, group_manually, remove_child, ungroup, Detachment,
    EventGroup, EventUpdate, GroupingOptions, GroupingPlan, Ungrouping, DEFAULT_WINDOW_MS,
};
pub use model::{
    check_grouping_invariants, chronological, Event, EventId, EventType, GroupingFields,
    GroupingType, GroupingViolation, Severity, SubstationId,
};
pub use tree::{build_forest, CascadeSummary, EventTreeNode, ExpansionState, Forest, TreeRow};
