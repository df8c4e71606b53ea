//! ---
//! ems_section: "08-energy-models-optimization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Power-quality event grouping and cascade trees."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Opaque, stable identifier of a power-quality event row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for EventId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifier of the substation (site) an event was observed at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubstationId(String);

impl SubstationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubstationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubstationId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventType {
    VoltageDip,
    VoltageSwell,
    Interruption,
    Harmonic,
    Transient,
    Flicker,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// Higher rank means more severe.
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Critical => 3,
            Severity::High => 2,
            Severity::Medium => 1,
            Severity::Low => 0,
        }
    }

    pub fn worst(self, other: Severity) -> Severity {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GroupingType {
    Automatic,
    Manual,
}

/// The persisted grouping columns of an event. Always present; a row that
/// never took part in a grouping carries the default (cleared) value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupingFields {
    pub is_mother_event: bool,
    pub is_child_event: bool,
    pub parent_event_id: Option<EventId>,
    pub grouping_type: Option<GroupingType>,
    pub grouped_at: Option<DateTime<Utc>>,
}

impl GroupingFields {
    pub fn cleared() -> Self {
        Self::default()
    }

    pub fn mother(grouping_type: GroupingType, grouped_at: DateTime<Utc>) -> Self {
        Self {
            is_mother_event: true,
            is_child_event: false,
            parent_event_id: None,
            grouping_type: Some(grouping_type),
            grouped_at: Some(grouped_at),
        }
    }

    pub fn child(parent: EventId, grouping_type: GroupingType, grouped_at: DateTime<Utc>) -> Self {
        Self {
            is_mother_event: false,
            is_child_event: true,
            parent_event_id: Some(parent),
            grouping_type: Some(grouping_type),
            grouped_at: Some(grouped_at),
        }
    }

    /// True when the row is a mother, a child, or points at a parent.
    pub fn is_grouped(&self) -> bool {
        self.is_mother_event || self.is_child_event || self.parent_event_id.is_some()
    }

    pub fn is_manual(&self) -> bool {
        self.grouping_type == Some(GroupingType::Manual)
    }
}

/// One observed power-quality disturbance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub substation_id: SubstationId,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub severity: Severity,
    /// Per-unit depth for dips/swells, THD percent for harmonics, and so on.
    pub magnitude: f64,
    pub duration_ms: u64,
    #[serde(flatten)]
    pub grouping: GroupingFields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meter_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voltage_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
}

impl Event {
    /// Build an ungrouped event with no descriptive extras.
    pub fn new(
        id: impl Into<EventId>,
        substation_id: impl Into<SubstationId>,
        timestamp: DateTime<Utc>,
        event_type: EventType,
        severity: Severity,
    ) -> Self {
        Self {
            id: id.into(),
            substation_id: substation_id.into(),
            timestamp,
            event_type,
            severity,
            magnitude: 0.0,
            duration_ms: 0,
            grouping: GroupingFields::default(),
            meter_id: None,
            voltage_level: None,
            customer_count: None,
            remarks: None,
        }
    }

    pub fn with_measurement(mut self, magnitude: f64, duration_ms: u64) -> Self {
        self.magnitude = magnitude;
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_grouping(mut self, grouping: GroupingFields) -> Self {
        self.grouping = grouping;
        self
    }

    pub fn is_mother(&self) -> bool {
        self.grouping.is_mother_event
    }

    pub fn is_child(&self) -> bool {
        self.grouping.is_child_event
    }

    pub fn parent_id(&self) -> Option<&EventId> {
        self.grouping.parent_event_id.as_ref()
    }
}

/// Chronological order with the id as tie-breaker.
pub fn chronological(a: &Event, b: &Event) -> Ordering {
    a.timestamp
        .cmp(&b.timestamp)
        .then_with(|| a.id.cmp(&b.id))
}

/// A breach of the mother/child invariants found in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupingViolation {
    /// Flagged as mother and child at once.
    MotherAndChild(EventId),
    /// A mother that points at a parent.
    MotherWithParent(EventId),
    /// Child flag set without a parent reference.
    ChildWithoutParent(EventId),
    /// Parent reference present without the child flag.
    ParentWithoutChildFlag(EventId),
    /// The referenced parent is absent or not flagged as a mother.
    ParentNotMother { child: EventId, parent: EventId },
}

impl fmt::Display for GroupingViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupingViolation::MotherAndChild(id) => {
                write!(f, "{id} is flagged as both mother and child")
            }
            GroupingViolation::MotherWithParent(id) => {
                write!(f, "mother {id} references a parent")
            }
            GroupingViolation::ChildWithoutParent(id) => {
                write!(f, "child {id} has no parent reference")
            }
            GroupingViolation::ParentWithoutChildFlag(id) => {
                write!(f, "{id} references a parent but is not flagged as child")
            }
            GroupingViolation::ParentNotMother { child, parent } => {
                write!(f, "child {child} references {parent}, which is not a mother")
            }
        }
    }
}

/// Report every invariant breach in the snapshot; empty when consistent.
pub fn check_grouping_invariants(events: &[Event]) -> Vec<GroupingViolation> {
    let by_id: HashMap<&EventId, &Event> = events.iter().map(|e| (&e.id, e)).collect();
    let mut violations = Vec::new();

    for event in events {
        let fields = &event.grouping;
        if fields.is_mother_event && fields.is_child_event {
            violations.push(GroupingViolation::MotherAndChild(event.id.clone()));
        }
        if fields.is_mother_event && fields.parent_event_id.is_some() {
            violations.push(GroupingViolation::MotherWithParent(event.id.clone()));
        }
        match (&fields.parent_event_id, fields.is_child_event) {
            (None, true) => {
                violations.push(GroupingViolation::ChildWithoutParent(event.id.clone()))
            }
            (Some(_), false) if !fields.is_mother_event => {
                violations.push(GroupingViolation::ParentWithoutChildFlag(event.id.clone()))
            }
            (Some(parent), true) => {
                let parent_is_mother = by_id
                    .get(parent)
                    .map(|candidate| candidate.grouping.is_mother_event)
                    .unwrap_or(false);
                if !parent_is_mother {
                    violations.push(GroupingViolation::ParentNotMother {
                        child: event.id.clone(),
                        parent: parent.clone(),
                    });
                }
            }
            _ => {}
        }
    }
    violations
}
