//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Event store abstractions and storage bindings."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pq_ems_events::{Event, EventId, GroupingFields, SubstationId};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Row selection for [`EventStore::fetch_events`]. Every set criterion must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    /// Restrict to one substation.
    pub substation_id: Option<SubstationId>,
    /// Inclusive lower bound on the event timestamp.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on the event timestamp.
    pub to: Option<DateTime<Utc>>,
    /// Only mother events.
    #[serde(default)]
    pub mothers_only: bool,
    /// Only children of this mother.
    pub children_of: Option<EventId>,
    /// Only events that take part in no grouping.
    #[serde(default)]
    pub ungrouped_only: bool,
}

impl EventFilter {
    /// Filter that matches every event.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to one substation.
    pub fn for_substation(substation: impl Into<SubstationId>) -> Self {
        Self {
            substation_id: Some(substation.into()),
            ..Self::default()
        }
    }

    /// Restrict to `[from, to)`.
    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    /// Whether the event satisfies every criterion of the filter.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(substation) = &self.substation_id {
            if &event.substation_id != substation {
                return false;
            }
        }
        if self.from.is_some_and(|from| event.timestamp < from) {
            return false;
        }
        if self.to.is_some_and(|to| event.timestamp >= to) {
            return false;
        }
        if self.mothers_only && !event.grouping.is_mother_event {
            return false;
        }
        if let Some(mother) = &self.children_of {
            if event.parent_id() != Some(mother) {
                return false;
            }
        }
        if self.ungrouped_only && event.grouping.is_grouped() {
            return false;
        }
        true
    }
}

/// The row-oriented store that owns event records.
///
/// Implementations surface every failure to the caller; retry policy, if any,
/// belongs to the implementation, never to the grouping core.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Read the events selected by `filter`.
    async fn fetch_events(&self, filter: &EventFilter) -> Result<Vec<Event>>;

    /// Replace the grouping columns of one event.
    async fn persist_event_fields(&self, id: &EventId, fields: &GroupingFields) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use pq_ems_events::{EventType, GroupingType, Severity};

    fn event(id: &str, substation: &str, offset_s: i64) -> Event {
        Event::new(
            id,
            substation,
            Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap() + Duration::seconds(offset_s),
            EventType::Transient,
            Severity::Low,
        )
    }

    #[test]
    fn filter_combines_criteria() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let filter = EventFilter::for_substation("SS-1").between(start, start + Duration::seconds(60));

        assert!(filter.matches(&event("a", "SS-1", 0)));
        assert!(!filter.matches(&event("b", "SS-1", 60)));
        assert!(!filter.matches(&event("c", "SS-2", 10)));
    }

    #[test]
    fn filter_on_grouping_flags() {
        let mother = event("m", "SS-1", 0)
            .with_grouping(GroupingFields::mother(GroupingType::Automatic, Utc::now()));
        let child = event("c", "SS-1", 5).with_grouping(GroupingFields::child(
            "m".into(),
            GroupingType::Automatic,
            Utc::now(),
        ));
        let free = event("f", "SS-1", 9);

        let mothers = EventFilter {
            mothers_only: true,
            ..EventFilter::all()
        };
        assert!(mothers.matches(&mother));
        assert!(!mothers.matches(&child));

        let children = EventFilter {
            children_of: Some("m".into()),
            ..EventFilter::all()
        };
        assert!(children.matches(&child));
        assert!(!children.matches(&free));

        let ungrouped = EventFilter {
            ungrouped_only: true,
            ..EventFilter::all()
        };
        assert!(ungrouped.matches(&free));
        assert!(!ungrouped.matches(&mother));
    }
}
