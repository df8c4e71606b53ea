//! ---
//! ems_section: "08-energy-models-optimization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Power-quality event grouping and cascade trees."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Mother/child classification of power-quality events.
//!
//! Every operation here is a pure computation over a caller-supplied snapshot:
//! it returns a plan of per-event field updates and never touches storage.
//! Persisting the plan is the caller's job (see `pq-ems-store`).

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{GroupingError, Result};
use crate::model::{chronological, Event, EventId, GroupingFields, GroupingType, SubstationId};

/// Ten minutes between a mother and its furthest child.
pub const DEFAULT_WINDOW_MS: i64 = 600_000;

/// Tuning for [`compute_automatic_groups`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupingOptions {
    /// Inclusive span, anchored on the mother's timestamp.
    pub window_ms: i64,
    /// Cap on children per mother, counting children it already has. `None` is unbounded.
    pub max_children_per_group: Option<usize>,
}

impl Default for GroupingOptions {
    fn default() -> Self {
        Self {
            window_ms: DEFAULT_WINDOW_MS,
            max_children_per_group: None,
        }
    }
}

impl GroupingOptions {
    pub fn new(window_ms: i64) -> Self {
        Self {
            window_ms,
            max_children_per_group: None,
        }
    }

    pub fn with_max_children(mut self, cap: usize) -> Self {
        self.max_children_per_group = Some(cap);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_ms <= 0 {
            return Err(GroupingError::validation(format!(
                "window must be positive, got {} ms",
                self.window_ms
            )));
        }
        if self.max_children_per_group == Some(0) {
            return Err(GroupingError::validation(
                "max children per group must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Descriptor of one mother and the children attached to it by a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventGroup {
    pub mother_id: EventId,
    pub child_ids: Vec<EventId>,
    pub substation_id: SubstationId,
    pub grouping_type: GroupingType,
}

/// Full replacement of one event's grouping columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventUpdate {
    pub event_id: EventId,
    pub fields: GroupingFields,
}

impl EventUpdate {
    pub fn new(event_id: EventId, fields: GroupingFields) -> Self {
        Self { event_id, fields }
    }
}

/// Groups formed by a grouping operation plus the updates that persist them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupingPlan {
    pub groups: Vec<EventGroup>,
    pub updates: Vec<EventUpdate>,
}

impl GroupingPlan {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.updates.is_empty()
    }

    /// Number of children attached across all groups of the plan.
    pub fn child_count(&self) -> usize {
        self.groups.iter().map(|g| g.child_ids.len()).sum()
    }

    pub fn update_for(&self, event_id: &EventId) -> Option<&EventUpdate> {
        self.updates.iter().find(|u| &u.event_id == event_id)
    }

    fn push_group(
        &mut self,
        mother: &Event,
        children: &[&Event],
        grouping_type: GroupingType,
        now: DateTime<Utc>,
    ) {
        // An existing mother keeps its original grouping stamp.
        if !mother.grouping.is_mother_event {
            self.updates.push(EventUpdate::new(
                mother.id.clone(),
                GroupingFields::mother(grouping_type, now),
            ));
        }
        for child in children {
            self.updates.push(EventUpdate::new(
                child.id.clone(),
                GroupingFields::child(mother.id.clone(), grouping_type, now),
            ));
        }
        self.groups.push(EventGroup {
            mother_id: mother.id.clone(),
            child_ids: children.iter().map(|c| c.id.clone()).collect(),
            substation_id: mother.substation_id.clone(),
            grouping_type,
        });
    }

    /// Re-flag a parent whose mother write never landed, typed after its children.
    fn restore_mother(&mut self, mother: &Event, children: &[&Event], now: DateTime<Utc>) {
        let grouping_type = children
            .iter()
            .find_map(|c| c.grouping.grouping_type)
            .unwrap_or(GroupingType::Automatic);
        self.updates.push(EventUpdate::new(
            mother.id.clone(),
            GroupingFields::mother(grouping_type, now),
        ));
    }
}

/// Result of dissolving a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ungrouping {
    pub mother_id: EventId,
    pub child_ids: Vec<EventId>,
    pub updates: Vec<EventUpdate>,
}

/// Result of detaching a single child from its mother.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detachment {
    pub child_id: EventId,
    pub mother_id: EventId,
    /// Set when the mother lost its last child and was cleared as well.
    pub mother_cleared: bool,
    pub updates: Vec<EventUpdate>,
}

fn ensure_unique_ids(events: &[Event]) -> Result<()> {
    let mut seen = HashSet::with_capacity(events.len());
    for event in events {
        if !seen.insert(&event.id) {
            return Err(GroupingError::validation(format!(
                "duplicate event id {} in input",
                event.id
            )));
        }
    }
    Ok(())
}

/// Automatic grouping may use the event as a mother or a child.
fn is_automatic_candidate(event: &Event) -> bool {
    let fields = &event.grouping;
    fields.parent_event_id.is_none() && !fields.is_child_event && !fields.is_manual()
}

/// Cluster events per substation into mother/child cascades.
///
/// Within a substation, events are scanned in chronological order (ties by id).
/// The event under the cursor claims every following event whose timestamp is
/// at most `window_ms` after its own, stopping at the first one outside the
/// window. A cursor event that claims nothing stays ungrouped. Claimed events
/// are skipped, so no event is claimed twice.
///
/// Rows already parented, flagged as children, or manually grouped are not
/// candidates. An event that is flagged as a mother, or that other events point
/// to as their parent, may claim new children but is never claimed itself;
/// meeting one ends the current window. A parent whose mother flag is missing
/// gets it back, even when it claims nothing new.
pub fn compute_automatic_groups(
    events: &[Event],
    options: &GroupingOptions,
    now: DateTime<Utc>,
) -> Result<GroupingPlan> {
    options.validate()?;
    ensure_unique_ids(events)?;

    let mut existing_children: HashMap<&EventId, Vec<&Event>> = HashMap::new();
    for event in events {
        if let Some(parent) = event.parent_id() {
            existing_children.entry(parent).or_default().push(event);
        }
    }

    let mut partitions: BTreeMap<&SubstationId, Vec<&Event>> = BTreeMap::new();
    for event in events.iter().filter(|e| is_automatic_candidate(e)) {
        partitions.entry(&event.substation_id).or_default().push(event);
    }

    let mut plan = GroupingPlan::default();
    for (substation, mut members) in partitions {
        members.sort_by(|a, b| chronological(a, b));

        let mut cursor = 0;
        while cursor < members.len() {
            let mother = members[cursor];
            let current = existing_children
                .get(&mother.id)
                .map_or(&[][..], Vec::as_slice);
            let capacity = options
                .max_children_per_group
                .map(|cap| cap.saturating_sub(current.len()));

            let mut next = cursor + 1;
            while next < members.len() {
                let candidate = members[next];
                let claimed = next - cursor - 1;
                if capacity.is_some_and(|cap| claimed >= cap)
                    || candidate.grouping.is_mother_event
                    || existing_children.contains_key(&candidate.id)
                    || (candidate.timestamp - mother.timestamp).num_milliseconds()
                        > options.window_ms
                {
                    break;
                }
                next += 1;
            }

            let children = &members[cursor + 1..next];
            if children.is_empty() {
                if !mother.grouping.is_mother_event && !current.is_empty() {
                    debug!(
                        substation = %substation,
                        mother = %mother.id,
                        children = current.len(),
                        "restoring missing mother flag"
                    );
                    plan.restore_mother(mother, current, now);
                }
                cursor += 1;
                continue;
            }

            debug!(
                substation = %substation,
                mother = %mother.id,
                children = children.len(),
                "automatic cascade formed"
            );
            plan.push_group(mother, children, GroupingType::Automatic, now);
            cursor = next;
        }
    }

    Ok(plan)
}

/// Dissolve the group headed by `mother_id`, clearing the mother and every
/// event whose parent is that mother.
pub fn ungroup(mother_id: &EventId, events: &[Event]) -> Result<Ungrouping> {
    ensure_unique_ids(events)?;
    let mother = events
        .iter()
        .find(|e| &e.id == mother_id && e.grouping.is_mother_event)
        .ok_or_else(|| GroupingError::not_found(format!("no mother event with id {mother_id}")))?;

    let mut children: Vec<&Event> = events
        .iter()
        .filter(|e| e.parent_id() == Some(mother_id))
        .collect();
    children.sort_by(|a, b| chronological(a, b));

    let mut updates = Vec::with_capacity(children.len() + 1);
    updates.push(EventUpdate::new(mother.id.clone(), GroupingFields::cleared()));
    updates.extend(
        children
            .iter()
            .map(|child| EventUpdate::new(child.id.clone(), GroupingFields::cleared())),
    );

    Ok(Ungrouping {
        mother_id: mother.id.clone(),
        child_ids: children.iter().map(|c| c.id.clone()).collect(),
        updates,
    })
}

/// Group the given events by operator decision.
///
/// The earliest event (ties by id) becomes the mother; every event in the
/// group, mother included, is marked `manual`. Substation and window
/// constraints do not apply.
pub fn group_manually(
    event_ids: &[EventId],
    events: &[Event],
    now: DateTime<Utc>,
) -> Result<GroupingPlan> {
    ensure_unique_ids(events)?;
    if event_ids.len() < 2 {
        return Err(GroupingError::validation(
            "manual grouping needs at least two events",
        ));
    }

    let by_id: HashMap<&EventId, &Event> = events.iter().map(|e| (&e.id, e)).collect();
    let mut selected: Vec<&Event> = Vec::with_capacity(event_ids.len());
    let mut seen = HashSet::with_capacity(event_ids.len());
    for id in event_ids {
        if !seen.insert(id) {
            return Err(GroupingError::validation(format!(
                "event {id} listed more than once"
            )));
        }
        let event = by_id
            .get(id)
            .copied()
            .ok_or_else(|| GroupingError::not_found(format!("event {id} is not in the snapshot")))?;
        if event.grouping.is_grouped() {
            return Err(GroupingError::validation(format!(
                "event {id} is already grouped; ungroup it first"
            )));
        }
        selected.push(event);
    }

    selected.sort_by(|a, b| chronological(a, b));
    let (mother, children) = selected
        .split_first()
        .ok_or_else(|| GroupingError::validation("manual grouping needs at least two events"))?;

    let mut plan = GroupingPlan::default();
    plan.push_group(mother, children, GroupingType::Manual, now);
    Ok(plan)
}

/// Detach one child from its mother. When the mother is left without
/// children it is cleared too, so no childless mother remains.
pub fn remove_child(child_id: &EventId, events: &[Event]) -> Result<Detachment> {
    ensure_unique_ids(events)?;
    let child = events
        .iter()
        .find(|e| &e.id == child_id && e.grouping.is_child_event)
        .ok_or_else(|| GroupingError::not_found(format!("no child event with id {child_id}")))?;
    let mother_id = child
        .parent_id()
        .cloned()
        .ok_or_else(|| GroupingError::validation(format!("child {child_id} has no parent")))?;

    let siblings = events
        .iter()
        .filter(|e| e.parent_id() == Some(&mother_id) && &e.id != child_id)
        .count();

    let mut updates = vec![EventUpdate::new(child.id.clone(), GroupingFields::cleared())];
    let mother_cleared = siblings == 0
        && events
            .iter()
            .any(|e| e.id == mother_id && e.grouping.is_mother_event);
    if mother_cleared {
        updates.push(EventUpdate::new(mother_id.clone(), GroupingFields::cleared()));
    }

    Ok(Detachment {
        child_id: child.id.clone(),
        mother_id,
        mother_cleared,
        updates,
    })
}

/// Apply updates to an in-memory snapshot. Returns the ids that were not found.
pub fn apply_updates(events: &mut [Event], updates: &[EventUpdate]) -> Vec<EventId> {
    let index: HashMap<EventId, usize> = events
        .iter()
        .enumerate()
        .map(|(idx, e)| (e.id.clone(), idx))
        .collect();
    let mut missing = Vec::new();
    for update in updates {
        match index.get(&update.event_id) {
            Some(&idx) => events[idx].grouping = update.fields.clone(),
            None => missing.push(update.event_id.clone()),
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EventType, Severity};
    use chrono::{Duration, TimeZone};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    fn event(id: &str, substation: &str, offset_ms: i64) -> Event {
        Event::new(
            id,
            substation,
            base() + Duration::milliseconds(offset_ms),
            EventType::VoltageDip,
            Severity::Medium,
        )
    }

    #[test]
    fn window_is_inclusive_and_anchored_on_mother() {
        let events = vec![
            event("a", "S", 0),
            event("b", "S", 400_000),
            event("c", "S", 600_000),
            // inside b's window but not a's; the window does not slide
            event("d", "S", 600_001),
        ];
        let plan = compute_automatic_groups(&events, &GroupingOptions::default(), base()).unwrap();
        assert_eq!(plan.groups.len(), 1);
        assert_eq!(plan.groups[0].mother_id, EventId::from("a"));
        assert_eq!(
            plan.groups[0].child_ids,
            vec![EventId::from("b"), EventId::from("c")]
        );
        assert!(plan.update_for(&"d".into()).is_none());
    }

    #[test]
    fn ties_break_by_id() {
        let events = vec![event("z", "S", 0), event("m", "S", 0), event("q", "S", 0)];
        let plan = compute_automatic_groups(&events, &GroupingOptions::default(), base()).unwrap();
        assert_eq!(plan.groups[0].mother_id, EventId::from("m"));
        assert_eq!(
            plan.groups[0].child_ids,
            vec![EventId::from("q"), EventId::from("z")]
        );
    }

    #[test]
    fn substations_never_mix() {
        let events = vec![event("a", "S1", 0), event("b", "S2", 1_000)];
        let plan = compute_automatic_groups(&events, &GroupingOptions::default(), base()).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn child_cap_leaves_remainder_for_next_mother() {
        let events = vec![
            event("a", "S", 0),
            event("b", "S", 1_000),
            event("c", "S", 2_000),
            event("d", "S", 3_000),
        ];
        let options = GroupingOptions::default().with_max_children(1);
        let plan = compute_automatic_groups(&events, &options, base()).unwrap();
        assert_eq!(plan.groups.len(), 2);
        assert_eq!(plan.groups[0].child_ids, vec![EventId::from("b")]);
        assert_eq!(plan.groups[1].mother_id, EventId::from("c"));
        assert_eq!(plan.groups[1].child_ids, vec![EventId::from("d")]);
    }

    #[test]
    fn rejects_bad_input() {
        let events = vec![event("a", "S", 0), event("a", "S", 10)];
        assert!(matches!(
            compute_automatic_groups(&events, &GroupingOptions::default(), base()),
            Err(GroupingError::Validation(_))
        ));
        assert!(matches!(
            compute_automatic_groups(&[], &GroupingOptions::new(0), base()),
            Err(GroupingError::Validation(_))
        ));
        assert!(matches!(
            compute_automatic_groups(&[], &GroupingOptions::new(-5), base()),
            Err(GroupingError::Validation(_))
        ));
        assert!(compute_automatic_groups(&[], &GroupingOptions::default(), base())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn existing_mother_absorbs_new_events_without_restamping() {
        let stamp = base() - Duration::hours(1);
        let mut events = vec![
            event("a", "S", 0),
            event("b", "S", 1_000),
            event("c", "S", 2_000),
        ];
        events[0].grouping = GroupingFields::mother(GroupingType::Automatic, stamp);
        events[1].grouping = GroupingFields::child("a".into(), GroupingType::Automatic, stamp);

        let plan = compute_automatic_groups(&events, &GroupingOptions::default(), base()).unwrap();
        assert_eq!(plan.groups.len(), 1);
        assert_eq!(plan.groups[0].child_ids, vec![EventId::from("c")]);
        assert!(plan.update_for(&"a".into()).is_none());
        assert_eq!(
            plan.update_for(&"c".into()).unwrap().fields.parent_event_id,
            Some(EventId::from("a"))
        );
    }

    #[test]
    fn existing_mother_is_never_claimed_as_child() {
        let stamp = base() - Duration::hours(1);
        let mut events = vec![event("a", "S", 0), event("b", "S", 1_000)];
        events[1].grouping = GroupingFields::mother(GroupingType::Automatic, stamp);

        let plan = compute_automatic_groups(&events, &GroupingOptions::default(), base()).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn parent_with_lost_mother_flag_is_restored_not_claimed() {
        let stamp = base() - Duration::hours(1);
        let mut events = vec![
            event("x", "S", 0),
            event("m", "S", 100_000),
            event("c", "S", 200_000),
        ];
        events[2].grouping = GroupingFields::child("m".into(), GroupingType::Automatic, stamp);

        let plan = compute_automatic_groups(&events, &GroupingOptions::default(), base()).unwrap();
        assert!(plan.groups.is_empty());
        assert_eq!(plan.updates.len(), 1);
        assert_eq!(
            plan.update_for(&"m".into()).unwrap().fields,
            GroupingFields::mother(GroupingType::Automatic, base())
        );

        assert!(apply_updates(&mut events, &plan.updates).is_empty());
        assert!(crate::model::check_grouping_invariants(&events).is_empty());
        let forest = crate::tree::build_forest(&events);
        assert_eq!(forest.event_count(), 3);
        let m = forest.find(&"m".into()).unwrap();
        assert_eq!(m.children.len(), 1);
        assert_eq!(m.children[0].id().as_str(), "c");
    }

    #[test]
    fn unflagged_parent_claims_followers_instead_of_being_claimed() {
        let stamp = base() - Duration::hours(1);
        let mut events = vec![
            event("x", "S", 0),
            event("m", "S", 100_000),
            event("y", "S", 150_000),
            event("c", "S", 200_000),
        ];
        events[3].grouping = GroupingFields::child("m".into(), GroupingType::Automatic, stamp);

        let plan = compute_automatic_groups(&events, &GroupingOptions::default(), base()).unwrap();
        assert_eq!(plan.groups.len(), 1);
        assert_eq!(plan.groups[0].mother_id, EventId::from("m"));
        assert_eq!(plan.groups[0].child_ids, vec![EventId::from("y")]);
        assert!(plan.update_for(&"x".into()).is_none());
        assert!(plan.update_for(&"m".into()).unwrap().fields.is_mother_event);

        apply_updates(&mut events, &plan.updates);
        assert!(crate::model::check_grouping_invariants(&events).is_empty());
        assert!(events.iter().all(|e| !(e.is_mother() && e.is_child())));
    }

    #[test]
    fn existing_children_count_towards_cap() {
        let stamp = base() - Duration::hours(1);
        let mut events = vec![
            event("a", "S", 0),
            event("b", "S", 1_000),
            event("c", "S", 2_000),
        ];
        events[0].grouping = GroupingFields::mother(GroupingType::Automatic, stamp);
        events[1].grouping = GroupingFields::child("a".into(), GroupingType::Automatic, stamp);

        let options = GroupingOptions::default().with_max_children(1);
        let plan = compute_automatic_groups(&events, &options, base()).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn manual_grouping_validates_input() {
        let mut events = vec![event("a", "S1", 0), event("b", "S2", 10), event("c", "S1", 20)];
        assert!(matches!(
            group_manually(&["a".into()], &events, base()),
            Err(GroupingError::Validation(_))
        ));
        assert!(matches!(
            group_manually(&["a".into(), "a".into()], &events, base()),
            Err(GroupingError::Validation(_))
        ));
        assert!(matches!(
            group_manually(&["a".into(), "x".into()], &events, base()),
            Err(GroupingError::NotFound(_))
        ));

        events[2].grouping = GroupingFields::mother(GroupingType::Automatic, base());
        assert!(matches!(
            group_manually(&["a".into(), "c".into()], &events, base()),
            Err(GroupingError::Validation(_))
        ));

        // cross-substation is allowed for manual groups
        let plan = group_manually(&["b".into(), "a".into()], &events, base()).unwrap();
        assert_eq!(plan.groups[0].mother_id, EventId::from("a"));
        assert_eq!(plan.groups[0].grouping_type, GroupingType::Manual);
    }

    #[test]
    fn ungroup_requires_a_mother() {
        let events = vec![event("a", "S", 0)];
        assert!(matches!(
            ungroup(&"a".into(), &events),
            Err(GroupingError::NotFound(_))
        ));
        assert!(matches!(
            ungroup(&"missing".into(), &events),
            Err(GroupingError::NotFound(_))
        ));
    }

    #[test]
    fn remove_last_child_clears_mother() {
        let mut events = vec![event("a", "S", 0), event("b", "S", 1_000), event("c", "S", 2_000)];
        let plan = compute_automatic_groups(&events, &GroupingOptions::default(), base()).unwrap();
        apply_updates(&mut events, &plan.updates);

        let first = remove_child(&"b".into(), &events).unwrap();
        assert!(!first.mother_cleared);
        apply_updates(&mut events, &first.updates);

        let second = remove_child(&"c".into(), &events).unwrap();
        assert!(second.mother_cleared);
        apply_updates(&mut events, &second.updates);
        assert!(events.iter().all(|e| !e.grouping.is_grouped()));

        assert!(matches!(
            remove_child(&"a".into(), &events),
            Err(GroupingError::NotFound(_))
        ));
    }

    #[test]
    fn apply_updates_reports_missing_ids() {
        let mut events = vec![event("a", "S", 0)];
        let updates = vec![
            EventUpdate::new("a".into(), GroupingFields::mother(GroupingType::Manual, base())),
            EventUpdate::new("zz".into(), GroupingFields::cleared()),
        ];
        let missing = apply_updates(&mut events, &updates);
        assert_eq!(missing, vec![EventId::from("zz")]);
        assert!(events[0].is_mother());
    }
}
