//! ---
//! ems_section: "08-energy-models-optimization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Power-quality event grouping and cascade trees."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::model::{chronological, Event, EventId, EventType, Severity};

/// Display node: one event and, for mothers, its children in chronological order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventTreeNode {
    pub event: Event,
    pub children: Vec<EventTreeNode>,
}

impl EventTreeNode {
    fn leaf(event: &Event) -> Self {
        Self {
            event: event.clone(),
            children: Vec::new(),
        }
    }

    pub fn id(&self) -> &EventId {
        &self.event.id
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Aggregate view of the cascade rooted at this node.
    pub fn summary(&self) -> CascadeSummary {
        let mut worst = self.event.severity;
        let mut types = BTreeSet::from([self.event.event_type]);
        let mut total_duration_ms = self.event.duration_ms;
        let mut last = self.event.timestamp;
        for child in &self.children {
            worst = worst.worst(child.event.severity);
            types.insert(child.event.event_type);
            total_duration_ms = total_duration_ms.saturating_add(child.event.duration_ms);
            last = last.max(child.event.timestamp);
        }
        CascadeSummary {
            root_id: self.event.id.clone(),
            child_count: self.children.len(),
            worst_severity: worst,
            span_ms: (last - self.event.timestamp).num_milliseconds(),
            total_duration_ms,
            event_types: types,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CascadeSummary {
    pub root_id: EventId,
    pub child_count: usize,
    pub worst_severity: Severity,
    /// Milliseconds from the root to its latest child.
    pub span_ms: i64,
    pub total_duration_ms: u64,
    pub event_types: BTreeSet<EventType>,
}

/// Roots ordered most recent first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Forest {
    roots: Vec<EventTreeNode>,
}

impl Forest {
    pub fn roots(&self) -> &[EventTreeNode] {
        &self.roots
    }

    /// Restartable iteration over the roots; each call starts from the top.
    pub fn iter(&self) -> std::slice::Iter<'_, EventTreeNode> {
        self.roots.iter()
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Number of events shown, roots plus children.
    pub fn event_count(&self) -> usize {
        self.roots.iter().map(|r| 1 + r.children.len()).sum()
    }

    pub fn find(&self, id: &EventId) -> Option<&EventTreeNode> {
        self.roots.iter().find(|r| r.id() == id)
    }

    /// Flatten into display rows, showing children only under expanded roots.
    pub fn visible_rows<'a>(&'a self, expansion: &ExpansionState) -> Vec<TreeRow<'a>> {
        let mut rows = Vec::with_capacity(self.roots.len());
        for root in &self.roots {
            let expanded = root.has_children() && expansion.is_expanded(root.id());
            rows.push(TreeRow {
                depth: 0,
                event: &root.event,
                child_count: root.children.len(),
                expanded,
            });
            if expanded {
                rows.extend(root.children.iter().map(|child| TreeRow {
                    depth: 1,
                    event: &child.event,
                    child_count: 0,
                    expanded: false,
                }));
            }
        }
        rows
    }
}

impl<'a> IntoIterator for &'a Forest {
    type Item = &'a EventTreeNode;
    type IntoIter = std::slice::Iter<'a, EventTreeNode>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// One line of the flattened tree view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeRow<'a> {
    pub depth: usize,
    pub event: &'a Event,
    pub child_count: usize,
    pub expanded: bool,
}

/// Which mothers are currently expanded in the view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpansionState {
    expanded: BTreeSet<EventId>,
}

impl ExpansionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expand every root that has children.
    pub fn all_expanded(forest: &Forest) -> Self {
        Self {
            expanded: forest
                .iter()
                .filter(|r| r.has_children())
                .map(|r| r.id().clone())
                .collect(),
        }
    }

    pub fn is_expanded(&self, id: &EventId) -> bool {
        self.expanded.contains(id)
    }

    pub fn expand(&mut self, id: EventId) {
        self.expanded.insert(id);
    }

    pub fn collapse(&mut self, id: &EventId) {
        self.expanded.remove(id);
    }

    /// Flip the state and return whether the node is now expanded.
    pub fn toggle(&mut self, id: &EventId) -> bool {
        if self.expanded.remove(id) {
            false
        } else {
            self.expanded.insert(id.clone());
            true
        }
    }
}

/// Build the display forest from a flat, already grouped list.
///
/// Events without a parent become roots; events whose parent is a root become
/// its children. Children whose parent is not in the input are not shown.
pub fn build_forest(events: &[Event]) -> Forest {
    let mut children_of: HashMap<&EventId, Vec<&Event>> = HashMap::new();
    let mut roots: Vec<&Event> = Vec::new();
    for event in events {
        match event.parent_id() {
            Some(parent) => children_of.entry(parent).or_default().push(event),
            None => roots.push(event),
        }
    }

    roots.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| a.id.cmp(&b.id))
    });

    let roots = roots
        .into_iter()
        .map(|root| {
            let mut children = children_of.remove(&root.id).unwrap_or_default();
            children.sort_by(|a, b| chronological(a, b));
            EventTreeNode {
                event: root.clone(),
                children: children.into_iter().map(EventTreeNode::leaf).collect(),
            }
        })
        .collect();

    Forest { roots }
}
