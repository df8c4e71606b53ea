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
use indexmap::IndexMap;
use parking_lot::RwLock;
use pq_ems_events::{Event, EventId, GroupingFields};

use crate::store::{EventFilter, EventStore};
use crate::{Result, StoreError};

/// Process-local store keeping rows in insertion order.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    rows: RwLock<IndexMap<EventId, Event>>,
}

impl InMemoryEventStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with `events`; later duplicates replace earlier ones.
    pub fn with_events(events: impl IntoIterator<Item = Event>) -> Self {
        let store = Self::new();
        for event in events {
            store.insert(event);
        }
        store
    }

    /// Insert or replace a row.
    pub fn insert(&self, event: Event) {
        self.rows.write().insert(event.id.clone(), event);
    }

    /// Copy of one row.
    pub fn get(&self, id: &EventId) -> Option<Event> {
        self.rows.read().get(id).cloned()
    }

    /// Copy of every row in insertion order.
    pub fn snapshot(&self) -> Vec<Event> {
        self.rows.read().values().cloned().collect()
    }

    /// Number of rows held.
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Whether the store holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn fetch_events(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        Ok(self
            .rows
            .read()
            .values()
            .filter(|event| filter.matches(event))
            .cloned()
            .collect())
    }

    async fn persist_event_fields(&self, id: &EventId, fields: &GroupingFields) -> Result<()> {
        let mut rows = self.rows.write();
        let row = rows
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownEvent(id.clone()))?;
        row.grouping = fields.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pq_ems_events::{EventType, GroupingType, Severity};

    fn event(id: &str, substation: &str) -> Event {
        Event::new(id, substation, Utc::now(), EventType::Harmonic, Severity::Medium)
    }

    #[tokio::test]
    async fn fetch_applies_filter() {
        let store = InMemoryEventStore::with_events([event("a", "SS-1"), event("b", "SS-2")]);
        let fetched = store
            .fetch_events(&EventFilter::for_substation("SS-2"))
            .await
            .unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].id, EventId::from("b"));
    }

    #[tokio::test]
    async fn persist_replaces_grouping_fields() {
        let store = InMemoryEventStore::with_events([event("a", "SS-1")]);
        let fields = GroupingFields::mother(GroupingType::Manual, Utc::now());
        store
            .persist_event_fields(&"a".into(), &fields)
            .await
            .unwrap();
        assert_eq!(store.get(&"a".into()).unwrap().grouping, fields);

        let err = store
            .persist_event_fields(&"zz".into(), &fields)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownEvent(_)));
    }
}
