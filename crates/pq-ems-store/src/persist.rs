//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Event store abstractions and storage bindings."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use pq_ems_events::{EventId, EventUpdate};
use serde::Serialize;
use tracing::warn;

use crate::store::EventStore;
use crate::StoreError;

/// Result of writing one update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistOutcome {
    /// Event the update targeted.
    pub event_id: EventId,
    /// Store error text when the write failed.
    pub error: Option<String>,
}

impl PersistOutcome {
    /// Whether the write reached the store.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-event record of a batch write, in update order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PersistReport {
    /// One entry per attempted update.
    pub outcomes: Vec<PersistOutcome>,
}

impl PersistReport {
    /// Ids whose write failed.
    pub fn failed_ids(&self) -> Vec<EventId> {
        self.outcomes
            .iter()
            .filter(|o| !o.is_ok())
            .map(|o| o.event_id.clone())
            .collect()
    }

    /// Number of writes that succeeded.
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    /// Number of writes that failed.
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// Whether every update reached the store.
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(PersistOutcome::is_ok)
    }

    /// The updates that did not reach the store, for a retry by the caller.
    pub fn failed_updates(&self, updates: &[EventUpdate]) -> Vec<EventUpdate> {
        let failed = self.failed_ids();
        updates
            .iter()
            .filter(|u| failed.contains(&u.event_id))
            .cloned()
            .collect()
    }
}

/// Write every update, continuing past failures.
///
/// Updates are applied in order; storage may diverge from the plan when some
/// writes fail, which the returned report makes visible per event.
pub async fn persist_updates<S>(
    store: &S,
    updates: &[EventUpdate],
    timeout: Option<Duration>,
) -> PersistReport
where
    S: EventStore + ?Sized,
{
    let mut report = PersistReport {
        outcomes: Vec::with_capacity(updates.len()),
    };
    for update in updates {
        let write = store.persist_event_fields(&update.event_id, &update.fields);
        let result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, write).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout(limit)),
            },
            None => write.await,
        };
        let error = match result {
            Ok(()) => None,
            Err(err) => {
                warn!(event_id = %update.event_id, error = %err, "grouping update not persisted");
                Some(err.to_string())
            }
        };
        report.outcomes.push(PersistOutcome {
            event_id: update.event_id.clone(),
            error,
        });
    }
    report
}
