//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Event store abstractions and storage bindings."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Bindings between the pure grouping core and the row store that holds events.
//!
//! The store is always injected: [`GroupingService`] is generic over
//! [`EventStore`] and never reaches for a shared client.

use pq_ems_events::{EventId, GroupingError};

/// Result alias used by store implementations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Failures raised by an [`EventStore`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Wrapper for IO errors encountered while reading/writing store files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// The snapshot on disk does not match its recorded digest.
    #[error("snapshot hash mismatch")]
    HashMismatch,
    /// The store has no row with this id.
    #[error("unknown event {0}")]
    UnknownEvent(EventId),
    /// The call did not complete within the configured timeout.
    #[error("store call timed out after {0:?}")]
    Timeout(std::time::Duration),
    /// Any other backend failure, carried as text.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Errors surfaced by [`GroupingService`] operations.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The grouping core rejected the request.
    #[error(transparent)]
    Grouping(#[from] GroupingError),
    /// Fetching the snapshot from the store failed.
    #[error("external store failure: {0}")]
    ExternalIo(#[from] StoreError),
    /// Wrapper for Prometheus metrics registration failures.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

pub mod file;
pub mod memory;
pub mod metrics;
pub mod persist;
pub mod service;
pub mod store;

pub use file::JsonFileEventStore;
pub use memory::InMemoryEventStore;
pub use metrics::GroupingMetrics;
pub use persist::{persist_updates, PersistOutcome, PersistReport};
pub use service::{DetachRun, GroupingRun, GroupingService, UngroupRun};
pub use store::{EventFilter, EventStore};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_render() {
        let err = StoreError::UnknownEvent(EventId::from("evt-9"));
        assert_eq!(format!("{err}"), "unknown event evt-9");

        let err = ServiceError::from(GroupingError::NotFound("no mother event with id m".into()));
        assert_eq!(format!("{err}"), "event not found: no mother event with id m");
    }
}
