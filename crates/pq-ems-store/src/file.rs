//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Event store abstractions and storage bindings."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pq_ems_events::{Event, EventId, GroupingFields};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::store::{EventFilter, EventStore};
use crate::{Result, StoreError};

/// Current snapshot envelope version.
pub const SNAPSHOT_VERSION: u16 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotEnvelope {
    version: u16,
    saved_at: DateTime<Utc>,
    hash: String,
    events: Vec<Event>,
}

/// Store backed by a JSON snapshot of the event table on local disk.
///
/// The file is either a versioned envelope written by this store or a bare
/// JSON array of events (as exported from the hosted table). Writes always
/// produce an envelope and replace the file atomically.
#[derive(Debug)]
pub struct JsonFileEventStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileEventStore {
    /// Bind to an existing snapshot file.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.is_file() {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("event snapshot {} does not exist", path.display()),
            )));
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// Write `events` as a fresh snapshot at `path` and bind to it.
    pub fn create(path: impl Into<PathBuf>, events: &[Event]) -> Result<Self> {
        let path = path.into();
        save_events(&path, events)?;
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// Location of the snapshot on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every event in the snapshot, in file order.
    pub fn load_all(&self) -> Result<Vec<Event>> {
        load_events(&self.path)
    }
}

#[async_trait]
impl EventStore for JsonFileEventStore {
    async fn fetch_events(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        let events = load_events(&self.path)?;
        Ok(events.into_iter().filter(|e| filter.matches(e)).collect())
    }

    async fn persist_event_fields(&self, id: &EventId, fields: &GroupingFields) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut events = load_events(&self.path)?;
        let row = events
            .iter_mut()
            .find(|e| &e.id == id)
            .ok_or_else(|| StoreError::UnknownEvent(id.clone()))?;
        row.grouping = fields.clone();
        save_events(&self.path, &events)
    }
}

/// Read a snapshot, accepting either the envelope or a bare event array.
pub fn load_events(path: &Path) -> Result<Vec<Event>> {
    let data = fs::read_to_string(path)?;
    if data.trim_start().starts_with('[') {
        return Ok(serde_json::from_str(&data)?);
    }
    let envelope: SnapshotEnvelope = serde_json::from_str(&data)?;
    if envelope.hash != compute_hash(&envelope.events)? {
        return Err(StoreError::HashMismatch);
    }
    Ok(envelope.events)
}

/// Write `events` as an envelope through a temporary sibling file.
pub fn save_events(path: &Path, events: &[Event]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let envelope = SnapshotEnvelope {
        version: SNAPSHOT_VERSION,
        saved_at: Utc::now(),
        hash: compute_hash(events)?,
        events: events.to_vec(),
    };

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer_pretty(&mut writer, &envelope)?;
        writer.flush()?;
    }
    fs::rename(&tmp, path)?;
    debug!(path = %path.display(), events = events.len(), "event snapshot written");
    Ok(())
}

fn compute_hash(events: &[Event]) -> Result<String> {
    let serialized = serde_json::to_vec(events)?;
    let mut hasher = Sha256::new();
    hasher.update(serialized);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pq_ems_events::{EventType, GroupingType, Severity};
    use tempfile::tempdir;

    fn sample() -> Vec<Event> {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 6, 30, 0).unwrap();
        vec![
            Event::new("a", "SS-1", at, EventType::VoltageDip, Severity::High)
                .with_measurement(0.48, 240),
            Event::new("b", "SS-1", at, EventType::VoltageSwell, Severity::Low)
                .with_measurement(1.12, 60),
        ]
    }

    #[tokio::test]
    async fn persist_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("events.json");
        let store = JsonFileEventStore::create(&path, &sample()).unwrap();

        let fields = GroupingFields::mother(GroupingType::Automatic, Utc::now());
        store
            .persist_event_fields(&"a".into(), &fields)
            .await
            .unwrap();

        let reopened = JsonFileEventStore::open(&path).unwrap();
        let events = reopened.fetch_events(&EventFilter::all()).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].grouping, fields);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn bare_array_is_accepted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("export.json");
        fs::write(&path, serde_json::to_vec(&sample()).unwrap()).unwrap();

        let store = JsonFileEventStore::open(&path).unwrap();
        assert_eq!(store.load_all().unwrap(), sample());
    }

    #[test]
    fn tampered_snapshot_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.json");
        JsonFileEventStore::create(&path, &sample()).unwrap();

        let mut envelope: serde_json::Value =
            serde_json::from_reader(File::open(&path).unwrap()).unwrap();
        envelope["events"][0]["magnitude"] = serde_json::json!(0.01);
        fs::write(&path, serde_json::to_vec_pretty(&envelope).unwrap()).unwrap();

        assert!(matches!(load_events(&path), Err(StoreError::HashMismatch)));
    }

    #[test]
    fn open_requires_existing_file() {
        let dir = tempdir().unwrap();
        assert!(JsonFileEventStore::open(dir.path().join("missing.json")).is_err());
    }
}
