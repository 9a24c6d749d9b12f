//! Versioned snapshot persistence.
//!
//! The whole engine state — in-flight sessions plus the entry set — is one
//! serialized `Snapshot` under a single key, written atomically per state
//! transition. The version field is checked before any field is
//! interpreted: an unknown version or an unparseable payload never
//! crashes the load path, it degrades to an empty state with an explicit
//! outcome the caller can surface as a migration signal.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::correlator::Session;
use crate::entry::DashboardEntry;
use crate::error::{Result, StorageError};
use crate::store::KvStore;

/// Current snapshot schema version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Store key holding the snapshot.
pub const SNAPSHOT_KEY: &str = "qcwatch/snapshot";

/// The persisted unit: everything the engine needs to resume.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    #[serde(default)]
    pub sessions: Vec<Session>,
    #[serde(default)]
    pub entries: Vec<DashboardEntry>,
}

impl Snapshot {
    #[must_use]
    pub fn new(sessions: Vec<Session>, entries: Vec<DashboardEntry>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            sessions,
            entries,
        }
    }
}

/// Result of a snapshot load.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// A current-version snapshot was read.
    Loaded(Snapshot),
    /// Nothing persisted yet.
    Empty,
    /// A snapshot exists but its schema version is not supported; the
    /// caller should start empty and surface a migration signal.
    VersionMismatch { found: u32, supported: u32 },
    /// A payload exists but could not be parsed.
    Corrupt { detail: String },
}

impl LoadOutcome {
    /// The snapshot to run with: the loaded one, or empty state.
    #[must_use]
    pub fn into_snapshot(self) -> Snapshot {
        match self {
            Self::Loaded(snapshot) => snapshot,
            _ => Snapshot::new(Vec::new(), Vec::new()),
        }
    }
}

/// Used to read the version field before trusting the rest of the payload.
#[derive(Deserialize)]
struct VersionProbe {
    #[serde(default)]
    version: u32,
}

/// Write a snapshot. All-or-nothing per call; on failure the caller keeps
/// its in-memory state and retries on the next event or tick.
pub fn save_snapshot(store: &dyn KvStore, snapshot: &Snapshot) -> Result<()> {
    let payload = serde_json::to_string(snapshot)?;
    store.set(SNAPSHOT_KEY, &payload)?;
    Ok(())
}

/// Load the persisted snapshot, degrading instead of crashing.
///
/// Only store access errors propagate; schema problems come back as
/// explicit `LoadOutcome` variants.
pub fn load_snapshot(store: &dyn KvStore) -> Result<LoadOutcome> {
    let Some(payload) = store.get(SNAPSHOT_KEY)? else {
        return Ok(LoadOutcome::Empty);
    };

    let probe: VersionProbe = match serde_json::from_str(&payload) {
        Ok(probe) => probe,
        Err(err) => {
            warn!(error = %err, "Snapshot payload is unreadable; starting empty");
            return Ok(LoadOutcome::Corrupt {
                detail: err.to_string(),
            });
        }
    };

    if probe.version != SNAPSHOT_VERSION {
        warn!(
            found = probe.version,
            supported = SNAPSHOT_VERSION,
            "Snapshot schema version mismatch; starting empty"
        );
        return Ok(LoadOutcome::VersionMismatch {
            found: probe.version,
            supported: SNAPSHOT_VERSION,
        });
    }

    match serde_json::from_str::<Snapshot>(&payload) {
        Ok(snapshot) => Ok(LoadOutcome::Loaded(snapshot)),
        Err(err) => {
            warn!(error = %err, "Snapshot body failed to parse; starting empty");
            Ok(LoadOutcome::Corrupt {
                detail: err.to_string(),
            })
        }
    }
}

/// Strict variant of the version check for callers that need an error
/// (e.g. an explicit export/import path).
pub fn require_current_version(snapshot: &Snapshot) -> Result<()> {
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(StorageError::SchemaTooNew {
            current: snapshot.version,
            supported: SNAPSHOT_VERSION,
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CorrelatorConfig;
    use crate::correlator::SessionCorrelator;
    use crate::event::{EventKind, LifecycleEvent};
    use crate::store::MemoryStore;

    fn sample_snapshot() -> Snapshot {
        let mut correlator = SessionCorrelator::new(CorrelatorConfig::default());
        let entries = correlator.ingest(&LifecycleEvent::new(EventKind::Begin, "qaop_1", 1_000));
        Snapshot::new(correlator.sessions(), entries)
    }

    #[test]
    fn save_load_roundtrip() {
        let store = MemoryStore::new();
        let snapshot = sample_snapshot();
        save_snapshot(&store, &snapshot).unwrap();

        let outcome = load_snapshot(&store).unwrap();
        assert_eq!(outcome, LoadOutcome::Loaded(snapshot));
    }

    #[test]
    fn load_from_empty_store() {
        let store = MemoryStore::new();
        let outcome = load_snapshot(&store).unwrap();
        assert_eq!(outcome, LoadOutcome::Empty);
        assert_eq!(outcome.into_snapshot(), Snapshot::new(Vec::new(), Vec::new()));
    }

    #[test]
    fn newer_version_degrades_to_mismatch() {
        let store = MemoryStore::new();
        store
            .set(
                SNAPSHOT_KEY,
                "{\"version\": 99, \"sessions\": [], \"entries\": []}",
            )
            .unwrap();

        let outcome = load_snapshot(&store).unwrap();
        assert_eq!(
            outcome,
            LoadOutcome::VersionMismatch {
                found: 99,
                supported: SNAPSHOT_VERSION
            }
        );
        assert!(outcome.into_snapshot().entries.is_empty());
    }

    #[test]
    fn garbage_payload_degrades_to_corrupt() {
        let store = MemoryStore::new();
        store.set(SNAPSHOT_KEY, "not json at all").unwrap();

        match load_snapshot(&store).unwrap() {
            LoadOutcome::Corrupt { .. } => {}
            other => panic!("expected Corrupt, got {other:?}"),
        }
    }

    #[test]
    fn wrong_body_shape_degrades_to_corrupt() {
        let store = MemoryStore::new();
        store
            .set(SNAPSHOT_KEY, "{\"version\": 1, \"sessions\": 42}")
            .unwrap();
        assert!(matches!(
            load_snapshot(&store).unwrap(),
            LoadOutcome::Corrupt { .. }
        ));
    }

    #[test]
    fn store_failure_propagates() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        let snapshot = Snapshot::new(Vec::new(), Vec::new());
        assert!(save_snapshot(&store, &snapshot).is_err());
    }

    #[test]
    fn require_current_version_rejects_newer() {
        let mut snapshot = Snapshot::new(Vec::new(), Vec::new());
        snapshot.version = 2;
        assert!(require_current_version(&snapshot).is_err());
        snapshot.version = SNAPSHOT_VERSION;
        assert!(require_current_version(&snapshot).is_ok());
    }

    #[test]
    fn snapshot_preserves_entries() {
        let store = MemoryStore::new();
        let entries = vec![DashboardEntry::off_platform(5_000, 1_000, "meeting", None)];
        save_snapshot(&store, &Snapshot::new(Vec::new(), entries.clone())).unwrap();

        let loaded = load_snapshot(&store).unwrap().into_snapshot();
        assert_eq!(loaded.entries, entries);
    }
}
