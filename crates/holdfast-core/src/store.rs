//! Persisted controller state (`locked`, `targets`, `interval_ms`) keyed by identity.
//!
//! Loading never fails the controller: unreadable or malformed fields fall back
//! to the configured defaults field by field, and an unreadable lock flag means
//! `Unlocked`.

use crate::config::{ControllerCfg, MIN_INTERVAL_MS};
use crate::error::HoldfastResult;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

/// Fully resolved state, as written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub locked: bool,
    pub targets: Vec<String>,
    pub interval_ms: u64,
}

impl PersistedState {
    /// State for a controller that has never persisted anything.
    pub fn seeded_from(cfg: &ControllerCfg) -> Self {
        Self {
            locked: false,
            targets: cfg.targets.clone(),
            interval_ms: cfg.interval_ms,
        }
    }
}

/// What a store actually held; each field is `None` when missing or invalid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredState {
    pub locked: Option<bool>,
    pub targets: Option<Vec<String>>,
    pub interval_ms: Option<u64>,
}

impl StoredState {
    /// Parse a JSON payload, keeping whichever fields type-check.
    pub fn from_json(payload: &str) -> Self {
        let value: Value = match serde_json::from_str(payload) {
            Ok(value) => value,
            Err(err) => {
                warn!("persisted state is not valid JSON ({err}); using defaults");
                return Self::default();
            }
        };

        let locked = value.get("locked").and_then(Value::as_bool);
        let targets = value.get("targets").and_then(Value::as_array).and_then(|items| {
            items
                .iter()
                .map(|item| item.as_str().map(str::trim).map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .map(|list| list.into_iter().filter(|t| !t.is_empty()).collect::<Vec<_>>())
                .filter(|list| !list.is_empty())
        });
        let interval_ms = value
            .get("interval_ms")
            .or_else(|| value.get("intervalMs"))
            .and_then(Value::as_u64)
            .filter(|ms| *ms >= MIN_INTERVAL_MS);

        Self {
            locked,
            targets,
            interval_ms,
        }
    }

    /// Fill gaps from the configured defaults. An empty target list counts as a gap.
    pub fn resolve(self, defaults: &ControllerCfg) -> PersistedState {
        let seeded = PersistedState::seeded_from(defaults);
        PersistedState {
            locked: self.locked.unwrap_or(seeded.locked),
            targets: self
                .targets
                .filter(|targets| !targets.is_empty())
                .unwrap_or(seeded.targets),
            interval_ms: self.interval_ms.unwrap_or(seeded.interval_ms),
        }
    }
}

impl From<PersistedState> for StoredState {
    fn from(state: PersistedState) -> Self {
        Self {
            locked: Some(state.locked),
            targets: Some(state.targets),
            interval_ms: Some(state.interval_ms),
        }
    }
}

/// Backing storage for controller state.
pub trait StateStore: Send + Sync {
    fn load(&self, identity: &str) -> HoldfastResult<StoredState>;

    fn save(&self, identity: &str, state: &PersistedState) -> HoldfastResult<()>;
}

/// One JSON document per identity under a directory.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, identity: &str) -> PathBuf {
        let file_name: String = identity
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                    ch
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(format!("{file_name}.json"))
    }
}

impl StateStore for FileStateStore {
    fn load(&self, identity: &str) -> HoldfastResult<StoredState> {
        let path = self.path_for(identity);
        match fs::read_to_string(&path) {
            Ok(payload) => Ok(StoredState::from_json(&payload)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(StoredState::default()),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, identity: &str, state: &PersistedState) -> HoldfastResult<()> {
        fs::create_dir_all(&self.root)?;
        let path = self.path_for(identity);
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, serde_json::to_string_pretty(state)?)?;
        fs::rename(&staging, &path)?;
        Ok(())
    }
}

/// Process-local store for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: Mutex<HashMap<String, PersistedState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(identity: &str, state: PersistedState) -> Self {
        let store = Self::default();
        store
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(identity.to_string(), state);
        store
    }

    pub fn get(&self, identity: &str) -> Option<PersistedState> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(identity)
            .cloned()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, identity: &str) -> HoldfastResult<StoredState> {
        Ok(self.get(identity).map(StoredState::from).unwrap_or_default())
    }

    fn save(&self, identity: &str, state: &PersistedState) -> HoldfastResult<()> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(identity.to_string(), state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn defaults() -> ControllerCfg {
        ControllerCfg {
            identity: "desk".into(),
            targets: vec!["main".into(), "spare".into()],
            interval_ms: 7_000,
        }
    }

    #[test]
    fn missing_file_resolves_to_seeded_defaults() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path());

        let state = store.load("desk").unwrap().resolve(&defaults());
        assert_eq!(state, PersistedState::seeded_from(&defaults()));
        assert!(!state.locked);
    }

    #[test]
    fn save_then_load_preserves_every_field() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state"));
        let state = PersistedState {
            locked: true,
            targets: vec!["x".into()],
            interval_ms: 3_000,
        };

        store.save("desk", &state).unwrap();
        assert!(!store.path_for("desk").with_extension("json.tmp").exists());
        assert_eq!(store.load("desk").unwrap().resolve(&defaults()), state);
    }

    #[test]
    fn corrupt_payload_defaults_to_unlocked() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        fs::write(store.path_for("desk"), "{not json").unwrap();

        let state = store.load("desk").unwrap().resolve(&defaults());
        assert!(!state.locked);
        assert_eq!(state.targets, defaults().targets);
    }

    #[test]
    fn invalid_fields_fall_back_individually() {
        let stored = StoredState::from_json(
            r#"{"locked": "yes", "targets": ["a", " b ", ""], "interval_ms": 10}"#,
        );
        assert_eq!(stored.locked, None);
        assert_eq!(stored.targets, Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(stored.interval_ms, None);

        let mixed = StoredState::from_json(r#"{"locked": true, "targets": ["a", 7]}"#);
        assert_eq!(mixed.locked, Some(true));
        assert_eq!(mixed.targets, None);

        let camel = StoredState::from_json(r#"{"intervalMs": 4000}"#);
        assert_eq!(camel.interval_ms, Some(4_000));
    }

    #[test]
    fn empty_persisted_targets_yield_to_configured_ones() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        store
            .save(
                "desk",
                &PersistedState {
                    locked: false,
                    targets: Vec::new(),
                    interval_ms: 5_000,
                },
            )
            .unwrap();

        let stored = store.load("desk").unwrap();
        assert_eq!(stored.targets, None);
        let state = stored.resolve(&defaults());
        assert_eq!(state.targets, defaults().targets);
        assert_eq!(state.interval_ms, 5_000);

        let memory = MemoryStateStore::with_state(
            "desk",
            PersistedState {
                locked: false,
                targets: Vec::new(),
                interval_ms: 5_000,
            },
        );
        assert_eq!(
            memory.load("desk").unwrap().resolve(&defaults()).targets,
            defaults().targets
        );
    }

    #[test]
    fn identities_map_to_distinct_safe_file_names() {
        let store = FileStateStore::new("/var/lib/holdfast");
        assert_eq!(
            store.path_for("desk/main"),
            PathBuf::from("/var/lib/holdfast/desk_main.json")
        );
        assert_ne!(store.path_for("desk"), store.path_for("laptop"));
    }

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryStateStore::new();
        assert_eq!(store.load("desk").unwrap(), StoredState::default());
        let state = PersistedState {
            locked: true,
            targets: vec!["a".into()],
            interval_ms: 5_000,
        };
        store.save("desk", &state).unwrap();
        assert_eq!(store.get("desk"), Some(state));
    }
}
