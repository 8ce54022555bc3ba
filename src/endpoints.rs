// Endpoint config store.
//
// Holds the named endpoint configs that the dispatch layer resolves requests
// against, and persists the whole table to a single JSON file after every
// change. The file maps endpoint name to config and keeps insertion order, so
// path lookups behave the same before and after a restart.
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tracing::{debug, info};

use crate::persist::write_json_atomically;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to access endpoint file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to encode endpoint file: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// A named mapping from an HTTP path to the system prompt used for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointConfig {
    #[serde(default)]
    pub name: String,

    pub path: String,

    pub system_prompt: String,

    #[serde(default = "enabled_by_default")]
    pub enabled: bool,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Caller-supplied fields of an endpoint config, as sent by the admin API.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EndpointDraft {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub path: String,

    #[serde(default)]
    pub system_prompt: String,

    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

/// Endpoint configs in insertion order, serialized as a JSON object keyed by
/// name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EndpointTable(Vec<EndpointConfig>);

impl EndpointTable {
    fn position(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|config| config.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&EndpointConfig> {
        self.0.iter().find(|config| config.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EndpointConfig> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl Serialize for EndpointTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for config in &self.0 {
            map.serialize_entry(&config.name, config)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for EndpointTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TableVisitor;

        impl<'de> Visitor<'de> for TableVisitor {
            type Value = EndpointTable;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of endpoint name to endpoint config")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut configs: Vec<EndpointConfig> = Vec::new();
                while let Some((name, mut config)) = access.next_entry::<String, EndpointConfig>()? {
                    // The key is authoritative; a duplicate key replaces in place.
                    config.name = name;
                    match configs.iter().position(|c| c.name == config.name) {
                        Some(index) => configs[index] = config,
                        None => configs.push(config),
                    }
                }
                Ok(EndpointTable(configs))
            }
        }

        deserializer.deserialize_map(TableVisitor)
    }
}

/// Process-wide endpoint config store backed by a JSON file.
///
/// Reads take a shared lock on the in-memory table. Each mutation writes the
/// complete table to disk before it becomes visible, so the file and memory
/// never disagree after a failed write.
pub struct EndpointStore {
    path: PathBuf,
    table: RwLock<EndpointTable>,
}

impl EndpointStore {
    /// Opens the store at `path`. A missing file yields an empty store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let table = if path.exists() {
            let content = fs::read_to_string(&path)?;
            let table: EndpointTable = serde_json::from_str(&content)?;
            info!("Loaded {} endpoint configs from {}", table.len(), path.display());
            table
        } else {
            info!("Endpoint file {} not found, starting empty", path.display());
            EndpointTable::default()
        };

        Ok(Self {
            path,
            table: RwLock::new(table),
        })
    }

    /// Adds a new endpoint config.
    ///
    /// Returns `Ok(false)` without touching the store when the name is empty
    /// or already taken.
    pub fn add(&self, draft: EndpointDraft) -> Result<bool, StoreError> {
        let mut table = self.table.write();
        if draft.name.is_empty() || table.position(&draft.name).is_some() {
            debug!("Rejecting endpoint add for name {:?}", draft.name);
            return Ok(false);
        }

        let now = Utc::now();
        let mut next = table.clone();
        next.0.push(EndpointConfig {
            name: draft.name,
            path: draft.path,
            system_prompt: draft.system_prompt,
            enabled: draft.enabled,
            created_at: now,
            updated_at: now,
        });

        self.persist(&next)?;
        *table = next;
        Ok(true)
    }

    /// Replaces the config stored under `name`, keeping its `created_at`.
    ///
    /// Returns `Ok(false)` if no config has that name.
    pub fn update(&self, name: &str, draft: EndpointDraft) -> Result<bool, StoreError> {
        let mut table = self.table.write();
        let Some(index) = table.position(name) else {
            debug!("Endpoint {} not found for update", name);
            return Ok(false);
        };

        let mut next = table.clone();
        let existing = &mut next.0[index];
        existing.path = draft.path;
        existing.system_prompt = draft.system_prompt;
        existing.enabled = draft.enabled;
        existing.updated_at = Utc::now();

        self.persist(&next)?;
        *table = next;
        Ok(true)
    }

    /// Removes the config named `name`. Removing an absent name is not an error.
    pub fn delete(&self, name: &str) -> Result<(), StoreError> {
        let mut table = self.table.write();
        let Some(index) = table.position(name) else {
            return Ok(());
        };

        let mut next = table.clone();
        next.0.remove(index);

        self.persist(&next)?;
        *table = next;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<EndpointConfig> {
        self.table.read().get(name).cloned()
    }

    /// Snapshot of the whole table in insertion order.
    pub fn list(&self) -> EndpointTable {
        self.table.read().clone()
    }

    /// First config, in insertion order, whose path equals `path`.
    pub fn find_by_path(&self, path: &str) -> Option<EndpointConfig> {
        self.table
            .read()
            .iter()
            .find(|config| config.path == path)
            .cloned()
    }

    fn persist(&self, table: &EndpointTable) -> Result<(), StoreError> {
        write_json_atomically(&self.path, table)?;
        debug!("Persisted {} endpoint configs to {}", table.len(), self.path.display());
        Ok(())
    }
}
