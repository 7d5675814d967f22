//! Persisted variables in a JSON file.
//!
//! ```json
//! {
//!   "variables": {
//!     "logins": { "value": 3, "updated_at": "2026-01-02T03:04:05Z" }
//!   }
//! }
//! ```
//!
//! Every write replaces the file atomically: the new contents go to a
//! sibling temp file which is then renamed over the original.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sightline_core::error::{Error, Result};
use sightline_core::vars::{Value, VariableBacking};
use tracing::debug;

use crate::paths;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub value: Value,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct VarsFile {
    #[serde(default)]
    variables: BTreeMap<String, Entry>,
}

/// File-backed [`VariableBacking`].
#[derive(Debug)]
pub struct FileVariableStore {
    path: PathBuf,
    entries: BTreeMap<String, Entry>,
}

impl FileVariableStore {
    /// Load the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) => {
                let file: VarsFile = serde_json::from_str(&raw).map_err(|e| {
                    Error::Persistence(format!("{} is not a valid vars file: {e}", path.display()))
                })?;
                file.variables
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(Error::Persistence(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        };
        debug!(path = %path.display(), count = entries.len(), "loaded variables");
        Ok(Self { path, entries })
    }

    /// Open the store in the default data directory.
    pub fn open_default() -> Result<Self> {
        Self::open(paths::vars_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &BTreeMap<String, Entry> {
        &self.entries
    }

    pub fn entry(&self, name: &str) -> Option<&Entry> {
        self.entries.get(name)
    }

    pub fn insert(&mut self, name: &str, value: Value) -> Result<()> {
        self.entries.insert(
            name.to_string(),
            Entry {
                value,
                updated_at: Utc::now(),
            },
        );
        self.save()
    }

    /// Remove `name`. Returns whether it was present.
    pub fn remove(&mut self, name: &str) -> Result<bool> {
        if self.entries.remove(name).is_none() {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    fn save(&self) -> Result<()> {
        let persistence = |what: &str, e: std::io::Error| {
            Error::Persistence(format!("failed to {what} {}: {e}", self.path.display()))
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            paths::ensure_private_dir(parent).map_err(|e| persistence("create directory for", e))?;
        }

        let file = VarsFile {
            variables: self.entries.clone(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| Error::Persistence(format!("failed to encode variables: {e}")))?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| persistence("write", e))?;
        fs::rename(&tmp, &self.path).map_err(|e| persistence("replace", e))?;
        debug!(path = %self.path.display(), count = self.entries.len(), "saved variables");
        Ok(())
    }
}

impl VariableBacking for FileVariableStore {
    fn get(&self, name: &str) -> Result<Option<Value>> {
        Ok(self.entries.get(name).map(|e| e.value.clone()))
    }

    fn set(&mut self, name: &str, value: &Value) -> Result<()> {
        self.insert(name, value.clone())
    }
}
