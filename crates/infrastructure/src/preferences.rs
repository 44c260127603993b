//! Preference store adapters
//!
//! [`FilePreferenceStore`] keeps the selected model in a small JSON document.
//! Writes go to a sibling temp file first and are renamed into place, so a
//! crash mid-write never leaves a truncated document behind.

use std::fs;
use std::path::{Path, PathBuf};

use ai_runtime::{ManagedResource, PreferenceStore, RuntimeError};
use chrono::{DateTime, Utc};
use domain::ModelKey;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::InfrastructureError;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PreferenceDocument {
    selected_model: ModelKey,
    updated_at: DateTime<Utc>,
}

/// JSON file backed preference store
#[derive(Debug)]
pub struct FilePreferenceStore {
    path: PathBuf,
    cached: RwLock<Option<ModelKey>>,
    write_lock: Mutex<()>,
}

impl FilePreferenceStore {
    /// Open the store, reading any existing selection
    ///
    /// A missing file means no selection yet. An unreadable or corrupt file
    /// is logged and treated the same way.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let cached = read_document(&path).map(|doc| doc.selected_model);
        Self {
            path,
            cached: RwLock::new(cached),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, key: &ModelKey) -> Result<(), InfrastructureError> {
        let _guard = self.write_lock.lock();

        let document = PreferenceDocument {
            selected_model: key.clone(),
            updated_at: Utc::now(),
        };
        let bytes = serde_json::to_vec_pretty(&document)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| InfrastructureError::io(parent, e))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &bytes).map_err(|e| InfrastructureError::io(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| InfrastructureError::io(&self.path, e))?;

        *self.cached.write() = Some(key.clone());
        debug!(model = %key, path = %self.path.display(), "Persisted model selection");
        Ok(())
    }
}

fn read_document(path: &Path) -> Option<PreferenceDocument> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cannot read preferences, ignoring");
            return None;
        },
    };

    match serde_json::from_slice(&bytes) {
        Ok(doc) => Some(doc),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Corrupt preferences, ignoring");
            None
        },
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn selected_model(&self) -> Option<ModelKey> {
        self.cached.read().clone()
    }

    fn set_selected_model(&self, key: &ModelKey) -> Result<(), RuntimeError> {
        self.write(key).map_err(RuntimeError::from)
    }
}

impl ManagedResource for FilePreferenceStore {
    fn name(&self) -> String {
        format!("preferences({})", self.path.display())
    }

    /// Make sure the parent directory exists and pick up external edits
    fn open(&self) -> Result<(), RuntimeError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| RuntimeError::from(InfrastructureError::io(parent, e)))?;
        }
        if let Some(doc) = read_document(&self.path) {
            *self.cached.write() = Some(doc.selected_model);
        }
        Ok(())
    }

    /// Remove a leftover temp file from an interrupted write
    fn close(&self) {
        let _guard = self.write_lock.lock();
        let tmp = self.path.with_extension("json.tmp");
        match fs::remove_file(&tmp) {
            Ok(()) => debug!(path = %tmp.display(), "Removed stale temp preferences"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => warn!(path = %tmp.display(), error = %e, "Failed to remove temp preferences"),
        }
    }
}

/// Process-local preference store
#[derive(Debug, Default)]
pub struct InMemoryPreferenceStore {
    selected: RwLock<Option<ModelKey>>,
}

impl InMemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_selection(key: ModelKey) -> Self {
        Self {
            selected: RwLock::new(Some(key)),
        }
    }
}

impl PreferenceStore for InMemoryPreferenceStore {
    fn selected_model(&self) -> Option<ModelKey> {
        self.selected.read().clone()
    }

    fn set_selected_model(&self, key: &ModelKey) -> Result<(), RuntimeError> {
        *self.selected.write() = Some(key.clone());
        Ok(())
    }
}
