//! Model files as provided by the model download layer

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::ModelKey;

/// A model file on local storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelFile {
    /// Absolute path to the model file
    pub path: PathBuf,
    /// Size on disk in bytes
    #[serde(default)]
    pub size_bytes: u64,
}

impl ModelFile {
    /// Create a new model file description
    pub fn new(path: impl Into<PathBuf>, size_bytes: u64) -> Self {
        Self {
            path: path.into(),
            size_bytes,
        }
    }

    /// Path of the model file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name without extension, used as a display and engine model name
    pub fn stem(&self) -> Option<&str> {
        self.path.file_stem().and_then(|s| s.to_str())
    }
}

/// Mapping of model keys to downloaded model files
///
/// Read-only from the runtime's point of view. Ordered so that iteration
/// (and therefore logging) is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelFiles(BTreeMap<ModelKey, ModelFile>);

impl ModelFiles {
    /// Create an empty mapping
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the file for a key
    pub fn get(&self, key: &ModelKey) -> Option<&ModelFile> {
        self.0.get(key)
    }

    /// Add or replace the file for a key
    pub fn insert(&mut self, key: ModelKey, file: ModelFile) -> Option<ModelFile> {
        self.0.insert(key, file)
    }

    /// Builder-style insert
    #[must_use]
    pub fn with(mut self, key: ModelKey, file: ModelFile) -> Self {
        self.0.insert(key, file);
        self
    }

    /// All configured keys in order
    pub fn keys(&self) -> impl Iterator<Item = &ModelKey> {
        self.0.keys()
    }

    /// Number of configured models
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no model is configured
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(ModelKey, ModelFile)> for ModelFiles {
    fn from_iter<T: IntoIterator<Item = (ModelKey, ModelFile)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
