//! Model key value object
//!
//! # Examples
//!
//! ```
//! use domain::ModelKey;
//!
//! let key: ModelKey = "E4B".parse().unwrap();
//! assert_eq!(key.as_str(), "E4B");
//! assert!("gemma 3n".parse::<ModelKey>().is_err());
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// Maximum length of a model key
const MAX_LEN: usize = 64;

/// Identifier of a selectable model variant (e.g. `E2B`, `E4B`)
///
/// Keys are what the preference store persists and what the model file
/// provider is indexed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelKey(String);

impl ModelKey {
    /// The 2B-effective-parameter variant
    pub const E2B: &'static str = "E2B";
    /// The 4B-effective-parameter variant
    pub const E4B: &'static str = "E4B";

    /// Create a validated model key
    pub fn new(key: impl Into<String>) -> Result<Self, DomainError> {
        let key = key.into();
        let trimmed = key.trim();

        if trimmed.is_empty() {
            return Err(DomainError::InvalidModelKey(
                "model key cannot be empty".to_string(),
            ));
        }
        if trimmed.len() > MAX_LEN {
            return Err(DomainError::InvalidModelKey(format!(
                "model key exceeds {MAX_LEN} characters"
            )));
        }
        if let Some(c) = trimmed
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(DomainError::InvalidModelKey(format!(
                "unsupported character {c:?} in '{trimmed}'"
            )));
        }

        Ok(Self(trimmed.to_string()))
    }

    /// The `E2B` key
    pub fn e2b() -> Self {
        Self(Self::E2B.to_string())
    }

    /// The `E4B` key
    pub fn e4b() -> Self {
        Self(Self::E4B.to_string())
    }

    /// Borrow the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ModelKey {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ModelKey {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ModelKey> for String {
    fn from(key: ModelKey) -> Self {
        key.0
    }
}

impl AsRef<str> for ModelKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
