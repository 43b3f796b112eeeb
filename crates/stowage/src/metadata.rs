//! Title metadata as returned by the API.
//!
//! The document is stored and forwarded without interpretation, except for
//! looking up the field that points at the top manifest. Key order survives a
//! round trip to `data.json`.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, StowageError};
use crate::fs;

pub const METADATA_FILE: &str = "data.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(Value);

impl Metadata {
    pub fn new(document: Value) -> Self {
        Self(document)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(Self(serde_json::from_slice(bytes)?))
    }

    pub fn document(&self) -> &Value {
        &self.0
    }

    /// String value at a dotted path such as `videoStreamUrl` or `stream.url`.
    pub fn string_field(&self, field: &str) -> Option<&str> {
        field
            .split('.')
            .try_fold(&self.0, |value, key| value.get(key))?
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn require_string(&self, field: &str) -> Result<&str> {
        self.string_field(field)
            .ok_or_else(|| StowageError::MissingField {
                field: field.to_string(),
            })
    }

    /// Writes the document, pretty-printed, to `<title_root>/data.json`.
    pub async fn write(&self, title_root: &Path) -> Result<()> {
        let mut bytes = serde_json::to_vec_pretty(&self.0)?;
        bytes.push(b'\n');
        fs::write_atomic(&title_root.join(METADATA_FILE), &bytes).await
    }
}
