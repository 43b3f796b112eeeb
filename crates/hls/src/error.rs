use thiserror::Error;

/// Errors raised while reading a playlist.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManifestError {
    /// The playlist structure cannot be interpreted. `line` is 1-based.
    #[error("malformed manifest at line {line}: {reason}")]
    MalformedManifest { line: usize, reason: String },

    /// A tag is missing an attribute it cannot work without.
    #[error("line {line}: {tag} is missing required attribute {attribute}")]
    InvalidAttribute {
        line: usize,
        tag: &'static str,
        attribute: &'static str,
    },
}

impl ManifestError {
    pub fn malformed(line: usize, reason: impl Into<String>) -> Self {
        Self::MalformedManifest {
            line,
            reason: reason.into(),
        }
    }
}
