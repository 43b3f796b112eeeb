//! Final per-title status, persisted as `status.json` in the title directory.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use hls::{CodecFamily, StreamKind};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, StowageError};
use crate::fs;
use crate::model::{FetchState, Variant};
use crate::verify::FragmentProblem;

pub const STATUS_FILE: &str = "status.json";

/// Category of a title-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    MalformedManifest,
    FetchFailed,
    DiskSpaceExhausted,
    Cancelled,
    NoRetainedVariants,
    InvalidTitle,
    Io,
    Other,
}

impl From<&StowageError> for FailureKind {
    fn from(err: &StowageError) -> Self {
        match err {
            StowageError::Cancelled => FailureKind::Cancelled,
            StowageError::MalformedManifest { .. } => FailureKind::MalformedManifest,
            StowageError::FetchFailed { .. }
            | StowageError::HttpStatus { .. }
            | StowageError::Network { .. }
            | StowageError::MissingField { .. }
            | StowageError::InvalidUrl { .. } => FailureKind::FetchFailed,
            StowageError::DiskSpaceExhausted { .. } => FailureKind::DiskSpaceExhausted,
            StowageError::Io { .. } => FailureKind::Io,
            StowageError::Json { .. } | StowageError::Configuration { .. } => FailureKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TitleFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&StowageError> for TitleFailure {
    fn from(err: &StowageError) -> Self {
        Self::new(FailureKind::from(err), err.to_string())
    }
}

/// A retained variant that is not fully downloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncompleteVariant {
    pub label: String,
    /// Set when the child manifest itself was unusable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fragments: Vec<FragmentProblem>,
}

impl fmt::Display for IncompleteVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)?;
        if let Some(problem) = &self.problem {
            write!(f, ": {problem}")?;
        }
        if !self.fragments.is_empty() {
            write!(f, ": {} incomplete fragment(s)", self.fragments.len())?;
        }
        Ok(())
    }
}

/// Terminal state of a title after one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TitleStatus {
    Done,
    PartiallyDone { incomplete: Vec<IncompleteVariant> },
    Failed(TitleFailure),
}

impl TitleStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, TitleStatus::Done)
    }

    pub fn name(&self) -> &'static str {
        match self {
            TitleStatus::Done => "Done",
            TitleStatus::PartiallyDone { .. } => "PartiallyDone",
            TitleStatus::Failed(_) => "Failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentRecord {
    pub rewritten: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_len: Option<u64>,
    pub state: FetchState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantRecord {
    pub label: String,
    #[serde(default)]
    pub kind: StreamKind,
    pub family: CodecFamily,
    pub original: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewritten: Option<String>,
    pub included: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fragments: Vec<FragmentRecord>,
}

impl From<&Variant> for VariantRecord {
    fn from(variant: &Variant) -> Self {
        Self {
            label: variant.label.clone(),
            kind: variant.kind,
            family: variant.family,
            original: variant.original.clone(),
            rewritten: variant.rewritten.clone(),
            included: variant.included,
            problem: variant.problem.clone(),
            fragments: variant
                .fragments
                .iter()
                .map(|f| FragmentRecord {
                    rewritten: f.rewritten.clone(),
                    expected_len: f.expected_len,
                    state: f.state(),
                    error: f.last_error().map(str::to_string),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleReport {
    pub id: String,
    #[serde(flatten)]
    pub status: TitleStatus,
    #[serde(default)]
    pub variants: Vec<VariantRecord>,
    pub finished_at: DateTime<Utc>,
}

impl TitleReport {
    pub fn new(id: impl Into<String>, status: TitleStatus, variants: Vec<VariantRecord>) -> Self {
        Self {
            id: id.into(),
            status,
            variants,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(id: impl Into<String>, failure: TitleFailure) -> Self {
        Self::new(id, TitleStatus::Failed(failure), Vec::new())
    }

    /// Expected lengths of fragments that completed in this run, keyed by
    /// rewritten reference. Used to skip them on a resumed run.
    pub fn completed_fragments(&self) -> HashMap<&str, u64> {
        self.variants
            .iter()
            .flat_map(|v| &v.fragments)
            .filter(|f| f.state == FetchState::Complete)
            .filter_map(|f| f.expected_len.map(|len| (f.rewritten.as_str(), len)))
            .collect()
    }

    pub async fn write(&self, title_root: &Path) -> Result<()> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        fs::write_atomic(&title_root.join(STATUS_FILE), &bytes).await
    }

    /// Reads a previous report. A missing or unreadable file means no report.
    pub async fn read(title_root: &Path) -> Option<Self> {
        let path = title_root.join(STATUS_FILE);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read previous status");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unparsable previous status");
                None
            }
        }
    }
}

impl fmt::Display for TitleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            TitleStatus::Done => write!(f, "{}: Done", self.id),
            TitleStatus::PartiallyDone { incomplete } => {
                write!(f, "{}: PartiallyDone", self.id)?;
                for variant in incomplete {
                    write!(f, "\n  {variant}")?;
                    for problem in variant.fragments.iter().take(3) {
                        write!(f, "\n    {problem}")?;
                    }
                    if variant.fragments.len() > 3 {
                        write!(f, "\n    ... {} more", variant.fragments.len() - 3)?;
                    }
                }
                Ok(())
            }
            TitleStatus::Failed(failure) => write!(f, "{}: Failed ({})", self.id, failure.message),
        }
    }
}
