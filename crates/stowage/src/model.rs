//! Titles, variants and fragments as tracked during one run.

use std::fmt;

use hls::{CodecFamily, SegmentKind, StreamKind};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::metadata::Metadata;

/// Fetch state of a fragment.
///
/// `Pending -> Fetching -> Complete | Failed`, and `Failed -> Pending` while
/// attempts remain. `Complete` is also reachable directly from `Pending` when
/// a file from an earlier run still verifies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchState {
    #[default]
    Pending,
    Fetching,
    Complete,
    Failed,
}

impl FetchState {
    pub fn can_transition_to(self, next: FetchState) -> bool {
        use FetchState::*;
        matches!(
            (self, next),
            (Pending, Fetching)
                | (Pending, Complete)
                | (Fetching, Complete)
                | (Fetching, Failed)
                | (Failed, Pending)
                // verification can still demote a fetched fragment
                | (Complete, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FetchState::Pending => "Pending",
            FetchState::Fetching => "Fetching",
            FetchState::Complete => "Complete",
            FetchState::Failed => "Failed",
        }
    }
}

impl fmt::Display for FetchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    /// Reference as written in the child playlist.
    pub original: String,
    /// Title-root-relative location, `m3u8/<variant>/<file>`.
    pub rewritten: String,
    pub remote: Url,
    pub kind: SegmentKind,
    pub is_init: bool,
    /// Known byte length: announced by the server or recorded by a previous
    /// run that verified the file.
    pub expected_len: Option<u64>,
    state: FetchState,
    attempts: u32,
    last_error: Option<String>,
}

impl Fragment {
    pub fn new(original: String, rewritten: String, remote: Url, is_init: bool) -> Self {
        let kind = SegmentKind::detect(&rewritten, is_init);
        Self {
            original,
            rewritten,
            remote,
            kind,
            is_init,
            expected_len: None,
            state: FetchState::Pending,
            attempts: 0,
            last_error: None,
        }
    }

    pub fn state(&self) -> FetchState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// File name part of the rewritten reference, used in reports.
    pub fn file_name(&self) -> &str {
        self.rewritten
            .rsplit_once('/')
            .map_or(self.rewritten.as_str(), |(_, name)| name)
    }

    fn transition(&mut self, next: FetchState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid fragment transition {} -> {}",
            self.state,
            next
        );
        self.state = next;
    }

    /// `Pending -> Fetching`, counting the attempt.
    pub fn begin_attempt(&mut self) {
        self.transition(FetchState::Fetching);
        self.attempts += 1;
    }

    /// `Fetching -> Complete`.
    pub fn complete(&mut self, declared_len: Option<u64>) {
        self.transition(FetchState::Complete);
        if declared_len.is_some() {
            self.expected_len = declared_len;
        }
        self.last_error = None;
    }

    /// `Fetching -> Failed` or, after verification, `Complete -> Failed`.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.transition(FetchState::Failed);
        self.last_error = Some(reason.into());
    }

    /// `Failed -> Pending` before another attempt.
    pub fn requeue(&mut self) {
        self.transition(FetchState::Pending);
    }

    /// `Pending -> Complete` for a file kept from an earlier run.
    pub fn reuse(&mut self, len: u64) {
        self.transition(FetchState::Complete);
        self.expected_len = Some(len);
    }
}

/// One child playlist of a title: a variant stream or a rendition.
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    /// Name of the directory holding the child, or a descriptive name when excluded.
    pub label: String,
    pub kind: StreamKind,
    pub family: CodecFamily,
    /// Reference as found in the top manifest.
    pub original: String,
    /// Title-root-relative location of the child manifest. `None` for
    /// excluded variants, which are never rewritten.
    pub rewritten: Option<String>,
    pub remote: Option<Url>,
    /// Decided by the classifier, fixed for the run.
    pub included: bool,
    pub fragments: Vec<Fragment>,
    /// Why the child manifest could not be used, if it could not.
    pub problem: Option<String>,
}

impl Variant {
    pub fn is_fetchable(&self) -> bool {
        self.included && self.problem.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Title {
    pub id: String,
    pub metadata: Metadata,
    pub variants: Vec<Variant>,
}

impl Title {
    pub fn included_mut(&mut self) -> impl Iterator<Item = &mut Variant> {
        self.variants.iter_mut().filter(|v| v.included)
    }
}

/// Title ids become directory names, so they must be a single plain path segment.
pub fn validate_title_id(id: &str) -> Result<(), String> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err("title id is empty".to_string());
    }
    if trimmed != id {
        return Err(format!("title id `{id}` has surrounding whitespace"));
    }
    if id == "." || id == ".." || id.contains(['/', '\\', '\0']) {
        return Err(format!("title id `{id}` is not a plain directory name"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment() -> Fragment {
        Fragment::new(
            "video1.m4s".into(),
            "m3u8/720p/video1.m4s".into(),
            Url::parse("https://cdn.example.com/720p/video1.m4s").unwrap(),
            false,
        )
    }

    #[test]
    fn test_state_machine_happy_path() {
        let mut f = fragment();
        assert_eq!(f.state(), FetchState::Pending);
        assert_eq!(f.kind, SegmentKind::Fmp4Media);
        f.begin_attempt();
        assert_eq!(f.state(), FetchState::Fetching);
        f.complete(Some(2048));
        assert_eq!(f.state(), FetchState::Complete);
        assert_eq!(f.expected_len, Some(2048));
        assert_eq!(f.attempts(), 1);
    }

    #[test]
    fn test_state_machine_retry_path() {
        let mut f = fragment();
        f.begin_attempt();
        f.fail("HTTP 500");
        assert_eq!(f.state(), FetchState::Failed);
        assert_eq!(f.last_error(), Some("HTTP 500"));
        f.requeue();
        f.begin_attempt();
        f.complete(None);
        assert_eq!(f.attempts(), 2);
        assert_eq!(f.last_error(), None);
        assert_eq!(f.expected_len, None);
    }

    #[test]
    fn test_transition_table() {
        use FetchState::*;
        assert!(Pending.can_transition_to(Fetching));
        assert!(Failed.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Failed));
        assert!(!Complete.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Complete));
    }

    #[test]
    fn test_file_name() {
        assert_eq!(fragment().file_name(), "video1.m4s");
    }

    #[test]
    fn test_validate_title_id() {
        assert!(validate_title_id("12345").is_ok());
        assert!(validate_title_id("abc-def_1").is_ok());
        assert!(validate_title_id("").is_err());
        assert!(validate_title_id("..").is_err());
        assert!(validate_title_id("a/b").is_err());
        assert!(validate_title_id(" 1").is_err());
    }
}
