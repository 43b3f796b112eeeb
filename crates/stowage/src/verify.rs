//! Fragment completeness verification.
//!
//! With a known length the on-disk size must match it exactly. Without one the
//! file must be non-empty and structurally whole for its container format.

use std::fmt;
use std::io::ErrorKind;
use std::path::Path;

use hls::{PathRewriter, SegmentKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::{FetchState, Fragment, Variant};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum VerifyFailure {
    /// No file at the rewritten location.
    Missing,
    /// Length differs from the expected one and is not a short read.
    SizeMismatch { expected: u64, actual: u64 },
    /// Shorter than expected, empty, or cut off mid-structure.
    Truncated {
        expected: Option<u64>,
        actual: u64,
        detail: Option<String>,
    },
}

impl VerifyFailure {
    pub fn name(&self) -> &'static str {
        match self {
            VerifyFailure::Missing => "Missing",
            VerifyFailure::SizeMismatch { .. } => "SizeMismatch",
            VerifyFailure::Truncated { .. } => "Truncated",
        }
    }
}

impl fmt::Display for VerifyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyFailure::Missing => f.write_str("Missing"),
            VerifyFailure::SizeMismatch { expected, actual } => {
                write!(f, "SizeMismatch (expected {expected} bytes, found {actual})")
            }
            VerifyFailure::Truncated {
                expected: Some(expected),
                actual,
                ..
            } => write!(f, "Truncated ({actual} of {expected} bytes)"),
            VerifyFailure::Truncated {
                actual,
                detail: Some(detail),
                ..
            } => write!(f, "Truncated ({actual} bytes: {detail})"),
            VerifyFailure::Truncated { actual, .. } => write!(f, "Truncated ({actual} bytes)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// On-disk length of the verified file.
    Complete { len: u64 },
    Failed(VerifyFailure),
}

impl Verification {
    pub fn is_complete(&self) -> bool {
        matches!(self, Verification::Complete { .. })
    }
}

/// Decides completeness from an on-disk length, without reading the file.
pub fn check_length(expected: u64, actual: u64) -> Verification {
    if actual == expected {
        Verification::Complete { len: actual }
    } else if actual < expected {
        Verification::Failed(VerifyFailure::Truncated {
            expected: Some(expected),
            actual,
            detail: None,
        })
    } else {
        Verification::Failed(VerifyFailure::SizeMismatch { expected, actual })
    }
}

/// Verifies one file on disk.
pub async fn verify_file(path: &Path, kind: SegmentKind, expected: Option<u64>) -> Verification {
    let actual = match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => meta.len(),
        Ok(_) => return Verification::Failed(VerifyFailure::Missing),
        Err(e) => {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "Cannot stat fragment");
            }
            return Verification::Failed(VerifyFailure::Missing);
        }
    };

    if let Some(expected) = expected {
        return check_length(expected, actual);
    }

    if actual == 0 {
        return Verification::Failed(VerifyFailure::Truncated {
            expected: None,
            actual,
            detail: Some("empty file".to_string()),
        });
    }
    if kind == SegmentKind::Other {
        return Verification::Complete { len: actual };
    }

    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cannot read fragment");
            return Verification::Failed(VerifyFailure::Missing);
        }
    };
    match hls::check_structure(kind, &data) {
        Ok(()) => Verification::Complete { len: actual },
        Err(e) => Verification::Failed(VerifyFailure::Truncated {
            expected: None,
            actual,
            detail: Some(e.to_string()),
        }),
    }
}

/// Verifies a fragment at its rewritten location under `title_root`.
pub async fn verify_fragment(
    rewriter: &PathRewriter,
    title_root: &Path,
    fragment: &Fragment,
) -> Verification {
    let path = rewriter.local_path(title_root, &fragment.rewritten);
    verify_file(&path, fragment.kind, fragment.expected_len).await
}

/// A fragment that kept its variant from being complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentProblem {
    /// Rewritten reference.
    pub fragment: String,
    pub state: FetchState,
    pub reason: String,
}

impl fmt::Display for FragmentProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self
            .fragment
            .rsplit_once('/')
            .map_or(self.fragment.as_str(), |(_, name)| name);
        write!(f, "{name}: {} ({})", self.state, self.reason)
    }
}

/// Verifies every fragment of a variant once all its fetches have settled.
///
/// Fragments whose fetch failed are reported with the fetch error. Fetched
/// fragments that do not verify move to `Failed`. Returns the problems in
/// playlist order; empty means the variant is complete.
pub async fn verify_variant(
    rewriter: &PathRewriter,
    title_root: &Path,
    variant: &mut Variant,
) -> Vec<FragmentProblem> {
    let mut problems = Vec::new();

    for fragment in &mut variant.fragments {
        let verification = verify_fragment(rewriter, title_root, fragment).await;

        match (fragment.state(), verification) {
            (FetchState::Complete, Verification::Complete { len }) => {
                fragment.expected_len = Some(len);
            }
            (FetchState::Complete, Verification::Failed(failure)) => {
                debug!(fragment = %fragment.rewritten, %failure, "Fetched fragment failed verification");
                fragment.fail(failure.to_string());
                problems.push(FragmentProblem {
                    fragment: fragment.rewritten.clone(),
                    state: FetchState::Failed,
                    reason: failure.to_string(),
                });
            }
            (FetchState::Failed, _) => problems.push(FragmentProblem {
                fragment: fragment.rewritten.clone(),
                state: FetchState::Failed,
                reason: fragment
                    .last_error()
                    .unwrap_or("fetch failed")
                    .to_string(),
            }),
            // never attempted (cancelled run): a leftover file is not trusted
            (state, verification) => {
                let reason = match verification {
                    Verification::Failed(failure) => failure.to_string(),
                    Verification::Complete { .. } => "not fetched in this run".to_string(),
                };
                problems.push(FragmentProblem {
                    fragment: fragment.rewritten.clone(),
                    state,
                    reason,
                });
            }
        }
    }

    problems
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn fragment(name: &str, expected: Option<u64>) -> Fragment {
        let mut f = Fragment::new(
            name.to_string(),
            format!("m3u8/720p/{name}"),
            Url::parse(&format!("https://cdn.example.com/{name}")).unwrap(),
            false,
        );
        f.expected_len = expected;
        f
    }

    fn mdat(body_len: usize) -> Vec<u8> {
        let mut out = ((body_len + 8) as u32).to_be_bytes().to_vec();
        out.extend_from_slice(b"mdat");
        out.extend(std::iter::repeat_n(7u8, body_len));
        out
    }

    #[test]
    fn test_check_length() {
        assert_eq!(check_length(10, 10), Verification::Complete { len: 10 });
        assert_eq!(
            check_length(204_800, 150_000),
            Verification::Failed(VerifyFailure::Truncated {
                expected: Some(204_800),
                actual: 150_000,
                detail: None
            })
        );
        assert_eq!(
            check_length(10, 11),
            Verification::Failed(VerifyFailure::SizeMismatch {
                expected: 10,
                actual: 11
            })
        );
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let v = verify_file(&dir.path().join("nope.m4s"), SegmentKind::Fmp4Media, None).await;
        assert_eq!(v, Verification::Failed(VerifyFailure::Missing));

        // a directory at the fragment path is not a fragment
        let v = verify_file(dir.path(), SegmentKind::Other, None).await;
        assert_eq!(v, Verification::Failed(VerifyFailure::Missing));
    }

    #[tokio::test]
    async fn test_known_length_short_file_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video1.m4s");
        tokio::fs::write(&path, vec![0u8; 150_000]).await.unwrap();

        let v = verify_file(&path, SegmentKind::Fmp4Media, Some(204_800)).await;
        assert!(matches!(
            v,
            Verification::Failed(VerifyFailure::Truncated {
                expected: Some(204_800),
                actual: 150_000,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_unknown_length_uses_structure() {
        let dir = tempfile::tempdir().unwrap();
        let whole = dir.path().join("whole.m4s");
        tokio::fs::write(&whole, mdat(64)).await.unwrap();
        assert_eq!(
            verify_file(&whole, SegmentKind::Fmp4Media, None).await,
            Verification::Complete { len: 72 }
        );

        let mut cut_bytes = mdat(64);
        cut_bytes.truncate(40);
        let cut = dir.path().join("cut.m4s");
        tokio::fs::write(&cut, cut_bytes).await.unwrap();
        let v = verify_file(&cut, SegmentKind::Fmp4Media, None).await;
        assert!(matches!(
            v,
            Verification::Failed(VerifyFailure::Truncated {
                expected: None,
                actual: 40,
                detail: Some(_)
            })
        ));

        let empty = dir.path().join("empty.bin");
        tokio::fs::write(&empty, b"").await.unwrap();
        assert!(!verify_file(&empty, SegmentKind::Other, None).await.is_complete());
    }

    #[tokio::test]
    async fn test_verify_variant_reports_each_problem() {
        let dir = tempfile::tempdir().unwrap();
        let rewriter = PathRewriter::default();
        let root = dir.path();
        let variant_dir = root.join("m3u8/720p");
        tokio::fs::create_dir_all(&variant_dir).await.unwrap();
        tokio::fs::write(variant_dir.join("video1.m4s"), mdat(10)).await.unwrap();
        tokio::fs::write(variant_dir.join("video3.m4s"), vec![0u8; 5]).await.unwrap();

        let mut ok = fragment("video1.m4s", None);
        ok.begin_attempt();
        ok.complete(None);

        let mut failed = fragment("video2.m4s", None);
        failed.begin_attempt();
        failed.fail("HTTP 500");

        let mut short = fragment("video3.m4s", None);
        short.begin_attempt();
        short.complete(Some(10));

        let mut variant = Variant {
            label: "720p".into(),
            kind: hls::StreamKind::Main,
            family: hls::CodecFamily::H264,
            original: "720p/video.m3u8".into(),
            rewritten: Some("m3u8/720p/video.m3u8".into()),
            remote: None,
            included: true,
            fragments: vec![ok, failed, short],
            problem: None,
        };

        let problems = verify_variant(&rewriter, root, &mut variant).await;
        assert_eq!(problems.len(), 2);
        assert_eq!(problems[0].to_string(), "video2.m4s: Failed (HTTP 500)");
        assert!(problems[1].reason.starts_with("Truncated"));
        assert_eq!(variant.fragments[0].expected_len, Some(18));
        assert_eq!(variant.fragments[2].state(), FetchState::Failed);
    }
}
