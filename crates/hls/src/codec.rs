//! Codec family detection for master playlist variants.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::attributes::StreamInfo;
use crate::reference;

/// `vp09` followed by a dotted profile/level/bit-depth suffix, e.g. `vp09.00.10.08`.
static VP9_CODEC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^vp09(\.\d{1,2}){2,}").unwrap());

/// `avc1`/`avc3` followed by the hex profile-compat-level triplet, e.g. `avc1.640028`.
static AVC_CODEC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^avc[13]\.[0-9a-f]{4,6}$").unwrap());

/// Directory prefix used for VP9 renditions when the playlist omits `CODECS`.
pub const VP9_DIR_PREFIX: &str = "vp9_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CodecFamily {
    H264,
    Vp9,
    Unknown,
}

impl CodecFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodecFamily::H264 => "H264",
            CodecFamily::Vp9 => "VP9",
            CodecFamily::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for CodecFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying one variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub family: CodecFamily,
    pub retained: bool,
}

/// Decides the codec family of a variant and whether the run keeps it.
///
/// Precedence: VP9 codec tag, then VP9 directory prefix, then AVC codec tag,
/// then `Unknown`. Unknown variants are always retained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VariantClassifier {
    exclude_vp9: bool,
}

impl VariantClassifier {
    pub fn new(exclude_vp9: bool) -> Self {
        Self { exclude_vp9 }
    }

    pub fn excludes_vp9(&self) -> bool {
        self.exclude_vp9
    }

    pub fn family(reference: &str, stream_info: Option<&StreamInfo>) -> CodecFamily {
        let codecs = stream_info.map(StreamInfo::codecs).unwrap_or_default();

        if codecs.iter().any(|c| VP9_CODEC.is_match(c)) {
            return CodecFamily::Vp9;
        }

        if reference::leading_directory(reference)
            .is_some_and(|dir| dir.to_ascii_lowercase().starts_with(VP9_DIR_PREFIX))
        {
            return CodecFamily::Vp9;
        }

        if codecs.iter().any(|c| AVC_CODEC.is_match(c)) {
            return CodecFamily::H264;
        }

        CodecFamily::Unknown
    }

    pub fn is_retained(&self, family: CodecFamily) -> bool {
        !(self.exclude_vp9 && family == CodecFamily::Vp9)
    }

    pub fn classify(&self, reference: &str, stream_info: Option<&StreamInfo>) -> Classification {
        let family = Self::family(reference, stream_info);
        Classification {
            family,
            retained: self.is_retained(family),
        }
    }
}
