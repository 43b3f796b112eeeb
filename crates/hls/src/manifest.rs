//! Lossless line model of an HLS playlist.
//!
//! A [`Manifest`] keeps every line of the source together with its exact line
//! terminator, so `Manifest::parse(text)?.serialize() == text` for any input that
//! parses. Only reference lines and the `URI` attribute of `#EXT-X-MAP`,
//! `#EXT-X-MEDIA` and `#EXT-X-I-FRAME-STREAM-INF` are ever changed by the
//! transformations in this crate.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::attributes::{AttributeList, StreamInfo};
use crate::error::ManifestError;

pub const STREAM_INF_TAG: &str = "#EXT-X-STREAM-INF";
pub const MAP_TAG: &str = "#EXT-X-MAP";
pub const MEDIA_TAG: &str = "#EXT-X-MEDIA";
pub const I_FRAME_STREAM_INF_TAG: &str = "#EXT-X-I-FRAME-STREAM-INF";

/// Tags whose `URI` attribute points at another file.
const URI_TAGS: [&str; 3] = [MAP_TAG, MEDIA_TAG, I_FRAME_STREAM_INF_TAG];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    /// Last line without a terminator.
    None,
    Lf,
    CrLf,
}

impl LineEnding {
    pub fn as_str(self) -> &'static str {
        match self {
            LineEnding::None => "",
            LineEnding::Lf => "\n",
            LineEnding::CrLf => "\r\n",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Blank,
    /// `#EXT...`
    Tag,
    /// Any other `#` line.
    Comment,
    /// A path or URL to a child playlist or media fragment.
    Reference,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    text: String,
    ending: LineEnding,
    kind: LineKind,
}

impl Line {
    fn new(text: &str, ending: LineEnding) -> Self {
        Self {
            text: text.to_string(),
            ending,
            kind: Self::classify(text),
        }
    }

    fn classify(text: &str) -> LineKind {
        let trimmed = text.trim_start_matches('\u{feff}').trim();
        if trimmed.is_empty() {
            LineKind::Blank
        } else if trimmed.starts_with("#EXT") {
            LineKind::Tag
        } else if trimmed.starts_with('#') {
            LineKind::Comment
        } else {
            LineKind::Reference
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn kind(&self) -> LineKind {
        self.kind
    }

    pub fn ending(&self) -> LineEnding {
        self.ending
    }

    pub fn reference(&self) -> Option<&str> {
        (self.kind == LineKind::Reference).then(|| self.text.trim())
    }

    /// Tag name without the attribute part, e.g. `#EXT-X-STREAM-INF`.
    pub fn tag_name(&self) -> Option<&str> {
        if self.kind != LineKind::Tag {
            return None;
        }
        let trimmed = self.text.trim_start_matches('\u{feff}').trim();
        Some(trimmed.split_once(':').map_or(trimmed, |(name, _)| name))
    }

    /// Everything after the first colon of a tag line.
    pub fn tag_value(&self) -> Option<&str> {
        if self.kind != LineKind::Tag {
            return None;
        }
        self.text.trim().split_once(':').map(|(_, value)| value)
    }

    fn is_tag(&self, name: &str) -> bool {
        self.tag_name() == Some(name)
    }

    /// `URI` attribute of an `#EXT-X-MAP` line.
    pub fn map_uri(&self) -> Option<String> {
        if !self.is_tag(MAP_TAG) {
            return None;
        }
        self.uri()
    }

    /// `URI` attribute of any tag that references a file.
    pub fn uri(&self) -> Option<String> {
        let name = self.tag_name()?;
        if !URI_TAGS.contains(&name) {
            return None;
        }
        AttributeList::parse(self.tag_value()?)
            .get("URI")
            .map(str::to_string)
    }
}

/// What a child playlist of a master playlist carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// An `#EXT-X-STREAM-INF` variant.
    #[default]
    Main,
    Audio,
    Video,
    Subtitles,
    /// An `#EXT-X-I-FRAME-STREAM-INF` trick-play playlist.
    IFrame,
    Other,
}

impl StreamKind {
    fn from_media_type(media_type: Option<&str>) -> Self {
        match media_type.map(str::to_ascii_uppercase).as_deref() {
            Some("AUDIO") => StreamKind::Audio,
            Some("VIDEO") => StreamKind::Video,
            Some("SUBTITLES") => StreamKind::Subtitles,
            _ => StreamKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Main => "main",
            StreamKind::Audio => "audio",
            StreamKind::Video => "video",
            StreamKind::Subtitles => "subtitles",
            StreamKind::IFrame => "iframe",
            StreamKind::Other => "other",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A child playlist referenced through a tag's `URI` attribute: an
/// `#EXT-X-MEDIA` rendition or an `#EXT-X-I-FRAME-STREAM-INF` stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenditionEntry {
    /// Position among the renditions of the playlist, starting at 0.
    pub ordinal: usize,
    /// Index of the tag line.
    pub line: usize,
    pub kind: StreamKind,
    pub reference: String,
    /// Attributes of the tag (`TYPE`, `NAME`, `CODECS`, ...).
    pub stream_info: StreamInfo,
}

impl RenditionEntry {
    pub fn name(&self) -> Option<&str> {
        self.stream_info.attributes().get("NAME")
    }
}

/// One `#EXT-X-STREAM-INF` block of a master playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantEntry {
    /// Position among the variants of the playlist, starting at 0.
    pub ordinal: usize,
    /// Index of the stream-info tag line.
    pub info_line: usize,
    /// Index of the reference line that follows it.
    pub reference_line: usize,
    pub reference: String,
    pub stream_info: StreamInfo,
}

impl VariantEntry {
    /// The stream-info tag line and the reference line.
    pub fn lines(&self) -> [usize; 2] {
        [self.info_line, self.reference_line]
    }
}

/// A fragment reference inside a media playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentEntry {
    pub line: usize,
    pub reference: String,
    /// Declared through `#EXT-X-MAP`.
    pub is_init: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Manifest {
    lines: Vec<Line>,
}

impl Manifest {
    /// Parses playlist text. Fails when a stream-info tag is not immediately
    /// followed by a reference line.
    pub fn parse(raw: &str) -> Result<Self, ManifestError> {
        let lines = raw
            .split_inclusive('\n')
            .map(|piece| {
                if let Some(body) = piece.strip_suffix("\r\n") {
                    Line::new(body, LineEnding::CrLf)
                } else if let Some(body) = piece.strip_suffix('\n') {
                    Line::new(body, LineEnding::Lf)
                } else {
                    Line::new(piece, LineEnding::None)
                }
            })
            .collect();

        let manifest = Self { lines };
        manifest.check_structure()?;
        Ok(manifest)
    }

    fn check_structure(&self) -> Result<(), ManifestError> {
        for (i, line) in self.lines.iter().enumerate() {
            if line.is_tag(MAP_TAG) && line.map_uri().is_none() {
                return Err(ManifestError::InvalidAttribute {
                    line: i + 1,
                    tag: MAP_TAG,
                    attribute: "URI",
                });
            }
            if !line.is_tag(STREAM_INF_TAG) {
                continue;
            }
            match self.lines.get(i + 1) {
                Some(next) if next.kind == LineKind::Reference => {}
                Some(next) => {
                    return Err(ManifestError::malformed(
                        i + 2,
                        format!(
                            "expected a variant reference after {STREAM_INF_TAG}, found {:?} line `{}`",
                            next.kind,
                            next.text.trim()
                        ),
                    ));
                }
                None => {
                    return Err(ManifestError::malformed(
                        i + 1,
                        format!("{STREAM_INF_TAG} at end of playlist without a reference"),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn serialize(&self) -> String {
        let mut out = String::with_capacity(self.lines.iter().map(|l| l.text.len() + 2).sum());
        for line in &self.lines {
            out.push_str(&line.text);
            out.push_str(line.ending.as_str());
        }
        out
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    /// A master playlist is one that declares at least one variant stream.
    pub fn is_master(&self) -> bool {
        self.lines.iter().any(|l| l.is_tag(STREAM_INF_TAG))
    }

    /// Reference lines as `(line index, reference)`.
    pub fn references(&self) -> impl Iterator<Item = (usize, &str)> {
        self.lines
            .iter()
            .enumerate()
            .filter_map(|(i, l)| l.reference().map(|r| (i, r)))
    }

    pub fn variants(&self) -> Vec<VariantEntry> {
        let mut variants = Vec::new();
        for (i, line) in self.lines.iter().enumerate() {
            if !line.is_tag(STREAM_INF_TAG) {
                continue;
            }
            // Guaranteed by `check_structure`.
            let Some(reference) = self.lines.get(i + 1).and_then(Line::reference) else {
                continue;
            };
            variants.push(VariantEntry {
                ordinal: variants.len(),
                info_line: i,
                reference_line: i + 1,
                reference: reference.to_string(),
                stream_info: StreamInfo::parse(line.tag_value().unwrap_or_default()),
            });
        }
        variants
    }

    /// `#EXT-X-MEDIA` renditions with a `URI` and I-frame streams, in playlist
    /// order. Renditions without a `URI` live inside the variant streams.
    pub fn renditions(&self) -> Vec<RenditionEntry> {
        let mut renditions = Vec::new();
        for (i, line) in self.lines.iter().enumerate() {
            let kind = match line.tag_name() {
                Some(MEDIA_TAG) => None,
                Some(I_FRAME_STREAM_INF_TAG) => Some(StreamKind::IFrame),
                _ => continue,
            };
            let Some(reference) = line.uri() else {
                continue;
            };
            let stream_info = StreamInfo::parse(line.tag_value().unwrap_or_default());
            let kind = kind.unwrap_or_else(|| {
                StreamKind::from_media_type(stream_info.attributes().get("TYPE"))
            });
            renditions.push(RenditionEntry {
                ordinal: renditions.len(),
                line: i,
                kind,
                reference,
                stream_info,
            });
        }
        renditions
    }

    /// Init segments (`#EXT-X-MAP`) and media fragments in playlist order.
    pub fn fragments(&self) -> Vec<FragmentEntry> {
        self.lines
            .iter()
            .enumerate()
            .filter_map(|(i, line)| {
                if let Some(uri) = line.map_uri() {
                    Some(FragmentEntry {
                        line: i,
                        reference: uri,
                        is_init: true,
                    })
                } else {
                    line.reference().map(|r| FragmentEntry {
                        line: i,
                        reference: r.to_string(),
                        is_init: false,
                    })
                }
            })
            .collect()
    }

    /// Returns a copy with every reference line, and every tag `URI`, passed
    /// through `f` together with its line index. All other lines are copied verbatim.
    pub fn map_references<F>(&self, mut f: F) -> Manifest
    where
        F: FnMut(usize, &str) -> String,
    {
        let lines = self
            .lines
            .iter()
            .enumerate()
            .map(|(i, line)| {
                if let Some(reference) = line.reference() {
                    Line {
                        text: f(i, reference),
                        ending: line.ending,
                        kind: LineKind::Reference,
                    }
                } else if let Some(uri) = line.uri() {
                    let rewritten = f(i, &uri);
                    Line {
                        text: rewrite_uri(&line.text, &rewritten),
                        ending: line.ending,
                        kind: LineKind::Tag,
                    }
                } else {
                    line.clone()
                }
            })
            .collect();
        Manifest { lines }
    }

    /// Returns a copy without the lines at the given indices.
    pub fn without_lines(&self, dropped: impl IntoIterator<Item = usize>) -> Manifest {
        let skip: HashSet<usize> = dropped.into_iter().collect();
        Manifest {
            lines: self
                .lines
                .iter()
                .enumerate()
                .filter(|(i, _)| !skip.contains(i))
                .map(|(_, l)| l.clone())
                .collect(),
        }
    }
}

fn rewrite_uri(text: &str, uri: &str) -> String {
    let Some((head, value)) = text.split_once(':') else {
        return text.to_string();
    };
    AttributeList::parse(value)
        .replace("URI", uri)
        .map_or_else(|| text.to_string(), |v| format!("{head}:{v}"))
}

impl fmt::Display for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            f.write_str(&line.text)?;
            f.write_str(line.ending.as_str())?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Manifest {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
