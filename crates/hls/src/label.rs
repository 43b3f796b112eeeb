//! Human-readable variant labels such as `1080p`, `vp9_720p` or `1080p60`.

use crate::attributes::StreamInfo;
use crate::codec::{CodecFamily, VP9_DIR_PREFIX};
use crate::manifest::{RenditionEntry, StreamKind, VariantEntry};
use crate::reference;

/// Height buckets used when a label has to be derived from `RESOLUTION`.
const HEIGHT_BUCKETS: &[(u32, &str)] = &[
    (240, "240p"),
    (360, "360p"),
    (480, "480p"),
    (720, "720p"),
    (1080, "1080p"),
    (1440, "1440p"),
];

const TOP_BUCKET: &str = "2160p";

/// Maps a pixel height to its quality bucket.
pub fn height_bucket(height: u32) -> &'static str {
    HEIGHT_BUCKETS
        .iter()
        .find(|(max, _)| height <= *max)
        .map_or(TOP_BUCKET, |(_, label)| label)
}

/// Label derived from stream info alone, e.g. `1080p60`.
pub fn quality_label(info: &StreamInfo) -> Option<String> {
    let (_, height) = info.resolution()?;
    let mut label = height_bucket(height).to_string();
    if let Some(fps) = info.frame_rate()
        && fps > 30.0
    {
        label.push_str(&(fps.round() as u32).to_string());
    }
    Some(label)
}

/// Label for a variant: its directory name when the reference has one, the
/// resolution bucket otherwise, and the ordinal as a last resort.
pub fn variant_label(entry: &VariantEntry, family: CodecFamily) -> String {
    if let Some(dir) = reference::leading_directory(&entry.reference) {
        return dir.to_string();
    }

    match quality_label(&entry.stream_info) {
        Some(quality) if family == CodecFamily::Vp9 => format!("{VP9_DIR_PREFIX}{quality}"),
        Some(quality) => quality,
        None => format!("variant{}", entry.ordinal),
    }
}

/// Label for an `#EXT-X-MEDIA` rendition or I-frame stream whose reference has
/// no directory: `audio_english`, `iframe_1080p`, or `audio1` without a name.
pub fn rendition_label(entry: &RenditionEntry) -> String {
    let detail = match entry.kind {
        StreamKind::IFrame => quality_label(&entry.stream_info),
        _ => entry.name().map(slug).filter(|name| !name.is_empty()),
    };
    match detail {
        Some(detail) => format!("{}_{detail}", entry.kind),
        None => format!("{}{}", entry.kind, entry.ordinal),
    }
}

fn slug(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(reference: &str, attrs: &str, ordinal: usize) -> VariantEntry {
        VariantEntry {
            ordinal,
            info_line: 0,
            reference_line: 1,
            reference: reference.to_string(),
            stream_info: StreamInfo::parse(attrs),
        }
    }

    #[test]
    fn test_height_bucket() {
        assert_eq!(height_bucket(144), "240p");
        assert_eq!(height_bucket(360), "360p");
        assert_eq!(height_bucket(404), "480p");
        assert_eq!(height_bucket(1080), "1080p");
        assert_eq!(height_bucket(1600), "2160p");
    }

    #[test]
    fn test_label_prefers_directory() {
        let e = entry("vp9_1080p/video.m3u8", "RESOLUTION=1920x1080", 0);
        assert_eq!(variant_label(&e, CodecFamily::Vp9), "vp9_1080p");
    }

    #[test]
    fn test_label_from_stream_info() {
        let e = entry("hi.m3u8", "RESOLUTION=1920x1080,FRAME-RATE=59.940", 0);
        assert_eq!(variant_label(&e, CodecFamily::H264), "1080p60");
        assert_eq!(variant_label(&e, CodecFamily::Vp9), "vp9_1080p60");

        let e = entry("lo.m3u8", "RESOLUTION=1280x720,FRAME-RATE=30.000", 1);
        assert_eq!(variant_label(&e, CodecFamily::Unknown), "720p");
    }

    fn rendition(kind: StreamKind, attrs: &str, ordinal: usize) -> RenditionEntry {
        RenditionEntry {
            ordinal,
            line: 0,
            kind,
            reference: "r.m3u8".to_string(),
            stream_info: StreamInfo::parse(attrs),
        }
    }

    #[test]
    fn test_rendition_label() {
        let audio = rendition(StreamKind::Audio, "TYPE=AUDIO,NAME=\"English (US)\"", 0);
        assert_eq!(rendition_label(&audio), "audio_english__us");

        let unnamed = rendition(StreamKind::Subtitles, "TYPE=SUBTITLES", 2);
        assert_eq!(rendition_label(&unnamed), "subtitles2");

        let iframe = rendition(StreamKind::IFrame, "BANDWIDTH=1,RESOLUTION=1280x720", 1);
        assert_eq!(rendition_label(&iframe), "iframe_720p");
    }

    #[test]
    fn test_label_fallback_to_ordinal() {
        let e = entry("a.m3u8", "BANDWIDTH=1", 3);
        assert_eq!(variant_label(&e, CodecFamily::Unknown), "variant3");
    }
}
