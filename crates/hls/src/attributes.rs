//! Attribute lists as found after the colon of `#EXT-X-STREAM-INF`, `#EXT-X-MAP`
//! and friends: `KEY=value,KEY="quoted, value"`.

use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Attribute {
    key: String,
    /// Byte range of the raw value (quotes included) inside the source text.
    value: Range<usize>,
}

/// A parsed attribute list that remembers where each value sits in the source,
/// so a single value can be replaced without touching the rest of the text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeList {
    source: String,
    attributes: Vec<Attribute>,
}

impl AttributeList {
    /// Parses an attribute list. Commas inside double quotes do not split pairs.
    /// Pairs without `=` are ignored.
    pub fn parse(input: &str) -> Self {
        let mut attributes = Vec::new();
        let mut start = 0;
        let mut in_quotes = false;

        for (i, c) in input.char_indices() {
            match c {
                '"' => in_quotes = !in_quotes,
                ',' if !in_quotes => {
                    if let Some(attr) = Self::parse_pair(input, start..i) {
                        attributes.push(attr);
                    }
                    start = i + 1;
                }
                _ => {}
            }
        }
        if let Some(attr) = Self::parse_pair(input, start..input.len()) {
            attributes.push(attr);
        }

        Self {
            source: input.to_string(),
            attributes,
        }
    }

    fn parse_pair(input: &str, span: Range<usize>) -> Option<Attribute> {
        let pair = &input[span.clone()];
        let eq = pair.find('=')?;
        let key = pair[..eq].trim();
        if key.is_empty() {
            return None;
        }

        let raw_value = &pair[eq + 1..];
        let leading = raw_value.len() - raw_value.trim_start().len();
        let trailing = raw_value.len() - raw_value.trim_end().len();
        let value_start = span.start + eq + 1 + leading;
        let value_end = span.end - trailing;

        Some(Attribute {
            key: key.to_ascii_uppercase(),
            value: value_start..value_end.max(value_start),
        })
    }

    /// Returns the value for `key` (case-insensitive) with surrounding quotes removed.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.raw(key).map(unquote)
    }

    fn raw(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| attr.key.eq_ignore_ascii_case(key))
            .map(|attr| &self.source[attr.value.clone()])
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(|attr| attr.key.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Returns the source text with the value of `key` replaced by `value`, keeping
    /// the original quoting style. `None` when the key is absent.
    pub fn replace(&self, key: &str, value: &str) -> Option<String> {
        let attr = self
            .attributes
            .iter()
            .find(|attr| attr.key.eq_ignore_ascii_case(key))?;
        let raw = &self.source[attr.value.clone()];
        let replacement = if raw.starts_with('"') {
            format!("\"{value}\"")
        } else {
            value.to_string()
        };

        let mut out = String::with_capacity(self.source.len() + replacement.len());
        out.push_str(&self.source[..attr.value.start]);
        out.push_str(&replacement);
        out.push_str(&self.source[attr.value.end..]);
        Some(out)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

fn unquote(raw: &str) -> &str {
    raw.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(raw)
}

/// Typed view over the attributes of an `#EXT-X-STREAM-INF` tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    attributes: AttributeList,
}

impl StreamInfo {
    pub fn parse(input: &str) -> Self {
        Self {
            attributes: AttributeList::parse(input),
        }
    }

    pub fn attributes(&self) -> &AttributeList {
        &self.attributes
    }

    /// Individual entries of the `CODECS` attribute, trimmed.
    pub fn codecs(&self) -> Vec<&str> {
        self.attributes
            .get("CODECS")
            .map(|codecs| {
                codecs
                    .split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn bandwidth(&self) -> Option<u64> {
        self.attributes.get("BANDWIDTH")?.trim().parse().ok()
    }

    /// `(width, height)` from `RESOLUTION=WxH`.
    pub fn resolution(&self) -> Option<(u32, u32)> {
        let (w, h) = self.attributes.get("RESOLUTION")?.split_once(['x', 'X'])?;
        Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
    }

    pub fn frame_rate(&self) -> Option<f64> {
        self.attributes.get("FRAME-RATE")?.trim().parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoted_commas_do_not_split() {
        let list = AttributeList::parse(
            r#"BANDWIDTH=2560000,CODECS="avc1.640028,mp4a.40.2",RESOLUTION=1920x1080"#,
        );
        assert_eq!(list.get("CODECS"), Some("avc1.640028,mp4a.40.2"));
        assert_eq!(list.get("bandwidth"), Some("2560000"));
        assert_eq!(list.keys().count(), 3);
    }

    #[test]
    fn test_replace_keeps_everything_else() {
        let src = r#"URI="init.mp4",BYTERANGE="720@0""#;
        let list = AttributeList::parse(src);
        assert_eq!(
            list.replace("URI", "m3u8/1080p/init.mp4").as_deref(),
            Some(r#"URI="m3u8/1080p/init.mp4",BYTERANGE="720@0""#)
        );
        assert_eq!(list.replace("KEYFORMAT", "x"), None);
    }

    #[test]
    fn test_replace_unquoted_value() {
        let list = AttributeList::parse("BANDWIDTH=1,AUDIO=aac");
        assert_eq!(
            list.replace("AUDIO", "opus").as_deref(),
            Some("BANDWIDTH=1,AUDIO=opus")
        );
    }

    #[test]
    fn test_stream_info_accessors() {
        let info = StreamInfo::parse(
            r#"BANDWIDTH=1280000,CODECS="vp09.00.10.08, opus",RESOLUTION=1280x720,FRAME-RATE=59.940"#,
        );
        assert_eq!(info.codecs(), vec!["vp09.00.10.08", "opus"]);
        assert_eq!(info.bandwidth(), Some(1_280_000));
        assert_eq!(info.resolution(), Some((1280, 720)));
        assert_eq!(info.frame_rate(), Some(59.94));
    }

    #[test]
    fn test_missing_attributes() {
        let info = StreamInfo::parse("BANDWIDTH=abc");
        assert!(info.codecs().is_empty());
        assert_eq!(info.bandwidth(), None);
        assert_eq!(info.resolution(), None);
    }
}
