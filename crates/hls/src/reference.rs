//! Helpers for the path part of playlist references.
//!
//! References are either relative paths (`1080p/video.m3u8`) or absolute URLs.
//! Everything here is string-level: query strings and fragments are dropped and
//! `.`/`..`/empty segments are removed so a normalized path never escapes the
//! directory it is placed under.

/// True for `scheme://...` references.
pub fn is_absolute(reference: &str) -> bool {
    reference
        .split_once("://")
        .is_some_and(|(scheme, _)| !scheme.is_empty() && !scheme.contains('/'))
}

/// The path portion of a reference: host removed for absolute URLs, query and
/// fragment removed for both.
pub fn path_part(reference: &str) -> &str {
    let reference = reference.trim();
    let without_query = reference
        .split(['?', '#'])
        .next()
        .unwrap_or(reference);

    if is_absolute(without_query) {
        let after_scheme = without_query
            .split_once("://")
            .map_or(without_query, |(_, rest)| rest);
        after_scheme.find('/').map_or("", |i| &after_scheme[i..])
    } else {
        without_query
    }
}

/// Path segments with `.`, `..` and empty segments removed.
pub fn normalized_segments(reference: &str) -> Vec<&str> {
    path_part(reference)
        .split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .collect()
}

/// Last path segment.
pub fn file_name(reference: &str) -> Option<&str> {
    normalized_segments(reference).pop()
}

/// The directory segment that names a variant: the first segment of a relative
/// reference, or the parent of the file for an absolute one.
pub fn leading_directory(reference: &str) -> Option<&str> {
    let segments = normalized_segments(reference);
    if segments.len() < 2 {
        return None;
    }
    if is_absolute(reference) {
        segments.get(segments.len() - 2).copied()
    } else {
        segments.first().copied()
    }
}

/// Lower-cased extension of the file name, if any.
pub fn extension(reference: &str) -> Option<String> {
    let name = file_name(reference)?;
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
