//! Relocation of playlist references into a title's on-disk layout.
//!
//! Every rewritten reference is relative to the title root and starts with the
//! media directory (`m3u8/` by default). Relative references keep their
//! directory structure, so a child playlist and its fragments move together.
//! Distinct references never share a local path: clashing names get a `_2`,
//! `_3`, ... suffix.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::manifest::{FragmentEntry, Manifest};
use crate::reference;

/// Directory under the title root that holds all playlists and fragments.
pub const DEFAULT_MEDIA_DIR: &str = "m3u8";

/// File name of the rewritten top-level playlist inside the media directory.
pub const TOP_PLAYLIST_NAME: &str = "playlist.m3u8";

/// A fragment reference before and after relocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenFragment {
    /// Reference exactly as found in the child playlist.
    pub original: String,
    /// Title-root-relative location, e.g. `m3u8/1080p/video1.m4s`.
    pub rewritten: String,
    pub is_init: bool,
}

/// A child playlist rewritten for a relocated variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenChild {
    /// Playlist text as stored next to its fragments: references are relative
    /// to the playlist's own directory.
    pub manifest: Manifest,
    /// Unique fragments in playlist order.
    pub fragments: Vec<RewrittenFragment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRewriter {
    media_dir: String,
}

impl Default for PathRewriter {
    fn default() -> Self {
        Self::new(DEFAULT_MEDIA_DIR)
    }
}

impl PathRewriter {
    pub fn new(media_dir: impl Into<String>) -> Self {
        Self {
            media_dir: media_dir.into().trim_matches('/').to_string(),
        }
    }

    pub fn media_dir(&self) -> &str {
        &self.media_dir
    }

    /// Title-root-relative location of the rewritten top-level playlist.
    pub fn top_playlist(&self) -> String {
        format!("{}/{TOP_PLAYLIST_NAME}", self.media_dir)
    }

    pub fn is_rewritten(&self, reference: &str) -> bool {
        reference
            .strip_prefix(self.media_dir.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Relocates a variant (child playlist) reference.
    ///
    /// `vp9_720p/video.m3u8` becomes `m3u8/vp9_720p/video.m3u8`. An absolute URL
    /// keeps its last directory and file name. A reference without any directory
    /// is placed in a directory named after its file stem so variants never share
    /// a fragment directory. Already rewritten references are returned unchanged.
    pub fn rewrite(&self, reference: &str) -> String {
        let reference = reference.trim();
        if self.is_rewritten(reference) {
            return reference.to_string();
        }

        let segments = reference::normalized_segments(reference);
        let kept: Vec<&str> = match segments.as_slice() {
            [] => vec!["index.m3u8"],
            [file] => {
                let stem = file.rsplit_once('.').map_or(*file, |(stem, _)| stem);
                if stem.trim_matches('.').is_empty() {
                    vec![*file]
                } else {
                    vec![stem, *file]
                }
            }
            _ if reference::is_absolute(reference) => segments[segments.len() - 2..].to_vec(),
            _ => segments,
        };

        format!("{}/{}", self.media_dir, kept.join("/"))
    }

    /// Relocates a fragment reference found inside the child playlist whose
    /// rewritten location is `child`. Relative references keep their structure
    /// below the child's directory; absolute URLs keep only the file name.
    pub fn rewrite_fragment(&self, child: &str, fragment: &str) -> String {
        let fragment = fragment.trim();
        if self.is_rewritten(fragment) {
            return fragment.to_string();
        }

        let segments = reference::normalized_segments(fragment);
        let kept: Vec<&str> = if reference::is_absolute(fragment) {
            segments.last().copied().into_iter().collect()
        } else {
            segments
        };

        let dir = parent_dir(child);
        if kept.is_empty() {
            return format!("{dir}/{}", sanitized_placeholder(fragment));
        }
        format!("{dir}/{}", kept.join("/"))
    }

    /// Relocates the references of a master playlist and drops the lines at
    /// `excluded`. `locations` maps line indices to the location assigned to
    /// that line's reference; other references go through [`PathRewriter::rewrite`].
    pub fn rewrite_master(
        &self,
        manifest: &Manifest,
        excluded: impl IntoIterator<Item = usize>,
        locations: &HashMap<usize, String>,
    ) -> Manifest {
        manifest
            .map_references(|line, reference| {
                locations
                    .get(&line)
                    .cloned()
                    .unwrap_or_else(|| self.rewrite(reference))
            })
            .without_lines(excluded)
    }

    /// Rewrites a child playlist fetched for the variant now located at `child`.
    ///
    /// Lines repeating a reference (byte ranges of one file) share one fragment.
    /// Different references whose relocated paths clash, such as two absolute
    /// URLs ending in `seg.ts`, get distinct file names.
    pub fn rewrite_child(&self, child: &str, manifest: &Manifest) -> RewrittenChild {
        let dir = parent_dir(child);
        let mut fragments: Vec<RewrittenFragment> = Vec::new();
        let mut by_reference: HashMap<String, usize> = HashMap::new();
        let mut by_line: HashMap<usize, usize> = HashMap::new();
        let mut taken = HashSet::from([child.to_string()]);

        for FragmentEntry {
            line,
            reference,
            is_init,
        } in manifest.fragments()
        {
            let key = reference.trim().to_string();
            let known = by_reference.get(&key).copied();
            let index = match known {
                Some(index) => index,
                None => {
                    let rewritten = claim(self.rewrite_fragment(child, &key), &mut taken);
                    fragments.push(RewrittenFragment {
                        original: reference,
                        rewritten,
                        is_init,
                    });
                    by_reference.insert(key, fragments.len() - 1);
                    fragments.len() - 1
                }
            };
            by_line.insert(line, index);
        }

        let stored = manifest.map_references(|line, reference| {
            let rewritten = match by_line.get(&line) {
                Some(&index) => fragments[index].rewritten.clone(),
                None => self.rewrite_fragment(child, reference),
            };
            relative_to(dir, &rewritten).to_string()
        });

        RewrittenChild {
            manifest: stored,
            fragments,
        }
    }

    /// Absolute on-disk path of a rewritten reference.
    pub fn local_path(&self, title_root: &Path, rewritten: &str) -> PathBuf {
        rewritten
            .split('/')
            .filter(|s| !s.is_empty())
            .fold(title_root.to_path_buf(), |path, segment| path.join(segment))
    }
}

/// Assigns child playlists of one master playlist their locations.
///
/// The same reference always gets the same location. Every other reference
/// gets a directory whose name no earlier reference uses, so two children never
/// share a fragment directory and the directory name can serve as their label.
#[derive(Debug, Clone, Default)]
pub struct LocationAllocator {
    rewriter: PathRewriter,
    by_reference: HashMap<String, String>,
    names: HashSet<String>,
}

impl LocationAllocator {
    pub fn new(rewriter: PathRewriter) -> Self {
        Self {
            rewriter,
            by_reference: HashMap::new(),
            names: HashSet::new(),
        }
    }

    /// Location of the child playlist at `reference`. A reference without a
    /// directory is placed in `fallback_dir`.
    pub fn allocate(&mut self, reference: &str, fallback_dir: &str) -> String {
        let key = reference.trim();
        if let Some(location) = self.by_reference.get(key) {
            return location.clone();
        }

        let (parent, name, file) = if reference::leading_directory(key).is_some() {
            let rewritten = self.rewriter.rewrite(key);
            let (dir, file) = split_last(&rewritten);
            let (parent, name) = split_last(dir);
            (parent.to_string(), name.to_string(), file.to_string())
        } else {
            let file = reference::file_name(key).unwrap_or("index.m3u8");
            (
                self.rewriter.media_dir.clone(),
                directory_slug(fallback_dir),
                file.to_string(),
            )
        };

        let mut unique = name.clone();
        let mut n = 2;
        while !self.names.insert(unique.clone()) {
            unique = format!("{name}_{n}");
            n += 1;
        }

        let location = format!("{parent}/{unique}/{file}");
        self.by_reference.insert(key.to_string(), location.clone());
        location
    }
}

/// Name of the directory holding a rewritten child playlist:
/// `m3u8/1080p/video.m3u8` gives `1080p`.
pub fn directory_name(location: &str) -> &str {
    split_last(parent_dir(location)).1
}

/// `(everything before the last '/', last segment)`.
fn split_last(path: &str) -> (&str, &str) {
    path.rsplit_once('/').unwrap_or(("", path))
}

fn directory_slug(label: &str) -> String {
    let slug: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if slug.trim_matches('_').is_empty() {
        "variant".to_string()
    } else {
        slug
    }
}

/// Claims `candidate`, or the first free `<stem>_<n>.<ext>` next to it.
fn claim(candidate: String, taken: &mut HashSet<String>) -> String {
    if taken.insert(candidate.clone()) {
        return candidate;
    }
    let (dir, name) = split_last(&candidate);
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };

    let mut n = 2;
    loop {
        let numbered = match ext {
            Some(ext) => format!("{stem}_{n}.{ext}"),
            None => format!("{stem}_{n}"),
        };
        let path = if dir.is_empty() {
            numbered
        } else {
            format!("{dir}/{numbered}")
        };
        if taken.insert(path.clone()) {
            return path;
        }
        n += 1;
    }
}

fn parent_dir(reference: &str) -> &str {
    reference.rsplit_once('/').map_or("", |(dir, _)| dir)
}

fn relative_to<'a>(dir: &str, rewritten: &'a str) -> &'a str {
    rewritten
        .strip_prefix(dir)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(rewritten)
}

/// File name for references whose path part is empty, e.g. `https://host?x=1`.
fn sanitized_placeholder(reference: &str) -> String {
    let cleaned: String = reference
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "fragment".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_rewrite_relative_variant() {
        let rewriter = PathRewriter::default();
        assert_eq!(
            rewriter.rewrite("vp9_720p/video.m3u8"),
            "m3u8/vp9_720p/video.m3u8"
        );
        assert_eq!(rewriter.rewrite("./1080p/video.m3u8?t=1"), "m3u8/1080p/video.m3u8");
    }

    #[test]
    fn test_rewrite_absolute_variant() {
        let rewriter = PathRewriter::default();
        assert_eq!(
            rewriter.rewrite("https://vz.example.net/tok/uuid/720p/video.m3u8?exp=9"),
            "m3u8/720p/video.m3u8"
        );
    }

    #[test]
    fn test_rewrite_flat_variant_gets_own_directory() {
        let rewriter = PathRewriter::default();
        assert_eq!(rewriter.rewrite("720.m3u8"), "m3u8/720/720.m3u8");
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let rewriter = PathRewriter::default();
        let once = rewriter.rewrite("1080p/video.m3u8");
        assert_eq!(rewriter.rewrite(&once), once);
        assert!(rewriter.is_rewritten(&once));
        assert!(!rewriter.is_rewritten("m3u8x/video.m3u8"));
    }

    #[test]
    fn test_rewrite_fragment() {
        let rewriter = PathRewriter::default();
        let child = "m3u8/vp9_720p/video.m3u8";
        assert_eq!(
            rewriter.rewrite_fragment(child, "video1.m4s"),
            "m3u8/vp9_720p/video1.m4s"
        );
        assert_eq!(
            rewriter.rewrite_fragment(child, "seg/video2.m4s"),
            "m3u8/vp9_720p/seg/video2.m4s"
        );
        assert_eq!(
            rewriter.rewrite_fragment(child, "https://cdn.example.com/a/b/video3.m4s?sig=x"),
            "m3u8/vp9_720p/video3.m4s"
        );
        let once = rewriter.rewrite_fragment(child, "video1.m4s");
        assert_eq!(rewriter.rewrite_fragment(child, &once), once);
    }

    #[test]
    fn test_rewrite_master_drops_excluded() {
        let text = "#EXTM3U\n\
#EXT-X-STREAM-INF:BANDWIDTH=1,CODECS=\"vp09.00.10.08\"\n\
vp9_1080p/video.m3u8\n\
#EXT-X-STREAM-INF:BANDWIDTH=2,CODECS=\"avc1.640028\"\n\
1080p/video.m3u8\n";
        let manifest = Manifest::parse(text).unwrap();
        let variants = manifest.variants();
        let rewritten = PathRewriter::default().rewrite_master(
            &manifest,
            variants[0].lines(),
            &HashMap::new(),
        );
        assert_eq!(
            rewritten.serialize(),
            "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=2,CODECS=\"avc1.640028\"\nm3u8/1080p/video.m3u8\n"
        );
    }

    #[test]
    fn test_rewrite_master_uses_assigned_locations() {
        let text = "#EXTM3U\n\
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"a\",NAME=\"en\",URI=\"audio.m3u8\"\n\
#EXT-X-STREAM-INF:BANDWIDTH=1,AUDIO=\"a\"\n\
https://cdn.example.com/a/1080p/video.m3u8\n\
#EXT-X-STREAM-INF:BANDWIDTH=2,AUDIO=\"a\"\n\
https://cdn.example.com/b/1080p/video.m3u8\n";
        let manifest = Manifest::parse(text).unwrap();
        let mut allocator = LocationAllocator::default();
        let mut locations = HashMap::new();
        locations.insert(1, allocator.allocate("audio.m3u8", "audio_en"));
        for variant in manifest.variants() {
            let location = allocator.allocate(&variant.reference, "unused");
            locations.insert(variant.reference_line, location);
        }

        let rewritten =
            PathRewriter::default().rewrite_master(&manifest, std::iter::empty(), &locations);
        assert_eq!(
            rewritten.serialize(),
            "#EXTM3U\n\
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"a\",NAME=\"en\",URI=\"m3u8/audio_en/audio.m3u8\"\n\
#EXT-X-STREAM-INF:BANDWIDTH=1,AUDIO=\"a\"\n\
m3u8/1080p/video.m3u8\n\
#EXT-X-STREAM-INF:BANDWIDTH=2,AUDIO=\"a\"\n\
m3u8/1080p_2/video.m3u8\n"
        );
    }

    #[test]
    fn test_allocator_separates_clashing_directories() {
        let mut allocator = LocationAllocator::default();
        let first = allocator.allocate("https://cdn.example.com/a/1080p/video.m3u8", "1080p");
        let second = allocator.allocate("https://cdn.example.com/b/1080p/video.m3u8", "1080p");
        let third = allocator.allocate("1080p/video.m3u8", "1080p");
        assert_eq!(first, "m3u8/1080p/video.m3u8");
        assert_eq!(second, "m3u8/1080p_2/video.m3u8");
        assert_eq!(third, "m3u8/1080p_3/video.m3u8");
        assert_eq!(directory_name(&second), "1080p_2");

        // a repeated reference keeps its location
        assert_eq!(
            allocator.allocate("https://cdn.example.com/b/1080p/video.m3u8", "x"),
            second
        );
    }

    #[test]
    fn test_allocator_names_flat_references_after_the_label() {
        let mut allocator = LocationAllocator::default();
        assert_eq!(allocator.allocate("hi.m3u8", "1080p"), "m3u8/1080p/hi.m3u8");
        assert_eq!(allocator.allocate("lo.m3u8", "1080p"), "m3u8/1080p_2/lo.m3u8");
        assert_eq!(allocator.allocate("x.m3u8", "a b/c"), "m3u8/a_b_c/x.m3u8");
        assert_eq!(directory_name("m3u8/hls/720p/v.m3u8"), "720p");
    }

    #[test]
    fn test_rewrite_child() {
        let text = "#EXTM3U\n\
#EXT-X-MAP:URI=\"init.mp4\"\n\
#EXTINF:4,\n\
video1.m4s\n\
#EXTINF:4,\n\
https://cdn.example.com/x/video2.m4s?t=1\n\
#EXT-X-ENDLIST\n";
        let manifest = Manifest::parse(text).unwrap();
        let child = PathRewriter::default().rewrite_child("m3u8/vp9_720p/video.m3u8", &manifest);

        let rewritten: Vec<_> = child.fragments.iter().map(|f| f.rewritten.as_str()).collect();
        assert_eq!(
            rewritten,
            vec![
                "m3u8/vp9_720p/init.mp4",
                "m3u8/vp9_720p/video1.m4s",
                "m3u8/vp9_720p/video2.m4s"
            ]
        );
        assert!(child.fragments[0].is_init);
        assert_eq!(
            child.manifest.serialize(),
            "#EXTM3U\n#EXT-X-MAP:URI=\"init.mp4\"\n#EXTINF:4,\nvideo1.m4s\n#EXTINF:4,\nvideo2.m4s\n#EXT-X-ENDLIST\n"
        );
    }

    #[test]
    fn test_rewrite_child_dedupes_byte_range_fragments() {
        let text = "#EXTM3U\n#EXTINF:4,\nall.mp4\n#EXTINF:4,\nall.mp4\n";
        let manifest = Manifest::parse(text).unwrap();
        let child = PathRewriter::default().rewrite_child("m3u8/a/v.m3u8", &manifest);
        assert_eq!(child.fragments.len(), 1);
    }

    #[test]
    fn test_rewrite_child_keeps_clashing_names_apart() {
        let text = "#EXTM3U\n\
#EXTINF:6.0,\n\
https://cdn.example.com/s/a/seg.ts\n\
#EXTINF:6.0,\n\
https://cdn.example.com/s/b/seg.ts\n\
#EXTINF:6.0,\n\
seg.ts\n";
        let manifest = Manifest::parse(text).unwrap();
        let child = PathRewriter::default().rewrite_child("m3u8/720p/video.m3u8", &manifest);

        let rewritten: Vec<_> = child.fragments.iter().map(|f| f.rewritten.as_str()).collect();
        assert_eq!(
            rewritten,
            vec![
                "m3u8/720p/seg.ts",
                "m3u8/720p/seg_2.ts",
                "m3u8/720p/seg_3.ts"
            ]
        );
        assert_eq!(child.fragments[1].original, "https://cdn.example.com/s/b/seg.ts");
        assert_eq!(
            child.manifest.serialize(),
            "#EXTM3U\n#EXTINF:6.0,\nseg.ts\n#EXTINF:6.0,\nseg_2.ts\n#EXTINF:6.0,\nseg_3.ts\n"
        );
    }

    #[test]
    fn test_rewrite_child_never_overwrites_its_playlist() {
        let text = "#EXTM3U\n#EXTINF:6.0,\nhttps://cdn.example.com/x/video.m3u8\n";
        let manifest = Manifest::parse(text).unwrap();
        let child = PathRewriter::default().rewrite_child("m3u8/720p/video.m3u8", &manifest);
        assert_eq!(child.fragments[0].rewritten, "m3u8/720p/video_2.m3u8");
    }

    #[test]
    fn test_local_path() {
        let rewriter = PathRewriter::default();
        let path = rewriter.local_path(Path::new("/data/42"), "m3u8/1080p/video1.m4s");
        assert_eq!(path, Path::new("/data/42/m3u8/1080p/video1.m4s"));
    }

    proptest! {
        #[test]
        fn prop_rewrite_is_idempotent(reference in "(https://h\\.example/)?[a-z0-9_./]{0,30}(\\?[a-z=0-9]{1,8})?") {
            let rewriter = PathRewriter::default();
            let once = rewriter.rewrite(&reference);
            prop_assert!(rewriter.is_rewritten(&once));
            prop_assert_eq!(rewriter.rewrite(&once), once.clone());

            let fragment = rewriter.rewrite_fragment(&once, &reference);
            prop_assert!(fragment.starts_with("m3u8/"));
            prop_assert_eq!(rewriter.rewrite_fragment(&once, &fragment), fragment.clone());
        }
    }
}
