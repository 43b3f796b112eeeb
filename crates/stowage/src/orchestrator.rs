//! Download orchestration for one title.
//!
//! The work happens in phases, each driven by the assembler:
//! 1. metadata and top manifest fetches
//! 2. planning: classify variants and renditions, fetch and rewrite every retained child
//!    manifest, build the fragment list
//! 3. writing every rewritten manifest to disk
//! 4. fragment transfers, per variant, with a bounded retry state machine
//!
//! No fragment is requested before phase 3 has finished.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use futures::StreamExt;
use futures::future::join_all;
use futures::stream;
use hls::{
    CodecFamily, LocationAllocator, Manifest, PathRewriter, RenditionEntry, RewrittenChild,
    StreamInfo, StreamKind, VariantClassifier, VariantEntry, directory_name, rendition_label,
    variant_label,
};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};
use url::Url;

use crate::config::StowageConfig;
use crate::error::{Result, StowageError};
use crate::fs;
use crate::metadata::Metadata;
use crate::model::{FetchState, Fragment, Variant};
use crate::report::TitleReport;
use crate::retry::{RetryAction, RetryPolicy, retry_with_backoff};
use crate::source::{RemotePlaylist, TitleSource, resolve_reference};
use crate::transfer::Transfer;
use crate::verify::verify_file;

/// Everything known about a title once its manifests are resolved.
#[derive(Debug, Clone)]
pub struct TitlePlan {
    /// Rewritten top manifest, excluded variants removed.
    pub manifest: Manifest,
    /// Variant streams in playlist order, then renditions, excluded ones included.
    pub variants: Vec<Variant>,
    /// Rewritten child manifests keyed by their title-root-relative location.
    children: Vec<(String, Manifest)>,
}

impl TitlePlan {
    /// Retained variant streams, renditions not counted.
    pub fn retained(&self) -> usize {
        self.variants
            .iter()
            .filter(|v| v.included && v.kind == StreamKind::Main)
            .count()
    }

    /// Variant streams of the top manifest, renditions not counted.
    pub fn main_variants(&self) -> usize {
        self.variants
            .iter()
            .filter(|v| v.kind == StreamKind::Main)
            .count()
    }

    pub fn child_manifests(&self) -> impl Iterator<Item = (&str, &Manifest)> {
        self.children.iter().map(|(loc, m)| (loc.as_str(), m))
    }
}

/// A child reference of the top manifest, whichever tag it came from.
#[derive(Clone, Copy)]
enum ChildStream<'a> {
    Variant(&'a VariantEntry),
    Rendition(&'a RenditionEntry),
}

impl ChildStream<'_> {
    fn kind(&self) -> StreamKind {
        match self {
            Self::Variant(_) => StreamKind::Main,
            Self::Rendition(entry) => entry.kind,
        }
    }

    fn reference(&self) -> &str {
        match self {
            Self::Variant(entry) => &entry.reference,
            Self::Rendition(entry) => &entry.reference,
        }
    }

    fn stream_info(&self) -> &StreamInfo {
        match self {
            Self::Variant(entry) => &entry.stream_info,
            Self::Rendition(entry) => &entry.stream_info,
        }
    }

    /// The URI line of a variant, the tag line of a rendition.
    fn reference_line(&self) -> usize {
        match self {
            Self::Variant(entry) => entry.reference_line,
            Self::Rendition(entry) => entry.line,
        }
    }

    /// Lines dropped from the top manifest when the stream is excluded.
    fn lines(&self) -> Vec<usize> {
        match self {
            Self::Variant(entry) => entry.lines().to_vec(),
            Self::Rendition(entry) => vec![entry.line],
        }
    }

    /// Directory name for a reference that has none.
    fn fallback_label(&self, family: CodecFamily) -> String {
        match self {
            Self::Variant(entry) => variant_label(entry, family),
            Self::Rendition(entry) => rendition_label(entry),
        }
    }
}

pub struct DownloadOrchestrator {
    source: Arc<dyn TitleSource>,
    transfer: Arc<dyn Transfer>,
    classifier: VariantClassifier,
    rewriter: PathRewriter,
    policy: RetryPolicy,
    concurrency: usize,
    /// Transfers in flight across every title sharing this orchestrator.
    permits: Arc<Semaphore>,
}

impl DownloadOrchestrator {
    pub fn new(
        config: &StowageConfig,
        source: Arc<dyn TitleSource>,
        transfer: Arc<dyn Transfer>,
    ) -> Self {
        let concurrency = config.concurrency.max(1);
        Self {
            source,
            transfer,
            classifier: VariantClassifier::new(config.exclude_vp9),
            rewriter: PathRewriter::default(),
            policy: config.retry_policy(),
            concurrency,
            permits: Arc::new(Semaphore::new(concurrency)),
        }
    }

    pub fn rewriter(&self) -> &PathRewriter {
        &self.rewriter
    }

    pub async fn fetch_metadata(
        &self,
        title_id: &str,
        token: &CancellationToken,
    ) -> Result<Metadata> {
        retry_with_backoff(&self.policy, token, |_| async {
            RetryAction::from(self.source.fetch_metadata(title_id).await)
        })
        .await
    }

    pub async fn fetch_top_manifest(
        &self,
        title_id: &str,
        metadata: &Metadata,
        token: &CancellationToken,
    ) -> Result<RemotePlaylist> {
        retry_with_backoff(&self.policy, token, |_| async {
            RetryAction::from(self.source.fetch_manifest(title_id, metadata).await)
        })
        .await
    }

    /// Classifies the variants and renditions of `top`, fetches and rewrites
    /// the child manifest of every retained one and rewrites the top manifest.
    ///
    /// Renditions (`#EXT-X-MEDIA` with a `URI`, `#EXT-X-I-FRAME-STREAM-INF`)
    /// are children like any variant: classified, fetched and verified.
    /// Each distinct reference gets a directory of its own, and that
    /// directory name is its label.
    ///
    /// A malformed top manifest fails the whole plan. A child manifest that
    /// cannot be fetched or used only marks its own variant.
    #[instrument(skip_all, fields(url = %top.url))]
    pub async fn plan(&self, top: &RemotePlaylist, token: &CancellationToken) -> Result<TitlePlan> {
        let manifest = Manifest::parse(&top.body)
            .map_err(|e| StowageError::malformed(top.url.as_str(), e.to_string()))?;
        if !manifest.is_master() {
            return Err(StowageError::malformed(
                top.url.as_str(),
                "expected a master playlist with variant streams",
            ));
        }

        let entries = manifest.variants();
        let renditions = manifest.renditions();
        let mut variants = Vec::with_capacity(entries.len() + renditions.len());
        let mut allocator = LocationAllocator::new(self.rewriter.clone());
        let mut locations = HashMap::new();
        let mut excluded = Vec::new();

        let streams = entries
            .iter()
            .map(ChildStream::Variant)
            .chain(renditions.iter().map(ChildStream::Rendition));

        for stream in streams {
            let classification = self
                .classifier
                .classify(stream.reference(), Some(stream.stream_info()));
            let fallback = stream.fallback_label(classification.family);

            if !classification.retained {
                info!(
                    variant = %fallback,
                    kind = %stream.kind(),
                    family = %classification.family,
                    "Excluding variant"
                );
                excluded.extend(stream.lines());
                variants.push(Variant {
                    label: fallback,
                    kind: stream.kind(),
                    family: classification.family,
                    original: stream.reference().to_string(),
                    rewritten: None,
                    remote: None,
                    included: false,
                    fragments: Vec::new(),
                    problem: None,
                });
                continue;
            }

            let location = allocator.allocate(stream.reference(), &fallback);
            locations.insert(stream.reference_line(), location.clone());
            if variants
                .iter()
                .any(|v: &Variant| v.rewritten.as_deref() == Some(location.as_str()))
            {
                debug!(reference = stream.reference(), "Reference already planned");
                continue;
            }

            let label = directory_name(&location).to_string();
            debug!(
                variant = %label,
                kind = %stream.kind(),
                family = %classification.family,
                "Retaining variant"
            );
            variants.push(Variant {
                label,
                kind: stream.kind(),
                family: classification.family,
                original: stream.reference().to_string(),
                rewritten: Some(location),
                remote: None,
                included: true,
                fragments: Vec::new(),
                problem: None,
            });
        }

        // Children of retained variants are independent of each other.
        let loads = variants.iter().filter(|v| v.included).map(|variant| {
            let rewritten = variant.rewritten.clone().unwrap_or_default();
            async move {
                let loaded = self
                    .load_child(&top.url, &variant.original, &rewritten, token)
                    .await;
                (rewritten, loaded)
            }
        });
        let loaded = join_all(loads).await;

        let mut children: Vec<(String, Manifest)> = Vec::new();
        let retained = variants.iter_mut().filter(|v| v.included);
        for (variant, (location, result)) in retained.zip(loaded) {
            match result {
                Ok((remote, fragments, child)) => {
                    debug!(
                        variant = %variant.label,
                        fragments = fragments.len(),
                        "Child manifest resolved"
                    );
                    variant.remote = Some(remote);
                    variant.fragments = fragments;
                    children.push((location, child));
                }
                Err(StowageError::Cancelled) => return Err(StowageError::Cancelled),
                Err(err) => {
                    warn!(variant = %variant.label, error = %err, "Variant unusable");
                    variant.problem = Some(err.to_string());
                }
            }
        }

        Ok(TitlePlan {
            manifest: self
                .rewriter
                .rewrite_master(&manifest, excluded, &locations),
            variants,
            children,
        })
    }

    async fn load_child(
        &self,
        base: &Url,
        reference: &str,
        rewritten: &str,
        token: &CancellationToken,
    ) -> Result<(Url, Vec<Fragment>, Manifest)> {
        let url = resolve_reference(base, reference)?;
        let playlist = retry_with_backoff(&self.policy, token, |_| async {
            RetryAction::from(self.source.fetch_playlist(&url).await)
        })
        .await?;

        ensure_media_playlist(&playlist)?;
        let child = Manifest::parse(&playlist.body)
            .map_err(|e| StowageError::malformed(playlist.url.as_str(), e.to_string()))?;

        let RewrittenChild {
            manifest,
            fragments,
        } = self.rewriter.rewrite_child(rewritten, &child);
        if fragments.is_empty() {
            return Err(StowageError::malformed(
                playlist.url.as_str(),
                "media playlist lists no fragments",
            ));
        }

        let fragments = fragments
            .into_iter()
            .map(|f| {
                let remote = resolve_reference(&playlist.url, &f.original)?;
                Ok(Fragment::new(f.original, f.rewritten, remote, f.is_init))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok((playlist.url, fragments, manifest))
    }

    /// Marks fragments completed by an earlier run as `Complete` when their
    /// files still have the recorded length. Returns how many were kept.
    pub async fn resume(
        &self,
        title_root: &Path,
        plan: &mut TitlePlan,
        previous: &TitleReport,
    ) -> usize {
        let completed = previous.completed_fragments();
        if completed.is_empty() {
            return 0;
        }

        let mut kept = 0;
        for fragment in plan
            .variants
            .iter_mut()
            .filter(|v| v.is_fetchable())
            .flat_map(|v| v.fragments.iter_mut())
        {
            let Some(&len) = completed.get(fragment.rewritten.as_str()) else {
                continue;
            };
            let path = self.rewriter.local_path(title_root, &fragment.rewritten);
            if verify_file(&path, fragment.kind, Some(len)).await.is_complete() {
                fragment.reuse(len);
                kept += 1;
            }
        }

        if kept > 0 {
            info!(kept, "Resuming with fragments from an earlier run");
        }
        kept
    }

    /// Writes every rewritten child manifest, then the top manifest.
    pub async fn write_manifests(&self, title_root: &Path, plan: &TitlePlan) -> Result<()> {
        for (location, manifest) in plan.child_manifests() {
            let path = self.rewriter.local_path(title_root, location);
            fs::write_atomic(&path, manifest.serialize().as_bytes()).await?;
        }
        let top = self
            .rewriter
            .local_path(title_root, &self.rewriter.top_playlist());
        fs::write_atomic(&top, plan.manifest.serialize().as_bytes()).await
    }

    /// Fetches the pending fragments of every fetchable variant. Variants run
    /// side by side; a variant that exhausts its retries does not stop the others.
    pub async fn fetch_fragments(
        &self,
        title_root: &Path,
        variants: &mut [Variant],
        token: &CancellationToken,
    ) {
        let runs = variants
            .iter_mut()
            .filter(|v| v.is_fetchable())
            .map(|variant| self.fetch_variant(title_root, variant, token));
        join_all(runs).await;
    }

    #[instrument(skip_all, fields(variant = %variant.label))]
    async fn fetch_variant(
        &self,
        title_root: &Path,
        variant: &mut Variant,
        token: &CancellationToken,
    ) {
        let pending = variant
            .fragments
            .iter()
            .filter(|f| f.state() == FetchState::Pending)
            .count();
        debug!(pending, total = variant.fragments.len(), "Fetching fragments");

        stream::iter(
            variant
                .fragments
                .iter_mut()
                .filter(|f| f.state() == FetchState::Pending),
        )
        .for_each_concurrent(self.concurrency, move |fragment| {
            self.fetch_fragment(title_root, fragment, token)
        })
        .await;
    }

    /// Runs one fragment through `Pending -> Fetching -> Complete | Failed`,
    /// going back to `Pending` after any failure while attempts remain.
    ///
    /// Cancellation is only observed between attempts: a transfer in flight
    /// finishes or times out on its own. A fragment never attempted stays `Pending`.
    async fn fetch_fragment(
        &self,
        title_root: &Path,
        fragment: &mut Fragment,
        token: &CancellationToken,
    ) {
        let dest = self.rewriter.local_path(title_root, &fragment.rewritten);

        loop {
            let permit = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                permit = self.permits.acquire() => permit,
            };
            let Ok(permit) = permit else {
                warn!(fragment = %fragment.rewritten, "Transfer pool closed");
                return;
            };

            fragment.begin_attempt();
            let result = self.transfer.fetch(&fragment.remote, &dest).await;
            drop(permit);

            let err = match result {
                Ok(receipt) => {
                    trace!(
                        fragment = %fragment.rewritten,
                        bytes = receipt.bytes_written,
                        "Fragment fetched"
                    );
                    fragment.complete(receipt.declared_len);
                    return;
                }
                Err(err) => err,
            };

            let attempt = fragment.attempts();
            fragment.fail(err.to_string());
            if self.policy.is_exhausted(attempt) {
                warn!(
                    fragment = %fragment.rewritten,
                    attempts = attempt,
                    error = %err,
                    "Fragment failed"
                );
                return;
            }

            let delay = self.policy.delay_for_attempt(attempt - 1);
            debug!(
                fragment = %fragment.rewritten,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying fragment"
            );
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            fragment.requeue();
        }
    }
}

/// A child position must hold a media playlist, never another master playlist.
fn ensure_media_playlist(playlist: &RemotePlaylist) -> Result<()> {
    match m3u8_rs::parse_playlist(playlist.body.as_bytes()) {
        Ok((_, m3u8_rs::Playlist::MediaPlaylist(_))) => Ok(()),
        Ok((_, m3u8_rs::Playlist::MasterPlaylist(_))) => Err(StowageError::malformed(
            playlist.url.as_str(),
            "expected media playlist, but got another master playlist",
        )),
        Err(_) => Err(StowageError::malformed(
            playlist.url.as_str(),
            "not a valid media playlist",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playlist(body: &str) -> RemotePlaylist {
        RemotePlaylist {
            url: Url::parse("https://cdn.example.com/t/720p/video.m3u8").unwrap(),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_media_playlist_accepted() {
        let body = "#EXTM3U\n#EXT-X-VERSION:7\n#EXT-X-TARGETDURATION:6\n#EXT-X-MAP:URI=\"init.mp4\"\n#EXTINF:6.0,\nvideo1.m4s\n#EXT-X-ENDLIST\n";
        assert!(ensure_media_playlist(&playlist(body)).is_ok());
    }

    #[test]
    fn test_master_in_child_position_rejected() {
        let body = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1000,CODECS=\"avc1.640028\"\n720p/video.m3u8\n";
        let err = ensure_media_playlist(&playlist(body)).unwrap_err();
        assert!(matches!(err, StowageError::MalformedManifest { .. }));
        assert!(err.to_string().contains("another master playlist"));
    }
}
