// Per-worker download and emission routines.
//
// Two shapes of aggregation exist. Live draining pulls whatever a running
// job has produced so far straight into the output directory (single
// worker, and the progressive chunk-0 safety net). Staged aggregation
// downloads a completed chunk into a per-chunk staging directory in the
// background and emits it later, when the chunk becomes `next_processable`,
// which is what keeps emission strictly in chunk-index order while encodes
// finish out of order.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tracing::{debug, trace, warn};

use crate::classify::{SegmentFile, classify, sort_media};
use crate::error::SegmentError;
use crate::manifest::{ManifestPoster, rewrite_start_number};
use crate::numbering::StreamOffsets;

/// How many media segments download concurrently.
const DOWNLOAD_BATCH: usize = 8;

/// Where segment bytes come from. Implemented over a worker's
/// `/beam/segments/<job>` endpoints by the dispatcher; tests aggregate from
/// a directory fake.
#[async_trait]
pub trait SegmentSource: Send + Sync {
    async fn list(&self) -> Result<Vec<String>, SegmentError>;
    async fn fetch_to(&self, name: &str, dest: &Path) -> Result<u64, SegmentError>;
    async fn fetch_bytes(&self, name: &str) -> Result<Vec<u8>, SegmentError>;
}

/// Result of one aggregation pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct AggregateOutcome {
    /// Highest stream-0 segment number seen in the listing.
    pub vid_count: u64,
    /// Highest stream-1 segment number seen in the listing.
    pub aud_count: u64,
    /// Files newly landed in the output directory by this pass.
    pub new_files: u64,
}

/// Session-scoped aggregation state: the output directory, the per-stream
/// numbering, and which one-shot artifacts (inits, manifest) already
/// landed.
pub struct Aggregator {
    output_dir: PathBuf,
    offsets: StreamOffsets,
    poster: ManifestPoster,
    skip_to_segment: u64,
    init_emitted: HashSet<u32>,
    media_emitted: bool,
}

impl Aggregator {
    pub fn new(output_dir: PathBuf, skip_to_segment: u64, poster: ManifestPoster) -> Self {
        let skip_base = skip_to_segment.saturating_sub(1);
        Self {
            output_dir,
            offsets: StreamOffsets::new(skip_base),
            poster,
            skip_to_segment,
            init_emitted: HashSet::new(),
            media_emitted: false,
        }
    }

    pub fn offsets(&self) -> &StreamOffsets {
        &self.offsets
    }

    pub fn manifest_posted(&self) -> bool {
        self.poster.has_posted()
    }

    /// Advance per-stream numbering after a chunk's segments are fully
    /// emitted. Single-writer: only the emission driver calls this.
    pub fn commit_chunk(&mut self, vid_count: u64, aud_count: u64) {
        self.offsets.advance(0, vid_count);
        self.offsets.advance(1, aud_count);
        debug!(
            vid_count,
            aud_count,
            v_off = self.offsets.offset_of(0),
            a_off = self.offsets.offset_of(1),
            "chunk committed"
        );
    }

    /// Incremental pass over a live job's listing, emitting directly into
    /// the output directory. Idempotent: files already on disk are skipped,
    /// so repeated calls (and an overlapping progressive loop) converge.
    ///
    /// `primary` marks the source that contributes init segments and the
    /// manifest; from any other source those listings are dropped.
    pub async fn drain_live(
        &mut self,
        source: &dyn SegmentSource,
        primary: bool,
    ) -> Result<AggregateOutcome, SegmentError> {
        let listing = source.list().await?;
        let mut outcome = AggregateOutcome::default();
        let mut media: Vec<(u32, u64, String)> = Vec::new();
        let mut manifest_name: Option<String> = None;

        for name in &listing {
            match classify(name) {
                SegmentFile::Init { stream, name } => {
                    if primary && !self.init_emitted.contains(&stream) {
                        let dest = self.output_dir.join(&name);
                        source.fetch_to(&name, &dest).await?;
                        self.init_emitted.insert(stream);
                        outcome.new_files += 1;
                        debug!(%name, "init segment emitted");
                    }
                }
                SegmentFile::Media { stream, number, name } => {
                    match stream {
                        0 => outcome.vid_count = outcome.vid_count.max(number),
                        1 => outcome.aud_count = outcome.aud_count.max(number),
                        _ => {}
                    }
                    media.push((stream, number, name));
                }
                SegmentFile::Manifest { name } => {
                    if primary {
                        manifest_name = Some(name);
                    }
                }
                SegmentFile::Other { .. } => {}
            }
        }

        sort_media(&mut media);
        outcome.new_files += self.download_media(source, &media).await?;
        if outcome.new_files > 0 {
            self.media_emitted = true;
        }

        if let Some(name) = manifest_name {
            self.handle_manifest(source, &name).await?;
        }
        Ok(outcome)
    }

    /// Download a completed chunk's full listing into `staging_dir` with
    /// worker-local names. Runs in the background, one task per worker; no
    /// aggregator state is touched.
    pub async fn stage_chunk(
        source: &dyn SegmentSource,
        staging_dir: &Path,
        primary: bool,
    ) -> Result<StagedChunk, SegmentError> {
        tokio::fs::create_dir_all(staging_dir).await?;
        let listing = source.list().await?;
        let mut staged = StagedChunk {
            dir: staging_dir.to_path_buf(),
            inits: Vec::new(),
            media: Vec::new(),
            manifest: None,
            vid_count: 0,
            aud_count: 0,
        };

        for name in &listing {
            match classify(name) {
                SegmentFile::Init { stream, name } => {
                    if primary {
                        source.fetch_to(&name, &staging_dir.join(&name)).await?;
                        staged.inits.push((stream, name));
                    }
                }
                SegmentFile::Manifest { name } => {
                    if primary {
                        staged.manifest = Some((name.clone(), source.fetch_bytes(&name).await?));
                    }
                }
                SegmentFile::Media { stream, number, name } => {
                    match stream {
                        0 => staged.vid_count = staged.vid_count.max(number),
                        1 => staged.aud_count = staged.aud_count.max(number),
                        _ => {}
                    }
                    staged.media.push((stream, number, name));
                }
                SegmentFile::Other { .. } => {}
            }
        }

        if primary && staged.media_present() && staged.inits.is_empty() {
            // ALERT-level: a complete chunk served media without its init
            return Err(SegmentError::protocol(format!(
                "chunk listing at {} has media segments but no init segment",
                staging_dir.display()
            )));
        }

        sort_media(&mut staged.media);
        let mut batches = staged.media.chunks(DOWNLOAD_BATCH);
        for batch in &mut batches {
            let mut downloads = FuturesUnordered::new();
            for (_, _, name) in batch {
                let dest = staging_dir.join(name);
                downloads.push(async move { source.fetch_to(name, &dest).await });
            }
            while let Some(result) = downloads.next().await {
                result?;
            }
        }

        debug!(
            dir = %staging_dir.display(),
            vid = staged.vid_count,
            aud = staged.aud_count,
            "chunk staged"
        );
        Ok(staged)
    }

    /// Emit a staged chunk into the output directory with renumbering, then
    /// advance the offsets. Callers drive this strictly in chunk-index
    /// order.
    pub async fn emit_staged(
        &mut self,
        staged: &StagedChunk,
        primary: bool,
    ) -> Result<AggregateOutcome, SegmentError> {
        let mut outcome = AggregateOutcome {
            vid_count: staged.vid_count,
            aud_count: staged.aud_count,
            new_files: 0,
        };

        if primary {
            for (stream, name) in &staged.inits {
                if self.init_emitted.contains(stream) {
                    continue;
                }
                let from = staged.dir.join(name);
                let to = self.output_dir.join(name);
                copy_into_place(&from, &to).await?;
                self.init_emitted.insert(*stream);
                outcome.new_files += 1;
            }
        }

        for (stream, number, name) in &staged.media {
            let emitted = self.offsets.emitted_name(*stream, *number);
            let to = self.output_dir.join(&emitted);
            if tokio::fs::try_exists(&to).await? {
                trace!(%emitted, "already on disk, skipping");
                continue;
            }
            let from = staged.dir.join(name);
            copy_into_place(&from, &to).await?;
            outcome.new_files += 1;
        }
        if outcome.new_files > 0 {
            self.media_emitted = true;
        }

        if primary {
            if let Some((name, bytes)) = &staged.manifest {
                self.write_and_offer_manifest(name, bytes).await?;
            }
        }

        self.commit_chunk(staged.vid_count, staged.aud_count);
        Ok(outcome)
    }

    async fn download_media(
        &self,
        source: &dyn SegmentSource,
        media: &[(u32, u64, String)],
    ) -> Result<u64, SegmentError> {
        let mut new_files = 0u64;
        for batch in media.chunks(DOWNLOAD_BATCH) {
            let mut downloads = FuturesUnordered::new();
            for (stream, number, name) in batch {
                let emitted = self.offsets.emitted_name(*stream, *number);
                let dest = self.output_dir.join(&emitted);
                downloads.push(async move {
                    if tokio::fs::try_exists(&dest).await? {
                        Ok::<bool, SegmentError>(false)
                    } else {
                        source.fetch_to(name, &dest).await?;
                        Ok(true)
                    }
                });
            }
            while let Some(result) = downloads.next().await {
                if result? {
                    new_files += 1;
                }
            }
        }
        Ok(new_files)
    }

    async fn handle_manifest(
        &mut self,
        source: &dyn SegmentSource,
        name: &str,
    ) -> Result<(), SegmentError> {
        let bytes = source.fetch_bytes(name).await?;
        self.write_and_offer_manifest(name, &bytes).await
    }

    async fn write_and_offer_manifest(
        &mut self,
        name: &str,
        bytes: &[u8],
    ) -> Result<(), SegmentError> {
        let init_present = !self.init_emitted.is_empty();
        if !init_present || !self.media_emitted {
            return Ok(());
        }

        let text = String::from_utf8_lossy(bytes);
        let rewritten = rewrite_start_number(&text, self.skip_to_segment);
        let dest = self.output_dir.join(name);
        let part = dest.with_extension("part");
        tokio::fs::write(&part, rewritten.as_bytes()).await?;
        tokio::fs::rename(&part, &dest).await?;

        if let Err(e) = self
            .poster
            .offer(rewritten.as_bytes(), init_present, self.media_emitted)
            .await
        {
            // The callback answering late or 5xx is not fatal to the
            // session; the next pass offers again.
            warn!(error = %e, "manifest offer failed");
        }
        Ok(())
    }
}

/// A completed chunk sitting in its staging directory.
#[derive(Debug)]
pub struct StagedChunk {
    pub dir: PathBuf,
    pub inits: Vec<(u32, String)>,
    pub media: Vec<(u32, u64, String)>,
    pub manifest: Option<(String, Vec<u8>)>,
    pub vid_count: u64,
    pub aud_count: u64,
}

impl StagedChunk {
    fn media_present(&self) -> bool {
        !self.media.is_empty()
    }
}

async fn copy_into_place(from: &Path, to: &Path) -> Result<(), SegmentError> {
    let part = to.with_extension("part");
    tokio::fs::copy(from, &part).await?;
    tokio::fs::rename(&part, to).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory segment source with a mutable listing.
    struct FakeSource {
        files: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl FakeSource {
        fn new(names: &[&str]) -> Self {
            let mut files = HashMap::new();
            for name in names {
                files.insert(name.to_string(), format!("data:{name}").into_bytes());
            }
            Self {
                files: Mutex::new(files),
            }
        }

        fn insert(&self, name: &str) {
            self.files
                .lock()
                .unwrap()
                .insert(name.to_owned(), format!("data:{name}").into_bytes());
        }

        fn insert_with(&self, name: &str, content: &[u8]) {
            self.files
                .lock()
                .unwrap()
                .insert(name.to_owned(), content.to_vec());
        }
    }

    #[async_trait]
    impl SegmentSource for FakeSource {
        async fn list(&self) -> Result<Vec<String>, SegmentError> {
            let mut names: Vec<String> = self.files.lock().unwrap().keys().cloned().collect();
            names.sort();
            Ok(names)
        }

        async fn fetch_to(&self, name: &str, dest: &Path) -> Result<u64, SegmentError> {
            let bytes = self
                .files
                .lock()
                .unwrap()
                .get(name)
                .cloned()
                .ok_or_else(|| SegmentError::transport(format!("missing {name}"), false))?;
            std::fs::write(dest, &bytes).unwrap();
            Ok(bytes.len() as u64)
        }

        async fn fetch_bytes(&self, name: &str) -> Result<Vec<u8>, SegmentError> {
            self.files
                .lock()
                .unwrap()
                .get(name)
                .cloned()
                .ok_or_else(|| SegmentError::transport(format!("missing {name}"), false))
        }
    }

    fn poster() -> ManifestPoster {
        // no callback URL: the gate runs but nothing goes on the wire
        ManifestPoster::new(reqwest::Client::new(), None)
    }

    #[tokio::test]
    async fn live_drain_emits_init_media_and_manifest() {
        let out = tempfile::tempdir().unwrap();
        let source = FakeSource::new(&[
            "init-stream0.m4s",
            "init-stream1.m4s",
            "chunk-stream0-00001.m4s",
            "chunk-stream0-00002.m4s",
            "chunk-stream1-00001.m4s",
            "output.mpd",
        ]);
        let mut agg = Aggregator::new(out.path().to_path_buf(), 0, poster());

        let outcome = agg.drain_live(&source, true).await.unwrap();
        assert_eq!(outcome.vid_count, 2);
        assert_eq!(outcome.aud_count, 1);
        assert!(out.path().join("init-stream0.m4s").exists());
        assert!(out.path().join("chunk-stream0-00001.m4s").exists());
        assert!(out.path().join("chunk-stream1-00001.m4s").exists());
        assert!(out.path().join("output.mpd").exists());

        // second drain is a no-op apart from the unchanged listing
        let outcome = agg.drain_live(&source, true).await.unwrap();
        assert_eq!(outcome.new_files, 0);
    }

    #[tokio::test]
    async fn live_drain_applies_skip_base() {
        let out = tempfile::tempdir().unwrap();
        let source = FakeSource::new(&[
            "init-stream0.m4s",
            "chunk-stream0-00001.m4s",
            "output.mpd",
        ]);
        // player asked to start at segment 5
        let mut agg = Aggregator::new(out.path().to_path_buf(), 5, poster());
        agg.drain_live(&source, true).await.unwrap();
        assert!(out.path().join("chunk-stream0-00005.m4s").exists());
        assert!(!out.path().join("chunk-stream0-00001.m4s").exists());
    }

    #[tokio::test]
    async fn non_primary_sources_contribute_no_init_or_manifest() {
        let out = tempfile::tempdir().unwrap();
        let source = FakeSource::new(&[
            "init-stream0.m4s",
            "chunk-stream0-00001.m4s",
            "output.mpd",
        ]);
        let mut agg = Aggregator::new(out.path().to_path_buf(), 0, poster());
        let outcome = agg.drain_live(&source, false).await.unwrap();
        assert_eq!(outcome.new_files, 1);
        assert!(out.path().join("chunk-stream0-00001.m4s").exists());
        assert!(!out.path().join("init-stream0.m4s").exists());
        assert!(!out.path().join("output.mpd").exists());
    }

    #[tokio::test]
    async fn staged_chunks_renumber_across_boundaries() {
        let out = tempfile::tempdir().unwrap();
        let stage0 = tempfile::tempdir().unwrap();
        let stage1 = tempfile::tempdir().unwrap();

        let chunk0 = FakeSource::new(&[
            "init-stream0.m4s",
            "init-stream1.m4s",
            "chunk-stream0-00001.m4s",
            "chunk-stream0-00002.m4s",
            "chunk-stream1-00001.m4s",
            "output.mpd",
        ]);
        let chunk1 = FakeSource::new(&[
            "init-stream0.m4s",
            "chunk-stream0-00001.m4s",
            "chunk-stream1-00001.m4s",
            "output.mpd",
        ]);

        let mut agg = Aggregator::new(out.path().to_path_buf(), 0, poster());

        let staged0 = Aggregator::stage_chunk(&chunk0, stage0.path(), true)
            .await
            .unwrap();
        let staged1 = Aggregator::stage_chunk(&chunk1, stage1.path(), false)
            .await
            .unwrap();
        // chunk 1 staged nothing primary even though the worker listed them
        assert!(staged1.inits.is_empty());
        assert!(staged1.manifest.is_none());

        agg.emit_staged(&staged0, true).await.unwrap();
        agg.emit_staged(&staged1, false).await.unwrap();

        // chunk 1's stream-0 segment continues at 3, stream-1 at 2
        assert!(out.path().join("chunk-stream0-00003.m4s").exists());
        assert!(out.path().join("chunk-stream1-00002.m4s").exists());
        // exactly one init per stream for the whole session
        assert!(out.path().join("init-stream0.m4s").exists());
        let inits: Vec<_> = std::fs::read_dir(out.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("init-"))
            .collect();
        assert_eq!(inits.len(), 2);
    }

    #[tokio::test]
    async fn complete_chunk_with_media_but_no_init_is_a_protocol_violation() {
        let stage = tempfile::tempdir().unwrap();
        let source = FakeSource::new(&["chunk-stream0-00001.m4s"]);
        let err = Aggregator::stage_chunk(&source, stage.path(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, SegmentError::Protocol { .. }));
    }

    #[tokio::test]
    async fn manifest_start_number_is_rewritten_on_disk() {
        let out = tempfile::tempdir().unwrap();
        let source = FakeSource::new(&["init-stream0.m4s", "chunk-stream0-00001.m4s"]);
        source.insert_with(
            "output.mpd",
            br#"<MPD><SegmentTemplate startNumber="1"/></MPD>"#,
        );
        let mut agg = Aggregator::new(out.path().to_path_buf(), 7, poster());
        agg.drain_live(&source, true).await.unwrap();
        let written = std::fs::read_to_string(out.path().join("output.mpd")).unwrap();
        assert!(written.contains("startNumber=\"7\""));
    }

    #[tokio::test]
    async fn manifest_held_until_media_exists() {
        let out = tempfile::tempdir().unwrap();
        let source = FakeSource::new(&["init-stream0.m4s", "output.mpd"]);
        let mut agg = Aggregator::new(out.path().to_path_buf(), 0, poster());
        agg.drain_live(&source, true).await.unwrap();
        // init alone: manifest neither written nor posted
        assert!(!out.path().join("output.mpd").exists());

        source.insert("chunk-stream0-00001.m4s");
        agg.drain_live(&source, true).await.unwrap();
        assert!(out.path().join("output.mpd").exists());
    }
}
