//! Turns a [`Sound`] into a playable frame stream.

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use bytes::Bytes;
use dashmap::DashSet;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    codec,
    pipeline::{self, Pipeline, StageLauncher, StagePrograms},
    sound::{Sound, SoundKind},
};
use crate::{
    error::{DispatchError, DispatchResult},
    sources,
};

/// Frames of one play, either resident or produced live.
pub enum FrameStream {
    Memory { frames: Arc<[Bytes]>, next: usize },
    Live(Pipeline),
}

impl FrameStream {
    pub fn memory(frames: impl Into<Arc<[Bytes]>>) -> Self {
        FrameStream::Memory {
            frames: frames.into(),
            next: 0,
        }
    }

    pub async fn next_frame(&mut self) -> DispatchResult<Option<Bytes>> {
        match self {
            FrameStream::Memory { frames, next } => {
                let frame = frames.get(*next).cloned();
                *next += 1;
                Ok(frame)
            }
            FrameStream::Live(pipeline) => pipeline.next_frame().await,
        }
    }

    /// Stops producing frames; live stages are killed.
    pub fn abort(&mut self) {
        match self {
            FrameStream::Memory { frames, next } => *next = frames.len(),
            FrameStream::Live(pipeline) => pipeline.kill(),
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, FrameStream::Live(_))
    }
}

/// Resolves sounds and runs background downloads into the audio directory.
#[derive(Clone)]
pub struct SourceResolver {
    launcher: Arc<dyn StageLauncher>,
    programs: StagePrograms,
    audio_dir: PathBuf,
    buffer_size: usize,
    downloading: Arc<DashSet<PathBuf>>,
}

impl SourceResolver {
    pub fn new(
        launcher: Arc<dyn StageLauncher>,
        programs: StagePrograms,
        audio_dir: impl Into<PathBuf>,
        buffer_size: usize,
    ) -> Self {
        Self {
            launcher,
            programs,
            audio_dir: audio_dir.into(),
            buffer_size,
            downloading: Arc::new(DashSet::new()),
        }
    }

    pub fn audio_dir(&self) -> &Path {
        &self.audio_dir
    }

    /// Resolves a sound into frames.
    ///
    /// On-disk sounds are read fully into a buffer owned by the returned
    /// stream, so it is released as soon as the play ends. Streamed sounds
    /// optionally start a prefetch next to the live pipeline.
    pub async fn resolve(&self, sound: &Sound, prefetch: bool) -> DispatchResult<FrameStream> {
        match sound.kind() {
            SoundKind::Preloaded(frames) => Ok(FrameStream::memory(frames.clone())),
            SoundKind::OnDisk(path) => Ok(FrameStream::memory(codec::load_frames(path).await?)),
            SoundKind::Streamed(locator) => {
                if prefetch {
                    self.spawn_prefetch(locator);
                }
                let chain = self.programs.stream_chain(locator);
                debug!("🌐 Streaming {}", locator);
                Ok(FrameStream::Live(Pipeline::launch(
                    self.launcher.as_ref(),
                    &chain,
                    self.buffer_size,
                )?))
            }
            SoundKind::RawFile(path) => {
                if !path.is_file() {
                    return Err(DispatchError::NotFound(path.clone()));
                }
                let chain = self.programs.file_chain(path);
                Ok(FrameStream::Live(Pipeline::launch(
                    self.launcher.as_ref(),
                    &chain,
                    self.buffer_size,
                )?))
            }
        }
    }

    /// Downloads `locator` into `file_name` in the audio directory.
    ///
    /// Concurrent downloads to the same file are refused, and so are live
    /// broadcasts.
    pub async fn download(&self, locator: &str, file_name: &str) -> DispatchResult<PathBuf> {
        let dest = self.audio_dir.join(file_name);
        if !self.downloading.insert(dest.clone()) {
            return Err(DispatchError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{file_name} is already being downloaded"),
            )));
        }

        let result = self.fetch_into(locator, &dest).await;
        self.downloading.remove(&dest);
        result.map(|_| dest)
    }

    async fn fetch_into(&self, locator: &str, dest: &Path) -> DispatchResult<()> {
        if self.is_live(locator).await {
            return Err(DispatchError::LiveStream(locator.to_string()));
        }
        let chain = self.programs.stream_chain(locator);
        pipeline::download_to_file(self.launcher.as_ref(), &chain, dest).await
    }

    /// Asks the fetch tool whether `locator` is broadcasting live. A query
    /// that cannot run counts as "not live".
    pub async fn is_live(&self, locator: &str) -> bool {
        let query = self.programs.live_query(locator);
        match pipeline::capture_output(self.launcher.as_ref(), &query).await {
            Ok(output) => output.trim().eq_ignore_ascii_case("true"),
            Err(e) => {
                debug!("No se pudo consultar si {} es en vivo: {}", locator, e);
                false
            }
        }
    }

    /// Lists the entries of a playlist as playable links, in order.
    pub async fn playlist(&self, locator: &str) -> DispatchResult<Vec<String>> {
        let listing = self.programs.playlist_listing(locator);
        let output = pipeline::capture_output(self.launcher.as_ref(), &listing).await?;
        Ok(output
            .lines()
            .filter_map(|entry| sources::playlist_entry_link(locator, entry))
            .collect())
    }

    /// Removes a file from the audio directory.
    ///
    /// Only plain names are accepted, and a file still being downloaded is
    /// left alone.
    pub async fn delete_file(&self, file_name: &str) -> DispatchResult<PathBuf> {
        if !sources::is_plain_file_name(file_name) {
            return Err(DispatchError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid file name `{file_name}`"),
            )));
        }

        let path = self.audio_dir.join(file_name);
        if self.downloading.contains(&path) {
            return Err(DispatchError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{file_name} is being downloaded"),
            )));
        }

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!("🗑️ {} eliminado", path.display());
                Ok(path)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(DispatchError::NotFound(path)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete_tag(&self, tag: &str) -> DispatchResult<PathBuf> {
        if !sources::is_valid_tag(tag) {
            return Err(DispatchError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid tag name `{tag}`"),
            )));
        }
        self.delete_file(&sources::tag_file_name(tag)).await
    }

    /// Removes the cached copy of a link.
    pub async fn delete_link(&self, link: &str) -> DispatchResult<PathBuf> {
        let locator = sources::canonical_locator(link);
        self.delete_file(&sources::cache_file_name(&locator)).await
    }

    /// Caches a streamed locator in the background.
    ///
    /// Failures are only logged and never touch the live stream.
    pub fn spawn_prefetch(&self, locator: &str) -> Option<JoinHandle<()>> {
        let file_name = sources::cache_file_name(locator);
        if self.audio_dir.join(&file_name).exists() {
            return None;
        }

        let resolver = self.clone();
        let locator = locator.to_string();
        Some(tokio::spawn(async move {
            info!("💾 Prefetch de {} → {}", locator, file_name);
            if let Err(e) = resolver.download(&locator, &file_name).await {
                warn!("⚠️ Prefetch de {} falló: {}", locator, e);
            }
        }))
    }
}
