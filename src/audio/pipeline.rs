//! Streaming pipeline: fetch → transcode → encode.
//!
//! Each stage is an external process whose stdout feeds the next stage's
//! stdin. All stages run concurrently; bounded pipe buffers give natural
//! backpressure, so a slow consumer throttles the whole chain. Only the
//! final stage's output is exposed, as a lazy sequence of frames.
//!
//! A stage that dies mid-stream simply ends the frame sequence (the codec
//! treats the truncated tail as end of stream). That loss is deliberate:
//! a clean stop and a crash look the same from here.
//!
//! Stages are launched through the [`StageLauncher`] seam so the pipeline
//! can run against fake stages in tests.

use std::{
    ffi::OsString,
    fmt, io,
    path::{Path, PathBuf},
    process::Stdio,
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader},
    process::{Child, Command},
    task::JoinHandle,
};
use tracing::{debug, info, trace, warn};

use super::codec::{self, FrameReader};
use crate::{
    error::{DispatchError, DispatchResult},
    sources,
};

/// Output PCM format of the transcode stage.
pub const PCM_SAMPLE_RATE: u32 = 48_000;
pub const PCM_CHANNELS: u8 = 2;

/// Byte stream flowing between stages.
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Fetch,
    Transcode,
    Encode,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageKind::Fetch => "fetch",
            StageKind::Transcode => "transcode",
            StageKind::Encode => "encode",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCommand {
    pub kind: StageKind,
    pub program: String,
    pub args: Vec<String>,
}

impl StageCommand {
    fn new<I, S>(kind: StageKind, program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind,
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

/// A running stage.
#[async_trait]
pub trait StageHandle: Send {
    /// Forcibly terminates the stage. Never blocks.
    fn kill(&mut self);

    /// Waits for the stage to exit. Returns `true` on a clean exit.
    async fn wait(&mut self) -> bool;
}

pub struct LaunchedStage {
    pub output: ByteStream,
    pub handle: Box<dyn StageHandle>,
}

/// Starts one stage, wiring `input` (if any) into its standard input.
pub trait StageLauncher: Send + Sync {
    fn launch(&self, command: &StageCommand, input: Option<ByteStream>) -> io::Result<LaunchedStage>;
}

/// Programs used for each stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePrograms {
    pub fetch: String,
    pub transcode: String,
    pub encode: String,
}

impl Default for StagePrograms {
    fn default() -> Self {
        Self {
            fetch: "yt-dlp".to_string(),
            transcode: "ffmpeg".to_string(),
            encode: "dca".to_string(),
        }
    }
}

impl StagePrograms {
    /// Three-stage chain for a network locator.
    pub fn stream_chain(&self, locator: &str) -> Vec<StageCommand> {
        // Solo audio cuando el servicio es conocido
        let format = if sources::is_youtube_url(locator) {
            "bestaudio[ext=m4a]/bestaudio/best"
        } else {
            "bestaudio/best"
        };

        vec![
            StageCommand::new(
                StageKind::Fetch,
                &self.fetch,
                ["--quiet", "--no-playlist", "-f", format, "-o", "-", locator],
            ),
            self.transcode_from("pipe:0"),
            self.encode(),
        ]
    }

    /// Fetch-stage query printing whether `locator` is a live broadcast.
    pub fn live_query(&self, locator: &str) -> StageCommand {
        StageCommand::new(
            StageKind::Fetch,
            &self.fetch,
            ["--quiet", "--no-playlist", "--skip-download", "--print", "is_live", locator],
        )
    }

    /// Fetch-stage query printing one entry id per line.
    pub fn playlist_listing(&self, locator: &str) -> StageCommand {
        StageCommand::new(
            StageKind::Fetch,
            &self.fetch,
            ["--quiet", "--ignore-errors", "--flat-playlist", "--get-id", locator],
        )
    }

    /// Two-stage chain for a local raw (non-encoded) file.
    pub fn file_chain(&self, path: &Path) -> Vec<StageCommand> {
        vec![self.transcode_from(&path.to_string_lossy()), self.encode()]
    }

    fn transcode_from(&self, input: &str) -> StageCommand {
        let rate = PCM_SAMPLE_RATE.to_string();
        let channels = PCM_CHANNELS.to_string();
        StageCommand::new(
            StageKind::Transcode,
            &self.transcode,
            ["-i", input, "-f", "s16le", "-ar", &rate, "-ac", &channels, "pipe:1"],
        )
    }

    fn encode(&self) -> StageCommand {
        StageCommand::new(StageKind::Encode, &self.encode, ["-raw", "-i", "pipe:0"])
    }
}

/// Launches stages as child processes.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    buffer_size: usize,
}

impl ProcessLauncher {
    pub fn new(buffer_size: usize) -> Self {
        Self { buffer_size }
    }
}

impl Default for ProcessLauncher {
    fn default() -> Self {
        Self::new(16 * 1024)
    }
}

impl StageLauncher for ProcessLauncher {
    fn launch(&self, command: &StageCommand, input: Option<ByteStream>) -> io::Result<LaunchedStage> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stdout not captured"))?;

        // El pump copia la salida de la etapa anterior a nuestro stdin.
        // Al terminar suelta el stdin, lo que cierra el pipe (EOF aguas abajo).
        let kind = command.kind;
        let pump = match (input, child.stdin.take()) {
            (Some(mut upstream), Some(mut stdin)) => Some(tokio::spawn(async move {
                match tokio::io::copy(&mut upstream, &mut stdin).await {
                    Ok(n) => trace!("{} stdin cerrado tras {} bytes", kind, n),
                    Err(e) => trace!("{} stdin interrumpido: {}", kind, e),
                }
            })),
            _ => None,
        };

        debug!("⚙️ Etapa {} lanzada: {}", command.kind, command.program);

        Ok(LaunchedStage {
            output: Box::new(BufReader::with_capacity(self.buffer_size, stdout)),
            handle: Box::new(ProcessStage { kind, child, pump }),
        })
    }
}

struct ProcessStage {
    kind: StageKind,
    child: Child,
    pump: Option<JoinHandle<()>>,
}

#[async_trait]
impl StageHandle for ProcessStage {
    fn kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            trace!("{} ya había terminado: {}", self.kind, e);
        }
        if let Some(pump) = &self.pump {
            pump.abort();
        }
    }

    async fn wait(&mut self) -> bool {
        if let Some(pump) = self.pump.take() {
            let _ = pump.await;
        }

        match self.child.wait().await {
            Ok(status) if status.success() => true,
            Ok(status) => {
                debug!("⚙️ Etapa {} terminó con {}", self.kind, status);
                false
            }
            Err(e) => {
                warn!("⚙️ No se pudo esperar la etapa {}: {}", self.kind, e);
                false
            }
        }
    }
}

/// Starts every stage in order, chaining stdout to stdin.
///
/// If a stage fails to start, the ones already running are killed and the
/// error names the stage that failed.
fn launch_chain(
    launcher: &dyn StageLauncher,
    commands: &[StageCommand],
) -> DispatchResult<(Vec<Box<dyn StageHandle>>, ByteStream)> {
    let mut stages: Vec<Box<dyn StageHandle>> = Vec::with_capacity(commands.len());
    let mut upstream: Option<ByteStream> = None;

    for command in commands {
        match launcher.launch(command, upstream.take()) {
            Ok(stage) => {
                stages.push(stage.handle);
                upstream = Some(stage.output);
            }
            Err(source) => {
                warn!("❌ No se pudo iniciar la etapa {} ({}): {}", command.kind, command.program, source);
                for stage in &mut stages {
                    stage.kill();
                }
                reap(stages);
                return Err(DispatchError::PipelineStart {
                    stage: command.kind,
                    source,
                });
            }
        }
    }

    let output = upstream.ok_or_else(|| {
        DispatchError::Io(io::Error::new(io::ErrorKind::InvalidInput, "empty stage chain"))
    })?;
    Ok((stages, output))
}

/// Waits for stages in the background so they never linger as zombies.
fn reap(stages: Vec<Box<dyn StageHandle>>) {
    if stages.is_empty() {
        return;
    }
    if let Ok(runtime) = tokio::runtime::Handle::try_current() {
        runtime.spawn(async move {
            for mut stage in stages {
                stage.wait().await;
            }
        });
    }
}

/// A running chain of stages exposed as a frame sequence.
pub struct Pipeline {
    stages: Vec<Box<dyn StageHandle>>,
    frames: FrameReader<ByteStream>,
}

impl Pipeline {
    pub fn launch(
        launcher: &dyn StageLauncher,
        commands: &[StageCommand],
        buffer_size: usize,
    ) -> DispatchResult<Self> {
        let (stages, output) = launch_chain(launcher, commands)?;
        Ok(Self {
            stages,
            frames: codec::frame_reader(output, buffer_size),
        })
    }

    pub async fn next_frame(&mut self) -> DispatchResult<Option<Bytes>> {
        codec::next_frame(&mut self.frames).await
    }

    /// Terminates every stage still running.
    pub fn kill(&mut self) {
        for stage in &mut self.stages {
            stage.kill();
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        reap(std::mem::take(&mut self.stages));
    }
}

/// Runs a chain to completion, writing the final output to `dest`.
///
/// Output goes to `<dest>.part` first and is renamed only when every stage
/// exited cleanly, so a partial file is never picked up as a cached sound.
pub async fn download_to_file(
    launcher: &dyn StageLauncher,
    commands: &[StageCommand],
    dest: &Path,
) -> DispatchResult<()> {
    let (mut stages, mut output) = launch_chain(launcher, commands)?;
    let part = part_path(dest);

    let written = async {
        let mut file = tokio::fs::File::create(&part).await?;
        let n = tokio::io::copy(&mut output, &mut file).await?;
        file.flush().await?;
        Ok::<_, io::Error>(n)
    }
    .await;
    drop(output);

    let mut clean = true;
    for stage in &mut stages {
        clean &= stage.wait().await;
    }

    match written {
        Ok(n) if clean => {
            tokio::fs::rename(&part, dest).await?;
            info!("💾 {} guardado ({} bytes)", dest.display(), n);
            Ok(())
        }
        Ok(_) => {
            let _ = tokio::fs::remove_file(&part).await;
            Err(DispatchError::Io(io::Error::new(
                io::ErrorKind::Other,
                "a stage exited abnormally during download",
            )))
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&part).await;
            Err(DispatchError::Io(e))
        }
    }
}

/// Runs a single query stage and returns everything it printed.
///
/// The exit status is only logged: a listing that skipped a broken entry
/// still carries the good ones.
pub async fn capture_output(launcher: &dyn StageLauncher, command: &StageCommand) -> DispatchResult<String> {
    let (mut stages, mut output) = launch_chain(launcher, std::slice::from_ref(command))?;

    let mut text = String::new();
    let read = output.read_to_string(&mut text).await;
    drop(output);

    for stage in &mut stages {
        if !stage.wait().await {
            debug!("⚙️ {} terminó con error, se usa su salida parcial", command.program);
        }
    }
    read?;
    Ok(text)
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name: OsString = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}
