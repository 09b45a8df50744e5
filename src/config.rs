use anyhow::{Context, Result};
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};

use crate::audio::pipeline::StagePrograms;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub command_prefix: String,

    // Audio
    pub audio_dir: PathBuf,
    pub max_queue_size: usize,
    pub pipe_buffer_size: usize,

    // Tiempos
    pub channel_switch_delay: Duration,
    pub pre_play_delay: Duration,
    pub queue_idle_grace: Duration,

    // Etapas externas
    pub fetch_program: String,
    pub transcode_program: String,
    pub encode_program: String,

    // Features
    pub enable_prefetch: bool,
    pub rng_seed: Option<u64>,
}

fn env_or<T>(name: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = std::env::var(name).unwrap_or_else(|_| default.to_string());
    raw.trim()
        .parse()
        .with_context(|| format!("{name} inválido: {raw}"))
}

fn env_duration(name: &str, default: &str) -> Result<Duration> {
    let raw = std::env::var(name).unwrap_or_else(|_| default.to_string());
    humantime::parse_duration(raw.trim()).with_context(|| format!("{name} inválido: {raw}"))
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN").context("DISCORD_TOKEN no definido")?,
            command_prefix: std::env::var("COMMAND_PREFIX").unwrap_or_else(|_| "!".to_string()),

            // Audio
            audio_dir: std::env::var("AUDIO_DIR")
                .unwrap_or_else(|_| "audio".to_string())
                .into(),
            max_queue_size: env_or("MAX_QUEUE_SIZE", "9999")?,
            pipe_buffer_size: env_or("PIPE_BUFFER_SIZE", "16384")?,

            // Tiempos
            channel_switch_delay: env_duration("CHANNEL_SWITCH_DELAY", "125ms")?,
            pre_play_delay: env_duration("PRE_PLAY_DELAY", "32ms")?,
            queue_idle_grace: env_duration("QUEUE_IDLE_GRACE", "0ms")?,

            // Etapas externas
            fetch_program: std::env::var("FETCH_PROGRAM").unwrap_or_else(|_| "yt-dlp".to_string()),
            transcode_program: std::env::var("TRANSCODE_PROGRAM").unwrap_or_else(|_| "ffmpeg".to_string()),
            encode_program: std::env::var("ENCODE_PROGRAM").unwrap_or_else(|_| "dca".to_string()),

            // Features
            enable_prefetch: env_or("ENABLE_PREFETCH", "false")?,
            rng_seed: match std::env::var("RNG_SEED") {
                Ok(val) if !val.trim().is_empty() => Some(val.trim().parse().context("RNG_SEED inválido")?),
                _ => None,
            },
        };

        std::fs::create_dir_all(&config.audio_dir)
            .with_context(|| format!("No se pudo crear {}", config.audio_dir.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Sanity checks that catch common mistakes before the bot connects.
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("DISCORD_TOKEN está vacío");
        }

        if self.command_prefix.is_empty() {
            anyhow::bail!("Command prefix cannot be empty");
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.pipe_buffer_size < 1024 {
            anyhow::bail!("Pipe buffer size must be at least 1024 bytes, got: {}", self.pipe_buffer_size);
        }

        for (name, program) in [
            ("fetch", &self.fetch_program),
            ("transcode", &self.transcode_program),
            ("encode", &self.encode_program),
        ] {
            if program.trim().is_empty() {
                anyhow::bail!("The {} program cannot be empty", name);
            }
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The token is never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Audio: dir {}, {} queue, {} byte pipes\n  \
            Delays: switch {}, pre-play {}, idle grace {}\n  \
            Stages: {} → {} → {}\n  \
            Features: prefix '{}', prefetch={}, seed={}",
            self.audio_dir.display(),
            self.max_queue_size,
            self.pipe_buffer_size,
            humantime::format_duration(self.channel_switch_delay),
            humantime::format_duration(self.pre_play_delay),
            humantime::format_duration(self.queue_idle_grace),
            self.fetch_program,
            self.transcode_program,
            self.encode_program,
            self.command_prefix,
            self.enable_prefetch,
            self.rng_seed.map_or("random".to_string(), |s| s.to_string()),
        )
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            max_queue_size: self.max_queue_size,
            channel_switch_delay: self.channel_switch_delay,
            pre_play_delay: self.pre_play_delay,
            idle_grace: self.queue_idle_grace,
            prefetch_by_default: self.enable_prefetch,
        }
    }

    pub fn stage_programs(&self) -> StagePrograms {
        StagePrograms {
            fetch: self.fetch_program.clone(),
            transcode: self.transcode_program.clone(),
            encode: self.encode_program.clone(),
        }
    }

    /// Random source for weighted picks; seeded when `RNG_SEED` is set.
    pub fn rng(&self) -> StdRng {
        match self.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        let programs = StagePrograms::default();
        Self {
            // Discord (sin token por defecto)
            discord_token: String::new(),
            command_prefix: "!".to_string(),

            audio_dir: "audio".into(),
            max_queue_size: 9999,
            pipe_buffer_size: 16 * 1024,

            channel_switch_delay: Duration::from_millis(125),
            pre_play_delay: Duration::from_millis(32),
            queue_idle_grace: Duration::ZERO,

            fetch_program: programs.fetch,
            transcode_program: programs.transcode,
            encode_program: programs.encode,

            enable_prefetch: false,
            rng_seed: None,
        }
    }
}

/// Knobs of the dispatch core, independent of how they were loaded.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DispatchSettings {
    pub max_queue_size: usize,
    /// Pause after moving to another channel, before streaming.
    pub channel_switch_delay: Duration,
    /// Pause before every play.
    pub pre_play_delay: Duration,
    /// How long an empty queue waits for new work before draining.
    pub idle_grace: Duration,
    pub prefetch_by_default: bool,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Config::default().dispatch_settings()
    }
}
