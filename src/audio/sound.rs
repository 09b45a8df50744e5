//! Sounds and weighted sound collections.

use std::{fmt, path::PathBuf, sync::Arc, time::Duration};

use bytes::Bytes;
use rand::Rng;
use tracing::{debug, warn};

use super::codec;

/// Trailing delay used for ad-hoc sounds (links, tags, files).
pub const DEFAULT_PART_DELAY: Duration = Duration::from_millis(250);

/// Where the frames of a sound come from.
#[derive(Clone)]
pub enum SoundKind {
    /// Frames already resident in memory, shared between plays.
    Preloaded(Arc<[Bytes]>),
    /// Encoded file read into memory for the duration of one play.
    OnDisk(PathBuf),
    /// Network locator streamed through fetch → transcode → encode.
    Streamed(String),
    /// Local non-encoded file streamed through transcode → encode.
    RawFile(PathBuf),
}

impl fmt::Debug for SoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SoundKind::Preloaded(frames) => write!(f, "Preloaded({} frames)", frames.len()),
            SoundKind::OnDisk(path) => write!(f, "OnDisk({})", path.display()),
            SoundKind::Streamed(locator) => write!(f, "Streamed({locator})"),
            SoundKind::RawFile(path) => write!(f, "RawFile({})", path.display()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Sound {
    name: String,
    weight: u32,
    part_delay: Duration,
    kind: SoundKind,
}

impl Sound {
    pub fn new(name: impl Into<String>, weight: u32, part_delay: Duration, kind: SoundKind) -> Self {
        Self {
            name: name.into(),
            weight,
            part_delay,
            kind,
        }
    }

    pub fn preloaded(name: impl Into<String>, weight: u32, part_delay: Duration, frames: Vec<Bytes>) -> Self {
        Self::new(name, weight, part_delay, SoundKind::Preloaded(frames.into()))
    }

    pub fn on_disk(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::new(name, 1, DEFAULT_PART_DELAY, SoundKind::OnDisk(path.into()))
    }

    pub fn streamed(locator: impl Into<String>) -> Self {
        let locator = locator.into();
        Self::new(locator.clone(), 1, DEFAULT_PART_DELAY, SoundKind::Streamed(locator))
    }

    pub fn raw_file(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::new(name, 1, DEFAULT_PART_DELAY, SoundKind::RawFile(path.into()))
    }

    // Getters
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn weight(&self) -> u32 {
        self.weight
    }
    pub fn part_delay(&self) -> Duration {
        self.part_delay
    }
    pub fn kind(&self) -> &SoundKind {
        &self.kind
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.kind, SoundKind::Preloaded(_))
    }

    /// Human readable label for status updates.
    ///
    /// Cached YouTube files (`yt_<id>.dca`) are shown as their short link.
    pub fn display_label(&self) -> String {
        if let Some(id) = self
            .name
            .strip_prefix("yt_")
            .and_then(|rest| rest.split('.').next())
            .filter(|id| !id.is_empty())
        {
            return format!("youtu.be/{id}");
        }
        self.name.clone()
    }

    /// Eagerly loads an on-disk sound into memory.
    ///
    /// On failure the sound stays on-disk, so the error surfaces again (as
    /// `NotFound`/`Decode`) only if it is actually picked.
    pub async fn preload(self) -> Self {
        let SoundKind::OnDisk(path) = &self.kind else {
            return self;
        };

        match codec::load_frames(path).await {
            Ok(frames) => Self {
                kind: SoundKind::Preloaded(frames.into()),
                ..self
            },
            Err(e) => {
                warn!("⚠️ No se pudo precargar {}: {}", self.name, e);
                self
            }
        }
    }
}

/// A named group of weighted sounds, optionally chained to another group
/// whose random pick is appended after every pick from this one.
#[derive(Debug, Clone)]
pub struct SoundCollection {
    prefix: String,
    commands: Vec<String>,
    sounds: Vec<Arc<Sound>>,
    chain_with: Option<Arc<SoundCollection>>,
    total_weight: u64,
}

impl SoundCollection {
    pub fn new(prefix: impl Into<String>, commands: Vec<String>, sounds: Vec<Sound>) -> Self {
        let total_weight = sounds.iter().map(|s| u64::from(s.weight)).sum();
        Self {
            prefix: prefix.into(),
            commands,
            sounds: sounds.into_iter().map(Arc::new).collect(),
            chain_with: None,
            total_weight,
        }
    }

    pub fn with_chain(mut self, target: Arc<SoundCollection>) -> Self {
        self.chain_with = Some(target);
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
    pub fn sounds(&self) -> &[Arc<Sound>] {
        &self.sounds
    }
    pub fn chain_with(&self) -> Option<&Arc<SoundCollection>> {
        self.chain_with.as_ref()
    }
    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }

    pub fn responds_to(&self, command: &str) -> bool {
        self.commands.iter().any(|c| c == command)
    }

    pub fn find(&self, name: &str) -> Option<Arc<Sound>> {
        self.sounds.iter().find(|s| s.name == name).cloned()
    }

    /// Weighted random pick.
    ///
    /// Draws uniformly from `[0, total_weight)` and returns the first sound
    /// whose cumulative weight strictly exceeds the draw. Zero-weight sounds
    /// are never returned; a zero-weight collection yields `None`.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Arc<Sound>> {
        if self.total_weight == 0 {
            return None;
        }

        let draw = rng.gen_range(0..self.total_weight);
        let mut cumulative = 0u64;
        for sound in &self.sounds {
            cumulative += u64::from(sound.weight);
            if draw < cumulative {
                return Some(sound.clone());
            }
        }
        None
    }

    /// Preloads every sound of the collection into memory.
    pub async fn load(self) -> Self {
        let mut sounds = Vec::with_capacity(self.sounds.len());
        for sound in self.sounds {
            let sound = Arc::unwrap_or_clone(sound).preload().await;
            sounds.push(Arc::new(sound));
        }

        let loaded = sounds.iter().filter(|s| s.is_loaded()).count();
        debug!("🎺 Colección {}: {}/{} sonidos en memoria", self.prefix, loaded, sounds.len());

        Self { sounds, ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::{rngs::StdRng, SeedableRng};
    use std::collections::HashMap;

    fn sound(name: &str, weight: u32) -> Sound {
        Sound::preloaded(name, weight, DEFAULT_PART_DELAY, vec![Bytes::from_static(b"x")])
    }

    fn airhorn() -> SoundCollection {
        SoundCollection::new(
            "airhorn",
            vec!["!airhorn".into()],
            vec![sound("default", 1000), sound("reverb", 800), sound("truck", 10)],
        )
    }

    #[test]
    fn test_total_weight_is_sum_of_weights() {
        assert_eq!(airhorn().total_weight(), 1810);
    }

    #[test]
    fn test_pick_matches_weight_distribution() {
        let coll = SoundCollection::new(
            "cow",
            vec![],
            vec![sound("herd", 10), sound("moo", 30), sound("x3", 60)],
        );
        let mut rng = StdRng::seed_from_u64(7);
        let draws = 100_000;

        let mut counts: HashMap<String, u32> = HashMap::new();
        for _ in 0..draws {
            let picked = coll.pick(&mut rng).unwrap();
            *counts.entry(picked.name().to_string()).or_default() += 1;
        }

        for (name, weight) in [("herd", 10.0), ("moo", 30.0), ("x3", 60.0)] {
            let observed = f64::from(counts[name]) / f64::from(draws);
            let expected = weight / 100.0;
            assert!(
                (observed - expected).abs() < 0.01,
                "{name}: observed {observed}, expected {expected}"
            );
        }
    }

    #[test]
    fn test_zero_weight_sound_is_never_picked() {
        let coll = SoundCollection::new("wow", vec![], vec![sound("silent", 0), sound("wow", 5)]);
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..1_000 {
            assert_eq!(coll.pick(&mut rng).unwrap().name(), "wow");
        }
    }

    #[test]
    fn test_zero_total_weight_picks_nothing() {
        let coll = SoundCollection::new("empty", vec![], vec![sound("a", 0)]);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(coll.pick(&mut rng).is_none());
        assert!(SoundCollection::new("none", vec![], vec![]).pick(&mut rng).is_none());
    }

    #[test]
    fn test_seeded_rng_is_deterministic() {
        let coll = airhorn();
        let a: Vec<_> = {
            let mut rng = StdRng::seed_from_u64(42);
            (0..20).map(|_| coll.pick(&mut rng).unwrap().name().to_string()).collect()
        };
        let b: Vec<_> = {
            let mut rng = StdRng::seed_from_u64(42);
            (0..20).map(|_| coll.pick(&mut rng).unwrap().name().to_string()).collect()
        };
        assert_eq!(a, b);
    }

    #[test]
    fn test_find_and_commands() {
        let coll = airhorn();
        assert!(coll.responds_to("!airhorn"));
        assert!(!coll.responds_to("!anotha"));
        assert_eq!(coll.find("reverb").unwrap().weight(), 800);
        assert!(coll.find("missing").is_none());
    }

    #[test]
    fn test_display_label_for_cached_youtube_file() {
        assert_eq!(Sound::on_disk("yt_dQw4w9WgXcQ.dca", "x").display_label(), "youtu.be/dQw4w9WgXcQ");
        assert_eq!(Sound::on_disk("tag_bruh.dca", "x").display_label(), "tag_bruh.dca");
    }

    #[tokio::test]
    async fn test_load_keeps_missing_sounds_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("bees_bees.dca");
        std::fs::write(&present, codec::encode_frames([b"bz".as_slice()]).unwrap()).unwrap();

        let coll = SoundCollection::new(
            "bees",
            vec![],
            vec![
                Sound::new("bees", 100, DEFAULT_PART_DELAY, SoundKind::OnDisk(present)),
                Sound::new("too", 50, DEFAULT_PART_DELAY, SoundKind::OnDisk(dir.path().join("bees_too.dca"))),
            ],
        )
        .load()
        .await;

        assert!(coll.find("bees").unwrap().is_loaded());
        assert!(!coll.find("too").unwrap().is_loaded());
        assert_eq!(coll.total_weight(), 150);
    }
}
