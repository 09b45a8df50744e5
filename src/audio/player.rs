use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{
    io,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::sync::Notify;
use tracing::{debug, info};

use super::{
    connection::{StatusReporter, VoiceConnector},
    queue::{PlayRequest, Selection, TenantQueue},
    resolver::SourceResolver,
    worker,
};
use crate::{
    config::DispatchSettings,
    error::{DispatchError, DispatchResult},
    sources::{self, LinkClassifier},
};

/// Per-guild state shared between the registry and the guild's worker.
pub(crate) struct TenantState {
    pub(crate) guild_id: GuildId,
    pub(crate) queue: Mutex<TenantQueue>,
    pub(crate) cancel: AtomicBool,
    pub(crate) streaming: AtomicBool,
    pub(crate) wake: Notify,
}

impl TenantState {
    fn new(guild_id: GuildId, capacity: usize) -> Self {
        Self {
            guild_id,
            queue: Mutex::new(TenantQueue::new(capacity)),
            cancel: AtomicBool::new(false),
            streaming: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }
}

pub(crate) struct RegistryInner {
    pub(crate) settings: DispatchSettings,
    pub(crate) resolver: SourceResolver,
    pub(crate) connector: Arc<dyn VoiceConnector>,
    pub(crate) status: Arc<dyn StatusReporter>,
    rng: Mutex<StdRng>,
    tenants: DashMap<GuildId, Arc<TenantState>>,
    prefetch: DashMap<GuildId, bool>,
}

/// Process-wide map from guild to its queue and worker.
///
/// A worker exists only while its guild has something to play. Creating
/// and removing guild state goes through the map's entry API, so two
/// submissions racing on an idle guild can never start two workers.
#[derive(Clone)]
pub struct DispatchRegistry {
    pub(crate) inner: Arc<RegistryInner>,
}

impl DispatchRegistry {
    pub fn new(
        settings: DispatchSettings,
        resolver: SourceResolver,
        connector: Arc<dyn VoiceConnector>,
        status: Arc<dyn StatusReporter>,
        rng: StdRng,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                settings,
                resolver,
                connector,
                status,
                rng: Mutex::new(rng),
                tenants: DashMap::new(),
                prefetch: DashMap::new(),
            }),
        }
    }

    /// Submits a play; `false` when the guild's queue is full. Never blocks.
    pub fn submit(&self, guild_id: GuildId, channel_id: ChannelId, user_id: UserId, selection: Selection) -> bool {
        self.try_submit(guild_id, channel_id, user_id, selection).is_ok()
    }

    /// Like [`submit`](Self::submit) but says why a request was refused.
    pub fn try_submit(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        user_id: UserId,
        selection: Selection,
    ) -> DispatchResult<()> {
        let request = {
            let mut rng = self.inner.rng.lock();
            PlayRequest::build(guild_id, channel_id, user_id, selection, &mut *rng)?
        };
        self.enqueue(request)
    }

    /// Hands a built request to its guild's worker, starting one if needed.
    pub fn enqueue(&self, request: PlayRequest) -> DispatchResult<()> {
        let guild_id = request.guild_id;

        match self.inner.tenants.entry(guild_id) {
            Entry::Occupied(entry) => {
                let state = entry.get();
                if let Err(request) = state.queue.lock().try_push(request) {
                    debug!("🚫 Cola de {} llena, se descarta {}", guild_id, request.sound.name());
                    return Err(DispatchError::QueueFull);
                }
                state.wake.notify_one();
                Ok(())
            }
            Entry::Vacant(entry) => {
                let state = Arc::new(TenantState::new(guild_id, self.inner.settings.max_queue_size));
                {
                    let mut queue = state.queue.lock();
                    if !queue.has_room() {
                        return Err(DispatchError::QueueFull);
                    }
                    queue.begin();
                }
                entry.insert(state.clone());

                info!("▶️ Nuevo worker para {}", guild_id);
                tokio::spawn(worker::run(self.clone(), state, request));
                Ok(())
            }
        }
    }

    /// Cancels the sound currently streaming in a guild. The queue is kept.
    pub fn cancel_current(&self, guild_id: GuildId) {
        if let Some(state) = self.inner.tenants.get(&guild_id) {
            if state.streaming.load(Ordering::SeqCst) {
                state.cancel.store(true, Ordering::SeqCst);
                debug!("⏭️ Cancelación solicitada en {}", guild_id);
            }
        }
    }

    /// Requests waiting to start (the one playing is not counted).
    pub fn queue_depth(&self, guild_id: GuildId) -> usize {
        self.inner
            .tenants
            .get(&guild_id)
            .map_or(0, |state| state.queue.lock().len())
    }

    pub fn is_active(&self, guild_id: GuildId) -> bool {
        self.inner.tenants.contains_key(&guild_id)
    }

    pub fn set_prefetch(&self, guild_id: GuildId, enabled: bool) {
        self.inner.prefetch.insert(guild_id, enabled);
    }

    pub fn prefetch_enabled(&self, guild_id: GuildId) -> bool {
        self.inner
            .prefetch
            .get(&guild_id)
            .map_or(self.inner.settings.prefetch_by_default, |v| *v)
    }

    pub fn resolver(&self) -> &SourceResolver {
        &self.inner.resolver
    }

    /// Queues every entry of a playlist in order, stopping once the guild's
    /// queue is full. Entries already cached play from disk.
    ///
    /// Returns how many entries were queued and how many the playlist had.
    pub async fn submit_playlist(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        user_id: UserId,
        locator: &str,
    ) -> DispatchResult<(usize, usize)> {
        let locator = sources::canonical_locator(locator);
        let links = self.inner.resolver.playlist(&locator).await?;
        let classifier = LinkClassifier::new(self.inner.resolver.audio_dir());

        let mut queued = 0;
        for link in &links {
            let Some(sound) = classifier.sound_for(link) else {
                continue;
            };
            match self.try_submit(guild_id, channel_id, user_id, Selection::Sound(Arc::new(sound))) {
                Ok(()) => queued += 1,
                Err(DispatchError::QueueFull) => {
                    debug!("🚫 Cola de {} llena tras {} de {} entradas", guild_id, queued, links.len());
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        info!("📜 {} de {} entradas de {} en cola", queued, links.len(), locator);
        Ok((queued, links.len()))
    }

    /// Downloads `locator` once and stores it as the tag `name`.
    pub async fn create_tag(&self, name: &str, locator: &str) -> DispatchResult<PathBuf> {
        if !sources::is_valid_tag(name) {
            return Err(DispatchError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid tag name `{name}`"),
            )));
        }

        let file_name = sources::tag_file_name(name);
        if self.inner.resolver.audio_dir().join(&file_name).exists() {
            return Err(DispatchError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("tag `{name}` already exists"),
            )));
        }

        let locator = sources::canonical_locator(locator);
        let path = self.inner.resolver.download(&locator, &file_name).await?;
        info!("🏷️ Tag {} creado desde {}", name, locator);
        Ok(path)
    }

    /// Removes the guild's state if it still belongs to `state` and has
    /// nothing left to do.
    pub(crate) fn release_if_idle(&self, state: &Arc<TenantState>) -> bool {
        self.inner
            .tenants
            .remove_if(&state.guild_id, |_, current| {
                Arc::ptr_eq(current, state) && current.queue.lock().is_idle()
            })
            .is_some()
    }

    /// Removes the guild's state and drops everything queued on it.
    pub(crate) fn discard(&self, state: &Arc<TenantState>) -> usize {
        self.inner
            .tenants
            .remove_if(&state.guild_id, |_, current| Arc::ptr_eq(current, state));
        state.queue.lock().clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        connection::{fakes::FakeConnector, NoStatus},
        pipeline::{tests::FakeLauncher, StagePrograms},
        sound::{Sound, DEFAULT_PART_DELAY},
    };
    use bytes::Bytes;
    use rand::SeedableRng;
    use std::time::Duration;

    fn settings(capacity: usize) -> DispatchSettings {
        DispatchSettings {
            max_queue_size: capacity,
            channel_switch_delay: Duration::ZERO,
            pre_play_delay: Duration::ZERO,
            idle_grace: Duration::ZERO,
            prefetch_by_default: false,
        }
    }

    fn registry(capacity: usize, dir: &std::path::Path) -> DispatchRegistry {
        let resolver = SourceResolver::new(Arc::new(FakeLauncher::default()), StagePrograms::default(), dir, 1024);
        DispatchRegistry::new(
            settings(capacity),
            resolver,
            Arc::new(FakeConnector::default()),
            Arc::new(NoStatus),
            StdRng::seed_from_u64(1),
        )
    }

    fn explicit(name: &str) -> Selection {
        Selection::Sound(Arc::new(Sound::preloaded(
            name,
            1,
            DEFAULT_PART_DELAY,
            vec![Bytes::copy_from_slice(name.as_bytes())],
        )))
    }

    #[tokio::test]
    async fn test_excess_submissions_are_dropped_without_blocking() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(3, dir.path());
        let guild = GuildId::new(10);

        let accepted = (0..6)
            .filter(|i| registry.submit(guild, ChannelId::new(1), UserId::new(1), explicit(&format!("s{i}"))))
            .count();

        assert_eq!(accepted, 3);
        assert_eq!(registry.queue_depth(guild), 2);
        assert!(matches!(
            registry.try_submit(guild, ChannelId::new(1), UserId::new(1), explicit("late")),
            Err(DispatchError::QueueFull)
        ));
    }

    #[tokio::test]
    async fn test_capacity_two_takes_one_extra_request() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(2, dir.path());
        let guild = GuildId::new(11);

        let results: Vec<bool> = ["a", "b", "c"]
            .iter()
            .map(|name| registry.submit(guild, ChannelId::new(1), UserId::new(1), explicit(name)))
            .collect();

        assert_eq!(results, vec![true, true, false]);
        assert_eq!(registry.queue_depth(guild), 1);
    }

    #[tokio::test]
    async fn test_guilds_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(1, dir.path());

        assert!(registry.submit(GuildId::new(1), ChannelId::new(1), UserId::new(1), explicit("a")));
        assert!(registry.submit(GuildId::new(2), ChannelId::new(2), UserId::new(1), explicit("b")));
        assert!(!registry.submit(GuildId::new(1), ChannelId::new(1), UserId::new(1), explicit("c")));
        assert!(registry.is_active(GuildId::new(1)));
        assert!(registry.is_active(GuildId::new(2)));
    }

    #[tokio::test]
    async fn test_cancel_on_idle_guild_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(5, dir.path());

        registry.cancel_current(GuildId::new(99));
        assert!(!registry.is_active(GuildId::new(99)));
        assert_eq!(registry.queue_depth(GuildId::new(99)), 0);
    }

    #[tokio::test]
    async fn test_prefetch_toggle_is_per_guild() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(5, dir.path());

        registry.set_prefetch(GuildId::new(1), true);
        assert!(registry.prefetch_enabled(GuildId::new(1)));
        assert!(!registry.prefetch_enabled(GuildId::new(2)));
    }

    #[tokio::test]
    async fn test_playlist_entries_are_queued_until_full() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("yt_bbbbbbbbbbb.dca"), b"").unwrap();
        let launcher = FakeLauncher {
            source: b"aaaaaaaaaaa\nbbbbbbbbbbb\nccccccccccc\nddddddddddd\n".to_vec(),
            ..Default::default()
        };
        let resolver = SourceResolver::new(Arc::new(launcher), StagePrograms::default(), dir.path(), 1024);
        let registry = DispatchRegistry::new(
            settings(3),
            resolver,
            Arc::new(FakeConnector::default()),
            Arc::new(NoStatus),
            StdRng::seed_from_u64(1),
        );
        let guild = GuildId::new(12);

        let (queued, total) = registry
            .submit_playlist(guild, ChannelId::new(1), UserId::new(1), "youtube.com/playlist?list=PL1")
            .await
            .unwrap();

        assert_eq!((queued, total), (3, 4));
        assert_eq!(registry.queue_depth(guild), 2);
    }

    #[tokio::test]
    async fn test_create_tag_downloads_once() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = SourceResolver::new(
            Arc::new(FakeLauncher::with_frames(&[b"bruh"])),
            StagePrograms::default(),
            dir.path(),
            1024,
        );
        let registry = DispatchRegistry::new(
            settings(5),
            resolver,
            Arc::new(FakeConnector::default()),
            Arc::new(NoStatus),
            StdRng::seed_from_u64(1),
        );

        let path = registry.create_tag("bruh", "youtu.be/dQw4w9WgXcQ").await.unwrap();
        assert_eq!(path, dir.path().join("tag_bruh.dca"));
        assert!(registry.create_tag("bruh", "youtu.be/dQw4w9WgXcQ").await.is_err());
        assert!(registry.create_tag("../evil", "youtu.be/dQw4w9WgXcQ").await.is_err());
    }
}
