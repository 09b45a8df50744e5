use chrono::{DateTime, Utc};
use rand::Rng;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{collections::VecDeque, sync::Arc};
use tracing::{debug, warn};

use super::sound::{Sound, SoundCollection};
use crate::error::{DispatchError, DispatchResult};

/// What a request wants played.
#[derive(Debug, Clone)]
pub enum Selection {
    /// An explicit sound with no collection behind it (links, tags, files).
    Sound(Arc<Sound>),
    /// A weighted random pick from a collection.
    Random(Arc<SoundCollection>),
    /// A specific sound of a collection.
    Named {
        collection: Arc<SoundCollection>,
        sound: Arc<Sound>,
    },
}

/// One unit of work for a guild worker.
#[derive(Debug, Clone)]
pub struct PlayRequest {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub sound: Arc<Sound>,
    pub forced: bool,
    /// Played right after this one, ahead of anything queued.
    pub next: Option<Box<PlayRequest>>,
    pub requested_at: DateTime<Utc>,
}

impl PlayRequest {
    fn new(guild_id: GuildId, channel_id: ChannelId, user_id: UserId, sound: Arc<Sound>, forced: bool) -> Self {
        Self {
            guild_id,
            channel_id,
            user_id,
            sound,
            forced,
            next: None,
            requested_at: Utc::now(),
        }
    }

    /// Time between the submission and `now`. A chained follow-up shares
    /// its parent's submission time.
    pub fn waited(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.requested_at).max(chrono::Duration::zero())
    }

    /// Builds a request, picking at random when no explicit sound is given.
    ///
    /// A chained collection appends a random pick from its chain target.
    pub fn build<R: Rng + ?Sized>(
        guild_id: GuildId,
        channel_id: ChannelId,
        user_id: UserId,
        selection: Selection,
        rng: &mut R,
    ) -> DispatchResult<Self> {
        let (collection, sound, forced) = match selection {
            Selection::Sound(sound) => (None, sound, true),
            Selection::Named { collection, sound } => (Some(collection), sound, true),
            Selection::Random(collection) => {
                let sound = collection
                    .pick(rng)
                    .ok_or_else(|| DispatchError::EmptyCollection(collection.prefix().to_string()))?;
                (Some(collection), sound, false)
            }
        };

        let mut request = Self::new(guild_id, channel_id, user_id, sound, forced);

        if let Some(target) = collection.as_ref().and_then(|c| c.chain_with()) {
            match target.pick(rng) {
                Some(follow_up) => {
                    let mut next = Self::new(guild_id, channel_id, user_id, follow_up, forced);
                    next.requested_at = request.requested_at;
                    request.next = Some(Box::new(next));
                }
                None => warn!("⚠️ La colección encadenada {} no tiene sonidos", target.prefix()),
            }
        }

        Ok(request)
    }
}

/// Pending requests of one guild.
///
/// Capacity covers the request in flight plus the queued ones. Chained
/// follow-ups ride on their parent and never count.
#[derive(Debug)]
pub struct TenantQueue {
    items: VecDeque<PlayRequest>,
    capacity: usize,
    in_flight: bool,
}

impl TenantQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            capacity,
            in_flight: false,
        }
    }

    /// Marks a request as handed straight to the worker.
    pub fn begin(&mut self) {
        self.in_flight = true;
    }

    pub fn has_room(&self) -> bool {
        self.items.len() + usize::from(self.in_flight) < self.capacity
    }

    /// Appends a request; gives it back when the queue is full.
    pub fn try_push(&mut self, request: PlayRequest) -> Result<(), PlayRequest> {
        if !self.has_room() {
            debug!("🚫 Cola llena ({} en espera)", self.items.len());
            return Err(request);
        }
        self.items.push_back(request);
        Ok(())
    }

    /// Takes the head of the queue; the worker is idle if there is none.
    pub fn pop_next(&mut self) -> Option<PlayRequest> {
        let next = self.items.pop_front();
        self.in_flight = next.is_some();
        next
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Nothing queued and nothing playing.
    pub fn is_idle(&self) -> bool {
        !self.in_flight && self.items.is_empty()
    }

    pub fn clear(&mut self) -> usize {
        let dropped = self.items.len();
        self.items.clear();
        self.in_flight = false;
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::sound::DEFAULT_PART_DELAY;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;
    use rand::{rngs::StdRng, SeedableRng};

    fn sound(name: &str, weight: u32) -> Sound {
        Sound::preloaded(name, weight, DEFAULT_PART_DELAY, vec![Bytes::from_static(b"x")])
    }

    fn ids() -> (GuildId, ChannelId, UserId) {
        (GuildId::new(1), ChannelId::new(2), UserId::new(3))
    }

    fn request(name: &str) -> PlayRequest {
        let (g, c, u) = ids();
        PlayRequest::new(g, c, u, Arc::new(sound(name, 1)), true)
    }

    #[test]
    fn test_random_selection_chains_follow_up() {
        let airhorn = Arc::new(SoundCollection::new("airhorn", vec![], vec![sound("default", 1)]));
        let another = Arc::new(
            SoundCollection::new("another", vec![], vec![sound("one", 1)]).with_chain(airhorn.clone()),
        );
        let (g, c, u) = ids();
        let mut rng = StdRng::seed_from_u64(3);

        let req = PlayRequest::build(g, c, u, Selection::Random(another), &mut rng).unwrap();

        assert_eq!(req.sound.name(), "one");
        assert!(!req.forced);
        let next = req.next.unwrap();
        assert_eq!(next.sound.name(), "default");
        assert!(next.next.is_none());
    }

    #[test]
    fn test_named_selection_is_forced_and_still_chains() {
        let airhorn = Arc::new(SoundCollection::new("airhorn", vec![], vec![sound("default", 1)]));
        let another = SoundCollection::new("another", vec![], vec![sound("one", 1), sound("one_echo", 1)])
            .with_chain(airhorn);
        let echo = another.find("one_echo").unwrap();
        let (g, c, u) = ids();

        let req = PlayRequest::build(
            g,
            c,
            u,
            Selection::Named {
                collection: Arc::new(another),
                sound: echo,
            },
            &mut StdRng::seed_from_u64(0),
        )
        .unwrap();

        assert!(req.forced);
        assert_eq!(req.sound.name(), "one_echo");
        assert!(req.next.unwrap().forced);
    }

    #[test]
    fn test_empty_collection_is_rejected() {
        let empty = Arc::new(SoundCollection::new("empty", vec![], vec![sound("mute", 0)]));
        let (g, c, u) = ids();

        let err = PlayRequest::build(g, c, u, Selection::Random(empty), &mut StdRng::seed_from_u64(0)).unwrap_err();
        assert!(matches!(err, DispatchError::EmptyCollection(name) if name == "empty"));
    }

    #[test]
    fn test_wait_time_is_measured_from_submission() {
        let req = request("a");

        let later = req.requested_at + chrono::Duration::milliseconds(1500);
        assert_eq!(req.waited(later).num_milliseconds(), 1500);
        assert_eq!(req.waited(req.requested_at - chrono::Duration::seconds(1)), chrono::Duration::zero());
    }

    #[test]
    fn test_chained_follow_up_shares_submission_time() {
        let airhorn = Arc::new(SoundCollection::new("airhorn", vec![], vec![sound("default", 1)]));
        let another = Arc::new(SoundCollection::new("another", vec![], vec![sound("one", 1)]).with_chain(airhorn));
        let (g, c, u) = ids();

        let req = PlayRequest::build(g, c, u, Selection::Random(another), &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(req.next.unwrap().requested_at, req.requested_at);
    }

    #[test]
    fn test_capacity_counts_request_in_flight() {
        let mut queue = TenantQueue::new(2);
        queue.begin();

        assert!(queue.try_push(request("b")).is_ok());
        assert!(queue.try_push(request("c")).is_err());
        assert_eq!(queue.len(), 1);

        // Pasar al siguiente no libera espacio: sigue habiendo uno en curso
        assert_eq!(queue.pop_next().unwrap().sound.name(), "b");
        assert!(queue.try_push(request("d")).is_ok());
        assert!(!queue.has_room());
    }

    #[test]
    fn test_queue_is_fifo_and_goes_idle() {
        let mut queue = TenantQueue::new(10);
        queue.begin();
        for name in ["a", "b", "c"] {
            queue.try_push(request(name)).unwrap();
        }

        let order: Vec<_> = std::iter::from_fn(|| queue.pop_next())
            .map(|r| r.sound.name().to_string())
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert!(queue.is_idle());
    }

    #[test]
    fn test_clear_discards_everything() {
        let mut queue = TenantQueue::new(5);
        queue.begin();
        queue.try_push(request("a")).unwrap();

        assert_eq!(queue.clear(), 1);
        assert!(queue.is_idle());
    }

    #[test]
    fn test_zero_capacity_accepts_nothing() {
        let mut queue = TenantQueue::new(0);
        assert!(queue.try_push(request("a")).is_err());
    }
}
