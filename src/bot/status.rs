use parking_lot::RwLock;
use serenity::all::{ActivityData, GuildId, ShardMessenger};
use tracing::debug;

use airhorn_dispatch::audio::StatusReporter;

/// Shows the sound being played as the bot's activity.
///
/// Presence is global to the bot, so the last guild to start a play wins.
/// Updates are dropped until the shard is attached on `ready`.
#[derive(Default)]
pub struct PresenceStatus {
    shard: RwLock<Option<ShardMessenger>>,
}

impl PresenceStatus {
    pub fn attach(&self, shard: ShardMessenger) {
        *self.shard.write() = Some(shard);
    }

    fn show(&self, text: &str) {
        if let Some(shard) = self.shard.read().as_ref() {
            shard.set_activity(Some(ActivityData::playing(text)));
        }
    }
}

impl StatusReporter for PresenceStatus {
    fn now_playing(&self, guild_id: GuildId, label: &str) {
        debug!("🎮 Estado en {}: {}", guild_id, label);
        self.show(label);
    }

    fn idle(&self, _guild_id: GuildId) {
        self.show("Nothing");
    }
}
