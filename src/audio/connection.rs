//! Seams towards the voice gateway and the status display.

use async_trait::async_trait;
use bytes::Bytes;
use serenity::model::id::{ChannelId, GuildId};

use crate::error::DispatchResult;

/// Opens voice connections. One connection per guild at a time.
#[async_trait]
pub trait VoiceConnector: Send + Sync {
    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> DispatchResult<Box<dyn VoiceConnection>>;
}

/// An established voice connection.
#[async_trait]
pub trait VoiceConnection: Send {
    fn channel_id(&self) -> ChannelId;

    /// Moves the connection to another channel of the same guild.
    async fn change_channel(&mut self, channel_id: ChannelId) -> DispatchResult<()>;

    /// Marks the start (`true`) or end (`false`) of a transmission.
    async fn set_active(&mut self, active: bool) -> DispatchResult<()>;

    /// Sends one encoded frame. Fails with `Connection` if the link is gone.
    async fn send(&mut self, frame: Bytes) -> DispatchResult<()>;

    async fn disconnect(self: Box<Self>);
}

/// Receives "now playing" updates.
#[cfg_attr(test, mockall::automock)]
pub trait StatusReporter: Send + Sync {
    fn now_playing(&self, guild_id: GuildId, label: &str);
    fn idle(&self, guild_id: GuildId);
}

/// Reporter that ignores every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoStatus;

impl StatusReporter for NoStatus {
    fn now_playing(&self, _guild_id: GuildId, _label: &str) {}
    fn idle(&self, _guild_id: GuildId) {}
}
