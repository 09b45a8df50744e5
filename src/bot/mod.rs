//! # Bot Module
//!
//! Text-command router in front of the dispatch registry.
//!
//! - Collection triggers (`!airhorn`, `!anotha`, ...) play a random sound,
//!   or a specific one when its name follows the trigger
//! - `!play <link|file|tag>`, `!playlist <link>`, `!tag <name> [link]`
//! - `!skip`, `!queue`, `!cache on|off`
//! - `!del <file>`, `!deltag <name>`, `!dellink <link>` (Manage Server only)

use std::sync::Arc;

use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Message, Ready, UserId},
    async_trait,
};
use tracing::{debug, error, info};

use airhorn_dispatch::{
    audio::{DispatchRegistry, Selection, Sound, SoundCollection},
    config::Config,
    sources::{self, LinkClassifier},
    DispatchError,
};

pub mod status;

use status::PresenceStatus;

#[derive(Debug, Clone)]
pub enum Command<'a> {
    Collection {
        collection: Arc<SoundCollection>,
        sound: Option<Arc<Sound>>,
    },
    Play(&'a str),
    Playlist(&'a str),
    Tag { name: &'a str, link: Option<&'a str> },
    Skip,
    Queue,
    Cache(bool),
    Delete(Removal<'a>),
}

/// What a delete command targets in the audio directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal<'a> {
    File(&'a str),
    Tag(&'a str),
    Link(&'a str),
}

/// Parses a message. Collection triggers are matched literally; the other
/// commands use the configured prefix.
pub fn parse_command<'a>(content: &'a str, prefix: &str, collections: &[Arc<SoundCollection>]) -> Option<Command<'a>> {
    let mut parts = content.split_whitespace();
    let head = parts.next()?.to_lowercase();

    if let Some(collection) = collections.iter().find(|c| c.responds_to(&head)) {
        // Un nombre desconocido no reproduce nada
        let sound = match parts.next() {
            Some(name) => Some(collection.find(name)?),
            None => None,
        };
        return Some(Command::Collection {
            collection: collection.clone(),
            sound,
        });
    }

    let command = head.strip_prefix(prefix)?;
    match command {
        "play" => parts.next().map(Command::Play),
        "playlist" | "pl" => parts.next().map(Command::Playlist),
        "tag" => {
            let name = parts.next()?;
            Some(Command::Tag { name, link: parts.next() })
        }
        "skip" => Some(Command::Skip),
        "queue" => Some(Command::Queue),
        "del" => parts.next().map(|name| Command::Delete(Removal::File(name))),
        "deltag" => parts.next().map(|name| Command::Delete(Removal::Tag(name))),
        "dellink" => parts.next().map(|link| Command::Delete(Removal::Link(link))),
        "cache" => match parts.next()? {
            "on" => Some(Command::Cache(true)),
            "off" => Some(Command::Cache(false)),
            _ => None,
        },
        _ => None,
    }
}

pub struct AirhornBot {
    prefix: String,
    collections: Vec<Arc<SoundCollection>>,
    registry: DispatchRegistry,
    links: LinkClassifier,
    status: Arc<PresenceStatus>,
}

impl AirhornBot {
    pub fn new(
        config: &Config,
        collections: Vec<Arc<SoundCollection>>,
        registry: DispatchRegistry,
        status: Arc<PresenceStatus>,
    ) -> Self {
        Self {
            prefix: config.command_prefix.clone(),
            collections,
            registry,
            links: LinkClassifier::new(&config.audio_dir),
            status,
        }
    }

    /// Submits a play in the author's current voice channel.
    async fn submit(&self, ctx: &Context, msg: &Message, guild_id: GuildId, selection: Selection) {
        let Some(channel_id) = user_voice_channel(ctx, guild_id, msg.author.id) else {
            debug!("{} no está en un canal de voz", msg.author.name);
            return;
        };

        match self.registry.try_submit(guild_id, channel_id, msg.author.id, selection) {
            Ok(()) => {}
            Err(DispatchError::QueueFull) => reply(ctx, msg, "La cola está llena ahora mismo").await,
            Err(e) => reply(ctx, msg, &format!("No se pudo reproducir: {e}")).await,
        }
    }

    async fn handle(&self, ctx: &Context, msg: &Message, guild_id: GuildId, command: Command<'_>) {
        match command {
            Command::Collection { collection, sound } => {
                let selection = match sound {
                    Some(sound) => Selection::Named { collection, sound },
                    None => Selection::Random(collection),
                };
                self.submit(ctx, msg, guild_id, selection).await;
            }
            Command::Play(input) => match self.links.sound_for(input) {
                Some(sound) => self.submit(ctx, msg, guild_id, Selection::Sound(Arc::new(sound))).await,
                None => reply(ctx, msg, "No encuentro eso").await,
            },
            Command::Playlist(link) => {
                let Some(channel_id) = user_voice_channel(ctx, guild_id, msg.author.id) else {
                    return;
                };
                let text = match self
                    .registry
                    .submit_playlist(guild_id, channel_id, msg.author.id, link)
                    .await
                {
                    Ok((queued, total)) => format!("Playlist en cola: {queued} de {total}"),
                    Err(e) => format!("No se pudo leer la playlist: {e}"),
                };
                reply(ctx, msg, &text).await;
            }
            Command::Delete(removal) => {
                if !can_manage(ctx, msg).await {
                    return reply(ctx, msg, "No tienes permiso para borrar audio").await;
                }
                let resolver = self.registry.resolver();
                let result = match removal {
                    Removal::File(name) => resolver.delete_file(name).await,
                    Removal::Tag(name) => resolver.delete_tag(name).await,
                    Removal::Link(link) => resolver.delete_link(link).await,
                };
                match result {
                    Ok(_) => reply(ctx, msg, "Archivo eliminado").await,
                    Err(DispatchError::NotFound(_)) => reply(ctx, msg, "Ese archivo no existe").await,
                    Err(e) => reply(ctx, msg, &format!("No se pudo borrar: {e}")).await,
                }
            }
            Command::Tag { name, link: None } => {
                if !sources::is_valid_tag(name) {
                    return reply(ctx, msg, "Nombre de tag inválido").await;
                }
                let sound = Sound::on_disk(sources::tag_file_name(name), self.links.tag_path(name));
                self.submit(ctx, msg, guild_id, Selection::Sound(Arc::new(sound))).await;
            }
            Command::Tag { name, link: Some(link) } => match self.registry.create_tag(name, link).await {
                Ok(_) => reply(ctx, msg, &format!("Tag `{name}` creado")).await,
                Err(e) => reply(ctx, msg, &format!("No se pudo crear el tag: {e}")).await,
            },
            Command::Skip => self.registry.cancel_current(guild_id),
            Command::Queue => {
                let depth = self.registry.queue_depth(guild_id);
                reply(ctx, msg, &depth.to_string()).await;
            }
            Command::Cache(enabled) => {
                self.registry.set_prefetch(guild_id, enabled);
                let state = if enabled { "activado" } else { "desactivado" };
                reply(ctx, msg, &format!("Cache de links {state}")).await;
            }
        }
    }
}

fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild.voice_states.get(&user_id).and_then(|state| state.channel_id)
}

/// Deleting audio needs the Manage Server permission.
async fn can_manage(ctx: &Context, msg: &Message) -> bool {
    let Some(guild_id) = msg.guild_id else {
        return false;
    };
    let member = match msg.member(ctx).await {
        Ok(member) => member,
        Err(e) => {
            debug!("No se pudo obtener el miembro {}: {}", msg.author.id, e);
            return false;
        }
    };
    guild_id
        .to_guild_cached(&ctx.cache)
        .is_some_and(|guild| guild.member_permissions(&member).manage_guild())
}

async fn reply(ctx: &Context, msg: &Message, text: &str) {
    if let Err(e) = msg.channel_id.say(&ctx.http, text).await {
        error!("Error al responder: {:?}", e);
    }
}

#[async_trait]
impl EventHandler for AirhornBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());
        self.status.attach(ctx.shard.clone());
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let Some(guild_id) = msg.guild_id else {
            return;
        };
        let Some(command) = parse_command(&msg.content, &self.prefix, &self.collections) else {
            return;
        };

        debug!("📨 {:?} de {} en {}", command, msg.author.name, guild_id);
        self.handle(&ctx, &msg, guild_id, command).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airhorn_dispatch::audio::sound::DEFAULT_PART_DELAY;
    use bytes::Bytes;

    fn collections() -> Vec<Arc<SoundCollection>> {
        let sound = |name: &str| Sound::preloaded(name, 1, DEFAULT_PART_DELAY, vec![Bytes::from_static(b"x")]);
        vec![Arc::new(SoundCollection::new(
            "airhorn",
            vec!["!airhorn".into()],
            vec![sound("default"), sound("reverb")],
        ))]
    }

    #[test]
    fn test_collection_trigger_with_and_without_sound() {
        let colls = collections();

        assert!(matches!(
            parse_command("!AIRHORN", "!", &colls),
            Some(Command::Collection { sound: None, .. })
        ));
        match parse_command("!airhorn reverb", "!", &colls) {
            Some(Command::Collection { sound: Some(sound), .. }) => assert_eq!(sound.name(), "reverb"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(parse_command("!airhorn nope", "!", &colls).is_none());
    }

    #[test]
    fn test_control_commands() {
        let colls = collections();

        assert!(matches!(parse_command("!play youtu.be/x", "!", &colls), Some(Command::Play("youtu.be/x"))));
        assert!(matches!(
            parse_command("!tag bruh https://youtu.be/x", "!", &colls),
            Some(Command::Tag { name: "bruh", link: Some(_) })
        ));
        assert!(matches!(parse_command("!tag bruh", "!", &colls), Some(Command::Tag { link: None, .. })));
        assert!(matches!(parse_command("!skip", "!", &colls), Some(Command::Skip)));
        assert!(matches!(parse_command("!queue", "!", &colls), Some(Command::Queue)));
        assert!(matches!(parse_command("!cache off", "!", &colls), Some(Command::Cache(false))));
        assert!(parse_command("!cache maybe", "!", &colls).is_none());
        assert!(parse_command("!play", "!", &colls).is_none());
        assert!(parse_command("hello there", "!", &colls).is_none());
    }

    #[test]
    fn test_playlist_and_delete_commands() {
        let colls = collections();

        assert!(matches!(
            parse_command("!playlist youtube.com/playlist?list=PL1", "!", &colls),
            Some(Command::Playlist("youtube.com/playlist?list=PL1"))
        ));
        assert!(matches!(parse_command("!pl x", "!", &colls), Some(Command::Playlist("x"))));
        assert!(matches!(
            parse_command("!del horn.dca", "!", &colls),
            Some(Command::Delete(Removal::File("horn.dca")))
        ));
        assert!(matches!(
            parse_command("!delTag bruh", "!", &colls),
            Some(Command::Delete(Removal::Tag("bruh")))
        ));
        assert!(matches!(
            parse_command("!dellink youtu.be/x", "!", &colls),
            Some(Command::Delete(Removal::Link("youtu.be/x")))
        ));
        assert!(parse_command("!deltag", "!", &colls).is_none());
    }

    #[test]
    fn test_custom_prefix() {
        let colls = collections();
        assert!(matches!(parse_command("?skip", "?", &colls), Some(Command::Skip)));
        assert!(parse_command("!skip", "?", &colls).is_none());
    }
}
