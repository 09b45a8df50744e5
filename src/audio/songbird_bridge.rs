//! Voice connections over songbird.
//!
//! Frames are fed to songbird as a live DCA stream: a `DCA1` header with
//! JSON metadata, then every frame with its length prefix. Songbird's DCA
//! demuxer hands the Opus packets to the driver untouched, so nothing is
//! decoded or re-encoded on our side.

use std::{
    io::{self, Read, Seek, SeekFrom},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    input::{AudioStream, Input, LiveInput},
    tracks::TrackHandle,
    Songbird,
};
use symphonia::core::{io::MediaSource, probe::Hint};
use tracing::{debug, info, warn};

use super::{
    codec,
    connection::{VoiceConnection, VoiceConnector},
    pipeline::{PCM_CHANNELS, PCM_SAMPLE_RATE},
};
use crate::error::{DispatchError, DispatchResult};

/// Frames buffered between the sink and songbird's mixer.
const DEFAULT_FEED_CAPACITY: usize = 32;

fn dca_header() -> io::Result<Bytes> {
    let metadata = serde_json::json!({
        "dca": {
            "version": 1,
            "tool": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
                "url": null,
                "author": null,
            },
        },
        "opus": {
            "mode": "music",
            "sample_rate": PCM_SAMPLE_RATE,
            "frame_size": 960,
            "abr": null,
            "vbr": true,
            "channels": PCM_CHANNELS,
        },
        "info": null,
        "origin": null,
        "extra": null,
    });
    let json = serde_json::to_vec(&metadata)?;

    let mut header = BytesMut::with_capacity(8 + json.len());
    header.put_slice(b"DCA1");
    header.put_i32_le(json.len() as i32);
    header.put_slice(&json);
    Ok(header.freeze())
}

/// Longest a single read waits for the sink before emitting silence.
const FEED_STALL: Duration = Duration::from_millis(20);

/// One Opus frame of silence.
const OPUS_SILENCE: &[u8] = &[0xF8, 0xFF, 0xFE];

/// Reader over the frames pushed by the sink.
///
/// Songbird reads it from its mixer, so a read never blocks longer than
/// `stall`: while the pipeline is still buffering the mixer gets a silence
/// frame instead. Ends (returns 0) once the sending side is dropped.
struct DcaFeed {
    pending: Bytes,
    frames: flume::Receiver<Bytes>,
    stall: Duration,
}

impl Read for DcaFeed {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pending.is_empty() {
            let frame = match self.frames.recv_timeout(self.stall) {
                Ok(frame) => frame,
                Err(flume::RecvTimeoutError::Timeout) => Bytes::from_static(OPUS_SILENCE),
                Err(flume::RecvTimeoutError::Disconnected) => return Ok(0),
            };
            let mut chunk = BytesMut::with_capacity(codec::FRAME_HEADER_LEN + frame.len());
            codec::encode_frame(&mut chunk, &frame).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            self.pending = chunk.freeze();
        }

        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        Ok(n)
    }
}

impl Seek for DcaFeed {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "live feed cannot seek"))
    }
}

impl MediaSource for DcaFeed {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

#[derive(Clone)]
pub struct SongbirdConnector {
    manager: Arc<Songbird>,
    feed_capacity: usize,
}

impl SongbirdConnector {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self {
            manager,
            feed_capacity: DEFAULT_FEED_CAPACITY,
        }
    }
}

#[async_trait]
impl VoiceConnector for SongbirdConnector {
    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> DispatchResult<Box<dyn VoiceConnection>> {
        self.manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| DispatchError::Connection(e.to_string()))?;
        info!("🔗 Conectado a canal {} en {}", channel_id, guild_id);

        Ok(Box::new(SongbirdConnection {
            manager: self.manager.clone(),
            guild_id,
            channel_id,
            feed_capacity: self.feed_capacity,
            feed: None,
            track: None,
        }))
    }
}

struct SongbirdConnection {
    manager: Arc<Songbird>,
    guild_id: GuildId,
    channel_id: ChannelId,
    feed_capacity: usize,
    feed: Option<flume::Sender<Bytes>>,
    track: Option<TrackHandle>,
}

impl SongbirdConnection {
    async fn start_feed(&mut self) -> DispatchResult<()> {
        let call = self
            .manager
            .get(self.guild_id)
            .ok_or_else(|| DispatchError::Connection(format!("no call for guild {}", self.guild_id)))?;

        let (tx, rx) = flume::bounded(self.feed_capacity);
        let reader = DcaFeed {
            pending: dca_header()?,
            frames: rx,
            stall: FEED_STALL,
        };
        let mut hint = Hint::new();
        hint.with_extension("dca");

        let input = Input::Live(
            LiveInput::Raw(AudioStream {
                input: Box::new(reader) as Box<dyn MediaSource>,
                hint: Some(hint),
            }),
            None,
        );

        let track = call.lock().await.play_only_input(input);
        self.feed = Some(tx);
        self.track = Some(track);
        Ok(())
    }
}

#[async_trait]
impl VoiceConnection for SongbirdConnection {
    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    async fn change_channel(&mut self, channel_id: ChannelId) -> DispatchResult<()> {
        self.manager
            .join(self.guild_id, channel_id)
            .await
            .map_err(|e| DispatchError::Connection(e.to_string()))?;
        self.channel_id = channel_id;
        Ok(())
    }

    async fn set_active(&mut self, active: bool) -> DispatchResult<()> {
        if active {
            return self.start_feed().await;
        }

        // Soltar el sender cierra el feed; songbird termina lo que quede en buffer
        self.feed = None;
        self.track = None;
        Ok(())
    }

    async fn send(&mut self, frame: Bytes) -> DispatchResult<()> {
        let feed = self
            .feed
            .as_ref()
            .ok_or_else(|| DispatchError::Connection("voice feed is not active".into()))?;
        feed.send_async(frame)
            .await
            .map_err(|_| DispatchError::Connection("voice track ended unexpectedly".into()))
    }

    async fn disconnect(mut self: Box<Self>) {
        if let Some(track) = self.track.take() {
            let _ = track.stop();
        }
        self.feed = None;

        match self.manager.remove(self.guild_id).await {
            Ok(()) => debug!("👋 Desconectado de {}", self.guild_id),
            Err(e) => warn!("⚠️ Error al salir del canal en {}: {}", self.guild_id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_header_declares_dca1_metadata() {
        let header = dca_header().unwrap();
        assert_eq!(&header[..4], b"DCA1");

        let len = i32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        assert_eq!(header.len(), 8 + len);

        let meta: serde_json::Value = serde_json::from_slice(&header[8..]).unwrap();
        assert_eq!(meta["opus"]["sample_rate"], 48_000);
        assert_eq!(meta["opus"]["channels"], 2);
    }

    #[test]
    fn test_feed_emits_header_then_prefixed_frames() {
        let (tx, rx) = flume::bounded(4);
        tx.send(Bytes::from_static(b"abc")).unwrap();
        drop(tx);

        let mut feed = DcaFeed {
            pending: Bytes::from_static(b"HDR"),
            frames: rx,
            stall: FEED_STALL,
        };
        let mut out = Vec::new();
        feed.read_to_end(&mut out).unwrap();

        assert_eq!(out, b"HDR\x03\x00abc".to_vec());
        assert!(!feed.is_seekable());
        assert!(feed.seek(SeekFrom::Start(0)).is_err());
    }

    #[test]
    fn test_stalled_feed_yields_silence_instead_of_blocking() {
        let (tx, rx) = flume::bounded::<Bytes>(4);
        let mut feed = DcaFeed {
            pending: Bytes::new(),
            frames: rx,
            stall: Duration::from_millis(5),
        };

        let mut buf = [0u8; 16];
        let n = feed.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[3, 0, 0xF8, 0xFF, 0xFE]);

        tx.send(Bytes::from_static(b"op")).unwrap();
        let n = feed.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"\x02\x00op");

        drop(tx);
        assert_eq!(feed.read(&mut buf).unwrap(), 0);
    }
}
