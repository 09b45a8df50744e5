//! Length-prefixed Opus frame codec.
//!
//! Every frame on the wire is a little-endian `u16` length followed by that
//! many bytes of opaque encoded audio. The stream ends at the first point
//! where a complete prefix+payload pair is no longer available: a truncated
//! tail is a clean end of stream, never an error. Any other read failure is
//! reported as [`DispatchError::Decode`].

use std::{io, path::Path};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, Encoder, FramedRead};
use tracing::{debug, trace};

use crate::error::{DispatchError, DispatchResult};

/// Size of the length prefix in bytes.
pub const FRAME_HEADER_LEN: usize = 2;

/// Largest payload a single frame can carry.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Lazy, finite, non-restartable reader of frames.
pub type FrameReader<R> = FramedRead<R, FrameCodec>;

#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, io::Error> {
        if src.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let len = u16::from_le_bytes([src[0], src[1]]) as usize;
        let needed = FRAME_HEADER_LEN + len;
        if src.len() < needed {
            src.reserve(needed - src.len());
            return Ok(None);
        }

        src.advance(FRAME_HEADER_LEN);
        Ok(Some(src.split_to(len).freeze()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, io::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                if !src.is_empty() {
                    trace!("Frame truncado al final del stream ({} bytes), fin normal", src.len());
                    src.clear();
                }
                Ok(None)
            }
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = DispatchError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), DispatchError> {
        encode_frame(dst, &item)
    }
}

/// Wraps a byte stream in a frame reader with the given read buffer size.
pub fn frame_reader<R: AsyncRead>(reader: R, buffer_size: usize) -> FrameReader<R> {
    FramedRead::with_capacity(reader, FrameCodec, buffer_size)
}

/// Appends one length-prefixed frame to `dst`.
pub fn encode_frame(dst: &mut BytesMut, payload: &[u8]) -> DispatchResult<()> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(DispatchError::FrameTooLarge(payload.len()));
    }

    dst.reserve(FRAME_HEADER_LEN + payload.len());
    dst.put_u16_le(payload.len() as u16);
    dst.put_slice(payload);
    Ok(())
}

/// Encodes a whole payload list into its wire representation.
pub fn encode_frames<I, B>(payloads: I) -> DispatchResult<BytesMut>
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut out = BytesMut::new();
    for payload in payloads {
        encode_frame(&mut out, payload.as_ref())?;
    }
    Ok(out)
}

/// Pulls the next frame, mapping stream failures to [`DispatchError::Decode`].
pub async fn next_frame<R>(reader: &mut FrameReader<R>) -> DispatchResult<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    match reader.next().await {
        Some(Ok(frame)) => Ok(Some(frame)),
        Some(Err(e)) => Err(DispatchError::Decode(e)),
        None => Ok(None),
    }
}

/// Reads every frame of a local encoded file into memory.
///
/// Used both for eager preloading and for lazy per-play loading, so the two
/// paths decode identically.
pub async fn load_frames(path: &Path) -> DispatchResult<Vec<Bytes>> {
    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(DispatchError::NotFound(path.to_path_buf()));
        }
        Err(e) => return Err(DispatchError::Io(e)),
    };

    let mut reader = frame_reader(file, 16 * 1024);
    let mut frames = Vec::new();
    while let Some(frame) = next_frame(&mut reader).await? {
        frames.push(frame);
    }

    debug!("📦 {} frames cargados desde {}", frames.len(), path.display());
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::{
        pin::Pin,
        task::{Context, Poll},
    };
    use tokio::io::ReadBuf;

    async fn decode_all(bytes: &[u8]) -> DispatchResult<Vec<Bytes>> {
        let mut reader = frame_reader(bytes, 64);
        let mut frames = Vec::new();
        while let Some(frame) = next_frame(&mut reader).await? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn payloads() -> Vec<Vec<u8>> {
        vec![
            vec![0xF8, 0xFF, 0xFE],
            (0..=255u8).collect(),
            vec![7; 1500],
            b"opus".to_vec(),
        ]
    }

    #[tokio::test]
    async fn test_frames_survive_encode_and_decode() {
        let wire = encode_frames(payloads()).unwrap();
        let decoded = decode_all(&wire).await.unwrap();

        let decoded: Vec<Vec<u8>> = decoded.iter().map(|f| f.to_vec()).collect();
        assert_eq!(decoded, payloads());
    }

    #[tokio::test]
    async fn test_length_prefix_is_little_endian() {
        let wire = encode_frames([vec![1u8; 0x0102]]).unwrap();
        assert_eq!(&wire[..2], &[0x02, 0x01]);
        assert_eq!(wire.len(), 2 + 0x0102);
    }

    #[tokio::test]
    async fn test_half_prefix_is_clean_end_of_stream() {
        let mut wire = encode_frames(payloads()).unwrap();
        wire.put_u8(0x10);

        let decoded = decode_all(&wire).await.unwrap();
        assert_eq!(decoded.len(), payloads().len());
    }

    #[tokio::test]
    async fn test_short_payload_is_clean_end_of_stream() {
        let mut wire = encode_frames(payloads()).unwrap();
        wire.put_u16_le(100);
        wire.put_slice(&[9; 40]);

        let decoded = decode_all(&wire).await.unwrap();
        let decoded: Vec<Vec<u8>> = decoded.iter().map(|f| f.to_vec()).collect();
        assert_eq!(decoded, payloads());
    }

    #[tokio::test]
    async fn test_empty_input_has_no_frames() {
        assert!(decode_all(&[]).await.unwrap().is_empty());
    }

    #[test]
    fn test_oversized_payload_is_rejected() {
        let mut dst = BytesMut::new();
        let err = encode_frame(&mut dst, &vec![0; MAX_FRAME_LEN + 1]).unwrap_err();
        assert!(matches!(err, DispatchError::FrameTooLarge(n) if n == MAX_FRAME_LEN + 1));
        assert!(dst.is_empty());
    }

    struct BrokenReader;

    impl AsyncRead for BrokenReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "stage died")))
        }
    }

    #[tokio::test]
    async fn test_read_failure_is_a_decode_error() {
        let mut reader = frame_reader(BrokenReader, 64);
        let err = next_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, DispatchError::Decode(_)));
    }

    #[tokio::test]
    async fn test_load_frames_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("airhorn_nope.dca");

        let err = load_frames(&missing).await.unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(p) if p == missing));
    }

    #[tokio::test]
    async fn test_load_frames_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("airhorn_default.dca");
        std::fs::write(&path, encode_frames(payloads()).unwrap()).unwrap();

        let frames = load_frames(&path).await.unwrap();
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[3].as_ref(), b"opus");
    }
}
