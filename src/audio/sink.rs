//! Output sink: forwards frames to the voice connection one at a time.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use super::{connection::VoiceConnection, resolver::FrameStream};
use crate::error::{DispatchError, DispatchResult};

/// Plays `frames` over `conn` until they run out or `cancel` is raised.
///
/// The cancel flag is checked at every frame boundary and consumed when it
/// fires; the play then ends with [`DispatchError::CancelledMidStream`] and
/// any live stages are killed. The connection is always marked inactive
/// again, whatever the outcome. Returns the number of frames sent.
pub async fn play(
    conn: &mut dyn VoiceConnection,
    frames: &mut FrameStream,
    cancel: &AtomicBool,
) -> DispatchResult<usize> {
    if let Err(e) = conn.set_active(true).await {
        frames.abort();
        return Err(e);
    }

    let result = forward(conn, frames, cancel).await;
    if result.is_err() {
        frames.abort();
    }

    if let Err(e) = conn.set_active(false).await {
        warn!("⚠️ No se pudo marcar la conexión como inactiva: {}", e);
        if result.is_ok() {
            return Err(e);
        }
    }
    result
}

async fn forward(conn: &mut dyn VoiceConnection, frames: &mut FrameStream, cancel: &AtomicBool) -> DispatchResult<usize> {
    let mut sent = 0;
    loop {
        if cancel.swap(false, Ordering::SeqCst) {
            return cancelled(sent);
        }

        let Some(frame) = frames.next_frame().await? else {
            debug!("🔚 Stream terminado tras {} frames", sent);
            return Ok(sent);
        };

        if cancel.swap(false, Ordering::SeqCst) {
            return cancelled(sent);
        }

        conn.send(frame).await?;
        sent += 1;
    }
}

fn cancelled(sent: usize) -> DispatchResult<usize> {
    debug!("⏭️ Reproducción cancelada tras {} frames", sent);
    Err(DispatchError::CancelledMidStream)
}
