//! Guild worker: resolve → stream → advance, until the queue drains.

use std::{
    sync::{atomic::Ordering, Arc},
    time::Duration,
};

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{
    connection::VoiceConnection,
    player::{DispatchRegistry, TenantState},
    queue::PlayRequest,
    sink,
    sound::DEFAULT_PART_DELAY,
};
use crate::error::{DispatchError, DispatchResult};

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

/// Drives one guild's queue. `first` skips the queue and plays at once.
pub(crate) async fn run(registry: DispatchRegistry, state: Arc<TenantState>, first: PlayRequest) {
    let guild_id = state.guild_id;
    let settings = registry.inner.settings.clone();
    let mut conn: Option<Box<dyn VoiceConnection>> = None;
    let mut current = Some(first);
    let mut trailing = DEFAULT_PART_DELAY;

    loop {
        while let Some(mut request) = current.take() {
            trailing = request.sound.part_delay();

            if let Err(e) = play_one(&registry, &state, &mut conn, &request).await {
                error!("❌ Conexión perdida en {}: {}", guild_id, e);
                // La conexión se cierra antes de soltar la entrada del registro
                if let Some(conn) = conn.take() {
                    conn.disconnect().await;
                }
                registry.inner.status.idle(guild_id);
                let dropped = registry.discard(&state);
                warn!("🗑️ {} pedidos descartados en {}", dropped, guild_id);
                return;
            }

            // Lo encadenado va primero, luego la cola
            current = match request.next.take() {
                Some(next) => Some(*next),
                None => state.queue.lock().pop_next(),
            };
        }

        if !settings.idle_grace.is_zero() {
            current = wait_for_more(&state, settings.idle_grace).await;
            if current.is_some() {
                continue;
            }
        }

        // Draining
        pause(trailing).await;
        if let Some(conn) = conn.take() {
            conn.disconnect().await;
        }
        registry.inner.status.idle(guild_id);

        if registry.release_if_idle(&state) {
            info!("⏹️ Cola de {} vacía, worker terminado", guild_id);
            return;
        }

        // Llegó algo durante el delay de salida
        current = state.queue.lock().pop_next();
        debug!("🔁 {} recibió pedidos mientras se vaciaba, se reconecta", guild_id);
    }
}

/// Waits up to `grace` for a new request. Wakeups that find the queue
/// empty (stale permits) are ignored; the deadline never moves.
async fn wait_for_more(state: &TenantState, grace: Duration) -> Option<PlayRequest> {
    let deadline = Instant::now() + grace;
    loop {
        if let Some(next) = state.queue.lock().pop_next() {
            return Some(next);
        }
        if tokio::time::timeout_at(deadline, state.wake.notified()).await.is_err() {
            return state.queue.lock().pop_next();
        }
    }
}

/// Plays one request. Only connection failures are returned; anything
/// wrong with the sound itself is logged and counts as played.
async fn play_one(
    registry: &DispatchRegistry,
    state: &TenantState,
    conn: &mut Option<Box<dyn VoiceConnection>>,
    request: &PlayRequest,
) -> DispatchResult<()> {
    let inner = &registry.inner;
    state.cancel.store(false, Ordering::SeqCst);

    let connection = match conn.take() {
        Some(existing) => existing,
        None => inner.connector.connect(request.guild_id, request.channel_id).await?,
    };
    let connection = conn.insert(connection);

    if connection.channel_id() != request.channel_id {
        debug!("🔀 Cambiando a canal {} en {}", request.channel_id, request.guild_id);
        connection.change_channel(request.channel_id).await?;
        pause(inner.settings.channel_switch_delay).await;
    }

    let label = request.sound.display_label();
    inner.status.now_playing(request.guild_id, &label);
    pause(inner.settings.pre_play_delay).await;

    let prefetch = registry.prefetch_enabled(request.guild_id);
    let mut frames = match inner.resolver.resolve(&request.sound, prefetch).await {
        Ok(frames) => frames,
        Err(e) => {
            warn!("⚠️ No se pudo reproducir {} en {}: {}", label, request.guild_id, e);
            return Ok(());
        }
    };

    let waited = request.waited(Utc::now());
    info!(
        "🔊 Reproduciendo {} en {} (forzado: {}, espera {} ms)",
        label,
        request.guild_id,
        request.forced,
        waited.num_milliseconds()
    );
    state.streaming.store(true, Ordering::SeqCst);
    let result = sink::play(&mut **connection, &mut frames, &state.cancel).await;
    state.streaming.store(false, Ordering::SeqCst);

    match result {
        Ok(sent) => debug!("✅ {} terminado ({} frames)", label, sent),
        Err(DispatchError::CancelledMidStream) => info!("⏭️ {} saltado", label),
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => warn!("⚠️ {} se interrumpió: {}", label, e),
    }
    Ok(())
}
