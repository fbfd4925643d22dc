use futures::FutureExt;
use serenity::model::id::GuildId;
use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{
    completion::{CompletionToken, PlaybackEnd},
    engine::EngineEvent,
    source::SourceAdapter,
    state::GuildState,
};
use crate::{error::SinkError, sources::Track};

/// Resultado de una iteración del worker
#[derive(Debug, PartialEq, Eq)]
enum Unit {
    Played(PlaybackEnd),
    Unplayable,
    /// Sink ausente o desconectado; el track volvió a la cola
    SinkLost,
    Stop,
}

/// Playback Worker: una tarea por guild activa.
///
/// ```text
/// Idle -> Resolving -> Playing -> Idle
///              ^          |
///              +-- loop --+          any -> Stopped (cancel / sink gone)
/// ```
///
/// Every iteration is a recovery point: source errors skip the track,
/// sink faults back off and retry, only cancellation or a lost sink end
/// the task. A lost sink is released from the guild state and the track
/// goes back to the queue head, so later tracks wait for a reconnection.
///
/// Panics inside an iteration are caught and treated like sink faults.
/// This only holds in builds that unwind: the release profile uses
/// `panic = "abort"`.
pub(crate) struct PlaybackWorker<S> {
    state: Arc<GuildState<S>>,
    adapter: Arc<SourceAdapter<S>>,
    cancel: CancellationToken,
    backoff: Duration,
    events: broadcast::Sender<EngineEvent>,
}

impl<S: Send + 'static> PlaybackWorker<S> {
    pub(crate) fn new(
        state: Arc<GuildState<S>>,
        adapter: Arc<SourceAdapter<S>>,
        cancel: CancellationToken,
        backoff: Duration,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self {
            state,
            adapter,
            cancel,
            backoff,
            events,
        }
    }

    pub(crate) async fn run(self) {
        let guild_id = self.state.guild_id();
        info!("▶️ Worker iniciado para guild {}", guild_id);
        let mut sink_lost = false;

        loop {
            let (track, token) = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = self.state.next_track() => next,
            };

            let outcome = AssertUnwindSafe(self.play_unit(track, token)).catch_unwind().await;
            match outcome {
                Ok(Ok(Unit::Stop)) => break,
                Ok(Ok(Unit::SinkLost)) => {
                    sink_lost = true;
                    break;
                }
                Ok(Ok(unit)) => debug!("Unidad terminada en guild {}: {:?}", guild_id, unit),
                Ok(Err(e)) => {
                    error!("❌ Error en el worker de guild {}: {}", guild_id, e);
                    if !self.back_off().await {
                        break;
                    }
                }
                Err(_) => {
                    error!("❌ Pánico en el worker de guild {}, recuperando", guild_id);
                    if !self.back_off().await {
                        break;
                    }
                }
            }
        }

        self.shutdown(guild_id, sink_lost).await;
    }

    /// Una iteración completa: sink, fuente, reproducción y espera
    async fn play_unit(&self, track: Track, token: CompletionToken) -> Result<Unit, SinkError> {
        // Stopped antes de soltar el sink: quien reconecte espera a que este worker salga
        let Some(sink) = self.state.sink() else {
            info!("🔌 Sin sink en guild {}, deteniendo worker", self.state.guild_id());
            self.state.requeue(track);
            self.state.mark_stopped();
            return Ok(Unit::SinkLost);
        };
        if !sink.is_connected().await {
            info!("🔌 Sink desconectado en guild {}, liberándolo", self.state.guild_id());
            self.state.requeue(track);
            self.state.mark_stopped();
            if self.state.release_sink(&sink) {
                sink.disconnect().await;
            }
            return Ok(Unit::SinkLost);
        }

        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(Unit::Stop),
            end = token.wait() => {
                debug!("⏭️ Saltado mientras se resolvía: {}", track.title());
                self.abandon(&track);
                return Ok(Unit::Played(end));
            }
            opened = self.adapter.open(&track) => opened,
        };

        let opened = match opened {
            Ok(opened) => opened,
            Err(e) => {
                info!("⏭️ Saltando track por error de preparación: {}", e);
                self.abandon(&track);
                return Ok(Unit::Unplayable);
            }
        };

        let track = opened.refreshed.unwrap_or(track);
        if !self.state.begin_playing(track.clone(), &token) {
            self.abandon(&track);
            return Ok(Unit::Played(PlaybackEnd::Skipped));
        }

        info!("🎵 Reproduciendo en guild {}: {}", self.state.guild_id(), track.title());
        if let Err(e) = sink.play(opened.source, token.clone()).await {
            self.abandon(&track);
            return Err(e);
        }

        let end = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                sink.stop().await;
                return Ok(Unit::Stop);
            }
            end = token.wait() => end,
        };

        if end == PlaybackEnd::Skipped {
            // El stop pudo llegar antes de que el sink empezara a sonar
            sink.stop().await;
        }

        self.state.finish_unit();
        Ok(Unit::Played(end))
    }

    fn abandon(&self, track: &Track) {
        if self.state.abandon(track) {
            info!("🔁 Loop desactivado en guild {}: el track ya no se puede abrir", self.state.guild_id());
            // Sin suscriptores no hay nadie a quien avisar
            self.events.send(EngineEvent::LoopCleared(self.state.guild_id())).ok();
        }
    }

    /// Espera acotada tras un fallo; `false` si llegó la cancelación
    async fn back_off(&self) -> bool {
        self.state.finish_unit();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.backoff) => true,
        }
    }

    async fn shutdown(&self, guild_id: GuildId, sink_lost: bool) {
        self.state.mark_stopped();
        if sink_lost {
            info!("⏹️ Worker detenido sin sink en guild {}", guild_id);
            return;
        }
        if let Some(sink) = self.state.sink() {
            sink.stop().await;
        }
        info!("⏹️ Worker detenido para guild {}", guild_id);
    }
}
