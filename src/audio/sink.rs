use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    input::Input, Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird,
    TrackEvent,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::completion::{CompletionToken, PlaybackEnd};
use crate::error::SinkError;

/// Conexión de salida que recibe el audio decodificado.
///
/// Only the guild's worker calls [`OutputSink::play`]; everybody else may
/// only ask it to stop or disconnect.
#[async_trait]
pub trait OutputSink: Send + Sync {
    type Source;

    async fn is_connected(&self) -> bool;

    /// Starts playback; `done` must be completed when the source ends or is stopped
    async fn play(&self, source: Self::Source, done: CompletionToken) -> Result<(), SinkError>;

    async fn stop(&self);

    async fn disconnect(&self);
}

pub type SharedSink<S> = Arc<dyn OutputSink<Source = S>>;

/// Obtiene (o crea) el sink de una guild
#[async_trait]
pub trait SinkConnector<S>: Send + Sync {
    async fn connect(&self, guild_id: GuildId) -> Result<SharedSink<S>, SinkError>;
}

/// Sink sobre una llamada de songbird
pub struct SongbirdSink {
    guild_id: GuildId,
    manager: Arc<Songbird>,
    call: Arc<Mutex<Call>>,
    volume: f32,
}

impl SongbirdSink {
    pub fn new(guild_id: GuildId, manager: Arc<Songbird>, call: Arc<Mutex<Call>>, volume: f32) -> Self {
        Self {
            guild_id,
            manager,
            call,
            volume,
        }
    }
}

#[async_trait]
impl OutputSink for SongbirdSink {
    type Source = Input;

    async fn is_connected(&self) -> bool {
        self.call.lock().await.current_connection().is_some()
    }

    async fn play(&self, source: Input, done: CompletionToken) -> Result<(), SinkError> {
        let handle = {
            let mut call = self.call.lock().await;
            if call.current_connection().is_none() {
                return Err(SinkError::Disconnected);
            }
            call.play_input(source)
        };

        let _ = handle.set_volume(self.volume);

        // Registrar event handlers para detectar el final del track
        let end = handle.add_event(
            Event::Track(TrackEvent::End),
            PlaybackEndNotifier { token: done.clone() },
        );
        let error = handle.add_event(
            Event::Track(TrackEvent::Error),
            PlaybackEndNotifier { token: done.clone() },
        );
        if end.is_err() || error.is_err() {
            // El track ya terminó antes de poder registrar los eventos
            debug!("Track terminó antes de registrar eventos en guild {}", self.guild_id);
            done.complete(PlaybackEnd::Finished);
        }

        Ok(())
    }

    async fn stop(&self) {
        self.call.lock().await.stop();
    }

    async fn disconnect(&self) {
        if let Err(e) = self.manager.remove(self.guild_id).await {
            warn!("Error al salir del canal de voz en guild {}: {:?}", self.guild_id, e);
        } else {
            info!("👋 Desconectado del canal de voz en guild {}", self.guild_id);
        }
    }
}

/// Handler que completa el token cuando songbird termina el track
struct PlaybackEndNotifier {
    token: CompletionToken,
}

#[async_trait]
impl VoiceEventHandler for PlaybackEndNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        self.token.complete(PlaybackEnd::Finished);
        None
    }
}

/// Conecta al canal de voz del usuario que pidió la canción
pub struct VoiceConnector {
    manager: Arc<Songbird>,
    channel_id: ChannelId,
    volume: f32,
}

impl VoiceConnector {
    pub fn new(manager: Arc<Songbird>, channel_id: ChannelId, volume: f32) -> Self {
        Self {
            manager,
            channel_id,
            volume,
        }
    }
}

#[async_trait]
impl SinkConnector<Input> for VoiceConnector {
    async fn connect(&self, guild_id: GuildId) -> Result<SharedSink<Input>, SinkError> {
        let call = self
            .manager
            .join(guild_id, self.channel_id)
            .await
            .map_err(|e| SinkError::Connect(e.to_string()))?;

        info!("🔊 Conectado al canal de voz {} en guild {}", self.channel_id, guild_id);
        let sink: SharedSink<Input> = Arc::new(SongbirdSink::new(
            guild_id,
            Arc::clone(&self.manager),
            call,
            self.volume,
        ));
        Ok(sink)
    }
}
