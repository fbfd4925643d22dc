use futures::future::join_all;
use serenity::model::id::GuildId;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{
    sink::SinkConnector,
    source::{AudioDecoder, SourceAdapter},
    state::{GuildRegistry, GuildState, PlayerPhase, QueueSnapshot},
    worker::PlaybackWorker,
};
use crate::{
    config::Config,
    error::{PlayError, QueueError, SinkError},
    sources::{Track, TrackResolver},
};

const WORKER_STOP_TIMEOUT: Duration = Duration::from_secs(5);
const EVENT_CAPACITY: usize = 64;
const WORKER_EXIT_POLL: Duration = Duration::from_millis(10);

/// Resultado de agregar un track a la cola
#[derive(Debug, Clone, PartialEq)]
pub struct EnqueueOutcome {
    pub track: Track,
    /// La guild no tenía nada sonando ni en cola
    pub was_idle: bool,
    /// Posición (1-based) en la cola
    pub position: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipOutcome {
    pub was_looping: bool,
}

/// Cambios de estado que ocurren dentro del worker, sin que ningún comando los pida
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// El track en loop no se pudo abrir y el loop se desactivó
    LoopCleared(GuildId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    pub active_guilds: usize,
    pub workers_started: u64,
}

/// Motor de reproducción multi-guild.
///
/// Owns the guild registry and exposes the queue mutation API plus the
/// lifecycle operations (activation, deactivation). Every method is safe
/// to call concurrently with the guild's worker; none of them waits on
/// playback.
pub struct PlaybackEngine<S> {
    registry: GuildRegistry<S>,
    resolver: Arc<dyn TrackResolver>,
    adapter: Arc<SourceAdapter<S>>,
    max_queue_size: usize,
    preview_size: usize,
    worker_backoff: Duration,
    workers_started: AtomicU64,
    events: broadcast::Sender<EngineEvent>,
}

impl<S: Send + 'static> PlaybackEngine<S> {
    pub fn new(
        config: &Config,
        resolver: Arc<dyn TrackResolver>,
        decoder: Arc<dyn AudioDecoder<Source = S>>,
    ) -> Self {
        let adapter = SourceAdapter::new(Arc::clone(&resolver), decoder, config.source_open_timeout());
        Self {
            registry: GuildRegistry::new(),
            resolver,
            adapter: Arc::new(adapter),
            max_queue_size: config.max_queue_size,
            preview_size: config.queue_preview_size,
            worker_backoff: config.worker_backoff(),
            workers_started: AtomicU64::new(0),
            events: broadcast::channel(EVENT_CAPACITY).0,
        }
    }

    pub fn with_worker_backoff(mut self, backoff: Duration) -> Self {
        self.worker_backoff = backoff;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    // --- Ciclo de vida ---

    /// Asegura sink conectado y worker vivo para la guild
    pub async fn activate(&self, guild_id: GuildId, connector: &dyn SinkConnector<S>) -> Result<(), SinkError> {
        loop {
            let state = self.registry.get_or_create(guild_id);

            let connected = match state.sink() {
                Some(sink) => sink.is_connected().await,
                None => false,
            };
            if !connected {
                let sink = connector.connect(guild_id).await?;
                state.set_sink(sink);
            }

            match self.ensure_worker(&state) {
                // El worker anterior está saliendo (perdió el sink); se espera a que termine
                Ok(false) if state.phase() == PlayerPhase::Stopped => tokio::time::sleep(WORKER_EXIT_POLL).await,
                Ok(_) => return Ok(()),
                // Desactivada mientras conectábamos: se vuelve a crear
                Err(_) => debug!("Guild {} cerrada durante la activación, reintentando", guild_id),
            }
        }
    }

    /// Arranca el worker si hay sink y no hay uno vivo
    fn ensure_worker(&self, state: &Arc<GuildState<S>>) -> Result<bool, QueueError> {
        if state.sink().is_none() {
            return Ok(false);
        }

        let started = state.try_start_worker(|cancel| {
            let worker = PlaybackWorker::new(
                Arc::clone(state),
                Arc::clone(&self.adapter),
                cancel,
                self.worker_backoff,
                self.events.clone(),
            );
            tokio::spawn(worker.run())
        })?;

        if started {
            self.workers_started.fetch_add(1, Ordering::Relaxed);
            info!("🚀 Worker arrancado para guild {}", state.guild_id());
        }
        Ok(started)
    }

    /// Cancela el worker, libera el sink y elimina el estado de la guild
    pub async fn deactivate(&self, guild_id: GuildId) -> bool {
        let Some(state) = self.registry.remove(guild_id) else {
            return false;
        };

        if let Some(mut handle) = state.close() {
            if tokio::time::timeout(WORKER_STOP_TIMEOUT, &mut handle).await.is_err() {
                warn!("⚠️ El worker de guild {} no se detuvo a tiempo, abortando", guild_id);
                handle.abort();
            }
        }

        if let Some(sink) = state.take_sink() {
            sink.stop().await;
            sink.disconnect().await;
        }

        info!("🧹 Guild {} desactivada", guild_id);
        true
    }

    /// Cambio de oyentes en el canal del sink; sin oyentes se desactiva
    pub async fn on_listeners_changed(&self, guild_id: GuildId, listeners: usize) -> bool {
        if listeners > 0 {
            return false;
        }
        info!("👋 Sin oyentes en guild {}, desconectando", guild_id);
        self.deactivate(guild_id).await
    }

    pub async fn shutdown_all(&self) {
        let guilds = self.registry.guild_ids();
        info!("⏹️ Deteniendo {} guilds", guilds.len());
        join_all(guilds.into_iter().map(|guild_id| self.deactivate(guild_id))).await;
    }

    // --- API de cola ---

    /// Resuelve, conecta y encola: el flujo completo de `/play`
    pub async fn play(
        &self,
        guild_id: GuildId,
        locator: &str,
        connector: &dyn SinkConnector<S>,
    ) -> Result<EnqueueOutcome, PlayError> {
        self.activate(guild_id, connector).await?;
        let track = self.resolver.resolve(locator).await?;
        Ok(self.enqueue(guild_id, track)?)
    }

    pub fn enqueue(&self, guild_id: GuildId, track: Track) -> Result<EnqueueOutcome, QueueError> {
        loop {
            let state = self.registry.get_or_create(guild_id);
            match state.push(track.clone(), self.max_queue_size) {
                Ok((was_idle, position)) => {
                    self.ensure_worker(&state)?;
                    return Ok(EnqueueOutcome {
                        track,
                        was_idle,
                        position,
                    });
                }
                // El estado se cerró entre el get y el push
                Err(QueueError::Inactive) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Salta la unidad activa (también mientras se resuelve)
    pub fn skip(&self, guild_id: GuildId) -> Result<SkipOutcome, QueueError> {
        let state = self.registry.get(guild_id).ok_or(QueueError::NothingPlaying)?;
        let (was_looping, phase) = state.request_skip()?;
        info!("⏭️ Skip en guild {} (fase {:?})", guild_id, phase);
        Ok(SkipOutcome { was_looping })
    }

    /// Invierte el loop; devuelve el nuevo valor
    pub fn toggle_loop(&self, guild_id: GuildId) -> Result<bool, QueueError> {
        let state = self.registry.get(guild_id).ok_or(QueueError::NothingPlaying)?;
        Ok(state.toggle_loop())
    }

    pub fn shuffle(&self, guild_id: GuildId) -> Result<usize, QueueError> {
        self.registry
            .get(guild_id)
            .ok_or(QueueError::QueueTooSmall)?
            .shuffle()
    }

    pub fn snapshot(&self, guild_id: GuildId) -> QueueSnapshot {
        self.registry
            .get(guild_id)
            .map(|state| state.snapshot(self.preview_size))
            .unwrap_or_else(QueueSnapshot::empty)
    }

    pub fn now_playing(&self, guild_id: GuildId) -> Option<Track> {
        self.registry
            .get(guild_id)
            .and_then(|state| state.snapshot(0).current)
    }

    pub fn is_looping(&self, guild_id: GuildId) -> bool {
        self.registry
            .get(guild_id)
            .is_some_and(|state| state.is_looping())
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            active_guilds: self.registry.len(),
            workers_started: self.workers_started.load(Ordering::Relaxed),
        }
    }
}
