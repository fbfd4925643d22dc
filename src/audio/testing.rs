//! Dobles de prueba en memoria para el worker y el engine.
//!
//! Sources are plain `String`s (the stream URL that was opened), so tests
//! can assert on exactly what reached the sink.

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::GuildId;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use super::{
    completion::{CompletionToken, PlaybackEnd},
    engine::PlaybackEngine,
    sink::{OutputSink, SharedSink, SinkConnector},
    source::AudioDecoder,
};
use crate::{
    config::Config,
    error::{DecoderError, ResolutionReason, ResolveError, SinkError},
    sources::{Track, TrackResolver},
};

pub fn track(name: &str) -> Track {
    Track::new(name, format!("https://youtu.be/{name}"), format!("https://youtu.be/{name}"))
        .with_stream_url(format!("stream://{name}"))
}

/// Espera (con límite) a que se cumpla una condición
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

pub fn test_config() -> Config {
    Config {
        worker_backoff_secs: 0,
        source_open_timeout_secs: 1,
        max_queue_size: 50,
        queue_preview_size: 3,
        ..Config::default()
    }
}

pub fn engine(resolver: StaticResolver, decoder: Arc<ScriptedDecoder>) -> PlaybackEngine<String> {
    PlaybackEngine::<String>::new(&test_config(), Arc::new(resolver), decoder)
        .with_worker_backoff(Duration::from_millis(30))
}

// --- Resolver ---

#[derive(Default)]
pub struct StaticResolver {
    tracks: Mutex<HashMap<String, Track>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, track: Track) {
        self.tracks.lock().insert(track.original_url().to_string(), track);
    }
}

#[async_trait]
impl TrackResolver for StaticResolver {
    async fn resolve(&self, locator: &str) -> Result<Track, ResolveError> {
        self.tracks
            .lock()
            .get(locator)
            .cloned()
            .ok_or_else(|| ResolveError::resolution(ResolutionReason::NotFound, locator))
    }
}

// --- Decoder ---

#[derive(Default)]
pub struct ScriptedDecoder {
    stale: Mutex<HashSet<String>>,
    broken: Mutex<HashSet<String>>,
    delays: Mutex<HashMap<String, Duration>>,
    opened: Mutex<Vec<String>>,
}

impl ScriptedDecoder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn mark_stale(&self, url: &str) {
        self.stale.lock().insert(url.to_string());
    }

    pub fn mark_broken(&self, url: &str) {
        self.broken.lock().insert(url.to_string());
    }

    pub fn delay(&self, url: &str, delay: Duration) {
        self.delays.lock().insert(url.to_string(), delay);
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }
}

#[async_trait]
impl AudioDecoder for ScriptedDecoder {
    type Source = String;

    async fn open(&self, stream_url: &str) -> Result<String, DecoderError> {
        self.opened.lock().push(stream_url.to_string());

        let delay = self.delays.lock().get(stream_url).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.stale.lock().contains(stream_url) {
            return Err(DecoderError::Stale("HTTP 403".into()));
        }
        if self.broken.lock().contains(stream_url) {
            return Err(DecoderError::Failed("cannot decode".into()));
        }
        Ok(stream_url.to_string())
    }
}

// --- Sink ---

/// Sink que registra lo reproducido; los tracks terminan a mano
pub struct RecordingSink {
    connected: AtomicBool,
    fail_next_play: AtomicBool,
    played: Mutex<Vec<String>>,
    active: Mutex<Option<CompletionToken>>,
    stops: AtomicUsize,
    disconnects: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(true),
            fail_next_play: AtomicBool::new(false),
            played: Mutex::new(Vec::new()),
            active: Mutex::new(None),
            stops: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        })
    }

    pub fn played(&self) -> Vec<String> {
        self.played.lock().clone()
    }

    pub fn plays(&self) -> usize {
        self.played.lock().len()
    }

    /// Termina de forma natural lo que esté sonando
    pub fn finish_current(&self) -> bool {
        match self.active.lock().take() {
            Some(token) => token.complete(PlaybackEnd::Finished),
            None => false,
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn fail_next_play(&self) {
        self.fail_next_play.store(true, Ordering::SeqCst);
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OutputSink for RecordingSink {
    type Source = String;

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn play(&self, source: String, done: CompletionToken) -> Result<(), SinkError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SinkError::Disconnected);
        }
        if self.fail_next_play.swap(false, Ordering::SeqCst) {
            return Err(SinkError::Play("driver hiccup".into()));
        }
        // El token queda listo antes de que `plays()` cuente esta reproducción
        *self.active.lock() = Some(done);
        self.played.lock().push(source);
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = self.active.lock().take() {
            token.complete(PlaybackEnd::Stopped);
        }
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// Conector que siempre devuelve el mismo sink
pub struct FixedConnector {
    sink: Arc<RecordingSink>,
    connects: AtomicUsize,
}

impl FixedConnector {
    pub fn new(sink: Arc<RecordingSink>) -> Self {
        Self {
            sink,
            connects: AtomicUsize::new(0),
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SinkConnector<String> for FixedConnector {
    async fn connect(&self, _guild_id: GuildId) -> Result<SharedSink<String>, SinkError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let sink: SharedSink<String> = self.sink.clone();
        Ok(sink)
    }
}

/// Conector que siempre falla
pub struct BrokenConnector;

#[async_trait]
impl SinkConnector<String> for BrokenConnector {
    async fn connect(&self, _guild_id: GuildId) -> Result<SharedSink<String>, SinkError> {
        Err(SinkError::Connect("missing permissions".into()))
    }
}
