use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rand::seq::SliceRandom;
use serenity::model::id::GuildId;
use std::{collections::VecDeque, sync::Arc};
use tokio::{sync::Notify, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{
    completion::{Completion, CompletionToken, PlaybackEnd},
    sink::SharedSink,
};
use crate::{error::QueueError, sources::Track};

/// Fase observable del worker de una guild
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerPhase {
    Idle,
    Resolving,
    Playing,
    Stopped,
}

/// Foto consistente de la cola de una guild
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSnapshot {
    pub current: Option<Track>,
    pub upcoming: Vec<Track>,
    pub total_queued: usize,
    pub looping: bool,
    pub phase: PlayerPhase,
}

impl QueueSnapshot {
    pub fn empty() -> Self {
        Self {
            current: None,
            upcoming: Vec::new(),
            total_queued: 0,
            looping: false,
            phase: PlayerPhase::Idle,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.total_queued == 0
    }

    /// Tracks en cola que no entran en `upcoming`
    pub fn remaining(&self) -> usize {
        self.total_queued.saturating_sub(self.upcoming.len())
    }
}

// Queue, current, looping and phase share one lock so that shuffle,
// dequeue and snapshot are atomic with respect to each other.
#[derive(Debug)]
struct Playlist {
    queue: VecDeque<Track>,
    current: Option<Track>,
    looping: bool,
    phase: PlayerPhase,
    closed: bool,
}

#[derive(Default)]
struct WorkerSlot {
    handle: Option<JoinHandle<()>>,
    cancel: Option<CancellationToken>,
    closed: bool,
}

/// Estado por guild (Tenant State).
///
/// Every method holds its lock only for a bounded, non-async critical
/// section; the only suspension point is [`GuildState::next_track`].
pub struct GuildState<S> {
    guild_id: GuildId,
    playlist: Mutex<Playlist>,
    queue_ready: Notify,
    completion: Arc<Completion>,
    sink: RwLock<Option<SharedSink<S>>>,
    worker: Mutex<WorkerSlot>,
}

impl<S> GuildState<S> {
    pub fn new(guild_id: GuildId) -> Self {
        Self {
            guild_id,
            playlist: Mutex::new(Playlist {
                queue: VecDeque::new(),
                current: None,
                looping: false,
                phase: PlayerPhase::Idle,
                closed: false,
            }),
            queue_ready: Notify::new(),
            completion: Completion::new(),
            sink: RwLock::new(None),
            worker: Mutex::new(WorkerSlot::default()),
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    // --- Cola ---

    /// Agrega un track al final; devuelve si la guild estaba ociosa
    pub(crate) fn push(&self, track: Track, max_size: usize) -> Result<(bool, usize), QueueError> {
        let mut playlist = self.playlist.lock();
        if playlist.closed {
            return Err(QueueError::Inactive);
        }
        if playlist.queue.len() >= max_size {
            return Err(QueueError::QueueFull(max_size));
        }

        // Un track recién sacado de la cola aún no es `current` mientras se resuelve
        let was_idle = playlist.queue.is_empty()
            && playlist.current.is_none()
            && !matches!(playlist.phase, PlayerPhase::Resolving | PlayerPhase::Playing);
        info!("➕ Agregado a la cola de guild {}: {}", self.guild_id, track.title());
        playlist.queue.push_back(track);
        let position = playlist.queue.len();
        drop(playlist);

        self.queue_ready.notify_one();
        Ok((was_idle, position))
    }

    /// Siguiente track a reproducir: el actual si hay loop, si no el frente de la cola.
    ///
    /// The completion token for the new unit is armed under the same lock
    /// that moves the phase to `Resolving`, so a skip can never observe the
    /// phase without also reaching the token.
    pub(crate) async fn next_track(&self) -> (Track, CompletionToken) {
        loop {
            {
                let mut playlist = self.playlist.lock();
                let looping = playlist.looping;
                let next = match playlist.current.clone().filter(|_| looping) {
                    Some(current) => {
                        debug!("🔂 Repitiendo track: {}", current.title());
                        Some(current)
                    }
                    None => playlist.queue.pop_front(),
                };
                if let Some(track) = next {
                    debug!("➡️ Siguiente track en guild {}: {}", self.guild_id, track.title());
                    playlist.phase = PlayerPhase::Resolving;
                    return (track, self.completion.arm());
                }
                playlist.phase = PlayerPhase::Idle;
            }
            self.queue_ready.notified().await;
        }
    }

    /// Marca el track como en reproducción, salvo que el token ya haya terminado
    pub(crate) fn begin_playing(&self, track: Track, token: &CompletionToken) -> bool {
        let mut playlist = self.playlist.lock();
        if token.is_complete() {
            return false;
        }
        playlist.current = Some(track);
        playlist.phase = PlayerPhase::Playing;
        true
    }

    /// Fin normal de una unidad de reproducción
    pub(crate) fn finish_unit(&self) {
        let mut playlist = self.playlist.lock();
        if !playlist.looping {
            playlist.current = None;
        }
        playlist.phase = PlayerPhase::Idle;
    }

    /// Descarta un track que no se pudo reproducir.
    ///
    /// If it was the looping track, looping is turned off as well so a
    /// broken track is never retried forever. Returns `true` in that case.
    pub(crate) fn abandon(&self, track: &Track) -> bool {
        let mut playlist = self.playlist.lock();
        let mut loop_cleared = false;
        if playlist.current.as_ref() == Some(track) {
            playlist.current = None;
            loop_cleared = std::mem::replace(&mut playlist.looping, false);
        } else if !playlist.looping {
            playlist.current = None;
        }
        playlist.phase = PlayerPhase::Idle;
        loop_cleared
    }

    /// Devuelve al frente de la cola un track que no llegó a sonar.
    ///
    /// A looped track leaves `current` and goes back to the queue head, the
    /// loop flag is kept. Dropped if the state was already closed.
    pub(crate) fn requeue(&self, track: Track) {
        let mut playlist = self.playlist.lock();
        if playlist.current.as_ref() == Some(&track) {
            playlist.current = None;
        }
        if !playlist.closed {
            playlist.queue.push_front(track);
        }
    }

    pub(crate) fn mark_stopped(&self) {
        let mut playlist = self.playlist.lock();
        playlist.current = None;
        playlist.phase = PlayerPhase::Stopped;
    }

    /// Solicita saltar la unidad activa; devuelve (loop previo, fase)
    pub(crate) fn request_skip(&self) -> Result<(bool, PlayerPhase), QueueError> {
        let mut playlist = self.playlist.lock();
        let phase = playlist.phase;
        if !matches!(phase, PlayerPhase::Playing | PlayerPhase::Resolving) {
            return Err(QueueError::NothingPlaying);
        }
        let was_looping = std::mem::replace(&mut playlist.looping, false);
        self.completion.complete_current(PlaybackEnd::Skipped);
        Ok((was_looping, phase))
    }

    pub(crate) fn toggle_loop(&self) -> bool {
        let mut playlist = self.playlist.lock();
        playlist.looping = !playlist.looping;
        if playlist.looping {
            info!("🔂 Repetir canción activado en guild {}", self.guild_id);
        } else {
            info!("➡️ Repetición desactivada en guild {}", self.guild_id);
        }
        playlist.looping
    }

    /// Mezcla la cola en el sitio, bajo el mismo lock que el dequeue
    pub(crate) fn shuffle(&self) -> Result<usize, QueueError> {
        let mut playlist = self.playlist.lock();
        if playlist.queue.len() < 2 {
            return Err(QueueError::QueueTooSmall);
        }
        playlist.queue.make_contiguous().shuffle(&mut rand::thread_rng());
        info!("🔀 Cola mezclada en guild {}", self.guild_id);
        Ok(playlist.queue.len())
    }

    pub fn snapshot(&self, limit: usize) -> QueueSnapshot {
        let playlist = self.playlist.lock();
        QueueSnapshot {
            current: playlist.current.clone(),
            upcoming: playlist.queue.iter().take(limit).cloned().collect(),
            total_queued: playlist.queue.len(),
            looping: playlist.looping,
            phase: playlist.phase,
        }
    }

    pub fn phase(&self) -> PlayerPhase {
        self.playlist.lock().phase
    }

    pub fn is_looping(&self) -> bool {
        self.playlist.lock().looping
    }

    // --- Sink ---

    pub fn sink(&self) -> Option<SharedSink<S>> {
        self.sink.read().clone()
    }

    pub(crate) fn set_sink(&self, sink: SharedSink<S>) {
        *self.sink.write() = Some(sink);
    }

    pub(crate) fn take_sink(&self) -> Option<SharedSink<S>> {
        self.sink.write().take()
    }

    /// Quita el sink solo si sigue siendo `sink`; una reconexión ya lo pudo reemplazar
    pub(crate) fn release_sink(&self, sink: &SharedSink<S>) -> bool {
        let mut slot = self.sink.write();
        let same = slot
            .as_ref()
            .is_some_and(|current| std::ptr::addr_eq(Arc::as_ptr(current), Arc::as_ptr(sink)));
        if same {
            *slot = None;
        }
        same
    }

    // --- Worker ---

    /// Arranca un worker si no hay uno vivo. `Ok(true)` si se arrancó.
    pub(crate) fn try_start_worker<F>(&self, spawn: F) -> Result<bool, QueueError>
    where
        F: FnOnce(CancellationToken) -> JoinHandle<()>,
    {
        let mut slot = self.worker.lock();
        if slot.closed {
            return Err(QueueError::Inactive);
        }
        if slot.handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(false);
        }

        let cancel = CancellationToken::new();
        slot.handle = Some(spawn(cancel.clone()));
        slot.cancel = Some(cancel);
        Ok(true)
    }

    #[cfg(test)]
    pub(crate) fn has_live_worker(&self) -> bool {
        self.worker
            .lock()
            .handle
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Cierra el estado: no acepta más tracks ni workers y cancela el actual
    pub(crate) fn close(&self) -> Option<JoinHandle<()>> {
        {
            let mut playlist = self.playlist.lock();
            playlist.closed = true;
            playlist.queue.clear();
        }

        let mut slot = self.worker.lock();
        slot.closed = true;
        if let Some(cancel) = slot.cancel.take() {
            cancel.cancel();
        }
        slot.handle.take()
    }
}

/// Registro explícito de estados por guild.
///
/// Creation happens on first use, removal only through [`GuildRegistry::remove`].
/// Synchronisation is per key (DashMap shards plus the per-guild locks).
pub struct GuildRegistry<S> {
    guilds: DashMap<GuildId, Arc<GuildState<S>>>,
}

impl<S> GuildRegistry<S> {
    pub fn new() -> Self {
        Self {
            guilds: DashMap::new(),
        }
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<GuildState<S>>> {
        self.guilds.get(&guild_id).map(|s| Arc::clone(s.value()))
    }

    pub fn get_or_create(&self, guild_id: GuildId) -> Arc<GuildState<S>> {
        self.guilds
            .entry(guild_id)
            .or_insert_with(|| Arc::new(GuildState::new(guild_id)))
            .clone()
    }

    pub fn remove(&self, guild_id: GuildId) -> Option<Arc<GuildState<S>>> {
        self.guilds.remove(&guild_id).map(|(_, state)| state)
    }

    pub fn guild_ids(&self) -> Vec<GuildId> {
        self.guilds.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.guilds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guilds.is_empty()
    }
}

impl<S> Default for GuildRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::{track, RecordingSink};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn state() -> GuildState<String> {
        GuildState::new(GuildId::new(1))
    }

    fn titles(tracks: &[Track]) -> Vec<String> {
        tracks.iter().map(|t| t.title().to_string()).collect()
    }

    #[test]
    fn test_push_reports_idle_and_position() {
        let state = state();
        assert_eq!(state.push(track("a"), 10), Ok((true, 1)));
        assert_eq!(state.push(track("b"), 10), Ok((false, 2)));

        let snapshot = state.snapshot(10);
        assert_eq!(titles(&snapshot.upcoming), vec!["a", "b"]);
        assert_eq!(snapshot.total_queued, 2);
        assert!(snapshot.current.is_none());
    }

    #[test]
    fn test_push_rejects_when_full() {
        let state = state();
        state.push(track("a"), 1).unwrap();
        assert_eq!(state.push(track("b"), 1), Err(QueueError::QueueFull(1)));
        assert_eq!(state.snapshot(10).total_queued, 1);
    }

    #[tokio::test]
    async fn test_next_track_is_fifo_and_waits() {
        let state = Arc::new(state());
        state.push(track("a"), 10).unwrap();
        state.push(track("b"), 10).unwrap();

        assert_eq!(state.next_track().await.0.title(), "a");
        assert_eq!(state.phase(), PlayerPhase::Resolving);
        assert_eq!(state.next_track().await.0.title(), "b");

        let waiter = {
            let state = Arc::clone(&state);
            tokio::spawn(async move { state.next_track().await.0 })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        state.push(track("c"), 10).unwrap();
        let next = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.title(), "c");
    }

    #[tokio::test]
    async fn test_looping_replays_current() {
        let state = state();
        state.push(track("a"), 10).unwrap();
        state.push(track("b"), 10).unwrap();

        let (first, token) = state.next_track().await;
        assert!(state.begin_playing(first, &token));
        assert!(state.toggle_loop());
        state.finish_unit();

        assert_eq!(state.next_track().await.0.title(), "a");
        assert_eq!(state.snapshot(10).total_queued, 1);
    }

    #[test]
    fn test_shuffle_requires_two_tracks() {
        let state = state();
        assert_eq!(state.shuffle(), Err(QueueError::QueueTooSmall));
        state.push(track("a"), 10).unwrap();
        assert_eq!(state.shuffle(), Err(QueueError::QueueTooSmall));
        assert_eq!(titles(&state.snapshot(10).upcoming), vec!["a"]);
    }

    #[test]
    fn test_shuffle_is_a_permutation() {
        let state = state();
        let names: Vec<String> = (0..12).map(|i| format!("t{i}")).collect();
        for name in &names {
            state.push(track(name), 100).unwrap();
        }

        let mut changed = false;
        for _ in 0..20 {
            assert_eq!(state.shuffle(), Ok(12));
            let mut order = titles(&state.snapshot(100).upcoming);
            if order != names {
                changed = true;
            }
            order.sort();
            let mut expected = names.clone();
            expected.sort();
            assert_eq!(order, expected);
        }
        assert!(changed);
    }

    #[test]
    fn test_skip_requires_active_unit() {
        let state = state();
        assert_eq!(state.request_skip(), Err(QueueError::NothingPlaying));
    }

    #[tokio::test]
    async fn test_skip_clears_loop_and_completes_token() {
        let state = state();
        state.push(track("a"), 10).unwrap();
        let (a, token) = state.next_track().await;
        state.begin_playing(a, &token);
        state.toggle_loop();

        assert_eq!(state.request_skip(), Ok((true, PlayerPhase::Playing)));
        assert!(!state.is_looping());
        assert_eq!(token.outcome(), Some(PlaybackEnd::Skipped));
    }

    #[tokio::test]
    async fn test_abandon_looping_track_disables_loop() {
        let state = state();
        state.push(track("a"), 10).unwrap();
        let (a, token) = state.next_track().await;
        state.begin_playing(a, &token);
        state.toggle_loop();
        state.finish_unit();

        let (again, _) = state.next_track().await;
        assert!(state.abandon(&again));
        let snapshot = state.snapshot(10);
        assert!(!snapshot.looping);
        assert!(snapshot.current.is_none());
        assert_eq!(snapshot.phase, PlayerPhase::Idle);
    }

    #[tokio::test]
    async fn test_abandon_without_loop_reports_nothing() {
        let state = state();
        state.push(track("a"), 10).unwrap();
        let (a, _) = state.next_track().await;
        assert!(!state.abandon(&a));
    }

    #[tokio::test]
    async fn test_requeue_puts_track_back_at_the_head() {
        let state = state();
        state.push(track("a"), 10).unwrap();
        state.push(track("b"), 10).unwrap();
        let (a, _) = state.next_track().await;

        state.requeue(a);
        assert_eq!(titles(&state.snapshot(10).upcoming), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_requeue_looping_track_keeps_loop() {
        let state = state();
        state.push(track("a"), 10).unwrap();
        let (a, token) = state.next_track().await;
        state.begin_playing(a, &token);
        state.toggle_loop();
        state.finish_unit();

        let (again, _) = state.next_track().await;
        state.requeue(again);
        let snapshot = state.snapshot(10);
        assert!(snapshot.current.is_none());
        assert!(snapshot.looping);
        assert_eq!(titles(&snapshot.upcoming), vec!["a"]);
    }

    #[test]
    fn test_release_sink_ignores_replaced_sink() {
        let state = state();
        let old: SharedSink<String> = RecordingSink::new();
        let new: SharedSink<String> = RecordingSink::new();
        state.set_sink(old.clone());
        state.set_sink(new.clone());

        assert!(!state.release_sink(&old));
        assert!(state.sink().is_some());
        assert!(state.release_sink(&new));
        assert!(state.sink().is_none());
    }

    #[test]
    fn test_close_rejects_further_work() {
        let state = state();
        state.push(track("a"), 10).unwrap();
        assert!(state.close().is_none());

        assert_eq!(state.push(track("b"), 10), Err(QueueError::Inactive));
        assert_eq!(state.snapshot(10).total_queued, 0);
        assert_eq!(
            state.try_start_worker(|_| tokio::spawn(async {})),
            Err(QueueError::Inactive)
        );
    }

    #[test]
    fn test_registry_creates_once_and_removes() {
        let registry: GuildRegistry<String> = GuildRegistry::new();
        let a = registry.get_or_create(GuildId::new(7));
        let b = registry.get_or_create(GuildId::new(7));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(GuildId::new(7)).is_some());
        assert!(registry.get(GuildId::new(7)).is_none());
        assert!(registry.is_empty());
    }
}
