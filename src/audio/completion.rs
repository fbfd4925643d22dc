use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;

/// Cómo terminó una unidad de reproducción
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEnd {
    /// The sink reached the end of the source (or errored out)
    Finished,
    /// Stopped from outside the sink (stop primitive, disconnect)
    Stopped,
    /// An explicit skip request
    Skipped,
}

#[derive(Debug, Default)]
struct CompletionState {
    generation: u64,
    outcome: Option<PlaybackEnd>,
}

/// Señal de finalización re-armable.
///
/// The worker calls [`Completion::arm`] once per playback unit and hands the
/// returned [`CompletionToken`] to the sink. A token only completes the
/// generation it was armed for, so a late end-event from a previous track
/// can never finish the one that replaced it.
#[derive(Debug, Default)]
pub struct Completion {
    state: Mutex<CompletionState>,
    notify: Notify,
}

impl Completion {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Resetea la señal y devuelve el token de la nueva generación
    pub fn arm(self: &Arc<Self>) -> CompletionToken {
        let mut state = self.state.lock();
        state.generation += 1;
        state.outcome = None;
        CompletionToken {
            completion: Arc::clone(self),
            generation: state.generation,
        }
    }

    /// Completa la generación armada actualmente, si sigue pendiente
    pub fn complete_current(&self, end: PlaybackEnd) -> bool {
        let generation = self.state.lock().generation;
        self.complete(generation, end)
    }

    fn complete(&self, generation: u64, end: PlaybackEnd) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation || state.outcome.is_some() {
            return false;
        }
        state.outcome = Some(end);
        drop(state);
        self.notify.notify_waiters();
        true
    }

    fn outcome(&self, generation: u64) -> Option<PlaybackEnd> {
        let state = self.state.lock();
        if state.generation != generation {
            // Re-armed underneath us, this unit is over
            return Some(PlaybackEnd::Stopped);
        }
        state.outcome
    }
}

/// Token de una generación concreta de [`Completion`]
#[derive(Debug, Clone)]
pub struct CompletionToken {
    completion: Arc<Completion>,
    generation: u64,
}

impl CompletionToken {
    pub fn complete(&self, end: PlaybackEnd) -> bool {
        self.completion.complete(self.generation, end)
    }

    pub fn outcome(&self) -> Option<PlaybackEnd> {
        self.completion.outcome(self.generation)
    }

    pub fn is_complete(&self) -> bool {
        self.outcome().is_some()
    }

    /// Espera a que esta generación termine
    pub async fn wait(&self) -> PlaybackEnd {
        loop {
            let notified = self.completion.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(end) = self.outcome() {
                return end;
            }

            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_returns_after_complete() {
        let completion = Completion::new();
        let token = completion.arm();

        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(token.complete(PlaybackEnd::Finished));
        assert_eq!(waiter.await.unwrap(), PlaybackEnd::Finished);
    }

    #[tokio::test]
    async fn test_first_completion_wins() {
        let completion = Completion::new();
        let token = completion.arm();

        assert!(completion.complete_current(PlaybackEnd::Skipped));
        assert!(!token.complete(PlaybackEnd::Finished));
        assert_eq!(token.wait().await, PlaybackEnd::Skipped);
    }

    #[tokio::test]
    async fn test_stale_token_cannot_complete_new_generation() {
        let completion = Completion::new();
        let old = completion.arm();
        let new = completion.arm();

        assert!(!old.complete(PlaybackEnd::Finished));
        assert!(!new.is_complete());
        assert_eq!(old.outcome(), Some(PlaybackEnd::Stopped));

        assert!(new.complete(PlaybackEnd::Finished));
        assert_eq!(new.wait().await, PlaybackEnd::Finished);
    }
}
