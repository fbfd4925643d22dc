//! Error types for the playback engine.
//!
//! Each boundary of the engine owns its own error enum so callers can tell
//! user mistakes (bad locator, empty queue) apart from backend failures.
//! None of these are fatal: the worker logs and moves on, the front-end
//! turns them into messages.

use thiserror::Error;

/// Coarse reason attached to a failed resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionReason {
    Timeout,
    NotFound,
    Malformed,
    Backend,
}

impl std::fmt::Display for ResolutionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Timeout => "timeout",
            Self::NotFound => "not found",
            Self::Malformed => "malformed data",
            Self::Backend => "backend error",
        };
        f.write_str(name)
    }
}

/// Fallos del Resolver Client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// Locator rejected by the allow-list, no network call was made
    #[error("Invalid locator: {0}")]
    InvalidLocator(String),

    /// Backend lookup failed after its own retry policy
    #[error("Resolution failed ({reason}): {detail}")]
    Resolution {
        reason: ResolutionReason,
        detail: String,
    },
}

impl ResolveError {
    pub fn resolution(reason: ResolutionReason, detail: impl Into<String>) -> Self {
        Self::Resolution {
            reason,
            detail: detail.into(),
        }
    }

    pub fn reason(&self) -> Option<ResolutionReason> {
        match self {
            Self::InvalidLocator(_) => None,
            Self::Resolution { reason, .. } => Some(*reason),
        }
    }
}

/// Fallos del pipe de decodificación.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecoderError {
    /// The stream URL expired or was revoked
    #[error("Stale stream URL: {0}")]
    Stale(String),

    #[error("Decoder failed: {0}")]
    Failed(String),
}

/// Fallos del Track Source Adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("No stream URL available after refresh")]
    NoStreamUrl,

    #[error("Stream refresh failed: {0}")]
    Refresh(#[from] ResolveError),

    #[error("Decoder pipe error: {0}")]
    Decoder(String),

    #[error("Source open timed out")]
    Timeout,
}

/// Fallos del sink de salida.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("Sink disconnected")]
    Disconnected,

    #[error("Could not connect sink: {0}")]
    Connect(String),

    #[error("Could not start playback: {0}")]
    Play(String),
}

/// Precondiciones de la API de mutación de cola.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Nothing is playing")]
    NothingPlaying,

    #[error("Queue needs at least two tracks")]
    QueueTooSmall,

    #[error("Queue is full (max {0} tracks)")]
    QueueFull(usize),

    /// The guild was deactivated while the call was in flight
    #[error("Guild is not active")]
    Inactive,
}

/// Errors surfaced by the end-to-end `play` flow.
#[derive(Error, Debug)]
pub enum PlayError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}
