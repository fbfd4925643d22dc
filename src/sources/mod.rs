//! # Sources Module
//!
//! Turns user-supplied locators into [`Track`] metadata.
//!
//! - [`allow_list`] - host validation against the configured base domains
//! - [`ytdlp`] - the yt-dlp backed resolution backend
//!
//! [`ResolverClient`] glues both together: locators are validated first
//! (no network call for rejected hosts) and only then handed to the backend.
//! Stream resolution is never cached, stream URLs are time-limited.

pub mod allow_list;
pub mod ytdlp;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

use crate::error::ResolveError;

pub use allow_list::AllowList;
pub use ytdlp::YtDlpBackend;

/// Trait común para cualquier cosa capaz de resolver un locator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackResolver: Send + Sync {
    async fn resolve(&self, locator: &str) -> Result<Track, ResolveError>;
}

/// Backend externo de resolución (yt-dlp en producción).
///
/// Owns its own retry and timeout policy; the resolver client only maps
/// its failures through.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResolutionBackend: Send + Sync {
    async fn lookup(&self, locator: &str) -> Result<Track, ResolveError>;
}

/// Metadata inmutable de un track resuelto
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    title: String,
    page_url: String,
    uploader: Option<String>,
    duration: Duration,
    view_count: u64,
    thumbnail: Option<String>,
    stream_url: Option<String>,
    original_url: String,
}

impl Track {
    pub fn new(title: impl Into<String>, page_url: impl Into<String>, original_url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            page_url: page_url.into(),
            uploader: None,
            duration: Duration::ZERO,
            view_count: 0,
            thumbnail: None,
            stream_url: None,
            original_url: original_url.into(),
        }
    }

    // Getters
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn page_url(&self) -> &str {
        &self.page_url
    }
    pub fn uploader(&self) -> Option<&str> {
        self.uploader.as_deref()
    }
    pub fn duration(&self) -> Duration {
        self.duration
    }
    pub fn view_count(&self) -> u64 {
        self.view_count
    }
    pub fn thumbnail(&self) -> Option<&str> {
        self.thumbnail.as_deref()
    }
    pub fn stream_url(&self) -> Option<&str> {
        self.stream_url.as_deref()
    }
    pub fn original_url(&self) -> &str {
        &self.original_url
    }

    // Builders
    pub fn with_uploader(mut self, uploader: impl Into<String>) -> Self {
        self.uploader = Some(uploader.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_view_count(mut self, view_count: u64) -> Self {
        self.view_count = view_count;
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = Some(thumbnail.into());
        self
    }

    /// Copia del track con una URL de stream nueva (tras refrescar)
    pub fn with_stream_url(mut self, stream_url: impl Into<String>) -> Self {
        self.stream_url = Some(stream_url.into());
        self
    }
}

/// Resolver Client: allow-list + backend.
pub struct ResolverClient {
    allow_list: AllowList,
    backend: Arc<dyn ResolutionBackend>,
}

impl ResolverClient {
    pub fn new(allow_list: AllowList, backend: Arc<dyn ResolutionBackend>) -> Self {
        Self { allow_list, backend }
    }

    pub fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }
}

#[async_trait]
impl TrackResolver for ResolverClient {
    async fn resolve(&self, locator: &str) -> Result<Track, ResolveError> {
        if !self.allow_list.is_allowed(locator) {
            debug!("🚫 Locator rechazado por la allow-list");
            return Err(ResolveError::InvalidLocator(locator.to_string()));
        }

        match self.backend.lookup(locator).await {
            Ok(track) => {
                debug!("📊 Resuelto: {}", track.title());
                Ok(track)
            }
            Err(e) => {
                let host = allow_list::host_of(locator).unwrap_or_else(|| "<unknown>".to_string());
                warn!(
                    "❌ No se pudo resolver desde domain={}: {}",
                    host,
                    e.reason().map_or("invalid".to_string(), |r| r.to_string())
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResolutionReason;
    use pretty_assertions::assert_eq;

    fn client_with(backend: MockResolutionBackend) -> ResolverClient {
        let allow_list = AllowList::new(vec!["youtube.com".to_string()], 16);
        ResolverClient::new(allow_list, Arc::new(backend))
    }

    #[tokio::test]
    async fn test_rejected_locator_never_reaches_backend() {
        let mut backend = MockResolutionBackend::new();
        backend.expect_lookup().never();
        let client = client_with(backend);

        let err = client.resolve("https://evil.example/watch").await.unwrap_err();
        assert_eq!(err, ResolveError::InvalidLocator("https://evil.example/watch".into()));
    }

    #[tokio::test]
    async fn test_accepted_locator_calls_backend_every_time() {
        let mut backend = MockResolutionBackend::new();
        backend
            .expect_lookup()
            .times(2)
            .returning(|locator| Ok(Track::new("Song", locator, locator).with_stream_url("https://cdn/a")));
        let client = client_with(backend);

        let url = "https://www.youtube.com/watch?v=abc";
        let first = client.resolve(url).await.unwrap();
        let second = client.resolve(url).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.original_url(), url);
    }

    #[tokio::test]
    async fn test_backend_failure_is_passed_through() {
        let mut backend = MockResolutionBackend::new();
        backend
            .expect_lookup()
            .returning(|_| Err(ResolveError::resolution(ResolutionReason::NotFound, "gone")));
        let client = client_with(backend);

        let err = client.resolve("https://youtu.be.youtube.com/x").await.unwrap_err();
        assert_eq!(err.reason(), Some(ResolutionReason::NotFound));
    }

    #[test]
    fn test_track_defaults() {
        let track = Track::new("t", "https://page", "https://orig");
        assert_eq!(track.duration(), Duration::ZERO);
        assert_eq!(track.view_count(), 0);
        assert!(track.stream_url().is_none());
        assert!(track.uploader().is_none());
    }
}
