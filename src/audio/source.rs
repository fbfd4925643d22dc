use async_trait::async_trait;
use songbird::input::{HttpRequest, Input};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};

use crate::{
    error::{DecoderError, SourceError},
    sources::{Track, TrackResolver},
};

/// Pipe de decodificación opaco: URL de stream -> fuente reproducible
#[async_trait]
pub trait AudioDecoder: Send + Sync {
    type Source;

    async fn open(&self, stream_url: &str) -> Result<Self::Source, DecoderError>;
}

/// Fuente abierta, con el track refrescado si hubo que re-resolver
pub struct OpenedSource<S> {
    pub source: S,
    pub refreshed: Option<Track>,
}

/// Track Source Adapter.
///
/// Opens the track's stream URL directly; when it is missing or stale the
/// original locator is re-resolved once and the open is retried exactly
/// once. The track itself is never mutated, a refreshed copy is returned.
pub struct SourceAdapter<S> {
    resolver: Arc<dyn TrackResolver>,
    decoder: Arc<dyn AudioDecoder<Source = S>>,
    open_timeout: Duration,
}

enum OpenFailure {
    Stale(String),
    Fatal(SourceError),
}

impl<S> SourceAdapter<S> {
    pub fn new(
        resolver: Arc<dyn TrackResolver>,
        decoder: Arc<dyn AudioDecoder<Source = S>>,
        open_timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            decoder,
            open_timeout,
        }
    }

    pub async fn open(&self, track: &Track) -> Result<OpenedSource<S>, SourceError> {
        if let Some(stream_url) = track.stream_url() {
            match self.open_stream(stream_url).await {
                Ok(source) => {
                    return Ok(OpenedSource {
                        source,
                        refreshed: None,
                    })
                }
                Err(OpenFailure::Stale(reason)) => {
                    debug!("🔄 URL de stream caducada para {}: {}", track.title(), reason);
                }
                Err(OpenFailure::Fatal(e)) => return Err(e),
            }
        }

        let refreshed = self.refresh(track).await?;
        let stream_url = refreshed.stream_url().ok_or(SourceError::NoStreamUrl)?;

        match self.open_stream(stream_url).await {
            Ok(source) => Ok(OpenedSource {
                source,
                refreshed: Some(refreshed),
            }),
            Err(OpenFailure::Stale(reason)) => Err(SourceError::Decoder(reason)),
            Err(OpenFailure::Fatal(e)) => Err(e),
        }
    }

    async fn refresh(&self, track: &Track) -> Result<Track, SourceError> {
        info!("🔄 Re-resolviendo stream de: {}", track.title());
        let fresh = self.resolver.resolve(track.original_url()).await?;
        let stream_url = fresh.stream_url().ok_or(SourceError::NoStreamUrl)?;
        Ok(track.clone().with_stream_url(stream_url))
    }

    async fn open_stream(&self, stream_url: &str) -> Result<S, OpenFailure> {
        match tokio::time::timeout(self.open_timeout, self.decoder.open(stream_url)).await {
            Err(_) => Err(OpenFailure::Fatal(SourceError::Timeout)),
            Ok(Ok(source)) => Ok(source),
            Ok(Err(DecoderError::Stale(reason))) => Err(OpenFailure::Stale(reason)),
            Ok(Err(DecoderError::Failed(reason))) => Err(OpenFailure::Fatal(SourceError::Decoder(reason))),
        }
    }
}

/// Decoder HTTP sobre songbird (symphonia decodifica el contenedor)
pub struct HttpDecoder {
    client: reqwest::Client,
    probe_timeout: Duration,
}

impl HttpDecoder {
    pub fn new(probe_timeout: Duration) -> anyhow::Result<Self> {
        // Sin timeout global: el cuerpo se transmite durante toda la canción
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            probe_timeout,
        })
    }
}

#[async_trait]
impl AudioDecoder for HttpDecoder {
    type Source = Input;

    async fn open(&self, stream_url: &str) -> Result<Input, DecoderError> {
        let response = self
            .client
            .get(stream_url)
            .header(reqwest::header::RANGE, "bytes=0-0")
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| DecoderError::Failed(e.to_string()))?;

        let status = response.status();
        if matches!(status.as_u16(), 403 | 404 | 410) {
            return Err(DecoderError::Stale(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(DecoderError::Failed(format!("HTTP {}", status)));
        }

        let request = HttpRequest::new(self.client.clone(), stream_url.to_string());
        Ok(Input::from(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::testing::{track, ScriptedDecoder, StaticResolver},
        error::{ResolutionReason, ResolveError},
    };
    use pretty_assertions::assert_eq;

    fn adapter(resolver: StaticResolver, decoder: Arc<ScriptedDecoder>) -> SourceAdapter<String> {
        SourceAdapter::new(Arc::new(resolver), decoder, Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_opens_stream_url_directly() {
        let decoder = ScriptedDecoder::new();
        let adapter = adapter(StaticResolver::new(), decoder.clone());

        let opened = adapter.open(&track("a")).await.unwrap();
        assert_eq!(opened.source, "stream://a");
        assert!(opened.refreshed.is_none());
        assert_eq!(decoder.opened(), vec!["stream://a".to_string()]);
    }

    #[tokio::test]
    async fn test_stale_url_is_refreshed_once() {
        let decoder = ScriptedDecoder::new();
        decoder.mark_stale("stream://a");
        let resolver = StaticResolver::new();
        resolver.insert(track("a").with_stream_url("stream://a-fresh"));

        let opened = adapter(resolver, decoder.clone()).open(&track("a")).await.unwrap();
        assert_eq!(opened.source, "stream://a-fresh");
        assert_eq!(
            opened.refreshed.as_ref().and_then(|t| t.stream_url()),
            Some("stream://a-fresh")
        );
        assert_eq!(decoder.opened().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_stream_url_triggers_refresh() {
        let decoder = ScriptedDecoder::new();
        let resolver = StaticResolver::new();
        resolver.insert(track("a").with_stream_url("stream://a-fresh"));
        let bare = Track::new("a", "https://youtu.be/a", "https://youtu.be/a");

        let opened = adapter(resolver, decoder).open(&bare).await.unwrap();
        assert_eq!(opened.source, "stream://a-fresh");
    }

    #[tokio::test]
    async fn test_still_stale_after_refresh_fails() {
        let decoder = ScriptedDecoder::new();
        decoder.mark_stale("stream://a");
        let resolver = StaticResolver::new();
        resolver.insert(track("a"));

        let err = adapter(resolver, decoder.clone()).open(&track("a")).await.err().unwrap();
        assert!(matches!(err, SourceError::Decoder(_)));
        assert_eq!(decoder.opened().len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_failure_is_reported() {
        let decoder = ScriptedDecoder::new();
        decoder.mark_stale("stream://a");

        let err = adapter(StaticResolver::new(), decoder).open(&track("a")).await.err().unwrap();
        assert_eq!(
            err,
            SourceError::Refresh(ResolveError::resolution(ResolutionReason::NotFound, "https://youtu.be/a"))
        );
    }

    #[tokio::test]
    async fn test_decoder_failure_does_not_refresh() {
        let decoder = ScriptedDecoder::new();
        decoder.mark_broken("stream://a");

        let err = adapter(StaticResolver::new(), decoder.clone()).open(&track("a")).await.err().unwrap();
        assert!(matches!(err, SourceError::Decoder(_)));
        assert_eq!(decoder.opened().len(), 1);
    }

    #[tokio::test]
    async fn test_open_timeout() {
        let decoder = ScriptedDecoder::new();
        decoder.delay("stream://a", Duration::from_secs(5));

        let err = adapter(StaticResolver::new(), decoder).open(&track("a")).await.err().unwrap();
        assert_eq!(err, SourceError::Timeout);
    }
}
