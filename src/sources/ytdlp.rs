use async_process::{Command, Stdio};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::{sync::LazyLock, time::Duration};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{ResolutionBackend, Track};
use crate::{
    config::Config,
    error::{ResolutionReason, ResolveError},
};

/// Mensajes de yt-dlp que indican que el recurso no existe
static NOT_FOUND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)HTTP Error 404|Video unavailable|not found|Unsupported URL|Private video")
        .expect("static regex")
});

/// Información extraída de yt-dlp (`--dump-json`)
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: Option<String>,
    webpage_url: Option<String>,
    uploader: Option<String>,
    thumbnail: Option<String>,
    duration: Option<f64>,
    view_count: Option<u64>,
    url: Option<String>,
}

impl YtDlpInfo {
    fn into_track(self, locator: &str) -> Result<Track, ResolveError> {
        if self.webpage_url.is_none() && self.url.is_none() {
            return Err(ResolveError::resolution(
                ResolutionReason::Malformed,
                "yt-dlp output has neither webpage_url nor url",
            ));
        }

        let title = self.title.unwrap_or_else(|| "Unknown Title".to_string());
        let page_url = self.webpage_url.unwrap_or_else(|| locator.to_string());
        let duration = match self.duration {
            Some(secs) if secs.is_finite() && secs > 0.0 => Duration::from_secs_f64(secs),
            _ => Duration::ZERO,
        };

        let mut track = Track::new(title, page_url, locator)
            .with_duration(duration)
            .with_view_count(self.view_count.unwrap_or(0));

        if let Some(uploader) = self.uploader {
            track = track.with_uploader(uploader);
        }
        if let Some(thumbnail) = self.thumbnail {
            track = track.with_thumbnail(thumbnail);
        }
        if let Some(stream_url) = self.url.filter(|u| !u.is_empty()) {
            track = track.with_stream_url(stream_url);
        }

        Ok(track)
    }
}

/// Backend de resolución que invoca `yt-dlp` como subproceso
pub struct YtDlpBackend {
    program: String,
    socket_timeout: u64,
    retries: u32,
    timeout: Duration,
    attempts: u32,
    // Limitar procesos concurrentes de yt-dlp
    rate_limiter: Semaphore,
}

impl YtDlpBackend {
    pub fn new(config: &Config) -> Self {
        Self {
            program: config.ytdlp_path.clone(),
            socket_timeout: config.ytdlp_socket_timeout,
            retries: config.ytdlp_retries,
            timeout: config.resolve_timeout(),
            attempts: config.resolve_attempts.max(1),
            rate_limiter: Semaphore::new(10),
        }
    }

    fn args(&self) -> Vec<String> {
        let retries = self.retries.to_string();
        vec![
            "--dump-json".into(),
            "--no-playlist".into(),
            "-f".into(),
            "bestaudio/best".into(),
            "--default-search".into(),
            "ytsearch".into(),
            "--playlist-items".into(),
            "1".into(),
            "--socket-timeout".into(),
            self.socket_timeout.to_string(),
            "--retries".into(),
            retries.clone(),
            "--fragment-retries".into(),
            retries,
            "--extractor-retries".into(),
            "5".into(),
            "--geo-bypass".into(),
            "--no-check-certificate".into(),
            "--quiet".into(),
            "--no-warnings".into(),
        ]
    }

    async fn run_once(&self, locator: &str) -> Result<Track, ResolveError> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|e| ResolveError::resolution(ResolutionReason::Backend, e.to_string()))?;

        let mut command = Command::new(&self.program);
        command
            .args(self.args())
            .arg("--")
            .arg(locator)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Err(_) => {
                return Err(ResolveError::resolution(
                    ResolutionReason::Timeout,
                    format!("yt-dlp did not answer within {:?}", self.timeout),
                ))
            }
            Ok(Err(e)) => {
                return Err(ResolveError::resolution(
                    ResolutionReason::Backend,
                    format!("Error al ejecutar yt-dlp: {}", e),
                ))
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_output(&stdout, locator)
    }
}

#[async_trait]
impl ResolutionBackend for YtDlpBackend {
    async fn lookup(&self, locator: &str) -> Result<Track, ResolveError> {
        let mut attempt = 1;
        loop {
            debug!("🔄 Intento {} de resolución con yt-dlp", attempt);
            match self.run_once(locator).await {
                Ok(track) => {
                    info!("✅ yt-dlp resolvió: {}", track.title());
                    return Ok(track);
                }
                Err(e) if attempt < self.attempts && is_retryable(&e) => {
                    warn!("⏰ yt-dlp falló en intento {}: {}", attempt, e);
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Verifica que yt-dlp esté disponible (usado por `--health-check`)
pub async fn verify_available(program: &str) -> anyhow::Result<String> {
    let output = Command::new(program).arg("--version").output().await?;
    if !output.status.success() {
        anyhow::bail!("yt-dlp no está disponible");
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn is_retryable(err: &ResolveError) -> bool {
    matches!(
        err.reason(),
        Some(ResolutionReason::Timeout) | Some(ResolutionReason::Backend)
    )
}

fn classify_failure(stderr: &str) -> ResolveError {
    let detail = stderr.lines().last().unwrap_or("yt-dlp failed").trim().to_string();
    if NOT_FOUND_RE.is_match(stderr) {
        ResolveError::resolution(ResolutionReason::NotFound, detail)
    } else {
        ResolveError::resolution(ResolutionReason::Backend, detail)
    }
}

fn parse_output(stdout: &str, locator: &str) -> Result<Track, ResolveError> {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| ResolveError::resolution(ResolutionReason::Malformed, "empty yt-dlp output"))?;

    let info: YtDlpInfo = serde_json::from_str(line).map_err(|e| {
        ResolveError::resolution(
            ResolutionReason::Malformed,
            format!("Error al parsear respuesta de yt-dlp: {}", e),
        )
    })?;

    info.into_track(locator)
}
