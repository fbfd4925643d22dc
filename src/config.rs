use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Dominios permitidos por defecto
const DEFAULT_ALLOWED_DOMAINS: &[&str] = &[
    "youtube.com",
    "youtu.be",
    "soundcloud.com",
    "nicovideo.jp",
    "x.com",
    "mixcloud.com",
    "twitch.tv",
];

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub guild_id: Option<u64>, // Para comandos de desarrollo
    pub bot_nickname: String,
    pub presence_text: String,

    // Resolución
    pub allowed_domains: Vec<String>,
    pub allow_list_cache_size: usize,
    pub ytdlp_path: String,
    pub resolve_timeout_secs: u64,
    pub resolve_attempts: u32,
    pub ytdlp_socket_timeout: u64,
    pub ytdlp_retries: u32,

    // Reproducción
    pub source_open_timeout_secs: u64,
    pub worker_backoff_secs: u64,
    pub default_volume: f32,

    // Cola
    pub max_queue_size: usize,
    pub queue_preview_size: usize,

    // Límites
    pub command_cooldown_secs: u64,
    pub loop_cooldown_secs: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),
            bot_nickname: std::env::var("BOT_NICKNAME").unwrap_or(defaults.bot_nickname),
            presence_text: std::env::var("PRESENCE_TEXT").unwrap_or(defaults.presence_text),

            // Resolución
            allowed_domains: match std::env::var("ALLOWED_DOMAINS") {
                Ok(val) if !val.trim().is_empty() => parse_domain_list(&val),
                _ => defaults.allowed_domains,
            },
            allow_list_cache_size: env_or("ALLOW_LIST_CACHE_SIZE", "512")?,
            ytdlp_path: std::env::var("YTDLP_PATH").unwrap_or(defaults.ytdlp_path),
            resolve_timeout_secs: env_or("RESOLVE_TIMEOUT_SECS", "45")?,
            resolve_attempts: env_or("RESOLVE_ATTEMPTS", "2")?,
            ytdlp_socket_timeout: env_or("YTDLP_SOCKET_TIMEOUT", "15")?,
            ytdlp_retries: env_or("YTDLP_RETRIES", "10")?,

            // Reproducción
            source_open_timeout_secs: env_or("SOURCE_OPEN_TIMEOUT_SECS", "20")?,
            worker_backoff_secs: env_or("WORKER_BACKOFF_SECS", "5")?,
            default_volume: env_or("DEFAULT_VOLUME", "0.5")?,

            // Cola
            max_queue_size: env_or("MAX_QUEUE_SIZE", "1000")?,
            queue_preview_size: env_or("QUEUE_PREVIEW_SIZE", "10")?,

            // Límites
            command_cooldown_secs: env_or("COMMAND_COOLDOWN_SECS", "5")?,
            loop_cooldown_secs: env_or("LOOP_COOLDOWN_SECS", "15")?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - The allow-list must contain at least one domain
    /// - Timeouts and attempt counts must be greater than zero
    /// - Volume must be between 0.0 and 2.0
    /// - Queue and preview sizes must be greater than zero
    pub fn validate(&self) -> Result<()> {
        if self.allowed_domains.is_empty() {
            anyhow::bail!("At least one allowed domain is required");
        }

        if self.resolve_timeout_secs == 0 || self.source_open_timeout_secs == 0 {
            anyhow::bail!("Resolution and source timeouts must be greater than 0");
        }

        if self.resolve_attempts == 0 {
            anyhow::bail!("Resolve attempts must be greater than 0");
        }

        if self.default_volume < 0.0 || self.default_volume > 2.0 {
            anyhow::bail!("Default volume must be between 0.0 and 2.0, got: {}", self.default_volume);
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.queue_preview_size == 0 {
            anyhow::bail!("Queue preview size must be greater than 0");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The Discord token is never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: guild {} as '{}'\n  \
            Resolver: {} domains, {} via {}s x{} attempts\n  \
            Playback: {}% vol, {}s open timeout, {}s backoff\n  \
            Queue: {} max, {} preview\n  \
            Cooldowns: {}s commands, {}s loop",
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.bot_nickname,
            self.allowed_domains.len(),
            self.ytdlp_path,
            self.resolve_timeout_secs,
            self.resolve_attempts,
            (self.default_volume * 100.0) as u32,
            self.source_open_timeout_secs,
            self.worker_backoff_secs,
            self.max_queue_size,
            self.queue_preview_size,
            self.command_cooldown_secs,
            self.loop_cooldown_secs,
        )
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    pub fn source_open_timeout(&self) -> Duration {
        Duration::from_secs(self.source_open_timeout_secs)
    }

    pub fn worker_backoff(&self) -> Duration {
        Duration::from_secs(self.worker_backoff_secs)
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (el token no tiene default)
            discord_token: String::new(),
            guild_id: None,
            bot_nickname: "音葉".to_string(),
            presence_text: "まるまるもりもり".to_string(),

            // Resolución
            allowed_domains: DEFAULT_ALLOWED_DOMAINS.iter().map(|d| d.to_string()).collect(),
            allow_list_cache_size: 512,
            ytdlp_path: "yt-dlp".to_string(),
            resolve_timeout_secs: 45,
            resolve_attempts: 2,
            ytdlp_socket_timeout: 15,
            ytdlp_retries: 10,

            // Reproducción
            source_open_timeout_secs: 20,
            worker_backoff_secs: 5,
            default_volume: 0.5,

            // Cola
            max_queue_size: 1000,
            queue_preview_size: 10,

            // Límites
            command_cooldown_secs: 5,
            loop_cooldown_secs: 15,
        }
    }
}

fn env_or<T>(key: &str, default: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = std::env::var(key).unwrap_or_else(|_| default.to_string());
    Ok(raw.trim().parse()?)
}

fn parse_domain_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|d| d.trim().to_lowercase())
        .filter(|d| !d.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.allowed_domains.len(), 7);
        assert_eq!(config.worker_backoff(), Duration::from_secs(5));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.default_volume = 3.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.allowed_domains.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.resolve_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_domain_list() {
        assert_eq!(
            parse_domain_list(" YouTube.com, ,twitch.tv "),
            vec!["youtube.com".to_string(), "twitch.tv".to_string()]
        );
    }

    #[test]
    fn test_summary_hides_token() {
        let mut config = Config::default();
        config.discord_token = "secret-token".into();
        assert!(!config.summary().contains("secret-token"));
    }
}
