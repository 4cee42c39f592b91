//! Configuration loading and parsing.
//!
//! Defines the server config schema and resolves defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

const DEFAULT_SHUFFLE_MINUTES: u64 = 60;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_COMMAND_BUFFER: usize = 32;
const DEFAULT_REQUEST_BUFFER: usize = 64;
const DEFAULT_RESUME_MARGIN_SECS: u64 = 10;
const DEFAULT_LOOKUP_TIMEOUT_MS: u64 = 5000;
const DEFAULT_RETRY_ATTEMPTS: usize = 2;
const DEFAULT_RETRY_MIN_DELAY_MS: u64 = 100;
const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 1000;
const DEFAULT_POOL_SIZE: u32 = 4;

/// Top-level server configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct ServerConfig {
    /// Bind address (host:port).
    pub bind: Option<String>,
    /// Path to the catalog SQLite DB file.
    pub db_path: Option<String>,
    /// Shuffle scheduler settings.
    pub shuffle: Option<ShuffleConfig>,
    /// Playback session settings.
    pub session: Option<SessionConfig>,
    /// Catalog access settings.
    pub catalog: Option<CatalogConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ShuffleConfig {
    /// Budget used when a shuffle request omits one (default: 60).
    pub default_minutes: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionConfig {
    /// Inbound frame wait window in milliseconds (default: 1000).
    pub poll_interval_ms: Option<u64>,
    /// Outbound command channel capacity per session (default: 32).
    pub command_buffer: Option<usize>,
    /// Actor request channel capacity per session (default: 64).
    pub request_buffer: Option<usize>,
    /// Advance to the next queued video when the player reports ended/error (default: true).
    pub auto_advance_on_end: Option<bool>,
    /// Stored positions closer than this to the end are not resumed (default: 10).
    pub resume_margin_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CatalogConfig {
    /// Per-attempt timeout for catalog calls in milliseconds (default: 5000).
    pub lookup_timeout_ms: Option<u64>,
    /// Retries after the first failed attempt (default: 2).
    pub retry_attempts: Option<usize>,
    /// Minimum backoff delay in milliseconds (default: 100).
    pub retry_min_delay_ms: Option<u64>,
    /// Maximum backoff delay in milliseconds (default: 1000).
    pub retry_max_delay_ms: Option<u64>,
    /// SQLite connection pool size (default: 4).
    pub pool_size: Option<u32>,
}

/// Resolved session settings shared by every playback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub poll_interval: Duration,
    pub command_buffer: usize,
    pub request_buffer: usize,
    pub auto_advance_on_end: bool,
    pub resume_margin: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            command_buffer: DEFAULT_COMMAND_BUFFER,
            request_buffer: DEFAULT_REQUEST_BUFFER,
            auto_advance_on_end: true,
            resume_margin: Duration::from_secs(DEFAULT_RESUME_MARGIN_SECS),
        }
    }
}

/// Resolved catalog retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    pub timeout: Duration,
    pub attempts: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_LOOKUP_TIMEOUT_MS),
            attempts: DEFAULT_RETRY_ATTEMPTS,
            min_delay: Duration::from_millis(DEFAULT_RETRY_MIN_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_RETRY_MAX_DELAY_MS),
        }
    }
}

impl ServerConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<ServerConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }
}

/// Parse an optional bind address from config.
pub fn bind_from_config(cfg: &ServerConfig) -> Result<Option<SocketAddr>> {
    let Some(bind) = cfg.bind.as_deref() else {
        return Ok(None);
    };
    let addr = bind.parse().with_context(|| format!("parse bind {bind}"))?;
    Ok(Some(addr))
}

/// Extract the catalog DB path from config.
pub fn db_path_from_config(cfg: &ServerConfig) -> Result<PathBuf> {
    let path = cfg
        .db_path
        .as_deref()
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .ok_or_else(|| anyhow::anyhow!("db_path is required in config"))?;
    Ok(PathBuf::from(path))
}

/// Default shuffle budget, in minutes, clamped to at least one.
pub fn shuffle_minutes_from_config(cfg: &ServerConfig) -> u64 {
    cfg.shuffle
        .as_ref()
        .and_then(|s| s.default_minutes)
        .unwrap_or(DEFAULT_SHUFFLE_MINUTES)
        .max(1)
}

/// Resolve session settings, falling back to defaults for missing keys.
pub fn session_settings_from_config(cfg: &ServerConfig) -> SessionSettings {
    let defaults = SessionSettings::default();
    let Some(session) = cfg.session.as_ref() else {
        return defaults;
    };
    SessionSettings {
        poll_interval: session
            .poll_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval),
        command_buffer: session
            .command_buffer
            .unwrap_or(defaults.command_buffer)
            .max(1),
        request_buffer: session
            .request_buffer
            .unwrap_or(defaults.request_buffer)
            .max(1),
        auto_advance_on_end: session
            .auto_advance_on_end
            .unwrap_or(defaults.auto_advance_on_end),
        resume_margin: session
            .resume_margin_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.resume_margin),
    }
}

/// Resolve the catalog retry policy.
pub fn retry_settings_from_config(cfg: &ServerConfig) -> RetrySettings {
    let defaults = RetrySettings::default();
    let Some(catalog) = cfg.catalog.as_ref() else {
        return defaults;
    };
    let min_delay = catalog
        .retry_min_delay_ms
        .map(Duration::from_millis)
        .unwrap_or(defaults.min_delay);
    let max_delay = catalog
        .retry_max_delay_ms
        .map(Duration::from_millis)
        .unwrap_or(defaults.max_delay)
        .max(min_delay);
    RetrySettings {
        timeout: catalog
            .lookup_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.timeout),
        attempts: catalog.retry_attempts.unwrap_or(defaults.attempts),
        min_delay,
        max_delay,
    }
}

/// SQLite pool size for the catalog.
pub fn pool_size_from_config(cfg: &ServerConfig) -> u32 {
    cfg.catalog
        .as_ref()
        .and_then(|c| c.pool_size)
        .unwrap_or(DEFAULT_POOL_SIZE)
        .max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> ServerConfig {
        toml::from_str(raw).expect("parse config")
    }

    #[test]
    fn bind_from_config_parses_address() {
        let cfg = parse(r#"bind = "127.0.0.1:9000""#);
        let addr = bind_from_config(&cfg).unwrap();
        assert_eq!(addr, Some("127.0.0.1:9000".parse().unwrap()));

        let cfg = parse(r#"bind = "not-an-addr""#);
        assert!(bind_from_config(&cfg).is_err());

        assert_eq!(bind_from_config(&ServerConfig::default()).unwrap(), None);
    }

    #[test]
    fn db_path_is_required_and_trimmed() {
        let cfg = parse(r#"db_path = "  /var/lib/feed-hub/catalog.sqlite ""#);
        assert_eq!(
            db_path_from_config(&cfg).unwrap(),
            PathBuf::from("/var/lib/feed-hub/catalog.sqlite")
        );
        let cfg = parse(r#"db_path = "   ""#);
        assert!(db_path_from_config(&cfg).is_err());
    }

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(shuffle_minutes_from_config(&cfg), 60);
        assert_eq!(session_settings_from_config(&cfg), SessionSettings::default());
        assert_eq!(retry_settings_from_config(&cfg), RetrySettings::default());
        assert_eq!(pool_size_from_config(&cfg), 4);
        let session = SessionSettings::default();
        assert_eq!(session.poll_interval, Duration::from_secs(1));
        assert_eq!(session.resume_margin, Duration::from_secs(10));
        assert!(session.auto_advance_on_end);
    }

    #[test]
    fn sections_override_defaults() {
        let cfg = parse(
            r#"
            [shuffle]
            default_minutes = 90

            [session]
            poll_interval_ms = 250
            command_buffer = 0
            auto_advance_on_end = false

            [catalog]
            retry_attempts = 0
            retry_min_delay_ms = 500
            retry_max_delay_ms = 200
            pool_size = 8
            "#,
        );
        assert_eq!(shuffle_minutes_from_config(&cfg), 90);
        let session = session_settings_from_config(&cfg);
        assert_eq!(session.poll_interval, Duration::from_millis(250));
        assert_eq!(session.command_buffer, 1);
        assert_eq!(session.request_buffer, 64);
        assert!(!session.auto_advance_on_end);
        let retry = retry_settings_from_config(&cfg);
        assert_eq!(retry.attempts, 0);
        assert_eq!(retry.min_delay, Duration::from_millis(500));
        assert_eq!(retry.max_delay, Duration::from_millis(500));
        assert_eq!(pool_size_from_config(&cfg), 8);
    }

    #[test]
    fn load_reports_missing_file() {
        let path = std::env::temp_dir().join("feed-hub-missing-config.toml");
        let err = ServerConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("read config"));
    }
}
