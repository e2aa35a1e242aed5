// src/config.rs

//! Manages gateway configuration: loading, IMAP URL resolution, and validation.

use crate::imap::TransportMode;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use tracing::warn;
use url::Url;

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,
    /// The port for the Prometheus metrics server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    9178
}

/// The resolved upstream IMAP endpoint, derived from the `imap_url` setting.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub mode: TransportMode,
}

/// Tunables for the session pool.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SessionConfig {
    /// A session untouched for this long becomes eligible for reaping.
    #[serde(with = "humantime_serde", default = "default_idle_timeout")]
    pub idle_timeout: Duration,
    /// How often the reaper scans the pool.
    #[serde(with = "humantime_serde", default = "default_reap_interval")]
    pub reap_interval: Duration,
    /// A connection idle for longer than this is probed with NOOP before reuse.
    #[serde(with = "humantime_serde", default = "default_probe_after")]
    pub probe_after: Duration,
    /// Upper bound on waiting for another request to release the same session.
    #[serde(with = "humantime_serde", default = "default_acquire_timeout")]
    pub acquire_timeout: Duration,
    /// Upper bound on the dial plus login round trip to the mail server.
    #[serde(with = "humantime_serde", default = "default_dial_timeout")]
    pub dial_timeout: Duration,
    /// Hard cap on concurrently pooled sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}
fn default_reap_interval() -> Duration {
    Duration::from_secs(60)
}
fn default_probe_after() -> Duration {
    Duration::from_secs(60)
}
fn default_acquire_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_dial_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_max_sessions() -> usize {
    4096
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: default_idle_timeout(),
            reap_interval: default_reap_interval(),
            probe_after: default_probe_after(),
            acquire_timeout: default_acquire_timeout(),
            dial_timeout: default_dial_timeout(),
            max_sessions: default_max_sessions(),
        }
    }
}

/// A raw representation of the config file before validation and resolution.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_log_level")]
    log_level: String,
    /// The upstream mail server, e.g. `imaps://mail.example.org`.
    imap_url: Url,
    #[serde(default)]
    session: SessionConfig,
    #[serde(default)]
    metrics: MetricsConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Represents the final, validated, and resolved gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub imap: ImapConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            imap: ImapConfig {
                host: "127.0.0.1".to_string(),
                port: 143,
                mode: TransportMode::Plain,
            },
            session: SessionConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml(&contents)
    }

    /// Parses a TOML document into a validated `Config`.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let raw_config: RawConfig =
            toml::from_str(contents).context("Failed to parse TOML configuration")?;

        let config = Config {
            host: raw_config.host,
            port: raw_config.port,
            log_level: raw_config.log_level,
            imap: resolve_imap_url(&raw_config.imap_url)?,
            session: raw_config.session,
            metrics: raw_config.metrics,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the resolved configuration to ensure logical consistency.
    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.imap.port == 0 {
            return Err(anyhow!("imap port cannot be 0"));
        }

        let s = &self.session;
        if s.idle_timeout.is_zero() {
            return Err(anyhow!("session.idle_timeout cannot be 0"));
        }
        if s.reap_interval.is_zero() {
            return Err(anyhow!("session.reap_interval cannot be 0"));
        }
        if s.acquire_timeout.is_zero() {
            return Err(anyhow!("session.acquire_timeout cannot be 0"));
        }
        if s.dial_timeout.is_zero() {
            return Err(anyhow!("session.dial_timeout cannot be 0"));
        }
        if s.max_sessions == 0 {
            return Err(anyhow!("session.max_sessions cannot be 0"));
        }
        if s.idle_timeout < s.reap_interval {
            warn!(
                "session.idle_timeout ({:?}) is shorter than session.reap_interval ({:?}); \
                sessions may outlive their timeout by up to one reap interval.",
                s.idle_timeout, s.reap_interval
            );
        }

        if self.metrics.enabled {
            if self.metrics.port == 0 {
                return Err(anyhow!("metrics.port cannot be 0"));
            }
            if self.metrics.port == self.port {
                return Err(anyhow!(
                    "metrics.port cannot be the same as the main server port"
                ));
            }
        }
        Ok(())
    }
}

/// Resolves an IMAP URL into a concrete endpoint and transport mode.
///
/// Recognized schemes: `imap` (cleartext, port 143), `imaps` (TLS, port 993),
/// and `imaps+insecure` (TLS without certificate verification, port 993).
fn resolve_imap_url(url: &Url) -> Result<ImapConfig> {
    let (mode, default_port) = match url.scheme() {
        "imap" => (TransportMode::Plain, 143),
        "imaps" => (TransportMode::Tls, 993),
        "imaps+insecure" => (TransportMode::TlsInsecure, 993),
        other => return Err(anyhow!("unrecognized IMAP URL scheme: {other}")),
    };

    let host = url
        .host_str()
        .ok_or_else(|| anyhow!("IMAP URL '{url}' has no host"))?
        .to_string();
    let port = url.port().unwrap_or(default_port);

    Ok(ImapConfig { host, port, mode })
}
