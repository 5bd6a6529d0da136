//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration files (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;

/// Main engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub instance: InstanceConfig,
    pub federation: FederationConfig,
    pub delivery: DeliveryConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public domain (e.g., "social.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl ServerConfig {
    /// Get the base URL for the instance
    ///
    /// # Returns
    /// Full URL like "https://social.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }
}

/// Local actor served by the binary
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceConfig {
    /// Handle used in /users/{handle} and acct: addresses
    pub actor_handle: String,
    /// Display name
    pub actor_name: String,
    /// PKCS#8 PEM file holding the actor's private key. Created on first
    /// start when missing; a fresh key is generated per run when unset.
    #[serde(default)]
    pub private_key_path: Option<String>,
}

/// Federation protocol settings
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// Remote actor cache TTL in seconds (default: 10800 = 3h)
    pub actor_cache_ttl_secs: u64,
    /// Accepted Date header skew in seconds (default: 300)
    pub max_clock_skew_secs: u64,
    /// Inbox dedupe record retention in seconds (default: 604800 = 7d)
    pub inbox_retention_secs: u64,
    /// Collapse recipients onto their shared inbox
    pub use_shared_inbox: bool,
    /// Permit fetches to loopback/private addresses (tests, local dev)
    pub allow_private_hosts: bool,
    /// User-Agent for outbound requests
    pub user_agent: String,
    /// Actor fetch timeout in seconds
    pub fetch_timeout_secs: u64,
    /// Largest remote document accepted, in bytes
    pub max_document_bytes: usize,
}

impl FederationConfig {
    pub fn actor_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.actor_cache_ttl_secs)
    }

    pub fn inbox_retention(&self) -> Duration {
        Duration::from_secs(self.inbox_retention_secs)
    }
}

/// Default cap on fetched documents (1 MiB)
pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 1024 * 1024;

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            actor_cache_ttl_secs: 10_800,
            max_clock_skew_secs: 300,
            inbox_retention_secs: 604_800,
            use_shared_inbox: true,
            allow_private_hosts: false,
            user_agent: "fedikit/0.1.0".to_string(),
            fetch_timeout_secs: 10,
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
        }
    }
}

/// Outbound delivery settings
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Global number of concurrent delivery attempts
    pub workers: usize,
    /// Concurrent requests allowed per destination host
    pub max_concurrent_per_host: usize,
    /// Attempts before a job is abandoned
    pub max_attempts: u32,
    /// Delay before the first retry, in seconds
    pub initial_backoff_secs: f64,
    /// Upper bound on the retry delay, in seconds
    pub max_backoff_secs: f64,
    pub backoff_multiplier: f64,
    /// Fraction of the delay randomly added or removed (0.0 - 1.0)
    pub jitter_ratio: f64,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
    /// How long finished jobs stay queryable, in seconds (default: 86400 = 1d)
    pub job_retention_secs: u64,
}

impl DeliveryConfig {
    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            workers: 16,
            max_concurrent_per_host: 2,
            max_attempts: 8,
            initial_backoff_secs: 60.0,
            max_backoff_secs: 21_600.0,
            backoff_multiplier: 2.0,
            jitter_ratio: 0.2,
            request_timeout_secs: 30,
            job_retention_secs: 86_400,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (FEDIKIT__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.domain", "localhost")?
            .set_default("server.protocol", "http")?
            .set_default("instance.actor_handle", "relay")?
            .set_default("instance.actor_name", "fedikit relay")?
            .set_default("federation.actor_cache_ttl_secs", 10_800)?
            .set_default("federation.max_clock_skew_secs", 300)?
            .set_default("federation.inbox_retention_secs", 604_800)?
            .set_default("federation.use_shared_inbox", true)?
            .set_default("federation.allow_private_hosts", false)?
            .set_default("federation.user_agent", "fedikit/0.1.0")?
            .set_default("federation.fetch_timeout_secs", 10)?
            .set_default("federation.max_document_bytes", 1_048_576)?
            .set_default("delivery.workers", 16)?
            .set_default("delivery.max_concurrent_per_host", 2)?
            .set_default("delivery.max_attempts", 8)?
            .set_default("delivery.initial_backoff_secs", 60.0)?
            .set_default("delivery.max_backoff_secs", 21_600.0)?
            .set_default("delivery.backoff_multiplier", 2.0)?
            .set_default("delivery.jitter_ratio", 0.2)?
            .set_default("delivery.request_timeout_secs", 30)?
            .set_default("delivery.job_retention_secs", 86_400)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("FEDIKIT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn validate(&self) -> Result<(), crate::error::AppError> {
        use crate::error::AppError;

        let delivery = &self.delivery;
        if delivery.workers == 0 {
            return Err(AppError::Config(
                "delivery.workers must be greater than 0".to_string(),
            ));
        }
        if delivery.max_concurrent_per_host == 0 {
            return Err(AppError::Config(
                "delivery.max_concurrent_per_host must be greater than 0".to_string(),
            ));
        }
        if delivery.max_attempts == 0 {
            return Err(AppError::Config(
                "delivery.max_attempts must be greater than 0".to_string(),
            ));
        }
        if delivery.backoff_multiplier < 1.0 {
            return Err(AppError::Config(
                "delivery.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&delivery.jitter_ratio) {
            return Err(AppError::Config(
                "delivery.jitter_ratio must be between 0.0 and 1.0".to_string(),
            ));
        }
        if delivery.initial_backoff_secs < 0.0 || delivery.max_backoff_secs < delivery.initial_backoff_secs
        {
            return Err(AppError::Config(
                "delivery.max_backoff_secs must be >= delivery.initial_backoff_secs >= 0"
                    .to_string(),
            ));
        }

        if self.federation.max_document_bytes == 0 {
            return Err(AppError::Config(
                "federation.max_document_bytes must be greater than 0".to_string(),
            ));
        }

        if is_local_server_domain(&self.server.domain) {
            if !self.server.protocol.eq_ignore_ascii_case("https") {
                tracing::warn!(
                    domain = %self.server.domain,
                    "Serving federation endpoints over plain http for local development"
                );
            }
        } else if !self.server.protocol.eq_ignore_ascii_case("https") {
            return Err(AppError::Config(
                "server.protocol must be https for non-local server domains".to_string(),
            ));
        }

        Ok(())
    }
}

fn normalized_server_host(domain: &str) -> String {
    let trimmed = domain.trim();
    let parsed_host = url::Url::parse(&format!("http://{trimmed}"))
        .ok()
        .and_then(|url| url.host_str().map(|host| host.to_string()));
    let host = parsed_host.unwrap_or_else(|| trimmed.to_string());
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .trim_end_matches('.')
        .to_ascii_lowercase()
}

fn is_local_server_domain(domain: &str) -> bool {
    let host = normalized_server_host(domain);
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return ip.is_loopback() || ip.is_unspecified();
    }

    false
}
