//! Service configuration.

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{bail, Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use outbound_core::{RegistryEntry, StaticRegistry};
use outbound_delivery::{
    client::ClientConfig,
    retry::{BackoffStrategy, RetryPolicy},
    DeliveryConfig,
};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "config.toml";
const ENV_PREFIX: &str = "OUTBOUND_";

/// Complete service configuration with defaults, file, and environment
/// overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables prefixed `OUTBOUND_` (highest priority)
/// 2. Configuration file (`config.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// # Example
///
/// ```no_run
/// use outbound_api::Config;
///
/// let config = Config::load().expect("configuration loads");
/// println!("listening on {}:{}", config.host, config.port);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server
    /// Bind address.
    ///
    /// Environment variable: `OUTBOUND_HOST`
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port.
    ///
    /// Environment variable: `OUTBOUND_PORT`
    #[serde(default = "default_port")]
    pub port: u16,
    /// API request timeout in seconds.
    ///
    /// Environment variable: `OUTBOUND_REQUEST_TIMEOUT_SECONDS`
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    // Store
    /// Snapshot file for the delivery store. Records live only in memory
    /// when unset.
    ///
    /// Environment variable: `OUTBOUND_STORE_PATH`
    #[serde(default)]
    pub store_path: Option<PathBuf>,

    // Workers
    /// Number of delivery workers.
    ///
    /// Environment variable: `OUTBOUND_WORKER_COUNT`
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Records claimed per worker cycle.
    ///
    /// Environment variable: `OUTBOUND_BATCH_SIZE`
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Idle poll interval in seconds.
    ///
    /// Environment variable: `OUTBOUND_POLL_INTERVAL_SECONDS`
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Claim lease in seconds.
    ///
    /// Environment variable: `OUTBOUND_LEASE_SECONDS`
    #[serde(default = "default_lease")]
    pub lease_seconds: u64,
    /// Concurrent dispatches per record.
    ///
    /// Environment variable: `OUTBOUND_TARGET_CONCURRENCY`
    #[serde(default = "default_target_concurrency")]
    pub target_concurrency: usize,
    /// Time allowed for workers to drain on shutdown, in seconds.
    ///
    /// Environment variable: `OUTBOUND_SHUTDOWN_TIMEOUT_SECONDS`
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,

    // Retry
    /// Attempt budget for records without their own.
    ///
    /// Environment variable: `OUTBOUND_MAX_ATTEMPTS`
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay after the first failed attempt, in milliseconds.
    ///
    /// Environment variable: `OUTBOUND_RETRY_BASE_DELAY_MS`
    #[serde(default = "default_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Upper bound on any retry delay, in milliseconds.
    ///
    /// Environment variable: `OUTBOUND_RETRY_MAX_DELAY_MS`
    #[serde(default = "default_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Jitter fraction (0.0 to 1.0).
    ///
    /// Environment variable: `OUTBOUND_RETRY_JITTER_FACTOR`
    #[serde(default = "default_jitter_factor")]
    pub retry_jitter_factor: f64,
    /// Growth of delays between attempts.
    ///
    /// Environment variable: `OUTBOUND_RETRY_STRATEGY`
    #[serde(default = "default_strategy")]
    pub retry_strategy: BackoffStrategy,

    // Client
    /// Per-attempt HTTP timeout in seconds.
    ///
    /// Environment variable: `OUTBOUND_DELIVERY_TIMEOUT_SECONDS`
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_seconds: u64,
    /// Verify target TLS certificates.
    ///
    /// Environment variable: `OUTBOUND_VERIFY_TLS`
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,

    // Registry
    /// Clients addressable by id, from `[[registry]]` tables.
    #[serde(default)]
    pub registry: Vec<RegistryEntry>,

    // Logging
    /// Log filter used when `RUST_LOG` is unset.
    ///
    /// Environment variable: `OUTBOUND_LOG`
    #[serde(default = "default_log_filter")]
    pub log: String,
}

impl Config {
    /// Loads configuration from defaults, `config.toml` and `OUTBOUND_*`
    /// environment variables.
    ///
    /// # Errors
    ///
    /// Fails if a source cannot be parsed or the result does not validate.
    pub fn load() -> Result<Self> {
        Self::load_from(CONFIG_FILE)
    }

    /// Loads configuration using `path` as the file layer.
    ///
    /// A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Fails if a source cannot be parsed or the result does not validate.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self> {
        let config: Self = Self::figment(path.into())
            .extract()
            .context("failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn figment(path: PathBuf) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    /// Rejects values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            bail!("worker_count must be at least 1");
        }
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if self.target_concurrency == 0 {
            bail!("target_concurrency must be at least 1");
        }
        if self.max_attempts == 0 {
            bail!("max_attempts must be at least 1");
        }
        if self.poll_interval_seconds == 0 || self.lease_seconds == 0 {
            bail!("poll_interval_seconds and lease_seconds must be positive");
        }
        if self.delivery_timeout_seconds == 0 {
            bail!("delivery_timeout_seconds must be positive");
        }
        if self.delivery_timeout_seconds >= self.lease_seconds {
            bail!(
                "lease_seconds ({}) must exceed delivery_timeout_seconds ({})",
                self.lease_seconds,
                self.delivery_timeout_seconds
            );
        }
        if !(0.0..=1.0).contains(&self.retry_jitter_factor) {
            bail!("retry_jitter_factor must be between 0.0 and 1.0");
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            bail!("retry_base_delay_ms must not exceed retry_max_delay_ms");
        }
        self.parse_server_addr()?;
        Ok(())
    }

    /// Engine configuration.
    pub fn to_delivery_config(&self) -> DeliveryConfig {
        DeliveryConfig {
            worker_count: self.worker_count,
            batch_size: self.batch_size,
            poll_interval: Duration::from_secs(self.poll_interval_seconds),
            lease_duration: Duration::from_secs(self.lease_seconds),
            error_backoff: Duration::from_secs(5),
            target_concurrency: self.target_concurrency,
            client_config: self.to_client_config(),
            default_retry_policy: self.to_retry_policy(),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_seconds),
        }
    }

    /// HTTP client configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_secs(self.delivery_timeout_seconds),
            verify_tls: self.verify_tls,
            ..ClientConfig::default()
        }
    }

    /// Retry policy.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            jitter_factor: self.retry_jitter_factor,
            backoff_strategy: self.retry_strategy,
        }
    }

    /// Client registry seeded from `[[registry]]` entries.
    ///
    /// # Errors
    ///
    /// Fails if an entry has an unusable URL.
    pub fn to_registry(&self) -> Result<StaticRegistry> {
        StaticRegistry::from_entries(self.registry.iter().cloned())
            .context("invalid registry entry")
    }

    /// Socket address from host and port.
    ///
    /// # Errors
    ///
    /// Fails if the host is not an IP address.
    pub fn parse_server_addr(&self) -> Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port);
        SocketAddr::from_str(&addr).with_context(|| format!("invalid server address {addr}"))
    }

    /// API request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
            store_path: None,
            worker_count: default_worker_count(),
            batch_size: default_batch_size(),
            poll_interval_seconds: default_poll_interval(),
            lease_seconds: default_lease(),
            target_concurrency: default_target_concurrency(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_base_delay_ms(),
            retry_max_delay_ms: default_max_delay_ms(),
            retry_jitter_factor: default_jitter_factor(),
            retry_strategy: default_strategy(),
            delivery_timeout_seconds: default_delivery_timeout(),
            verify_tls: default_verify_tls(),
            registry: Vec::new(),
            log: default_log_filter(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

fn default_worker_count() -> usize {
    outbound_delivery::DEFAULT_WORKER_COUNT
}

fn default_batch_size() -> usize {
    outbound_delivery::DEFAULT_BATCH_SIZE
}

fn default_poll_interval() -> u64 {
    outbound_delivery::DEFAULT_POLL_INTERVAL_SECONDS
}

fn default_lease() -> u64 {
    outbound_delivery::DEFAULT_LEASE_SECONDS
}

fn default_target_concurrency() -> usize {
    outbound_delivery::DEFAULT_TARGET_CONCURRENCY
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    outbound_delivery::DEFAULT_MAX_ATTEMPTS
}

fn default_base_delay_ms() -> u64 {
    60_000
}

fn default_max_delay_ms() -> u64 {
    3_600_000
}

fn default_jitter_factor() -> f64 {
    0.1
}

fn default_strategy() -> BackoffStrategy {
    BackoffStrategy::Exponential
}

fn default_delivery_timeout() -> u64 {
    outbound_delivery::DEFAULT_TIMEOUT_SECONDS
}

fn default_verify_tls() -> bool {
    true
}

fn default_log_filter() -> String {
    "info,outbound=debug".to_string()
}
