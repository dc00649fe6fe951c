//! Configuration module for Flowgate.
//!
//! Provides typed configuration structs that map to the YAML configuration
//! file, with loading, validation and defaults. Durations are written as
//! human-readable strings (`"500ms"`, `"10s"`, `"1m30s"`) and parsed by the
//! [`Duration`] newtype.

use std::fmt;
use std::path::Path;
use std::time::Duration as StdDuration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// Duration newtype
// ---------------------------------------------------------------------------

/// A wall-clock duration configured as a string with unit suffixes.
///
/// Accepts concatenated `<integer><unit>` segments with units `ms`, `s`,
/// `m` and `h`, e.g. `"250ms"`, `"10s"` or `"1m30s"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Duration(StdDuration);

impl Duration {
    pub const fn from_secs(secs: u64) -> Self {
        Self(StdDuration::from_secs(secs))
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self(StdDuration::from_millis(millis))
    }

    /// The underlying `std::time::Duration`.
    pub fn as_std(&self) -> StdDuration {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl From<Duration> for StdDuration {
    fn from(d: Duration) -> Self {
        d.0
    }
}

/// Parses `"1m30s"`-style duration strings into a `std::time::Duration`.
pub fn parse_duration(input: &str) -> Result<StdDuration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total_ms: u64 = 0;
    let mut rest = s;
    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("missing unit in duration '{input}'"))?;
        if digits_end == 0 {
            return Err(format!("invalid duration '{input}'"));
        }
        let value: u64 = rest[..digits_end]
            .parse()
            .map_err(|_| format!("invalid number in duration '{input}'"))?;

        let unit_end = rest[digits_end..]
            .find(|c: char| c.is_ascii_digit())
            .map(|i| digits_end + i)
            .unwrap_or(rest.len());
        let factor_ms: u64 = match &rest[digits_end..unit_end] {
            "ms" => 1,
            "s" => 1_000,
            "m" => 60_000,
            "h" => 3_600_000,
            other => return Err(format!("unknown duration unit '{other}' in '{input}'")),
        };

        total_ms = total_ms
            .checked_add(value.saturating_mul(factor_ms))
            .ok_or_else(|| format!("duration '{input}' overflows"))?;
        rest = &rest[unit_end..];
    }

    Ok(StdDuration::from_millis(total_ms))
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = self.0.as_millis();
        if ms % 1_000 == 0 {
            write!(f, "{}s", ms / 1_000)
        } else {
            write!(f, "{ms}ms")
        }
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_duration(&raw)
            .map(Duration)
            .map_err(serde::de::Error::custom)
    }
}

impl Serialize for Duration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for Flowgate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub proxy: ProxyConfig,
    pub bucket: BucketConfig,
    pub balancer: BalancerConfig,
    pub db: DbConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
}

/// Listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// How long graceful shutdown waits for in-flight requests to drain.
    #[serde(rename = "shutdownTimeout")]
    pub shutdown_timeout: Duration,
}

/// Token bucket defaults for auto-created buckets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketConfig {
    /// Capacity (and initial fill) of buckets created on first admission.
    pub capacity: i64,
    pub refill: RefillConfig,
}

/// Token regeneration rate: `amount` tokens every `interval`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefillConfig {
    pub interval: Duration,
    pub amount: i64,
}

/// Backend selection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Strategy name; must match a registered strategy factory.
    pub strategy: String,
    /// Ordered list of backend base URLs.
    pub backends: Vec<String>,
}

/// Health probing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckerConfig {
    /// Period between probe rounds.
    pub interval: Duration,
    /// Per-probe timeout, applied to both the HTTP GET and the TCP fallback.
    #[serde(rename = "healthCheckTimeout")]
    pub health_check_timeout: Duration,
}

/// Origin transport tuning.
///
/// `maxIdleConns` and `TLSHandshakeTimeout` are accepted for compatibility
/// with deployments that set them, but the reqwest connection pool only
/// exposes per-host idle limits and folds the TLS handshake into the
/// connect phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    #[serde(rename = "healthChecker")]
    pub health_checker: HealthCheckerConfig,
    /// Connect timeout for origin connections.
    pub timeout: Duration,
    #[serde(rename = "keepAlive")]
    pub keep_alive: Duration,
    #[serde(rename = "idleConnTimeout")]
    pub idle_conn_timeout: Duration,
    #[serde(rename = "maxIdleConns")]
    pub max_idle_conns: u32,
    #[serde(rename = "maxIdleConnsPerHost")]
    pub max_idle_conns_per_host: u32,
    #[serde(rename = "TLSHandshakeTimeout")]
    pub tls_handshake_timeout: Duration,
}

/// Store connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Path to the SQLite database file.
    pub path: String,
    #[serde(rename = "maxConns")]
    pub max_conns: u32,
    #[serde(rename = "busyTimeout")]
    pub busy_timeout: Duration,
}

/// Administrative API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Default `limit` for the bucket list endpoint.
    #[serde(rename = "defaultLimit")]
    pub default_limit: i64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn` or `error`.
    pub level: String,
}

// ---------------------------------------------------------------------------
// Loading and defaults
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.display().to_string(), e))?;
        let config: Config = serde_yaml::from_str(&content).map_err(ConfigError::Parse)?;
        Ok(config)
    }
}

/// Errors from loading the configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config file {0}: {1}")]
    Io(String, #[source] std::io::Error),
    #[error("could not decode config file: {0}")]
    Parse(#[source] serde_yaml::Error),
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            refill: RefillConfig::default(),
        }
    }
}

impl Default for RefillConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            amount: 1,
        }
    }
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            strategy: "round_robin".to_string(),
            backends: Vec::new(),
        }
    }
}

impl Default for HealthCheckerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            health_check_timeout: Duration::from_secs(2),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            health_checker: HealthCheckerConfig::default(),
            timeout: Duration::from_secs(5),
            keep_alive: Duration::from_secs(30),
            idle_conn_timeout: Duration::from_secs(90),
            max_idle_conns: 100,
            max_idle_conns_per_host: 10,
            tls_handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: "flowgate.db".to_string(),
            max_conns: 5,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { default_limit: 50 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"bucket.capacity"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid. The strategy name
    /// is not checked here; the strategy factory rejects unknown names at
    /// startup.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- server ---
        if self.server.host.is_empty() {
            errors.push(ValidationError {
                field: "server.host".into(),
                message: "must not be empty".into(),
            });
        }
        if self.server.shutdown_timeout.is_zero() {
            errors.push(ValidationError {
                field: "server.shutdownTimeout".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- bucket ---
        if self.bucket.capacity <= 0 {
            errors.push(ValidationError {
                field: "bucket.capacity".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.bucket.refill.interval.is_zero() {
            errors.push(ValidationError {
                field: "bucket.refill.interval".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.bucket.refill.amount <= 0 {
            errors.push(ValidationError {
                field: "bucket.refill.amount".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- balancer ---
        if self.balancer.strategy.is_empty() {
            errors.push(ValidationError {
                field: "balancer.strategy".into(),
                message: "must not be empty".into(),
            });
        }
        for (i, backend) in self.balancer.backends.iter().enumerate() {
            let parsed = url::Url::parse(backend);
            let ok = matches!(
                &parsed,
                Ok(u) if (u.scheme() == "http" || u.scheme() == "https") && u.host_str().is_some()
            );
            if !ok {
                errors.push(ValidationError {
                    field: format!("balancer.backends[{i}]"),
                    message: format!("'{backend}' is not a valid http(s) URL"),
                });
            }
        }

        // --- proxy ---
        if self.proxy.health_checker.interval.is_zero() {
            errors.push(ValidationError {
                field: "proxy.healthChecker.interval".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.proxy.health_checker.health_check_timeout.is_zero() {
            errors.push(ValidationError {
                field: "proxy.healthChecker.healthCheckTimeout".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.proxy.max_idle_conns_per_host == 0 {
            errors.push(ValidationError {
                field: "proxy.maxIdleConnsPerHost".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- db ---
        if self.db.path.is_empty() {
            errors.push(ValidationError {
                field: "db.path".into(),
                message: "must not be empty".into(),
            });
        }
        if self.db.max_conns == 0 {
            errors.push(ValidationError {
                field: "db.maxConns".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- api ---
        if self.api.default_limit <= 0 {
            errors.push(ValidationError {
                field: "api.defaultLimit".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
