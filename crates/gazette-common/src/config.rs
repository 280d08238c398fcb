//! Configuration for Gazette

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Tracking secret shipped in the defaults; deployments are expected to override it.
pub const DEFAULT_TRACKING_SECRET: &str = "gazette-development-secret";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Outbound SMTP relay
    #[serde(default)]
    pub smtp: SmtpConfig,

    /// Batch sender pacing and thresholds
    #[serde(default)]
    pub sender: SenderConfig,

    /// Open/click tracking
    #[serde(default)]
    pub tracking: TrackingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Hostname
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            bind_address: default_bind_address(),
        }
    }
}

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database backend: "postgres" or "memory"
    #[serde(default = "default_db_backend")]
    pub backend: String,

    /// Database URL (for postgres)
    pub url: Option<String>,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_db_backend(),
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
        }
    }
}

fn default_db_backend() -> String {
    "postgres".to_string()
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    2
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API port
    #[serde(default = "default_api_port")]
    pub port: u16,

    /// Enable Swagger UI
    #[serde(default = "default_enable_swagger")]
    pub enable_swagger: bool,

    /// CORS allowed origins for the dashboard
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
            enable_swagger: default_enable_swagger(),
            cors_origins: Vec::new(),
        }
    }
}

fn default_api_port() -> u16 {
    8080
}

fn default_enable_swagger() -> bool {
    true
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Outbound SMTP relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// When false, messages are logged instead of relayed (dry run)
    #[serde(default = "default_smtp_enabled")]
    pub enabled: bool,

    /// Relay host
    #[serde(default = "default_smtp_host")]
    pub host: String,

    /// Relay port
    #[serde(default = "default_smtp_port")]
    pub port: u16,

    pub username: Option<String>,

    pub password: Option<String>,

    /// Implicit TLS (SMTPS)
    #[serde(default)]
    pub use_tls: bool,

    /// Upgrade with STARTTLS
    #[serde(default = "default_use_starttls")]
    pub use_starttls: bool,

    /// Per-attempt timeout in seconds
    #[serde(default = "default_smtp_timeout")]
    pub timeout_secs: u64,

    /// Default sender address when a campaign has none
    #[serde(default = "default_from_address")]
    pub from_address: String,

    /// Default sender display name
    pub from_name: Option<String>,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            enabled: default_smtp_enabled(),
            host: default_smtp_host(),
            port: default_smtp_port(),
            username: None,
            password: None,
            use_tls: false,
            use_starttls: default_use_starttls(),
            timeout_secs: default_smtp_timeout(),
            from_address: default_from_address(),
            from_name: None,
        }
    }
}

fn default_smtp_enabled() -> bool {
    true
}

fn default_smtp_host() -> String {
    "localhost".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_use_starttls() -> bool {
    true
}

fn default_smtp_timeout() -> u64 {
    30
}

fn default_from_address() -> String {
    "newsletter@localhost".to_string()
}

/// Batch sender configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderConfig {
    /// Maximum jobs claimed per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Delay between two individual sends, in milliseconds
    #[serde(default = "default_send_delay_ms")]
    pub send_delay_ms: u64,

    /// Failed / attempted ratio above which a finished campaign ends in ERROR
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: f64,

    /// Idle poll interval of the worker, in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            send_delay_ms: default_send_delay_ms(),
            failure_threshold: default_failure_threshold(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

fn default_batch_size() -> usize {
    10
}

fn default_send_delay_ms() -> u64 {
    1000
}

fn default_failure_threshold() -> f64 {
    0.5
}

fn default_poll_interval() -> u64 {
    5
}

/// Tracking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Public base URL the tracking routes are reachable under
    #[serde(default = "default_tracking_base_url")]
    pub base_url: String,

    /// HMAC key signing tracking links
    #[serde(default = "default_tracking_secret")]
    pub secret: String,

    /// Redirect target when a click carries no usable destination
    pub fallback_url: Option<String>,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            base_url: default_tracking_base_url(),
            secret: default_tracking_secret(),
            fallback_url: None,
        }
    }
}

impl TrackingConfig {
    /// Redirect target used when a click URL is missing or unusable
    pub fn fallback_url(&self) -> &str {
        self.fallback_url.as_deref().unwrap_or(&self.base_url)
    }
}

fn default_tracking_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_tracking_secret() -> String {
    DEFAULT_TRACKING_SECRET.to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the first config file found, overlaid with
    /// `GAZETTE__SECTION__KEY` environment variables
    pub fn load() -> crate::Result<Self> {
        let mut paths = vec![
            PathBuf::from("./gazette.toml"),
            PathBuf::from("/etc/gazette/gazette.toml"),
        ];
        if let Ok(explicit) = std::env::var("GAZETTE_CONFIG") {
            paths.insert(0, PathBuf::from(explicit));
        }

        let mut builder = ::config::Config::builder();
        if let Some(path) = paths.into_iter().find(|p| p.exists()) {
            tracing::debug!(path = %path.display(), "Using configuration file");
            builder = builder.add_source(::config::File::from(path));
        }

        let config: Config = builder
            .add_source(
                ::config::Environment::with_prefix("GAZETTE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| crate::Error::Config(format!("Failed to load config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.sender.batch_size == 0 {
            return Err(crate::Error::Config(
                "sender.batch_size must be at least 1".to_string(),
            ));
        }

        let threshold = self.sender.failure_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(crate::Error::Config(format!(
                "sender.failure_threshold must be in (0, 1], got {}",
                threshold
            )));
        }

        if self.tracking.secret.is_empty() {
            return Err(crate::Error::Config(
                "tracking.secret must not be empty".to_string(),
            ));
        }

        for (key, value) in [
            ("tracking.base_url", self.tracking.base_url.as_str()),
            ("tracking.fallback_url", self.tracking.fallback_url()),
        ] {
            let parsed = url::Url::parse(value)
                .map_err(|e| crate::Error::Config(format!("{} is not a valid URL: {}", key, e)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(crate::Error::Config(format!(
                    "{} must be an http(s) URL",
                    key
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.sender.batch_size, 10);
        assert_eq!(config.sender.send_delay_ms, 1000);
        assert_eq!(config.sender.failure_threshold, 0.5);
        assert_eq!(config.api.port, 8080);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[database]
backend = "memory"

[smtp]
enabled = false
from_address = "infos@annuaire.example"

[sender]
batch_size = 5
send_delay_ms = 250

[tracking]
base_url = "https://news.annuaire.example"
secret = "s3cr3t"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.database.backend, "memory");
        assert!(!config.smtp.enabled);
        assert_eq!(config.sender.batch_size, 5);
        assert_eq!(config.sender.send_delay_ms, 250);
        assert_eq!(config.sender.failure_threshold, 0.5);
        assert_eq!(config.tracking.fallback_url(), "https://news.annuaire.example");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.sender.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sender.failure_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.tracking.secret.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.tracking.base_url = "ftp://files.example".to_string();
        assert!(config.validate().is_err());
    }
}
