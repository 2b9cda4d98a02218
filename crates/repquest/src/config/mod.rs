use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::fundraising::MissingProgressPolicy;

pub const DEFAULT_RESEND_FROM: &str = "RepQuest <fundraising@repquest.app>";

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub store: StoreConfig,
    pub notifier: NotifierConfig,
    pub settlement: SettlementConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let store = match (non_empty("SUPABASE_URL"), non_empty("SUPABASE_SERVICE_ROLE_KEY")) {
            (Some(url), Some(service_key)) => StoreConfig::Postgrest(PostgrestConfig {
                base_url: url.trim_end_matches('/').to_string(),
                service_key,
            }),
            _ => StoreConfig::InMemory,
        };

        let notifier = NotifierConfig {
            resend_api_key: non_empty("RESEND_API_KEY"),
            from: non_empty("RESEND_FROM").unwrap_or_else(|| DEFAULT_RESEND_FROM.to_string()),
            max_attempts: parse_number("NOTIFY_MAX_ATTEMPTS", 3)?,
            retry_backoff: Duration::from_millis(parse_number("NOTIFY_RETRY_BACKOFF_MS", 500)?),
        };
        if notifier.max_attempts == 0 {
            return Err(ConfigError::InvalidNumber {
                var: "NOTIFY_MAX_ATTEMPTS",
                value: "0".to_string(),
            });
        }

        let missing_progress = match non_empty("FUNDRAISER_MISSING_PROGRESS_POLICY") {
            Some(value) => value
                .parse::<MissingProgressPolicy>()
                .map_err(|_| ConfigError::InvalidPolicy { value })?,
            None => MissingProgressPolicy::default(),
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            store,
            notifier,
            settlement: SettlementConfig { missing_progress },
        })
    }
}

fn non_empty(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_number<T>(var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match non_empty(var) {
        Some(value) => value
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { var, value }),
        None => Ok(default),
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Backing store for fundraisers, progress, pledges and the points ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    InMemory,
    Postgrest(PostgrestConfig),
}

#[derive(Clone, PartialEq, Eq)]
pub struct PostgrestConfig {
    pub base_url: String,
    pub service_key: String,
}

impl fmt::Debug for PostgrestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgrestConfig")
            .field("base_url", &self.base_url)
            .field("service_key", &"<redacted>")
            .finish()
    }
}

/// E-mail delivery settings. Without an API key notifications are only logged.
#[derive(Clone)]
pub struct NotifierConfig {
    pub resend_api_key: Option<String>,
    pub from: String,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
}

impl fmt::Debug for NotifierConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifierConfig")
            .field("resend_api_key", &self.resend_api_key.as_ref().map(|_| "<redacted>"))
            .field("from", &self.from)
            .field("max_attempts", &self.max_attempts)
            .field("retry_backoff", &self.retry_backoff)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementConfig {
    pub missing_progress: MissingProgressPolicy,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { var: &'static str, value: String },
    InvalidPolicy { value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { var, value } => {
                write!(f, "{var} must be a positive integer, got '{value}'")
            }
            ConfigError::InvalidPolicy { value } => write!(
                f,
                "FUNDRAISER_MISSING_PROGRESS_POLICY must be one of exclude, fundraiser_total, zero_levels; got '{value}'"
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidNumber { .. }
            | ConfigError::InvalidPolicy { .. } => None,
        }
    }
}
