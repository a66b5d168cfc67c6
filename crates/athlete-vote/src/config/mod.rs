use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use crate::voting::VotingPolicy;

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
    pub voting: VotingConfig,
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

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            voting: VotingConfig::from_env()?,
        })
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

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Approval rules plus the knobs for the sweep loop and event fan-out.
///
/// The approval bar and quorum are only ever read from here (through
/// [`VotingConfig::policy`]) so the rest of the system never hardcodes them.
#[derive(Debug, Clone, PartialEq)]
pub struct VotingConfig {
    pub approval_threshold: f64,
    pub minimum_quorum: u64,
    pub review_threshold: Option<u64>,
    pub voting_window_days: i64,
    pub sweep_interval_secs: u64,
    pub sweep_batch: usize,
    pub notifier_capacity: usize,
    pub max_write_retries: u32,
}

/// Keeps `created_at + window` far inside chrono's calendar range.
pub const MAX_VOTING_WINDOW_DAYS: i64 = 36_500;

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            approval_threshold: 70.0,
            minimum_quorum: 1,
            review_threshold: None,
            voting_window_days: 7,
            sweep_interval_secs: 60,
            sweep_batch: 256,
            notifier_capacity: 256,
            max_write_retries: 3,
        }
    }
}

impl VotingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let approval_threshold =
            parse_var("VOTING_APPROVAL_THRESHOLD", defaults.approval_threshold)?;
        if !(approval_threshold > 0.0 && approval_threshold <= 100.0) {
            return Err(ConfigError::OutOfRange {
                variable: "VOTING_APPROVAL_THRESHOLD",
                expected: "a percentage in (0, 100]",
            });
        }

        let minimum_quorum = parse_var("VOTING_MINIMUM_QUORUM", defaults.minimum_quorum)?;
        if minimum_quorum == 0 {
            return Err(ConfigError::OutOfRange {
                variable: "VOTING_MINIMUM_QUORUM",
                expected: "at least one vote",
            });
        }

        let review_threshold = match env::var("VOTING_REVIEW_THRESHOLD") {
            Ok(raw) if !raw.trim().is_empty() => Some(parse_value(
                "VOTING_REVIEW_THRESHOLD",
                &raw,
            )?),
            _ => None,
        };

        let voting_window_days = parse_var("VOTING_WINDOW_DAYS", defaults.voting_window_days)?;
        if !(1..=MAX_VOTING_WINDOW_DAYS).contains(&voting_window_days) {
            return Err(ConfigError::OutOfRange {
                variable: "VOTING_WINDOW_DAYS",
                expected: "between 1 and 36500 days",
            });
        }

        let sweep_interval_secs =
            parse_var("VOTING_SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs)?;
        if sweep_interval_secs == 0 {
            return Err(ConfigError::OutOfRange {
                variable: "VOTING_SWEEP_INTERVAL_SECS",
                expected: "at least one second",
            });
        }

        let sweep_batch = parse_var("VOTING_SWEEP_BATCH", defaults.sweep_batch)?.max(1);
        let notifier_capacity =
            parse_var("VOTING_NOTIFIER_CAPACITY", defaults.notifier_capacity)?.max(1);
        let max_write_retries = parse_var("VOTING_MAX_WRITE_RETRIES", defaults.max_write_retries)?;

        Ok(Self {
            approval_threshold,
            minimum_quorum,
            review_threshold,
            voting_window_days,
            sweep_interval_secs,
            sweep_batch,
            notifier_capacity,
            max_write_retries,
        })
    }

    pub fn policy(&self) -> VotingPolicy {
        VotingPolicy {
            approval_threshold: self.approval_threshold,
            minimum_quorum: self.minimum_quorum,
            review_threshold: self.review_threshold,
            // Unvalidated windows saturate; `deadline_from` then refuses them.
            voting_window: chrono::Duration::try_days(self.voting_window_days)
                .unwrap_or(chrono::Duration::MAX),
            max_write_retries: self.max_write_retries,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn parse_var<T: FromStr>(variable: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(variable) {
        Ok(raw) if !raw.trim().is_empty() => parse_value(variable, &raw),
        _ => Ok(default),
    }
}

fn parse_value<T: FromStr>(variable: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidNumber {
        variable,
        value: raw.to_string(),
    })
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost {
        source: std::net::AddrParseError,
    },
    InvalidNumber {
        variable: &'static str,
        value: String,
    },
    OutOfRange {
        variable: &'static str,
        expected: &'static str,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { variable, value } => {
                write!(f, "{variable} must be numeric (got '{value}')")
            }
            ConfigError::OutOfRange { variable, expected } => {
                write!(f, "{variable} must be {expected}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidNumber { .. }
            | ConfigError::OutOfRange { .. } => None,
        }
    }
}
