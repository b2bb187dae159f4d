use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::workflows::queries::approval::{
    PriorityConfig, DEFAULT_HIGH_PRIORITY_AMOUNT, DEFAULT_MEDIUM_PRIORITY_AMOUNT,
};

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

/// Top-level configuration for the query desk service.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub workflow: WorkflowConfig,
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
            workflow: WorkflowConfig::from_env()?,
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

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Tunables for the approval workflow.
#[derive(Debug, Clone, Default)]
pub struct WorkflowConfig {
    pub priority: PriorityConfig,
}

impl WorkflowConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let high_amount_threshold =
            amount_from_env("QUERY_PRIORITY_HIGH_AMOUNT", DEFAULT_HIGH_PRIORITY_AMOUNT)?;
        let medium_amount_threshold =
            amount_from_env("QUERY_PRIORITY_MEDIUM_AMOUNT", DEFAULT_MEDIUM_PRIORITY_AMOUNT)?;
        if medium_amount_threshold > high_amount_threshold {
            return Err(ConfigError::InvertedThresholds {
                medium: medium_amount_threshold,
                high: high_amount_threshold,
            });
        }

        let urgency_keywords = match env::var("QUERY_URGENCY_KEYWORDS") {
            Ok(raw) => raw
                .split(',')
                .map(|keyword| keyword.trim().to_ascii_lowercase())
                .filter(|keyword| !keyword.is_empty())
                .collect(),
            Err(_) => PriorityConfig::default().urgency_keywords,
        };

        Ok(Self {
            priority: PriorityConfig {
                high_amount_threshold,
                medium_amount_threshold,
                urgency_keywords,
            },
        })
    }
}

fn amount_from_env(variable: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(variable) {
        Ok(raw) => raw
            .trim()
            .replace('_', "")
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidAmount { variable }),
        Err(_) => Ok(default),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidAmount { variable: &'static str },
    InvertedThresholds { medium: u64, high: u64 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidAmount { variable } => {
                write!(f, "{variable} must be a non-negative whole amount")
            }
            ConfigError::InvertedThresholds { medium, high } => write!(
                f,
                "medium priority threshold {medium} exceeds high priority threshold {high}"
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidAmount { .. }
            | ConfigError::InvertedThresholds { .. } => None,
        }
    }
}
