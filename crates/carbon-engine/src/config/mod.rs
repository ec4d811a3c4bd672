use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::calculation::{EngineConfig, HotSpotBasis};

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

/// Top-level configuration for the engine service.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub engine: EngineConfig,
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
            engine: load_engine()?,
        })
    }
}

fn load_engine() -> Result<EngineConfig, ConfigError> {
    let defaults = EngineConfig::default();

    let hot_spot_limit = match env::var("ENGINE_HOT_SPOT_LIMIT") {
        Ok(value) => value
            .trim()
            .parse::<usize>()
            .ok()
            .filter(|limit| *limit > 0)
            .ok_or(ConfigError::InvalidHotSpotLimit { value })?,
        Err(_) => defaults.hot_spot_limit,
    };

    let hot_spot_basis = match env::var("ENGINE_HOT_SPOT_BASIS") {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "activity" => HotSpotBasis::Activity,
            "category" => HotSpotBasis::Category,
            _ => return Err(ConfigError::InvalidHotSpotBasis { value }),
        },
        Err(_) => defaults.hot_spot_basis,
    };

    Ok(EngineConfig {
        hot_spot_limit,
        hot_spot_basis,
    })
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

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidHotSpotLimit { value: String },
    InvalidHotSpotBasis { value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidHotSpotLimit { value } => write!(
                f,
                "ENGINE_HOT_SPOT_LIMIT must be a positive integer, got '{}'",
                value
            ),
            ConfigError::InvalidHotSpotBasis { value } => write!(
                f,
                "ENGINE_HOT_SPOT_BASIS must be 'activity' or 'category', got '{}'",
                value
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidHotSpotLimit { .. }
            | ConfigError::InvalidHotSpotBasis { .. } => None,
        }
    }
}
