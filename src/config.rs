use crate::error::{Result, RotorError};
use crate::models::Thresholds;
use crate::proxy::client::parse_target;
use crate::proxy::dispatcher::DispatcherConfig;
use crate::proxy::health::HealthCheckerConfig;
use crate::proxy::threshold::ThresholdConfig;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Inbound proxy listener configuration
    pub proxy: ProxyServerConfig,
    /// API server configuration
    pub api: ApiServerConfig,
    /// Which store backs the ledger and the pool
    pub store: StoreBackend,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Health checker configuration
    pub healthcheck: HealthCheckSettings,
    /// Threshold controller configuration
    pub thresholds: ThresholdSettings,
    /// Startup bulk import
    pub import: ImportConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ProxyServerConfig {
    /// Port for the proxy listener (default: 6969)
    pub port: u16,
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Extra attempts after a proxy fault
    pub max_retries: u32,
    /// Leniency escalations allowed per selection
    pub max_escalations: u32,
    /// Connection timeout in seconds
    pub connect_timeout: u64,
    /// Request timeout in seconds
    pub request_timeout: u64,
}

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Port for the API server (default: 8001)
    pub port: u16,
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Allowed CORS origins (comma-separated, empty = localhost only)
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = RotorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(RotorError::InvalidConfig(format!(
                "STORE_BACKEND must be postgres or memory, got {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database host
    pub host: String,
    /// Database port
    pub port: u16,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Database name
    pub name: String,
    /// SSL mode (disable, require, prefer)
    pub ssl_mode: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Minimum connections in pool
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct HealthCheckSettings {
    /// Known-good endpoint fetched through each proxy
    pub url: String,
    /// Concurrent probes per backoff tier
    pub workers: usize,
    /// Pause between sweeps in milliseconds
    pub sweep_interval_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ThresholdSettings {
    /// Initial latency ceiling in seconds
    pub latency: f64,
    /// Initial reliability floor
    pub reliability: f64,
    /// Optimal rest time in seconds
    pub rest_time: f64,
    /// Adjustments per controller cycle
    pub fall_through: u32,
    /// Pause between controller cycles in milliseconds
    pub interval_ms: u64,
    /// Tighten when proxies rest far longer than needed
    pub tighten_when_idle: bool,
}

#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Text file scanned for proxy addresses at startup
    pub file: Option<String>,
    /// Concurrent admissions per batch
    pub batch_size: usize,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let config = Config {
            proxy: ProxyServerConfig {
                port: parse_env_or("PROXY_PORT", 6969)?,
                host: get_env_or("PROXY_HOST", "0.0.0.0"),
                max_retries: parse_env_or("PROXY_MAX_RETRIES", 3)?,
                max_escalations: parse_env_or("PROXY_MAX_ESCALATIONS", 16)?,
                connect_timeout: parse_env_or("PROXY_CONNECT_TIMEOUT", 10)?,
                request_timeout: parse_env_or("PROXY_REQUEST_TIMEOUT", 10)?,
            },
            api: ApiServerConfig {
                port: parse_env_or("API_PORT", 8001)?,
                host: get_env_or("API_HOST", "0.0.0.0"),
                cors_origins: get_env_or("CORS_ORIGINS", "")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            store: get_env_or("STORE_BACKEND", "postgres").parse()?,
            database: DatabaseConfig {
                host: get_env_or("DB_HOST", "localhost"),
                port: parse_env_or("DB_PORT", 5432)?,
                user: get_env_or("DB_USER", "rotor"),
                password: get_env_or("DB_PASSWORD", "rotor_password"),
                name: get_env_or("DB_NAME", "rotor"),
                ssl_mode: get_env_or("DB_SSLMODE", "disable"),
                max_connections: parse_env_or("DB_MAX_CONNECTIONS", 50)?,
                min_connections: parse_env_or("DB_MIN_CONNECTIONS", 5)?,
            },
            healthcheck: HealthCheckSettings {
                url: get_env_or("HEALTHCHECK_URL", "http://catfact.ninja/fact"),
                workers: parse_env_or("HEALTHCHECK_WORKERS", 20)?,
                sweep_interval_ms: parse_env_or("HEALTHCHECK_SWEEP_INTERVAL_MS", 500)?,
            },
            thresholds: ThresholdSettings {
                latency: parse_env_or("THRESHOLD_LATENCY", 2.25)?,
                reliability: parse_env_or("THRESHOLD_RELIABILITY", 0.875)?,
                rest_time: parse_env_or("THRESHOLD_REST_TIME", 5.0)?,
                fall_through: parse_env_or("THRESHOLD_FALL_THROUGH", 10)?,
                interval_ms: parse_env_or("THRESHOLD_INTERVAL_MS", 500)?,
                tighten_when_idle: parse_env_or("THRESHOLD_TIGHTEN_WHEN_IDLE", false)?,
            },
            import: ImportConfig {
                file: env::var("IMPORT_FILE").ok().filter(|f| !f.trim().is_empty()),
                batch_size: parse_env_or("IMPORT_BATCH_SIZE", 100)?,
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        parse_target(&self.healthcheck.url)
            .map_err(|e| RotorError::InvalidConfig(format!("HEALTHCHECK_URL: {e}")))?;

        if !(self.thresholds.latency > 0.0) {
            return Err(RotorError::InvalidConfig(
                "THRESHOLD_LATENCY must be positive".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.thresholds.reliability) {
            return Err(RotorError::InvalidConfig(
                "THRESHOLD_RELIABILITY must be in [0, 1)".into(),
            ));
        }
        if !(self.thresholds.rest_time > 0.0) {
            return Err(RotorError::InvalidConfig(
                "THRESHOLD_REST_TIME must be positive".into(),
            ));
        }

        Ok(())
    }

    /// Get the database connection URL
    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.database.user,
            self.database.password,
            self.database.host,
            self.database.port,
            self.database.name,
            self.database.ssl_mode
        )
    }

    /// Get the proxy listener address
    pub fn proxy_addr(&self) -> String {
        format!("{}:{}", self.proxy.host, self.proxy.port)
    }

    /// Get the API server address
    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }

    pub fn initial_thresholds(&self) -> Thresholds {
        Thresholds::new(self.thresholds.latency, self.thresholds.reliability)
    }

    pub fn health_checker_config(&self) -> HealthCheckerConfig {
        HealthCheckerConfig {
            sweep_interval: Duration::from_millis(self.healthcheck.sweep_interval_ms),
            check_url: self.healthcheck.url.clone(),
            workers: self.healthcheck.workers.max(1),
        }
    }

    pub fn threshold_config(&self) -> ThresholdConfig {
        ThresholdConfig {
            rest_time: Duration::from_secs_f64(self.thresholds.rest_time),
            fall_through: self.thresholds.fall_through,
            interval: Duration::from_millis(self.thresholds.interval_ms),
            tighten_when_idle: self.thresholds.tighten_when_idle,
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            max_retries: self.proxy.max_retries,
            max_escalations: self.proxy.max_escalations,
        }
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable, falling back to `default` when unset
fn parse_env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| RotorError::InvalidConfig(format!("{key} has an invalid value: {raw:?}"))),
        Err(_) => Ok(default),
    }
}
