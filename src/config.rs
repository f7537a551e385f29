//! Application configuration module
//! Loads settings from environment variables and validates them at start-up.

use std::env;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// `None` runs the service on the in-memory store.
    pub database: Option<DatabaseConfig>,
    pub logging: LoggingConfig,
    pub gateway: GatewayConfig,
    pub run_migrations: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Payment gateway behaviour that is not a provider credential.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Time the callback handler waits before acknowledging and letting
    /// reconciliation finish in the background.
    pub callback_ack_timeout: Duration,
    pub checkout_max_retries: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            callback_ack_timeout: Duration::from_secs(5),
            checkout_max_retries: 2,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv::dotenv().ok();

        let skip_externals = env_flag("SKIP_EXTERNALS");
        let database = if skip_externals || env::var("DATABASE_URL").is_err() {
            None
        } else {
            Some(DatabaseConfig::from_env()?)
        };

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database,
            logging: LoggingConfig::from_env()?,
            gateway: GatewayConfig::from_env()?,
            run_migrations: env_flag("RUN_MIGRATIONS"),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }
        self.logging.validate()?;
        self.gateway.validate()?;
        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue("PORT cannot be 0".to_string()));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue("HOST cannot be empty".to_string()));
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()))?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MIN_CONNECTIONS".to_string()))?,
            connection_timeout: env::var("DB_CONNECTION_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_CONNECTION_TIMEOUT".to_string()))?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let ack_secs: u64 = env::var("CALLBACK_ACK_TIMEOUT_SECS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("CALLBACK_ACK_TIMEOUT_SECS".to_string()))?;
        Ok(GatewayConfig {
            callback_ack_timeout: Duration::from_secs(ack_secs),
            checkout_max_retries: env::var("CHECKOUT_MAX_RETRIES")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("CHECKOUT_MAX_RETRIES".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.callback_ack_timeout.is_zero() || self.callback_ack_timeout > Duration::from_secs(5)
        {
            return Err(ConfigError::ValidationFailed(
                "CALLBACK_ACK_TIMEOUT_SECS must be between 1 and 5".to_string(),
            ));
        }

        if self.checkout_max_retries > 5 {
            return Err(ConfigError::ValidationFailed(
                "CHECKOUT_MAX_RETRIES must be at most 5".to_string(),
            ));
        }

        Ok(())
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| crate::payments::credentials::parse_flag(&v))
        .unwrap_or(false)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_server_config_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
        };

        assert!(config.validate().is_ok());
        assert_eq!(config.bind_address(), "127.0.0.1:8000");
    }

    #[test]
    fn test_invalid_port_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_database_pool_bounds() {
        let config = DatabaseConfig {
            url: "postgres://localhost/makazi".to_string(),
            max_connections: 2,
            min_connections: 5,
            connection_timeout: 30,
            idle_timeout: None,
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_callback_ack_window_is_bounded() {
        let config = GatewayConfig {
            callback_ack_timeout: Duration::from_secs(30),
            ..GatewayConfig::default()
        };

        assert!(config.validate().is_err());
        assert!(GatewayConfig::default().validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_gateway_config_from_env() {
        env::set_var("CHECKOUT_MAX_RETRIES", "3");
        env::remove_var("CALLBACK_ACK_TIMEOUT_SECS");
        let config = GatewayConfig::from_env().unwrap();
        env::remove_var("CHECKOUT_MAX_RETRIES");

        assert_eq!(config.checkout_max_retries, 3);
        assert_eq!(config.callback_ack_timeout, Duration::from_secs(5));
    }

    #[test]
    #[serial]
    fn test_skip_externals_uses_memory_store() {
        env::set_var("SKIP_EXTERNALS", "true");
        env::set_var("DATABASE_URL", "postgres://localhost/makazi");
        let config = AppConfig::from_env().unwrap();
        env::remove_var("SKIP_EXTERNALS");
        env::remove_var("DATABASE_URL");

        assert!(config.database.is_none());
    }
}
