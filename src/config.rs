use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP API port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Port the sync relay listens on
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// CORS allowed origins, comma separated
    pub cors_origins: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Database URL backing the access resolver
    pub db_url: Option<String>,

    /// Name of the cookie carrying the session token
    #[serde(default = "default_session_cookie_name")]
    pub session_cookie_name: String,

    /// Frames buffered per connection before it counts as unreachable
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Seconds an empty room may stay idle before eviction (0 keeps rooms forever)
    #[serde(default)]
    pub room_idle_ttl_secs: u64,

    /// How often the room janitor runs
    #[serde(default = "default_room_janitor_interval_secs")]
    pub room_janitor_interval_secs: u64,

    /// Time-to-live of cached access decisions
    #[serde(default = "default_access_cache_ttl_secs")]
    pub access_cache_ttl_secs: u64,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        envy::from_env::<Config>().map_err(ConfigError::EnvError)
    }

    /// Get the full API server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Get the full relay address
    pub fn relay_address(&self) -> String {
        format!("{}:{}", self.host, self.ws_port)
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment.to_lowercase() == "dev" || self.environment.to_lowercase() == "development"
    }

    /// Outbound queue depth, never below what the initial snapshot needs
    pub fn outbound_capacity(&self) -> usize {
        self.outbound_queue_capacity.max(2)
    }

    pub fn room_idle_ttl(&self) -> Option<Duration> {
        match self.room_idle_ttl_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn room_janitor_interval(&self) -> Duration {
        Duration::from_secs(self.room_janitor_interval_secs.max(1))
    }

    pub fn access_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.access_cache_ttl_secs)
    }

    /// Parsed CORS origins; `None` means any origin
    pub fn cors_origin_list(&self) -> Option<Vec<String>> {
        self.cors_origins.as_ref().map(|origins| {
            origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect()
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ws_port: default_ws_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            cors_origins: None,
            db_url: None,
            session_cookie_name: default_session_cookie_name(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            room_idle_ttl_secs: 0,
            room_janitor_interval_secs: default_room_janitor_interval_secs(),
            access_cache_ttl_secs: default_access_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    EnvError(#[from] envy::Error),
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_ws_port() -> u16 {
    1234
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_session_cookie_name() -> String {
    "session".to_string()
}

fn default_outbound_queue_capacity() -> usize {
    256
}

fn default_room_janitor_interval_secs() -> u64 {
    60
}

fn default_access_cache_ttl_secs() -> u64 {
    30
}
