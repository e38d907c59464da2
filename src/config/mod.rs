use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub booking: BookingConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the marketplace API (default: http://127.0.0.1:8000)
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-request timeout in seconds (default: 10)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// File holding the stored credential and cached identity
    #[serde(default = "default_session_file")]
    pub session_file: PathBuf,
    /// Keep the session across runs. When false the session lives in memory only.
    #[serde(default = "default_persist")]
    pub persist: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            session_file: default_session_file(),
            persist: default_persist(),
        }
    }
}

fn default_session_file() -> PathBuf {
    PathBuf::from("./data/session.json")
}

fn default_persist() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookingConfig {
    /// Lead time applied when a quick-book flow omits `scheduled_at` (default: 60)
    #[serde(default = "default_quick_book_lead_minutes")]
    pub quick_book_lead_minutes: i64,
}

impl BookingConfig {
    pub fn quick_book_lead(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.quick_book_lead_minutes.max(1))
    }
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            quick_book_lead_minutes: default_quick_book_lead_minutes(),
        }
    }
}

fn default_quick_book_lead_minutes() -> i64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchingConfig {
    /// Radius used when a search does not name one (default: 5)
    #[serde(default = "default_radius_km")]
    pub default_radius_km: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            default_radius_km: default_radius_km(),
        }
    }
}

fn default_radius_km() -> f64 {
    5.0
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::parse(&content)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse configuration file")
    }

    pub fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
            booking: BookingConfig::default(),
            matching: MatchingConfig::default(),
        }
    }
}
