use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use super::platform;
use super::protocol::DisplayMode;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub artwork: ArtworkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_token_file")]
    pub token_file: PathBuf,
    /// Key used to seal the stored token; created on first save.
    #[serde(default = "default_token_key_file")]
    pub token_key_file: PathBuf,
}

/// Settings as the host exposes them: seconds and a mode name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_display_mode")]
    pub display_mode: String,
    #[serde(default = "default_true")]
    pub show_controls: bool,
    #[serde(default = "default_true")]
    pub show_album_art: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Root of the Web API, without a trailing slash.
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Notifications from this package trigger an immediate refresh.
    #[serde(default = "default_notification_package")]
    pub notification_package: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtworkConfig {
    #[serde(default = "default_artwork_max_bytes")]
    pub max_bytes: u64,
    /// Largest accepted width or height in pixels.
    #[serde(default = "default_artwork_max_dimension")]
    pub max_dimension: u32,
}

/// Resolved display settings for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayPreferences {
    pub poll_interval_ms: u64,
    pub display_mode: DisplayMode,
    pub show_controls: bool,
    pub show_album_art: bool,
}

impl DisplayPreferences {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for DisplayPreferences {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_secs() * 1000,
            display_mode: DisplayMode::Reference,
            show_controls: true,
            show_album_art: true,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            token_file: default_token_file(),
            token_key_file: default_token_key_file(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            display_mode: default_display_mode(),
            show_controls: true,
            show_album_art: true,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            notification_package: default_notification_package(),
        }
    }
}

impl Default for ArtworkConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_artwork_max_bytes(),
            max_dimension: default_artwork_max_dimension(),
        }
    }
}

fn default_token_file() -> PathBuf {
    platform::data_dir().join("token.json")
}

fn default_token_key_file() -> PathBuf {
    platform::data_dir().join("token.key")
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_display_mode() -> String {
    DisplayMode::Reference.as_str().to_string()
}

fn default_true() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8990
}

fn default_api_base_url() -> String {
    "https://api.spotify.com/v1".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_notification_package() -> String {
    "com.spotify.music".to_string()
}

fn default_artwork_max_bytes() -> u64 {
    2 * 1024 * 1024
}

fn default_artwork_max_dimension() -> u32 {
    1024
}

impl Config {
    /// Load from the default location, writing defaults on first run.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// A malformed file is reported and replaced by defaults in memory; the
    /// file itself is left alone so the user can fix it.
    pub fn load_from(config_path: &Path) -> anyhow::Result<Self> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(config_path)?;
        Ok(Self::parse_or_default(&content))
    }

    pub fn parse_or_default(content: &str) -> Self {
        match toml::from_str::<Self>(content) {
            Ok(config) => config,
            Err(e) => {
                warn!("Malformed config, using defaults: {}", e);
                Self::default()
            }
        }
    }

    pub fn save_to(&self, config_path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    pub fn display_preferences(&self) -> DisplayPreferences {
        let defaults = DisplayPreferences::default();

        let poll_interval_ms = match self.display.poll_interval_secs {
            0 => {
                warn!("poll_interval_secs must be positive, using default");
                defaults.poll_interval_ms
            }
            secs => secs.saturating_mul(1000),
        };

        // A missing key deserializes to the default mode; a name we don't
        // know falls through to the text wall.
        let display_mode = DisplayMode::parse(&self.display.display_mode).unwrap_or_else(|| {
            warn!(
                "Unknown display_mode {:?}, using {}",
                self.display.display_mode,
                DisplayMode::Wall.as_str()
            );
            DisplayMode::Wall
        });

        DisplayPreferences {
            poll_interval_ms,
            display_mode,
            show_controls: self.display.show_controls,
            show_album_art: self.display.show_album_art,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs.max(1))
    }
}
