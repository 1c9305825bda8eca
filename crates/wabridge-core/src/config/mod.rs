mod defaults;


use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::BridgeError;
use defaults::*;

/// Upper bound on entries kept per conversation.
pub const MAX_HISTORY_ENTRIES: usize = 100;

/// Top-level bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub webhooks: WebhookConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// General process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

/// WhatsApp session settings.
///
/// Credentials live at `{data_dir}/whatsapp_session/whatsapp.db`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    /// Device name shown in the phone's linked-devices list.
    #[serde(default = "default_device_name")]
    pub device_name: String,
    /// Fixed delay before restarting after a reported closure.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Delay before a fresh session starts after an explicit logout.
    #[serde(default = "default_logout_restart_delay_ms")]
    pub logout_restart_delay_ms: u64,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            logout_restart_delay_ms: default_logout_restart_delay_ms(),
        }
    }
}

impl WhatsAppConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn logout_restart_delay(&self) -> Duration {
        Duration::from_millis(self.logout_restart_delay_ms)
    }
}

/// Materialized media settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Directory for downloaded media. Empty = `{data_dir}/media`.
    #[serde(default)]
    pub dir: String,
    /// Public prefix under which `dir` is served.
    #[serde(default = "default_public_url")]
    pub public_url: String,
    /// Images wider than this are scaled down (aspect preserved).
    #[serde(default = "default_max_width")]
    pub max_width: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            dir: String::new(),
            public_url: default_public_url(),
            max_width: default_max_width(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

/// Chat history settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Directory holding one JSON record per conversation. Empty = `{data_dir}/chats`.
    #[serde(default)]
    pub dir: String,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Window within which identical writes collapse into one.
    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            dir: String::new(),
            max_entries: default_max_entries(),
            dedup_window_ms: default_dedup_window_ms(),
        }
    }
}

impl HistoryConfig {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }
}

/// Outbound automation endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Receives messages the operator typed on the phone.
    #[serde(default)]
    pub manual_reply: Option<String>,
    /// Receives messages from customers.
    #[serde(default)]
    pub ai_reply: Option<String>,
    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            manual_reply: None,
            ai_reply: None,
            timeout_secs: default_webhook_timeout(),
        }
    }
}

/// HTTP API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Bearer token for API authentication. Empty = no auth (for local-only use).
    #[serde(default)]
    pub api_key: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            api_key: String::new(),
        }
    }
}

impl Config {
    /// Expanded data directory.
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand(&self.bridge.data_dir))
    }

    pub fn session_db_path(&self) -> PathBuf {
        self.data_dir().join("whatsapp_session").join("whatsapp.db")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir().join("logs")
    }

    pub fn media_dir(&self) -> PathBuf {
        self.dir_or_default(&self.media.dir, "media")
    }

    pub fn history_dir(&self) -> PathBuf {
        self.dir_or_default(&self.history.dir, "chats")
    }

    fn dir_or_default(&self, configured: &str, sub: &str) -> PathBuf {
        if configured.trim().is_empty() {
            self.data_dir().join(sub)
        } else {
            PathBuf::from(shellexpand(configured))
        }
    }

    /// Apply the environment overrides inherited from the previous deployment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT").and_then(|p| p.trim().parse().ok()) {
            self.api.port = port;
        }
        if let Some(url) = lookup("WEBHOOK_MANUAL_REPLY").filter(|u| !u.trim().is_empty()) {
            self.webhooks.manual_reply = Some(url.trim().to_string());
        }
        if let Some(url) = lookup("WEBHOOK_AI_REPLY").filter(|u| !u.trim().is_empty()) {
            self.webhooks.ai_reply = Some(url.trim().to_string());
        }
    }

    /// Reject values the runtime cannot honor.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if !(1..=MAX_HISTORY_ENTRIES).contains(&self.history.max_entries) {
            return Err(BridgeError::Config(format!(
                "history.max_entries must be within 1..={MAX_HISTORY_ENTRIES}, got {}",
                self.history.max_entries
            )));
        }
        if !(1..=100).contains(&self.media.jpeg_quality) {
            return Err(BridgeError::Config(format!(
                "media.jpeg_quality must be within 1..=100, got {}",
                self.media.jpeg_quality
            )));
        }
        if self.media.max_width == 0 {
            return Err(BridgeError::Config("media.max_width must be at least 1".into()));
        }
        Ok(())
    }
}

/// Expand `~` to home directory.
pub fn shellexpand(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}/{rest}", home.to_string_lossy());
        }
    }
    path.to_string()
}

/// Load configuration from a TOML file, then apply environment overrides.
///
/// Falls back to defaults if the file does not exist.
pub fn load(path: &str) -> Result<Config, BridgeError> {
    let path = Path::new(path);
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| BridgeError::Config(format!("failed to parse config: {}", e)))?
    } else {
        tracing::info!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        Config::default()
    };

    config.apply_env_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}
