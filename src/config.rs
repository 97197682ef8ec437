use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Result, anyhow};

use crate::audio::{AudioFormat, QueueOptions};
use crate::chat::session::{DEFAULT_FALLBACK_MESSAGE, DEFAULT_THINKING_STATUS};
use crate::chat::{SendParams, SessionOptions};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub personality_intensity: u8,
    pub mute: bool,
    pub bearer_token: Option<String>,
    pub inter_clip_pause_ms: u64,
    /// Forces the clip format instead of sniffing it
    pub audio_format: Option<AudioFormat>,
    pub fallback_message: String,
    pub thinking_status: Option<String>,
    pub tool_notices: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            personality_intensity: 75,
            mute: false,
            bearer_token: None,
            inter_clip_pause_ms: 100,
            audio_format: None,
            fallback_message: DEFAULT_FALLBACK_MESSAGE.to_string(),
            thinking_status: Some(DEFAULT_THINKING_STATUS.to_string()),
            tool_notices: false,
        }
    }

    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        let mut config = Self::load_from(&config_path)?;
        config.apply_env();
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(path, config_content)?;
        Ok(())
    }

    /// Environment wins over the config file
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("MIMIR_API_URL") {
            if !url.trim().is_empty() {
                self.base_url = url;
            }
        }
        if let Ok(token) = std::env::var("MIMIR_TOKEN") {
            if !token.trim().is_empty() {
                self.bearer_token = Some(token);
            }
        }
    }

    pub fn send_params(&self) -> SendParams {
        SendParams {
            personality_intensity: self.personality_intensity.min(100),
            mute: self.mute,
            bearer_token: self.bearer_token.clone(),
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            thinking_status: self.thinking_status.clone(),
            fallback_message: self.fallback_message.clone(),
            tool_notices: self.tool_notices,
        }
    }

    pub fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            inter_clip_pause: Duration::from_millis(self.inter_clip_pause_ms),
            forced_format: self.audio_format,
        }
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("mimir").join("config.json"))
    }
}
