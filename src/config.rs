use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{LifelineError, Result};

/// Environment variable consulted when `session.api_key` is not set.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

const fn default_frame_size() -> usize {
    4096
}

fn default_endpoint() -> String {
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string()
}

fn default_model() -> String {
    "models/gemini-2.5-flash-native-audio-preview-09-2025".to_string()
}

fn default_voice() -> String {
    "Puck".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    pub input_device: Option<String>,

    pub output_device: Option<String>,

    /// Samples per capture frame at 16kHz.
    #[serde(default = "default_frame_size")]
    pub frame_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            frame_size: default_frame_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_voice")]
    pub voice: String,

    pub api_key: Option<String>,

    /// Replaces the built-in dispatcher instruction.
    pub system_instruction: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            voice: default_voice(),
            api_key: None,
            system_instruction: None,
        }
    }
}

impl SessionConfig {
    /// The configured API key, falling back to `GEMINI_API_KEY`.
    pub fn resolve_api_key(&self) -> Result<String> {
        Self::pick_api_key(self.api_key.as_deref(), std::env::var(API_KEY_ENV).ok())
    }

    fn pick_api_key(configured: Option<&str>, from_env: Option<String>) -> Result<String> {
        configured
            .map(str::to_string)
            .or(from_env)
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                LifelineError::Config(format!(
                    "no API key: set session.api_key in the config file or {API_KEY_ENV}"
                ))
            })
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LifelineError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            LifelineError::Config(format!(
                "failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        let config: Self = serde_yaml_ng::from_str(&contents).map_err(|e| {
            LifelineError::Config(format!(
                "failed to parse config file {}: {e}",
                path.display()
            ))
        })?;

        if config.audio.frame_size == 0 {
            return Err(LifelineError::Config(
                "audio.frame_size must be greater than zero".to_string(),
            ));
        }

        Ok(config)
    }

    /// Load `path` if given, otherwise the default path, falling back to
    /// built-in defaults when no default config file exists.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        let default = Self::default_path();
        if default.exists() {
            Self::load(&default)
        } else {
            tracing::debug!("no config at {}, using defaults", default.display());
            Ok(Self::default())
        }
    }

    #[must_use]
    pub fn default_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from(".config"));
        config_dir.join("lifeline/config.yaml")
    }
}
