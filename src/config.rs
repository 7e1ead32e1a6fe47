//! Configuration management for codemend
//!
//! Stores settings in ~/.config/codemend/config.json

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Directories never scanned for source files or diagnostics.
pub const DEFAULT_IGNORED_DIRS: &[&str] = &["target", "node_modules", "dist", ".next"];

fn default_model() -> String {
    "google/gemini-flash-1.5".to_string()
}

fn default_api_url() -> String {
    "https://openrouter.ai/api/v1/chat/completions".to_string()
}

fn default_max_diagnostics() -> usize {
    5
}

fn default_max_payload_chars() -> usize {
    100_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_request_delay_ms() -> u64 {
    1000
}

/// How eagerly run events are surfaced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Notifications {
    #[default]
    Auto,
    Always,
    Never,
}

impl Notifications {
    /// Default tracing filter when RUST_LOG is unset.
    pub fn log_filter(&self) -> &'static str {
        match self {
            Notifications::Always => "codemend=debug",
            Notifications::Auto => "codemend=info",
            Notifications::Never => "codemend=warn",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// API key for the chat-completions endpoint. Environment variables
    /// take precedence; see [`Config::get_api_key`].
    pub api_key: Option<String>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub notifications: Notifications,
    /// Maximum diagnostics submitted per repair request.
    #[serde(default = "default_max_diagnostics")]
    pub max_diagnostics_per_batch: usize,
    /// Maximum serialized prompt payload; larger files are skipped.
    #[serde(default = "default_max_payload_chars")]
    pub max_payload_chars: usize,
    /// Retry cap for rate-limited repair calls.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Retry every repair failure instead of only rate limits.
    #[serde(default)]
    pub retry_all_failures: bool,
    /// Fixed delay honored after each successful repair call.
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    /// Directory names excluded from the scan.
    #[serde(default = "default_ignored_dirs")]
    pub ignored_dirs: Vec<String>,
}

fn default_ignored_dirs() -> Vec<String> {
    DEFAULT_IGNORED_DIRS.iter().map(|s| s.to_string()).collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_api_url(),
            model: default_model(),
            notifications: Notifications::default(),
            max_diagnostics_per_batch: default_max_diagnostics(),
            max_payload_chars: default_max_payload_chars(),
            max_retries: default_max_retries(),
            retry_all_failures: false,
            request_delay_ms: default_request_delay_ms(),
            ignored_dirs: default_ignored_dirs(),
        }
    }
}

impl Config {
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("codemend"))
    }

    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk, or return default
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if let Ok(content) = fs::read_to_string(&path) {
                match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(err) => {
                        preserve_corrupt_config(&path, &content);
                        tracing::warn!(
                            "config file was corrupted ({}); a backup was saved and defaults were loaded",
                            err
                        );
                    }
                }
            }
        }
        Self::default()
    }

    /// Save config to disk
    pub fn save(&self) -> anyhow::Result<()> {
        let dir = Self::config_dir()
            .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))?;
        fs::create_dir_all(&dir)?;
        let path = dir.join("config.json");
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(())
    }

    /// Get the API key. Environment variables win over the config file so a
    /// key never has to be written to disk.
    pub fn get_api_key(&self) -> Option<String> {
        if let Ok(key) = std::env::var("CODEMEND_API_KEY") {
            return Some(key);
        }
        if let Ok(key) = std::env::var("OPENROUTER_API_KEY") {
            return Some(key);
        }
        self.api_key.clone()
    }

    pub fn has_api_key(&self) -> bool {
        self.get_api_key().is_some()
    }

    /// Config file location for display
    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/codemend/config.json".to_string())
    }
}

fn preserve_corrupt_config(path: &std::path::Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}
