use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

fn default_api_base() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_text_model() -> String {
    "gemini-3-flash-preview".to_string()
}

fn default_vision_model() -> String {
    "gemini-2.5-flash-image".to_string()
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub window: WindowConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeminiConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_text_model")]
    pub text_model: String,
    #[serde(default = "default_vision_model")]
    pub vision_model: String,
    /// Used only when neither `GEMINI_API_KEY` nor `API_KEY` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        GeminiConfig {
            api_base: default_api_base(),
            text_model: default_text_model(),
            vision_model: default_vision_model(),
            api_key: None,
        }
    }
}

impl GeminiConfig {
    /// Environment wins over the config file so a key never has to be written to disk.
    pub fn resolve_api_key(&self) -> Option<String> {
        ["GEMINI_API_KEY", "API_KEY"]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .chain(self.api_key.clone())
            .map(|key| key.trim().to_string())
            .find(|key| !key.is_empty())
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub min_width: u32,
    pub min_height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        WindowConfig {
            width: 760,
            height: 820,
            min_width: 420,
            min_height: 480,
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let config_path = Self::get_config_path();

        if config_path.exists() {
            match fs::read_to_string(&config_path) {
                Ok(contents) => match Self::parse(&contents) {
                    Ok(config) => return config,
                    Err(e) => tracing::warn!("Error parsing {}: {}. Using defaults.", config_path.display(), e),
                },
                Err(e) => tracing::warn!("Error reading {}: {}. Using defaults.", config_path.display(), e),
            }
        } else if let Some(parent) = config_path.parent() {
            let _ = fs::create_dir_all(parent);
        }

        Config::default()
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn get_config_path() -> PathBuf {
        if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home).join(".config/omnigenius/config.toml")
        } else {
            PathBuf::from("config.toml")
        }
    }

    pub fn get_config_dir() -> PathBuf {
        if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home).join(".config/omnigenius")
        } else {
            PathBuf::from(".")
        }
    }

    pub fn history_db_path() -> PathBuf {
        Self::get_config_dir().join("history.sqlite")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.gemini.text_model, "gemini-3-flash-preview");
        assert_eq!(config.gemini.vision_model, "gemini-2.5-flash-image");
        assert_eq!(config.window.width, 760);
        assert!(config.gemini.api_key.is_none());
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::parse(
            r#"
            [gemini]
            text_model = "gemini-2.0-flash"

            [window]
            width = 1024
            "#,
        )
        .unwrap();
        assert_eq!(config.gemini.text_model, "gemini-2.0-flash");
        assert_eq!(config.gemini.vision_model, "gemini-2.5-flash-image");
        assert_eq!(config.gemini.api_base, "https://generativelanguage.googleapis.com/v1beta");
        assert_eq!(config.window.width, 1024);
        assert_eq!(config.window.height, 820);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(Config::parse("[gemini\ntext_model = ").is_err());
    }
}
