use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use thiserror::Error;

use crate::window::{DEFAULT_ITEM_EXTENT, DEFAULT_OVERSCAN};

pub const API_KEY_ENV: &str = "PAGENOTES_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub viewer: ViewerConfig,
    pub extraction: ExtractionConfig,
    pub notes: NotesConfig,
    pub remote: RemoteConfig,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: AppConfig = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`AppConfig::load`], but a missing file yields the defaults.
    pub fn load_optional(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(API_KEY_ENV).filter(|key| !key.trim().is_empty()) {
            self.remote.api_key = Some(key.trim().to_string());
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.viewer.page_extent.is_finite() && self.viewer.page_extent > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "viewer.page_extent must be positive, got {}",
                self.viewer.page_extent
            )));
        }
        let scales = self
            .viewer
            .breakpoints
            .iter()
            .map(|bp| bp.scale)
            .chain(std::iter::once(self.viewer.default_scale));
        for scale in scales {
            if !(scale.is_finite() && scale > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "display scales must be positive, got {}",
                    scale
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.notes.min_output_ratio) {
            return Err(ConfigError::Invalid(format!(
                "notes.min_output_ratio must be within 0..=1, got {}",
                self.notes.min_output_ratio
            )));
        }
        if self.extraction.page_timeout.is_zero() || self.notes.remote_timeout.is_zero() {
            return Err(ConfigError::Invalid("timeouts must be non-zero".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleBreakpoint {
    /// Applies to viewports narrower than this.
    pub max_width: f32,
    pub scale: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub overscan: usize,
    pub page_extent: f32,
    pub breakpoints: Vec<ScaleBreakpoint>,
    pub default_scale: f32,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            overscan: DEFAULT_OVERSCAN,
            page_extent: DEFAULT_ITEM_EXTENT,
            breakpoints: vec![
                ScaleBreakpoint {
                    max_width: 640.0,
                    scale: 0.6,
                },
                ScaleBreakpoint {
                    max_width: 768.0,
                    scale: 0.8,
                },
            ],
            default_scale: 1.0,
        }
    }
}

impl ViewerConfig {
    pub fn display_scale_for_width(&self, width: f32) -> f32 {
        let mut breakpoints = self.breakpoints.clone();
        breakpoints.sort_by(|a, b| a.max_width.total_cmp(&b.max_width));
        breakpoints
            .iter()
            .find(|bp| width < bp.max_width)
            .map(|bp| bp.scale)
            .unwrap_or(self.default_scale)
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "page_timeout_secs")]
    pub page_timeout: Duration,
    pub abort_on_page_failure: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            page_timeout: Duration::from_secs(30),
            abort_on_page_failure: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compactness {
    Dense,
    #[default]
    Compact,
    Relaxed,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotesConfig {
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "remote_timeout_secs")]
    pub remote_timeout: Duration,
    pub min_output_ratio: f32,
    pub compactness: Compactness,
    pub title: Option<String>,
}

impl Default for NotesConfig {
    fn default() -> Self {
        Self {
            remote_timeout: Duration::from_secs(10),
            min_output_ratio: 0.7,
            compactness: Compactness::Compact,
            title: Some("Notes".to_string()),
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub notes_model: String,
    pub answer_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl RemoteConfig {
    pub fn is_configured(&self) -> bool {
        self.api_key
            .as_deref()
            .map_or(false, |key| !key.trim().is_empty())
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.groq.com/openai/v1/chat/completions".to_string(),
            api_key: None,
            notes_model: "llama3-8b-8192".to_string(),
            answer_model: "llama-3.3-70b-versatile".to_string(),
            temperature: 0.3,
            max_tokens: 2000,
        }
    }
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("notes_model", &self.notes_model)
            .field("answer_model", &self.answer_model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_file_yields_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.viewer.overscan, 2);
        assert_eq!(config.notes.remote_timeout, Duration::from_secs(10));
        assert_eq!(config.notes.min_output_ratio, 0.7);
    }

    #[test]
    fn partial_sections_override_only_given_fields() {
        let config: AppConfig = toml::from_str(
            r#"
            [notes]
            remote_timeout_secs = 4
            compactness = "dense"

            [extraction]
            abort_on_page_failure = true
            "#,
        )
        .unwrap();
        assert_eq!(config.notes.remote_timeout, Duration::from_secs(4));
        assert_eq!(config.notes.compactness, Compactness::Dense);
        assert_eq!(config.notes.min_output_ratio, 0.7);
        assert!(config.extraction.abort_on_page_failure);
        assert_eq!(config.extraction.page_timeout, Duration::from_secs(30));
    }

    #[test]
    fn load_optional_tolerates_missing_file() {
        let dir = tempdir().unwrap();
        let config = AppConfig::load_optional(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(matches!(
            AppConfig::load(&dir.path().join("config.toml")),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn load_rejects_invalid_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[notes]\nmin_output_ratio = 1.5\n").unwrap();
        assert!(matches!(
            AppConfig::load(&path),
            Err(ConfigError::Invalid(_))
        ));

        std::fs::write(&path, "[viewer]\noverscan = \"many\"\n").unwrap();
        assert!(matches!(AppConfig::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn env_key_overrides_file_key() {
        let mut config = AppConfig::default();
        config.remote.api_key = Some("from-file".into());
        config.apply_env(|name| (name == API_KEY_ENV).then(|| "from-env".to_string()));
        assert_eq!(config.remote.api_key.as_deref(), Some("from-env"));

        config.apply_env(|_| Some("   ".to_string()));
        assert_eq!(config.remote.api_key.as_deref(), Some("from-env"));
        assert!(config.remote.is_configured());
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let mut remote = RemoteConfig::default();
        remote.api_key = Some("secret-value".into());
        let rendered = format!("{:?}", remote);
        assert!(!rendered.contains("secret-value"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn display_scale_follows_breakpoints() {
        let viewer = ViewerConfig::default();
        assert_eq!(viewer.display_scale_for_width(500.0), 0.6);
        assert_eq!(viewer.display_scale_for_width(700.0), 0.8);
        assert_eq!(viewer.display_scale_for_width(1024.0), 1.0);
    }
}
