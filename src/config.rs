//! Configuration for ocrbridge.
//!
//! Loaded from `ocrbridge.toml` (explicit path, current directory, or the
//! user config directory), then overridden from the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dispatch::RetryPolicy;
use crate::ocr::{OcrError, OutputFormat, PreprocessOptions, QualityMode, TextLayout};
use crate::pipeline::{DispatchMode, DualChannelOptions};
use crate::provider::ProviderKind;

/// Config file name searched for in each location.
pub const FILE_NAME: &str = "ocrbridge.toml";

/// Subdirectory of the platform config dir.
const APP_DIR: &str = "ocrbridge";

/// Whether a local detector supplies geometry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecognitionMode {
    /// Whole image to the remote model only.
    #[default]
    Remote,
    /// Local detector for geometry, remote model for text.
    Dual,
}

impl RecognitionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecognitionMode::Remote => "remote",
            RecognitionMode::Dual => "dual",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "remote" | "remote_only" | "remote-only" => Some(RecognitionMode::Remote),
            "dual" | "dual_channel" | "dual-channel" => Some(RecognitionMode::Dual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub recognition: RecognitionConfig,
    #[serde(default)]
    pub dual_channel: DualChannelConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detector: Option<DetectorConfig>,
}

/// Remote vision vendor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Overrides the vendor's default base URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// HTTP, HTTPS or SOCKS proxy URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Images recognized at once in batch mode.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_provider() -> String {
    ProviderKind::OpenAi.as_str().to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_max_concurrency() -> usize {
    3
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider(),
            model: None,
            api_key: None,
            endpoint: None,
            timeout_secs: default_timeout_secs(),
            proxy: None,
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionConfig {
    #[serde(default)]
    pub mode: RecognitionMode,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default)]
    pub text_layout: TextLayout,
    #[serde(default)]
    pub image_quality: QualityMode,
    /// Longest edge in pixels before the image is sent.
    #[serde(default = "default_max_image_size")]
    pub max_image_size: u32,
}

fn default_language() -> String {
    "auto".to_string()
}

fn default_max_image_size() -> u32 {
    crate::ocr::preprocess::DEFAULT_MAX_IMAGE_SIZE
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            mode: RecognitionMode::default(),
            language: default_language(),
            output_format: OutputFormat::default(),
            text_layout: TextLayout::default(),
            image_quality: QualityMode::default(),
            max_image_size: default_max_image_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DualChannelConfig {
    #[serde(default)]
    pub dispatch: DispatchMode,
    #[serde(default = "default_max_boxes")]
    pub max_boxes: usize,
    #[serde(default = "default_min_box_area")]
    pub min_box_area: f64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_local_accept_score")]
    pub local_accept_score: f64,
    #[serde(default = "default_crop_padding")]
    pub crop_padding: u32,
    #[serde(default = "default_detect_timeout_secs")]
    pub detect_timeout_secs: u64,
}

fn default_max_boxes() -> usize {
    64
}

fn default_min_box_area() -> f64 {
    16.0
}

fn default_workers() -> usize {
    4
}

fn default_local_accept_score() -> f64 {
    0.95
}

fn default_crop_padding() -> u32 {
    4
}

fn default_detect_timeout_secs() -> u64 {
    15
}

impl Default for DualChannelConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchMode::default(),
            max_boxes: default_max_boxes(),
            min_box_area: default_min_box_area(),
            workers: default_workers(),
            local_accept_score: default_local_accept_score(),
            crop_padding: default_crop_padding(),
            detect_timeout_secs: default_detect_timeout_secs(),
        }
    }
}

/// External detector command; `{image}` in `args` is replaced by the image path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Config {
    /// Load configuration, trying `explicit` first, then the standard locations.
    ///
    /// A missing file is not an error; defaults apply. Environment overrides
    /// are applied last.
    pub fn load(explicit: Option<&Path>) -> Result<Self, OcrError> {
        let mut config = match explicit {
            Some(path) => Self::load_from_path(path)?,
            None => match find_config_file() {
                Some(path) => Self::load_from_path(&path)?,
                None => {
                    debug!("No {} found, using defaults", FILE_NAME);
                    Self::default()
                }
            },
        };
        config.apply_env();
        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, OcrError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            OcrError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        debug!("Loaded config from {}", path.display());
        Self::from_toml_str(&content).map_err(|e| match e {
            OcrError::Configuration(msg) => {
                OcrError::Configuration(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, OcrError> {
        toml::from_str(content).map_err(|e| OcrError::Configuration(e.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String, OcrError> {
        toml::to_string_pretty(self).map_err(|e| OcrError::Configuration(e.to_string()))
    }

    /// Apply `OCRBRIDGE_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env_from<F>(&mut self, get: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        if let Some(name) = get("OCRBRIDGE_PROVIDER") {
            self.provider.name = name;
        }
        if let Some(model) = get("OCRBRIDGE_MODEL") {
            self.provider.model = Some(model);
        }
        if let Some(key) = get("OCRBRIDGE_API_KEY") {
            self.provider.api_key = Some(key);
        }
        if let Some(endpoint) = get("OCRBRIDGE_ENDPOINT") {
            self.provider.endpoint = Some(endpoint);
        }
        if let Some(proxy) = get("OCRBRIDGE_PROXY") {
            self.provider.proxy = Some(proxy);
        }

        self.fill_vendor_key(get);
    }

    /// Switch to another provider, dropping the previous vendor's key, model
    /// and endpoint. The key is looked up again from the environment.
    pub fn switch_provider(&mut self, name: &str) {
        self.switch_provider_from(name, |key| std::env::var(key).ok());
    }

    pub fn switch_provider_from<F>(&mut self, name: &str, get: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.provider.name.eq_ignore_ascii_case(name.trim()) {
            return;
        }
        self.provider.name = name.trim().to_string();
        self.provider.model = None;
        self.provider.endpoint = None;
        self.provider.api_key = get("OCRBRIDGE_API_KEY").filter(|v| !v.trim().is_empty());
        self.fill_vendor_key(|key| get(key).filter(|v| !v.trim().is_empty()));
    }

    fn fill_vendor_key<F>(&mut self, get: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.provider.api_key.is_some() {
            return;
        }
        if let Some(kind) = ProviderKind::from_str(&self.provider.name) {
            if let Some(key) = get(&kind.key_env_var()) {
                debug!("Using API key from {}", kind.key_env_var());
                self.provider.api_key = Some(key);
            }
        }
    }

    pub fn provider_kind(&self) -> Result<ProviderKind, OcrError> {
        ProviderKind::from_str(&self.provider.name).ok_or_else(|| {
            OcrError::Configuration(format!("Unsupported provider: {}", self.provider.name))
        })
    }

    /// Check everything a session needs before any request is made.
    pub fn validate(&self) -> Result<(), OcrError> {
        self.validate_provider()?;

        if self.recognition.mode == RecognitionMode::Dual {
            let has_command = self
                .detector
                .as_ref()
                .is_some_and(|d| !d.command.trim().is_empty());
            if !has_command {
                return Err(OcrError::Configuration(
                    "dual mode requires a [detector] command".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Provider and pool checks, without the detector requirement.
    pub fn validate_provider(&self) -> Result<(), OcrError> {
        let kind = self.provider_kind()?;
        let profile = kind.profile();

        let has_key = self
            .provider
            .api_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty());
        if kind.requires_credential() && !has_key {
            return Err(OcrError::Configuration(format!(
                "{} requires an API key (set provider.api_key or {})",
                profile.display_name,
                kind.key_env_var()
            )));
        }

        let has_model = self
            .provider
            .model
            .as_deref()
            .is_some_and(|m| !m.trim().is_empty());
        if !has_model && profile.default_model.is_none() {
            return Err(OcrError::Configuration(format!(
                "{} has no default model; set provider.model",
                profile.display_name
            )));
        }

        if self.provider.max_concurrency == 0 {
            return Err(OcrError::Configuration(
                "provider.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.dual_channel.workers == 0 {
            return Err(OcrError::Configuration(
                "dual_channel.workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.provider.timeout_secs)
    }

    pub fn preprocess_options(&self) -> PreprocessOptions {
        PreprocessOptions {
            max_size: self.recognition.max_image_size,
            quality: self.recognition.image_quality,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.provider.max_retries,
            Duration::from_millis(self.provider.retry_delay_ms),
        )
    }

    pub fn dual_channel_options(&self) -> DualChannelOptions {
        let dc = &self.dual_channel;
        DualChannelOptions {
            dispatch: dc.dispatch,
            max_boxes: dc.max_boxes,
            min_box_area: dc.min_box_area,
            workers: dc.workers,
            local_accept_score: dc.local_accept_score,
            crop_padding: dc.crop_padding,
            detect_timeout: Duration::from_secs(dc.detect_timeout_secs),
            language: self.recognition.language.clone(),
            text_layout: self.recognition.text_layout,
        }
    }
}

/// First existing config file among the standard locations.
fn find_config_file() -> Option<PathBuf> {
    candidate_paths().into_iter().find(|p| p.is_file())
}

fn candidate_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join(FILE_NAME));
    }
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join(APP_DIR).join(FILE_NAME));
    }
    paths
}
