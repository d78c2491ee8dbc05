use directories::BaseDirs;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const DEFAULT_INFERENCE_URL: &str = "https://api.regolo.ai";
pub const DEFAULT_MANAGEMENT_URL: &str = "https://devmid.regolo.ai";
pub const DEFAULT_INFERENCE_TIMEOUT: Duration = Duration::from_secs(500);
pub const DEFAULT_MANAGEMENT_TIMEOUT: Duration = Duration::from_secs(60);
const CREDENTIALS_FILE: &str = ".regolo_config.json";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("no home directory could be determined for the current user")]
    Missing,
    #[error("configuration invalid: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Missing => {
                "Could not locate your home directory; set management.credentials_path in regolo.yaml."
                    .to_string()
            }
            Self::Invalid(detail) => format!("Configuration invalid: {detail}. Update regolo.yaml."),
        }
    }
}

/// Settings for the inference endpoints, passed explicitly into every client.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub chat_model: Option<String>,
    pub embedder_model: Option<String>,
    pub image_generation_model: Option<String>,
    pub audio_transcription_model: Option<String>,
    pub reranker_model: Option<String>,
    pub enable_model_checks: bool,
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_INFERENCE_URL.to_string(),
            chat_model: None,
            embedder_model: None,
            image_generation_model: None,
            audio_transcription_model: None,
            reranker_model: None,
            enable_model_checks: true,
            timeout: DEFAULT_INFERENCE_TIMEOUT,
        }
    }
}

impl ClientConfig {
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, ConfigError> {
        self.base_url = normalize_base_url(base_url)?;
        Ok(self)
    }

    pub fn with_chat_model(mut self, model: impl Into<String>) -> Self {
        self.chat_model = Some(model.into());
        self
    }
}

/// Settings for the token-authenticated management API.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagementConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub credentials_path: PathBuf,
}

impl ManagementConfig {
    pub fn new(credentials_path: PathBuf) -> Self {
        Self {
            base_url: DEFAULT_MANAGEMENT_URL.to_string(),
            timeout: DEFAULT_MANAGEMENT_TIMEOUT,
            credentials_path,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, ConfigError> {
        self.base_url = normalize_base_url(base_url)?;
        Ok(self)
    }
}

/// Fully resolved configuration for one process.
#[derive(Debug, Clone)]
pub struct Settings {
    pub inference: ClientConfig,
    pub management: ManagementConfig,
}

impl Settings {
    /// Reads `regolo.yaml` (if any), then applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match locate_config_file() {
            Some(path) => {
                let contents = fs::read_to_string(&path).map_err(|err| {
                    ConfigError::Invalid(format!("failed to read {}: {err}", path.display()))
                })?;
                parse_config_file(&contents)?
            }
            None => RegoloConfigFile::default(),
        };
        let mut settings = resolve_settings(file, default_credentials_path()?)?;
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Applies the environment variable overrides through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(key) = non_empty("API_KEY") {
            self.inference.api_key = Some(key);
        }
        if let Some(model) = non_empty("LLM") {
            self.inference.chat_model = Some(model);
        }
        if let Some(model) = non_empty("EMBEDDER_MODEL") {
            self.inference.embedder_model = Some(model);
        }
        if let Some(model) = non_empty("IMAGE_GENERATION_MODEL") {
            self.inference.image_generation_model = Some(model);
        }
        if let Some(model) = non_empty("AUDIO_TRANSCRIPTION_MODEL") {
            self.inference.audio_transcription_model = Some(model);
        }
        if let Some(model) = non_empty("RERANKER_MODEL") {
            self.inference.reranker_model = Some(model);
        }
        if let Some(url) = non_empty("REGOLO_BASE_URL") {
            self.inference.base_url = normalize_base_url(&url)?;
        }
        if let Some(url) = non_empty("REGOLO_MANAGEMENT_URL") {
            self.management.base_url = normalize_base_url(&url)?;
        }
        Ok(())
    }
}

/// Loads a `.env` file from the working directory if one exists.
pub fn load_dotenv() {
    if let Ok(path) = dotenvy::dotenv() {
        tracing::debug!(path = %path.display(), "loaded environment file");
    }
}

pub fn default_credentials_path() -> Result<PathBuf, ConfigError> {
    BaseDirs::new()
        .map(|base| base.home_dir().join(CREDENTIALS_FILE))
        .ok_or(ConfigError::Missing)
}

pub fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim();
    let parsed = Url::parse(trimmed)
        .map_err(|err| ConfigError::Invalid(format!("invalid base url `{trimmed}`: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid(format!(
            "base url `{trimmed}` must use http or https"
        )));
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

fn parse_config_file(contents: &str) -> Result<RegoloConfigFile, ConfigError> {
    if contents.trim().is_empty() {
        return Ok(RegoloConfigFile::default());
    }
    serde_yaml::from_str(contents)
        .map_err(|err| ConfigError::Invalid(format!("invalid regolo.yaml: {err}")))
}

fn resolve_settings(
    file: RegoloConfigFile,
    fallback_credentials: PathBuf,
) -> Result<Settings, ConfigError> {
    let section = file.inference.unwrap_or_default();
    let mut inference = ClientConfig::default();
    if let Some(url) = section.base_url.as_deref() {
        inference.base_url = normalize_base_url(url)?;
    }
    inference.api_key = section.api_key.filter(|key| !key.trim().is_empty());
    inference.chat_model = section.chat_model;
    inference.embedder_model = section.embedder_model;
    inference.image_generation_model = section.image_generation_model;
    inference.audio_transcription_model = section.audio_transcription_model;
    inference.reranker_model = section.reranker_model;
    if let Some(enabled) = section.enable_model_checks {
        inference.enable_model_checks = enabled;
    }
    if let Some(secs) = section.timeout_secs {
        inference.timeout = timeout_from_secs(secs)?;
    }

    let section = file.management.unwrap_or_default();
    let mut management =
        ManagementConfig::new(section.credentials_path.unwrap_or(fallback_credentials));
    if let Some(url) = section.base_url.as_deref() {
        management.base_url = normalize_base_url(url)?;
    }
    if let Some(secs) = section.timeout_secs {
        management.timeout = timeout_from_secs(secs)?;
    }

    Ok(Settings {
        inference,
        management,
    })
}

fn timeout_from_secs(secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::Invalid("timeout_secs must be positive".to_string()));
    }
    Ok(Duration::from_secs(secs))
}

fn locate_config_file() -> Option<PathBuf> {
    regolo_yaml_candidates()
        .into_iter()
        .find(|path| path.exists())
}

fn regolo_yaml_candidates() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(base) = BaseDirs::new() {
        let config_dir = base.config_dir().join("regolo");
        paths.push(config_dir.join("regolo.yaml"));
        paths.push(config_dir.join("regolo.yml"));
        let home_dir = base.home_dir();
        paths.push(home_dir.join(".regolo").join("regolo.yaml"));
        paths.push(home_dir.join(".regolo").join("regolo.yml"));
    } else {
        paths.push(PathBuf::from("regolo.yaml"));
        paths.push(PathBuf::from("regolo.yml"));
    }
    paths
}

#[derive(Debug, Default, Deserialize)]
struct RegoloConfigFile {
    inference: Option<InferenceSection>,
    management: Option<ManagementSection>,
}

#[derive(Debug, Default, Deserialize)]
struct InferenceSection {
    api_key: Option<String>,
    base_url: Option<String>,
    chat_model: Option<String>,
    embedder_model: Option<String>,
    image_generation_model: Option<String>,
    audio_transcription_model: Option<String>,
    reranker_model: Option<String>,
    enable_model_checks: Option<bool>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ManagementSection {
    base_url: Option<String>,
    timeout_secs: Option<u64>,
    credentials_path: Option<PathBuf>,
}
