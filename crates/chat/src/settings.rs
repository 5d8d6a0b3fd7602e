use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use transgpt_llm::{
    DEFAULT_LOCAL_RUNNER, DEFAULT_OPENAI_MODEL, LocalGenerationParams, ModelCatalog,
    ProviderConfig,
};

use crate::audio::{AudioFormat, DEFAULT_FRAMES_PER_BUFFER, DEFAULT_SAMPLE_RATE};
use crate::message::{DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, GenerationParams};

pub const DEFAULT_PROVIDER_ID: &str = "openai";
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
pub const SETTINGS_DIRECTORY_NAME: &str = "transgpt";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "TRANSGPT_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub provider_id: String,
    pub api_key: String,
    pub endpoint: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            provider_id: DEFAULT_PROVIDER_ID.to_string(),
            api_key: String::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub temperature: f64,
    pub max_tokens: Option<u64>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: Some(DEFAULT_MAX_TOKENS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSettings {
    pub runner: PathBuf,
    pub model_path: Option<PathBuf>,
    pub params: LocalGenerationParams,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            runner: PathBuf::from(DEFAULT_LOCAL_RUNNER),
            model_path: None,
            params: LocalGenerationParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub sample_rate: u32,
    pub frames_per_buffer: usize,
    pub records_dir: PathBuf,
    /// WAV file replayed as the microphone by the terminal front-end.
    pub input_file: Option<PathBuf>,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            frames_per_buffer: DEFAULT_FRAMES_PER_BUFFER,
            records_dir: PathBuf::from("records"),
            input_file: None,
        }
    }
}

impl AudioSettings {
    pub fn format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate: self.sample_rate,
            channels: 1,
            frames_per_buffer: self.frames_per_buffer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub provider: ProviderSettings,
    pub models: Vec<String>,
    pub generation: GenerationSettings,
    pub local: LocalSettings,
    pub audio: AudioSettings,
    pub languages: Vec<String>,
    pub export_dir: PathBuf,
    pub stream_idle_timeout_secs: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: ProviderSettings::default(),
            models: vec![DEFAULT_OPENAI_MODEL.to_string(), "gpt-4".to_string()],
            generation: GenerationSettings::default(),
            local: LocalSettings::default(),
            audio: AudioSettings::default(),
            languages: default_languages(),
            export_dir: PathBuf::from("."),
            stream_idle_timeout_secs: None,
        }
    }
}

impl Settings {
    pub fn to_provider_config(&self) -> Option<ProviderConfig> {
        if self.provider.api_key.trim().is_empty() {
            return None;
        }

        Some(ProviderConfig::new(
            &self.provider.provider_id,
            &self.provider.api_key,
            &self.provider.endpoint,
        ))
    }

    pub fn has_api_key(&self) -> bool {
        !self.provider.api_key.trim().is_empty()
    }

    pub fn model_catalog(&self) -> ModelCatalog {
        ModelCatalog::from_configured(&self.models)
    }

    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.generation.temperature,
            max_tokens: self.generation.max_tokens.filter(|tokens| *tokens > 0),
        }
    }

    pub fn stream_idle_timeout(&self) -> Option<Duration> {
        self.stream_idle_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn normalized(mut self) -> Self {
        let provider_id = self.provider.provider_id.trim();
        self.provider.provider_id = if provider_id.is_empty() {
            DEFAULT_PROVIDER_ID.to_string()
        } else {
            provider_id.to_string()
        };
        self.provider.api_key = self.provider.api_key.trim().to_string();
        let endpoint = self.provider.endpoint.trim();
        self.provider.endpoint = if endpoint.is_empty() {
            DEFAULT_ENDPOINT.to_string()
        } else {
            endpoint.to_string()
        };

        self.models = self
            .models
            .into_iter()
            .map(|model| model.trim().to_string())
            .filter(|model| !model.is_empty())
            .collect();
        if self.models.is_empty() {
            self.models.push(DEFAULT_OPENAI_MODEL.to_string());
        }

        if !self.generation.temperature.is_finite() || self.generation.temperature < 0.0 {
            self.generation.temperature = DEFAULT_TEMPERATURE;
        }

        self.languages = self
            .languages
            .into_iter()
            .map(|language| language.trim().to_string())
            .filter(|language| !language.is_empty())
            .collect();
        if self.languages.is_empty() {
            self.languages = default_languages();
        }

        if self.audio.sample_rate == 0 {
            self.audio.sample_rate = DEFAULT_SAMPLE_RATE;
        }
        if self.audio.frames_per_buffer == 0 {
            self.audio.frames_per_buffer = DEFAULT_FRAMES_PER_BUFFER;
        }

        self
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<Settings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".transgpt"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: Settings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    fn load_from(path: &Path) -> Settings {
        if !path.exists() {
            tracing::info!(path = %path.display(), "settings file not found, using defaults");
        }

        let figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        match figment.extract::<Settings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %error,
                    "failed to parse settings, using defaults"
                );
                Settings::default()
            }
        }
    }

    fn persist(&self, settings: &Settings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!(path = %self.config_path.display(), "saved settings");
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn default_languages() -> Vec<String> {
    ["English", "Chinese", "Japanese", "French", "German", "Spanish"]
        .into_iter()
        .map(str::to_string)
        .collect()
}
