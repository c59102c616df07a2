use crate::types::{Instrument, SkillLevel};
use crate::verify::{DEFAULT_MAX_AUDIO_BYTES, DEFAULT_MIN_AUDIO_BYTES};
use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

const CONFIG_FILE_NAME: &str = "config.toml";
const ENV_CONFIG_PATH: &str = "ETUDE_CONFIG_PATH";
const ENV_BASE_URL: &str = "ETUDE_BASE_URL";
const ENV_ARTIFACT_DIR: &str = "ETUDE_ARTIFACT_DIR";
const ENV_REQUEST_TIMEOUT: &str = "ETUDE_REQUEST_TIMEOUT";
const ENV_FALLBACK_PLAYER: &str = "ETUDE_FALLBACK_PLAYER";

#[derive(Debug, Clone)]
pub struct AppConfig {
    base_url: Option<String>,
    artifact_dir: PathBuf,
    verify_timeout: Duration,
    request_timeout: Duration,
    chat_timeout: Duration,
    min_audio_bytes: u64,
    max_audio_bytes: u64,
    fallback_player: Vec<String>,
    autoplay: bool,
    default_instrument: Instrument,
    default_level: SkillLevel,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        let path = match config_file_override() {
            Some(path) => Some(path),
            None => Self::default_config_path().ok(),
        };
        if let Some(path) = path {
            if path.exists() {
                let partial = read_partial(&path)?;
                config.apply_partial(partial);
            }
        }

        config.apply_env()?;
        Ok(config)
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub fn artifact_dir(&self) -> &PathBuf {
        &self.artifact_dir
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.artifact_dir.join("cache")
    }

    pub fn verify_timeout(&self) -> Duration {
        self.verify_timeout
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn chat_timeout(&self) -> Duration {
        self.chat_timeout
    }

    pub fn min_audio_bytes(&self) -> u64 {
        self.min_audio_bytes
    }

    pub fn max_audio_bytes(&self) -> u64 {
        self.max_audio_bytes
    }

    pub fn fallback_player(&self) -> &[String] {
        &self.fallback_player
    }

    pub fn autoplay(&self) -> bool {
        self.autoplay
    }

    pub fn default_instrument(&self) -> Instrument {
        self.default_instrument
    }

    pub fn default_level(&self) -> SkillLevel {
        self.default_level
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("com", "Etude", "Etude")
            .ok_or_else(|| anyhow!("unable to determine config directory"))?;
        Ok(dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    fn apply_partial(&mut self, partial: PartialConfig) {
        if let Some(url) = partial.base_url {
            self.base_url = Some(url);
        }
        if let Some(dir) = partial.artifact_dir {
            self.artifact_dir = dir;
        }
        if let Some(secs) = partial.verify_timeout_secs {
            self.verify_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = partial.request_timeout_secs {
            self.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = partial.chat_timeout_secs {
            self.chat_timeout = Duration::from_secs(secs);
        }
        if let Some(bytes) = partial.min_audio_bytes {
            self.min_audio_bytes = bytes;
        }
        if let Some(bytes) = partial.max_audio_bytes {
            self.max_audio_bytes = bytes;
        }
        if let Some(command) = partial.fallback_player.filter(|command| !command.is_empty()) {
            self.fallback_player = command;
        }
        if let Some(autoplay) = partial.autoplay {
            self.autoplay = autoplay;
        }
        if let Some(instrument) = partial.default_instrument {
            self.default_instrument = instrument;
        }
        if let Some(level) = partial.default_level {
            self.default_level = level;
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup(ENV_BASE_URL) {
            if value.trim().is_empty() {
                self.base_url = None;
            } else {
                self.base_url = Some(value);
            }
        }
        if let Some(value) = lookup(ENV_ARTIFACT_DIR) {
            if !value.trim().is_empty() {
                self.artifact_dir = PathBuf::from(value);
            }
        }
        if let Some(value) = lookup(ENV_REQUEST_TIMEOUT) {
            if !value.trim().is_empty() {
                let secs = value
                    .trim()
                    .parse::<u64>()
                    .context("ETUDE_REQUEST_TIMEOUT must be a whole number of seconds")?;
                self.request_timeout = Duration::from_secs(secs);
            }
        }
        if let Some(value) = lookup(ENV_FALLBACK_PLAYER) {
            let command: Vec<String> = value.split_whitespace().map(str::to_string).collect();
            if !command.is_empty() {
                self.fallback_player = command;
            }
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            artifact_dir: default_artifact_dir(),
            verify_timeout: Duration::from_secs(15),
            request_timeout: Duration::from_secs(120),
            chat_timeout: Duration::from_secs(60),
            min_audio_bytes: DEFAULT_MIN_AUDIO_BYTES,
            max_audio_bytes: DEFAULT_MAX_AUDIO_BYTES,
            fallback_player: ["ffplay", "-nodisp", "-autoexit", "-loglevel", "quiet"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            autoplay: true,
            default_instrument: Instrument::Trumpet,
            default_level: SkillLevel::Intermediate,
        }
    }
}

fn config_file_override() -> Option<PathBuf> {
    let value = env::var_os(ENV_CONFIG_PATH)?;
    if value.is_empty() {
        return None;
    }
    let path = PathBuf::from(value);
    if path.is_dir() {
        return Some(path.join(CONFIG_FILE_NAME));
    }
    Some(path)
}

fn read_partial(path: &Path) -> Result<PartialConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let partial: PartialConfig =
        toml::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(partial)
}

fn default_artifact_dir() -> PathBuf {
    env::var_os("HOME")
        .map(PathBuf::from)
        .map(|home| home.join("Music").join("Etude"))
        .unwrap_or_else(|| PathBuf::from("./artifacts"))
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct PartialConfig {
    base_url: Option<String>,
    artifact_dir: Option<PathBuf>,
    verify_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    chat_timeout_secs: Option<u64>,
    min_audio_bytes: Option<u64>,
    max_audio_bytes: Option<u64>,
    fallback_player: Option<Vec<String>>,
    autoplay: Option<bool>,
    default_instrument: Option<Instrument>,
    default_level: Option<SkillLevel>,
}
