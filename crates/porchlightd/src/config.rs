use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Daemon configuration: an optional TOML file, then `PORCHLIGHT_*`
/// environment overrides.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Detector tag recorded on every arrival.
    pub detector: String,
    /// Minimum person-detection score that counts as an arrival.
    pub min_confidence: f64,
    /// Detections closer than this to the last arrival are dropped.
    pub duplicate_window_secs: u64,
    /// Local hour (0-23) of the nightly routine recompute.
    pub recompute_hour: u32,
    /// Also recompute the routine right after each logged arrival.
    pub recompute_on_arrival: bool,
    pub greeting_enabled: bool,
    /// Playback volume handed to the speech command, 0.0 to 1.0.
    pub greeting_volume: f32,
    pub greeting_poll_secs: u64,
    pub greeting_cooldown_secs: u64,
    pub user_name: Option<String>,
    /// Text-to-speech program; the greeting text is appended as the last argument.
    pub tts_command: Option<String>,
    /// Euclidean distance at which a face match scores zero.
    pub face_match_threshold: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: porchlight_store::default_db_path(),
            detector: porchlight_core::logger::DEFAULT_DETECTOR.to_string(),
            min_confidence: 0.7,
            duplicate_window_secs: 60,
            recompute_hour: 2,
            recompute_on_arrival: false,
            greeting_enabled: true,
            greeting_volume: 0.8,
            greeting_poll_secs: 60,
            greeting_cooldown_secs: 300,
            user_name: None,
            tts_command: None,
            face_match_threshold: porchlight_core::profile::DEFAULT_MATCH_THRESHOLD,
        }
    }
}

impl Config {
    /// Load the config file (if any) and apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match config_file_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Override fields from `PORCHLIGHT_*` variables found through `var`.
    /// Values that fail to parse are ignored.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(path) = var("PORCHLIGHT_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        if let Some(detector) = var("PORCHLIGHT_DETECTOR") {
            self.detector = detector;
        }
        env_parse(&var, "PORCHLIGHT_MIN_CONFIDENCE", &mut self.min_confidence);
        env_parse(&var, "PORCHLIGHT_DUPLICATE_WINDOW_SECS", &mut self.duplicate_window_secs);
        env_parse(&var, "PORCHLIGHT_RECOMPUTE_HOUR", &mut self.recompute_hour);
        if let Some(v) = var("PORCHLIGHT_RECOMPUTE_ON_ARRIVAL") {
            self.recompute_on_arrival = env_flag(&v);
        }
        if let Some(v) = var("PORCHLIGHT_GREETING_ENABLED") {
            self.greeting_enabled = env_flag(&v);
        }
        env_parse(&var, "PORCHLIGHT_GREETING_VOLUME", &mut self.greeting_volume);
        env_parse(&var, "PORCHLIGHT_GREETING_POLL_SECS", &mut self.greeting_poll_secs);
        env_parse(&var, "PORCHLIGHT_GREETING_COOLDOWN_SECS", &mut self.greeting_cooldown_secs);
        if let Some(name) = var("PORCHLIGHT_USER_NAME") {
            self.user_name = Some(name);
        }
        if let Some(cmd) = var("PORCHLIGHT_TTS_COMMAND") {
            self.tts_command = Some(cmd);
        }
        env_parse(&var, "PORCHLIGHT_FACE_MATCH_THRESHOLD", &mut self.face_match_threshold);
    }

    /// Local time of the nightly recompute; out-of-range hours fall back to 02:00.
    pub fn recompute_at(&self) -> chrono::NaiveTime {
        chrono::NaiveTime::from_hms_opt(self.recompute_hour, 0, 0)
            .or_else(|| chrono::NaiveTime::from_hms_opt(2, 0, 0))
            .unwrap_or_default()
    }

    pub fn duplicate_window(&self) -> Duration {
        Duration::from_secs(self.duplicate_window_secs)
    }

    pub fn greeting_poll_interval(&self) -> Duration {
        Duration::from_secs(self.greeting_poll_secs.max(1))
    }

    pub fn greeting_cooldown(&self) -> Duration {
        Duration::from_secs(self.greeting_cooldown_secs)
    }
}

/// `$PORCHLIGHT_CONFIG`, else `$XDG_CONFIG_HOME/porchlight/config.toml`,
/// else `~/.config/porchlight/config.toml`.
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("PORCHLIGHT_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let config_dir = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|_| std::env::var("HOME").map(|home| PathBuf::from(home).join(".config")))
        .ok()?;
    Some(config_dir.join("porchlight").join("config.toml"))
}

fn env_flag(value: &str) -> bool {
    !matches!(value.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off")
}

fn env_parse<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = var(key) else {
        return;
    };
    match raw.parse() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable environment override"),
    }
}
