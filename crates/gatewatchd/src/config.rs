use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Environment variable naming an optional TOML config file.
pub const CONFIG_PATH_VAR: &str = "GATEWATCH_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Daemon configuration.
///
/// Resolved in three layers: defaults, then the TOML file named by
/// `GATEWATCH_CONFIG` (if set), then individual `GATEWATCH_*` variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address (default: 0.0.0.0:5001).
    pub bind_addr: String,
    /// Gallery root, one folder per known subject.
    pub gallery_dir: PathBuf,
    /// Base URL of the recognition service.
    pub engine_url: String,
    /// Upper bound on a single engine call, in seconds.
    pub engine_timeout_secs: u64,
    /// Face candidates must score above this.
    pub presence_floor: f32,
    /// Maximum cosine distance for a gallery match.
    pub match_threshold: f64,
    /// Per-subject alert cooldown window.
    pub cooldown_secs: u32,
    /// Initial value of the runtime "alert on known subjects" toggle.
    pub alert_on_known: bool,
    /// Base URL of the pan/tilt/LED device. `None` keeps commands local.
    pub actuator_url: Option<String>,
    pub actuator_timeout_ms: u64,
    /// Document store base URL for alert records.
    pub document_store_url: Option<String>,
    /// Object store upload base URL for alert images.
    pub object_store_url: Option<String>,
    /// Public base URL for uploaded objects (defaults to the upload URL).
    pub object_public_url: Option<String>,
    /// `source` field written into alert records.
    pub alert_source: String,
    pub dispatch_timeout_secs: u64,
    /// Live view tick, in milliseconds.
    pub feed_interval_ms: u64,
    /// Reported by `/stats`.
    pub camera_count: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5001".to_string(),
            gallery_dir: PathBuf::from("faces_db"),
            engine_url: "http://127.0.0.1:8500".to_string(),
            engine_timeout_secs: 10,
            presence_floor: gatewatch_core::recognition::DEFAULT_PRESENCE_FLOOR,
            match_threshold: gatewatch_core::recognition::DEFAULT_MATCH_THRESHOLD,
            cooldown_secs: gatewatch_core::cooldown::DEFAULT_COOLDOWN_SECS,
            alert_on_known: false,
            actuator_url: None,
            actuator_timeout_ms: 2_000,
            document_store_url: None,
            object_store_url: None,
            object_public_url: None,
            alert_source: "ESP32-CAM".to_string(),
            dispatch_timeout_secs: 5,
            feed_interval_ms: 100,
            camera_count: 1,
        }
    }
}

/// On-disk form of [`Config`]; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    bind_addr: Option<String>,
    gallery_dir: Option<PathBuf>,
    engine_url: Option<String>,
    engine_timeout_secs: Option<u64>,
    presence_floor: Option<f32>,
    match_threshold: Option<f64>,
    cooldown_secs: Option<u32>,
    alert_on_known: Option<bool>,
    actuator_url: Option<String>,
    actuator_timeout_ms: Option<u64>,
    document_store_url: Option<String>,
    object_store_url: Option<String>,
    object_public_url: Option<String>,
    alert_source: Option<String>,
    dispatch_timeout_secs: Option<u64>,
    feed_interval_ms: Option<u64>,
    camera_count: Option<u32>,
}

impl FileConfig {
    fn read(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl Config {
    /// Load from the optional config file and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match std::env::var_os(CONFIG_PATH_VAR) {
            Some(path) => FileConfig::read(Path::new(&path))?,
            None => FileConfig::default(),
        };
        Ok(Self::resolve(file, |key| std::env::var(key).ok()))
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let text = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        Self {
            bind_addr: text("GATEWATCH_BIND").or(file.bind_addr).unwrap_or(d.bind_addr),
            gallery_dir: text("GATEWATCH_GALLERY_DIR")
                .map(PathBuf::from)
                .or(file.gallery_dir)
                .unwrap_or(d.gallery_dir),
            engine_url: text("GATEWATCH_ENGINE_URL").or(file.engine_url).unwrap_or(d.engine_url),
            engine_timeout_secs: parsed(&env, "GATEWATCH_ENGINE_TIMEOUT_SECS")
                .or(file.engine_timeout_secs)
                .unwrap_or(d.engine_timeout_secs),
            presence_floor: parsed(&env, "GATEWATCH_PRESENCE_FLOOR")
                .or(file.presence_floor)
                .unwrap_or(d.presence_floor),
            match_threshold: parsed(&env, "GATEWATCH_MATCH_THRESHOLD")
                .or(file.match_threshold)
                .unwrap_or(d.match_threshold),
            cooldown_secs: parsed(&env, "GATEWATCH_COOLDOWN_SECS")
                .or(file.cooldown_secs)
                .unwrap_or(d.cooldown_secs),
            alert_on_known: env("GATEWATCH_ALERT_ON_KNOWN")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .or(file.alert_on_known)
                .unwrap_or(d.alert_on_known),
            actuator_url: text("GATEWATCH_ACTUATOR_URL").or(file.actuator_url),
            actuator_timeout_ms: parsed(&env, "GATEWATCH_ACTUATOR_TIMEOUT_MS")
                .or(file.actuator_timeout_ms)
                .unwrap_or(d.actuator_timeout_ms),
            document_store_url: text("GATEWATCH_DOCUMENT_STORE_URL").or(file.document_store_url),
            object_store_url: text("GATEWATCH_OBJECT_STORE_URL").or(file.object_store_url),
            object_public_url: text("GATEWATCH_OBJECT_PUBLIC_URL").or(file.object_public_url),
            alert_source: text("GATEWATCH_ALERT_SOURCE")
                .or(file.alert_source)
                .unwrap_or(d.alert_source),
            dispatch_timeout_secs: parsed(&env, "GATEWATCH_DISPATCH_TIMEOUT_SECS")
                .or(file.dispatch_timeout_secs)
                .unwrap_or(d.dispatch_timeout_secs),
            feed_interval_ms: parsed(&env, "GATEWATCH_FEED_INTERVAL_MS")
                .or(file.feed_interval_ms)
                .unwrap_or(d.feed_interval_ms)
                .max(1),
            camera_count: parsed(&env, "GATEWATCH_CAMERA_COUNT")
                .or(file.camera_count)
                .unwrap_or(d.camera_count),
        }
    }

    /// Backing services that are missing; each one disables a side channel.
    pub fn degraded_reasons(&self) -> Vec<&'static str> {
        let mut reasons = Vec::new();
        if self.document_store_url.is_none() {
            reasons.push("no document store configured; alerts will not be persisted");
        }
        if self.object_store_url.is_none() {
            reasons.push("no object store configured; alert images will not be uploaded");
        }
        if self.actuator_url.is_none() {
            reasons.push("no actuator device configured; pan/tilt/LED commands stay local");
        }
        reasons
    }
}

fn parsed<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable config value");
            None
        }
    }
}
