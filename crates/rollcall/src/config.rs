use rollcall_core::session::SessionConfig;
use rollcall_hw::CameraSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";
pub const MASK_MODEL_FILE: &str = "mask_detector.onnx";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Optional keys of the TOML config file. Every key mirrors a
/// `ROLLCALL_*` environment variable.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    source: Option<String>,
    frame_width: Option<u32>,
    frame_height: Option<u32>,
    model_dir: Option<PathBuf>,
    roster: Option<PathBuf>,
    record_dir: Option<PathBuf>,
    similarity_threshold: Option<f32>,
    mask_threshold: Option<f32>,
    process_every: Option<usize>,
    banner_ms: Option<u64>,
    read_timeout_ms: Option<u64>,
    max_source_errors: Option<u32>,
    warmup_frames: Option<u32>,
    preview_path: Option<PathBuf>,
    preview_every: Option<u32>,
}

/// Command-line values; `None` leaves the lower layers in charge.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub config: Option<PathBuf>,
    pub source: Option<String>,
    pub roster: Option<PathBuf>,
    pub record_dir: Option<PathBuf>,
    pub threshold: Option<f32>,
    pub process_every: Option<usize>,
    pub preview: Option<PathBuf>,
}

/// Resolved application configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// V4L2 device path, or a directory of images to replay.
    pub source: String,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// JSON roster of enrolled embeddings.
    pub roster_path: PathBuf,
    /// Where attendance reports are written.
    pub record_dir: PathBuf,
    /// Cosine similarity threshold for a positive match.
    pub similarity_threshold: f32,
    pub mask_threshold: f32,
    pub process_every: usize,
    pub banner_ms: u64,
    pub read_timeout_ms: u64,
    pub max_source_errors: u32,
    /// Frames discarded after opening the camera (AGC/AE stabilisation).
    pub warmup_frames: u32,
    /// JPEG preview target; `None` disables the preview.
    pub preview_path: Option<PathBuf>,
    /// Write the preview every Nth presented frame.
    pub preview_every: u32,
}

impl Config {
    /// Built-in defaults, with data files under `data_dir`.
    pub fn defaults(data_dir: &Path) -> Self {
        Self {
            source: "/dev/video0".to_string(),
            frame_width: 640,
            frame_height: 480,
            model_dir: data_dir.join("models"),
            roster_path: data_dir.join("roster.json"),
            record_dir: PathBuf::from("attendance-records"),
            similarity_threshold: 0.6,
            mask_threshold: 0.99,
            process_every: 3,
            banner_ms: 1000,
            read_timeout_ms: 2000,
            max_source_errors: 5,
            warmup_frames: 4,
            preview_path: None,
            preview_every: 15,
        }
    }

    /// Load configuration: defaults, then the TOML file, then `ROLLCALL_*`
    /// environment variables, then command-line overrides.
    pub fn load(overrides: &Overrides) -> Result<Self, ConfigError> {
        Self::load_with(overrides, |key| std::env::var(key).ok())
    }

    /// [`load`](Self::load) with an injectable environment lookup.
    pub fn load_with(overrides: &Overrides, env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::defaults(&data_dir(&env));

        let file_path = overrides
            .config
            .clone()
            .or_else(|| env("ROLLCALL_CONFIG").map(PathBuf::from));
        if let Some(path) = file_path {
            config.apply_file(read_file(&path)?);
            tracing::debug!(path = %path.display(), "applied config file");
        }

        config.apply_env(&env);
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, file: FileConfig) {
        let FileConfig {
            source,
            frame_width,
            frame_height,
            model_dir,
            roster,
            record_dir,
            similarity_threshold,
            mask_threshold,
            process_every,
            banner_ms,
            read_timeout_ms,
            max_source_errors,
            warmup_frames,
            preview_path,
            preview_every,
        } = file;

        set(&mut self.source, source);
        set(&mut self.frame_width, frame_width);
        set(&mut self.frame_height, frame_height);
        set(&mut self.model_dir, model_dir);
        set(&mut self.roster_path, roster);
        set(&mut self.record_dir, record_dir);
        set(&mut self.similarity_threshold, similarity_threshold);
        set(&mut self.mask_threshold, mask_threshold);
        set(&mut self.process_every, process_every);
        set(&mut self.banner_ms, banner_ms);
        set(&mut self.read_timeout_ms, read_timeout_ms);
        set(&mut self.max_source_errors, max_source_errors);
        set(&mut self.warmup_frames, warmup_frames);
        set(&mut self.preview_every, preview_every);
        if preview_path.is_some() {
            self.preview_path = preview_path;
        }
    }

    fn apply_env(&mut self, env: &impl Fn(&str) -> Option<String>) {
        set(&mut self.source, env("ROLLCALL_SOURCE"));
        set(&mut self.model_dir, env("ROLLCALL_MODEL_DIR").map(PathBuf::from));
        set(&mut self.roster_path, env("ROLLCALL_ROSTER").map(PathBuf::from));
        set(&mut self.record_dir, env("ROLLCALL_RECORD_DIR").map(PathBuf::from));
        set(&mut self.similarity_threshold, env_parse(env, "ROLLCALL_SIMILARITY_THRESHOLD"));
        set(&mut self.mask_threshold, env_parse(env, "ROLLCALL_MASK_THRESHOLD"));
        set(&mut self.process_every, env_parse(env, "ROLLCALL_PROCESS_EVERY"));
        set(&mut self.banner_ms, env_parse(env, "ROLLCALL_BANNER_MS"));
        set(&mut self.read_timeout_ms, env_parse(env, "ROLLCALL_READ_TIMEOUT_MS"));
        set(&mut self.max_source_errors, env_parse(env, "ROLLCALL_MAX_SOURCE_ERRORS"));
        set(&mut self.warmup_frames, env_parse(env, "ROLLCALL_WARMUP_FRAMES"));
        set(&mut self.frame_width, env_parse(env, "ROLLCALL_FRAME_WIDTH"));
        set(&mut self.frame_height, env_parse(env, "ROLLCALL_FRAME_HEIGHT"));
        set(&mut self.preview_every, env_parse(env, "ROLLCALL_PREVIEW_EVERY"));
        if let Some(path) = env("ROLLCALL_PREVIEW_PATH") {
            self.preview_path = Some(PathBuf::from(path));
        }
    }

    fn apply_overrides(&mut self, o: &Overrides) {
        set(&mut self.source, o.source.clone());
        set(&mut self.roster_path, o.roster.clone());
        set(&mut self.record_dir, o.record_dir.clone());
        set(&mut self.similarity_threshold, o.threshold);
        set(&mut self.process_every, o.process_every);
        if o.preview.is_some() {
            self.preview_path = o.preview.clone();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.process_every < 1 {
            return Err(ConfigError::Invalid("process_every must be >= 1".into()));
        }
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::Invalid(format!(
                "similarity_threshold must be within [-1, 1], got {}",
                self.similarity_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.mask_threshold) {
            return Err(ConfigError::Invalid(format!(
                "mask_threshold must be within [0, 1], got {}",
                self.mask_threshold
            )));
        }
        if self.frame_width == 0 || self.frame_height == 0 {
            return Err(ConfigError::Invalid("frame size must be non-zero".into()));
        }
        if self.preview_every < 1 {
            return Err(ConfigError::Invalid("preview_every must be >= 1".into()));
        }
        Ok(())
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join(SCRFD_MODEL_FILE)
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> PathBuf {
        self.model_dir.join(ARCFACE_MODEL_FILE)
    }

    pub fn mask_model_path(&self) -> PathBuf {
        self.model_dir.join(MASK_MODEL_FILE)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            process_every: self.process_every,
            similarity_threshold: self.similarity_threshold,
            mask_threshold: self.mask_threshold,
            banner_ttl: Duration::from_millis(self.banner_ms),
            max_source_errors: self.max_source_errors,
        }
    }

    pub fn camera_settings(&self) -> CameraSettings {
        CameraSettings {
            device: self.source.clone(),
            width: self.frame_width,
            height: self.frame_height,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            warmup_frames: self.warmup_frames,
        }
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// `$XDG_DATA_HOME/rollcall`, falling back to `~/.local/share/rollcall`.
fn data_dir(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    env("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

/// Parse an environment value; unparsable values are ignored with a warning.
fn env_parse<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment value");
            None
        }
    }
}
