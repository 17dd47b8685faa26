use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::inference::decision::ClassOrder;
use crate::inference::model::Backbone;

pub const DEFAULT_CONFIG_PATH: &str = "config/service.yaml";
pub const CONFIG_PATH_ENV: &str = "ARTDETECT_CONFIG";

#[derive(Debug, thiserror::Error)]
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
        source: serde_yaml::Error,
    },
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: String, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub preprocessing: PreprocessingConfig,
    pub validation: ValidationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
    /// Directory holding a browser front-end; served under `/static` when set.
    pub static_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub dir: PathBuf,
    /// Checkpoint file names tried in order; the first existing file wins.
    pub candidates: Vec<String>,
    pub backbone: Backbone,
    pub num_classes: i64,
    pub class_order: ClassOrder,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessingConfig {
    pub image_size: u32,
    pub use_fft: bool,
    pub fft_epsilon: f64,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub max_file_size: usize,
    pub allow_webp: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7860,
            workers: None,
            static_dir: None,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("models"),
            candidates: vec![
                "finalModel.pt".to_string(),
                "finalModel.pth".to_string(),
                "finalModel.safetensors".to_string(),
                "finalModel.ot".to_string(),
            ],
            backbone: Backbone::default(),
            num_classes: 2,
            class_order: ClassOrder::default(),
        }
    }
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            image_size: 224,
            use_fft: true,
            fft_epsilon: 1e-8,
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024,
            allow_webp: true,
        }
    }
}

impl ServiceConfig {
    /// Reads the YAML file named by `ARTDETECT_CONFIG` (or the default path when
    /// present), then applies environment overrides and validates the result.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            Err(_) => {
                log::info!("No config file found, using built-in defaults");
                Self::default()
            }
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&config_str).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_yaml(config_str: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(config_str)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = parse_var("PORT", &port)?;
        }
        if let Some(dir) = lookup("STATIC_DIR") {
            self.server.static_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = lookup("MODEL_DIR") {
            self.model.dir = PathBuf::from(dir);
        }
        if let Some(file) = lookup("MODEL_FILE") {
            self.model.candidates.retain(|name| name != &file);
            self.model.candidates.insert(0, file);
        }
        if let Some(use_fft) = lookup("USE_FFT") {
            self.preprocessing.use_fft = parse_var("USE_FFT", &use_fft)?;
        }
        if let Some(megabytes) = lookup("MAX_FILE_SIZE_MB") {
            let megabytes: usize = parse_var("MAX_FILE_SIZE_MB", &megabytes)?;
            self.validation.max_file_size = megabytes
                .checked_mul(1024 * 1024)
                .ok_or_else(|| invalid("MAX_FILE_SIZE_MB", "exceeds the addressable size"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.preprocessing.image_size == 0 {
            return Err(invalid("preprocessing.image_size", "must be greater than zero"));
        }
        if self.preprocessing.std.iter().any(|s| *s <= 0.0) {
            return Err(invalid("preprocessing.std", "every channel must be positive"));
        }
        if self.preprocessing.fft_epsilon <= 0.0 {
            return Err(invalid("preprocessing.fft_epsilon", "must be positive"));
        }
        if !matches!(self.model.num_classes, 1 | 2) {
            return Err(invalid(
                "model.num_classes",
                "only a single sigmoid output or a two-class head is supported",
            ));
        }
        if self.model.candidates.is_empty() {
            return Err(invalid("model.candidates", "at least one file name is required"));
        }
        if self.validation.max_file_size == 0 {
            return Err(invalid("validation.max_file_size", "must be greater than zero"));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        name: name.to_string(),
        reason: format!("could not parse '{}'", value),
    })
}

fn invalid(name: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}
