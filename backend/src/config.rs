use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::inference::preprocess::{INPUT_SIZE, MAX_IMAGE_SIZE};
use crate::inference::queue::MAX_QUEUE_SIZE;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Aws,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub environment: String,
    pub port: u16,
    pub model_path: PathBuf,
    pub model_version: String,
    pub queue_capacity: usize,
    pub max_image_bytes: usize,
    pub input_size: u32,
    pub images_bucket: String,
    pub predictions_table: String,
    pub storage: StorageBackend,
    #[serde(skip_serializing)]
    pub jwt_secret: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            port: 8080,
            model_path: PathBuf::from("/app/model/banana_disease_model.pt"),
            model_version: "1.0.0".to_string(),
            queue_capacity: MAX_QUEUE_SIZE,
            max_image_bytes: MAX_IMAGE_SIZE,
            input_size: INPUT_SIZE,
            images_bucket: "banamon-images".to_string(),
            predictions_table: "predictions".to_string(),
            storage: StorageBackend::Aws,
            jwt_secret: None,
        }
    }
}

impl ServiceConfig {
    /// Defaults, then the YAML file named by `BANAMON_CONFIG`, then
    /// environment variables (`.env` included).
    pub fn load() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let mut config = match std::env::var("BANAMON_CONFIG") {
            Ok(path) => Self::from_yaml_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("ENV") {
            self.environment = value;
        }
        if let Some(value) = lookup("PORT") {
            self.port = parse_value("PORT", value)?;
        }
        if let Some(value) = lookup("MODEL_PATH") {
            self.model_path = PathBuf::from(value);
        }
        if let Some(value) = lookup("MODEL_VERSION") {
            self.model_version = value;
        }
        if let Some(value) = lookup("MAX_QUEUE_SIZE") {
            self.queue_capacity = parse_value("MAX_QUEUE_SIZE", value)?;
        }
        if let Some(value) = lookup("IMAGES_BUCKET") {
            self.images_bucket = value;
        }
        if let Some(value) = lookup("DYNAMODB_PREDICTIONS_TABLE") {
            self.predictions_table = value;
        }
        if let Some(value) = lookup("STORAGE_BACKEND") {
            self.storage = match value.as_str() {
                "aws" => StorageBackend::Aws,
                "memory" => StorageBackend::Memory,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "STORAGE_BACKEND",
                        value,
                    });
                }
            };
        }
        if let Some(value) = lookup("JWT_SECRET") {
            self.jwt_secret = Some(value);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.input_size == 0 {
            return Err(ConfigError::Invalid(
                "input_size must be at least 1".to_string(),
            ));
        }
        if self.max_image_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_image_bytes must be at least 1".to_string(),
            ));
        }
        if self.jwt_secret.as_deref() == Some("") {
            return Err(ConfigError::Invalid("JWT_SECRET is empty".to_string()));
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn log_filter(&self) -> &'static str {
        if self.is_production() { "info" } else { "debug" }
    }
}

fn parse_value<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}
