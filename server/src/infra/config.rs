//! Layered configuration: a `reelqueue.toml` file overlaid with
//! environment variables, environment taking precedence, with
//! `dotenvy` for `.env` loading. Flattened to a single struct rather
//! than a nested hierarchy — this service's configuration surface is
//! small (no scanner, no HSTS, no Redis).

use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

const DEFAULT_CONFIG_PATH: &str = "reelqueue.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),

    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },

    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseFile {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// On-disk, optional, overridden by env. Every field here is optional
/// because the env layer can fill in everything — the file is an
/// override, never a requirement.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    bind_addr: Option<String>,
    database_url: Option<String>,
    workspace_root: Option<String>,
    ffmpeg_path: Option<String>,
    ffprobe_path: Option<String>,
    cors_origins: Option<Vec<String>>,
    max_upload_size: Option<String>,
    access_token_expire_minutes: Option<i64>,
    algorithm: Option<String>,
    enable_hardware_acceleration_detection: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,
    pub workspace_root: PathBuf,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub secret_key: String,
    pub algorithm: String,
    pub access_token_expire_minutes: i64,
    pub cors_origins: Vec<String>,
    pub max_upload_size_bytes: u64,
    pub enable_hardware_acceleration_detection: bool,
}

pub struct ConfigLoader {
    config_path: PathBuf,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
        }
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = path.into();
        self
    }

    pub fn load(&self) -> Result<Config, ConfigError> {
        let _ = dotenvy::dotenv();

        let file = self.load_file_config()?;

        let secret_key = std::env::var("SECRET_KEY").map_err(|_| ConfigError::MissingVar("SECRET_KEY"))?;

        let bind_addr = env_or(file.bind_addr, "BIND_ADDR", "0.0.0.0:8080");
        let database_url = env_or_required(file.database_url, "DATABASE_URL")?;
        let workspace_root = env_or(file.workspace_root, "WORKSPACE_ROOT", "./workspace");
        let ffmpeg_path = env_or(file.ffmpeg_path, "FFMPEG_PATH", "ffmpeg");
        let ffprobe_path = env_or(file.ffprobe_path, "FFPROBE_PATH", "ffprobe");
        let algorithm = env_or(file.algorithm, "ALGORITHM", "HS256");

        let access_token_expire_minutes = std::env::var("ACCESS_TOKEN_EXPIRE_MINUTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(file.access_token_expire_minutes)
            .unwrap_or(60);

        let cors_origins = std::env::var("CORS_ORIGINS")
            .ok()
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .or(file.cors_origins)
            .unwrap_or_default();

        let max_upload_size_raw = std::env::var("MAX_UPLOAD_SIZE")
            .ok()
            .or(file.max_upload_size)
            .unwrap_or_else(|| "500M".to_string());
        let max_upload_size_bytes = parse_byte_size(&max_upload_size_raw)?;

        let enable_hardware_acceleration_detection = std::env::var("ENABLE_HARDWARE_ACCELERATION_DETECTION")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(file.enable_hardware_acceleration_detection)
            .unwrap_or(true);

        Ok(Config {
            bind_addr,
            database_url,
            workspace_root: PathBuf::from(workspace_root),
            ffmpeg_path,
            ffprobe_path,
            secret_key,
            algorithm,
            access_token_expire_minutes,
            cors_origins,
            max_upload_size_bytes,
            enable_hardware_acceleration_detection,
        })
    }

    fn load_file_config(&self) -> Result<FileConfig, ConfigError> {
        if !self.config_path.exists() {
            return Ok(FileConfig::default());
        }
        let raw = std::fs::read_to_string(&self.config_path).map_err(|source| ConfigError::ReadFile {
            path: self.config_path.clone(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::ParseFile {
            path: self.config_path.clone(),
            source,
        })
    }
}

fn env_or(file_value: Option<String>, var: &str, default: &str) -> String {
    std::env::var(var).ok().or(file_value).unwrap_or_else(|| default.to_string())
}

fn env_or_required(file_value: Option<String>, var: &'static str) -> Result<String, ConfigError> {
    std::env::var(var)
        .ok()
        .or(file_value)
        .ok_or(ConfigError::MissingVar(var))
}

/// Parses sizes like "500M", "1G", "2048" (raw bytes).
fn parse_byte_size(raw: &str) -> Result<u64, ConfigError> {
    let trimmed = raw.trim();
    let (digits, multiplier) = match trimmed.chars().last() {
        Some(c) if c.eq_ignore_ascii_case(&'k') => (&trimmed[..trimmed.len() - 1], 1024u64),
        Some(c) if c.eq_ignore_ascii_case(&'m') => (&trimmed[..trimmed.len() - 1], 1024 * 1024),
        Some(c) if c.eq_ignore_ascii_case(&'g') => (&trimmed[..trimmed.len() - 1], 1024 * 1024 * 1024),
        _ => (trimmed, 1),
    };
    digits
        .trim()
        .parse::<u64>()
        .map(|n| n * multiplier)
        .map_err(|_| ConfigError::InvalidValue {
            name: "MAX_UPLOAD_SIZE",
            value: raw.to_string(),
        })
}
