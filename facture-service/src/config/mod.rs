use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::export::{default_concurrency, ProgressTimings};

#[derive(Debug, Clone)]
pub struct FactureConfig {
    pub common: core_config::Config,
    pub store: StoreBackend,
    pub mongodb: MongoConfig,
    pub export: ExportConfig,
    pub renderer: RendererConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Mongo,
    Memory,
}

#[derive(Debug, Clone)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub concurrency: usize,
    pub progress_grace_secs: u64,
    pub pending_ttl_secs: u64,
    pub heartbeat_secs: u64,
}

impl ExportConfig {
    pub fn progress_timings(&self) -> ProgressTimings {
        ProgressTimings {
            grace: Duration::from_secs(self.progress_grace_secs),
            pending_ttl: Duration::from_secs(self.pending_ttl_secs),
            heartbeat: Duration::from_secs(self.heartbeat_secs.max(1)),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            progress_grace_secs: 60,
            pending_ttl_secs: 600,
            heartbeat_secs: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RendererConfig {
    pub binary: String,
    pub timeout_secs: u64,
    pub temp_dir: PathBuf,
}

impl RendererConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl FactureConfig {
    pub fn load() -> Result<Self, AppError> {
        // Load common config (handles .env and APP__ prefix)
        let common_config = core_config::Config::load()?;

        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        let store: StoreBackend = get_env("STORE_BACKEND", Some("mongo"), is_prod)?
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        // The memory backend never talks to MongoDB.
        let uri_default = match store {
            StoreBackend::Memory => Some("mongodb://localhost:27017"),
            StoreBackend::Mongo => None,
        };

        let export = ExportConfig {
            concurrency: match env::var("EXPORT_CONCURRENCY") {
                Ok(value) => parse_number("EXPORT_CONCURRENCY", &value)?,
                Err(_) => default_concurrency(),
            },
            progress_grace_secs: parse_number(
                "EXPORT_PROGRESS_GRACE_SECS",
                &get_env("EXPORT_PROGRESS_GRACE_SECS", Some("60"), is_prod)?,
            )?,
            pending_ttl_secs: parse_number(
                "EXPORT_PENDING_TTL_SECS",
                &get_env("EXPORT_PENDING_TTL_SECS", Some("600"), is_prod)?,
            )?,
            heartbeat_secs: parse_number(
                "EXPORT_HEARTBEAT_SECS",
                &get_env("EXPORT_HEARTBEAT_SECS", Some("5"), is_prod)?,
            )?,
        };

        let renderer = RendererConfig {
            binary: get_env("RENDERER_BINARY", Some("chromium"), is_prod)?,
            timeout_secs: parse_number(
                "RENDERER_TIMEOUT_SECS",
                &get_env("RENDERER_TIMEOUT_SECS", Some("30"), is_prod)?,
            )?,
            temp_dir: env::var("RENDERER_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| env::temp_dir()),
        };

        Ok(FactureConfig {
            common: common_config,
            store,
            mongodb: MongoConfig {
                uri: get_env("MONGODB_URI", uri_default, is_prod)?,
                database: get_env("MONGODB_DATABASE", Some("facture_db"), is_prod)?,
            },
            export,
            renderer,
        })
    }
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mongo" | "mongodb" => Ok(StoreBackend::Mongo),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(format!("Invalid store backend: {}", s)),
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, AppError> {
    value.trim().parse().map_err(|_| {
        AppError::ConfigError(anyhow::anyhow!("{} must be a number, got '{}'", key, value))
    })
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}
