use std::path::{Path, PathBuf};

use crate::config::schema::{
    QueueSettings, Settings, StorageBackend, MAX_FILE_TTL_HOURS, MAX_LIFETIME_TIMEOUT_SECS,
    MAX_SNAPSHOT_TTL_DAYS,
};
use crate::error::ConfigError;
use crate::secrets::SecretSource;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_settings_from_str(&content)
}

pub fn load_settings_from_str(content: &str) -> Result<Settings, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let settings: Settings = serde_json::from_value(json_value)?;

    validate_settings(&settings)?;

    Ok(settings)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

/// Semantic checks the schema cannot express. Also run on settings built
/// from the environment, which never pass through the schema.
pub fn validate_settings(settings: &Settings) -> Result<(), ConfigError> {
    if settings.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", settings.version),
        });
    }

    check_url("app_url", &settings.app_url)?;
    check_url("model.base_url", &settings.model.base_url)?;
    if let Some(queue) = &settings.queue {
        check_url("queue.url", &queue.url)?;
    }

    if settings.storage.backend == StorageBackend::Blob {
        check_url("storage.base_url", &settings.storage.base_url)?;
        if !settings.storage.token.is_configured() {
            return Err(ConfigError::Validation {
                message: "Blob storage requires a token source".to_string(),
            });
        }
    }

    if settings.model.request_timeout_secs == 0 || settings.sandbox.lifetime_timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "Timeouts must be positive".to_string(),
        });
    }

    if settings.sandbox.lifetime_timeout_secs > MAX_LIFETIME_TIMEOUT_SECS {
        return Err(ConfigError::Validation {
            message: format!(
                "sandbox.lifetime_timeout_secs must be at most {}",
                MAX_LIFETIME_TIMEOUT_SECS
            ),
        });
    }
    if settings.model.file_ttl_hours == 0 || settings.model.file_ttl_hours > MAX_FILE_TTL_HOURS {
        return Err(ConfigError::Validation {
            message: format!(
                "model.file_ttl_hours must be between 1 and {}",
                MAX_FILE_TTL_HOURS
            ),
        });
    }
    if settings.sandbox.snapshot_ttl_days == 0
        || settings.sandbox.snapshot_ttl_days > MAX_SNAPSHOT_TTL_DAYS
    {
        return Err(ConfigError::Validation {
            message: format!(
                "sandbox.snapshot_ttl_days must be between 1 and {}",
                MAX_SNAPSHOT_TTL_DAYS
            ),
        });
    }

    if settings.model.max_tasks == 0 {
        return Err(ConfigError::Validation {
            message: "model.max_tasks must be at least 1".to_string(),
        });
    }

    Ok(())
}

fn check_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let rest = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"));
    match rest {
        Some(host) if !host.is_empty() && !host.starts_with('/') => Ok(()),
        _ => Err(ConfigError::Validation {
            message: format!("{} must be an http(s) URL, got '{}'", field, value),
        }),
    }
}

/// Expands a leading `~` in a configured path.
pub fn expand_path(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(path.trim_start_matches('~').trim_start_matches('/'));
        }
    }
    PathBuf::from(path)
}

impl Settings {
    /// Builds settings from the deployment environment variables used by the
    /// hosted service (`APP_URL`, `QSTASH_*`, `GEMINI_*`,
    /// `BLOB_READ_WRITE_TOKEN`) plus `REPROLAB_*` overrides for local paths.
    ///
    /// A queue is configured only when `QSTASH_TOKEN` is set; blob storage
    /// only when `BLOB_READ_WRITE_TOKEN` is set.
    pub fn from_env() -> Result<Settings, ConfigError> {
        let mut settings = Settings::default();

        if let Some(url) = env_value("NEXT_PUBLIC_APP_URL").or_else(|| env_value("APP_URL")) {
            settings.app_url = url.trim_end_matches('/').to_string();
        }
        if let Some(path) = env_value("REPROLAB_DATABASE_PATH") {
            settings.database_path = Some(path);
        }
        settings.local_development = env_value("REPROLAB_LOCAL_DEVELOPMENT")
            .is_some_and(|v| matches!(v.as_str(), "1" | "true" | "yes"));

        if env_value("BLOB_READ_WRITE_TOKEN").is_some() {
            settings.storage.backend = StorageBackend::Blob;
            settings.storage.token = SecretSource::env("BLOB_READ_WRITE_TOKEN");
            if let Some(url) = env_value("BLOB_BASE_URL") {
                settings.storage.base_url = url;
            }
        }
        if let Some(root) = env_value("REPROLAB_ARTIFACT_ROOT") {
            settings.storage.root = root;
        }

        if env_value("QSTASH_TOKEN").is_some() {
            let mut queue = QueueSettings::default();
            if let Some(url) = env_value("QSTASH_URL") {
                queue.url = url.trim_end_matches('/').to_string();
            }
            settings.queue = Some(queue);
        }

        if let Some(model) = env_value("GEMINI_MODEL") {
            settings.model.model = model;
        }
        if let Some(root) = env_value("REPROLAB_SANDBOX_ROOT") {
            settings.sandbox.root = root;
        }

        validate_settings(&settings)?;
        Ok(settings)
    }

    /// Resolved SQLite path.
    pub fn database_file(&self) -> Option<PathBuf> {
        match &self.database_path {
            Some(path) => Some(expand_path(path)),
            None => crate::db::default_database_path(),
        }
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
