use serde::{Deserialize, Serialize};

use crate::secrets::SecretSource;

/// Process-wide settings, loaded once and passed into each component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub version: String,
    /// SQLite file; defaults to `~/.reprolab/data/reprolab.db`.
    #[serde(default)]
    pub database_path: Option<String>,
    /// Public base URL the queue calls back into.
    #[serde(default = "default_app_url")]
    pub app_url: String,
    /// Skips queue signature verification.
    #[serde(default)]
    pub local_development: bool,
    #[serde(default)]
    pub storage: StorageSettings,
    /// Absent means work is executed inline.
    #[serde(default)]
    pub queue: Option<QueueSettings>,
    #[serde(default)]
    pub model: ModelSettings,
    #[serde(default)]
    pub sandbox: SandboxSettings,
}

fn default_app_url() -> String {
    "http://localhost:3000".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Filesystem,
    Blob,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackend,
    /// Root directory for the filesystem backend.
    #[serde(default = "default_artifact_root")]
    pub root: String,
    /// REST endpoint of the blob service.
    #[serde(default = "default_blob_url")]
    pub base_url: String,
    #[serde(default = "default_blob_token")]
    pub token: SecretSource,
}

fn default_storage_backend() -> StorageBackend {
    StorageBackend::Filesystem
}

fn default_artifact_root() -> String {
    "~/.reprolab/artifacts".to_string()
}

fn default_blob_url() -> String {
    "https://blob.vercel-storage.com".to_string()
}

fn default_blob_token() -> SecretSource {
    SecretSource::env("BLOB_READ_WRITE_TOKEN")
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            root: default_artifact_root(),
            base_url: default_blob_url(),
            token: default_blob_token(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(default = "default_queue_url")]
    pub url: String,
    #[serde(default = "default_queue_token")]
    pub token: SecretSource,
    #[serde(default = "default_current_signing_key")]
    pub current_signing_key: SecretSource,
    #[serde(default = "default_next_signing_key")]
    pub next_signing_key: SecretSource,
}

fn default_queue_url() -> String {
    "https://qstash.upstash.io".to_string()
}

fn default_queue_token() -> SecretSource {
    SecretSource::env("QSTASH_TOKEN")
}

fn default_current_signing_key() -> SecretSource {
    SecretSource::env("QSTASH_CURRENT_SIGNING_KEY")
}

fn default_next_signing_key() -> SecretSource {
    SecretSource::env("QSTASH_NEXT_SIGNING_KEY")
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            url: default_queue_url(),
            token: default_queue_token(),
            current_signing_key: default_current_signing_key(),
            next_signing_key: default_next_signing_key(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Without a resolvable key the scaffold generator only uses its fallback.
    #[serde(default = "default_api_key")]
    pub api_key: SecretSource,
    #[serde(default = "default_model_name")]
    pub model: String,
    #[serde(default = "default_model_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// How long an uploaded document stays reusable on the provider side.
    #[serde(default = "default_file_ttl")]
    pub file_ttl_hours: u64,
    #[serde(default = "default_repair_rounds")]
    pub repair_rounds: u32,
    #[serde(default = "default_max_tasks")]
    pub max_tasks: usize,
}

fn default_api_key() -> SecretSource {
    SecretSource::env("GEMINI_API_KEY")
}

fn default_model_name() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_model_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_request_timeout() -> u64 {
    120
}

/// Upper bound for `file_ttl_hours`; providers drop uploads after two days.
pub const MAX_FILE_TTL_HOURS: u64 = 48;

fn default_file_ttl() -> u64 {
    46
}

fn default_repair_rounds() -> u32 {
    1
}

fn default_max_tasks() -> usize {
    8
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            api_key: default_api_key(),
            model: default_model_name(),
            base_url: default_model_url(),
            request_timeout_secs: default_request_timeout(),
            file_ttl_hours: default_file_ttl(),
            repair_rounds: default_repair_rounds(),
            max_tasks: default_max_tasks(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSettings {
    /// Directory holding per-environment and snapshot directories.
    #[serde(default = "default_sandbox_root")]
    pub root: String,
    #[serde(default = "default_lifetime_timeout")]
    pub lifetime_timeout_secs: u64,
    #[serde(default = "default_snapshot_ttl")]
    pub snapshot_ttl_days: u32,
}

fn default_sandbox_root() -> String {
    "~/.reprolab/sandboxes".to_string()
}

pub const MAX_LIFETIME_TIMEOUT_SECS: u64 = 24 * 60 * 60;
pub const MAX_SNAPSHOT_TTL_DAYS: u32 = 365;

fn default_lifetime_timeout() -> u64 {
    600
}

fn default_snapshot_ttl() -> u32 {
    7
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            root: default_sandbox_root(),
            lifetime_timeout_secs: default_lifetime_timeout(),
            snapshot_ttl_days: default_snapshot_ttl(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            database_path: None,
            app_url: default_app_url(),
            local_development: false,
            storage: StorageSettings::default(),
            queue: None,
            model: ModelSettings::default(),
            sandbox: SandboxSettings::default(),
        }
    }
}
