pub mod loader;
pub mod schema;

pub use loader::{expand_path, load_settings, load_settings_from_str, validate_settings};
pub use schema::{
    ModelSettings, MAX_FILE_TTL_HOURS, MAX_LIFETIME_TIMEOUT_SECS, MAX_SNAPSHOT_TTL_DAYS, QueueSettings, SandboxSettings, Settings, StorageBackend, StorageSettings,
};
