//! Credential resolution for the model provider, queue and blob store.
//!
//! A credential can be written inline in the settings file, read from a file
//! (Docker/Kubernetes secret mounts) or taken from an environment variable.
//! Sources are tried in that order and the first non-empty one wins.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: value, file, or env var)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Where a credential comes from, as written in the settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_var: Option<String>,
}

impl SecretSource {
    /// A source that only reads the named environment variable.
    pub fn env(name: &str) -> Self {
        Self {
            env_var: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn is_configured(&self) -> bool {
        has_secret_source(
            self.value.as_deref(),
            self.file.as_deref(),
            self.env_var.as_deref(),
        )
    }

    pub fn resolve(&self) -> Result<SecretString> {
        resolve_secret(
            self.value.as_deref(),
            self.file.as_deref(),
            self.env_var.as_deref(),
        )
    }

    /// Like [`resolve`](Self::resolve), but an unset environment variable or
    /// an empty source yields `None`. Unreadable files are still errors.
    pub fn resolve_optional(&self) -> Result<Option<SecretString>> {
        match self.resolve() {
            Ok(secret) => Ok(Some(secret)),
            Err(SecretError::NoSourceProvided) | Err(SecretError::EnvVarNotSet { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Resolves a secret from the first non-empty source: direct value, file
/// contents, environment variable. File and env values are trimmed.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = direct.filter(|v| !v.is_empty()) {
        return Ok(SecretString::from(value.to_string()));
    }

    if let Some(path) = file_path.filter(|p| !p.is_empty()) {
        let expanded = expand_home(path);
        return fs::read_to_string(&expanded)
            .map(|content| SecretString::from(content.trim().to_string()))
            .map_err(|e| SecretError::FileReadError {
                path: expanded,
                source: e,
            });
    }

    if let Some(name) = env_var.filter(|n| !n.is_empty()) {
        return match std::env::var(name) {
            Ok(value) if value.trim().is_empty() => Err(SecretError::EnvVarNotSet {
                name: name.to_string(),
            }),
            Ok(value) => Ok(SecretString::from(value.trim().to_string())),
            Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                name: name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                name: name.to_string(),
            }),
        };
    }

    Err(SecretError::NoSourceProvided)
}

/// Checks if at least one secret source is non-empty.
pub fn has_secret_source(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> bool {
    [direct, file_path, env_var]
        .iter()
        .any(|s| s.is_some_and(|s| !s.is_empty()))
}

/// Expands a leading `~` to the home directory. `~user` is not supported.
fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    #[serial]
    fn test_inline_value_wins() {
        std::env::set_var("REPROLAB_TEST_KEY_1", "from-env");
        let source = SecretSource {
            value: Some("inline".into()),
            env_var: Some("REPROLAB_TEST_KEY_1".into()),
            ..Default::default()
        };
        assert_eq!(source.resolve().unwrap().expose_secret(), "inline");
        std::env::remove_var("REPROLAB_TEST_KEY_1");
    }

    #[test]
    #[serial]
    fn test_file_beats_env() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "  from-file  ").unwrap();
        std::env::set_var("REPROLAB_TEST_KEY_2", "from-env");

        let secret = resolve_secret(
            None,
            Some(file.path().to_str().unwrap()),
            Some("REPROLAB_TEST_KEY_2"),
        )
        .unwrap();
        assert_eq!(secret.expose_secret(), "from-file");
        std::env::remove_var("REPROLAB_TEST_KEY_2");
    }

    #[test]
    #[serial]
    fn test_env_fallback_is_trimmed() {
        std::env::set_var("REPROLAB_TEST_KEY_3", "token\n");
        let secret = SecretSource::env("REPROLAB_TEST_KEY_3").resolve().unwrap();
        assert_eq!(secret.expose_secret(), "token");
        std::env::remove_var("REPROLAB_TEST_KEY_3");
    }

    #[test]
    fn test_no_source() {
        assert!(matches!(
            SecretSource::default().resolve(),
            Err(SecretError::NoSourceProvided)
        ));
        assert!(!SecretSource::default().is_configured());
    }

    #[test]
    fn test_missing_file_is_error_even_when_optional() {
        let source = SecretSource {
            file: Some("/nonexistent/reprolab/secret".into()),
            ..Default::default()
        };
        assert!(matches!(
            source.resolve_optional(),
            Err(SecretError::FileReadError { .. })
        ));
    }

    #[test]
    #[serial]
    fn test_unset_env_is_none_when_optional() {
        std::env::remove_var("REPROLAB_TEST_UNSET");
        let source = SecretSource::env("REPROLAB_TEST_UNSET");
        assert!(source.is_configured());
        assert!(source.resolve_optional().unwrap().is_none());
        assert!(matches!(
            source.resolve(),
            Err(SecretError::EnvVarNotSet { .. })
        ));
    }

    #[test]
    #[serial]
    fn test_blank_env_counts_as_unset() {
        std::env::set_var("REPROLAB_TEST_BLANK", "   ");
        let source = SecretSource::env("REPROLAB_TEST_BLANK");
        assert!(source.resolve_optional().unwrap().is_none());
        std::env::remove_var("REPROLAB_TEST_BLANK");
    }

    #[test]
    fn test_deserializes_from_settings_json() {
        let source: SecretSource =
            serde_json::from_str(r#"{"env_var": "GEMINI_API_KEY"}"#).unwrap();
        assert_eq!(source, SecretSource::env("GEMINI_API_KEY"));
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/absolute/path"), "/absolute/path");
        assert_eq!(expand_home("relative/path"), "relative/path");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(
                expand_home("~/secret"),
                format!("{}/secret", home.to_string_lossy())
            );
        }
    }
}
