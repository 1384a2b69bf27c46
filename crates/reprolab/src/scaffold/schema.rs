use std::path::Path;
use std::sync::OnceLock;

use jsonschema::Validator;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Language recorded for files the model left unlabelled.
pub const DEFAULT_FILE_LANGUAGE: &str = "plaintext";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BundleError {
    #[error("no JSON object found in model output")]
    NoJson,

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("schema violation: {0}")]
    Schema(String),

    #[error("bundle has no tasks")]
    NoTasks,

    #[error("task {0} is blank")]
    BlankTask(usize),

    #[error("bundle has no files")]
    NoFiles,

    #[error("file {0} has a blank path")]
    BlankPath(usize),

    #[error("bundle has no README file")]
    MissingReadme,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaffoldFile {
    pub path: String,
    pub language: String,
    pub value: String,
}

impl ScaffoldFile {
    pub fn new(path: &str, language: &str, value: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            language: language.to_string(),
            value: value.into(),
        }
    }
}

/// A validated scaffold: ordered tasks and starter files.
///
/// Only [`ScaffoldBundle::from_value`] and the fallback builder construct
/// one, so every bundle in circulation satisfies the declared schema and
/// carries a README.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScaffoldBundle {
    tasks: Vec<String>,
    files: Vec<ScaffoldFile>,
}

#[derive(Deserialize)]
struct RawFile {
    path: String,
    #[serde(default)]
    language: Option<String>,
    value: String,
}

#[derive(Deserialize)]
struct RawBundle {
    tasks: Vec<String>,
    files: Vec<RawFile>,
}

/// JSON schema sent to the model and checked on every candidate.
pub fn bundle_schema() -> &'static Value {
    static SCHEMA: OnceLock<Value> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        json!({
            "type": "object",
            "required": ["tasks", "files"],
            "properties": {
                "tasks": {
                    "type": "array",
                    "minItems": 1,
                    "items": { "type": "string" }
                },
                "files": {
                    "type": "array",
                    "minItems": 1,
                    "items": {
                        "type": "object",
                        "required": ["path", "value"],
                        "properties": {
                            "path": { "type": "string" },
                            "language": { "type": "string" },
                            "value": { "type": "string" }
                        }
                    }
                }
            }
        })
    })
}

fn validator() -> Result<&'static Validator, BundleError> {
    static VALIDATOR: OnceLock<Result<Validator, String>> = OnceLock::new();
    VALIDATOR
        .get_or_init(|| jsonschema::validator_for(bundle_schema()).map_err(|e| e.to_string()))
        .as_ref()
        .map_err(|e| BundleError::Schema(format!("bundle schema does not compile: {}", e)))
}

fn is_readme(path: &str) -> bool {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_ascii_lowercase().starts_with("readme"))
        .unwrap_or(false)
}

impl ScaffoldBundle {
    /// Validates a parsed candidate against the schema and the semantic rules.
    pub fn from_value(value: &Value) -> Result<Self, BundleError> {
        let errors: Vec<String> = validator()?
            .iter_errors(value)
            .map(|e| e.to_string())
            .collect();
        if !errors.is_empty() {
            return Err(BundleError::Schema(errors.join("; ")));
        }

        let raw: RawBundle = serde_json::from_value(value.clone())
            .map_err(|e| BundleError::InvalidJson(e.to_string()))?;

        if raw.tasks.is_empty() {
            return Err(BundleError::NoTasks);
        }
        if let Some(index) = raw.tasks.iter().position(|t| t.trim().is_empty()) {
            return Err(BundleError::BlankTask(index));
        }
        if raw.files.is_empty() {
            return Err(BundleError::NoFiles);
        }
        if let Some(index) = raw.files.iter().position(|f| f.path.trim().is_empty()) {
            return Err(BundleError::BlankPath(index));
        }
        if !raw.files.iter().any(|f| is_readme(&f.path)) {
            return Err(BundleError::MissingReadme);
        }

        let files = raw
            .files
            .into_iter()
            .map(|f| ScaffoldFile {
                path: f.path.trim().to_string(),
                language: f
                    .language
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty())
                    .unwrap_or_else(|| DEFAULT_FILE_LANGUAGE.to_string()),
                value: f.value,
            })
            .collect();

        Ok(Self {
            tasks: raw.tasks.into_iter().map(|t| t.trim().to_string()).collect(),
            files,
        })
    }

    pub(crate) fn from_parts(tasks: Vec<String>, files: Vec<ScaffoldFile>) -> Self {
        Self { tasks, files }
    }

    /// Keeps at most `max` tasks. A bundle always retains at least one.
    pub fn clamp_tasks(mut self, max: usize) -> Self {
        self.tasks.truncate(max.max(1));
        self
    }

    pub fn tasks(&self) -> &[String] {
        &self.tasks
    }

    pub fn files(&self) -> &[ScaffoldFile] {
        &self.files
    }
}
