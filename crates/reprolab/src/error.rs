use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReproError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Document error: {0}")]
    Process(#[from] ProcessError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    #[error("Intake error: {0}")]
    Intake(#[from] crate::intake::IntakeError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Secret '{name}' could not be resolved: {source}")]
    Secret {
        name: &'static str,
        #[source]
        source: crate::secrets::SecretError,
    },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid artifact path '{0}'")]
    InvalidPath(String),

    #[error("Unsupported artifact URL '{0}'")]
    UnsupportedUrl(String),

    #[error("Blob service request failed: {0}")]
    Http(String),

    #[error("Blob service returned {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Failed to provision sandbox: {0}")]
    Provision(String),

    #[error("Bootstrap step '{step}' exited with {exit_code}: {stderr}")]
    Bootstrap {
        step: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Command '{command}' could not be run: {reason}")]
    Command { command: String, reason: String },

    #[error("Sandbox lifetime of {0} seconds exceeded")]
    Timeout(u64),

    #[error("Sandbox environment '{0}' does not exist")]
    UnknownEnvironment(String),

    #[error("Invalid sandbox path '{0}'")]
    InvalidPath(String),

    #[error("Snapshot failed: {0}")]
    Snapshot(String),

    #[error("Sandbox IO error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Snapshot cache error: {0}")]
    Cache(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model request failed: {0}")]
    Transport(String),

    #[error("Model provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Upload response missing '{0}'")]
    MissingField(&'static str),

    #[error("Malformed model response: {0}")]
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Queue publish failed: {0}")]
    Publish(String),

    #[error("Queue rejected message with {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to process PDF: {0}")]
    PdfProcessing(String),
}

pub type Result<T> = std::result::Result<T, ReproError>;
