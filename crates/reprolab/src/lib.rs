pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod intake;
pub mod model;
pub mod pipeline;
pub mod processor;
pub mod sandbox;
pub mod sanitize;
pub mod scaffold;
pub mod secrets;
pub mod service;
pub mod storage;

pub use config::{load_settings, Settings};
pub use db::{Database, JobRow, SubmissionRow, WorkStatus};
pub use dispatch::{
    handle_callback, CallbackRequest, CallbackResponse, CallbackVerifier, DispatchOutcome,
    Dispatcher, WorkKind,
};
pub use error::{
    ConfigError, DispatchError, ModelError, ProcessError, ReproError, Result, SandboxError,
    StorageError,
};
pub use intake::{Intake, IntakeError, Upload};
pub use pipeline::{JobPipeline, ProcessResult, SubmissionPipeline};
pub use scaffold::{ScaffoldBundle, ScaffoldGenerator};
pub use secrets::{resolve_secret, SecretError, SecretSource};
pub use service::Services;
pub use storage::{ArtifactStore, StoredArtifact};
