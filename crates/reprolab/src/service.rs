//! Builds the long-lived components from [`Settings`] and hands them out to
//! whichever entry point is running (worker CLI, callback routes, tests).

use std::sync::Arc;
use std::time::Duration;

use crate::config::{expand_path, validate_settings, Settings, StorageBackend};
use crate::db::Database;
use crate::dispatch::{CallbackVerifier, Dispatcher, QstashTransport, QueueTransport};
use crate::error::{ConfigError, Result};
use crate::intake::Intake;
use crate::model::{GeminiClient, ModelClient};
use crate::pipeline::{JobPipeline, SubmissionPipeline};
use crate::processor::PdfTitleExtractor;
use crate::sandbox::local::LocalSandboxBackend;
use crate::sandbox::SandboxExecutor;
use crate::scaffold::{ScaffoldGenerator, ScaffoldOptions};
use crate::secrets::SecretSource;
use crate::storage::{ArtifactStore, FsArtifactStore, HttpBlobStore, MemoryArtifactStore};

use secrecy::SecretString;

/// Everything a process needs to accept and run work.
pub struct Services {
    pub db: Database,
    pub store: Arc<dyn ArtifactStore>,
    pub dispatcher: Dispatcher,
    pub verifier: CallbackVerifier,
    pub jobs: Arc<JobPipeline>,
    pub submissions: Arc<SubmissionPipeline>,
    pub intake: Intake,
}

impl Services {
    /// Opens the database at the configured path and wires every component.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let path = settings
            .database_file()
            .ok_or_else(|| ConfigError::Validation {
                message: "Could not determine a database path".to_string(),
            })?;
        let db = Database::open(&path)?;
        Self::with_database(settings, db)
    }

    /// Wires every component around an already opened database.
    pub fn with_database(settings: &Settings, db: Database) -> Result<Self> {
        validate_settings(settings)?;
        let store = build_store(settings)?;
        let model = build_model(settings)?;
        if model.is_none() {
            log::warn!("No model credential configured, scaffolds use the fallback bundle");
        }

        let generator = Arc::new(ScaffoldGenerator::new(
            model,
            ScaffoldOptions {
                repair_rounds: settings.model.repair_rounds,
                max_tasks: settings.model.max_tasks,
                ..ScaffoldOptions::default()
            },
        ));

        let snapshot_ttl =
            chrono::Duration::try_days(i64::from(settings.sandbox.snapshot_ttl_days))
                .ok_or_else(|| out_of_range("sandbox.snapshot_ttl_days"))?;
        let backend = Arc::new(LocalSandboxBackend::new(
            expand_path(&settings.sandbox.root),
            snapshot_ttl,
        ));
        let sandbox = SandboxExecutor::new(
            backend,
            db.clone(),
            Duration::from_secs(settings.sandbox.lifetime_timeout_secs),
        );

        let (dispatcher, verifier) = build_queue(settings)?;

        let file_ttl = i64::try_from(settings.model.file_ttl_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .ok_or_else(|| out_of_range("model.file_ttl_hours"))?;
        let jobs = Arc::new(
            JobPipeline::new(
                db.clone(),
                Arc::clone(&store),
                Arc::new(PdfTitleExtractor::new()),
                generator,
            )
            .with_model_file_ttl(file_ttl),
        );
        let submissions = Arc::new(SubmissionPipeline::new(
            db.clone(),
            Arc::clone(&store),
            sandbox,
        ));

        let intake = Intake::new(
            db.clone(),
            Some(Arc::clone(&store)),
            dispatcher.clone(),
            Arc::clone(&jobs),
            Arc::clone(&submissions),
        );

        Ok(Self {
            db,
            store,
            dispatcher,
            verifier,
            jobs,
            submissions,
            intake,
        })
    }
}

fn out_of_range(field: &str) -> ConfigError {
    ConfigError::Validation {
        message: format!("{} is out of range", field),
    }
}

fn resolve(name: &'static str, source: &SecretSource) -> Result<Option<SecretString>> {
    source
        .resolve_optional()
        .map_err(|e| ConfigError::Secret { name, source: e }.into())
}

fn build_store(settings: &Settings) -> Result<Arc<dyn ArtifactStore>> {
    let storage = &settings.storage;
    let store: Arc<dyn ArtifactStore> = match storage.backend {
        StorageBackend::Blob => {
            let token = resolve("storage.token", &storage.token)?.ok_or_else(|| {
                ConfigError::Validation {
                    message: "Blob storage token is not set".to_string(),
                }
            })?;
            Arc::new(HttpBlobStore::new(&storage.base_url, token)?)
        }
        StorageBackend::Filesystem => Arc::new(FsArtifactStore::new(expand_path(&storage.root))),
        StorageBackend::Memory => Arc::new(MemoryArtifactStore::new()),
    };
    Ok(store)
}

fn build_model(settings: &Settings) -> Result<Option<Arc<dyn ModelClient>>> {
    let model = &settings.model;
    let Some(key) = resolve("model.api_key", &model.api_key)? else {
        return Ok(None);
    };
    let client = GeminiClient::new(
        &model.base_url,
        &model.model,
        key,
        Duration::from_secs(model.request_timeout_secs),
    )?;
    Ok(Some(Arc::new(client)))
}

fn build_queue(settings: &Settings) -> Result<(Dispatcher, CallbackVerifier)> {
    let Some(queue) = &settings.queue else {
        log::info!("No queue configured, work runs inline");
        return Ok((
            Dispatcher::new(None, &settings.app_url),
            CallbackVerifier::disabled(),
        ));
    };

    let transport: Option<Arc<dyn QueueTransport>> = match resolve("queue.token", &queue.token)? {
        Some(token) => Some(Arc::new(QstashTransport::new(&queue.url, token)?)),
        None => {
            log::warn!("Queue token not set, work runs inline");
            None
        }
    };

    let verifier = CallbackVerifier::new(
        resolve("queue.current_signing_key", &queue.current_signing_key)?,
        resolve("queue.next_signing_key", &queue.next_signing_key)?,
        settings.local_development,
    );
    Ok((Dispatcher::new(transport, &settings.app_url), verifier))
}
