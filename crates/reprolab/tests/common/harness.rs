//! Test harness for isolated pipeline execution.
//!
//! The `TestHarness` struct wires the job and submission pipelines around:
//! - an in-memory SQLite database with all migrations applied
//! - a `MemoryArtifactStore` standing in for blob storage
//! - an optional `ScriptedModel` (absent means no credential)
//! - a `ScriptedSandbox` recording every command

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use reprolab::db::job_repo::{self, NewJob};
use reprolab::db::submission_repo::{self, NewSubmission};
use reprolab::db::{Database, JobRow, SubmissionRow};
use reprolab::dispatch::Dispatcher;
use reprolab::intake::Intake;
use reprolab::model::ModelClient;
use reprolab::pipeline::{JobPipeline, SubmissionPipeline};
use reprolab::processor::PdfTitleExtractor;
use reprolab::sandbox::{resolve_profile, SandboxExecutor};
use reprolab::scaffold::{ScaffoldGenerator, ScaffoldOptions};
use reprolab::storage::{paper_path, submission_path, ArtifactStore, MemoryArtifactStore};

use super::doubles::{ScriptedModel, ScriptedSandbox};

/// A minimal document the raw title scan understands.
pub const PAPER_BYTES: &[u8] = b"%PDF-1.4\n1 0 obj\n<< /Title (Attention Is All You Need) >>\nendobj\n";

pub struct TestHarness {
    pub db: Database,
    pub store: Arc<MemoryArtifactStore>,
    pub model: Option<Arc<ScriptedModel>>,
    pub sandbox: Arc<ScriptedSandbox>,
}

impl TestHarness {
    /// Harness without a model credential.
    pub fn new() -> Self {
        Self::build(None, ScriptedSandbox::new())
    }

    pub fn with_model(model: ScriptedModel) -> Self {
        Self::build(Some(model), ScriptedSandbox::new())
    }

    pub fn with_sandbox(sandbox: ScriptedSandbox) -> Self {
        Self::build(None, sandbox)
    }

    fn build(model: Option<ScriptedModel>, sandbox: ScriptedSandbox) -> Self {
        Self {
            db: Database::open_in_memory().expect("Failed to open in-memory database"),
            store: Arc::new(MemoryArtifactStore::new()),
            model: model.map(Arc::new),
            sandbox: Arc::new(sandbox),
        }
    }

    pub fn store(&self) -> Arc<dyn ArtifactStore> {
        self.store.clone()
    }

    pub fn generator(&self) -> Arc<ScaffoldGenerator> {
        let client = self
            .model
            .as_ref()
            .map(|m| m.clone() as Arc<dyn ModelClient>);
        Arc::new(ScaffoldGenerator::new(client, ScaffoldOptions::default()))
    }

    pub fn executor(&self) -> SandboxExecutor {
        SandboxExecutor::new(
            self.sandbox.clone(),
            self.db.clone(),
            Duration::from_secs(60),
        )
    }

    pub fn job_pipeline(&self) -> JobPipeline {
        JobPipeline::new(
            self.db.clone(),
            self.store(),
            Arc::new(PdfTitleExtractor::new()),
            self.generator(),
        )
    }

    pub fn submission_pipeline(&self) -> SubmissionPipeline {
        SubmissionPipeline::new(self.db.clone(), self.store(), self.executor())
    }

    /// Intake that runs dispatched work inline.
    pub fn intake(&self) -> Intake {
        Intake::new(
            self.db.clone(),
            Some(self.store()),
            Dispatcher::inline(),
            Arc::new(self.job_pipeline()),
            Arc::new(self.submission_pipeline()),
        )
    }

    /// Creates a job whose document is stored, then queues it.
    pub async fn queued_job(&self, user_id: Option<&str>) -> JobRow {
        let job = job_repo::create(
            &self.db,
            &NewJob {
                user_id: user_id.map(str::to_string),
                paper_filename: Some("paper.pdf".to_string()),
                ..NewJob::default()
            },
        )
        .expect("Failed to create job");
        let stored = self
            .store
            .put(
                &paper_path(&job.id, "paper.pdf"),
                PAPER_BYTES.to_vec(),
                "application/pdf",
            )
            .await
            .expect("Failed to store paper");
        job_repo::attach_upload(&self.db, &job.id, &stored.url, &stored.pathname)
            .expect("Failed to attach upload")
            .expect("Job was not uploading");
        job_repo::mark_queued(&self.db, &job.id, user_id)
            .expect("Failed to queue job")
            .expect("Job was not queueable")
    }

    /// Creates a queued submission for `job_id` with its archive stored.
    pub async fn queued_submission(&self, job_id: &str, language: &str) -> SubmissionRow {
        let id = submission_repo::generate_id();
        let stored = self
            .store
            .put(
                &submission_path(&id, "submission.zip"),
                b"PK\x03\x04fake-archive".to_vec(),
                "application/zip",
            )
            .await
            .expect("Failed to store archive");
        let profile = resolve_profile(language);
        submission_repo::create(
            &self.db,
            &NewSubmission {
                id: Some(id),
                user_id: None,
                job_id: job_id.to_string(),
                language: profile.language.to_string(),
                runtime: profile.runtime.to_string(),
                filename: "submission.zip".to_string(),
                blob_url: stored.url,
            },
        )
        .expect("Failed to create submission")
    }
}
