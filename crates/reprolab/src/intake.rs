//! Upload intake: the checks and record creation that precede any pipeline
//! run, for papers, finalize requests and submission archives.
//!
//! Every precondition is checked before a record is touched. Errors carry a
//! stable code and an HTTP status for whatever routing layer sits on top.

use std::sync::Arc;

use thiserror::Error;

use crate::db::job_repo::{self, NewJob};
use crate::db::submission_repo::{self, NewSubmission};
use crate::db::{Database, DatabaseError, JobRow, SubmissionRow, WorkStatus};
use crate::dispatch::{DispatchOutcome, Dispatcher, WorkKind};
use crate::error::{DispatchError, StorageError};
use crate::pipeline::{JobPipeline, ProcessResult, SubmissionPipeline};
use crate::sandbox::resolve_profile;
use crate::sanitize::basename;
use crate::storage::{paper_path, submission_path, ArtifactStore, StoredArtifact};

pub const MAX_PAPER_BYTES: usize = 50 * 1024 * 1024;
pub const MAX_SUBMISSION_BYTES: usize = 25 * 1024 * 1024;

const DEFAULT_PAPER_NAME: &str = "paper.pdf";
const DEFAULT_ARCHIVE_NAME: &str = "submission.zip";

#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("paper file is required")]
    MissingPaperFile,

    #[error("paper file is empty")]
    EmptyFile,

    #[error("only PDF uploads are supported (got '{0}')")]
    InvalidFileType(String),

    #[error("upload exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("artifact storage not configured")]
    StoreNotConfigured,

    #[error("upload failed: {0}")]
    UploadFailed(String),

    #[error("login required")]
    Unauthorized,

    #[error("not allowed")]
    Forbidden,

    #[error("job not found")]
    JobNotFound,

    #[error("job not found or not queueable")]
    NotQueueable,

    #[error("submission zip is required")]
    MissingSubmission,

    #[error("job id is required")]
    MissingJob,

    #[error("submission is empty")]
    EmptySubmission,

    #[error("dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl IntakeError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            IntakeError::MissingPaperFile => "missing_paper_file",
            IntakeError::EmptyFile => "empty_file",
            IntakeError::InvalidFileType(_) => "invalid_file_type",
            IntakeError::PayloadTooLarge { .. } => "payload_too_large",
            IntakeError::StoreNotConfigured => "blob_not_configured",
            IntakeError::UploadFailed(_) => "upload_failed",
            IntakeError::Unauthorized => "unauthorized",
            IntakeError::Forbidden => "forbidden",
            IntakeError::JobNotFound => "job_not_found",
            IntakeError::NotQueueable => "not_found",
            IntakeError::MissingSubmission => "missing_submission",
            IntakeError::MissingJob => "missing_job",
            IntakeError::EmptySubmission => "empty_submission",
            IntakeError::Dispatch(_) => "dispatch_failed",
            IntakeError::Database(_) => "server_error",
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            IntakeError::PayloadTooLarge { .. } => 413,
            IntakeError::Unauthorized => 401,
            IntakeError::Forbidden => 403,
            IntakeError::JobNotFound | IntakeError::NotQueueable => 404,
            IntakeError::Dispatch(_) => 502,
            IntakeError::Database(_) => 500,
            _ => 400,
        }
    }
}

/// An uploaded file as received by the routing layer.
#[derive(Debug, Clone, Default)]
pub struct Upload {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct CreatedJob {
    pub job: JobRow,
    pub artifact: StoredArtifact,
}

#[derive(Debug, Clone)]
pub struct FinalizedJob {
    /// The row after dispatch; reflects the inline run when there was one.
    pub job: JobRow,
    pub dispatch: DispatchOutcome<ProcessResult>,
}

#[derive(Debug, Clone)]
pub struct AcceptedSubmission {
    pub submission: SubmissionRow,
    pub dispatch: DispatchOutcome<ProcessResult>,
}

/// Reduces a client-supplied filename to a safe last path segment.
fn safe_filename(raw: Option<&str>, default: &str) -> String {
    let name = basename(raw.unwrap_or("").trim());
    if name.is_empty() || name == "." || name == ".." {
        default.to_string()
    } else {
        name.to_string()
    }
}

/// The declared content type, else one guessed from the filename.
fn content_type_for(declared: Option<String>, filename: &str, default: &str) -> String {
    declared.filter(|t| !t.is_empty()).unwrap_or_else(|| {
        mime_guess::from_path(filename)
            .first()
            .map(|m| m.essence_str().to_string())
            .unwrap_or_else(|| default.to_string())
    })
}

/// Ownership rule shared by finalize and submission: an owned job is only
/// reachable by its owner.
fn check_owner(job: &JobRow, user_id: Option<&str>) -> Result<(), IntakeError> {
    match (&job.user_id, user_id) {
        (None, _) => Ok(()),
        (Some(_), None) => Err(IntakeError::Unauthorized),
        (Some(owner), Some(user)) if owner == user => Ok(()),
        (Some(_), Some(_)) => Err(IntakeError::Forbidden),
    }
}

pub struct Intake {
    db: Database,
    store: Option<Arc<dyn ArtifactStore>>,
    dispatcher: Dispatcher,
    jobs: Arc<JobPipeline>,
    submissions: Arc<SubmissionPipeline>,
}

impl Intake {
    pub fn new(
        db: Database,
        store: Option<Arc<dyn ArtifactStore>>,
        dispatcher: Dispatcher,
        jobs: Arc<JobPipeline>,
        submissions: Arc<SubmissionPipeline>,
    ) -> Self {
        Self {
            db,
            store,
            dispatcher,
            jobs,
            submissions,
        }
    }

    /// Validates a paper upload, creates the job and stores the document.
    /// A failed store write marks the job `blob_upload_failed`.
    pub async fn create_job(
        &self,
        user_id: Option<&str>,
        paper: Option<Upload>,
        title: Option<&str>,
    ) -> Result<CreatedJob, IntakeError> {
        let paper = paper.ok_or(IntakeError::MissingPaperFile)?;
        if paper.bytes.is_empty() {
            return Err(IntakeError::EmptyFile);
        }
        if let Some(content_type) = paper.content_type.as_deref().filter(|t| !t.is_empty()) {
            if !content_type.contains("pdf") {
                return Err(IntakeError::InvalidFileType(content_type.to_string()));
            }
        }
        if paper.bytes.len() > MAX_PAPER_BYTES {
            return Err(IntakeError::PayloadTooLarge {
                limit: MAX_PAPER_BYTES,
            });
        }
        let store = self.store.as_ref().ok_or(IntakeError::StoreNotConfigured)?;

        let filename = safe_filename(paper.filename.as_deref(), DEFAULT_PAPER_NAME);
        let job = job_repo::create(
            &self.db,
            &NewJob {
                id: None,
                user_id: user_id.map(str::to_string),
                paper_title: title.map(str::trim).filter(|t| !t.is_empty()).map(str::to_string),
                paper_filename: Some(filename.clone()),
            },
        )?;

        let content_type = content_type_for(paper.content_type, &filename, "application/pdf");
        let artifact = match store
            .put(&paper_path(&job.id, &filename), paper.bytes, &content_type)
            .await
        {
            Ok(artifact) => artifact,
            Err(e) => return Err(self.upload_failed(&job.id, e)),
        };

        let job = job_repo::attach_upload(&self.db, &job.id, &artifact.url, &artifact.pathname)?
            .ok_or(IntakeError::NotQueueable)?;
        log::info!("Created job {} for '{}'", job.id, filename);
        Ok(CreatedJob { job, artifact })
    }

    fn upload_failed(&self, job_id: &str, error: StorageError) -> IntakeError {
        let message = error.to_string();
        log::warn!("Paper upload for job {} failed: {}", job_id, message);
        if let Err(e) = job_repo::mark_upload_failed(&self.db, job_id, &message) {
            log::error!("Failed to mark job {} upload_failed: {}", job_id, e);
        }
        IntakeError::UploadFailed(message)
    }

    /// Queues an uploaded job and dispatches it.
    ///
    /// A job that is already queued for the same owner is dispatched again;
    /// the guarded claim keeps a duplicate delivery from running it twice.
    pub async fn finalize_job(
        &self,
        job_id: &str,
        user_id: Option<&str>,
    ) -> Result<FinalizedJob, IntakeError> {
        let existing = job_repo::find_by_id(&self.db, job_id)?.ok_or(IntakeError::JobNotFound)?;
        check_owner(&existing, user_id)?;

        let queued = match job_repo::mark_queued(&self.db, job_id, existing.user_id.as_deref())? {
            Some(job) => job,
            None => job_repo::find_by_id(&self.db, job_id)?
                .filter(|job| job.status == WorkStatus::Queued)
                .ok_or(IntakeError::NotQueueable)?,
        };

        let jobs = Arc::clone(&self.jobs);
        let dispatch = self
            .dispatcher
            .dispatch(WorkKind::Job, &queued.id, |id| async move {
                jobs.process(&id).await
            })
            .await?;

        let job = match dispatch {
            DispatchOutcome::Inline(_) => job_repo::find_by_id(&self.db, job_id)?.unwrap_or(queued),
            DispatchOutcome::Enqueued { .. } => queued,
        };
        Ok(FinalizedJob { job, dispatch })
    }

    /// Validates and stores a submission archive, creates the submission and
    /// dispatches it.
    pub async fn submit(
        &self,
        user_id: Option<&str>,
        job_id: Option<&str>,
        language: Option<&str>,
        archive: Option<Upload>,
    ) -> Result<AcceptedSubmission, IntakeError> {
        let archive = archive.ok_or(IntakeError::MissingSubmission)?;
        let job_id = job_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(IntakeError::MissingJob)?;
        let job = job_repo::find_by_id(&self.db, job_id)?.ok_or(IntakeError::JobNotFound)?;
        check_owner(&job, user_id)?;

        if archive.bytes.is_empty() {
            return Err(IntakeError::EmptySubmission);
        }
        if archive.bytes.len() > MAX_SUBMISSION_BYTES {
            return Err(IntakeError::PayloadTooLarge {
                limit: MAX_SUBMISSION_BYTES,
            });
        }
        let store = self.store.as_ref().ok_or(IntakeError::StoreNotConfigured)?;

        let submission_id = submission_repo::generate_id();
        let filename = safe_filename(archive.filename.as_deref(), DEFAULT_ARCHIVE_NAME);
        let content_type = content_type_for(archive.content_type, &filename, "application/zip");
        let artifact = store
            .put(
                &submission_path(&submission_id, &filename),
                archive.bytes,
                &content_type,
            )
            .await
            .map_err(|e| IntakeError::UploadFailed(e.to_string()))?;

        let profile = resolve_profile(language.unwrap_or("typescript"));
        let submission = submission_repo::create(
            &self.db,
            &NewSubmission {
                id: Some(submission_id),
                user_id: user_id.map(str::to_string),
                job_id: job.id.clone(),
                language: profile.language.to_string(),
                runtime: profile.runtime.to_string(),
                filename,
                blob_url: artifact.url,
            },
        )?;
        log::info!(
            "Accepted submission {} for job {} ({})",
            submission.id,
            job.id,
            profile.language
        );

        let pipeline = Arc::clone(&self.submissions);
        let dispatch = self
            .dispatcher
            .dispatch(WorkKind::Submission, &submission.id, |id| async move {
                pipeline.process(&id).await
            })
            .await?;

        let submission = match dispatch {
            DispatchOutcome::Inline(_) => {
                submission_repo::find_by_id(&self.db, &submission.id)?.unwrap_or(submission)
            }
            DispatchOutcome::Enqueued { .. } => submission,
        };
        Ok(AcceptedSubmission {
            submission,
            dispatch,
        })
    }
}
