use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{info_span, Instrument};

use crate::db::job_repo::{self, JobCompletion};
use crate::db::Database;
use crate::error::StorageError;
use crate::model::FileRef;
use crate::processor::TitleExtractor;
use crate::scaffold::fallback::UNTITLED;
use crate::scaffold::{ScaffoldDocument, ScaffoldGenerator};
use crate::storage::{scaffold_result_path, ArtifactStore};

use super::context::JobContext;
use super::error::{PipelineError, PipelineWarning};
use super::outcome::ProcessResult;
use super::{stages, PROCESSING_FAILED};

const PDF_MIME: &str = "application/pdf";

/// How long a provider file reference stays usable. The provider deletes
/// uploads after 48 hours.
pub const DEFAULT_MODEL_FILE_TTL_HOURS: i64 = 46;

/// Turns an uploaded paper into a stored scaffold.
pub struct JobPipeline {
    db: Database,
    store: Arc<dyn ArtifactStore>,
    extractor: Arc<dyn TitleExtractor>,
    generator: Arc<ScaffoldGenerator>,
    model_file_ttl: chrono::Duration,
}

impl JobPipeline {
    pub fn new(
        db: Database,
        store: Arc<dyn ArtifactStore>,
        extractor: Arc<dyn TitleExtractor>,
        generator: Arc<ScaffoldGenerator>,
    ) -> Self {
        Self {
            db,
            store,
            extractor,
            generator,
            model_file_ttl: chrono::Duration::hours(DEFAULT_MODEL_FILE_TTL_HOURS),
        }
    }

    pub fn with_model_file_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.model_file_ttl = ttl;
        self
    }

    /// Runs one job to a terminal state. Never returns an error: failures
    /// are recorded on the job and reported in the result.
    pub async fn process(&self, job_id: &str) -> ProcessResult {
        let span = info_span!("pipeline.job", job_id = %job_id);
        self.process_inner(job_id).instrument(span).await
    }

    async fn process_inner(&self, job_id: &str) -> ProcessResult {
        let job = match job_repo::claim(&self.db, job_id) {
            Ok(Some(job)) => job,
            Ok(None) => {
                log::info!("Job {} is not runnable, skipping", job_id);
                return ProcessResult::skipped("job_not_runnable");
            }
            Err(e) => {
                log::error!("Failed to claim job {}: {}", job_id, e);
                return ProcessResult::failed(job_id, e.to_string());
            }
        };
        log::info!("Claimed job {} (attempt {})", job.id, job.attempt_count);

        let mut ctx = JobContext::new(job);
        match self.run(&mut ctx).await {
            Ok(()) => {
                if !ctx.warnings.is_empty() {
                    log::info!(
                        "Job {} completed with {} warning(s)",
                        job_id,
                        ctx.warnings.len()
                    );
                }
                ProcessResult::completed(job_id)
            }
            Err(e) => {
                let message = e.to_string();
                let code = e.code(PROCESSING_FAILED);
                log::error!("Job {} failed ({}): {}", job_id, code, message);
                if let Err(db_err) = job_repo::fail(&self.db, job_id, code, &message) {
                    log::error!("Failed to record failure of job {}: {}", job_id, db_err);
                }
                ProcessResult::failed(job_id, message)
            }
        }
    }

    async fn run(&self, ctx: &mut JobContext) -> Result<(), PipelineError> {
        self.step_fetch_document(ctx)
            .instrument(info_span!("fetch_document"))
            .await?;

        {
            let _step = info_span!("extract_title").entered();
            self.step_extract_title(ctx);
        }

        self.step_resolve_model_file(ctx)
            .instrument(info_span!("model_file"))
            .await;

        let (result, result_url) = self
            .step_generate_and_store(ctx)
            .instrument(info_span!("generate_scaffold"))
            .await?;

        let (stage, progress) = stages::FINALIZING;
        job_repo::update_stage(&self.db, &ctx.job.id, stage, progress)?;

        let completion = JobCompletion {
            result,
            result_blob_url: Some(result_url),
            title: ctx.title.clone(),
        };
        job_repo::complete(&self.db, &ctx.job.id, &completion)?
            .ok_or_else(|| PipelineError::RecordVanished(ctx.job.id.clone()))?;
        Ok(())
    }

    async fn step_fetch_document(&self, ctx: &mut JobContext) -> Result<(), PipelineError> {
        let url = ctx
            .job
            .paper_blob_url
            .clone()
            .ok_or_else(|| PipelineError::MissingDocument("paper blob url missing".to_string()))?;

        let (stage, progress) = stages::EXTRACTING;
        job_repo::update_stage(&self.db, &ctx.job.id, stage, progress)?;

        ctx.document = match self.store.fetch(&url).await {
            Ok(bytes) => bytes,
            Err(StorageError::NotFound(what)) => {
                return Err(PipelineError::MissingDocument(format!(
                    "paper blob not found: {}",
                    what
                )))
            }
            Err(e) => return Err(e.into()),
        };
        log::debug!("Fetched {} bytes for job {}", ctx.document.len(), ctx.job.id);
        Ok(())
    }

    fn step_extract_title(&self, ctx: &mut JobContext) {
        let stored = ctx.job.paper_title.clone();
        ctx.title = match self.extractor.extract_title(&ctx.document) {
            Ok(Some(title)) => Some(title),
            Ok(None) => stored,
            Err(e) => {
                ctx.warn(PipelineWarning::TitleExtractionFailed {
                    error: e.to_string(),
                });
                stored
            }
        };
    }

    /// Reuses the cached provider upload when it is recent enough, otherwise
    /// uploads the document and caches the new reference. Upload problems
    /// leave the prompt without an attachment.
    async fn step_resolve_model_file(&self, ctx: &mut JobContext) {
        let Some(client) = self.generator.model() else {
            return;
        };

        if let Some(cached) = cached_model_file(ctx, self.model_file_ttl, Utc::now()) {
            log::debug!("Reusing model file for job {}", ctx.job.id);
            ctx.model_file = Some(cached);
            return;
        }

        let display_name = ctx
            .job
            .paper_filename
            .clone()
            .unwrap_or_else(|| format!("{}.pdf", ctx.job.id));
        match client
            .upload_file(&display_name, ctx.document.clone(), PDF_MIME)
            .await
        {
            Ok(file) => {
                if let Err(e) =
                    job_repo::update_model_file(&self.db, &ctx.job.id, &file.uri, &file.mime_type)
                {
                    log::warn!("Failed to cache model file for job {}: {}", ctx.job.id, e);
                }
                ctx.model_file = Some(file);
            }
            Err(e) => ctx.warn(PipelineWarning::ModelFileUnavailable {
                error: e.to_string(),
            }),
        }
    }

    async fn step_generate_and_store(
        &self,
        ctx: &mut JobContext,
    ) -> Result<(Value, String), PipelineError> {
        let (stage, progress) = stages::GENERATING_SCAFFOLD;
        job_repo::update_stage(&self.db, &ctx.job.id, stage, progress)?;

        let outcome = self
            .generator
            .generate(ctx.title.as_deref(), ctx.model_file.as_ref())
            .await;
        if outcome.used_fallback() {
            log::info!("Job {} uses the fallback scaffold", ctx.job.id);
        }

        let title = ctx.title.as_deref().unwrap_or(UNTITLED);
        let document = serde_json::to_value(ScaffoldDocument::new(&ctx.job.id, title, &outcome))?;
        let bytes = serde_json::to_vec_pretty(&document)?;

        let stored = self
            .store
            .put(&scaffold_result_path(&ctx.job.id), bytes, "application/json")
            .await?;
        Ok((document, stored.url))
    }
}

fn cached_model_file(
    ctx: &JobContext,
    ttl: chrono::Duration,
    now: DateTime<Utc>,
) -> Option<FileRef> {
    let uri = ctx.job.model_file_uri.as_ref()?;
    let created = DateTime::parse_from_rfc3339(ctx.job.model_file_created_at.as_ref()?).ok()?;
    if now - created.with_timezone(&Utc) >= ttl {
        return None;
    }
    Some(FileRef {
        uri: uri.clone(),
        mime_type: ctx
            .job
            .model_file_mime
            .clone()
            .unwrap_or_else(|| PDF_MIME.to_string()),
    })
}
