use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{info_span, Instrument};

use crate::db::submission_repo::{self, ExecutionRecord};
use crate::db::Database;
use crate::error::{SandboxError, StorageError};
use crate::sandbox::{resolve_profile, CommandOutput, SandboxCommand, SandboxExecutor};
use crate::sanitize::truncate;
use crate::storage::{submission_result_path, ArtifactStore};

use super::context::SubmissionContext;
use super::error::PipelineError;
use super::outcome::ProcessResult;
use super::{stages, EXECUTION_FAILED, TESTS_FAILED};

const ARCHIVE_NAME: &str = "submission.zip";
const WORKSPACE_DIR: &str = "workspace";

/// Persisted outcome of the test command.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub exit_code: i32,
    pub duration_ms: i64,
    pub command: String,
    pub stdout: String,
    pub stderr: String,
}

/// The test command for a language, run from the environment root.
pub fn run_command_for(language: &str) -> SandboxCommand {
    match language {
        "go" => SandboxCommand::shell(format!("cd {} && go test ./...", WORKSPACE_DIR)),
        _ => SandboxCommand::shell(format!(
            "cd {} && if [ -f package.json ]; then npm install --silent && npx --yes tsx --test; \
             else printf \"No tests configured\\n\"; fi",
            WORKSPACE_DIR
        )),
    }
}

/// Runs a submitted archive's tests in a fresh sandbox.
pub struct SubmissionPipeline {
    db: Database,
    store: Arc<dyn ArtifactStore>,
    sandbox: SandboxExecutor,
}

impl SubmissionPipeline {
    pub fn new(db: Database, store: Arc<dyn ArtifactStore>, sandbox: SandboxExecutor) -> Self {
        Self { db, store, sandbox }
    }

    /// Runs one submission to a terminal state. The sandbox is torn down on
    /// every path once it exists.
    pub async fn process(&self, submission_id: &str) -> ProcessResult {
        let span = info_span!("pipeline.submission", submission_id = %submission_id);
        self.process_inner(submission_id).instrument(span).await
    }

    async fn process_inner(&self, id: &str) -> ProcessResult {
        match submission_repo::find_by_id(&self.db, id) {
            Ok(Some(_)) => {}
            Ok(None) => return ProcessResult::skipped("submission_not_found"),
            Err(e) => {
                log::error!("Failed to load submission {}: {}", id, e);
                return ProcessResult::failed(id, e.to_string());
            }
        }

        let submission = match submission_repo::claim(&self.db, id) {
            Ok(Some(row)) => row,
            Ok(None) => {
                log::info!("Submission {} is not runnable, skipping", id);
                return ProcessResult::skipped("not_runnable");
            }
            Err(e) => {
                log::error!("Failed to claim submission {}: {}", id, e);
                return ProcessResult::failed(id, e.to_string());
            }
        };

        let started = Instant::now();
        let profile = resolve_profile(&submission.language);
        let env = match self
            .sandbox
            .create_environment(&profile)
            .instrument(info_span!("provision", language = profile.language))
            .await
        {
            Ok(env) => env,
            Err(e) => return self.record_failure(id, &e.to_string()),
        };

        let ctx = SubmissionContext {
            submission,
            profile,
            env,
            started,
        };
        let executed = self.execute(&ctx).await;
        self.sandbox.teardown(&ctx.env).await;

        match executed {
            Ok((command, output)) => self.finish(&ctx, &command, output).await,
            Err(e) => self.record_failure(id, &e.to_string()),
        }
    }

    async fn execute(
        &self,
        ctx: &SubmissionContext,
    ) -> Result<(SandboxCommand, CommandOutput), PipelineError> {
        let id = &ctx.submission.id;

        let (stage, progress) = stages::DOWNLOAD;
        submission_repo::update_stage(&self.db, id, stage, progress)?;
        let url = ctx
            .submission
            .submission_blob_url
            .as_deref()
            .ok_or_else(|| PipelineError::MissingDocument("submission blob missing".to_string()))?;
        let archive = match self.store.fetch(url).await {
            Ok(bytes) => bytes,
            Err(StorageError::NotFound(what)) => {
                return Err(PipelineError::MissingDocument(format!(
                    "submission blob not found: {}",
                    what
                )))
            }
            Err(e) => return Err(e.into()),
        };
        self.sandbox
            .write_file(&ctx.env, ARCHIVE_NAME, archive)
            .await?;
        self.sandbox.make_dir(&ctx.env, WORKSPACE_DIR).await?;

        let (stage, progress) = stages::UNPACK;
        submission_repo::update_stage(&self.db, id, stage, progress)?;
        let unzip = SandboxCommand::new("unzip").args(["-o", ARCHIVE_NAME, "-d", WORKSPACE_DIR]);
        let unpacked = self.sandbox.run_command(&ctx.env, &unzip).await?;
        // unzip exits 1 for warnings with the archive still extracted
        if unpacked.exit_code > 1 {
            return Err(SandboxError::Command {
                command: unzip.to_string(),
                reason: format!(
                    "exited with {}: {}",
                    unpacked.exit_code,
                    truncate(&unpacked.stderr, 500)
                ),
            }
            .into());
        }

        let (stage, progress) = stages::EXECUTE;
        submission_repo::update_stage(&self.db, id, stage, progress)?;
        let command = run_command_for(ctx.profile.language);
        let output = self
            .sandbox
            .run_command(&ctx.env, &command)
            .instrument(info_span!("run_tests"))
            .await?;
        log::info!("Submission {} exited with {}", id, output.exit_code);
        Ok((command, output))
    }

    /// Persists the report and records the terminal state from the exit code.
    async fn finish(
        &self,
        ctx: &SubmissionContext,
        command: &SandboxCommand,
        output: CommandOutput,
    ) -> ProcessResult {
        let id = ctx.submission.id.as_str();
        let duration_ms = i64::try_from(ctx.started.elapsed().as_millis()).unwrap_or(i64::MAX);
        let exit_code = output.exit_code;
        let report = ExecutionReport {
            exit_code,
            duration_ms,
            command: command.to_string(),
            stdout: output.stdout,
            stderr: output.stderr,
        };

        let value = match serde_json::to_value(&report) {
            Ok(value) => value,
            Err(e) => return self.record_failure(id, &e.to_string()),
        };
        let result_blob_url = match serde_json::to_vec_pretty(&value) {
            Ok(bytes) => match self
                .store
                .put(&submission_result_path(id), bytes, "application/json")
                .await
            {
                Ok(stored) => Some(stored.url),
                Err(e) => {
                    log::warn!("Failed to store result for submission {}: {}", id, e);
                    None
                }
            },
            Err(e) => {
                log::warn!("Failed to encode result for submission {}: {}", id, e);
                None
            }
        };

        let record = ExecutionRecord {
            result: Some(value),
            result_blob_url,
            exit_code: Some(i64::from(exit_code)),
            duration_ms: Some(duration_ms),
        };

        if exit_code == 0 {
            match submission_repo::complete(&self.db, id, &record) {
                Ok(_) => ProcessResult::completed(id),
                Err(e) => {
                    log::error!("Failed to complete submission {}: {}", id, e);
                    ProcessResult::failed(id, e.to_string())
                }
            }
        } else {
            let message = "tests failed";
            if let Err(e) = submission_repo::fail(&self.db, id, TESTS_FAILED, message, Some(&record))
            {
                log::error!("Failed to record failure of submission {}: {}", id, e);
            }
            ProcessResult::failed(id, message)
        }
    }

    fn record_failure(&self, id: &str, message: &str) -> ProcessResult {
        log::error!("Submission {} failed ({}): {}", id, EXECUTION_FAILED, message);
        if let Err(e) = submission_repo::fail(&self.db, id, EXECUTION_FAILED, message, None) {
            log::error!("Failed to record failure of submission {}: {}", id, e);
        }
        ProcessResult::failed(id, message)
    }
}
