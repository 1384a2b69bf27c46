use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use reprolab::db::{job_repo, submission_repo};
use reprolab::{
    handle_callback, load_settings, CallbackRequest, DispatchOutcome, JobRow, ProcessResult,
    Services, Settings, SubmissionRow, Upload, WorkKind,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file; the deployment environment is used when absent.
    #[arg(long, env = "REPROLAB_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LogFormat::Fmt, env = "REPROLAB_LOG_FORMAT")]
    log_format: LogFormat,

    /// User the intake commands act as.
    #[arg(long, env = "REPROLAB_USER")]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Fmt,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or upgrade the database schema.
    Migrate,
    /// Upload a paper and queue a job for it.
    Paper {
        path: PathBuf,
        #[arg(long)]
        title: Option<String>,
        /// Create the job without queueing it.
        #[arg(long)]
        no_finalize: bool,
    },
    /// Queue an uploaded job.
    Finalize { job_id: String },
    /// Upload a zip archive of a solution for a job.
    Submit {
        job_id: String,
        archive: PathBuf,
        #[arg(long, default_value = "typescript")]
        language: String,
    },
    /// Process one job in this process.
    RunJob { job_id: String },
    /// Process one submission in this process.
    RunSubmission { submission_id: String },
    /// Handle a queue delivery read from stdin, as the worker route would.
    Callback {
        #[arg(value_enum)]
        kind: CallbackKind,
        #[arg(long, env = "UPSTASH_SIGNATURE")]
        signature: Option<String>,
    },
    /// Print a job or submission record.
    Show { id: String },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CallbackKind {
    Job,
    Submission,
}

impl From<CallbackKind> for WorkKind {
    fn from(kind: CallbackKind) -> Self {
        match kind {
            CallbackKind::Job => WorkKind::Job,
            CallbackKind::Submission => WorkKind::Submission,
        }
    }
}

fn init_logging(format: LogFormat) -> anyhow::Result<()> {
    tracing_log::LogTracer::init().context("failed to install log bridge")?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,reprolab=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Fmt => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
    }
    .context("failed to install tracing subscriber")
}

fn load(config: Option<&Path>) -> anyhow::Result<Settings> {
    match config {
        Some(path) => load_settings(path)
            .with_context(|| format!("failed to load settings from {}", path.display())),
        None => Settings::from_env().context("failed to read settings from the environment"),
    }
}

fn read_upload(path: &Path, content_type: &str) -> anyhow::Result<Upload> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(Upload {
        filename: path.file_name().map(|n| n.to_string_lossy().into_owned()),
        content_type: Some(content_type.to_string()),
        bytes,
    })
}

fn dispatch_json(outcome: &DispatchOutcome<ProcessResult>) -> Value {
    match outcome {
        DispatchOutcome::Enqueued { message_id } => {
            json!({ "mode": "queued", "messageId": message_id })
        }
        DispatchOutcome::Inline(result) => json!({ "mode": "inline", "result": result }),
    }
}

fn job_json(job: &JobRow) -> Value {
    json!({
        "id": job.id,
        "status": job.status.as_str(),
        "stage": job.stage,
        "progressPct": job.progress_pct,
        "paperTitle": job.paper_title,
        "paperFilename": job.paper_filename,
        "resultBlobUrl": job.result_blob_url,
        "errorCode": job.error_code,
        "errorMessage": job.error_message,
        "attempts": job.attempt_count,
        "updatedAt": job.updated_at,
    })
}

fn submission_json(submission: &SubmissionRow) -> Value {
    json!({
        "id": submission.id,
        "jobId": submission.job_id,
        "language": submission.language,
        "status": submission.status.as_str(),
        "stage": submission.stage,
        "progressPct": submission.progress_pct,
        "exitCode": submission.exit_code,
        "durationMs": submission.duration_ms,
        "resultBlobUrl": submission.result_blob_url,
        "errorCode": submission.error_code,
        "errorMessage": submission.error_message,
        "attempts": submission.attempt_count,
        "updatedAt": submission.updated_at,
    })
}

fn print(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format)?;
    log::info!("Starting reprolab worker v{}", env!("CARGO_PKG_VERSION"));

    let settings = load(cli.config.as_deref())?;
    let services = Services::from_settings(&settings).context("failed to start services")?;
    let user = cli.user.as_deref();

    match cli.command {
        Commands::Migrate => {
            tracing::info!("Database schema is up to date");
        }
        Commands::Paper {
            path,
            title,
            no_finalize,
        } => {
            let upload = read_upload(&path, "application/pdf")?;
            let created = services
                .intake
                .create_job(user, Some(upload), title.as_deref())
                .await
                .map_err(|e| anyhow::anyhow!("{} ({})", e, e.code()))?;
            if no_finalize {
                print(&job_json(&created.job))?;
            } else {
                let finalized = services
                    .intake
                    .finalize_job(&created.job.id, user)
                    .await
                    .map_err(|e| anyhow::anyhow!("{} ({})", e, e.code()))?;
                print(&json!({
                    "job": job_json(&finalized.job),
                    "dispatch": dispatch_json(&finalized.dispatch),
                }))?;
            }
        }
        Commands::Finalize { job_id } => {
            let finalized = services
                .intake
                .finalize_job(&job_id, user)
                .await
                .map_err(|e| anyhow::anyhow!("{} ({})", e, e.code()))?;
            print(&json!({
                "job": job_json(&finalized.job),
                "dispatch": dispatch_json(&finalized.dispatch),
            }))?;
        }
        Commands::Submit {
            job_id,
            archive,
            language,
        } => {
            let upload = read_upload(&archive, "application/zip")?;
            let accepted = services
                .intake
                .submit(user, Some(&job_id), Some(&language), Some(upload))
                .await
                .map_err(|e| anyhow::anyhow!("{} ({})", e, e.code()))?;
            print(&json!({
                "submission": submission_json(&accepted.submission),
                "dispatch": dispatch_json(&accepted.dispatch),
            }))?;
        }
        Commands::RunJob { job_id } => {
            let result = services.jobs.process(&job_id).await;
            print(&serde_json::to_value(&result)?)?;
        }
        Commands::RunSubmission { submission_id } => {
            let result = services.submissions.process(&submission_id).await;
            print(&serde_json::to_value(&result)?)?;
        }
        Commands::Callback { kind, signature } => {
            let kind = WorkKind::from(kind);
            let mut body = Vec::new();
            std::io::stdin()
                .read_to_end(&mut body)
                .context("failed to read callback body")?;
            let url = services.dispatcher.callback_url(kind);
            let request = CallbackRequest {
                url: &url,
                signature: signature.as_deref(),
                body: &body,
            };

            let jobs = services.jobs.clone();
            let submissions = services.submissions.clone();
            let response = handle_callback(kind, request, &services.verifier, |id| async move {
                match kind {
                    WorkKind::Job => jobs.process(&id).await,
                    WorkKind::Submission => submissions.process(&id).await,
                }
            })
            .await;
            print(&json!({ "status": response.status, "body": response.body }))?;
            if response.status != 200 {
                std::process::exit(1);
            }
        }
        Commands::Show { id } => {
            if let Some(job) = job_repo::find_by_id(&services.db, &id)? {
                let submissions = submission_repo::list_for_job(&services.db, &id)?;
                print(&json!({
                    "job": job_json(&job),
                    "result": job.result(),
                    "submissions": submissions.iter().map(submission_json).collect::<Vec<_>>(),
                }))?;
            } else if let Some(submission) = submission_repo::find_by_id(&services.db, &id)? {
                print(&json!({
                    "submission": submission_json(&submission),
                    "result": submission.result(),
                }))?;
            } else {
                bail!("no job or submission with id '{}'", id);
            }
        }
    }

    Ok(())
}
