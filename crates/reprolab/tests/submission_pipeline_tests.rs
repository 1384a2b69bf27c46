//! Submission pipeline scenarios against a scripted sandbox.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;

use common::doubles::ScriptedSandbox;
use common::TestHarness;

use reprolab::db::{snapshot_repo, submission_repo, WorkStatus};
use reprolab::pipeline::{ProcessResult, SubmissionPipeline};
use reprolab::sandbox::local::LocalSandboxBackend;
use reprolab::sandbox::{EnvironmentSource, SandboxExecutor};
use reprolab::storage::{submission_path, submission_result_path, MemoryArtifactStore};

#[tokio::test]
async fn test_go_submission_passes() {
    let harness =
        TestHarness::with_sandbox(ScriptedSandbox::new().on("go test", 0, "ok  example 0.01s", ""));
    let job = harness.queued_job(None).await;
    let submission = harness.queued_submission(&job.id, "go").await;

    let result = harness.submission_pipeline().process(&submission.id).await;
    assert_eq!(result, ProcessResult::completed(&submission.id));

    let row = submission_repo::find_by_id(&harness.db, &submission.id)
        .unwrap()
        .unwrap();
    assert_eq!(row.status, WorkStatus::Completed);
    assert_eq!(row.progress_pct, 100);
    assert_eq!(row.exit_code, Some(0));
    assert!(row.duration_ms.is_some());
    assert_eq!(
        row.result_blob_url.as_deref(),
        Some(MemoryArtifactStore::url_for(&submission_result_path(&submission.id)).as_str())
    );

    let report = row.result().unwrap();
    assert_eq!(report["exitCode"], 0);
    assert_eq!(report["stdout"], "ok  example 0.01s");
    assert_eq!(report["command"], "bash -lc cd workspace && go test ./...");

    let commands = harness.sandbox.commands();
    assert_eq!(
        commands,
        vec![
            "sudo dnf install -y golang".to_string(),
            "go version".to_string(),
            "unzip -o submission.zip -d workspace".to_string(),
            "bash -lc cd workspace && go test ./...".to_string(),
        ]
    );
    let files = harness.sandbox.files.lock().unwrap().clone();
    assert_eq!(files[0].0, "submission.zip");
}

#[tokio::test]
async fn test_failing_tests_record_output() {
    let harness = TestHarness::with_sandbox(ScriptedSandbox::new().on(
        "go test",
        1,
        "--- FAIL: TestAttention",
        "exit status 1",
    ));
    let job = harness.queued_job(None).await;
    let submission = harness.queued_submission(&job.id, "go").await;

    let result = harness.submission_pipeline().process(&submission.id).await;
    assert!(matches!(result, ProcessResult::Failed { .. }));

    let row = submission_repo::find_by_id(&harness.db, &submission.id)
        .unwrap()
        .unwrap();
    assert_eq!(row.status, WorkStatus::Failed);
    assert_eq!(row.error_code.as_deref(), Some("tests_failed"));
    assert_eq!(row.exit_code, Some(1));

    let report = row.result().unwrap();
    assert_eq!(report["exitCode"], 1);
    assert_eq!(report["stdout"], "--- FAIL: TestAttention");
    assert_eq!(report["stderr"], "exit status 1");
}

#[tokio::test]
async fn test_typescript_runs_on_base_runtime() {
    let harness = TestHarness::new();
    let job = harness.queued_job(None).await;
    let submission = harness.queued_submission(&job.id, "typescript").await;

    assert!(harness
        .submission_pipeline()
        .process(&submission.id)
        .await
        .is_completed());

    assert_eq!(
        harness.sandbox.provisions(),
        vec![EnvironmentSource::Runtime("node22".to_string())]
    );
    assert_eq!(harness.sandbox.snapshot_count(), 0);
    assert_eq!(harness.sandbox.ran("npx --yes tsx --test"), 1);
    assert!(snapshot_repo::find_by_language(&harness.db, "typescript")
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_snapshot_is_reused_until_it_expires() {
    let harness = TestHarness::new();
    let job = harness.queued_job(None).await;
    let pipeline = harness.submission_pipeline();

    for _ in 0..2 {
        let submission = harness.queued_submission(&job.id, "go").await;
        assert!(pipeline.process(&submission.id).await.is_completed());
    }
    assert_eq!(harness.sandbox.snapshot_count(), 1);
    assert_eq!(harness.sandbox.ran("dnf install"), 1);
    assert_eq!(
        harness.sandbox.provisions()[2],
        EnvironmentSource::Snapshot("snap_0".to_string())
    );

    // Force the cached snapshot to expire
    snapshot_repo::upsert(
        &harness.db,
        "go",
        "node22",
        "snap_0",
        Utc::now() - chrono::Duration::minutes(1),
    )
    .unwrap();

    let submission = harness.queued_submission(&job.id, "go").await;
    assert!(pipeline.process(&submission.id).await.is_completed());
    assert_eq!(harness.sandbox.snapshot_count(), 2);
    assert_eq!(harness.sandbox.ran("dnf install"), 2);

    let cached = snapshot_repo::find_live(&harness.db, "go").unwrap().unwrap();
    assert_eq!(cached.snapshot_id, "snap_1");
}

#[tokio::test]
async fn test_bootstrap_failure_fails_submission() {
    let harness =
        TestHarness::with_sandbox(ScriptedSandbox::new().on("dnf install", 1, "", "no network"));
    let job = harness.queued_job(None).await;
    let submission = harness.queued_submission(&job.id, "go").await;

    let result = harness.submission_pipeline().process(&submission.id).await;
    assert!(matches!(result, ProcessResult::Failed { .. }));

    let row = submission_repo::find_by_id(&harness.db, &submission.id)
        .unwrap()
        .unwrap();
    assert_eq!(row.error_code.as_deref(), Some("execution_failed"));
    assert!(row.error_message.unwrap().contains("no network"));
    assert_eq!(harness.sandbox.stopped(), vec!["sbx_0".to_string()]);
    assert_eq!(harness.sandbox.ran("go version"), 0);
    assert!(snapshot_repo::find_by_language(&harness.db, "go")
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_provision_failure_fails_submission() {
    let harness = TestHarness::with_sandbox(ScriptedSandbox::new().failing_provision());
    let job = harness.queued_job(None).await;
    let submission = harness.queued_submission(&job.id, "typescript").await;

    harness.submission_pipeline().process(&submission.id).await;

    let row = submission_repo::find_by_id(&harness.db, &submission.id)
        .unwrap()
        .unwrap();
    assert_eq!(row.status, WorkStatus::Failed);
    assert_eq!(row.error_code.as_deref(), Some("execution_failed"));
    assert!(harness.sandbox.commands().is_empty());
}

#[tokio::test]
async fn test_missing_archive_tears_down_sandbox() {
    let harness = TestHarness::new();
    let job = harness.queued_job(None).await;
    let submission = harness.queued_submission(&job.id, "typescript").await;
    assert!(harness
        .store
        .remove(&submission_path(&submission.id, "submission.zip")));

    let result = harness.submission_pipeline().process(&submission.id).await;
    assert!(matches!(result, ProcessResult::Failed { .. }));

    let row = submission_repo::find_by_id(&harness.db, &submission.id)
        .unwrap()
        .unwrap();
    assert_eq!(row.error_code.as_deref(), Some("execution_failed"));
    assert!(row.result_json.is_none());
    assert_eq!(harness.sandbox.stopped(), vec!["sbx_0".to_string()]);
    assert!(harness.sandbox.commands().is_empty());
}

#[tokio::test]
async fn test_unzip_warnings_are_tolerated() {
    let harness = TestHarness::with_sandbox(ScriptedSandbox::new().on(
        "unzip",
        1,
        "",
        "warning: skipped \"../\" path component(s)",
    ));
    let job = harness.queued_job(None).await;
    let submission = harness.queued_submission(&job.id, "typescript").await;

    assert!(harness
        .submission_pipeline()
        .process(&submission.id)
        .await
        .is_completed());
}

#[tokio::test]
async fn test_corrupt_archive_fails_execution() {
    let harness = TestHarness::with_sandbox(ScriptedSandbox::new().on(
        "unzip",
        9,
        "",
        "End-of-central-directory signature not found",
    ));
    let job = harness.queued_job(None).await;
    let submission = harness.queued_submission(&job.id, "typescript").await;

    harness.submission_pipeline().process(&submission.id).await;

    let row = submission_repo::find_by_id(&harness.db, &submission.id)
        .unwrap()
        .unwrap();
    assert_eq!(row.error_code.as_deref(), Some("execution_failed"));
    assert_eq!(harness.sandbox.ran("npx"), 0);
    assert_eq!(harness.sandbox.stopped().len(), 1);
}

#[tokio::test]
async fn test_redelivery_and_unknown_ids_are_skipped() {
    let harness = TestHarness::new();
    let job = harness.queued_job(None).await;
    let submission = harness.queued_submission(&job.id, "typescript").await;
    let pipeline = harness.submission_pipeline();

    assert!(pipeline.process(&submission.id).await.is_completed());
    assert_eq!(
        pipeline.process(&submission.id).await,
        ProcessResult::skipped("not_runnable")
    );
    assert_eq!(
        pipeline.process("submission_unknown").await,
        ProcessResult::skipped("submission_not_found")
    );
    assert_eq!(harness.sandbox.provisions().len(), 1);
}

#[tokio::test]
async fn test_out_of_range_lifetime_fails_instead_of_hanging() {
    let harness = TestHarness::new();
    let root = TempDir::new().unwrap();
    let backend = Arc::new(LocalSandboxBackend::new(
        root.path(),
        chrono::Duration::days(7),
    ));
    let executor = SandboxExecutor::new(backend, harness.db.clone(), Duration::MAX);
    let pipeline = SubmissionPipeline::new(harness.db.clone(), harness.store(), executor);

    let job = harness.queued_job(None).await;
    let submission = harness.queued_submission(&job.id, "typescript").await;

    let result = pipeline.process(&submission.id).await;
    assert!(matches!(result, ProcessResult::Failed { .. }));

    let row = submission_repo::find_by_id(&harness.db, &submission.id)
        .unwrap()
        .unwrap();
    assert_eq!(row.status, WorkStatus::Failed);
    assert_eq!(row.error_code.as_deref(), Some("execution_failed"));
}
