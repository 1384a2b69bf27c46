//! Submission repository: operations on the `submissions` table.

use rusqlite::types::ToSql;
use rusqlite::{params, Row};
use uuid::Uuid;

use super::work_record::{self, Assignment, WorkRow, CREATED_PROGRESS, RECEIVED_STAGE};
use super::{now_timestamp, Database, DatabaseError, WorkStatus};

/// A raw submission row from the database.
#[derive(Debug, Clone)]
pub struct SubmissionRow {
    pub id: String,
    pub user_id: Option<String>,
    pub job_id: String,
    pub language: String,
    pub runtime: String,
    pub status: WorkStatus,
    pub stage: Option<String>,
    pub progress_pct: i64,
    pub submission_filename: Option<String>,
    pub submission_blob_url: Option<String>,
    pub result_json: Option<String>,
    pub result_blob_url: Option<String>,
    pub exit_code: Option<i64>,
    pub duration_ms: Option<i64>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub attempt_count: i64,
    pub created_at: String,
    pub updated_at: String,
    pub claimed_at: Option<String>,
}

impl SubmissionRow {
    pub fn result(&self) -> Option<serde_json::Value> {
        self.result_json
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}

impl WorkRow for SubmissionRow {
    const TABLE: &'static str = "submissions";
    const CLAIM_STAGE: &'static str = "sandbox_start";
    const CLAIM_PROGRESS: i64 = 10;

    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            job_id: row.get("job_id")?,
            language: row.get("language")?,
            runtime: row.get("runtime")?,
            status: row.get("status")?,
            stage: row.get("stage")?,
            progress_pct: row.get("progress_pct")?,
            submission_filename: row.get("submission_filename")?,
            submission_blob_url: row.get("submission_blob_url")?,
            result_json: row.get("result_json")?,
            result_blob_url: row.get("result_blob_url")?,
            exit_code: row.get("exit_code")?,
            duration_ms: row.get("duration_ms")?,
            error_code: row.get("error_code")?,
            error_message: row.get("error_message")?,
            attempt_count: row.get("attempt_count")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            claimed_at: row.get("claimed_at")?,
        })
    }
}

/// Attributes supplied when a submission is created.
#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub id: Option<String>,
    pub user_id: Option<String>,
    pub job_id: String,
    pub language: String,
    pub runtime: String,
    pub filename: String,
    pub blob_url: String,
}

pub fn generate_id() -> String {
    format!("submission_{}", Uuid::new_v4().simple())
}

/// Inserts a submission. Submissions start out `queued`.
pub fn create(db: &Database, submission: &NewSubmission) -> Result<SubmissionRow, DatabaseError> {
    let id = submission.id.clone().unwrap_or_else(generate_id);
    let now = now_timestamp();
    work_record::insert_returning(
        db,
        "INSERT INTO submissions (id, user_id, job_id, language, runtime, status, stage,
         progress_pct, submission_filename, submission_blob_url, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
         RETURNING *",
        params![
            id,
            submission.user_id,
            submission.job_id,
            submission.language,
            submission.runtime,
            WorkStatus::Queued,
            RECEIVED_STAGE,
            CREATED_PROGRESS,
            submission.filename,
            submission.blob_url,
            now,
        ],
    )
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<SubmissionRow>, DatabaseError> {
    work_record::fetch(db, id)
}

/// Lists the submissions made against a job, newest first.
pub fn list_for_job(db: &Database, job_id: &str) -> Result<Vec<SubmissionRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM submissions WHERE job_id = ?1 ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt
            .query_map(params![job_id], SubmissionRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn mark_queued(
    db: &Database,
    id: &str,
    owner: Option<&str>,
) -> Result<Option<SubmissionRow>, DatabaseError> {
    work_record::mark_queued(db, id, owner)
}

pub fn claim(db: &Database, id: &str) -> Result<Option<SubmissionRow>, DatabaseError> {
    work_record::claim(db, id)
}

pub fn update_stage(
    db: &Database,
    id: &str,
    stage: &str,
    progress: i64,
) -> Result<Option<SubmissionRow>, DatabaseError> {
    work_record::update_stage(db, id, stage, progress)
}

/// Captured outcome of a sandbox run.
#[derive(Debug, Clone, Default)]
pub struct ExecutionRecord {
    pub result: Option<serde_json::Value>,
    pub result_blob_url: Option<String>,
    pub exit_code: Option<i64>,
    pub duration_ms: Option<i64>,
}

impl ExecutionRecord {
    fn encoded_result(&self) -> Result<Option<String>, DatabaseError> {
        Ok(match &self.result {
            Some(value) => Some(serde_json::to_string(value)?),
            None => None,
        })
    }
}

/// Marks a submission completed with its execution record.
pub fn complete(
    db: &Database,
    id: &str,
    record: &ExecutionRecord,
) -> Result<Option<SubmissionRow>, DatabaseError> {
    let result = record.encoded_result()?;
    let extra: [Assignment<'_>; 4] = [
        ("result_json", &result as &dyn ToSql),
        ("result_blob_url", &record.result_blob_url as &dyn ToSql),
        ("exit_code", &record.exit_code as &dyn ToSql),
        ("duration_ms", &record.duration_ms as &dyn ToSql),
    ];
    work_record::complete(db, id, &extra)
}

/// Marks a submission failed. A partial execution record is attached when
/// the failure happened after the command produced a result.
pub fn fail(
    db: &Database,
    id: &str,
    code: &str,
    message: &str,
    partial: Option<&ExecutionRecord>,
) -> Result<Option<SubmissionRow>, DatabaseError> {
    let empty = ExecutionRecord::default();
    let record = partial.unwrap_or(&empty);
    let result = record.encoded_result()?;
    let extra: [Assignment<'_>; 4] = [
        ("result_json", &result as &dyn ToSql),
        ("result_blob_url", &record.result_blob_url as &dyn ToSql),
        ("exit_code", &record.exit_code as &dyn ToSql),
        ("duration_ms", &record.duration_ms as &dyn ToSql),
    ];
    work_record::fail(db, id, code, message, &extra)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::job_repo::{self, NewJob};

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn new_submission(db: &Database) -> SubmissionRow {
        let job = job_repo::create(db, &NewJob::default()).unwrap();
        create(
            db,
            &NewSubmission {
                id: None,
                user_id: Some("u1".to_string()),
                job_id: job.id,
                language: "go".to_string(),
                runtime: "node22".to_string(),
                filename: "impl.zip".to_string(),
                blob_url: "mem://submissions/impl.zip".to_string(),
            },
        )
        .unwrap()
    }

    fn sample_record(exit_code: i64) -> ExecutionRecord {
        ExecutionRecord {
            result: Some(serde_json::json!({
                "exitCode": exit_code,
                "stdout": "ok",
                "stderr": "",
            })),
            result_blob_url: Some("mem://submissions/x/result.json".to_string()),
            exit_code: Some(exit_code),
            duration_ms: Some(1200),
        }
    }

    #[test]
    fn test_create_starts_queued() {
        let db = test_db();
        let sub = new_submission(&db);

        assert!(sub.id.starts_with("submission_"));
        assert_eq!(sub.status, WorkStatus::Queued);
        assert_eq!(sub.progress_pct, 5);
        assert_eq!(sub.stage.as_deref(), Some("receive_upload"));
        assert!(find_by_id(&db, &sub.id).unwrap().is_some());
    }

    #[test]
    fn test_claim_sets_sandbox_stage() {
        let db = test_db();
        let sub = new_submission(&db);

        let claimed = claim(&db, &sub.id).unwrap().unwrap();
        assert_eq!(claimed.status, WorkStatus::Running);
        assert_eq!(claimed.stage.as_deref(), Some("sandbox_start"));
        assert_eq!(claimed.progress_pct, 10);
        assert!(claim(&db, &sub.id).unwrap().is_none());
    }

    #[test]
    fn test_mark_queued_raises_floor_once() {
        let db = test_db();
        let sub = new_submission(&db);

        let queued = mark_queued(&db, &sub.id, Some("u1")).unwrap().unwrap();
        assert_eq!(queued.progress_pct, 15);
        assert!(mark_queued(&db, &sub.id, Some("u1")).unwrap().is_none());
    }

    #[test]
    fn test_complete_records_execution() {
        let db = test_db();
        let sub = new_submission(&db);
        claim(&db, &sub.id).unwrap();

        let done = complete(&db, &sub.id, &sample_record(0)).unwrap().unwrap();
        assert_eq!(done.status, WorkStatus::Completed);
        assert_eq!(done.stage.as_deref(), Some("finalize"));
        assert_eq!(done.progress_pct, 100);
        assert_eq!(done.exit_code, Some(0));
        assert_eq!(done.duration_ms, Some(1200));
        assert_eq!(done.result().unwrap()["exitCode"], 0);
    }

    #[test]
    fn test_fail_with_partial_result() {
        let db = test_db();
        let sub = new_submission(&db);
        claim(&db, &sub.id).unwrap();

        let failed = fail(&db, &sub.id, "tests_failed", "exit 1", Some(&sample_record(1)))
            .unwrap()
            .unwrap();
        assert_eq!(failed.status, WorkStatus::Failed);
        assert_eq!(failed.error_code.as_deref(), Some("tests_failed"));
        assert_eq!(failed.exit_code, Some(1));
        assert_eq!(failed.result().unwrap()["stdout"], "ok");
    }

    #[test]
    fn test_fail_without_partial_result() {
        let db = test_db();
        let sub = new_submission(&db);
        claim(&db, &sub.id).unwrap();

        let failed = fail(&db, &sub.id, "execution_failed", "sandbox down", None)
            .unwrap()
            .unwrap();
        assert!(failed.result_json.is_none());
        assert!(failed.exit_code.is_none());
    }

    #[test]
    fn test_completed_submission_cannot_fail() {
        let db = test_db();
        let sub = new_submission(&db);
        claim(&db, &sub.id).unwrap();
        complete(&db, &sub.id, &sample_record(0)).unwrap();

        assert!(fail(&db, &sub.id, "late", "late", None).unwrap().is_none());
        let row = find_by_id(&db, &sub.id).unwrap().unwrap();
        assert_eq!(row.status, WorkStatus::Completed);
    }

    #[test]
    fn test_list_for_job() {
        let db = test_db();
        let sub = new_submission(&db);
        let rows = list_for_job(&db, &sub.job_id).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(list_for_job(&db, "other").unwrap().is_empty());
    }
}
