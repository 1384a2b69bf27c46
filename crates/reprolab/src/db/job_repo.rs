//! Job repository: operations on the `jobs` table.

use rusqlite::types::ToSql;
use rusqlite::{params, Row};
use uuid::Uuid;

use super::work_record::{self, Assignment, WorkRow, CREATED_PROGRESS, RECEIVED_STAGE};
use super::{now_timestamp, Database, DatabaseError, WorkStatus};

/// Progress after a successful upload attachment.
const UPLOADED_PROGRESS: i64 = 10;

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub user_id: Option<String>,
    pub status: WorkStatus,
    pub stage: Option<String>,
    pub progress_pct: i64,
    pub paper_title: Option<String>,
    pub paper_filename: Option<String>,
    pub paper_blob_url: Option<String>,
    pub paper_blob_path: Option<String>,
    pub model_file_uri: Option<String>,
    pub model_file_mime: Option<String>,
    pub model_file_created_at: Option<String>,
    pub result_json: Option<String>,
    pub result_blob_url: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub attempt_count: i64,
    pub created_at: String,
    pub updated_at: String,
    pub claimed_at: Option<String>,
}

impl JobRow {
    /// Parses the inline result payload, if any.
    pub fn result(&self) -> Option<serde_json::Value> {
        self.result_json
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}

impl WorkRow for JobRow {
    const TABLE: &'static str = "jobs";
    const CLAIM_STAGE: &'static str = "processing";
    const CLAIM_PROGRESS: i64 = 25;

    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            status: row.get("status")?,
            stage: row.get("stage")?,
            progress_pct: row.get("progress_pct")?,
            paper_title: row.get("paper_title")?,
            paper_filename: row.get("paper_filename")?,
            paper_blob_url: row.get("paper_blob_url")?,
            paper_blob_path: row.get("paper_blob_path")?,
            model_file_uri: row.get("model_file_uri")?,
            model_file_mime: row.get("model_file_mime")?,
            model_file_created_at: row.get("model_file_created_at")?,
            result_json: row.get("result_json")?,
            result_blob_url: row.get("result_blob_url")?,
            error_code: row.get("error_code")?,
            error_message: row.get("error_message")?,
            attempt_count: row.get("attempt_count")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            claimed_at: row.get("claimed_at")?,
        })
    }
}

/// Attributes supplied when a job is created.
#[derive(Debug, Default, Clone)]
pub struct NewJob {
    /// Explicit ID; generated as `job_<uuid>` when absent.
    pub id: Option<String>,
    pub user_id: Option<String>,
    pub paper_title: Option<String>,
    pub paper_filename: Option<String>,
}

/// Generates a fresh job identifier.
pub fn generate_id() -> String {
    format!("job_{}", Uuid::new_v4().simple())
}

/// Inserts a job in `uploading` status.
pub fn create(db: &Database, job: &NewJob) -> Result<JobRow, DatabaseError> {
    let id = job.id.clone().unwrap_or_else(generate_id);
    let now = now_timestamp();
    work_record::insert_returning(
        db,
        "INSERT INTO jobs (id, user_id, status, stage, progress_pct, paper_title,
         paper_filename, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
         RETURNING *",
        params![
            id,
            job.user_id,
            WorkStatus::Uploading,
            RECEIVED_STAGE,
            CREATED_PROGRESS,
            job.paper_title,
            job.paper_filename,
            now,
        ],
    )
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    work_record::fetch(db, id)
}

/// Queues an uploaded job for processing. See [`work_record::mark_queued`].
pub fn mark_queued(
    db: &Database,
    id: &str,
    owner: Option<&str>,
) -> Result<Option<JobRow>, DatabaseError> {
    work_record::mark_queued(db, id, owner)
}

/// Claims a queued job. See [`work_record::claim`].
pub fn claim(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    work_record::claim(db, id)
}

pub fn update_stage(
    db: &Database,
    id: &str,
    stage: &str,
    progress: i64,
) -> Result<Option<JobRow>, DatabaseError> {
    work_record::update_stage(db, id, stage, progress)
}

/// Result of a finished job.
#[derive(Debug, Clone)]
pub struct JobCompletion {
    pub result: serde_json::Value,
    pub result_blob_url: Option<String>,
    /// Replaces the stored title when present.
    pub title: Option<String>,
}

/// Marks a job completed and stores its result.
pub fn complete(
    db: &Database,
    id: &str,
    completion: &JobCompletion,
) -> Result<Option<JobRow>, DatabaseError> {
    let result = serde_json::to_string(&completion.result)?;
    let title = completion
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let mut extra: Vec<Assignment<'_>> = vec![
        ("result_json", &result as &dyn ToSql),
        ("result_blob_url", &completion.result_blob_url as &dyn ToSql),
    ];
    if let Some(title) = &title {
        extra.push(("paper_title", title as &dyn ToSql));
    }
    work_record::complete(db, id, &extra)
}

/// Marks a job failed.
pub fn fail(
    db: &Database,
    id: &str,
    code: &str,
    message: &str,
) -> Result<Option<JobRow>, DatabaseError> {
    work_record::fail(db, id, code, message, &[])
}

/// Records the stored document after a successful upload.
pub fn attach_upload(
    db: &Database,
    id: &str,
    blob_url: &str,
    blob_path: &str,
) -> Result<Option<JobRow>, DatabaseError> {
    work_record::transition(
        db,
        id,
        "paper_blob_url = ?3, paper_blob_path = ?4, stage = 'uploaded', \
         progress_pct = MAX(progress_pct, ?5)",
        "status = 'uploading'",
        params![blob_url, blob_path, UPLOADED_PROGRESS],
        &[],
    )
}

/// Marks a job whose document could not be stored.
pub fn mark_upload_failed(
    db: &Database,
    id: &str,
    message: &str,
) -> Result<Option<JobRow>, DatabaseError> {
    work_record::transition(
        db,
        id,
        "status = 'failed', stage = 'upload_failed', error_code = 'blob_upload_failed', \
         error_message = ?3",
        "status = 'uploading'",
        params![message],
        &[],
    )
}

/// Caches the provider-side file reference for the job's document.
pub fn update_model_file(
    db: &Database,
    id: &str,
    uri: &str,
    mime_type: &str,
) -> Result<Option<JobRow>, DatabaseError> {
    let now = now_timestamp();
    work_record::transition(
        db,
        id,
        "model_file_uri = ?3, model_file_mime = ?4, model_file_created_at = ?5",
        "status = 'running'",
        params![uri, mime_type, now],
        &[],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn owned_job(db: &Database, user: &str) -> JobRow {
        create(
            db,
            &NewJob {
                user_id: Some(user.to_string()),
                paper_filename: Some("paper.pdf".to_string()),
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn queued_job(db: &Database) -> JobRow {
        let job = owned_job(db, "u1");
        mark_queued(db, &job.id, Some("u1")).unwrap().unwrap()
    }

    #[test]
    fn test_create_and_find() {
        let db = test_db();
        let job = owned_job(&db, "u1");

        assert!(job.id.starts_with("job_"));
        assert_eq!(job.status, WorkStatus::Uploading);
        assert_eq!(job.stage.as_deref(), Some("receive_upload"));
        assert_eq!(job.progress_pct, 5);
        assert_eq!(job.attempt_count, 0);

        let found = find_by_id(&db, &job.id).unwrap().unwrap();
        assert_eq!(found.paper_filename.as_deref(), Some("paper.pdf"));
        assert_eq!(found.user_id.as_deref(), Some("u1"));
    }

    #[test]
    fn test_find_nonexistent() {
        let db = test_db();
        assert!(find_by_id(&db, "nonexistent").unwrap().is_none());
    }

    #[test]
    fn test_explicit_id_is_kept() {
        let db = test_db();
        let job = create(
            &db,
            &NewJob {
                id: Some("job_fixed".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(job.id, "job_fixed");
    }

    #[test]
    fn test_mark_queued_requires_owner() {
        let db = test_db();
        let job = owned_job(&db, "u1");

        assert!(mark_queued(&db, &job.id, Some("u2")).unwrap().is_none());
        assert!(mark_queued(&db, &job.id, None).unwrap().is_none());

        let queued = mark_queued(&db, &job.id, Some("u1")).unwrap().unwrap();
        assert_eq!(queued.status, WorkStatus::Queued);
        assert_eq!(queued.progress_pct, 15);
    }

    #[test]
    fn test_mark_queued_anonymous_job() {
        let db = test_db();
        let job = create(&db, &NewJob::default()).unwrap();
        assert!(mark_queued(&db, &job.id, None).unwrap().is_some());
    }

    #[test]
    fn test_mark_queued_twice_leaves_row_unchanged() {
        let db = test_db();
        let job = owned_job(&db, "u1");

        let first = mark_queued(&db, &job.id, Some("u1")).unwrap().unwrap();
        assert!(mark_queued(&db, &job.id, Some("u1")).unwrap().is_none());

        let after = find_by_id(&db, &job.id).unwrap().unwrap();
        assert_eq!(after.status, first.status);
        assert_eq!(after.progress_pct, first.progress_pct);
        assert_eq!(after.updated_at, first.updated_at);
    }

    #[test]
    fn test_claim_only_once() {
        let db = test_db();
        let job = queued_job(&db);

        let claimed = claim(&db, &job.id).unwrap().unwrap();
        assert_eq!(claimed.status, WorkStatus::Running);
        assert_eq!(claimed.stage.as_deref(), Some("processing"));
        assert_eq!(claimed.progress_pct, 25);
        assert_eq!(claimed.attempt_count, 1);
        assert!(claimed.claimed_at.is_some());

        assert!(claim(&db, &job.id).unwrap().is_none());
    }

    #[test]
    fn test_claim_requires_queued() {
        let db = test_db();
        let job = owned_job(&db, "u1");
        assert!(claim(&db, &job.id).unwrap().is_none());
        assert!(claim(&db, "missing").unwrap().is_none());
    }

    #[test]
    fn test_update_stage_is_monotonic() {
        let db = test_db();
        let job = queued_job(&db);
        claim(&db, &job.id).unwrap();

        update_stage(&db, &job.id, "generating_scaffold", 80).unwrap();
        let row = update_stage(&db, &job.id, "extracting", 40).unwrap().unwrap();

        assert_eq!(row.progress_pct, 80);
        assert_eq!(row.stage.as_deref(), Some("extracting"));
    }

    #[test]
    fn test_complete_stores_result_and_title() {
        let db = test_db();
        let job = queued_job(&db);
        claim(&db, &job.id).unwrap();

        let done = complete(
            &db,
            &job.id,
            &JobCompletion {
                result: serde_json::json!({"tasks": ["A"]}),
                result_blob_url: Some("mem://results/x".to_string()),
                title: Some("  Attention  ".to_string()),
            },
        )
        .unwrap()
        .unwrap();

        assert_eq!(done.status, WorkStatus::Completed);
        assert_eq!(done.progress_pct, 100);
        assert_eq!(done.paper_title.as_deref(), Some("Attention"));
        assert_eq!(done.result().unwrap()["tasks"][0], "A");
        assert_eq!(done.result_blob_url.as_deref(), Some("mem://results/x"));
    }

    #[test]
    fn test_complete_keeps_existing_title() {
        let db = test_db();
        let job = create(
            &db,
            &NewJob {
                paper_title: Some("Original".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        mark_queued(&db, &job.id, None).unwrap();
        claim(&db, &job.id).unwrap();

        let done = complete(
            &db,
            &job.id,
            &JobCompletion {
                result: serde_json::json!({}),
                result_blob_url: None,
                title: None,
            },
        )
        .unwrap()
        .unwrap();
        assert_eq!(done.paper_title.as_deref(), Some("Original"));
    }

    #[test]
    fn test_terminal_rows_are_sinks() {
        let db = test_db();
        let job = queued_job(&db);
        claim(&db, &job.id).unwrap();
        fail(&db, &job.id, "processing_failed", "boom").unwrap().unwrap();

        assert!(update_stage(&db, &job.id, "late", 99).unwrap().is_none());
        assert!(fail(&db, &job.id, "other", "again").unwrap().is_none());
        assert!(mark_queued(&db, &job.id, Some("u1")).unwrap().is_none());

        let row = find_by_id(&db, &job.id).unwrap().unwrap();
        assert_eq!(row.status, WorkStatus::Failed);
        assert_eq!(row.error_code.as_deref(), Some("processing_failed"));
        assert_eq!(row.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_attach_upload() {
        let db = test_db();
        let job = owned_job(&db, "u1");

        let row = attach_upload(&db, &job.id, "https://blob/x.pdf", "papers/x.pdf")
            .unwrap()
            .unwrap();
        assert_eq!(row.stage.as_deref(), Some("uploaded"));
        assert_eq!(row.progress_pct, 10);
        assert_eq!(row.paper_blob_url.as_deref(), Some("https://blob/x.pdf"));
        assert_eq!(row.status, WorkStatus::Uploading);
    }

    #[test]
    fn test_mark_upload_failed() {
        let db = test_db();
        let job = owned_job(&db, "u1");

        let row = mark_upload_failed(&db, &job.id, "network down")
            .unwrap()
            .unwrap();
        assert_eq!(row.status, WorkStatus::Failed);
        assert_eq!(row.error_code.as_deref(), Some("blob_upload_failed"));
    }

    #[test]
    fn test_update_model_file() {
        let db = test_db();
        let job = queued_job(&db);
        claim(&db, &job.id).unwrap();

        let row = update_model_file(&db, &job.id, "files/abc", "application/pdf")
            .unwrap()
            .unwrap();
        assert_eq!(row.model_file_uri.as_deref(), Some("files/abc"));
        assert_eq!(row.model_file_mime.as_deref(), Some("application/pdf"));
        assert!(row.model_file_created_at.is_some());
    }
}
