//! State transitions shared by every work record table.
//!
//! Each transition is one guarded `UPDATE … RETURNING *` on a single row. The
//! guard in the WHERE clause is the only concurrency control: when two workers
//! race, SQLite applies one update and the other matches zero rows.

use rusqlite::types::ToSql;
use rusqlite::{params, Row};

use super::{now_timestamp, Database, DatabaseError, WorkStatus};

/// Progress floor for freshly created records.
pub const CREATED_PROGRESS: i64 = 5;
/// Progress floor once a record is queued.
pub const QUEUED_PROGRESS: i64 = 15;
/// Stage written on creation.
pub const RECEIVED_STAGE: &str = "receive_upload";
/// Stage written by `mark_queued`.
pub const QUEUED_STAGE: &str = "queued";
/// Stage written by `complete`.
pub const FINAL_STAGE: &str = "finalize";
/// Stage written by `fail`.
pub const FAILED_STAGE: &str = "failed";

const NOT_TERMINAL: &str = "status NOT IN ('completed', 'failed')";

/// A table of work records that share the status/stage/progress triple.
pub trait WorkRow: Sized {
    /// Table name. Must be a plain SQL identifier.
    const TABLE: &'static str;
    /// Stage written by a successful claim.
    const CLAIM_STAGE: &'static str;
    /// Progress floor applied by a successful claim.
    const CLAIM_PROGRESS: i64;

    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error>;
}

/// An extra `column = value` assignment appended to a transition.
pub type Assignment<'a> = (&'static str, &'a dyn ToSql);

/// Finds a record by ID.
pub fn fetch<R: WorkRow>(db: &Database, id: &str) -> Result<Option<R>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!("SELECT * FROM {} WHERE id = ?1", R::TABLE))?;
        let mut rows = stmt.query_map(params![id], R::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Moves an `uploading` or not-yet-floored `queued` record to `queued`.
///
/// The owner guard uses `IS` so anonymous records (NULL owner) match a `None`
/// guard. Returns `None` when the guard fails, the status has advanced, or the
/// record was already queued by an earlier call; in all of those cases the
/// row is left untouched.
pub fn mark_queued<R: WorkRow>(
    db: &Database,
    id: &str,
    owner: Option<&str>,
) -> Result<Option<R>, DatabaseError> {
    transition(
        db,
        id,
        "status = 'queued', stage = ?3, progress_pct = MAX(progress_pct, ?4)",
        "user_id IS ?5 AND (status = 'uploading' \
         OR (status = 'queued' AND (progress_pct < ?4 OR stage IS NOT ?3)))",
        params![QUEUED_STAGE, QUEUED_PROGRESS, owner],
        &[],
    )
}

/// Claims a queued record for exactly one worker.
///
/// `None` means another worker holds it or it was never queued.
pub fn claim<R: WorkRow>(db: &Database, id: &str) -> Result<Option<R>, DatabaseError> {
    let now = now_timestamp();
    transition(
        db,
        id,
        "status = 'running', stage = ?3, progress_pct = MAX(progress_pct, ?4), \
         claimed_at = ?5, attempt_count = attempt_count + 1",
        "status = 'queued'",
        params![R::CLAIM_STAGE, R::CLAIM_PROGRESS, now],
        &[],
    )
}

/// Records a stage change. Progress never moves backwards and terminal
/// records are left as they are.
pub fn update_stage<R: WorkRow>(
    db: &Database,
    id: &str,
    stage: &str,
    progress: i64,
) -> Result<Option<R>, DatabaseError> {
    let progress = progress.clamp(0, 100);
    transition(
        db,
        id,
        "stage = ?3, progress_pct = MAX(progress_pct, ?4)",
        NOT_TERMINAL,
        params![stage, progress],
        &[],
    )
}

/// Moves a record to `completed`, applying table-specific result columns.
pub fn complete<R: WorkRow>(
    db: &Database,
    id: &str,
    extra: &[Assignment<'_>],
) -> Result<Option<R>, DatabaseError> {
    transition(
        db,
        id,
        "status = ?3, stage = ?4, progress_pct = 100",
        NOT_TERMINAL,
        params![WorkStatus::Completed, FINAL_STAGE],
        extra,
    )
}

/// Moves a record to `failed` with an error code and message.
pub fn fail<R: WorkRow>(
    db: &Database,
    id: &str,
    code: &str,
    message: &str,
    extra: &[Assignment<'_>],
) -> Result<Option<R>, DatabaseError> {
    transition(
        db,
        id,
        "status = ?3, stage = ?4, error_code = ?5, error_message = ?6",
        NOT_TERMINAL,
        params![WorkStatus::Failed, FAILED_STAGE, code, message],
        extra,
    )
}

/// Runs `UPDATE <table> SET <sets>, updated_at = ?2 WHERE id = ?1 AND <guard>
/// RETURNING *`.
///
/// `base` binds to `?3` onwards in the order given; `extra` assignments get
/// the following indices.
pub(crate) fn transition<R: WorkRow>(
    db: &Database,
    id: &str,
    sets: &str,
    guard: &str,
    base: &[&dyn ToSql],
    extra: &[Assignment<'_>],
) -> Result<Option<R>, DatabaseError> {
    let now = now_timestamp();

    let mut values: Vec<&dyn ToSql> = Vec::with_capacity(2 + base.len() + extra.len());
    values.push(&id);
    values.push(&now);
    values.extend_from_slice(base);

    let mut set_clause = String::from(sets);
    for (column, value) in extra {
        values.push(*value);
        set_clause.push_str(&format!(", {} = ?{}", column, values.len()));
    }

    let sql = format!(
        "UPDATE {} SET {}, updated_at = ?2 WHERE id = ?1 AND {} RETURNING *",
        R::TABLE,
        set_clause,
        guard
    );

    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query_map(values.as_slice(), R::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Runs an `INSERT … RETURNING *` and maps the inserted row.
pub(crate) fn insert_returning<R: WorkRow>(
    db: &Database,
    sql: &str,
    values: &[&dyn ToSql],
) -> Result<R, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn.query_row(sql, values, R::from_row)?;
        Ok(row)
    })
}
