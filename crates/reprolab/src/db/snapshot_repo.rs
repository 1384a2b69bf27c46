//! Sandbox snapshot cache: one row per language.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Row};

use super::{now_timestamp, Database, DatabaseError};

#[derive(Debug, Clone)]
pub struct SnapshotRow {
    pub language: String,
    pub runtime: String,
    pub snapshot_id: String,
    pub expires_at: String,
    pub created_at: String,
    pub updated_at: String,
}

impl SnapshotRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            language: row.get("language")?,
            runtime: row.get("runtime")?,
            snapshot_id: row.get("snapshot_id")?,
            expires_at: row.get("expires_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    /// Whether the snapshot may still be used at `now`. Unparseable expiry
    /// timestamps count as expired.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        DateTime::parse_from_rfc3339(&self.expires_at)
            .map(|expires| expires.with_timezone(&Utc) > now)
            .unwrap_or(false)
    }
}

/// Returns the cached snapshot for a language, live or not.
pub fn find_by_language(
    db: &Database,
    language: &str,
) -> Result<Option<SnapshotRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM sandbox_snapshots WHERE language = ?1")?;
        let mut rows = stmt.query_map(params![language], SnapshotRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Returns the snapshot for a language only if it has not expired.
pub fn find_live(db: &Database, language: &str) -> Result<Option<SnapshotRow>, DatabaseError> {
    let now = Utc::now();
    Ok(find_by_language(db, language)?.filter(|row| row.is_live(now)))
}

/// Inserts or replaces the snapshot for a language. Last writer wins.
pub fn upsert(
    db: &Database,
    language: &str,
    runtime: &str,
    snapshot_id: &str,
    expires_at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let now = now_timestamp();
    let expires = expires_at.to_rfc3339_opts(SecondsFormat::Millis, true);
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO sandbox_snapshots
             (language, runtime, snapshot_id, expires_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(language) DO UPDATE SET
                runtime = excluded.runtime,
                snapshot_id = excluded.snapshot_id,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at",
            params![language, runtime, snapshot_id, expires, now],
        )?;
        Ok(())
    })
}
