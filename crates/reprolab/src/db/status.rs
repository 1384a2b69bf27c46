//! Work record status shared by jobs and submissions.

use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a job or submission.
///
/// `Completed` and `Failed` are sinks: no store operation leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    Uploading,
    Queued,
    Running,
    Completed,
    Failed,
}

impl WorkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkStatus::Uploading => "uploading",
            WorkStatus::Queued => "queued",
            WorkStatus::Running => "running",
            WorkStatus::Completed => "completed",
            WorkStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkStatus::Completed | WorkStatus::Failed)
    }
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploading" => Ok(WorkStatus::Uploading),
            "queued" => Ok(WorkStatus::Queued),
            "running" => Ok(WorkStatus::Running),
            "completed" => Ok(WorkStatus::Completed),
            "failed" => Ok(WorkStatus::Failed),
            other => Err(format!("unknown work status '{}'", other)),
        }
    }
}

impl ToSql for WorkStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for WorkStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        text.parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trips_through_str() {
        for status in [
            WorkStatus::Uploading,
            WorkStatus::Queued,
            WorkStatus::Running,
            WorkStatus::Completed,
            WorkStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<WorkStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(WorkStatus::Completed.is_terminal());
        assert!(WorkStatus::Failed.is_terminal());
        assert!(!WorkStatus::Running.is_terminal());
        assert!(!WorkStatus::Queued.is_terminal());
    }

    #[test]
    fn test_unknown_status_rejected() {
        assert!("pending".parse::<WorkStatus>().is_err());
    }

    #[test]
    fn test_serializes_snake_case() {
        let json = serde_json::to_string(&WorkStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
    }
}
