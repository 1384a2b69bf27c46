use serde::Serialize;

/// What a pipeline invocation did with its work id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProcessResult {
    /// Nothing ran: the record is missing or another worker owns it.
    Skipped { reason: String },
    Completed { id: String },
    Failed { id: String, error: String },
}

impl ProcessResult {
    pub fn skipped(reason: &str) -> Self {
        ProcessResult::Skipped {
            reason: reason.to_string(),
        }
    }

    pub fn completed(id: &str) -> Self {
        ProcessResult::Completed { id: id.to_string() }
    }

    pub fn failed(id: &str, error: impl Into<String>) -> Self {
        ProcessResult::Failed {
            id: id.to_string(),
            error: error.into(),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, ProcessResult::Completed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serialization() {
        assert_eq!(
            serde_json::to_value(ProcessResult::skipped("not_runnable")).unwrap(),
            json!({ "status": "skipped", "reason": "not_runnable" })
        );
        assert_eq!(
            serde_json::to_value(ProcessResult::failed("job_1", "boom")).unwrap(),
            json!({ "status": "failed", "id": "job_1", "error": "boom" })
        );
    }
}
