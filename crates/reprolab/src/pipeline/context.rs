use std::time::Instant;

use crate::db::{JobRow, SubmissionRow};
use crate::model::FileRef;
use crate::sandbox::{SandboxEnvironment, SandboxProfile};

use super::error::PipelineWarning;

/// State carried through one job run.
pub struct JobContext {
    // Input: the claimed row
    pub job: JobRow,

    // Fetched document bytes
    pub document: Vec<u8>,

    // Extracted title, falling back to the stored one
    pub title: Option<String>,

    // Provider-side copy of the document, when available
    pub model_file: Option<FileRef>,

    // Non-fatal warnings
    pub warnings: Vec<PipelineWarning>,
}

impl JobContext {
    pub fn new(job: JobRow) -> Self {
        Self {
            job,
            document: Vec::new(),
            title: None,
            model_file: None,
            warnings: Vec::new(),
        }
    }

    pub fn warn(&mut self, warning: PipelineWarning) {
        log::warn!("Job {}: {}", self.job.id, warning);
        self.warnings.push(warning);
    }
}

/// State carried through one submission run.
pub struct SubmissionContext {
    pub submission: SubmissionRow,
    pub profile: SandboxProfile,
    pub env: SandboxEnvironment,
    // Measured from before the environment was provisioned
    pub started: Instant,
}
