//! Job and submission pipelines: claim, run the steps, record the outcome.
//!
//! Each `process` call converts every error into a `fail` transition at its
//! boundary and reports what happened as a [`ProcessResult`].

pub mod context;
pub mod error;
pub mod job;
pub mod outcome;
pub mod submission;

pub use context::{JobContext, SubmissionContext};
pub use error::{PipelineError, PipelineWarning};
pub use job::JobPipeline;
pub use outcome::ProcessResult;
pub use submission::SubmissionPipeline;

/// Error codes stored on failed records.
pub const MISSING_BLOB: &str = "missing_blob";
pub const PROCESSING_FAILED: &str = "processing_failed";
pub const TESTS_FAILED: &str = "tests_failed";
pub const EXECUTION_FAILED: &str = "execution_failed";

/// Advisory stage names and the progress each one raises to.
pub mod stages {
    pub const EXTRACTING: (&str, i64) = ("extracting", 45);
    pub const GENERATING_SCAFFOLD: (&str, i64) = ("generating_scaffold", 75);
    pub const FINALIZING: (&str, i64) = ("finalizing", 90);

    pub const DOWNLOAD: (&str, i64) = ("download", 25);
    pub const UNPACK: (&str, i64) = ("unpack", 40);
    pub const EXECUTE: (&str, i64) = ("execute", 70);
}
