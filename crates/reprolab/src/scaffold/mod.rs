//! Scaffold generation: prompt the model, recover and validate its JSON,
//! repair once, otherwise fall back to a fixed bundle.

pub mod extract;
pub mod fallback;
pub mod generator;
pub mod schema;

pub use fallback::fallback_bundle;
pub use generator::{
    BundleSource, FallbackReason, GenerationOutcome, ScaffoldGenerator, ScaffoldOptions,
};
pub use schema::{BundleError, ScaffoldBundle, ScaffoldFile};

use serde::Serialize;

/// The result document stored for a completed job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaffoldDocument<'a> {
    pub job_id: &'a str,
    pub title: &'a str,
    pub tasks: &'a [String],
    pub files: &'a [ScaffoldFile],
    pub generator: &'a BundleSource,
}

impl<'a> ScaffoldDocument<'a> {
    pub fn new(job_id: &'a str, title: &'a str, outcome: &'a GenerationOutcome) -> Self {
        Self {
            job_id,
            title,
            tasks: outcome.bundle.tasks(),
            files: outcome.bundle.files(),
            generator: &outcome.source,
        }
    }
}
