use std::sync::Arc;

use serde::Serialize;
use tracing::Instrument;

use super::extract::parse_candidate;
use super::fallback::{fallback_bundle, UNTITLED};
use super::schema::{bundle_schema, BundleError, ScaffoldBundle};
use crate::model::{FileRef, GenerateRequest, ModelClient};
use crate::sanitize::truncate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaffoldOptions {
    /// Repair requests sent after the first invalid response.
    pub repair_rounds: u32,
    pub max_tasks: usize,
    /// Characters of invalid output echoed back in a repair request.
    pub repair_budget: usize,
}

impl Default for ScaffoldOptions {
    fn default() -> Self {
        Self {
            repair_rounds: 1,
            max_tasks: 8,
            repair_budget: 12_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum BundleSource {
    Model { repaired: bool },
    Fallback { reason: FallbackReason },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FallbackReason {
    NoCredential,
    Transport(String),
    InvalidOutput(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutcome {
    pub bundle: ScaffoldBundle,
    pub source: BundleSource,
}

impl GenerationOutcome {
    fn fallback(title: Option<&str>, reason: FallbackReason) -> Self {
        Self {
            bundle: fallback_bundle(title),
            source: BundleSource::Fallback { reason },
        }
    }

    pub fn used_fallback(&self) -> bool {
        matches!(self.source, BundleSource::Fallback { .. })
    }
}

/// Turns a paper into a validated scaffold bundle.
///
/// Model quality problems never surface as errors: transport failures and
/// output that stays invalid after the repair rounds both produce the
/// deterministic fallback bundle.
pub struct ScaffoldGenerator {
    client: Option<Arc<dyn ModelClient>>,
    options: ScaffoldOptions,
}

impl ScaffoldGenerator {
    pub fn new(client: Option<Arc<dyn ModelClient>>, options: ScaffoldOptions) -> Self {
        Self { client, options }
    }

    /// Generator that always answers with the fallback bundle.
    pub fn offline() -> Self {
        Self::new(None, ScaffoldOptions::default())
    }

    pub fn model(&self) -> Option<&Arc<dyn ModelClient>> {
        self.client.as_ref()
    }

    pub fn options(&self) -> &ScaffoldOptions {
        &self.options
    }

    pub async fn generate(&self, title: Option<&str>, file: Option<&FileRef>) -> GenerationOutcome {
        let span = tracing::info_span!("scaffold.generate", with_file = file.is_some());
        self.generate_inner(title, file).instrument(span).await
    }

    async fn generate_inner(&self, title: Option<&str>, file: Option<&FileRef>) -> GenerationOutcome {
        let Some(client) = &self.client else {
            log::info!("No model client configured, using fallback scaffold");
            return GenerationOutcome::fallback(title, FallbackReason::NoCredential);
        };

        let prompt = build_prompt(title, self.options.max_tasks);
        let mut response = match client
            .generate_json(GenerateRequest {
                prompt: &prompt,
                file,
                schema: bundle_schema(),
            })
            .await
        {
            Ok(text) => text,
            Err(e) => {
                log::warn!("Scaffold generation request failed: {}", e);
                return GenerationOutcome::fallback(title, FallbackReason::Transport(e.to_string()));
            }
        };

        let mut round = 0;
        loop {
            let error = match validate(&response) {
                Ok(bundle) => {
                    return GenerationOutcome {
                        bundle: bundle.clamp_tasks(self.options.max_tasks),
                        source: BundleSource::Model {
                            repaired: round > 0,
                        },
                    };
                }
                Err(e) => e,
            };

            if round >= self.options.repair_rounds {
                log::warn!(
                    "Model output still invalid after {} repair round(s): {}",
                    round,
                    error
                );
                return GenerationOutcome::fallback(
                    title,
                    FallbackReason::InvalidOutput(error.to_string()),
                );
            }
            round += 1;

            log::info!("Model output invalid ({}), requesting repair {}", error, round);
            let repair = build_repair_prompt(&response, &error, self.options.repair_budget);
            response = match client
                .generate_json(GenerateRequest {
                    prompt: &repair,
                    file: None,
                    schema: bundle_schema(),
                })
                .await
            {
                Ok(text) => text,
                Err(e) => {
                    log::warn!("Scaffold repair request failed: {}", e);
                    return GenerationOutcome::fallback(
                        title,
                        FallbackReason::Transport(e.to_string()),
                    );
                }
            };
        }
    }
}

fn validate(response: &str) -> Result<ScaffoldBundle, BundleError> {
    let value = parse_candidate(response)?;
    ScaffoldBundle::from_value(&value)
}

fn build_prompt(title: Option<&str>, max_tasks: usize) -> String {
    let title = title.unwrap_or(UNTITLED);
    format!(
        "You are preparing a reproduction exercise for the research paper \"{title}\". \
         The paper is attached when available.\n\
         Return a single JSON object with two keys:\n\
         - \"tasks\": between 1 and {max_tasks} short imperative steps a developer \
         follows to reproduce the paper's core result.\n\
         - \"files\": starter files, each an object with \"path\", \"language\" and \
         \"value\" (the full file contents). Include a README.md that summarizes the \
         paper and the exercise, source stubs with function signatures but no \
         solutions, and at least one test file.\n\
         Respond with JSON only."
    )
}

fn build_repair_prompt(invalid: &str, error: &BundleError, budget: usize) -> String {
    format!(
        "The following output was supposed to be a JSON object with \"tasks\" \
         (non-empty array of strings) and \"files\" (array of objects with \"path\", \
         \"language\", \"value\", including a README.md), but it is invalid: {error}.\n\
         Return the corrected JSON object only.\n\n{}",
        truncate(invalid, budget)
    )
}
