//! Generative model provider seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

pub mod gemini;

pub use gemini::GeminiClient;

/// A document uploaded to the provider, referenced from later prompts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub uri: String,
    pub mime_type: String,
}

/// One schema-constrained generation call.
#[derive(Debug, Clone, Copy)]
pub struct GenerateRequest<'a> {
    pub prompt: &'a str,
    pub file: Option<&'a FileRef>,
    /// JSON schema the response must follow.
    pub schema: &'a serde_json::Value,
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Uploads a document so prompts can reference it.
    async fn upload_file(
        &self,
        display_name: &str,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> Result<FileRef, ModelError>;

    /// Returns the raw response text, which is expected (not guaranteed) to
    /// contain a JSON document.
    async fn generate_json(&self, request: GenerateRequest<'_>) -> Result<String, ModelError>;
}
