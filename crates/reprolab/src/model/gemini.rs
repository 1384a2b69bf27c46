use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::Instrument;

use super::{FileRef, GenerateRequest, ModelClient};
use crate::error::ModelError;

const API_KEY_HEADER: &str = "x-goog-api-key";
const UPLOAD_URL_HEADER: &str = "x-goog-upload-url";

/// Keywords the provider's response schema dialect understands.
const SCHEMA_KEYWORDS: &[&str] = &[
    "type",
    "format",
    "description",
    "nullable",
    "enum",
    "items",
    "properties",
    "required",
    "minItems",
    "maxItems",
    "propertyOrdering",
];

/// Gemini REST client: resumable file upload plus `generateContent`.
pub struct GeminiClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: SecretString,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: Option<UploadedFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadedFile {
    uri: Option<String>,
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

impl GeminiClient {
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: SecretString,
        request_timeout: Duration,
    ) -> Result<Self, ModelError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(request_timeout)
            .build()
            .map_err(|e| ModelError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
        })
    }

    fn generate_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    fn upload_start_url(&self) -> String {
        format!("{}/upload/v1beta/files", self.base_url)
    }
}

async fn ensure_success(response: Response) -> Result<Response, ModelError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(ModelError::Status {
        status,
        body: crate::sanitize::truncate(&body, 500),
    })
}

#[async_trait]
impl ModelClient for GeminiClient {
    async fn upload_file(
        &self,
        display_name: &str,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> Result<FileRef, ModelError> {
        let span = tracing::info_span!("model.upload_file", size = bytes.len());
        self.upload_resumable(display_name, bytes, mime_type)
            .instrument(span)
            .await
    }

    async fn generate_json(&self, request: GenerateRequest<'_>) -> Result<String, ModelError> {
        let span = tracing::info_span!(
            "model.generate",
            model = %self.model,
            with_file = request.file.is_some()
        );
        self.generate(request).instrument(span).await
    }
}

impl GeminiClient {
    async fn upload_resumable(
        &self,
        display_name: &str,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> Result<FileRef, ModelError> {
        let length = bytes.len().to_string();

        let start = self
            .client
            .post(self.upload_start_url())
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", &length)
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&json!({ "file": { "display_name": display_name } }))
            .send()
            .await
            .map_err(|e| ModelError::Transport(format!("Upload start failed: {}", e)))?;
        let start = ensure_success(start).await?;

        let upload_url = start
            .headers()
            .get(UPLOAD_URL_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or(ModelError::MissingField(UPLOAD_URL_HEADER))?;

        let finish = self
            .client
            .post(&upload_url)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .header("Content-Length", &length)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(bytes)
            .send()
            .await
            .map_err(|e| ModelError::Transport(format!("Upload finalize failed: {}", e)))?;
        let finish = ensure_success(finish).await?;

        let parsed: UploadResponse = finish
            .json()
            .await
            .map_err(|e| ModelError::Malformed(format!("upload response: {}", e)))?;
        let file = parsed.file.ok_or(ModelError::MissingField("file"))?;
        let uri = file.uri.ok_or(ModelError::MissingField("file.uri"))?;

        log::debug!("Uploaded '{}' to model provider", display_name);

        Ok(FileRef {
            uri,
            mime_type: file.mime_type.unwrap_or_else(|| mime_type.to_string()),
        })
    }

    async fn generate(&self, request: GenerateRequest<'_>) -> Result<String, ModelError> {
        let body = build_generate_body(&request);
        let response = self
            .client
            .post(self.generate_url())
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Transport(e.to_string()))?;
        let response = ensure_success(response).await?;

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Malformed(e.to_string()))?;
        collect_text(parsed)
    }
}

fn build_generate_body(request: &GenerateRequest<'_>) -> Value {
    let mut parts = Vec::new();
    if let Some(file) = request.file {
        parts.push(json!({
            "file_data": { "mime_type": file.mime_type, "file_uri": file.uri }
        }));
    }
    parts.push(json!({ "text": request.prompt }));

    json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": to_provider_schema(request.schema),
        }
    })
}

/// Concatenates the text parts of the first candidate.
fn collect_text(response: GenerateResponse) -> Result<String, ModelError> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(ModelError::Malformed("response contained no text".to_string()));
    }
    Ok(text)
}

/// Rewrites a JSON schema into the provider dialect: type names upper-cased,
/// unsupported keywords dropped.
pub(crate) fn to_provider_schema(schema: &Value) -> Value {
    let Some(object) = schema.as_object() else {
        return schema.clone();
    };

    let mut out = Map::new();
    for (key, value) in object {
        if !SCHEMA_KEYWORDS.contains(&key.as_str()) {
            continue;
        }
        let converted = match key.as_str() {
            "type" => match value {
                Value::String(name) => Value::String(name.to_uppercase()),
                other => other.clone(),
            },
            "items" => to_provider_schema(value),
            "properties" => match value.as_object() {
                Some(props) => Value::Object(
                    props
                        .iter()
                        .map(|(name, prop)| (name.clone(), to_provider_schema(prop)))
                        .collect(),
                ),
                None => value.clone(),
            },
            _ => value.clone(),
        };
        out.insert(key.clone(), converted);
    }
    Value::Object(out)
}
