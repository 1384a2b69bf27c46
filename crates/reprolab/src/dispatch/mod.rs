//! Hands work to a queue or runs it inline.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;

use crate::error::DispatchError;
use crate::sanitize::{redact_url, truncate};

pub mod callback;

pub use callback::{handle_callback, CallbackRequest, CallbackResponse, CallbackVerifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkKind {
    Job,
    Submission,
}

impl WorkKind {
    /// Key carrying the work id in queue messages.
    pub fn id_key(&self) -> &'static str {
        match self {
            WorkKind::Job => "job_id",
            WorkKind::Submission => "submission_id",
        }
    }

    /// Alternate camelCase key accepted on callbacks.
    pub fn alt_id_key(&self) -> &'static str {
        match self {
            WorkKind::Job => "jobId",
            WorkKind::Submission => "submissionId",
        }
    }

    /// Worker route the queue calls back.
    pub fn route(&self) -> &'static str {
        match self {
            WorkKind::Job => "/api/worker/run",
            WorkKind::Submission => "/api/worker/run-submission",
        }
    }

    pub fn missing_id_code(&self) -> &'static str {
        match self {
            WorkKind::Job => "missing_job_id",
            WorkKind::Submission => "missing_submission_id",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkKind::Job => "job",
            WorkKind::Submission => "submission",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome<T> {
    Enqueued { message_id: Option<String> },
    Inline(T),
}

/// Durable queue that later POSTs the message body to `destination`.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Returns the queue's message id when it reports one.
    async fn publish(&self, destination: &str, body: &Value) -> Result<Option<String>, DispatchError>;
}

/// Upstash QStash publisher.
pub struct QstashTransport {
    client: Client,
    base_url: String,
    token: SecretString,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    message_id: Option<String>,
}

impl QstashTransport {
    pub fn new(base_url: &str, token: SecretString) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DispatchError::Publish(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn publish_url(&self, destination: &str) -> String {
        format!("{}/v2/publish/{}", self.base_url, destination)
    }
}

#[async_trait]
impl QueueTransport for QstashTransport {
    async fn publish(&self, destination: &str, body: &Value) -> Result<Option<String>, DispatchError> {
        let response = self
            .client
            .post(self.publish_url(destination))
            .bearer_auth(self.token.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| DispatchError::Publish(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Rejected {
                status,
                body: truncate(&body, 500),
            });
        }

        let parsed: PublishResponse = response.json().await.unwrap_or(PublishResponse {
            message_id: None,
        });
        Ok(parsed.message_id)
    }
}

/// Publishes work to the queue when one is configured, otherwise runs the
/// supplied closure in the calling task.
#[derive(Clone)]
pub struct Dispatcher {
    transport: Option<Arc<dyn QueueTransport>>,
    app_url: String,
}

impl Dispatcher {
    pub fn new(transport: Option<Arc<dyn QueueTransport>>, app_url: &str) -> Self {
        Self {
            transport,
            app_url: app_url.trim_end_matches('/').to_string(),
        }
    }

    /// Dispatcher without a queue: every call runs inline.
    pub fn inline() -> Self {
        Self::new(None, "http://localhost:3000")
    }

    pub fn is_queued(&self) -> bool {
        self.transport.is_some()
    }

    pub fn callback_url(&self, kind: WorkKind) -> String {
        format!("{}{}", self.app_url, kind.route())
    }

    pub async fn dispatch<F, Fut, T>(
        &self,
        kind: WorkKind,
        work_id: &str,
        inline: F,
    ) -> Result<DispatchOutcome<T>, DispatchError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = T>,
    {
        match &self.transport {
            Some(transport) => {
                let destination = self.callback_url(kind);
                let mut body = serde_json::Map::new();
                body.insert(kind.id_key().to_string(), Value::from(work_id));
                let body = Value::Object(body);
                let message_id = transport.publish(&destination, &body).await?;
                log::info!(
                    "Enqueued {} {} for {}",
                    kind.as_str(),
                    work_id,
                    redact_url(&destination)
                );
                Ok(DispatchOutcome::Enqueued { message_id })
            }
            None => {
                log::debug!("No queue configured, running {} {} inline", kind.as_str(), work_id);
                Ok(DispatchOutcome::Inline(inline(work_id.to_string()).await))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        published: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl QueueTransport for Recording {
        async fn publish(
            &self,
            destination: &str,
            body: &Value,
        ) -> Result<Option<String>, DispatchError> {
            self.published
                .lock()
                .unwrap()
                .push((destination.to_string(), body.clone()));
            Ok(Some("msg_1".to_string()))
        }
    }

    #[tokio::test]
    async fn test_queued_dispatch_publishes() {
        let transport = Arc::new(Recording::default());
        let dispatcher = Dispatcher::new(Some(transport.clone()), "https://app.example.com/");

        let outcome = dispatcher
            .dispatch(WorkKind::Submission, "submission_1", |_| async {
                panic!("must not run inline")
            })
            .await
            .unwrap();

        assert_eq!(
            outcome,
            DispatchOutcome::<()>::Enqueued {
                message_id: Some("msg_1".to_string())
            }
        );
        let published = transport.published.lock().unwrap();
        assert_eq!(
            published[0].0,
            "https://app.example.com/api/worker/run-submission"
        );
        assert_eq!(published[0].1, json!({ "submission_id": "submission_1" }));
    }

    #[tokio::test]
    async fn test_inline_dispatch_runs_closure() {
        let outcome = Dispatcher::inline()
            .dispatch(WorkKind::Job, "job_1", |id| async move { format!("ran {}", id) })
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Inline("ran job_1".to_string()));
    }

    #[test]
    fn test_qstash_publish_url() {
        let transport =
            QstashTransport::new("https://qstash.upstash.io/", SecretString::from("t")).unwrap();
        assert_eq!(
            transport.publish_url("https://app.example.com/api/worker/run"),
            "https://qstash.upstash.io/v2/publish/https://app.example.com/api/worker/run"
        );
    }
}
