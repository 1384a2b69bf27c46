//! Queue callback handling: signature check, body parsing, pipeline run.

use std::future::Future;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::WorkKind;
use crate::pipeline::ProcessResult;

const ISSUER: &str = "Upstash";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature header missing")]
    Missing,

    #[error("signature rejected: {0}")]
    Invalid(String),

    #[error("signed body hash does not match")]
    BodyMismatch,
}

/// Claims the queue signs into the `Upstash-Signature` JWT.
#[derive(Debug, Deserialize)]
struct SignatureClaims {
    body: String,
}

/// Checks `Upstash-Signature` headers against the current and next signing
/// keys. A verifier with no keys, or built for local development, accepts
/// every request.
pub struct CallbackVerifier {
    keys: Vec<SecretString>,
    local_development: bool,
}

impl CallbackVerifier {
    pub fn new(
        current: Option<SecretString>,
        next: Option<SecretString>,
        local_development: bool,
    ) -> Self {
        Self {
            keys: current.into_iter().chain(next).collect(),
            local_development,
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, None, true)
    }

    pub fn is_enforced(&self) -> bool {
        !self.local_development && !self.keys.is_empty()
    }

    pub fn verify(
        &self,
        url: &str,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<(), SignatureError> {
        if !self.is_enforced() {
            return Ok(());
        }
        let token = signature
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(SignatureError::Missing)?;

        let mut last = SignatureError::Invalid("no signing key accepted the token".to_string());
        for key in &self.keys {
            match verify_with_key(key, token, url, body) {
                Ok(()) => return Ok(()),
                // The token is authentic under this key, so no other key
                // can change the verdict.
                Err(SignatureError::BodyMismatch) => return Err(SignatureError::BodyMismatch),
                Err(e) => last = e,
            }
        }
        Err(last)
    }
}

fn verify_with_key(
    key: &SecretString,
    token: &str,
    url: &str,
    body: &[u8],
) -> Result<(), SignatureError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[ISSUER]);
    validation.sub = Some(url.to_string());
    validation.validate_nbf = true;
    validation.set_required_spec_claims(&["exp", "nbf", "iss", "sub"]);

    let data = decode::<SignatureClaims>(
        token,
        &DecodingKey::from_secret(key.expose_secret().as_bytes()),
        &validation,
    )
    .map_err(|e| SignatureError::Invalid(e.to_string()))?;

    let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(body));
    if data.claims.body.trim_end_matches('=') != expected {
        return Err(SignatureError::BodyMismatch);
    }
    Ok(())
}

/// A queue delivery as seen by the worker route.
#[derive(Debug, Clone, Copy)]
pub struct CallbackRequest<'a> {
    /// Public URL the queue was asked to call; the signature's subject.
    pub url: &'a str,
    pub signature: Option<&'a str>,
    pub body: &'a [u8],
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallbackResponse {
    pub status: u16,
    pub body: Value,
}

impl CallbackResponse {
    fn error(status: u16, code: &str) -> Self {
        Self {
            status,
            body: json!({ "error": code }),
        }
    }
}

/// Pulls the work id out of a callback body. `Err` carries the error code.
fn parse_work_id(kind: WorkKind, body: &[u8]) -> Result<String, &'static str> {
    let value: Value = if body.iter().all(u8::is_ascii_whitespace) {
        json!({})
    } else {
        serde_json::from_slice(body).map_err(|_| "invalid_json")?
    };

    [kind.id_key(), kind.alt_id_key()]
        .iter()
        .filter_map(|key| value.get(key).and_then(Value::as_str))
        .map(str::trim)
        .find(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or(kind.missing_id_code())
}

/// Verifies, parses and runs one queue delivery.
pub async fn handle_callback<F, Fut>(
    kind: WorkKind,
    request: CallbackRequest<'_>,
    verifier: &CallbackVerifier,
    process: F,
) -> CallbackResponse
where
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = ProcessResult>,
{
    if let Err(e) = verifier.verify(request.url, request.signature, request.body) {
        log::warn!("Rejected {} callback: {}", kind.as_str(), e);
        return CallbackResponse::error(401, "invalid_signature");
    }

    let work_id = match parse_work_id(kind, request.body) {
        Ok(id) => id,
        Err(code) => return CallbackResponse::error(400, code),
    };

    let result = process(work_id).await;
    match serde_json::to_value(&result) {
        Ok(body) => CallbackResponse { status: 200, body },
        Err(e) => {
            log::error!("Failed to encode process result: {}", e);
            CallbackResponse::error(500, "encode_failed")
        }
    }
}
