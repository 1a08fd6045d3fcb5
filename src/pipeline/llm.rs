//! Model client: the one network-bound stage of the pipeline.
//!
//! Backends are polymorphic over [`VisionBackend`]; the request builder and
//! the normaliser never see which one is in use. This module owns the parts
//! every backend shares: client resolution, the call timeout, and mapping
//! transport failures into [`ExtractError::ModelCall`].
//!
//! No retries: a failed call surfaces to the caller with the backend id and
//! cause attached. Retry policy belongs to whoever invoked the extraction.

use crate::backend::{BackendError, HttpVisionBackend};
use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use crate::pipeline::request::ExtractionRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A vision-capable model endpoint.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    /// Short backend identifier used in logs and errors (e.g. `"dashscope"`).
    fn id(&self) -> &str;

    /// Model identifier sent to the backend.
    fn model(&self) -> &str {
        ""
    }

    /// Issue exactly one call and return the model's raw text.
    async fn send(&self, request: &ExtractionRequest) -> Result<RawResponse, BackendError>;
}

/// The backend's answer, before any normalisation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawResponse {
    /// Assistant text exactly as returned.
    pub text: String,
    /// Model name echoed by the backend, if any.
    pub model: Option<String>,
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
}

impl RawResponse {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Resolve the model client for a run.
///
/// 1. **Pre-built client** (`config.client`) — used as-is; the caller owns
///    its credentials.
/// 2. **Configured backend** — an [`HttpVisionBackend`] for `config.backend`.
///    The credential is resolved here, once, so a missing key fails before
///    any page is rendered or any socket is opened.
pub fn resolve_client(config: &ExtractionConfig) -> Result<Arc<dyn VisionBackend>, ExtractError> {
    if let Some(ref client) = config.client {
        return Ok(Arc::clone(client));
    }
    let backend = HttpVisionBackend::from_config(config)?;
    info!(
        "Using backend '{}' (model {})",
        config.backend,
        backend.settings().model
    );
    Ok(Arc::new(backend))
}

/// Send `request` through `client`, bounded by `timeout`.
pub async fn call_model(
    client: &dyn VisionBackend,
    request: &ExtractionRequest,
    timeout: Duration,
) -> Result<RawResponse, ExtractError> {
    let start = Instant::now();
    let backend = client.id().to_string();

    let outcome = tokio::time::timeout(timeout, client.send(request)).await;
    let result = match outcome {
        Ok(result) => result,
        Err(_) => Err(BackendError::Timeout {
            secs: timeout.as_secs(),
        }),
    };

    match result {
        Ok(response) => {
            debug!(
                "Backend '{}' answered in {:?}: {} chars, usage {:?}",
                backend,
                start.elapsed(),
                response.text.len(),
                response.usage
            );
            Ok(response)
        }
        Err(source) => {
            warn!("Backend '{}' call failed: {}", backend, source);
            Err(ExtractError::ModelCall { backend, source })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldSpec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SlowBackend;

    #[async_trait]
    impl VisionBackend for SlowBackend {
        fn id(&self) -> &str {
            "slow"
        }

        async fn send(&self, _request: &ExtractionRequest) -> Result<RawResponse, BackendError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(RawResponse::from_text("[]"))
        }
    }

    struct FailingBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl VisionBackend for FailingBackend {
        fn id(&self) -> &str {
            "failing"
        }

        async fn send(&self, _request: &ExtractionRequest) -> Result<RawResponse, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(BackendError::Status {
                status: 500,
                body: "boom".into(),
            })
        }
    }

    fn request() -> ExtractionRequest {
        ExtractionRequest {
            fields: FieldSpec::new(["a"]).unwrap(),
            system_instruction: String::new(),
            user_instruction: String::new(),
            images: vec![],
        }
    }

    #[tokio::test]
    async fn timeout_becomes_model_call_error() {
        let err = call_model(&SlowBackend, &request(), Duration::from_millis(50))
            .await
            .unwrap_err();
        match err {
            ExtractError::ModelCall { backend, source } => {
                assert_eq!(backend, "slow");
                assert!(matches!(source, BackendError::Timeout { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failures_are_not_retried() {
        let backend = FailingBackend {
            calls: AtomicUsize::new(0),
        };
        let err = call_model(&backend, &request(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::ModelCall { .. }));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn prebuilt_client_takes_precedence() {
        let config = ExtractionConfig::builder()
            .client(Arc::new(SlowBackend))
            .credential_env("BOL_EXTRACT_UNSET_VARIABLE_FOR_TESTS")
            .build()
            .unwrap();
        let client = resolve_client(&config).unwrap();
        assert_eq!(client.id(), "slow");
    }
}
