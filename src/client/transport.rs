//! The client → server seam
//!
//! The orchestrator talks to the change engine only through
//! [`ChangeTransport`], so it does not care whether the engine runs in
//! process ([`LocalTransport`]) or behind a network server.

use crate::api::{ChangeApi, SubmitReceipt};
use crate::change::Change;
use crate::model::{ConceptMatch, ModelSummary};
use crate::queue::Operation;
use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;
use tracing::warn;

/// Errors from transport operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("rate limited by server")]
    RateLimited { retry_after: Option<Duration> },
    /// The server refused the request before queueing it
    #[error("request rejected ({code}): {message}")]
    Rejected { code: String, message: String },
    #[error("unknown operation: {0}")]
    UnknownOperation(String),
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

impl TransportError {
    pub fn code(&self) -> &str {
        match self {
            TransportError::RateLimited { .. } => "RATE_LIMITED",
            TransportError::Rejected { code, .. } => code,
            TransportError::UnknownOperation(_) => "UNKNOWN_OPERATION",
            TransportError::Unavailable(_) => "UNAVAILABLE",
        }
    }
}

/// Everything the orchestrator needs from the change engine.
#[async_trait]
pub trait ChangeTransport: Send + Sync {
    /// Queue a chunk. Returns immediately with the operation to poll.
    async fn submit(&self, changes: &[Change]) -> Result<SubmitReceipt, TransportError>;

    async fn status(&self, operation_id: &str) -> Result<Operation, TransportError>;

    async fn find_by_name(&self, name: &str) -> Result<Vec<ConceptMatch>, TransportError>;

    /// The subset of `ids` that exist in the live model
    async fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>, TransportError>;

    async fn relationship_endpoints(
        &self,
        relationship_id: &str,
    ) -> Result<Option<(String, String)>, TransportError>;

    async fn visual_concept(&self, visual_id: &str) -> Result<Option<String>, TransportError>;

    async fn model_summary(&self) -> Result<ModelSummary, TransportError>;
}

/// In-process transport over a [`ChangeApi`]
#[derive(Clone)]
pub struct LocalTransport {
    api: ChangeApi,
}

impl LocalTransport {
    pub fn new(api: ChangeApi) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &ChangeApi {
        &self.api
    }
}

#[async_trait]
impl ChangeTransport for LocalTransport {
    async fn submit(&self, changes: &[Change]) -> Result<SubmitReceipt, TransportError> {
        self.api
            .submit(changes.to_vec())
            .map_err(|e| TransportError::Rejected {
                code: e.code().to_string(),
                message: e.to_string(),
            })
    }

    async fn status(&self, operation_id: &str) -> Result<Operation, TransportError> {
        self.api
            .status(operation_id)
            .ok_or_else(|| TransportError::UnknownOperation(operation_id.to_string()))
    }

    async fn find_by_name(&self, name: &str) -> Result<Vec<ConceptMatch>, TransportError> {
        Ok(self.api.find_concepts_by_name(name))
    }

    async fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>, TransportError> {
        Ok(self.api.existing_ids(ids))
    }

    async fn relationship_endpoints(
        &self,
        relationship_id: &str,
    ) -> Result<Option<(String, String)>, TransportError> {
        Ok(self.api.relationship_endpoints(relationship_id))
    }

    async fn visual_concept(&self, visual_id: &str) -> Result<Option<String>, TransportError> {
        Ok(self.api.visual_concept(visual_id))
    }

    async fn model_summary(&self) -> Result<ModelSummary, TransportError> {
        Ok(self.api.model_summary())
    }
}

/// Exponential backoff for rate-limited submissions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
    pub max_retries: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(250),
            cap: Duration::from_secs(8),
            max_retries: 6,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

/// Submit, sleeping and retrying while the server reports rate limiting.
///
/// Any other error is returned at once. After `max_retries` rate-limited
/// retries the last rate-limit error is returned.
pub async fn submit_with_backoff(
    transport: &dyn ChangeTransport,
    changes: &[Change],
    backoff: &Backoff,
) -> Result<SubmitReceipt, TransportError> {
    let mut attempt = 0;
    loop {
        match transport.submit(changes).await {
            Err(TransportError::RateLimited { retry_after }) if attempt < backoff.max_retries => {
                let delay = retry_after.unwrap_or_else(|| backoff.delay(attempt)).min(backoff.cap);
                warn!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "rate limited, backing off");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelEngine;
    use crate::queue::QueueConfig;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Rate-limits the first `limit` submissions, then delegates
    struct Throttled {
        inner: LocalTransport,
        limit: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ChangeTransport for Throttled {
        async fn submit(&self, changes: &[Change]) -> Result<SubmitReceipt, TransportError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.limit {
                return Err(TransportError::RateLimited { retry_after: None });
            }
            self.inner.submit(changes).await
        }
        async fn status(&self, id: &str) -> Result<Operation, TransportError> {
            self.inner.status(id).await
        }
        async fn find_by_name(&self, name: &str) -> Result<Vec<ConceptMatch>, TransportError> {
            self.inner.find_by_name(name).await
        }
        async fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>, TransportError> {
            self.inner.existing_ids(ids).await
        }
        async fn relationship_endpoints(&self, id: &str) -> Result<Option<(String, String)>, TransportError> {
            self.inner.relationship_endpoints(id).await
        }
        async fn visual_concept(&self, id: &str) -> Result<Option<String>, TransportError> {
            self.inner.visual_concept(id).await
        }
        async fn model_summary(&self) -> Result<ModelSummary, TransportError> {
            self.inner.model_summary().await
        }
    }

    fn throttled(limit: u32) -> Throttled {
        let api = ChangeApi::start(Arc::new(ModelEngine::new()), QueueConfig::default());
        Throttled {
            inner: LocalTransport::new(api),
            limit,
            calls: AtomicU32::new(0),
        }
    }

    fn fast_backoff(max_retries: u32) -> Backoff {
        Backoff {
            base: Duration::from_millis(1),
            cap: Duration::from_millis(4),
            max_retries,
        }
    }

    fn one_change() -> Vec<Change> {
        vec![Change::from_value(0, &json!({"op": "createElement", "type": "goal", "name": "G"})).unwrap()]
    }

    #[test]
    fn delay_doubles_up_to_cap() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(0), Duration::from_millis(250));
        assert_eq!(backoff.delay(2), Duration::from_secs(1));
        assert_eq!(backoff.delay(5), Duration::from_secs(8));
        assert_eq!(backoff.delay(40), Duration::from_secs(8));
    }

    // === Scenario: rate limiting triggers backoff, not failure ===
    #[tokio::test]
    async fn rate_limited_submit_is_retried() {
        let transport = throttled(2);
        let receipt = submit_with_backoff(&transport, &one_change(), &fast_backoff(6))
            .await
            .unwrap();
        assert!(receipt.operation_id.starts_with("op-"));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let transport = throttled(10);
        let err = submit_with_backoff(&transport, &one_change(), &fast_backoff(3))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "RATE_LIMITED");
        assert_eq!(transport.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn local_transport_reports_rejections_with_code() {
        let transport = throttled(0);
        let err = transport.submit(&[]).await.unwrap_err();
        assert_eq!(err.code(), "EMPTY_SUBMISSION");
        assert!(matches!(
            transport.status("op-missing").await,
            Err(TransportError::UnknownOperation(_))
        ));
    }
}
