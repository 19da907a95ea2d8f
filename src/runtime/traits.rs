//! Trait abstractions for runtime I/O
//!
//! The executor only knows [`TaskGateway`]; tests swap in mocks.

use crate::dialogue::task::{TaskPayload, TaskRequest};
use crate::services::{IntentClassifier, KnowledgeBase, ServiceError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

/// Runs the external tasks invoke states ask for
#[async_trait]
pub trait TaskGateway: Send + Sync {
    async fn run(&self, request: &TaskRequest) -> Result<TaskPayload, ServiceError>;
}

#[async_trait]
impl<T: TaskGateway + ?Sized> TaskGateway for Arc<T> {
    async fn run(&self, request: &TaskRequest) -> Result<TaskPayload, ServiceError> {
        (**self).run(request).await
    }
}

// ============================================================================
// Production implementation
// ============================================================================

/// Gateway backed by the HTTP services
pub struct ServiceGateway {
    knowledge: Arc<dyn KnowledgeBase>,
    classifier: Option<Arc<dyn IntentClassifier>>,
}

impl ServiceGateway {
    pub fn new(
        knowledge: Arc<dyn KnowledgeBase>,
        classifier: Option<Arc<dyn IntentClassifier>>,
    ) -> Self {
        Self {
            knowledge,
            classifier,
        }
    }
}

#[async_trait]
impl TaskGateway for ServiceGateway {
    async fn run(&self, request: &TaskRequest) -> Result<TaskPayload, ServiceError> {
        let start = Instant::now();
        let result = match request {
            TaskRequest::KnowledgeLookup { subject } => self
                .knowledge
                .lookup(subject)
                .await
                .map(|abstract_text| TaskPayload::Knowledge { abstract_text }),
            TaskRequest::ClassifyIntent { text } => match &self.classifier {
                Some(classifier) => classifier
                    .classify(text)
                    .await
                    .map(TaskPayload::Classification),
                None => Err(ServiceError::not_configured(
                    "no intent classifier configured",
                )),
            },
        };
        let duration = start.elapsed();

        match &result {
            Ok(_) => {
                tracing::info!(
                    task = ?request.kind(),
                    duration_ms = %duration.as_millis(),
                    "Task completed"
                );
            }
            Err(e) => {
                tracing::warn!(
                    task = ?request.kind(),
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    kind = ?e.kind,
                    retryable = e.kind.is_retryable(),
                    "Task failed"
                );
            }
        }

        result
    }
}
