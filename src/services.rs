//! External services the dialogue calls out to
//!
//! Both are plain JSON-over-HTTP clients behind small traits so the runtime
//! can be tested without a network.

mod classifier;
mod error;
mod knowledge;

pub use classifier::ClassifierClient;
pub use error::{ServiceError, ServiceErrorKind};
pub use knowledge::KnowledgeClient;

use crate::dialogue::task::Classification;
use async_trait::async_trait;
use std::sync::Arc;

/// Encyclopaedic lookup; an empty answer means nothing was found
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn lookup(&self, subject: &str) -> Result<String, ServiceError>;
}

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Classification, ServiceError>;
}

#[async_trait]
impl<T: KnowledgeBase + ?Sized> KnowledgeBase for Arc<T> {
    async fn lookup(&self, subject: &str) -> Result<String, ServiceError> {
        (**self).lookup(subject).await
    }
}

#[async_trait]
impl<T: IntentClassifier + ?Sized> IntentClassifier for Arc<T> {
    async fn classify(&self, text: &str) -> Result<Classification, ServiceError> {
        (**self).classify(text).await
    }
}
