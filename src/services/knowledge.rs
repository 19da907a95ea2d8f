//! Encyclopaedic lookup against a DuckDuckGo-style instant answer API

use super::{KnowledgeBase, ServiceError};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

pub struct KnowledgeClient {
    client: Client,
    base_url: String,
}

impl KnowledgeClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::unknown(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn request(&self, subject: &str) -> reqwest::RequestBuilder {
        self.client.get(&self.base_url).query(&[
            ("q", subject),
            ("format", "json"),
            ("skip_disambig", "1"),
        ])
    }
}

/// The `Abstract` field of an answer; missing or non-string means no info
pub fn parse_abstract(body: &str) -> Result<String, ServiceError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| ServiceError::malformed(format!("Failed to parse answer: {e}")))?;
    if !value.is_object() {
        return Err(ServiceError::malformed("answer is not a JSON object"));
    }
    Ok(value
        .get("Abstract")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string())
}

#[async_trait]
impl KnowledgeBase for KnowledgeClient {
    async fn lookup(&self, subject: &str) -> Result<String, ServiceError> {
        let response = self
            .request(subject)
            .send()
            .await
            .map_err(|e| ServiceError::from_transport(&e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ServiceError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(ServiceError::from_status(status, &body));
        }

        parse_abstract(&body)
    }
}
