//! Intent classification against a Rasa-style NLU endpoint

use super::{IntentClassifier, ServiceError};
use crate::dialogue::task::{Classification, Entity};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub struct ClassifierClient {
    client: Client,
    url: String,
}

#[derive(Debug, Serialize)]
struct ParseRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ParseResponse {
    #[serde(default)]
    intent: Option<ParsedIntent>,
    #[serde(default)]
    entities: Vec<Entity>,
}

#[derive(Debug, Deserialize)]
struct ParsedIntent {
    #[serde(default)]
    name: Option<String>,
}

impl ClassifierClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::unknown(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

pub fn parse_classification(body: &str) -> Result<Classification, ServiceError> {
    let parsed: ParseResponse = serde_json::from_str(body)
        .map_err(|e| ServiceError::malformed(format!("Failed to parse classification: {e}")))?;
    Ok(Classification {
        intent: parsed.intent.and_then(|i| i.name).filter(|n| !n.is_empty()),
        entities: parsed.entities,
    })
}

#[async_trait]
impl IntentClassifier for ClassifierClient {
    async fn classify(&self, text: &str) -> Result<Classification, ServiceError> {
        let response = self
            .client
            .post(&self.url)
            .json(&ParseRequest { text })
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

        parse_classification(&body)
    }
}
