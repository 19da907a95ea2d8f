//! Spoken dialogue manager
//!
//! Serves voice dialogue sessions driven by a hierarchical state machine.
//! A speech client posts recognition events and follows the session's
//! SSE stream for what to say and when to listen.

mod api;
mod config;
mod dialogue;
mod runtime;
mod services;

use api::{create_router, AppState};
use config::{AppConfig, DialogueConfig};
use dialogue::{appointment_chart, ChartOptions, Grammar};
use runtime::{RuntimeManager, ServiceGateway, TaskGateway};
use services::{ClassifierClient, IntentClassifier, KnowledgeBase, KnowledgeClient};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sds_dialogue=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let config = AppConfig::from_env();
    let dialogue_config = DialogueConfig::load_or_default(config.dialogue_config.as_deref())?;

    // Dialogue chart, validated once for all sessions
    let grammar = Grammar::compile(&dialogue_config.grammar)?;
    let chart = appointment_chart(
        grammar,
        dialogue_config.prompt_catalog(),
        ChartOptions {
            classify_unmatched_form_input: config.classifier_url.is_some(),
        },
    )?;

    // External services
    let knowledge: Arc<dyn KnowledgeBase> =
        Arc::new(KnowledgeClient::new(&config.kb_url, config.request_timeout)?);
    let classifier = match &config.classifier_url {
        Some(url) => {
            tracing::info!(url = %url, "Intent classifier configured");
            let client: Arc<dyn IntentClassifier> =
                Arc::new(ClassifierClient::new(url, config.request_timeout)?);
            Some(client)
        }
        None => {
            tracing::warn!("No intent classifier configured. Set SDS_CLASSIFIER_URL.");
            None
        }
    };
    let gateway: Arc<dyn TaskGateway> = Arc::new(ServiceGateway::new(knowledge, classifier));

    tracing::info!(
        kb_url = %config.kb_url,
        timeout_secs = config.request_timeout.as_secs(),
        listen_timeout_ms = ?config.listen_timeout.map(|d| d.as_millis()),
        "Dialogue runtime initialized"
    );

    // Create application state
    let runtime = RuntimeManager::new(Arc::new(chart), gateway, config.listen_timeout);
    let state = AppState::new(runtime);

    // Create router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .layer(CompressionLayer::new()),
    );

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Dialogue server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
