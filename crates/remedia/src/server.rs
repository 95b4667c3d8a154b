//! HTTP boundary: event ingestion and health probes.
//!
//! Channel adapters that run out-of-process deliver normalized inbound
//! events to `POST /v1/events` and render the directive they get back. A
//! transient store failure answers 503 so the adapter redelivers — event
//! application is idempotent, so redelivery is safe.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{DefaultBodyLimit, Json, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Serialize;
use tokio::signal;
use tower_http::timeout::TimeoutLayer;
use tracing::{info, warn};

use remedia_channel_protocol::{InboundEvent, OutboundDirective};

use crate::channel::{ChannelDispatcher, SessionEventHandler};
use crate::config::{Config, DEFAULT_SESSIONS_DIR, resolve_path};
use crate::extraction::{ExtractionBridge, HttpExtractionService};
use crate::session::{IntentClassifier, SessionManager};
use crate::store::{FileSessionStore, SessionStore};

// ============================================================================
// Application State
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
    pub dispatcher: ChannelDispatcher,
}

// ============================================================================
// Router
// ============================================================================

pub fn build_app(state: AppState, request_timeout_seconds: u64) -> Router {
    let api = Router::new()
        .route("/events", post(ingest_event))
        .with_state(state.clone())
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .layer(DefaultBodyLimit::max(1024 * 1024)); // 1 MB

    Router::new()
        .route("/livez", get(livez))
        .route("/readyz", get(readyz))
        .with_state(state)
        .nest("/v1", api)
}

// ============================================================================
// Handlers
// ============================================================================

async fn livez() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

#[derive(Serialize)]
struct ReadyzResponse {
    status: String,
    version: String,
    adapters: Vec<String>,
}

async fn readyz(State(state): State<AppState>) -> Json<ReadyzResponse> {
    Json(ReadyzResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        adapters: state.dispatcher.list().await,
    })
}

async fn ingest_event(
    State(state): State<AppState>,
    Json(event): Json<InboundEvent>,
) -> Response {
    match state.manager.handle_event(&event).await {
        Ok(directive) => (StatusCode::OK, Json(directive)).into_response(),
        Err(e) if e.is_transient() => {
            warn!(
                channel = %event.channel,
                user = %event.user_external_id,
                error = %e,
                "event not consumed, asking adapter to redeliver"
            );
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(OutboundDirective::TransientError),
            )
                .into_response()
        }
        Err(e) => {
            // Corruption is scoped to the one session; the event is consumed
            // and the next distinct message starts a fresh session.
            warn!(
                channel = %event.channel,
                user = %event.user_external_id,
                error = %e,
                "session quarantined"
            );
            (StatusCode::OK, Json(OutboundDirective::TransientError)).into_response()
        }
    }
}

// ============================================================================
// Server Setup
// ============================================================================

/// Wire the runtime from config and serve until shutdown.
pub async fn serve(config: Config, config_path: &Path) -> anyhow::Result<()> {
    let sessions_dir = resolve_path(
        config_path,
        config
            .sessions
            .path
            .as_deref()
            .unwrap_or_else(|| Path::new(DEFAULT_SESSIONS_DIR)),
    );
    let store: Arc<dyn SessionStore> = Arc::new(FileSessionStore::open(&sessions_dir).await?);
    info!(path = %sessions_dir.display(), "session store opened");

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.extraction.timeout_seconds))
        .build()?;
    let bridge = ExtractionBridge::new(
        Arc::new(HttpExtractionService::new(
            client,
            config.extraction.base_url.clone(),
        )),
        config.extraction.max_retries,
        Duration::from_millis(config.extraction.retry_backoff_ms),
    );

    let classifier = IntentClassifier::new(
        &config.consent.affirmative_tokens,
        &config.closure.termination_phrases,
    );

    let manager = Arc::new(SessionManager::new(store, bridge, classifier));
    manager.spawn_maintenance();

    let dispatcher =
        ChannelDispatcher::new(Duration::from_secs(config.server.request_timeout_seconds));
    dispatcher
        .set_handler(Arc::new(SessionEventHandler::new(manager.clone())))
        .await;

    let state = AppState {
        manager,
        dispatcher: dispatcher.clone(),
    };
    let app = build_app(state, config.server.request_timeout_seconds);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "remedia listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    dispatcher.shutdown().await;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::extraction::{ExtractionError, ExtractionService, PatientData};
    use crate::store::MemorySessionStore;

    use super::*;

    struct NoExtraction;

    #[async_trait]
    impl ExtractionService for NoExtraction {
        async fn extract(&self, _image_ref: &str) -> Result<PatientData, ExtractionError> {
            Err(ExtractionError::Unreadable)
        }
    }

    fn test_app() -> Router {
        let manager = Arc::new(SessionManager::new(
            Arc::new(MemorySessionStore::new()),
            ExtractionBridge::new(Arc::new(NoExtraction), 0, Duration::from_millis(1)),
            IntentClassifier::new(&["sí".to_string()], &["eso es todo".to_string()]),
        ));
        let state = AppState {
            manager,
            dispatcher: ChannelDispatcher::default(),
        };
        build_app(state, 30)
    }

    #[tokio::test]
    async fn livez_answers_ok() {
        let app = test_app();
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/livez")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ingest_event_answers_directive() {
        let app = test_app();
        let body = serde_json::json!({
            "channel": "whatsapp",
            "user_external_id": "573001234567",
            "content": { "text": "hola" },
            "received_at": "2025-06-01T12:00:00Z"
        });

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/v1/events")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let directive: OutboundDirective = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(directive, OutboundDirective::RequestConsent);
    }

    #[tokio::test]
    async fn ingest_rejects_malformed_event() {
        let app = test_app();
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/v1/events")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from("{\"channel\": \"fax\"}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }
}
