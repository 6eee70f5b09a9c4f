use crate::action_log::ActionRecord;
use crate::error::ErrorKind;
use crate::orchestrator::{Orchestrator, OrchestratorStatus};
use crate::request::WorkflowRequest;
use crate::result::WorkflowResult;
use crate::session::Session;
use crate::OrchestratorError;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
}

#[derive(Serialize)]
struct ApiResponse {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ApiResponse {
    fn success() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(msg.into()),
        }
    }
}

type ApiError = (StatusCode, Json<ApiResponse>);

fn api_error(err: OrchestratorError) -> ApiError {
    let status = match err {
        OrchestratorError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        OrchestratorError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ApiResponse::error(err.to_string())))
}

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(status))
        .route("/api/workflows", post(submit_workflow))
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/{id}", get(get_session).delete(cleanup_session))
        .route("/api/sessions/{id}/actions", get(get_actions))
        .layer(axum::extract::DefaultBodyLimit::max(10 * 1024 * 1024))
        .layer(cors)
        .with_state(AppState { orchestrator })
}

/// Serves the API until Ctrl-C, then shuts the orchestrator down.
pub async fn serve(orchestrator: Arc<Orchestrator>, host: &str, port: u16) -> crate::Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("HTTP server listening on {}", addr);

    let sweeper = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(IDLE_SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                orchestrator.cleanup_idle().await;
            }
        })
    };

    axum::serve(listener, router(orchestrator.clone()))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    sweeper.abort();
    orchestrator.shutdown().await;
    Ok(())
}

async fn health() -> Json<ApiResponse> {
    Json(ApiResponse::success())
}

async fn status(State(state): State<AppState>) -> Json<OrchestratorStatus> {
    Json(state.orchestrator.status().await)
}

/// The workflow runs in its own task so that a client disconnect cancels it
/// at a step boundary instead of dropping it mid-step.
async fn submit_workflow(
    State(state): State<AppState>,
    Json(request): Json<WorkflowRequest>,
) -> Result<(StatusCode, Json<WorkflowResult>), ApiError> {
    let cancel = CancellationToken::new();
    let _disconnect = cancel.clone().drop_guard();

    let orchestrator = state.orchestrator.clone();
    let result = tokio::spawn(async move { orchestrator.submit_with_cancel(request, &cancel).await })
        .await
        .map_err(|e| api_error(OrchestratorError::General(format!("workflow task failed: {}", e))))?;

    let code = match result.error_kind() {
        Some(ErrorKind::InvalidRequest) => StatusCode::BAD_REQUEST,
        Some(ErrorKind::QueueTimeoutError) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    Ok((code, Json(result)))
}

async fn list_sessions(State(state): State<AppState>) -> Json<Vec<Session>> {
    Json(state.orchestrator.list_sessions().await)
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    state
        .orchestrator
        .session(&id)
        .await
        .map(Json)
        .ok_or_else(|| api_error(OrchestratorError::SessionNotFound(id)))
}

async fn get_actions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ActionRecord>>, ApiError> {
    state
        .orchestrator
        .get_action_log(&id)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn cleanup_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse>, ApiError> {
    state.orchestrator.cleanup(&id).await.map_err(api_error)?;
    Ok(Json(ApiResponse::success()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::extractor::{Extraction, ExtractionStrategy, Extractor};
    use crate::navigator::{NavResult, Navigator, WaitCondition};
    use axum::body::Body;
    use axum::http::{Request, header};
    use serde_json::{Map, Value, json};
    use tower::ServiceExt;

    struct StaticPage;

    #[async_trait::async_trait]
    impl Navigator for StaticPage {
        async fn navigate(&self, _url: &str) -> NavResult<()> {
            Ok(())
        }
        async fn wait_for(&self, _c: &WaitCondition, _t: Duration) -> NavResult<bool> {
            Ok(true)
        }
        async fn type_text(&self, _s: &str, _t: &str) -> NavResult<()> {
            Ok(())
        }
        async fn click(&self, _s: &str) -> NavResult<()> {
            Ok(())
        }
        async fn evaluate(&self, _s: &str) -> NavResult<String> {
            Ok("<html><body>Hi</body></html>".into())
        }
        async fn scroll_to_bottom(&self) -> NavResult<()> {
            Ok(())
        }
        async fn current_url(&self) -> NavResult<String> {
            Ok("https://example.com/".into())
        }
    }

    struct Echo;

    #[async_trait::async_trait]
    impl Extractor for Echo {
        async fn extract(
            &self,
            _html: &str,
            _strategy: &ExtractionStrategy,
            _options: &Map<String, Value>,
        ) -> crate::Result<Extraction> {
            Ok(Extraction {
                content: "Hi".into(),
                structured_data: None,
            })
        }
    }

    fn app() -> (Router, Arc<Orchestrator>) {
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(StaticPage),
            Arc::new(Echo),
            Config::default(),
        ));
        (router(orchestrator.clone()), orchestrator)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["ok"], true);
    }

    #[tokio::test]
    async fn test_submit_then_read_actions() {
        let (app, _) = app();

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/workflows",
                json!({"session_id": "web", "target_url": "https://example.com"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let result = body_json(response).await;
        assert_eq!(result["success"], true);
        assert_eq!(result["extraction"]["content"], "Hi");

        let response = app
            .clone()
            .oneshot(
                Request::get("/api/sessions/web/actions")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let actions = body_json(response).await;
        assert!(actions.as_array().unwrap().len() >= 3);

        let response = app
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = body_json(response).await;
        assert_eq!(status["completed_requests"], 1);
        assert_eq!(status["active_sessions"], 1);
    }

    #[tokio::test]
    async fn test_submit_interactive_workflow() {
        let (app, _) = app();
        let response = app
            .oneshot(post_json(
                "/api/workflows",
                json!({
                    "target_url": "https://example.com",
                    "workflow_kind": "interactive",
                    "actions": [
                        {"type": "click", "selector": "#tab", "extract_after": true},
                        {"type": "type", "selector": "#q", "text": "rust"}
                    ]
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let result = body_json(response).await;
        assert_eq!(result["success"], true);
        assert_eq!(result["pages"].as_array().unwrap().len(), 1);
        assert_eq!(result["pages"][0]["extraction"]["content"], "Hi");
    }

    #[tokio::test]
    async fn test_invalid_request_is_bad_request() {
        let (app, _) = app();
        let response = app
            .oneshot(post_json(
                "/api/workflows",
                json!({"target_url": "ftp://example.com"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["kind"], "InvalidRequest");
    }

    #[tokio::test]
    async fn test_delete_session() {
        let (app, orchestrator) = app();
        orchestrator
            .submit(WorkflowRequest::plain("https://example.com").with_session("gone"))
            .await;

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(
                    Request::delete("/api/sessions/gone")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .oneshot(
                Request::get("/api/sessions/missing/actions")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
