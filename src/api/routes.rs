//! HTTP route handlers.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::{
        sse::{Event, Sse},
        Json,
    },
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use futures::StreamExt;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::classifier::{self, ParsedResponse};
use crate::config::Config;
use crate::coordinator::{Coordinator, CoordinatorError, Invocation};
use crate::deployments::{DeploymentError, DeploymentStatus, DeploymentStatusProvider};
use crate::directory::{AgentDirectory, StaticDirectory};
use crate::relay::{relay_events, InvocationRegistry, RegistryGuard, RelayConfig, RelayEvent};
use crate::session::SessionClient;
use crate::workflow::{Checkpoint, FileWorkflowStore, StoreError, WorkflowState, WorkflowStore};

use super::types::{ClassifyRequest, InvokeRequest};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub coordinator: Coordinator,
    pub registry: Arc<InvocationRegistry>,
    pub workflows: Arc<dyn WorkflowStore>,
    /// External status service; absent when the deployment UI is disabled.
    pub deployments: Option<Arc<dyn DeploymentStatusProvider>>,
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let directory: Arc<dyn AgentDirectory> = match &config.directory_path {
        Some(path) => Arc::new(StaticDirectory::load(path)?),
        None => {
            tracing::warn!("no agent directory configured, all lookups will miss");
            Arc::new(StaticDirectory::default())
        }
    };

    let client = SessionClient::new(config.signing_credentials(), config.max_frame_bytes);
    let coordinator = Coordinator::new(directory, client);
    let workflows: Arc<dyn WorkflowStore> =
        Arc::new(FileWorkflowStore::new(config.data_dir.join("workflows"))?);

    let state = Arc::new(AppState {
        config: config.clone(),
        coordinator,
        registry: Arc::new(InvocationRegistry::new()),
        workflows,
        deployments: None,
    });

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("listening on {}", config.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Build the router over prepared state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/invoke", post(invoke))
        .route("/api/invocations", get(list_invocations))
        .route("/api/invocations/:id/cancel", post(cancel_invocation))
        .route("/api/classify", post(classify_response))
        .route("/api/workflows/:id", get(get_workflow))
        .route("/api/workflows/:id/resume-point", get(get_resume_point))
        .route("/api/deployments/:name", get(get_deployment_status))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Invoke an agent and stream the response as SSE.
///
/// Validation happens before the coordinator is touched: a bad request must
/// cause zero upstream side effects. Once streaming starts, all failures
/// arrive as the stream's single terminal `{error}` event.
async fn invoke(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InvokeRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, String)> {
    request
        .validate()
        .map_err(|msg| (StatusCode::BAD_REQUEST, msg.to_string()))?;

    let (invocation, deltas) = state
        .coordinator
        .invoke(&request.agent_id, request.prompt, request.session_id)
        .await
        .map_err(map_coordinator_error)?;

    let invocation_id = invocation.id;
    let cancel = state.registry.register(invocation);
    let guard = RegistryGuard::new(Arc::clone(&state.registry), invocation_id);
    let relay_config = RelayConfig {
        idle_timeout: state.config.idle_timeout,
        max_response_bytes: state.config.max_response_bytes,
    };
    let events = relay_events(
        invocation_id,
        Arc::clone(&state.registry),
        guard,
        cancel,
        deltas,
        relay_config,
    );

    // The completed text flows through the classifier here; the UI fetches
    // the ParsedResponse through POST /api/classify.
    let stream = async_stream::stream! {
        futures::pin_mut!(events);
        let mut accumulated = String::new();
        while let Some(event) = events.next().await {
            match &event {
                RelayEvent::Chunk { chunk } => accumulated.push_str(chunk),
                RelayEvent::Done { .. } => {
                    let parsed = classifier::classify(&accumulated);
                    tracing::debug!(
                        invocation = %invocation_id,
                        sections = parsed.sections.len(),
                        "classified completed response"
                    );
                }
                RelayEvent::Error { .. } => {}
            }
            yield Ok(Event::default().json_data(&event).unwrap());
        }
    };

    Ok(Sse::new(stream))
}

/// List in-flight invocations.
async fn list_invocations(State(state): State<Arc<AppState>>) -> Json<Vec<Invocation>> {
    Json(state.registry.snapshot())
}

/// Cancel an in-flight invocation.
async fn cancel_invocation(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<Uuid>,
) -> Result<(StatusCode, String), (StatusCode, String)> {
    if state.registry.cancel(id) {
        Ok((StatusCode::OK, format!("Invocation {} cancelled", id)))
    } else {
        Err((
            StatusCode::NOT_FOUND,
            format!("Invocation {} not found", id),
        ))
    }
}

/// Classify a completed response into sections and tabs.
async fn classify_response(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ClassifyRequest>,
) -> Result<Json<ParsedResponse>, (StatusCode, String)> {
    if request.raw.len() > state.config.max_response_bytes {
        return Err((
            StatusCode::PAYLOAD_TOO_LARGE,
            "response exceeds classification limit".to_string(),
        ));
    }
    Ok(Json(classifier::classify(&request.raw)))
}

/// Fetch stored workflow state.
async fn get_workflow(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<WorkflowState>, (StatusCode, String)> {
    state
        .workflows
        .load_state(&id)
        .await
        .map_err(map_store_error)?
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Workflow {} not found", id)))
}

/// Fetch the checkpoint a restarted driver should resume from.
async fn get_resume_point(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<Option<Checkpoint>>, (StatusCode, String)> {
    state
        .workflows
        .last_successful_checkpoint(&id)
        .await
        .map(Json)
        .map_err(map_store_error)
}

/// Poll the external deployment-status service.
async fn get_deployment_status(
    State(state): State<Arc<AppState>>,
    AxumPath(name): AxumPath<String>,
) -> Result<Json<DeploymentStatus>, (StatusCode, String)> {
    let provider = state.deployments.as_ref().ok_or((
        StatusCode::SERVICE_UNAVAILABLE,
        "deployment status service not configured".to_string(),
    ))?;

    provider
        .get_status(&name)
        .await
        .map(Json)
        .map_err(|e| match e {
            DeploymentError::NotFound(name) => (
                StatusCode::NOT_FOUND,
                format!("Deployment {} not found", name),
            ),
            DeploymentError::Unavailable(detail) => {
                tracing::error!("deployment status service unavailable: {detail}");
                (
                    StatusCode::BAD_GATEWAY,
                    "deployment status service unavailable".to_string(),
                )
            }
        })
}

fn map_coordinator_error(error: CoordinatorError) -> (StatusCode, String) {
    match &error {
        CoordinatorError::NotFound(_) => (StatusCode::NOT_FOUND, error.to_string()),
        CoordinatorError::Misconfigured(_) => (StatusCode::UNPROCESSABLE_ENTITY, error.to_string()),
    }
}

fn map_store_error(error: StoreError) -> (StatusCode, String) {
    match &error {
        StoreError::NotFound(_) => (StatusCode::NOT_FOUND, error.to_string()),
        StoreError::InvalidId(_) => (StatusCode::BAD_REQUEST, error.to_string()),
        StoreError::StaleWrite(_) => (StatusCode::CONFLICT, error.to_string()),
        StoreError::Internal(detail) => {
            tracing::error!("workflow store failure: {detail}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage failure".to_string(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_mapping() {
        let (status, _) = map_store_error(StoreError::NotFound("wf".to_string()));
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = map_store_error(StoreError::StaleWrite("wf".to_string()));
        assert_eq!(status, StatusCode::CONFLICT);
        let (status, message) = map_store_error(StoreError::Internal("disk path leak".to_string()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!message.contains("disk"), "internal detail stays in logs");
    }

    #[test]
    fn test_coordinator_error_mapping() {
        let (status, _) = map_coordinator_error(CoordinatorError::NotFound("a".to_string()));
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = map_coordinator_error(CoordinatorError::Misconfigured("a".to_string()));
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
