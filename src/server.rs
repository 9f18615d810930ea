//! HTTP surface consumed by Jenkins jobs.
//!
//! `/start` and `/destroy` keep the historical contract: a small JSON object
//! on success, HTTP 500 with the error text otherwise. `/machines` and
//! `/health` are for operators.

use crate::error::AgentManagerError;
use crate::fleet::FleetController;
use crate::machine::{Machine, MachineState};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct AppState {
    controller: Arc<FleetController>,
}

impl AppState {
    pub fn new(controller: Arc<FleetController>) -> Self {
        Self { controller }
    }
}

#[derive(Debug, Deserialize)]
struct StartParams {
    label: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DestroyParams {
    id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartResponse {
    pub state: MachineState,
    pub id: String,
    pub label: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DestroyResponse {
    pub state: MachineState,
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error text plus status code
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    /// `/start` and `/destroy` report every failure as 500
    fn legacy(err: AgentManagerError) -> Self {
        Self::internal(err.to_string())
    }
}

impl From<AgentManagerError> for ApiError {
    fn from(err: AgentManagerError) -> Self {
        let status = match &err {
            AgentManagerError::MachineNotFound(_) => StatusCode::NOT_FOUND,
            AgentManagerError::InvalidState { .. } | AgentManagerError::MachineBusy(_) => {
                StatusCode::CONFLICT
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/start", get(start).post(start))
        .route("/destroy", get(destroy).post(destroy))
        .route("/machines", get(list_machines))
        .route("/machines/{id}", delete(delete_machine))
        .route("/health", get(health))
        .with_state(state)
}

/// Run a controller call on the blocking pool. The call runs to completion
/// even if the client goes away.
async fn run_blocking<T, F>(controller: Arc<FleetController>, f: F) -> Result<crate::Result<T>, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&FleetController) -> crate::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&controller))
        .await
        .map_err(|e| {
            error!(error = %e, "Controller task failed");
            ApiError::internal(format!("controller task failed: {}", e))
        })
}

async fn start(
    State(state): State<AppState>,
    Query(params): Query<StartParams>,
) -> Result<Json<StartResponse>, ApiError> {
    let label = params
        .label
        .filter(|l| !l.is_empty())
        .ok_or_else(|| ApiError::internal("missing query parameter: label"))?;

    info!(label = %label, "Start requested");
    let requested = label.clone();
    let machine = run_blocking(state.controller, move |c| c.start_agent(&requested))
        .await?
        .map_err(|e| {
            warn!(label = %label, error = %e, "Start failed");
            ApiError::legacy(e)
        })?;

    Ok(Json(StartResponse {
        state: machine.state,
        id: machine.id,
        label: machine.label,
    }))
}

async fn destroy(
    State(state): State<AppState>,
    Query(params): Query<DestroyParams>,
) -> Result<Json<DestroyResponse>, ApiError> {
    let id = params
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::internal("missing query parameter: id"))?;

    info!(id = %id, "Stop requested");
    let requested = id.clone();
    let machine = run_blocking(state.controller, move |c| c.stop_agent(&requested))
        .await?
        .map_err(|e| {
            warn!(id = %id, error = %e, "Stop failed");
            ApiError::legacy(e)
        })?;

    Ok(Json(DestroyResponse {
        state: machine.state,
        id: machine.id,
    }))
}

async fn list_machines(State(state): State<AppState>) -> Result<Json<Vec<Machine>>, ApiError> {
    let machines = run_blocking(state.controller, |c| c.list_machines()).await??;
    Ok(Json(machines))
}

async fn delete_machine(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Machine>, ApiError> {
    let machine = run_blocking(state.controller, move |c| c.delete_machine(&id)).await??;
    Ok(Json(machine))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::version::VERSION.to_string(),
    })
}

/// Serve until `shutdown` resolves, then stop accepting connections and let
/// in-flight requests finish.
pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Listening for connections");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

/// Resolves on Ctrl-C
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
