use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::engine::CommandError;
use crate::engine::Engine;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
    integrations: Vec<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    version: &'static str,
    engine: Arc<Engine>,
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/info request");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    let mut integrations = state.engine.integration_names();
    integrations.sort();

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
            integrations,
        }),
    )
}

/// Handler for GET /v1/sensors
#[tracing::instrument(skip(state))]
async fn sensors(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.engine.state_snapshot();
    (StatusCode::OK, Json(snapshot.sensors.clone()))
}

/// Handler for GET /v1/sensors/:entity_id
#[tracing::instrument(skip(state))]
async fn sensor(State(state): State<Arc<AppState>>, Path(entity_id): Path<String>) -> Response {
    let snapshot = state.engine.state_snapshot();
    match snapshot.sensors.get(&entity_id) {
        Some(sensor) => (StatusCode::OK, Json(sensor.clone())).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("No sensor named '{}'", entity_id),
        ),
    }
}

/// Handler for GET /v1/diagnostics/:integration
#[tracing::instrument(skip(state))]
async fn diagnostics(
    State(state): State<Arc<AppState>>,
    Path(integration): Path<String>,
) -> Response {
    let snapshot = state.engine.state_snapshot();
    match snapshot.diagnostics.get(&integration) {
        Some(diagnostics) => (StatusCode::OK, Json(diagnostics.clone())).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("No diagnostics for '{}'", integration),
        ),
    }
}

/// Handler for POST /v1/integrations/:integration/refresh
#[tracing::instrument(skip(state))]
async fn refresh(State(state): State<Arc<AppState>>, Path(integration): Path<String>) -> Response {
    match state.engine.request_refresh(&integration) {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e @ CommandError::UnknownIntegration(_)) => {
            error_response(StatusCode::NOT_FOUND, e)
        }
        Err(e @ CommandError::ChannelClosed(_)) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, e)
        }
    }
}

/// Create the API router with all endpoints
fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/v1/sensors", get(sensors))
        .route("/v1/sensors/:entity_id", get(sensor))
        .route("/v1/diagnostics/:integration", get(diagnostics))
        .route("/v1/integrations/:integration/refresh", post(refresh))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
///
/// Serves the engine's state on `config.listen:config.port` until
/// `shutdown_rx` fires.
pub async fn serve(
    config: ApiConfig,
    engine: Arc<Engine>,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let version = env!("CARGO_PKG_VERSION");

    let state = Arc::new(AppState { version, engine });
    let app = create_router(state);

    let addr = SocketAddr::new(config.listen, config.port);
    tracing::info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}
