use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::agents::{decode_request, AgentError, AgentRoster};
use crate::threads::{ThreadError, ThreadTable};

/// Server configuration.
pub struct PeerServerConfig {
    /// `0` binds a random port.
    pub port: u16,
    pub request_timeout_secs: u64,
    /// Idle or finished threads older than this are evicted.
    pub thread_ttl_secs: u64,
}

impl Default for PeerServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            request_timeout_secs: 60,
            thread_ttl_secs: 3600,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub roster: Arc<AgentRoster>,
    pub threads: Arc<ThreadTable>,
}

impl AppState {
    pub fn new(roster: AgentRoster) -> Self {
        Self {
            roster: Arc::new(roster),
            threads: Arc::new(ThreadTable::new()),
        }
    }
}

#[derive(Deserialize)]
struct RunRequest {
    assistant_id: String,
    #[serde(default)]
    input: Value,
}

/// Errors surfaced to peer clients as `{"detail": ...}`.
#[derive(Debug)]
enum ApiError {
    NotFound(String),
    Conflict(String),
    Unprocessable(String),
}

impl From<ThreadError> for ApiError {
    fn from(err: ThreadError) -> Self {
        match err {
            ThreadError::NotFound(_) => Self::NotFound(err.to_string()),
            ThreadError::AlreadyRun(_) => Self::Conflict(err.to_string()),
        }
    }
}

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        Self::Unprocessable(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            Self::NotFound(d) => (StatusCode::NOT_FOUND, d),
            Self::Conflict(d) => (StatusCode::CONFLICT, d),
            Self::Unprocessable(d) => (StatusCode::UNPROCESSABLE_ENTITY, d),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/threads", post(create_thread))
        .route("/threads/{thread_id}", delete(delete_thread))
        .route("/threads/{thread_id}/runs/wait", post(run_wait))
        .route("/health", get(health))
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve the travel peer agents. Returns a handle that keeps the server alive.
pub async fn start(config: PeerServerConfig) -> Result<ServerHandle, std::io::Error> {
    start_with_roster(config, AgentRoster::travel()).await
}

pub async fn start_with_roster(
    config: PeerServerConfig,
    roster: AgentRoster,
) -> Result<ServerHandle, std::io::Error> {
    let agents = roster.names();
    let state = AppState::new(roster);
    let threads = Arc::clone(&state.threads);
    let router = build_router(state, Duration::from_secs(config.request_timeout_secs));
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    info!(port = local_addr.port(), ?agents, "peer server started");

    let ttl = Duration::from_secs(config.thread_ttl_secs);
    let sweeper = start_sweeper(threads, ttl, sweep_interval(ttl));

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            warn!(error = %e, "peer server stopped");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        server,
        sweeper,
    })
}

fn sweep_interval(ttl: Duration) -> Duration {
    (ttl / 4).clamp(Duration::from_secs(1), Duration::from_secs(60))
}

/// Periodically evict threads whose clients never deleted them.
pub fn start_sweeper(
    threads: Arc<ThreadTable>,
    ttl: Duration,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            interval.tick().await;
            let evicted = threads.evict_expired(ttl, chrono::Utc::now());
            if evicted > 0 {
                debug!(evicted, remaining = threads.len(), "expired threads evicted");
            }
        }
    })
}

/// Handle returned by `start()`. Dropping it leaves the server running;
/// [`ServerHandle::shutdown`] stops it.
pub struct ServerHandle {
    pub port: u16,
    server: tokio::task::JoinHandle<()>,
    sweeper: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn shutdown(self) {
        self.server.abort();
        self.sweeper.abort();
    }

    /// Wait until the server task ends.
    pub async fn wait(self) {
        let _ = self.server.await;
        self.sweeper.abort();
    }
}

async fn create_thread(State(state): State<AppState>) -> impl IntoResponse {
    let (thread_id, created_at) = state.threads.create();
    debug!(%thread_id, "thread created");
    Json(json!({ "thread_id": thread_id, "created_at": created_at }))
}

async fn delete_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.threads.remove(&thread_id) {
        debug!(%thread_id, "thread deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ThreadError::NotFound(thread_id).into())
    }
}

async fn run_wait(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    body: Result<Json<RunRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    if !state.threads.contains(&thread_id) {
        return Err(ThreadError::NotFound(thread_id).into());
    }
    let Json(request) = body.map_err(|e| ApiError::Unprocessable(e.body_text()))?;
    let agent = state.roster.get(&request.assistant_id).ok_or_else(|| {
        ApiError::NotFound(format!("assistant {} not found", request.assistant_id))
    })?;

    state.threads.begin_run(&thread_id)?;
    let outcome = match decode_request(&request.input) {
        Ok(args) => agent.handle(&args).await,
        Err(e) => Err(e),
    };
    state.threads.finish_run(&thread_id);

    let output = outcome.map_err(|e| {
        warn!(%thread_id, assistant_id = %request.assistant_id, error = %e, "run rejected");
        ApiError::from(e)
    })?;
    info!(%thread_id, assistant_id = %request.assistant_id, "run complete");

    Ok(Json(json!({
        "thread_id": thread_id,
        "assistant_id": request.assistant_id,
        "status": "success",
        "output": output,
    })))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "status": "healthy", "agents": state.roster.names() }))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn server() -> (ServerHandle, String) {
        let handle = start(PeerServerConfig {
            port: 0,
            ..Default::default()
        })
        .await
        .unwrap();
        let base = format!("http://127.0.0.1:{}", handle.port);
        (handle, base)
    }

    async fn new_thread(http: &reqwest::Client, base: &str) -> String {
        let body: Value = http
            .post(format!("{base}/threads"))
            .json(&json!({}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        body["thread_id"].as_str().unwrap().to_string()
    }

    fn run_body(assistant: &str, request: Value) -> Value {
        json!({
            "assistant_id": assistant,
            "input": {"messages": [{
                "type": "human",
                "content": [{"type": "text", "text": request.to_string()}],
            }]},
        })
    }

    #[tokio::test]
    async fn health_lists_agents() {
        let (handle, base) = server().await;
        let resp = reqwest::get(format!("{base}/health")).await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["agents"].as_array().unwrap().len(), 4);
        handle.shutdown();
    }

    #[tokio::test]
    async fn full_thread_lifecycle() {
        let (handle, base) = server().await;
        let http = reqwest::Client::new();
        let thread_id = new_thread(&http, &base).await;

        let resp = http
            .post(format!("{base}/threads/{thread_id}/runs/wait"))
            .json(&run_body(
                "esim_agent",
                json!({"destination_country": "Japan", "travel_duration": 7}),
            ))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["thread_id"], thread_id.as_str());
        assert_eq!(body["assistant_id"], "esim_agent");
        assert_eq!(body["status"], "success");
        assert_eq!(body["output"]["plans"][0]["plan_id"], "ESIM001");

        let second = http
            .post(format!("{base}/threads/{thread_id}/runs/wait"))
            .json(&run_body(
                "esim_agent",
                json!({"destination_country": "Japan", "travel_duration": 7}),
            ))
            .send()
            .await
            .unwrap();
        assert_eq!(second.status(), 409);

        let deleted = http
            .delete(format!("{base}/threads/{thread_id}"))
            .send()
            .await
            .unwrap();
        assert_eq!(deleted.status(), 204);
        let again = http
            .delete(format!("{base}/threads/{thread_id}"))
            .send()
            .await
            .unwrap();
        assert_eq!(again.status(), 404);
        handle.shutdown();
    }

    #[tokio::test]
    async fn unknown_thread_and_assistant() {
        let (handle, base) = server().await;
        let http = reqwest::Client::new();

        let resp = http
            .post(format!("{base}/threads/nope/runs/wait"))
            .json(&run_body("hotel_agent", json!({})))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);

        let thread_id = new_thread(&http, &base).await;
        let resp = http
            .post(format!("{base}/threads/{thread_id}/runs/wait"))
            .json(&run_body("car_agent", json!({})))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        let body: Value = resp.json().await.unwrap();
        assert!(body["detail"].as_str().unwrap().contains("car_agent"));
        handle.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_evicts_abandoned_threads() {
        let threads = Arc::new(ThreadTable::new());
        let (id, _) = threads.create();
        let sweeper = start_sweeper(Arc::clone(&threads), Duration::ZERO, Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!threads.contains(&id));
        sweeper.abort();
    }

    #[test]
    fn sweep_interval_is_bounded() {
        assert_eq!(sweep_interval(Duration::from_secs(3600)), Duration::from_secs(60));
        assert_eq!(sweep_interval(Duration::from_secs(20)), Duration::from_secs(5));
        assert_eq!(sweep_interval(Duration::ZERO), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn malformed_input_is_unprocessable() {
        let (handle, base) = server().await;
        let http = reqwest::Client::new();

        let thread_id = new_thread(&http, &base).await;
        let resp = http
            .post(format!("{base}/threads/{thread_id}/runs/wait"))
            .json(&json!({"input": {}}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 422);

        let thread_id = new_thread(&http, &base).await;
        let resp = http
            .post(format!("{base}/threads/{thread_id}/runs/wait"))
            .json(&run_body("flight_agent", json!({"origin": "SFO"})))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 422);
        let body: Value = resp.json().await.unwrap();
        assert!(body["detail"].as_str().unwrap().contains("destination"));
        handle.shutdown();
    }
}
