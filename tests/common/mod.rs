#![allow(dead_code)]

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{
    handshake::server::{Request, Response as HandshakeResponse},
    Message,
};

use svcpulse::model::{Environment, EnvironmentType, HealthCheck, HealthStatus, Service};

/// Token the mock backend accepts.
pub const GOOD_TOKEN: &str = "good-token";
pub const EMAIL: &str = "ops@example.com";
pub const PASSWORD: &str = "hunter2";

pub fn environment(id: &str, service_id: &str, name: EnvironmentType) -> Environment {
    Environment {
        id: id.to_string(),
        name,
        url: format!("https://{}.example.com/health", id),
        service_id: service_id.to_string(),
        created_at: "2024-01-01T00:00:00".to_string(),
        current_status: Some(HealthStatus::Healthy),
        last_check: Some("2024-01-01T00:00:00".to_string()),
    }
}

pub fn service(id: &str, env_ids: &[&str]) -> Service {
    Service {
        id: id.to_string(),
        name: format!("svc-{}", id),
        description: None,
        url: None,
        team_id: "t1".to_string(),
        created_at: "2024-01-01T00:00:00".to_string(),
        environments: env_ids
            .iter()
            .map(|e| environment(e, id, EnvironmentType::Production))
            .collect(),
    }
}

pub fn check(id: &str, env_id: &str, status: HealthStatus) -> HealthCheck {
    HealthCheck {
        id: id.to_string(),
        environment_id: env_id.to_string(),
        status,
        response_time_ms: Some(42),
        status_code: Some(200),
        error_message: None,
        checked_at: format!("2024-01-01T00:00:{}", id.len()),
    }
}

// ── Mock REST backend ──────────────────────────────────────────────

#[derive(Default)]
pub struct BackendState {
    pub services: Vec<Service>,
    pub history: HashMap<String, Vec<HealthCheck>>,
    /// Requests seen, as "METHOD /path".
    pub requests: Vec<String>,
    /// Authorization headers seen, in request order.
    pub auth_headers: Vec<Option<String>>,
    /// When set, every `/api/services` listing fails with this status.
    pub fail_listing: Option<StatusCode>,
}

#[derive(Clone)]
pub struct MockBackend {
    pub addr: SocketAddr,
    pub state: Arc<Mutex<BackendState>>,
}

impl MockBackend {
    pub async fn spawn(services: Vec<Service>) -> Self {
        let state = Arc::new(Mutex::new(BackendState {
            services,
            ..Default::default()
        }));

        let app = Router::new()
            .route("/api/auth/login", post(login))
            .route("/api/auth/register", post(register))
            .route("/api/auth/me", get(me))
            .route("/api/teams/{id}", delete(delete_team))
            .route("/api/services", get(list_services))
            .route("/api/services/{id}", get(get_service).delete(delete_service))
            .route("/api/services/{id}/environments", post(create_environment))
            .route("/api/environments/{id}", delete(delete_environment))
            .route("/api/health-checks/trigger", post(trigger_check))
            .route("/api/health-checks/environment/{id}", get(history))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<String> {
        self.state.lock().requests.clone()
    }
}

type Shared = State<Arc<Mutex<BackendState>>>;

fn record(state: &Arc<Mutex<BackendState>>, headers: &HeaderMap, request: String) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let mut state = state.lock();
    state.requests.push(request);
    state.auth_headers.push(auth);
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v == format!("Bearer {}", GOOD_TOKEN))
}

fn detail(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "detail": message }))).into_response()
}

async fn login(State(state): Shared, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    record(&state, &headers, "POST /api/auth/login".into());
    if body["email"] == EMAIL && body["password"] == PASSWORD {
        Json(json!({ "access_token": GOOD_TOKEN, "token_type": "bearer" })).into_response()
    } else {
        detail(StatusCode::UNAUTHORIZED, "Incorrect email or password")
    }
}

async fn register(State(state): Shared, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    record(&state, &headers, "POST /api/auth/register".into());
    if body["email"] != EMAIL {
        return detail(StatusCode::BAD_REQUEST, "Email already registered");
    }
    Json(user_json()).into_response()
}

fn user_json() -> Value {
    json!({
        "id": "u1",
        "email": EMAIL,
        "full_name": "Ops Person",
        "role": "admin",
        "created_at": "2024-01-01T00:00:00"
    })
}

async fn me(State(state): Shared, headers: HeaderMap) -> Response {
    record(&state, &headers, "GET /api/auth/me".into());
    if authorized(&headers) {
        Json(user_json()).into_response()
    } else {
        detail(StatusCode::UNAUTHORIZED, "Could not validate credentials")
    }
}

async fn delete_team(State(state): Shared, headers: HeaderMap, Path(id): Path<String>) -> Response {
    record(&state, &headers, format!("DELETE /api/teams/{}", id));
    state.lock().services.retain(|s| s.team_id != id);
    StatusCode::NO_CONTENT.into_response()
}

async fn list_services(
    State(state): Shared,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    record(&state, &headers, "GET /api/services".into());
    let state = state.lock();
    if let Some(status) = state.fail_listing {
        return (status, "upstream exploded").into_response();
    }
    let services: Vec<&Service> = state
        .services
        .iter()
        .filter(|s| params.get("team_id").map_or(true, |t| *t == s.team_id))
        .collect();
    Json(json!({ "services": services, "total": services.len() })).into_response()
}

async fn get_service(State(state): Shared, headers: HeaderMap, Path(id): Path<String>) -> Response {
    record(&state, &headers, format!("GET /api/services/{}", id));
    let state = state.lock();
    match state.services.iter().find(|s| s.id == id) {
        Some(service) => Json(service.clone()).into_response(),
        None => detail(StatusCode::NOT_FOUND, "Service not found"),
    }
}

async fn delete_service(State(state): Shared, headers: HeaderMap, Path(id): Path<String>) -> Response {
    record(&state, &headers, format!("DELETE /api/services/{}", id));
    let mut state = state.lock();
    let before = state.services.len();
    state.services.retain(|s| s.id != id);
    if state.services.len() == before {
        return detail(StatusCode::NOT_FOUND, "Service not found");
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn create_environment(
    State(state): Shared,
    headers: HeaderMap,
    Path(service_id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    record(&state, &headers, format!("POST /api/services/{}/environments", service_id));
    let name: EnvironmentType = match serde_json::from_value(body["name"].clone()) {
        Ok(name) => name,
        Err(_) => return detail(StatusCode::UNPROCESSABLE_ENTITY, "Invalid environment"),
    };
    let mut state = state.lock();
    let Some(service) = state.services.iter_mut().find(|s| s.id == service_id) else {
        return detail(StatusCode::NOT_FOUND, "Service not found");
    };
    if service.environments.iter().any(|e| e.name == name) {
        return detail(StatusCode::BAD_REQUEST, "Environment already exists");
    }
    let mut env = environment(
        &format!("{}-{}", service_id, name),
        &service_id,
        name,
    );
    env.url = body["url"].as_str().unwrap_or_default().to_string();
    env.current_status = None;
    env.last_check = None;
    service.environments.push(env.clone());
    Json(env).into_response()
}

async fn delete_environment(
    State(state): Shared,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    record(&state, &headers, format!("DELETE /api/environments/{}", id));
    let mut state = state.lock();
    let mut found = false;
    for service in &mut state.services {
        let before = service.environments.len();
        service.environments.retain(|e| e.id != id);
        found |= service.environments.len() != before;
    }
    if !found {
        return detail(StatusCode::NOT_FOUND, "Environment not found");
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn trigger_check(State(state): Shared, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    record(&state, &headers, "POST /api/health-checks/trigger".into());
    let env_id = body["environment_id"].as_str().unwrap_or_default().to_string();
    let state = state.lock();
    let known = state
        .services
        .iter()
        .flat_map(|s| &s.environments)
        .any(|e| e.id == env_id);
    if !known {
        return detail(StatusCode::NOT_FOUND, "Environment not found");
    }
    let mut result = check("triggered", &env_id, HealthStatus::Degraded);
    result.response_time_ms = Some(1800);
    result.checked_at = "2024-01-02T00:00:00".to_string();
    Json(result).into_response()
}

async fn history(
    State(state): Shared,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    record(&state, &headers, format!("GET /api/health-checks/environment/{}", id));
    let limit = params
        .get("limit")
        .and_then(|l| l.parse::<usize>().ok())
        .unwrap_or(50);
    let state = state.lock();
    match state.history.get(&id) {
        Some(checks) => Json(checks.iter().take(limit).cloned().collect::<Vec<_>>()).into_response(),
        None => detail(StatusCode::NOT_FOUND, "Environment not found"),
    }
}

// ── Mock push server ───────────────────────────────────────────────

/// One accepted push connection, seen from the server side.
pub struct PushConnection {
    /// Authorization header sent with the upgrade request.
    pub authorization: Option<String>,
    /// Text frames sent by the client.
    pub inbound: mpsc::UnboundedReceiver<String>,
    /// Text frames to send to the client. Dropping it closes the connection.
    pub outbound: mpsc::UnboundedSender<String>,
}

impl PushConnection {
    /// Next client frame, parsed as JSON.
    pub async fn next_json(&mut self) -> Value {
        let text = tokio::time::timeout(Duration::from_secs(5), self.inbound.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client disconnected");
        serde_json::from_str(&text).expect("client frame is not JSON")
    }

    pub fn send(&self, value: Value) {
        self.outbound.send(value.to_string()).unwrap();
    }

    pub fn send_raw(&self, text: &str) {
        self.outbound.send(text.to_string()).unwrap();
    }
}

/// WebSocket server that hands every accepted connection to the test.
pub struct MockPushServer {
    pub addr: SocketAddr,
    connections: mpsc::UnboundedReceiver<PushConnection>,
}

impl MockPushServer {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::from_listener(listener)
    }

    pub fn from_listener(listener: TcpListener) -> Self {
        let addr = listener.local_addr().unwrap();
        let (conn_tx, connections) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let conn_tx = conn_tx.clone();
                tokio::spawn(async move {
                    let mut authorization = None;
                    let callback = |req: &Request, resp: HandshakeResponse| {
                        authorization = req
                            .headers()
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        Ok(resp)
                    };
                    let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
                        return;
                    };
                    let (mut sink, mut stream) = ws.split();
                    let (in_tx, inbound) = mpsc::unbounded_channel();
                    let (outbound, mut out_rx) = mpsc::unbounded_channel::<String>();
                    if conn_tx
                        .send(PushConnection {
                            authorization,
                            inbound,
                            outbound,
                        })
                        .is_err()
                    {
                        return;
                    }

                    loop {
                        tokio::select! {
                            frame = stream.next() => match frame {
                                Some(Ok(Message::Text(text))) => {
                                    let _ = in_tx.send(text.as_str().to_owned());
                                }
                                Some(Ok(_)) => {}
                                _ => break,
                            },
                            out = out_rx.recv() => match out {
                                Some(text) => {
                                    if sink.send(Message::text(text)).await.is_err() {
                                        break;
                                    }
                                }
                                None => {
                                    let _ = sink.close().await;
                                    break;
                                }
                            },
                        }
                    }
                });
            }
        });
        Self { addr, connections }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Wait for the next client connection.
    pub async fn accept(&mut self) -> PushConnection {
        tokio::time::timeout(Duration::from_secs(5), self.connections.recv())
            .await
            .expect("timed out waiting for a push connection")
            .expect("push server stopped")
    }
}
