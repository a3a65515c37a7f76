//! HTTP client for the monitoring backend's REST API.
//!
//! [`ApiClient`] is an explicit value carrying the server address and the
//! caller's bearer token. Build one per session and pass it to whoever needs
//! it; there is no process-wide client.

pub mod error;

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;

pub use error::{ApiError, DEFAULT_ERROR_MESSAGE};

use crate::model::{
    AuthToken, Environment, EnvironmentType, HealthCheck, Service, ServiceList, ServiceUpdate,
    Team, User,
};

/// Path prefix of every REST endpoint.
pub const API_PREFIX: &str = "/api";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    /// Create a client for the server at `base_url` (e.g. `http://127.0.0.1:8000`).
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Transport {
                url: base_url.to_string(),
                source: e,
            })?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, API_PREFIX, path)
    }

    /// Send a request and decode the JSON response.
    ///
    /// 204 and empty bodies decode from `null`, so `T = ()` or `Option<_>`
    /// accept them.
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, ApiError> {
        let url = self.url_for(path);
        let mut req = self.http.request(method.clone(), &url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }

        let resp = req.send().await.map_err(|e| ApiError::Transport {
            url: url.clone(),
            source: e,
        })?;
        let status = resp.status();
        let bytes = resp.bytes().await.map_err(|e| ApiError::Transport {
            url: url.clone(),
            source: e,
        })?;

        if !status.is_success() {
            tracing::debug!(%method, %url, status = status.as_u16(), "request failed");
            return Err(ApiError::from_body(status, &bytes));
        }

        let decoded = if status == StatusCode::NO_CONTENT || bytes.is_empty() {
            serde_json::from_value(serde_json::Value::Null)
        } else {
            serde_json::from_slice(&bytes)
        };
        decoded.map_err(|e| ApiError::Decode {
            url,
            detail: e.to_string(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(Method::GET, path, None).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, ApiError> {
        self.request(Method::POST, path, Some(body)).await
    }

    async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.request(Method::DELETE, path, None).await
    }

    // ── Auth ────────────────────────────────────────────────────────

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        full_name: Option<&str>,
    ) -> Result<User, ApiError> {
        self.post(
            "/auth/register",
            json!({ "email": email, "password": password, "full_name": full_name }),
        )
        .await
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthToken, ApiError> {
        self.post("/auth/login", json!({ "email": email, "password": password }))
            .await
    }

    pub async fn me(&self) -> Result<User, ApiError> {
        self.get("/auth/me").await
    }

    // ── Teams ───────────────────────────────────────────────────────

    pub async fn teams(&self) -> Result<Vec<Team>, ApiError> {
        self.get("/teams").await
    }

    pub async fn team(&self, team_id: &str) -> Result<Team, ApiError> {
        self.get(&format!("/teams/{}", encode_segment(team_id))).await
    }

    pub async fn create_team(&self, name: &str, description: Option<&str>) -> Result<Team, ApiError> {
        self.post("/teams", json!({ "name": name, "description": description }))
            .await
    }

    pub async fn delete_team(&self, team_id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/teams/{}", encode_segment(team_id))).await
    }

    // ── Services ────────────────────────────────────────────────────

    pub async fn services(&self, team_id: Option<&str>) -> Result<ServiceList, ApiError> {
        let path = match team_id {
            Some(team) => format!("/services?team_id={}", encode_segment(team)),
            None => "/services".to_string(),
        };
        self.get(&path).await
    }

    pub async fn service(&self, service_id: &str) -> Result<Service, ApiError> {
        self.get(&format!("/services/{}", encode_segment(service_id)))
            .await
    }

    pub async fn create_service(
        &self,
        name: &str,
        team_id: &str,
        description: Option<&str>,
        url: Option<&str>,
    ) -> Result<Service, ApiError> {
        self.post(
            "/services",
            json!({ "name": name, "team_id": team_id, "description": description, "url": url }),
        )
        .await
    }

    pub async fn update_service(
        &self,
        service_id: &str,
        update: &ServiceUpdate,
    ) -> Result<Service, ApiError> {
        let body = serde_json::to_value(update).map_err(|e| ApiError::Decode {
            url: self.url_for("/services"),
            detail: e.to_string(),
        })?;
        self.request(
            Method::PUT,
            &format!("/services/{}", encode_segment(service_id)),
            Some(body),
        )
        .await
    }

    pub async fn delete_service(&self, service_id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/services/{}", encode_segment(service_id)))
            .await
    }

    // ── Environments ────────────────────────────────────────────────

    pub async fn environments(&self, service_id: &str) -> Result<Vec<Environment>, ApiError> {
        self.get(&format!("/services/{}/environments", encode_segment(service_id)))
            .await
    }

    pub async fn environment(&self, environment_id: &str) -> Result<Environment, ApiError> {
        self.get(&format!("/environments/{}", encode_segment(environment_id)))
            .await
    }

    pub async fn create_environment(
        &self,
        service_id: &str,
        name: EnvironmentType,
        url: &str,
    ) -> Result<Environment, ApiError> {
        self.post(
            &format!("/services/{}/environments", encode_segment(service_id)),
            json!({ "name": name, "url": url }),
        )
        .await
    }

    pub async fn delete_environment(&self, environment_id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/environments/{}", encode_segment(environment_id)))
            .await
    }

    // ── Health checks ───────────────────────────────────────────────

    pub async fn trigger_health_check(&self, environment_id: &str) -> Result<HealthCheck, ApiError> {
        self.post(
            "/health-checks/trigger",
            json!({ "environment_id": environment_id }),
        )
        .await
    }

    /// Recent checks for an environment, newest first.
    pub async fn health_history(
        &self,
        environment_id: &str,
        limit: usize,
    ) -> Result<Vec<HealthCheck>, ApiError> {
        self.get(&format!(
            "/health-checks/environment/{}?limit={}",
            encode_segment(environment_id),
            limit
        ))
        .await
    }

    pub async fn latest_health_check(&self, environment_id: &str) -> Result<HealthCheck, ApiError> {
        self.get(&format!(
            "/health-checks/latest/{}",
            encode_segment(environment_id)
        ))
        .await
    }
}

/// Percent-encode an identifier for use as a URL path segment or query value.
fn encode_segment(id: &str) -> String {
    let mut encoded = String::with_capacity(id.len());
    for b in id.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(b as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", b)),
        }
    }
    encoded
}
