use std::time::Instant;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use tracing::{debug, info};

use super::error::AuthError;
use crate::config::BoundaryConfig;
use crate::metrics::{Metrics, MetricsRecorder};
use crate::models::AuthPayload;

/// The server-side endpoints that decide who is signed in.
#[async_trait]
pub trait AuthBoundary: Send + Sync {
    /// `GET {prefix}/session`
    async fn fetch_session(&self) -> Result<AuthPayload, AuthError>;
    /// `GET {prefix}/user`
    async fn fetch_user(&self) -> Result<AuthPayload, AuthError>;
}

/// Same-origin, credentialed JSON calls to the session and user endpoints.
pub struct HttpBoundary {
    client: reqwest::Client,
    session_url: String,
    user_url: String,
    metrics: Metrics,
}

impl HttpBoundary {
    pub fn new(config: &BoundaryConfig, metrics: Metrics) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(config.timeout())
            .build()
            .map_err(|e| AuthError::NetworkFailure(format!("Error building HTTP client: {}", e)))?;

        let base = config.base_url.trim_end_matches('/');
        let prefix = config.prefix.trim_matches('/');
        let root = if prefix.is_empty() {
            base.to_string()
        } else {
            format!("{}/{}", base, prefix)
        };
        info!("Auth boundary at {}", root);

        Ok(HttpBoundary {
            client,
            session_url: format!("{}/session", root),
            user_url: format!("{}/user", root),
            metrics,
        })
    }

    async fn fetch(&self, endpoint: &str, url: &str) -> Result<AuthPayload, AuthError> {
        let started = Instant::now();
        let result = query(&self.client, url).await;
        self.metrics
            .record_boundary_duration(endpoint, started.elapsed().as_secs_f64());
        let outcome = match &result {
            Ok(_) => "ok",
            Err(AuthError::AuthExpired) => "unauthenticated",
            Err(_) => "failure",
        };
        self.metrics.record_boundary_call(endpoint, outcome);
        result
    }
}

#[async_trait]
impl AuthBoundary for HttpBoundary {
    async fn fetch_session(&self) -> Result<AuthPayload, AuthError> {
        self.fetch("session", &self.session_url).await
    }

    async fn fetch_user(&self) -> Result<AuthPayload, AuthError> {
        self.fetch("user", &self.user_url).await
    }
}

/// 200 -> payload, 401 -> authoritative sign-out, anything else -> indeterminate.
async fn query(client: &reqwest::Client, url: &str) -> Result<AuthPayload, AuthError> {
    debug!("Sending auth boundary request to: {}", url);
    let response = client
        .get(url)
        .header(ACCEPT, "application/json")
        .send()
        .await
        .map_err(|e| AuthError::NetworkFailure(format!("Error sending request: {}", e)))?;

    match response.status() {
        StatusCode::UNAUTHORIZED => Err(AuthError::AuthExpired),
        status if status.is_success() => response
            .json::<AuthPayload>()
            .await
            .map_err(|e| AuthError::NetworkFailure(format!("Error parsing JSON: {}", e))),
        status => Err(AuthError::NetworkFailure(format!(
            "Unexpected status code: {}",
            status
        ))),
    }
}
