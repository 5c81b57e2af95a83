//! HTTP client for towers and the local daemon

use anyhow::Result;
use reqwest::StatusCode;
use std::time::Duration;
use towerlink_common::{join_path, Error, HealthResponse, JoinRequest, JoinResponse};

/// Client for a node's HTTP API
pub struct NodeClient {
    http: reqwest::Client,
    base: String,
}

impl NodeClient {
    /// Create a client for the node at `base`, e.g. `http://tower.example.com:8080`
    pub fn new(base: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    /// Query `/health`
    pub async fn health(&self) -> Result<HealthResponse> {
        let resp = self
            .http
            .get(format!("{}/health", self.base))
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    /// Ask the tower to admit this node into `network_id`
    pub async fn join(&self, network_id: &str, request: &JoinRequest) -> Result<JoinResponse> {
        let url = format!("{}{}", self.base, join_path(network_id));
        let resp = self.http.post(&url).json(request).send().await?;

        let status = resp.status();
        if status == StatusCode::OK {
            return Ok(resp.json().await?);
        }

        let message = resp
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| v["error"].as_str().map(str::to_string))
            .unwrap_or_else(|| status.to_string());

        Err(join_error(status, network_id, &request.public_key, message).into())
    }
}

/// Map a tower status code onto the shared error taxonomy
fn join_error(status: StatusCode, network_id: &str, public_key: &str, message: String) -> Error {
    match status {
        StatusCode::UNAUTHORIZED => Error::Unauthorized {
            fingerprint: towerlink_common::fingerprint(public_key),
        },
        StatusCode::NOT_FOUND => Error::NotFound {
            kind: "network".to_string(),
            id: network_id.to_string(),
        },
        StatusCode::CONFLICT => Error::Conflict(message),
        _ => Error::Internal(format!("tower responded with status {}: {}", status, message)),
    }
}
