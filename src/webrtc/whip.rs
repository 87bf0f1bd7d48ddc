//! WHIP ingest signaling
//!
//! One HTTP POST carrying the SDP offer, answered with the SDP answer.
//! Exactly one attempt per call; retry policy belongs to the controller.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, LOCATION};
use reqwest::{StatusCode, Url};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::IngestConfig;
use crate::error::{AppError, Result};

pub const SDP_MIME: &str = "application/sdp";

/// Resolved ingest endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestEndpoint {
    pub url: Url,
    pub bearer_token: Option<String>,
    /// Per-endpoint bound on the round trip; the client default otherwise
    pub timeout: Option<Duration>,
}

impl IngestEndpoint {
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| AppError::Config(format!("Invalid ingest URL '{}': {}", url, e)))?;
        Ok(Self {
            url,
            bearer_token: None,
            timeout: None,
        })
    }

    /// Build the endpoint from the base URL, stream key and path template
    pub fn resolve(config: &IngestConfig) -> Result<Self> {
        let base = config.base_url.trim().trim_end_matches('/');
        let key = config.stream_key.trim();
        if base.is_empty() {
            return Err(AppError::Config("ingest base URL is not set".to_string()));
        }
        if key.is_empty() {
            return Err(AppError::Config("stream key is not set".to_string()));
        }

        let url = config
            .path_template
            .replace("{base}", base)
            .replace("{key}", key);
        let mut endpoint = Self::new(&url)?;
        endpoint.bearer_token = config.bearer_token.clone().filter(|t| !t.is_empty());
        endpoint.timeout = Some(Duration::from_millis(config.timeout_ms));
        Ok(endpoint)
    }
}

/// Result of a successful publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhipResource {
    pub answer_sdp: String,
    /// Resource URL from the `Location` header, used for teardown
    pub location: Option<Url>,
    pub bearer_token: Option<String>,
}

#[async_trait]
pub trait IngestClient: Send + Sync {
    /// POST `offer_sdp` and return the answer
    async fn publish(&self, offer_sdp: &str, endpoint: &IngestEndpoint) -> Result<WhipResource>;

    /// Best-effort DELETE of the WHIP resource; never retried
    async fn teardown(&self, resource: &WhipResource);
}

pub struct WhipClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl WhipClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("live-publisher/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { http, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn map_error(err: reqwest::Error, timeout: Duration) -> AppError {
        if err.is_timeout() {
            AppError::IngestTimeout(timeout.as_millis() as u64)
        } else {
            AppError::IngestRejected {
                status: err.status().map(|s| s.as_u16()),
                body: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl IngestClient for WhipClient {
    async fn publish(&self, offer_sdp: &str, endpoint: &IngestEndpoint) -> Result<WhipResource> {
        debug!("POST offer ({} bytes) to {}", offer_sdp.len(), endpoint.url);
        let timeout = endpoint.timeout.unwrap_or(self.timeout);

        let mut request = self
            .http
            .post(endpoint.url.clone())
            .header(CONTENT_TYPE, SDP_MIME)
            .header(ACCEPT, SDP_MIME)
            .timeout(timeout)
            .body(offer_sdp.to_string());
        if let Some(token) = &endpoint.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Self::map_error(e, timeout))?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Ingest rejected offer: {} {}", status, body.trim());
            return Err(AppError::IngestRejected {
                status: Some(status.as_u16()),
                body,
            });
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|l| endpoint.url.join(l).ok());

        let answer_sdp = response
            .text()
            .await
            .map_err(|e| Self::map_error(e, timeout))?;
        info!(
            "Ingest accepted offer ({}), resource: {}",
            status,
            location.as_ref().map(|u| u.as_str()).unwrap_or("none")
        );

        Ok(WhipResource {
            answer_sdp,
            location,
            bearer_token: endpoint.bearer_token.clone(),
        })
    }

    async fn teardown(&self, resource: &WhipResource) {
        let Some(location) = &resource.location else {
            return;
        };

        let mut request = self.http.delete(location.clone()).timeout(self.timeout);
        if let Some(token) = &resource.bearer_token {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(resp) if resp.status().is_success() || resp.status() == StatusCode::NOT_FOUND => {
                debug!("WHIP resource {} deleted", location);
            }
            Ok(resp) => warn!("WHIP teardown of {} returned {}", location, resp.status()),
            Err(e) => warn!("WHIP teardown of {} failed: {}", location, e),
        }
    }
}
