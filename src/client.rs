//! Client side view of the server: asking whether the server half of a key is still live.
use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use crate::scheme::Scheme;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("liveness check failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected liveness response {0}")]
    UnexpectedStatus(StatusCode),
    #[error("invalid server url `{0}`")]
    InvalidUrl(String),
}

/// Reports whether the server still holds a live share for a user and scheme.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn is_live(&self, user_id: &str, scheme: Scheme) -> Result<bool, ProbeError>;
}

/// Probes a running server through `GET /api/check-exists/<user_id>/<scheme>`.
#[derive(Debug, Clone)]
pub struct HttpLivenessProbe {
    client: reqwest::Client,
    server_url: String,
}

impl HttpLivenessProbe {
    pub fn new(client: reqwest::Client, server_url: &str) -> Self {
        Self {
            client,
            server_url: server_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn check_url(&self, user_id: &str, scheme: Scheme) -> Result<reqwest::Url, ProbeError> {
        let invalid = || ProbeError::InvalidUrl(self.server_url.clone());
        let mut url = reqwest::Url::parse(&self.server_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(["api", "check-exists", user_id, scheme.as_str()]);
        Ok(url)
    }
}

#[async_trait]
impl LivenessProbe for HttpLivenessProbe {
    async fn is_live(&self, user_id: &str, scheme: Scheme) -> Result<bool, ProbeError> {
        let url = self.check_url(user_id, scheme)?;
        let response = self.client.get(url).send().await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::BAD_REQUEST => Ok(false),
            status => Err(ProbeError::UnexpectedStatus(status)),
        }
    }
}
