use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use globaliq_core::domain::service::ServiceEndpoint;
use reqwest::redirect::Policy;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::orchestrator::health::LivenessProbe;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("request timed out")]
    Timeout,
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("service answered with status {0}")]
    Status(u16),
    #[error("response body could not be decoded: {0}")]
    Decode(String),
}

#[async_trait]
pub trait PredictionService: Send + Sync {
    async fn dispatch(
        &self,
        endpoint: &ServiceEndpoint,
        body: &Value,
        timeout: Duration,
    ) -> Result<Value, DispatchError>;
}

#[derive(Debug, Deserialize)]
struct HealthBody {
    status: String,
}

/// reqwest client for the downstream prediction services.
///
/// Redirects are never followed: only the allow-listed base URL may receive field data, so a
/// 3xx answer is reported as a failed status.
#[derive(Clone, Debug)]
pub struct HttpServiceClient {
    client: Client,
}

impl HttpServiceClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .redirect(Policy::none())
            .build()
            .context("failed to build service http client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PredictionService for HttpServiceClient {
    async fn dispatch(
        &self,
        endpoint: &ServiceEndpoint,
        body: &Value,
        timeout: Duration,
    ) -> Result<Value, DispatchError> {
        let response = self
            .client
            .post(endpoint.dispatch_url())
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Status(status.as_u16()));
        }
        response.json::<Value>().await.map_err(|error| {
            if error.is_timeout() {
                DispatchError::Timeout
            } else {
                DispatchError::Decode(error.to_string())
            }
        })
    }
}

#[async_trait]
impl LivenessProbe for HttpServiceClient {
    async fn probe(&self, endpoint: &ServiceEndpoint) -> Result<bool> {
        let response = self
            .client
            .get(endpoint.health_url())
            .send()
            .await
            .with_context(|| format!("health request to {} failed", endpoint.service_id))?;
        let status = response.status();
        if !status.is_success() {
            debug!(event_name = "health.non_success_status", service = %endpoint.service_id, status = status.as_u16());
            return Ok(false);
        }
        let body: HealthBody = response
            .json()
            .await
            .with_context(|| format!("health body from {} was not valid", endpoint.service_id))?;
        Ok(body.status == "healthy")
    }
}

fn transport_error(error: reqwest::Error) -> DispatchError {
    if error.is_timeout() {
        DispatchError::Timeout
    } else {
        DispatchError::Transport(error.to_string())
    }
}
