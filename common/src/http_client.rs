//! Inter-service HTTP client (§5 "Cancellation & timeouts", §6 environment config
//! "downstream-gateway URLs + admin key"). Grounded on the teacher's
//! `ai_miner::daemon_client::DaemonClient` shape: a `reqwest::Client` plus a small
//! retry/timeout config, reused here for payment<->upload calls and downstream
//! gateway fan-out instead of daemon JSON-RPC.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::DEFAULT_HTTP_DEADLINE_SECONDS;
use crate::error::{GatewayError, GatewayResult};
use crate::secret::{SharedSecret, SHARED_SECRET_HEADER};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub connection_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_HTTP_DEADLINE_SECONDS),
            max_retries: 2,
            retry_delay: Duration::from_millis(500),
            connection_timeout: Duration::from_secs(10),
        }
    }
}

/// A thin wrapper carrying the shared inter-service secret on every request, and
/// retrying idempotent GETs under a fixed budget before surfacing
/// `UpstreamUnavailable` (§7).
pub struct InterServiceClient {
    client: Client,
    base_url: String,
    shared_secret: SharedSecret,
    config: ClientConfig,
}

impl InterServiceClient {
    pub fn new(base_url: impl Into<String>, shared_secret: SharedSecret, config: ClientConfig) -> GatewayResult<Self> {
        let client = Client::builder()
            .connect_timeout(config.connection_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GatewayError::internal(anyhow::anyhow!(e)))?;
        Ok(Self { client, base_url: base_url.into(), shared_secret, config })
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> GatewayResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0u32;
        loop {
            let result = self
                .client
                .get(&url)
                .header(SHARED_SECRET_HEADER, self.shared_secret.to_hex())
                .send()
                .await;
            match result {
                Ok(response) => return Self::parse_response(response).await,
                Err(err) if attempt < self.config.max_retries => {
                    attempt += 1;
                    tokio::time::sleep(self.config.retry_delay * attempt).await;
                    log::warn!("inter-service GET {url} failed (attempt {attempt}): {err}");
                }
                Err(err) => {
                    return Err(GatewayError::UpstreamUnavailable(format!("{url}: {err}")))
                }
            }
        }
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> GatewayResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .header(SHARED_SECRET_HEADER, self.shared_secret.to_hex())
            .json(body)
            .send()
            .await
            .map_err(|err| GatewayError::UpstreamUnavailable(format!("{url}: {err}")))?;
        Self::parse_response(response).await
    }

    async fn parse_response<T: DeserializeOwned>(response: Response) -> GatewayResult<T> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(GatewayError::Unauthorized("inter-service secret rejected".into()));
        }
        if status == StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(response.url().path().to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::UpstreamUnavailable(format!("status {status}: {body}")));
        }
        response
            .json::<T>()
            .await
            .map_err(|err| GatewayError::internal(anyhow::anyhow!(err)))
    }
}
