//! OpenAI Batch API status probe
//!
//! Retrieves a batch with `GET {base}/batches/{id}` and reports its raw
//! lifecycle state. Retries are left to the polling engine.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::{Credentials, ProbeError, RemoteBatchState, StatusProbe};

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

const BODY_SNIPPET_LEN: usize = 512;

/// [`StatusProbe`] backed by the OpenAI Batch API.
#[derive(Debug, Clone)]
pub struct OpenAiBatchProbe {
    client: reqwest::Client,
    base_url: Url,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    status: String,
    #[serde(default)]
    errors: Option<BatchErrors>,
}

#[derive(Debug, Deserialize)]
struct BatchErrors {
    #[serde(default)]
    data: Vec<BatchErrorItem>,
}

#[derive(Debug, Deserialize)]
struct BatchErrorItem {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl OpenAiBatchProbe {
    /// Build a probe against `base_url` (e.g. `https://api.openai.com/v1`).
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ProbeError> {
        // A trailing slash keeps the version segment when joining paths
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalized)
            .map_err(|err| ProbeError::permanent(format!("invalid OpenAI base URL: {err}")))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("batchwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| ProbeError::permanent(format!("failed to build HTTP client: {err}")))?;

        Ok(Self { client, base_url })
    }

    fn batch_url(&self, remote_batch_id: &str) -> Result<Url, ProbeError> {
        if remote_batch_id.is_empty() || remote_batch_id.contains('/') {
            return Err(ProbeError::permanent(format!(
                "invalid batch id '{remote_batch_id}'"
            )));
        }
        self.base_url
            .join(&format!("batches/{remote_batch_id}"))
            .map_err(|err| ProbeError::permanent(format!("invalid batch URL: {err}")))
    }
}

#[async_trait]
impl StatusProbe for OpenAiBatchProbe {
    async fn check(
        &self,
        remote_batch_id: &str,
        credentials: &Credentials,
    ) -> Result<RemoteBatchState, ProbeError> {
        let url = self.batch_url(remote_batch_id)?;

        let response = self
            .client
            .get(url)
            .bearer_auth(credentials.expose())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(BODY_SNIPPET_LEN).collect();
            warn!(
                remote_batch_id,
                status = status.as_u16(),
                body = %snippet,
                "OpenAI batch lookup failed"
            );
            return Err(ProbeError::from_status(
                status.as_u16(),
                format!("OpenAI returned {status} for batch {remote_batch_id}"),
            ));
        }

        let batch: BatchResponse = response.json().await.map_err(|err| {
            ProbeError::permanent(format!("malformed batch response: {err}"))
        })?;

        let error_message = batch.errors.and_then(|errors| {
            errors.data.into_iter().next().map(|item| {
                match (item.code, item.message) {
                    (Some(code), Some(message)) => format!("{code}: {message}"),
                    (None, Some(message)) => message,
                    (Some(code), None) => code,
                    (None, None) => "unspecified error".to_string(),
                }
            })
        });

        debug!(remote_batch_id, status = %batch.status, "OpenAI batch status retrieved");

        Ok(RemoteBatchState {
            status: batch.status.to_ascii_lowercase(),
            error_message,
        })
    }
}
