//! Keboola Connection job trigger
//!
//! Starts a configuration run with `POST {stack}/v2/storage/jobs`, passing the
//! completion summary as configuration parameters. The call is one-shot.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use url::Url;

use super::{ActionTrigger, Credentials, TriggerError, TriggerMetadata, TriggerReceipt, TriggerTarget};

const TOKEN_HEADER: &str = "X-StorageApi-Token";

/// [`ActionTrigger`] backed by the Keboola Storage API.
#[derive(Debug, Clone)]
pub struct KeboolaTrigger {
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResponse {
    id: Option<serde_json::Value>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl KeboolaTrigger {
    pub fn new(timeout: Duration) -> Result<Self, TriggerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("batchwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| {
                TriggerError::permanent(format!("failed to build HTTP client: {err}"))
            })?;
        Ok(Self { client })
    }

    fn jobs_url(stack_url: &str) -> Result<Url, TriggerError> {
        let base = Url::parse(&format!("{}/", stack_url.trim_end_matches('/')))
            .map_err(|err| TriggerError::permanent(format!("invalid stack URL: {err}")))?;
        base.join("v2/storage/jobs")
            .map_err(|err| TriggerError::permanent(format!("invalid jobs URL: {err}")))
    }
}

#[async_trait]
impl ActionTrigger for KeboolaTrigger {
    async fn invoke(
        &self,
        target: &TriggerTarget,
        credentials: &Credentials,
        metadata: &TriggerMetadata,
    ) -> Result<TriggerReceipt, TriggerError> {
        let url = Self::jobs_url(&target.stack_url)?;

        let mut payload = json!({
            "component": target.component_id,
            "config": target.configuration_id,
            "configData": {
                "parameters": metadata,
            },
        });
        if let Some(tag) = &target.tag {
            payload["tag"] = json!(tag);
        }

        let response = self
            .client
            .post(url)
            .header(TOKEN_HEADER, credentials.expose())
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                configuration_id = %target.configuration_id,
                status = status.as_u16(),
                body = %body.chars().take(512).collect::<String>(),
                "Keboola job trigger rejected"
            );
            return Err(TriggerError::from_status(
                status.as_u16(),
                format!(
                    "Keboola returned {status} for configuration {}",
                    target.configuration_id
                ),
            ));
        }

        let job: JobResponse = response.json().await.map_err(|err| {
            TriggerError::permanent(format!("malformed job response: {err}"))
        })?;

        let remote_job_id = match job.id {
            Some(serde_json::Value::String(id)) => id,
            Some(serde_json::Value::Number(id)) => id.to_string(),
            _ => return Err(TriggerError::permanent("no job id in Keboola response")),
        };

        info!(
            remote_job_id = %remote_job_id,
            configuration_id = %target.configuration_id,
            token = %credentials.preview(),
            "Keboola job triggered"
        );

        Ok(TriggerReceipt {
            remote_job_id,
            status: job.status,
            url: job.url,
        })
    }
}
