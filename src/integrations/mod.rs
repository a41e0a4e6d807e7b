//! External collaborators
//!
//! Defines the two seams the polling engine consumes: a [`StatusProbe`] that
//! reports the lifecycle state of one remote batch, and an [`ActionTrigger`]
//! that fires the downstream action once. Both classify failures as
//! transient or permanent so that all retry policy lives in the engine.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod keboola;
pub mod openai;

pub use keboola::KeboolaTrigger;
pub use openai::OpenAiBatchProbe;

/// Opaque API credential handed to a collaborator on each call.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials(String);

impl Credentials {
    pub fn new<S: Into<String>>(secret: S) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// First characters of the secret, for log lines.
    pub fn preview(&self) -> String {
        if self.0.chars().count() > 8 {
            format!("{}...", self.0.chars().take(8).collect::<String>())
        } else {
            "***".to_string()
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credentials").field(&"[REDACTED]").finish()
    }
}

/// How a failed external call should be treated by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network error, timeout, 5xx or 429; worth retrying
    Transient,
    /// Any other 4xx or an unusable response; never retried
    Permanent,
}

impl FailureKind {
    pub fn from_http_status(status: u16) -> Self {
        if status == 429 || status >= 500 {
            FailureKind::Transient
        } else {
            FailureKind::Permanent
        }
    }

    pub(crate) fn from_reqwest(err: &reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_http_status(status.as_u16());
        }
        if err.is_decode() || err.is_builder() {
            FailureKind::Permanent
        } else {
            // timeouts, connect and body errors
            FailureKind::Transient
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Transient => f.write_str("transient"),
            FailureKind::Permanent => f.write_str("permanent"),
        }
    }
}

/// Classified failure returned by a [`StatusProbe`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} probe failure: {message}")]
pub struct ProbeError {
    pub kind: FailureKind,
    pub message: String,
    /// HTTP status returned by the provider, when there was one
    pub status: Option<u16>,
}

impl ProbeError {
    pub fn transient<S: Into<String>>(message: S) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
            status: None,
        }
    }

    pub fn permanent<S: Into<String>>(message: S) -> Self {
        Self {
            kind: FailureKind::Permanent,
            message: message.into(),
            status: None,
        }
    }

    pub fn from_status<S: Into<String>>(status: u16, message: S) -> Self {
        Self {
            kind: FailureKind::from_http_status(status),
            message: message.into(),
            status: Some(status),
        }
    }
}

impl From<reqwest::Error> for ProbeError {
    fn from(err: reqwest::Error) -> Self {
        Self {
            kind: FailureKind::from_reqwest(&err),
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

/// Classified failure returned by an [`ActionTrigger`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} trigger failure: {message}")]
pub struct TriggerError {
    pub kind: FailureKind,
    pub message: String,
    pub status: Option<u16>,
}

impl TriggerError {
    pub fn transient<S: Into<String>>(message: S) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
            status: None,
        }
    }

    pub fn permanent<S: Into<String>>(message: S) -> Self {
        Self {
            kind: FailureKind::Permanent,
            message: message.into(),
            status: None,
        }
    }

    pub fn from_status<S: Into<String>>(status: u16, message: S) -> Self {
        Self {
            kind: FailureKind::from_http_status(status),
            message: message.into(),
            status: Some(status),
        }
    }
}

impl From<reqwest::Error> for TriggerError {
    fn from(err: reqwest::Error) -> Self {
        Self {
            kind: FailureKind::from_reqwest(&err),
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

/// Provider view of one remote batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteBatchState {
    /// Raw provider lifecycle state, e.g. `finalizing`
    pub status: String,
    /// First provider-reported error, if any
    pub error_message: Option<String>,
}

impl RemoteBatchState {
    pub fn new<S: Into<String>>(status: S) -> Self {
        Self {
            status: status.into(),
            error_message: None,
        }
    }
}

/// Reports the current state of a remote batch.
///
/// Implementations must classify every failure and must not retry on their
/// own.
#[async_trait]
pub trait StatusProbe: Send + Sync {
    async fn check(
        &self,
        remote_batch_id: &str,
        credentials: &Credentials,
    ) -> Result<RemoteBatchState, ProbeError>;
}

/// Downstream target reference stored on a watch job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerTarget {
    pub stack_url: String,
    pub component_id: String,
    pub configuration_id: String,
    /// Run tag attached to the downstream job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// Completion summary passed to the downstream action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerMetadata {
    pub batch_count_total: usize,
    pub batch_count_completed: usize,
    pub batch_count_failed: usize,
    pub batch_ids_completed: Vec<String>,
    pub batch_ids_failed: Vec<String>,
}

/// Acknowledgement returned by the downstream service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerReceipt {
    pub remote_job_id: String,
    pub status: Option<String>,
    pub url: Option<String>,
}

/// Fires the downstream action. Called at most once per watch job.
#[async_trait]
pub trait ActionTrigger: Send + Sync {
    async fn invoke(
        &self,
        target: &TriggerTarget,
        credentials: &Credentials,
        metadata: &TriggerMetadata,
    ) -> Result<TriggerReceipt, TriggerError>;
}
