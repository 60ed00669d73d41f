//! Boundary to the remote job server.

use std::collections::HashMap;

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    thiserror::Error,
};

/// Reference to a build the remote server accepted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BuildHandle {
    /// Queue item URL reported by the server, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_id: Option<u64>,
}

#[derive(Debug, Error)]
pub enum TriggerError {
    /// Server unreachable, timed out, or failing on its side.
    #[error("job server unavailable: {message}")]
    Unavailable { message: String },

    /// Server answered but refused to start the build.
    #[error("job server rejected build ({status}): {body}")]
    Rejected { status: u16, body: String },
}

impl TriggerError {
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn rejected(status: u16, body: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            body: body.into(),
        }
    }
}

/// Starts builds on the remote job server.
///
/// This allows mocking in tests without a real server.
#[async_trait]
pub trait TriggerClient: Send + Sync {
    async fn trigger(
        &self,
        job_id: &str,
        parameters: &HashMap<String, String>,
    ) -> Result<BuildHandle, TriggerError>;
}
