//! Stable error taxonomy for the daemon.
//!
//! Every variant maps to one of the codes in the wire protocol's
//! `{type: error, code, message, requestId?}` frame via [`MiddlemanError::code`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MiddlemanError {
    #[error("failed to spawn agent: {0}")]
    SpawnFailed(String),

    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("invalid agent operation: {0}")]
    InvalidAgent(String),

    #[error("failed to create manager: {0}")]
    CreateManagerFailed(String),

    #[error("failed to delete manager: {0}")]
    DeleteManagerFailed(String),

    #[error("failed to stop all agents: {0}")]
    StopAllAgentsFailed(String),

    #[error("invalid directory: {0}")]
    InvalidDirectory(String),

    #[error("request timed out")]
    RpcTimeout,

    #[error("integration authentication failed: {0}")]
    IntegrationAuthFailed(String),

    #[error("integration transport error: {0}")]
    IntegrationTransportError(String),

    #[error("attachment rejected: {0}")]
    AttachmentRejected(String),

    #[error("agent runtime protocol error: {0}")]
    RuntimeProtocolError(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl MiddlemanError {
    /// Stable string code for the wire protocol (spec §7).
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::SpawnFailed(_) => "SPAWN_FAILED",
            Self::UnknownAgent(_) => "UNKNOWN_AGENT",
            Self::InvalidAgent(_) => "INVALID_AGENT",
            Self::CreateManagerFailed(_) => "CREATE_MANAGER_FAILED",
            Self::DeleteManagerFailed(_) => "DELETE_MANAGER_FAILED",
            Self::StopAllAgentsFailed(_) => "STOP_ALL_AGENTS_FAILED",
            Self::InvalidDirectory(_) => "INVALID_DIRECTORY",
            Self::RpcTimeout => "RPC_TIMEOUT",
            Self::IntegrationAuthFailed(_) => "INTEGRATION_AUTH_FAILED",
            Self::IntegrationTransportError(_) => "INTEGRATION_TRANSPORT_ERROR",
            Self::AttachmentRejected(_) => "ATTACHMENT_REJECTED",
            Self::RuntimeProtocolError(_) => "RUNTIME_PROTOCOL_ERROR",
            Self::Io(_) | Self::Serde(_) => "RUNTIME_PROTOCOL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, MiddlemanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_is_stable_per_variant() {
        assert_eq!(
            MiddlemanError::UnknownAgent("a1".into()).code(),
            "UNKNOWN_AGENT"
        );
        assert_eq!(MiddlemanError::RpcTimeout.code(), "RPC_TIMEOUT");
    }
}
