use crate::store::RequestStatus;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum MediationError {
    #[error("Rate limit exceeded for {0}")]
    RateLimited(String),
    #[error("{subject} is not permitted to {action}")]
    Unauthorized { subject: String, action: String },
    #[error("Authorization service unavailable: {0}")]
    AuthorizationUnavailable(String),
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("AI backend failed: {0}")]
    Backend(String),
    #[error("Storage failure: {0}")]
    Storage(String),
    #[error("Chat session {0} not found")]
    SessionNotFound(i64),
    #[error("Prompt request {0} not found")]
    RequestNotFound(i64),
    #[error("Prompt request {id} is already {status}")]
    AlreadyDecided { id: i64, status: RequestStatus },
}

impl MediationError {
    pub fn storage(e: anyhow::Error) -> Self {
        Self::Storage(format!("{:#}", e))
    }

    pub fn backend(e: anyhow::Error) -> Self {
        Self::Backend(format!("{:#}", e))
    }
}

/// Log-and-continue handling for writes whose failure must not change the
/// outcome returned to the caller (transcript echo, audit trail).
pub trait SideEffect {
    fn or_log(self, what: &str);
}

impl SideEffect for anyhow::Result<()> {
    fn or_log(self, what: &str) {
        if let Err(e) = self {
            warn!("Failed to {}: {:#}", what, e);
        }
    }
}
