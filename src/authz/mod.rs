use crate::config::Config;
use crate::error::MediationError;
use anyhow::Result;
use async_trait::async_trait;
pub use permit::PermitDecisionPoint;
pub use static_grants::StaticDecisionPoint;
use std::fmt;
use std::sync::Arc;
use tracing::{error, warn};

mod permit;
mod static_grants;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Child submits a prompt request.
    Create,
    /// Guardian approves or rejects a pending request.
    Approve,
    /// Trusted caller runs a prompt directly, skipping the approval queue.
    Process,
    /// Guardian manages child profiles and reads audit reports.
    Configure,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Approve => "approve",
            Action::Process => "process",
            Action::Configure => "configure",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External allow/deny oracle keyed by (subject, action, resource kind).
#[async_trait]
pub trait DecisionPoint: Send + Sync {
    async fn decide(&self, subject: &str, action: Action, resource: &str) -> Result<bool>;
}

pub fn create_decision_point(config: &Config) -> Result<Arc<dyn DecisionPoint>> {
    match config.authz_provider.as_str() {
        "static" => Ok(Arc::new(StaticDecisionPoint::new(&config.authz_grants))),
        _ => {
            let pdp_url = config
                .pdp_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("authz.pdp_url is required for permit"))?;
            let api_key = config
                .pdp_api_key
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("authz.api_key is required for permit"))?;
            Ok(Arc::new(PermitDecisionPoint::new(pdp_url, api_key)))
        }
    }
}

pub struct AuthorizationGate {
    decision_point: Arc<dyn DecisionPoint>,
    resource: String,
}

impl AuthorizationGate {
    pub fn new(decision_point: Arc<dyn DecisionPoint>, resource: &str) -> Self {
        Self {
            decision_point,
            resource: resource.to_string(),
        }
    }

    /// Fails closed: a decision-point error denies the caller, reported as
    /// `AuthorizationUnavailable` rather than `Unauthorized`.
    pub async fn check(&self, subject: &str, action: Action) -> Result<(), MediationError> {
        match self
            .decision_point
            .decide(subject, action, &self.resource)
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(subject, action = %action, "permission denied");
                Err(MediationError::Unauthorized {
                    subject: subject.to_string(),
                    action: action.to_string(),
                })
            }
            Err(e) => {
                error!("Authorization check for {} ({}) failed: {:#}", subject, action, e);
                Err(MediationError::AuthorizationUnavailable(format!("{:#}", e)))
            }
        }
    }
}
