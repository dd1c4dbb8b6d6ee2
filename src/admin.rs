use crate::authz::{Action, AuthorizationGate};
use crate::error::{MediationError, SideEffect};
use crate::store::{ChildProfile, PromptRequest, Store};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info};

pub const EVENT_PROFILE_UPDATED: &str = "profile_updated";

/// Guardian-side management: child profiles, the request queue and the
/// audit reports.
pub struct GuardianConsole {
    gate: Arc<AuthorizationGate>,
    store: Arc<Store>,
}

impl GuardianConsole {
    pub fn new(gate: Arc<AuthorizationGate>, store: Arc<Store>) -> Self {
        Self { gate, store }
    }

    pub async fn upsert_profile(
        &self,
        admin: &str,
        profile: &ChildProfile,
    ) -> Result<(), MediationError> {
        if profile.username.trim().is_empty() {
            return Err(MediationError::Validation("Username is required".to_string()));
        }
        self.gate.check(admin, Action::Configure).await?;

        self.store
            .upsert_child_profile(profile)
            .await
            .map_err(|e| {
                error!("Failed to save profile for {}: {:#}", profile.username, e);
                MediationError::storage(e)
            })?;
        info!("Profile for {} updated by {}", profile.username, admin);

        self.store
            .log_event(EVENT_PROFILE_UPDATED, admin)
            .await
            .or_log("log profile update");
        Ok(())
    }

    pub async fn profiles(&self, admin: &str) -> Result<Vec<ChildProfile>, MediationError> {
        self.gate.check(admin, Action::Configure).await?;
        self.store
            .list_child_profiles()
            .await
            .map_err(MediationError::storage)
    }

    pub async fn requests(&self, admin: &str) -> Result<Vec<PromptRequest>, MediationError> {
        self.gate.check(admin, Action::Approve).await?;
        self.store
            .list_prompt_requests()
            .await
            .map_err(MediationError::storage)
    }

    pub async fn audit_summary(
        &self,
        admin: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<(String, u64)>, MediationError> {
        self.gate.check(admin, Action::Configure).await?;
        self.store
            .event_counts_since(since)
            .await
            .map_err(MediationError::storage)
    }

    pub async fn violation_summary(
        &self,
        admin: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<(String, u64)>, MediationError> {
        self.gate.check(admin, Action::Configure).await?;
        self.store
            .violation_counts_since(since)
            .await
            .map_err(MediationError::storage)
    }
}
