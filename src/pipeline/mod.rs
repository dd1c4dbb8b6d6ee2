use crate::ai::AiBackend;
use crate::authz::{Action, AuthorizationGate};
use crate::error::{MediationError, SideEffect};
use crate::policy::{self, PolicyWrapper};
use crate::rate_limit::RateLimiter;
use crate::store::{ChatMessage, ChildProfile, PromptRequest, RequestStatus, Sender, Store};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};


pub const EVENT_SUBMITTED: &str = "prompt_submitted";
pub const EVENT_APPROVED: &str = "prompt_approved";
pub const EVENT_REJECTED: &str = "prompt_rejected";
pub const EVENT_PROCESSED: &str = "prompt_processed";

#[derive(Debug, Clone, Serialize)]
pub struct SubmitReceipt {
    pub request_id: i64,
    pub status: RequestStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalOutcome {
    /// This call generated the answer.
    Answered,
    /// Approved earlier; the stored answer is returned.
    AlreadyAnswered,
    /// Approved earlier but no answer is stored, either because generation
    /// failed or because it is still running.
    Unanswered,
}

#[derive(Debug, Clone, Serialize)]
pub struct Approval {
    pub request_id: i64,
    pub approved: bool,
    pub outcome: ApprovalOutcome,
    pub answer: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Processed {
    pub answer: String,
    pub processed_at: DateTime<Utc>,
}

/// Shared long-lived handles, built once at startup.
pub struct MediationPipeline {
    limiter: Arc<RateLimiter>,
    gate: Arc<AuthorizationGate>,
    policy: PolicyWrapper,
    ai: Arc<dyn AiBackend>,
    store: Arc<Store>,
    max_prompt_chars: usize,
}

impl MediationPipeline {
    pub fn new(
        limiter: Arc<RateLimiter>,
        gate: Arc<AuthorizationGate>,
        ai: Arc<dyn AiBackend>,
        store: Arc<Store>,
        max_prompt_chars: usize,
    ) -> Self {
        Self {
            limiter,
            gate,
            policy: PolicyWrapper::new(store.clone()),
            ai,
            store,
            max_prompt_chars,
        }
    }

    pub fn validate(&self, text: &str) -> Result<(), MediationError> {
        if text.trim().is_empty() {
            return Err(MediationError::Validation("Prompt is empty".to_string()));
        }
        let chars = text.chars().count();
        if chars > self.max_prompt_chars {
            return Err(MediationError::Validation(format!(
                "Prompt too long ({} chars, max {})",
                chars, self.max_prompt_chars
            )));
        }
        Ok(())
    }

    fn admit(&self, child: &str) -> Result<(), MediationError> {
        if self.limiter.admit_now(child) {
            Ok(())
        } else {
            Err(MediationError::RateLimited(child.to_string()))
        }
    }

    async fn generate(&self, wrapped: &str) -> Result<String, MediationError> {
        self.ai.generate(wrapped).await.map_err(|e| {
            error!("AI generation failed: {:#}", e);
            MediationError::backend(e)
        })
    }

    async fn record_violations(&self, child: &str, profile: &ChildProfile, prompt: &str) {
        for topic in policy::restricted_mentions(profile, prompt) {
            info!("{} mentioned restricted topic '{}'", child, topic);
            self.store
                .log_violation(child, prompt, topic)
                .await
                .or_log("record violation attempt");
        }
    }

    async fn audit(&self, event: &str, actor: &str) {
        self.store
            .log_event(event, actor)
            .await
            .or_log(&format!("log {} event for {}", event, actor));
    }

    async fn owned_session(&self, child: &str, session_id: i64) -> Result<(), MediationError> {
        let owner = self
            .store
            .session_owner(session_id)
            .await
            .map_err(MediationError::storage)?
            .ok_or(MediationError::SessionNotFound(session_id))?;
        if owner != child {
            return Err(MediationError::Unauthorized {
                subject: child.to_string(),
                action: format!("use chat session {}", session_id),
            });
        }
        Ok(())
    }

    pub async fn start_session(&self, child: &str) -> Result<i64, MediationError> {
        let session_id = self.store.start_session(child).await.map_err(|e| {
            error!("Failed to start session for {}: {:#}", child, e);
            MediationError::storage(e)
        })?;
        info!("Started chat session {} for {}", session_id, child);
        Ok(session_id)
    }

    /// Synchronous mediated chat turn: admit, echo, wrap, generate, echo.
    pub async fn chat_turn(
        &self,
        child: &str,
        session_id: i64,
        content: &str,
    ) -> Result<String, MediationError> {
        self.validate(content)?;
        self.admit(child)?;
        self.owned_session(child, session_id).await?;

        self.store
            .append_message(session_id, Sender::Child, content)
            .await
            .or_log("save child message");

        let profile = self.policy.profile(child).await;
        let wrapped = policy::render(&profile, content);
        self.record_violations(child, &profile, content).await;

        let answer = self.generate(&wrapped).await?;

        self.store
            .append_message(session_id, Sender::Assistant, &answer)
            .await
            .or_log("save assistant message");

        Ok(answer)
    }

    /// Transcript of a session the child owns; empty if the session is unknown.
    pub async fn history(
        &self,
        child: &str,
        session_id: i64,
    ) -> Result<Vec<ChatMessage>, MediationError> {
        match self.owned_session(child, session_id).await {
            Ok(()) => {}
            Err(MediationError::SessionNotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        }
        self.store
            .history(session_id)
            .await
            .map_err(MediationError::storage)
    }

    pub async fn submit(&self, child: &str, prompt: &str) -> Result<SubmitReceipt, MediationError> {
        self.validate(prompt)?;
        self.admit(child)?;
        self.gate.check(child, Action::Create).await?;

        let request_id = self
            .store
            .create_prompt_request(child, prompt)
            .await
            .map_err(|e| {
                error!("Failed to save prompt request for {}: {:#}", child, e);
                MediationError::storage(e)
            })?;
        info!("Prompt request {} submitted by {}", request_id, child);

        self.audit(EVENT_SUBMITTED, child).await;
        let profile = self.policy.profile(child).await;
        self.record_violations(child, &profile, prompt).await;

        Ok(SubmitReceipt {
            request_id,
            status: RequestStatus::Pending,
        })
    }

    /// Pending -> approved, then generate the answer. Re-approving never
    /// generates again; it reports what is stored.
    pub async fn approve(&self, admin: &str, request_id: i64) -> Result<Approval, MediationError> {
        self.gate.check(admin, Action::Approve).await?;

        let transitioned = self
            .store
            .approve_prompt_request(request_id)
            .await
            .map_err(|e| {
                error!("Failed to approve prompt request {}: {:#}", request_id, e);
                MediationError::storage(e)
            })?;

        let request = self.fetch(request_id).await?;
        if !transitioned {
            if request.status != RequestStatus::Approved {
                return Err(MediationError::AlreadyDecided {
                    id: request_id,
                    status: request.status,
                });
            }
            let outcome = if request.answer.is_some() {
                info!("Prompt request {} already approved, skipping", request_id);
                ApprovalOutcome::AlreadyAnswered
            } else {
                warn!("Prompt request {} is approved but has no answer", request_id);
                ApprovalOutcome::Unanswered
            };
            return Ok(Approval {
                request_id,
                approved: true,
                outcome,
                answer: request.answer,
                timestamp: Utc::now(),
            });
        }
        info!("Prompt request {} approved by {}", request_id, admin);
        // the decision is audited even if generation fails below
        self.audit(EVENT_APPROVED, admin).await;

        let wrapped = self.policy.wrap(&request.child, &request.prompt).await;
        let answer = self.generate(&wrapped).await?;

        self.store
            .record_answer(request_id, &answer)
            .await
            .or_log("record answer");

        Ok(Approval {
            request_id,
            approved: true,
            outcome: ApprovalOutcome::Answered,
            answer: Some(answer),
            timestamp: Utc::now(),
        })
    }

    pub async fn reject(&self, admin: &str, request_id: i64) -> Result<PromptRequest, MediationError> {
        self.gate.check(admin, Action::Approve).await?;

        let transitioned = self
            .store
            .reject_prompt_request(request_id)
            .await
            .map_err(|e| {
                error!("Failed to reject prompt request {}: {:#}", request_id, e);
                MediationError::storage(e)
            })?;

        let request = self.fetch(request_id).await?;
        if !transitioned {
            return match request.status {
                RequestStatus::Rejected => Ok(request),
                status => Err(MediationError::AlreadyDecided {
                    id: request_id,
                    status,
                }),
            };
        }
        info!("Prompt request {} rejected by {}", request_id, admin);
        self.audit(EVENT_REJECTED, admin).await;

        Ok(request)
    }

    /// Status (and answer, once approved) of a request the child submitted.
    pub async fn request_status(
        &self,
        child: &str,
        request_id: i64,
    ) -> Result<PromptRequest, MediationError> {
        let request = self.fetch(request_id).await?;
        if request.child != child {
            // do not reveal other children's requests
            return Err(MediationError::RequestNotFound(request_id));
        }
        Ok(request)
    }

    /// Trusted synchronous path: no request record, no approval.
    pub async fn process(&self, caller: &str, prompt: &str) -> Result<Processed, MediationError> {
        self.validate(prompt)?;
        self.gate.check(caller, Action::Process).await?;

        let wrapped = self.policy.wrap(caller, prompt).await;
        let answer = self.generate(&wrapped).await?;
        self.audit(EVENT_PROCESSED, caller).await;

        Ok(Processed {
            answer,
            processed_at: Utc::now(),
        })
    }

    async fn fetch(&self, request_id: i64) -> Result<PromptRequest, MediationError> {
        self.store
            .fetch_prompt_request(request_id)
            .await
            .map_err(MediationError::storage)?
            .ok_or(MediationError::RequestNotFound(request_id))
    }
}
