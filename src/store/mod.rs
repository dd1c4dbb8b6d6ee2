mod types;

use crate::entity::{
    audit_events, chat_messages, chat_sessions, content_policies, kids, prompt_requests,
    violation_attempts,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, Database, DatabaseConnection, EntityTrait, NotSet, QueryFilter, QueryOrder, Set,
};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
pub use types::{ChatMessage, ChildProfile, PromptRequest, RequestStatus, Sender, parse_topics};

const DB_FILE: &str = "sentinel.db";

/// Durable record of child profiles, chat transcripts, prompt requests and
/// the audit trail, backed by SQLite.
pub struct Store {
    db_url: String,
}

impl Store {
    pub async fn open(data_dir: &Path) -> Result<Arc<Self>> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data dir: {}", data_dir.display()))?;
        let db_path = data_dir.join(DB_FILE);
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        tokio::task::spawn_blocking({
            let db_url = db_url.clone();
            move || -> Result<()> {
                let db = Database::connect(&db_url)?;

                db.get_schema_builder()
                    .register(kids::Entity)
                    .register(content_policies::Entity)
                    .register(chat_sessions::Entity)
                    .register(chat_messages::Entity)
                    .register(prompt_requests::Entity)
                    .register(audit_events::Entity)
                    .register(violation_attempts::Entity)
                    .apply(&db)?;

                Ok(())
            }
        })
        .await??;

        info!("Store ready ({})", db_path.display());
        Ok(Arc::new(Self { db_url }))
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&DatabaseConnection) -> Result<T> + Send + 'static,
    {
        let db_url = self.db_url.clone();
        tokio::task::spawn_blocking(move || {
            let db = Database::connect(&db_url)?;
            f(&db)
        })
        .await
        .context("Database task panicked")?
    }

    pub async fn upsert_child_profile(&self, profile: &ChildProfile) -> Result<()> {
        let kid = kids::ActiveModel {
            username: Set(profile.username.clone()),
            age: Set(i32::try_from(profile.age).context("Age out of range")?),
        };
        let policy = content_policies::ActiveModel {
            kid_username: Set(profile.username.clone()),
            allowed: Set(types::join_topics(&profile.allowed_topics)),
            restricted: Set(types::join_topics(&profile.restricted_topics)),
        };

        self.run(move |db| {
            kids::Entity::insert(kid)
                .on_conflict(
                    OnConflict::column(kids::Column::Username)
                        .update_column(kids::Column::Age)
                        .to_owned(),
                )
                .exec(db)?;
            content_policies::Entity::insert(policy)
                .on_conflict(
                    OnConflict::column(content_policies::Column::KidUsername)
                        .update_columns([
                            content_policies::Column::Allowed,
                            content_policies::Column::Restricted,
                        ])
                        .to_owned(),
                )
                .exec(db)?;
            Ok(())
        })
        .await
    }

    /// Age and topic lists are looked up independently; a child with only one
    /// of the two records gets defaults for the other.
    pub async fn child_profile(&self, username: &str) -> Result<Option<ChildProfile>> {
        let username = username.to_string();
        self.run(move |db| {
            let kid = kids::Entity::find_by_id(username.clone()).one(db)?;
            let policy = content_policies::Entity::find_by_id(username.clone()).one(db)?;
            if kid.is_none() && policy.is_none() {
                return Ok(None);
            }
            Ok(Some(ChildProfile {
                age: kid.map(|k| k.age.max(0) as u32).unwrap_or(0),
                allowed_topics: policy
                    .as_ref()
                    .map(|p| parse_topics(&p.allowed))
                    .unwrap_or_default(),
                restricted_topics: policy
                    .as_ref()
                    .map(|p| parse_topics(&p.restricted))
                    .unwrap_or_default(),
                username,
            }))
        })
        .await
    }

    pub async fn list_child_profiles(&self) -> Result<Vec<ChildProfile>> {
        self.run(|db| {
            let kids = kids::Entity::find()
                .order_by_asc(kids::Column::Username)
                .all(db)?;
            let mut policies: HashMap<String, content_policies::Model> =
                content_policies::Entity::find()
                    .all(db)?
                    .into_iter()
                    .map(|p| (p.kid_username.clone(), p))
                    .collect();

            Ok(kids
                .into_iter()
                .map(|k| {
                    let policy = policies.remove(&k.username);
                    ChildProfile {
                        age: k.age.max(0) as u32,
                        allowed_topics: policy
                            .as_ref()
                            .map(|p| parse_topics(&p.allowed))
                            .unwrap_or_default(),
                        restricted_topics: policy
                            .as_ref()
                            .map(|p| parse_topics(&p.restricted))
                            .unwrap_or_default(),
                        username: k.username,
                    }
                })
                .collect())
        })
        .await
    }

    pub async fn start_session(&self, child: &str) -> Result<i64> {
        let record = chat_sessions::ActiveModel {
            id: NotSet,
            kid_username: Set(child.to_string()),
            created_at_us: Set(Utc::now().timestamp_micros()),
        };
        self.run(move |db| {
            let result = chat_sessions::Entity::insert(record).exec(db)?;
            Ok(result.last_insert_id)
        })
        .await
    }

    pub async fn session_owner(&self, session_id: i64) -> Result<Option<String>> {
        self.run(move |db| {
            Ok(chat_sessions::Entity::find_by_id(session_id)
                .one(db)?
                .map(|s| s.kid_username))
        })
        .await
    }

    pub async fn append_message(&self, session_id: i64, sender: Sender, content: &str) -> Result<()> {
        let record = chat_messages::ActiveModel {
            id: NotSet,
            session_id: Set(session_id),
            sender: Set(sender.as_str().to_string()),
            content: Set(content.to_string()),
            timestamp_us: Set(Utc::now().timestamp_micros()),
        };
        self.run(move |db| {
            chat_messages::Entity::insert(record).exec(db)?;
            Ok(())
        })
        .await
    }

    /// Transcript in insertion order; empty for an unknown session.
    pub async fn history(&self, session_id: i64) -> Result<Vec<ChatMessage>> {
        self.run(move |db| {
            let rows = chat_messages::Entity::find()
                .filter(chat_messages::Column::SessionId.eq(session_id))
                .order_by_asc(chat_messages::Column::Id)
                .all(db)?;
            Ok(rows.into_iter().map(ChatMessage::from).collect())
        })
        .await
    }

    pub async fn create_prompt_request(&self, child: &str, prompt: &str) -> Result<i64> {
        let record = prompt_requests::ActiveModel {
            id: NotSet,
            kid_username: Set(child.to_string()),
            prompt: Set(prompt.to_string()),
            status: Set(RequestStatus::Pending.as_str().to_string()),
            answer: Set(None),
            created_at_us: Set(Utc::now().timestamp_micros()),
            decided_at_us: Set(None),
        };
        self.run(move |db| {
            let result = prompt_requests::Entity::insert(record).exec(db)?;
            Ok(result.last_insert_id)
        })
        .await
    }

    /// Moves a request out of `pending`. Returns false when the request does
    /// not exist or has already been decided, in which case nothing changes.
    pub async fn transition_prompt_request(&self, id: i64, to: RequestStatus) -> Result<bool> {
        if to == RequestStatus::Pending {
            anyhow::bail!("Prompt requests cannot return to pending");
        }
        let update = prompt_requests::ActiveModel {
            status: Set(to.as_str().to_string()),
            decided_at_us: Set(Some(Utc::now().timestamp_micros())),
            ..Default::default()
        };
        self.run(move |db| {
            let result = prompt_requests::Entity::update_many()
                .set(update)
                .filter(prompt_requests::Column::Id.eq(id))
                .filter(prompt_requests::Column::Status.eq(RequestStatus::Pending.as_str()))
                .exec(db)?;
            Ok(result.rows_affected == 1)
        })
        .await
    }

    pub async fn approve_prompt_request(&self, id: i64) -> Result<bool> {
        self.transition_prompt_request(id, RequestStatus::Approved)
            .await
    }

    pub async fn reject_prompt_request(&self, id: i64) -> Result<bool> {
        self.transition_prompt_request(id, RequestStatus::Rejected)
            .await
    }

    pub async fn record_answer(&self, id: i64, answer: &str) -> Result<()> {
        let update = prompt_requests::ActiveModel {
            answer: Set(Some(answer.to_string())),
            ..Default::default()
        };
        self.run(move |db| {
            prompt_requests::Entity::update_many()
                .set(update)
                .filter(prompt_requests::Column::Id.eq(id))
                .exec(db)?;
            Ok(())
        })
        .await
    }

    pub async fn fetch_prompt_request(&self, id: i64) -> Result<Option<PromptRequest>> {
        self.run(move |db| {
            Ok(prompt_requests::Entity::find_by_id(id)
                .one(db)?
                .map(PromptRequest::from))
        })
        .await
    }

    pub async fn list_prompt_requests(&self) -> Result<Vec<PromptRequest>> {
        self.run(|db| {
            let rows = prompt_requests::Entity::find()
                .order_by_desc(prompt_requests::Column::CreatedAtUs)
                .order_by_desc(prompt_requests::Column::Id)
                .all(db)?;
            Ok(rows.into_iter().map(PromptRequest::from).collect())
        })
        .await
    }

    pub async fn log_event(&self, event_type: &str, username: &str) -> Result<()> {
        let record = audit_events::ActiveModel {
            id: NotSet,
            event_type: Set(event_type.to_string()),
            username: Set(username.to_string()),
            timestamp_us: Set(Utc::now().timestamp_micros()),
        };
        self.run(move |db| {
            audit_events::Entity::insert(record).exec(db)?;
            Ok(())
        })
        .await
    }

    /// Audit events per type since `since`, sorted by type.
    pub async fn event_counts_since(&self, since: DateTime<Utc>) -> Result<Vec<(String, u64)>> {
        let since_us = since.timestamp_micros();
        self.run(move |db| {
            let rows = audit_events::Entity::find()
                .filter(audit_events::Column::TimestampUs.gt(since_us))
                .all(db)?;
            Ok(tally(rows.into_iter().map(|r| r.event_type)))
        })
        .await
    }

    pub async fn log_violation(&self, child: &str, prompt: &str, violation: &str) -> Result<()> {
        let record = violation_attempts::ActiveModel {
            id: NotSet,
            kid_username: Set(child.to_string()),
            prompt: Set(prompt.to_string()),
            violation: Set(violation.to_string()),
            timestamp_us: Set(Utc::now().timestamp_micros()),
        };
        self.run(move |db| {
            violation_attempts::Entity::insert(record).exec(db)?;
            Ok(())
        })
        .await
    }

    /// Violation attempts per child since `since`, sorted by child.
    pub async fn violation_counts_since(&self, since: DateTime<Utc>) -> Result<Vec<(String, u64)>> {
        let since_us = since.timestamp_micros();
        self.run(move |db| {
            let rows = violation_attempts::Entity::find()
                .filter(violation_attempts::Column::TimestampUs.gt(since_us))
                .all(db)?;
            Ok(tally(rows.into_iter().map(|r| r.kid_username)))
        })
        .await
    }
}

fn tally(keys: impl Iterator<Item = String>) -> Vec<(String, u64)> {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    for key in keys {
        *counts.entry(key).or_default() += 1;
    }
    counts.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    async fn store() -> (TempDir, Arc<Store>) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).await.unwrap();
        (dir, store)
    }

    fn amy() -> ChildProfile {
        ChildProfile {
            username: "amy".into(),
            age: 10,
            allowed_topics: vec!["space".into(), "animals".into()],
            restricted_topics: vec!["violence".into()],
        }
    }

    #[tokio::test]
    async fn profile_upsert_overwrites() {
        let (_dir, store) = store().await;
        store.upsert_child_profile(&amy()).await.unwrap();
        assert_eq!(store.child_profile("amy").await.unwrap(), Some(amy()));

        let updated = ChildProfile {
            age: 11,
            allowed_topics: vec!["math".into()],
            ..amy()
        };
        store.upsert_child_profile(&updated).await.unwrap();
        assert_eq!(store.child_profile("amy").await.unwrap(), Some(updated));
        assert_eq!(store.list_child_profiles().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_profile_is_none() {
        let (_dir, store) = store().await;
        assert_eq!(store.child_profile("nobody").await.unwrap(), None);
    }

    #[tokio::test]
    async fn history_preserves_insertion_order() {
        let (_dir, store) = store().await;
        let sid = store.start_session("amy").await.unwrap();
        for i in 0..3 {
            store
                .append_message(sid, Sender::Child, &format!("q{}", i))
                .await
                .unwrap();
            store
                .append_message(sid, Sender::Assistant, &format!("a{}", i))
                .await
                .unwrap();
        }

        let history = store.history(sid).await.unwrap();
        assert_eq!(history.len(), 6);
        for (i, pair) in history.chunks(2).enumerate() {
            assert_eq!(pair[0].sender, Sender::Child);
            assert_eq!(pair[0].content, format!("q{}", i));
            assert_eq!(pair[1].sender, Sender::Assistant);
            assert_eq!(pair[1].content, format!("a{}", i));
        }
    }

    #[tokio::test]
    async fn sessions_are_isolated_and_monotonic() {
        let (_dir, store) = store().await;
        let first = store.start_session("amy").await.unwrap();
        let second = store.start_session("ben").await.unwrap();
        assert!(second > first);
        store.append_message(first, Sender::Child, "hi").await.unwrap();

        assert!(store.history(second).await.unwrap().is_empty());
        assert!(store.history(9999).await.unwrap().is_empty());
        assert_eq!(store.session_owner(second).await.unwrap().as_deref(), Some("ben"));
        assert_eq!(store.session_owner(9999).await.unwrap(), None);
    }

    #[tokio::test]
    async fn approval_is_check_and_set() {
        let (_dir, store) = store().await;
        let id = store
            .create_prompt_request("amy", "why is the sky blue?")
            .await
            .unwrap();

        let pending = store.fetch_prompt_request(id).await.unwrap().unwrap();
        assert_eq!(pending.status, RequestStatus::Pending);
        assert_eq!(pending.prompt, "why is the sky blue?");
        assert_eq!(pending.decided_at, None);

        assert!(store.approve_prompt_request(id).await.unwrap());
        assert!(!store.approve_prompt_request(id).await.unwrap());
        assert!(!store.reject_prompt_request(id).await.unwrap());

        let approved = store.fetch_prompt_request(id).await.unwrap().unwrap();
        assert_eq!(approved.status, RequestStatus::Approved);
        assert!(approved.decided_at.is_some());
    }

    #[tokio::test]
    async fn rejection_is_terminal() {
        let (_dir, store) = store().await;
        let id = store.create_prompt_request("amy", "x").await.unwrap();
        assert!(store.reject_prompt_request(id).await.unwrap());
        assert!(!store.approve_prompt_request(id).await.unwrap());
        let request = store.fetch_prompt_request(id).await.unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Rejected);
    }

    #[tokio::test]
    async fn transition_of_unknown_request_is_false() {
        let (_dir, store) = store().await;
        assert!(!store.approve_prompt_request(42).await.unwrap());
        assert!(store.fetch_prompt_request(42).await.unwrap().is_none());
        assert!(
            store
                .transition_prompt_request(42, RequestStatus::Pending)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn answer_is_recorded_on_request() {
        let (_dir, store) = store().await;
        let id = store.create_prompt_request("amy", "x").await.unwrap();
        store.record_answer(id, "42").await.unwrap();
        let request = store.fetch_prompt_request(id).await.unwrap().unwrap();
        assert_eq!(request.answer.as_deref(), Some("42"));
        assert_eq!(store.list_prompt_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn audit_and_violation_counts() {
        let (_dir, store) = store().await;
        store.log_event("prompt_submitted", "amy").await.unwrap();
        store.log_event("prompt_submitted", "ben").await.unwrap();
        store.log_event("prompt_approved", "mom").await.unwrap();
        store.log_violation("amy", "guns", "violence").await.unwrap();

        let since = Utc::now() - Duration::hours(24);
        assert_eq!(
            store.event_counts_since(since).await.unwrap(),
            vec![
                ("prompt_approved".to_string(), 1),
                ("prompt_submitted".to_string(), 2)
            ]
        );
        assert_eq!(
            store.violation_counts_since(since).await.unwrap(),
            vec![("amy".to_string(), 1)]
        );

        let future = Utc::now() + Duration::hours(1);
        assert!(store.event_counts_since(future).await.unwrap().is_empty());
    }
}
