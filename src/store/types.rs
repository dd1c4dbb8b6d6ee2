use crate::entity::{chat_messages, prompt_requests};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub(super) fn from_micros(us: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(us).unwrap_or_default()
}

/// Splits a guardian-entered topic list ("space, animals") into entries.
pub fn parse_topics(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

pub(super) fn join_topics(topics: &[String]) -> String {
    topics.join(",")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildProfile {
    pub username: String,
    pub age: u32,
    #[serde(default)]
    pub allowed_topics: Vec<String>,
    #[serde(default)]
    pub restricted_topics: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    Child,
    Assistant,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::Child => "child",
            Sender::Assistant => "assistant",
        }
    }

    fn from_db(s: &str) -> Self {
        match s {
            "assistant" => Sender::Assistant,
            _ => Sender::Child,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub sender: Sender,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl From<chat_messages::Model> for ChatMessage {
    fn from(r: chat_messages::Model) -> Self {
        Self {
            sender: Sender::from_db(&r.sender),
            content: r.content,
            timestamp: from_micros(r.timestamp_us),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
        }
    }

    fn from_db(s: &str) -> Self {
        match s {
            "approved" => RequestStatus::Approved,
            "rejected" => RequestStatus::Rejected,
            _ => RequestStatus::Pending,
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptRequest {
    pub id: i64,
    pub child: String,
    pub prompt: String,
    pub status: RequestStatus,
    pub answer: Option<String>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl From<prompt_requests::Model> for PromptRequest {
    fn from(r: prompt_requests::Model) -> Self {
        Self {
            id: r.id,
            child: r.kid_username,
            prompt: r.prompt,
            status: RequestStatus::from_db(&r.status),
            answer: r.answer,
            created_at: from_micros(r.created_at_us),
            decided_at: r.decided_at_us.map(from_micros),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_are_trimmed_and_blank_entries_dropped() {
        assert_eq!(parse_topics(" space, animals ,,"), vec!["space", "animals"]);
        assert!(parse_topics("").is_empty());
        assert!(parse_topics(" , ").is_empty());
    }

    #[test]
    fn status_round_trips_through_storage_form() {
        for status in [
            RequestStatus::Pending,
            RequestStatus::Approved,
            RequestStatus::Rejected,
        ] {
            assert_eq!(RequestStatus::from_db(status.as_str()), status);
        }
    }
}
