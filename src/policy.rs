use crate::store::{ChildProfile, Store};
use std::fmt::Write;
use std::sync::Arc;
use tracing::warn;

/// Prefixes a child's prompt with the guardian policy the AI backend is asked
/// to follow. Topic restrictions are only stated here, never enforced on the
/// backend's output.
pub struct PolicyWrapper {
    store: Arc<Store>,
}

impl PolicyWrapper {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Never fails: a missing or unreadable profile yields age 0 and empty
    /// topic lists.
    pub async fn profile(&self, child: &str) -> ChildProfile {
        match self.store.child_profile(child).await {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                warn!("No profile for {}, wrapping with defaults", child);
                ChildProfile::default()
            }
            Err(e) => {
                warn!("Profile lookup for {} failed, wrapping with defaults: {:#}", child, e);
                ChildProfile::default()
            }
        }
    }

    pub async fn wrap(&self, child: &str, prompt: &str) -> String {
        render(&self.profile(child).await, prompt)
    }
}

pub fn render(profile: &ChildProfile, prompt: &str) -> String {
    let mut out = String::with_capacity(96 + prompt.len());
    let _ = write!(
        out,
        "You are an AI assistant for a {}-year-old. Allowed topics: {}. Restricted topics: {}.",
        profile.age,
        profile.allowed_topics.join(","),
        profile.restricted_topics.join(","),
    );
    out.push_str("\nUser asks: ");
    out.push_str(prompt);
    out
}

/// Restricted topics mentioned in `prompt` (case-insensitive substring).
pub fn restricted_mentions<'a>(profile: &'a ChildProfile, prompt: &str) -> Vec<&'a str> {
    let prompt = prompt.to_lowercase();
    profile
        .restricted_topics
        .iter()
        .filter(|topic| prompt.contains(&topic.to_lowercase()))
        .map(String::as_str)
        .collect()
}
