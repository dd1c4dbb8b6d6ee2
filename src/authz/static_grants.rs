use super::{Action, DecisionPoint};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tracing::info;

const ANY_SUBJECT: &str = "*";

/// Grants read from config: action name -> subjects, `"*"` for everyone.
/// Resource kind is ignored.
pub struct StaticDecisionPoint {
    grants: HashMap<String, HashSet<String>>,
}

impl StaticDecisionPoint {
    pub fn new(grants: &HashMap<String, Vec<String>>) -> Self {
        info!("Static decision point configured ({} actions)", grants.len());
        Self {
            grants: grants
                .iter()
                .map(|(action, subjects)| (action.clone(), subjects.iter().cloned().collect()))
                .collect(),
        }
    }
}

#[async_trait]
impl DecisionPoint for StaticDecisionPoint {
    async fn decide(&self, subject: &str, action: Action, _resource: &str) -> Result<bool> {
        Ok(self
            .grants
            .get(action.as_str())
            .is_some_and(|s| s.contains(subject) || s.contains(ANY_SUBJECT)))
    }
}
