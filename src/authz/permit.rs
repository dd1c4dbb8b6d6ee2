use super::{Action, DecisionPoint};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Client for a Permit.io policy decision point (`POST /allowed`).
pub struct PermitDecisionPoint {
    client: reqwest::Client,
    pdp_url: String,
    api_key: String,
}

#[derive(Serialize)]
struct AllowedRequest<'a> {
    user: PermitUser<'a>,
    action: &'a str,
    resource: PermitResource<'a>,
}

#[derive(Serialize)]
struct PermitUser<'a> {
    key: &'a str,
}

#[derive(Serialize)]
struct PermitResource<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Deserialize)]
struct AllowedResponse {
    allow: bool,
}

impl PermitDecisionPoint {
    pub fn new(pdp_url: &str, api_key: &str) -> Self {
        info!("Permit decision point configured ({})", pdp_url);
        Self {
            client: reqwest::Client::new(),
            pdp_url: pdp_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl DecisionPoint for PermitDecisionPoint {
    async fn decide(&self, subject: &str, action: Action, resource: &str) -> Result<bool> {
        let url = format!("{}/allowed", self.pdp_url);
        let body = AllowedRequest {
            user: PermitUser { key: subject },
            action: action.as_str(),
            resource: PermitResource { kind: resource },
        };

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Permit PDP error: {} {}", status, body);
        }

        let data: AllowedResponse = resp.json().await?;
        debug!(subject, action = %action, allow = data.allow, "permit decision");
        Ok(data.allow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_matches_pdp_shape() {
        let body = AllowedRequest {
            user: PermitUser { key: "amy" },
            action: Action::Create.as_str(),
            resource: PermitResource {
                kind: "prompt_requests",
            },
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({
                "user": { "key": "amy" },
                "action": "create",
                "resource": { "type": "prompt_requests" }
            })
        );
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let pdp = PermitDecisionPoint::new("http://localhost:7766/", "key");
        assert_eq!(pdp.pdp_url, "http://localhost:7766");
    }

    #[tokio::test]
    async fn unreachable_pdp_is_an_error() {
        // port 9 (discard) is closed on test hosts
        let pdp = PermitDecisionPoint::new("http://127.0.0.1:9", "key");
        assert!(pdp.decide("amy", Action::Create, "prompt_requests").await.is_err());
    }
}
