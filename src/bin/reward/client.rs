//! Reward Engine API Client

use anyhow::{anyhow, Result};
use reqwest::{Client, Response};
use reward_engine::{ClaimResult, MiningSession, MiningStatus};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Reward server API client
pub struct RewardClient {
    client: Client,
    base_url: String,
}

impl RewardClient {
    pub fn new(server_url: &str) -> Self {
        // Build HTTP client with timeout, falling back to default client if builder fails
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: server_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn user_url(&self, user_id: &str, path: &str) -> String {
        self.url(&format!("users/{}/{}", user_id, path.trim_start_matches('/')))
    }

    /// Decode a success body, or turn the server's error body into a message
    async fn decode<T: DeserializeOwned>(resp: Response, what: &str) -> Result<T> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json().await?);
        }
        let body: serde_json::Value = resp.json().await.unwrap_or_default();
        let message = body["message"].as_str().unwrap_or("Unknown error");
        let mut text = format!("{} failed ({}): {}", what, status, message);
        if let Some(retry) = body["retry_after"].as_str() {
            text.push_str(&format!(" (retry after {})", retry));
        }
        Err(anyhow!(text))
    }

    pub async fn status(&self, user_id: &str) -> Result<MiningStatus> {
        let resp = self.client.get(self.user_url(user_id, "mining")).send().await?;
        Self::decode(resp, "Status").await
    }

    pub async fn start(&self, user_id: &str) -> Result<MiningSession> {
        let resp = self
            .client
            .post(self.user_url(user_id, "mining/start"))
            .send()
            .await?;
        Self::decode(resp, "Start").await
    }

    pub async fn stop(&self, user_id: &str) -> Result<MiningSession> {
        let resp = self
            .client
            .post(self.user_url(user_id, "mining/stop"))
            .send()
            .await?;
        Self::decode(resp, "Stop").await
    }

    pub async fn claim(&self, user_id: &str, session_id: Uuid) -> Result<ClaimResult> {
        let resp = self
            .client
            .post(self.user_url(user_id, "mining/claim"))
            .json(&json!({ "session_id": session_id }))
            .send()
            .await?;
        Self::decode(resp, "Claim").await
    }

    pub async fn config(&self) -> Result<serde_json::Value> {
        let resp = self.client.get(self.url("config")).send().await?;
        Self::decode(resp, "Config").await
    }
}
