//! Notification delivery

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

use crate::collaborators::{Notifier, RewardNotification};
use crate::error::CollaboratorError;

/// Writes notifications to the log
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &RewardNotification) -> Result<(), CollaboratorError> {
        match notification {
            RewardNotification::LevelUp { user_id, level_up } => {
                info!("[notify] {} reached level {} ({:?})", user_id, level_up.to, level_up.tier)
            }
            RewardNotification::Claimed {
                user_id,
                session_id,
                amount,
            } => info!("[notify] {} claimed {:.6} (session {})", user_id, amount, session_id),
            RewardNotification::BoostActivated { user_id, boost } => info!(
                "[notify] {} activated {:?} until {}",
                user_id, boost.kind, boost.expires_at
            ),
        }
        Ok(())
    }
}

/// POSTs each notification as JSON to a webhook
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("reward-engine/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CollaboratorError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &RewardNotification) -> Result<(), CollaboratorError> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| CollaboratorError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CollaboratorError::Rejected(format!(
                "webhook returned {}",
                status
            )));
        }
        debug!("Delivered {} notification", notification.user_id());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        let n = RewardNotification::Claimed {
            user_id: "alice".to_string(),
            session_id: Uuid::new_v4(),
            amount: 0.5,
        };
        assert!(LogNotifier.notify(&n).await.is_ok());
    }

    #[test]
    fn test_notification_wire_format() {
        let n = RewardNotification::Claimed {
            user_id: "alice".to_string(),
            session_id: Uuid::nil(),
            amount: 1.0,
        };
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["event"], "claimed");
        assert_eq!(json["user_id"], "alice");
    }

    #[tokio::test]
    async fn test_unreachable_webhook_is_unavailable() {
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/hook").unwrap();
        let n = RewardNotification::Claimed {
            user_id: "alice".to_string(),
            session_id: Uuid::nil(),
            amount: 1.0,
        };
        assert!(matches!(
            notifier.notify(&n).await,
            Err(CollaboratorError::Unavailable(_))
        ));
    }
}
