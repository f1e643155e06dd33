//! Narrow interfaces to the collaborators outside the engine
//!
//! - Persistence: profiles and sessions, with an atomic profile+session commit
//! - Ledger: token issuance keyed by an idempotency key
//! - Content model: raw quality sub-scores
//! - Signal source: behavioral signals for the anti-bot scorer
//! - Notifier: fire-and-forget events

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::anti_bot::BehaviorSignals;
use crate::boost::Boost;
use crate::error::{CollaboratorError, StoreError};
use crate::quality::ContentAssessment;
use crate::session::MiningSession;
use crate::types::{ActivityEvent, ContentRef, Platform, UserRewardProfile};
use crate::xp::LevelUp;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    pub total_users: u64,
}

#[async_trait]
pub trait RewardStore: Send + Sync {
    async fn load_profile(&self, user_id: &str) -> Result<Option<UserRewardProfile>, StoreError>;

    /// Insert or update a profile. Updates must match `profile.version`;
    /// on success the version is bumped in place.
    async fn save_profile(&self, profile: &mut UserRewardProfile) -> Result<(), StoreError>;

    /// The user's non-archived session, if any
    async fn current_session(&self, user_id: &str) -> Result<Option<MiningSession>, StoreError>;

    /// Any session by id, archived or not
    async fn find_session(&self, session_id: Uuid) -> Result<Option<MiningSession>, StoreError>;

    /// Save the profile (version-checked) and the session in one transaction.
    /// Both are written or neither is.
    async fn commit(
        &self,
        profile: &mut UserRewardProfile,
        session: &MiningSession,
    ) -> Result<(), StoreError>;

    async fn record_receipt(
        &self,
        session_id: Uuid,
        receipt: &LedgerReceipt,
    ) -> Result<(), StoreError>;

    async fn network_stats(&self) -> Result<NetworkStats, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerReceipt {
    pub idempotency_key: String,
    pub transaction_id: String,
    pub user_id: String,
    pub amount: f64,
    pub issued_at: DateTime<Utc>,
}

/// Token issuance. Calling twice with the same key must return the same receipt.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn issue_tokens(
        &self,
        user_id: &str,
        amount: f64,
        idempotency_key: &str,
    ) -> Result<LedgerReceipt, CollaboratorError>;
}

#[async_trait]
pub trait ContentModel: Send + Sync {
    async fn assess(
        &self,
        content: &ContentRef,
        platform: Platform,
    ) -> Result<ContentAssessment, CollaboratorError>;
}

#[async_trait]
pub trait SignalSource: Send + Sync {
    /// Feed an accepted event into the signal history
    async fn observe(&self, _event: &ActivityEvent) {}

    async fn signals(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<BehaviorSignals, CollaboratorError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RewardNotification {
    LevelUp {
        user_id: String,
        level_up: LevelUp,
    },
    Claimed {
        user_id: String,
        session_id: Uuid,
        amount: f64,
    },
    BoostActivated {
        user_id: String,
        boost: Boost,
    },
}

impl RewardNotification {
    pub fn user_id(&self) -> &str {
        match self {
            RewardNotification::LevelUp { user_id, .. }
            | RewardNotification::Claimed { user_id, .. }
            | RewardNotification::BoostActivated { user_id, .. } => user_id,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &RewardNotification) -> Result<(), CollaboratorError>;
}
