//! Reward Engine - Blended mining, XP and referral rewards for platform activity
//!
//! Turns raw activity and user state into bounded rewards, while resisting
//! botting, whale dominance and double-claiming.
//!
//! # How it works
//!
//! 1. Activity events are validated, scored for human likelihood and content quality
//! 2. The XP engine awards experience and tracks levels, tiers and streaks
//! 3. Mining sessions accrue lazily at a multiplicative, regressed hourly rate
//! 4. Referral networks are valued with a regression against shallow growth
//! 5. The coordinator serializes each user's transitions and pays claims atomically
//!
//! # Anti-abuse measures
//!
//! - Operations fail closed below per-operation human-probability thresholds
//! - Duplicate content is penalized by hash and embedding similarity
//! - Holdings drive an exponential regression on the mining rate
//! - Every phase has a daily cap; claims pay at most once per session

pub mod anti_bot;
pub mod boost;
pub mod collaborators;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod mining;
pub mod notify;
pub mod quality;
pub mod referral;
pub mod server;
pub mod session;
pub mod storage;
pub mod types;
pub mod xp;

pub use anti_bot::{AntiBotConfig, AntiBotScorer, BehaviorSignals, BotScore, Operation, RecordedSignals};
pub use boost::{Boost, BoostCatalog, BoostKind, BoostTarget};
pub use collaborators::{
    ContentModel, Ledger, LedgerReceipt, NetworkStats, Notifier, RewardNotification, RewardStore,
    SignalSource,
};
pub use config::Config;
pub use coordinator::{
    ActivityResult, ClaimResult, Collaborators, EngineConfig, MiningStatus, RewardCoordinator,
};
pub use error::{CollaboratorError, RewardError, StoreError};
pub use mining::{MiningCalculator, MiningConfig, MiningInputs, MiningRate, Phase};
pub use notify::{LogNotifier, WebhookNotifier};
pub use quality::{ContentAssessment, HeuristicContentModel, QualityAnalysis, QualityScorer};
pub use referral::{ReferralCalculator, ReferralSnapshot, ReferralTier, ReferralValue};
pub use session::{ClaimRecord, MiningSession, SessionState};
pub use storage::SqliteStore;
pub use types::{ActivityEvent, ActivityType, ContentRef, Platform, UserRewardProfile};
pub use xp::{XpEngine, XpOutcome, XpTier};
