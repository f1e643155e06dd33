//! Session & claim coordinator
//!
//! Owns every state transition on a user's profile and mining session.
//! Transitions on one user are serialized by a per-user async lock; different
//! users never block each other. The calculators are pure and run unlocked.
//!
//! Ledger issuance and notifications happen after the commit and never roll
//! a reward back.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::anti_bot::{AntiBotConfig, AntiBotScorer, Operation};
use crate::boost::{self, Boost, BoostCatalog, BoostKind, BoostTarget};
use crate::collaborators::{ContentModel, Ledger, Notifier, RewardNotification, RewardStore, SignalSource};
use crate::error::{Result, RewardError};
use crate::mining::{MiningCalculator, MiningConfig, MiningInputs, MiningRate};
use crate::quality::{QualityAnalysis, QualityConfig, QualityScorer};
use crate::referral::{ReferralCalculator, ReferralConfig, ReferralSnapshot, ReferralState, ReferralTier, ReferralValue};
use crate::session::{ClaimRecord, MiningSession, RateSnapshot, SessionState};
use crate::types::{validate_user_id, ActivityEvent, UserRewardProfile};
use crate::xp::{XpConfig, XpEngine, XpOutcome, XpRejection, XpRequest, XpTier};

/// Tunables for every calculator the coordinator drives
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub mining: MiningConfig,
    pub xp: XpConfig,
    pub referral: ReferralConfig,
    pub anti_bot: AntiBotConfig,
    pub quality: QualityConfig,
    pub boosts: BoostCatalog,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        self.mining.validate()?;
        self.xp.validate()?;
        self.referral.validate()?;
        self.anti_bot.validate()?;
        self.quality.validate()
    }
}

/// External collaborators wired into the coordinator
pub struct Collaborators {
    pub store: Arc<dyn RewardStore>,
    pub ledger: Arc<dyn Ledger>,
    pub content_model: Arc<dyn ContentModel>,
    pub signals: Arc<dyn SignalSource>,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningStatus {
    pub user_id: String,
    pub state: SessionState,
    pub session_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    /// Settled plus pending accrual, before the daily-cap clamp at claim
    pub accrued: f64,
    pub rate: MiningRate,
    pub earned_today: f64,
    pub remaining_today: f64,
    pub claim_eligible: bool,
    pub claimable_at: Option<DateTime<Utc>>,
    pub boosts: Vec<Boost>,
    pub xp_level: u32,
    pub xp_tier: XpTier,
    /// XP still needed for the next level
    #[serde(default)]
    pub xp_to_next_level: u64,
    pub referral_tier: ReferralTier,
    pub quality_score: f64,
    pub human_probability: f64,
    pub as_of: DateTime<Utc>,
    #[serde(default)]
    pub from_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimResult {
    pub session_id: Uuid,
    pub user_id: String,
    pub amount: f64,
    pub excess: f64,
    pub claimed_at: DateTime<Utc>,
    pub idempotency_key: String,
    /// True when this call returned an earlier claim unchanged
    pub replayed: bool,
}

impl ClaimResult {
    fn from_record(user_id: &str, record: &ClaimRecord, replayed: bool) -> Self {
        Self {
            session_id: record.session_id,
            user_id: user_id.to_string(),
            amount: record.amount,
            excess: record.excess,
            claimed_at: record.claimed_at,
            idempotency_key: record.idempotency_key.clone(),
            replayed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityResult {
    pub event_id: String,
    pub xp: XpOutcome,
    pub quality: Option<QualityAnalysis>,
    pub human_probability: f64,
}

type LockTable = DashMap<String, Arc<tokio::sync::Mutex<()>>>;

/// Holds one user's transition lock. The table entry goes away with the last
/// holder or waiter.
struct UserGuard<'a> {
    locks: &'a LockTable,
    user_id: String,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for UserGuard<'_> {
    fn drop(&mut self) {
        // Only the table and this guard reference an uncontended lock
        self.locks
            .remove_if(&self.user_id, |_, lock| Arc::strong_count(lock) <= 2);
    }
}

pub struct RewardCoordinator {
    config: EngineConfig,
    mining: MiningCalculator,
    xp: XpEngine,
    referral: ReferralCalculator,
    quality: QualityScorer,
    anti_bot: AntiBotScorer,
    store: Arc<dyn RewardStore>,
    ledger: Arc<dyn Ledger>,
    notifier: Arc<dyn Notifier>,
    locks: LockTable,
    status_cache: Mutex<HashMap<String, MiningStatus>>,
}

impl RewardCoordinator {
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            mining: MiningCalculator::new(config.mining.clone()),
            xp: XpEngine::new(config.xp.clone()),
            referral: ReferralCalculator::new(config.referral.clone()),
            quality: QualityScorer::new(config.quality.clone(), collaborators.content_model),
            anti_bot: AntiBotScorer::new(config.anti_bot.clone(), collaborators.signals),
            store: collaborators.store,
            ledger: collaborators.ledger,
            notifier: collaborators.notifier,
            locks: DashMap::new(),
            status_cache: Mutex::new(HashMap::new()),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn mining_calculator(&self) -> &MiningCalculator {
        &self.mining
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    async fn lock_user(&self, user_id: &str) -> Result<UserGuard<'_>> {
        validate_user_id(user_id)?;
        let lock = self
            .locks
            .entry(user_id.to_string())
            .or_default()
            .value()
            .clone();
        Ok(UserGuard {
            locks: &self.locks,
            user_id: user_id.to_string(),
            _guard: lock.lock_owned().await,
        })
    }

    /// Lock a registered user and load their profile under the lock. Unknown
    /// ids are refused without touching the lock table.
    async fn lock_profile(&self, user_id: &str) -> Result<(UserGuard<'_>, UserRewardProfile)> {
        self.require_profile(user_id).await?;
        let guard = self.lock_user(user_id).await?;
        let profile = self.require_profile(user_id).await?;
        Ok((guard, profile))
    }

    async fn require_profile(&self, user_id: &str) -> Result<UserRewardProfile> {
        validate_user_id(user_id)?;
        self.store
            .load_profile(user_id)
            .await?
            .ok_or_else(|| RewardError::invalid(format!("unknown user {}", user_id)))
    }

    async fn network_users(&self) -> Result<u64> {
        Ok(self.store.network_stats().await?.total_users)
    }

    fn inputs(&self, profile: &UserRewardProfile, network_users: u64, now: DateTime<Utc>) -> MiningInputs {
        MiningInputs::from_profile(profile, self.mining.phase_for(network_users), network_users, now)
    }

    /// Settle the active session with the boosts it accrued under, then apply
    /// clock-driven rollovers to the profile. Order matters: the rollover
    /// drops expired boosts. A session whose network phase moved is
    /// re-snapshotted; returns whether that happened.
    fn settle_and_refresh(
        &self,
        profile: &mut UserRewardProfile,
        session: &mut Option<MiningSession>,
        network_users: u64,
        now: DateTime<Utc>,
    ) -> bool {
        if let Some(s) = session.as_mut() {
            s.settle(&self.mining, &profile.boosts, now);
        }
        profile.refresh(now);
        profile.updated_at = now;

        let drifted = session
            .as_ref()
            .is_some_and(|s| s.network_drifted(&self.mining, network_users));
        if drifted {
            info!(
                "Network at {} users, re-snapshotting {}'s session",
                network_users, profile.user_id
            );
            self.rebase(profile, session, network_users, now);
        }
        drifted
    }

    /// Re-snapshot an active session after its multipliers changed
    fn rebase(
        &self,
        profile: &UserRewardProfile,
        session: &mut Option<MiningSession>,
        network_users: u64,
        now: DateTime<Utc>,
    ) {
        if let Some(s) = session.as_mut().filter(|s| s.state == SessionState::Active) {
            let inputs = self.inputs(profile, network_users, now);
            s.resnapshot(&self.mining, &profile.boosts, inputs, now);
            debug!("Re-snapshotted session {} for {}", s.session_id, profile.user_id);
        }
    }

    async fn persist(
        &self,
        profile: &mut UserRewardProfile,
        session: Option<&MiningSession>,
    ) -> Result<()> {
        match session {
            Some(s) => self.store.commit(profile, s).await?,
            None => self.store.save_profile(profile).await?,
        }
        self.status_cache.lock().remove(&profile.user_id);
        Ok(())
    }

    /// Cache a computed status. A full cache first drops expired entries,
    /// then the oldest one.
    fn cache_status(&self, status: &MiningStatus) {
        let config = self.mining.config();
        let ttl = Duration::seconds(config.status_cache_ttl_secs);
        let mut cache = self.status_cache.lock();
        if !cache.contains_key(&status.user_id) && cache.len() >= config.status_cache_capacity {
            cache.retain(|_, s| status.as_of - s.as_of < ttl);
            if cache.len() >= config.status_cache_capacity {
                let oldest = cache
                    .iter()
                    .min_by_key(|(_, s)| s.as_of)
                    .map(|(k, _)| k.clone());
                if let Some(key) = oldest {
                    cache.remove(&key);
                }
            }
        }
        cache.insert(status.user_id.clone(), status.clone());
    }

    fn notify(&self, notification: RewardNotification) {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&notification).await {
                warn!("Notification for {} failed: {}", notification.user_id(), e);
            }
        });
    }

    fn issue(&self, user_id: String, session_id: Uuid, amount: f64, key: String) {
        let ledger = self.ledger.clone();
        let store = self.store.clone();
        tokio::spawn(async move {
            match ledger.issue_tokens(&user_id, amount, &key).await {
                Ok(receipt) => {
                    info!("Issued {:.6} to {} (tx {})", amount, user_id, receipt.transaction_id);
                    if let Err(e) = store.record_receipt(session_id, &receipt).await {
                        warn!("Failed to record receipt for {}: {}", session_id, e);
                    }
                }
                // The claim stays committed; the idempotency key makes a later retry safe
                Err(e) => warn!("Ledger issuance for {} failed: {}", key, e),
            }
        });
    }

    // ========================================================================
    // PROFILES
    // ========================================================================

    pub async fn register_user(
        &self,
        user_id: &str,
        kyc_verified: bool,
        now: DateTime<Utc>,
    ) -> Result<UserRewardProfile> {
        let _guard = self.lock_user(user_id).await?;
        if self.store.load_profile(user_id).await?.is_some() {
            return Err(RewardError::conflict(format!("user {} already registered", user_id)));
        }
        let mut profile = UserRewardProfile::new(user_id, kyc_verified, now);
        self.persist(&mut profile, None).await?;
        info!("Registered {} (kyc: {})", user_id, kyc_verified);
        Ok(profile)
    }

    pub async fn profile(&self, user_id: &str) -> Result<UserRewardProfile> {
        self.require_profile(user_id).await
    }

    pub async fn set_kyc(
        &self,
        user_id: &str,
        verified: bool,
        now: DateTime<Utc>,
    ) -> Result<UserRewardProfile> {
        let (_guard, mut profile) = self.lock_profile(user_id).await?;
        let mut session = self.store.current_session(user_id).await?;
        let network_users = self.network_users().await?;

        self.settle_and_refresh(&mut profile, &mut session, network_users, now);
        profile.kyc_verified = verified;
        self.rebase(&profile, &mut session, network_users, now);
        self.persist(&mut profile, session.as_ref()).await?;
        info!("KYC for {} set to {}", user_id, verified);
        Ok(profile)
    }

    // ========================================================================
    // MINING
    // ========================================================================

    pub async fn start_mining(&self, user_id: &str, now: DateTime<Utc>) -> Result<MiningSession> {
        let (_guard, mut profile) = self.lock_profile(user_id).await?;

        if let Some(existing) = self.store.current_session(user_id).await? {
            return Err(RewardError::conflict(format!(
                "session {} is already {:?}",
                existing.session_id, existing.state
            )));
        }

        profile.refresh(now);
        profile.updated_at = now;
        let network_users = self.network_users().await?;
        let phase = self.mining.phase_for(network_users);
        if profile.daily_earned.remaining(phase.daily_cap) <= 0.0 {
            return Err(RewardError::limit(
                format!("daily cap {} reached", phase.daily_cap),
                Some(profile.daily_earned.resets_at()),
            ));
        }

        let score = self
            .anti_bot
            .ensure_human(user_id, Operation::StartMining, now)
            .await?;
        profile.human_probability = score.human_probability;

        let inputs = self.inputs(&profile, network_users, now);
        let session = MiningSession::start(user_id, RateSnapshot::new(inputs, now), now);
        self.persist(&mut profile, Some(&session)).await?;
        info!("{} started mining session {}", user_id, session.session_id);
        Ok(session)
    }

    pub async fn stop_mining(&self, user_id: &str, now: DateTime<Utc>) -> Result<MiningSession> {
        let (_guard, mut profile) = self.lock_profile(user_id).await?;
        let mut session = match self.store.current_session(user_id).await? {
            Some(s) if s.state == SessionState::Active => Some(s),
            _ => return Err(RewardError::conflict(format!("{} has no active session", user_id))),
        };
        let network_users = self.network_users().await?;

        self.settle_and_refresh(&mut profile, &mut session, network_users, now);
        let Some(mut session) = session else {
            return Err(RewardError::conflict(format!("{} has no active session", user_id)));
        };
        session.stop(&self.mining, &profile.boosts, now)?;
        self.persist(&mut profile, Some(&session)).await?;
        info!(
            "{} stopped session {} with {:.6} accrued ({:?})",
            user_id, session.session_id, session.accrued, session.state
        );
        Ok(session)
    }

    /// Pay out a session. Replaying a claimed session returns the original
    /// result and changes nothing.
    pub async fn claim(
        &self,
        user_id: &str,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ClaimResult> {
        let (_guard, mut profile) = self.lock_profile(user_id).await?;

        let session = self
            .store
            .find_session(session_id)
            .await?
            .ok_or_else(|| RewardError::invalid(format!("unknown session {}", session_id)))?;
        if session.user_id != user_id {
            return Err(RewardError::invalid(format!(
                "session {} does not belong to {}",
                session_id, user_id
            )));
        }
        if let (SessionState::Claimed, Some(record)) = (session.state, session.claim.as_ref()) {
            debug!("Replaying claim for session {}", session_id);
            return Ok(ClaimResult::from_record(user_id, record, true));
        }
        if session.state == SessionState::Idle {
            return Err(RewardError::conflict(format!(
                "session {} was stopped with nothing accrued",
                session_id
            )));
        }

        let network_users = self.network_users().await?;
        let daily_cap = self.mining.phase_for(network_users).daily_cap;
        let mut session = Some(session);
        self.settle_and_refresh(&mut profile, &mut session, network_users, now);
        let Some(mut session) = session else {
            return Err(RewardError::invalid(format!("unknown session {}", session_id)));
        };
        let remaining = profile.daily_earned.remaining(daily_cap);
        if remaining <= 0.0 {
            return Err(RewardError::limit(
                format!("daily cap {} reached", daily_cap),
                Some(profile.daily_earned.resets_at()),
            ));
        }

        let score = self.anti_bot.ensure_human(user_id, Operation::Claim, now).await?;

        session.make_claimable(&self.mining, &profile.boosts, now)?;
        profile.human_probability = score.human_probability;

        let amount = session.accrued.min(remaining).max(0.0);
        let excess = (session.accrued - amount).max(0.0);
        let record = ClaimRecord {
            session_id,
            amount,
            excess,
            claimed_at: now,
            idempotency_key: session.idempotency_key(),
            ledger_receipt: None,
        };
        session.mark_claimed(record.clone())?;
        profile.holdings += amount;
        profile.daily_earned.amount += amount;

        self.persist(&mut profile, Some(&session)).await?;
        info!(
            "{} claimed {:.6} from session {} (excess {:.6})",
            user_id, amount, session_id, excess
        );

        if amount > 0.0 {
            self.issue(user_id.to_string(), session_id, amount, record.idempotency_key.clone());
        }
        self.notify(RewardNotification::Claimed {
            user_id: user_id.to_string(),
            session_id,
            amount,
        });
        Ok(ClaimResult::from_record(user_id, &record, false))
    }

    /// Informational status, served from a short-TTL cache. A session left
    /// behind by a network phase change is re-snapshotted first.
    pub async fn mining_status(&self, user_id: &str, now: DateTime<Utc>) -> Result<MiningStatus> {
        let ttl = Duration::seconds(self.mining.config().status_cache_ttl_secs);
        let cached = self.status_cache.lock().get(user_id).cloned();
        if let Some(mut hit) = cached {
            if now >= hit.as_of && now - hit.as_of < ttl {
                hit.from_cache = true;
                return Ok(hit);
            }
        }

        let mut profile = self.require_profile(user_id).await?;
        let mut session = self.store.current_session(user_id).await?;
        let network_users = self.network_users().await?;

        if session
            .as_ref()
            .is_some_and(|s| s.network_drifted(&self.mining, network_users))
        {
            let (_guard, locked) = self.lock_profile(user_id).await?;
            profile = locked;
            session = self.store.current_session(user_id).await?;
            if self.settle_and_refresh(&mut profile, &mut session, network_users, now) {
                if let Err(e) = self.persist(&mut profile, session.as_ref()).await {
                    warn!("Could not persist re-snapshot for {}: {}", user_id, e);
                }
            }
        }

        let accrued = session
            .as_ref()
            .map(|s| s.accrued_at(&self.mining, &profile.boosts, now))
            .unwrap_or(0.0);
        profile.refresh(now);

        let rate = match session.as_ref().filter(|s| s.state == SessionState::Active) {
            Some(s) => s.current_rate(&self.mining, &profile.boosts, now),
            None => self.mining.calculate(&self.inputs(&profile, network_users, now)),
        };
        let min_interval = self.mining.config().min_claim_interval_secs;
        let claimable_at = session.as_ref().and_then(|s| match s.state {
            SessionState::Active => Some(s.started_at + Duration::seconds(min_interval)),
            SessionState::Claimable => s.stopped_at,
            _ => None,
        });

        let status = MiningStatus {
            user_id: user_id.to_string(),
            state: session.as_ref().map(|s| s.state).unwrap_or(SessionState::Idle),
            session_id: session.as_ref().map(|s| s.session_id),
            started_at: session.as_ref().map(|s| s.started_at),
            accrued,
            earned_today: profile.daily_earned.amount,
            remaining_today: profile.daily_earned.remaining(rate.daily_cap),
            claim_eligible: session
                .as_ref()
                .map(|s| s.is_claim_eligible(now, min_interval))
                .unwrap_or(false),
            claimable_at,
            rate,
            boosts: profile.boosts.clone(),
            xp_level: profile.xp.level,
            xp_tier: profile.xp.tier(),
            xp_to_next_level: self.xp.xp_to_next_level(&profile.xp),
            referral_tier: profile.referral.tier,
            quality_score: profile.quality_score,
            human_probability: profile.human_probability,
            as_of: now,
            from_cache: false,
        };
        self.cache_status(&status);
        Ok(status)
    }

    // ========================================================================
    // BOOSTS
    // ========================================================================

    pub async fn activate_boost(
        &self,
        user_id: &str,
        kind: BoostKind,
        now: DateTime<Utc>,
    ) -> Result<Boost> {
        let (_guard, mut profile) = self.lock_profile(user_id).await?;
        let score = self
            .anti_bot
            .ensure_human(user_id, Operation::ActivateBoost, now)
            .await?;

        let mut session = self.store.current_session(user_id).await?;
        let network_users = self.network_users().await?;
        self.settle_and_refresh(&mut profile, &mut session, network_users, now);

        let activated = boost::activate(&mut profile.boosts, kind, &self.config.boosts, now)?;
        profile.human_probability = score.human_probability;
        if activated.target == BoostTarget::Mining {
            self.rebase(&profile, &mut session, network_users, now);
        }
        self.persist(&mut profile, session.as_ref()).await?;
        info!(
            "{} activated {:?} x{} until {}",
            user_id, kind, activated.stacks, activated.expires_at
        );

        self.notify(RewardNotification::BoostActivated {
            user_id: user_id.to_string(),
            boost: activated.clone(),
        });
        Ok(activated)
    }

    // ========================================================================
    // ACTIVITY
    // ========================================================================

    /// Score one activity event and award XP for it.
    ///
    /// Daily ceilings, streaks and duplicate windows are judged at `now`, the
    /// time the event is accepted; `occurred_at` only has to fall inside the
    /// accepted reporting window. The content is remembered for duplicate
    /// detection only once the award has been committed.
    pub async fn record_activity(
        &self,
        event: &ActivityEvent,
        now: DateTime<Utc>,
    ) -> Result<ActivityResult> {
        event.validate(now)?;
        let user_id = event.user_id.as_str();
        let (_guard, mut profile) = self.lock_profile(user_id).await?;

        let content_id = event.content.as_ref().map(|c| c.content_id.as_str());
        if let Some(id) = content_id {
            if self.xp.is_duplicate(&profile.xp, id, now) {
                debug!("Event {} repeats content {}", event.event_id, id);
                return Ok(ActivityResult {
                    event_id: event.event_id.clone(),
                    xp: XpOutcome::Rejected {
                        reason: XpRejection::DuplicateContent,
                    },
                    quality: None,
                    human_probability: profile.human_probability,
                });
            }
        }

        self.anti_bot.observe(event).await;
        let score = self
            .anti_bot
            .ensure_human(user_id, Operation::RecordActivity, now)
            .await?;

        let mut session = self.store.current_session(user_id).await?;
        let network_users = self.network_users().await?;

        let quality = match &event.content {
            Some(content) => Some(self.quality.analyze(content, event.platform, now).await),
            None => None,
        };
        let quality_score = quality
            .as_ref()
            .map(QualityAnalysis::effective_score)
            .unwrap_or(profile.quality_score);

        let drifted = self.settle_and_refresh(&mut profile, &mut session, network_users, now);

        let request = XpRequest {
            activity: event.activity,
            platform: event.platform,
            content_id,
            quality_score,
            boost_multiplier: boost::product(&profile.boosts, BoostTarget::Xp, now),
            at: now,
        };
        let outcome = self.xp.award(&mut profile.xp, &request)?;

        let level_up = match &outcome {
            XpOutcome::Awarded(award) => award.level_up.clone(),
            XpOutcome::Rejected { .. } => None,
        };
        let awarded = matches!(outcome, XpOutcome::Awarded(_));
        if awarded {
            profile.human_probability = score.human_probability;
            if let Some(analysis) = &quality {
                let before = profile.quality_score;
                profile.quality_score = self.quality.update_record(before, analysis);
                if (profile.quality_score - before).abs() > f64::EPSILON {
                    self.rebase(&profile, &mut session, network_users, now);
                }
            }
            if level_up.is_some() {
                self.rebase(&profile, &mut session, network_users, now);
            }
        }
        if awarded || drifted {
            self.persist(&mut profile, session.as_ref()).await?;
        }
        if awarded {
            if let Some(analysis) = &quality {
                self.quality.remember(analysis, now);
            }
        }

        if let Some(level_up) = level_up {
            self.notify(RewardNotification::LevelUp {
                user_id: user_id.to_string(),
                level_up,
            });
        }

        Ok(ActivityResult {
            event_id: event.event_id.clone(),
            xp: outcome,
            quality,
            human_probability: score.human_probability,
        })
    }

    // ========================================================================
    // REFERRALS
    // ========================================================================

    pub async fn update_referral_network(
        &self,
        user_id: &str,
        snapshot: ReferralSnapshot,
        now: DateTime<Utc>,
    ) -> Result<ReferralValue> {
        snapshot.validate()?;
        let (_guard, mut profile) = self.lock_profile(user_id).await?;
        let mut session = self.store.current_session(user_id).await?;
        let network_users = self.network_users().await?;
        self.settle_and_refresh(&mut profile, &mut session, network_users, now);

        let value = self.referral.calculate(
            &snapshot,
            boost::product(&profile.boosts, BoostTarget::Referral, now),
        );
        let tier_changed = value.tier != profile.referral.tier;
        profile.referral = ReferralState {
            snapshot,
            points: value.points,
            tier: value.tier,
            updated_at: Some(now),
        };
        self.rebase(&profile, &mut session, network_users, now);
        self.persist(&mut profile, session.as_ref()).await?;
        if tier_changed {
            info!("{} referral tier is now {:?}", user_id, value.tier);
        }
        Ok(value)
    }

    pub async fn referral_value(&self, user_id: &str, now: DateTime<Utc>) -> Result<ReferralValue> {
        let profile = self.require_profile(user_id).await?;
        Ok(self.referral.calculate(
            &profile.referral.snapshot,
            boost::product(&profile.boosts, BoostTarget::Referral, now),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anti_bot::RecordedSignals;
    use crate::notify::LogNotifier;
    use crate::quality::HeuristicContentModel;
    use crate::storage::SqliteStore;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 2, 8, 0, 0).unwrap()
    }

    fn coordinator() -> (RewardCoordinator, Arc<SqliteStore>) {
        coordinator_with(EngineConfig::default())
    }

    fn coordinator_with(config: EngineConfig) -> (RewardCoordinator, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let collaborators = Collaborators {
            store: store.clone(),
            ledger: store.clone(),
            content_model: Arc::new(HeuristicContentModel::default()),
            signals: Arc::new(RecordedSignals::new(50)),
            notifier: Arc::new(LogNotifier),
        };
        (
            RewardCoordinator::new(config, collaborators).unwrap(),
            store,
        )
    }

    #[tokio::test]
    async fn test_status_is_cached_until_state_changes() {
        let (c, _) = coordinator();
        c.register_user("alice", true, t0()).await.unwrap();

        let first = c.mining_status("alice", t0()).await.unwrap();
        assert_eq!(first.state, SessionState::Idle);
        assert!(!first.from_cache);
        let cached = c.mining_status("alice", t0() + Duration::seconds(5)).await.unwrap();
        assert!(cached.from_cache);

        c.start_mining("alice", t0() + Duration::seconds(6)).await.unwrap();
        let fresh = c.mining_status("alice", t0() + Duration::seconds(7)).await.unwrap();
        assert!(!fresh.from_cache);
        assert_eq!(fresh.state, SessionState::Active);
    }

    #[tokio::test]
    async fn test_register_twice_conflicts() {
        let (c, _) = coordinator();
        c.register_user("alice", false, t0()).await.unwrap();
        let err = c.register_user("alice", false, t0()).await.unwrap_err();
        assert_eq!(err.kind(), "session_conflict");
        assert!(c.register_user("", false, t0()).await.is_err());
    }

    #[tokio::test]
    async fn test_kyc_change_resnapshots_active_session() {
        let (c, _) = coordinator();
        c.register_user("alice", false, t0()).await.unwrap();
        c.start_mining("alice", t0()).await.unwrap();
        c.set_kyc("alice", true, t0() + Duration::hours(1)).await.unwrap();

        let status = c.mining_status("alice", t0() + Duration::hours(2)).await.unwrap();
        // Pioneer phase, 1 user: first hour at the 0.8 penalty, second at the
        // 1.2 bonus, which runs into the 4.8/day clamp
        let base = 0.1 * c.mining.pioneer_bonus(1) * 1.01;
        let expected = base * 0.8 + (base * 1.2).min(4.8 / 24.0);
        assert!((status.accrued - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_lock_table_only_holds_contended_users() {
        let (c, _) = coordinator();
        c.register_user("alice", true, t0()).await.unwrap();
        let session = c.start_mining("alice", t0()).await.unwrap();
        c.claim("alice", session.session_id, t0() + Duration::hours(2))
            .await
            .unwrap();
        assert!(c.locks.is_empty());

        // Unknown and malformed ids never reach the table
        for user in ["ghost", "", "nobody"] {
            assert!(c.start_mining(user, t0()).await.is_err());
            assert!(c.set_kyc(user, true, t0()).await.is_err());
        }
        assert!(c.locks.is_empty());

        let held = c.lock_user("alice").await.unwrap();
        assert_eq!(c.locks.len(), 1);
        drop(held);
        assert!(c.locks.is_empty());
    }

    #[tokio::test]
    async fn test_waiting_holder_keeps_the_lock_entry() {
        let (c, _) = coordinator();
        let c = Arc::new(c);
        c.register_user("alice", true, t0()).await.unwrap();

        let first = c.lock_user("alice").await.unwrap();
        let waiter = {
            let c = c.clone();
            tokio::spawn(async move {
                let _second = c.lock_user("alice").await.unwrap();
                c.locks.len()
            })
        };
        tokio::task::yield_now().await;
        drop(first);
        // Still present while the waiter holds it, gone after
        assert_eq!(waiter.await.unwrap(), 1);
        assert!(c.locks.is_empty());
    }

    #[tokio::test]
    async fn test_status_cache_is_bounded() {
        let mut config = EngineConfig::default();
        config.mining.status_cache_capacity = 2;
        let (c, _) = coordinator_with(config);
        for user in ["a", "b", "c"] {
            c.register_user(user, false, t0()).await.unwrap();
            c.mining_status(user, t0()).await.unwrap();
        }
        {
            let cache = c.status_cache.lock();
            assert_eq!(cache.len(), 2);
            assert!(cache.contains_key("c"));
        }

        // Past the TTL a full cache is swept before inserting
        let later = t0() + Duration::minutes(5);
        c.register_user("d", false, later).await.unwrap();
        c.mining_status("d", later).await.unwrap();
        let cache = c.status_cache.lock();
        assert_eq!(cache.len(), 1);
        assert!(cache.contains_key("d"));
    }

    #[tokio::test]
    async fn test_status_reports_xp_to_next_level() {
        let (c, _) = coordinator();
        c.register_user("alice", false, t0()).await.unwrap();
        let status = c.mining_status("alice", t0()).await.unwrap();
        assert_eq!(status.xp_level, 1);
        assert_eq!(status.xp_to_next_level, 100);
    }
}
