//! Core data model: activity events and user reward profiles

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::boost::Boost;
use crate::error::{Result, RewardError};
use crate::referral::ReferralState;
use crate::xp::XpState;

/// Maximum accepted clock skew for event timestamps
const MAX_FUTURE_SKEW_SECS: i64 = 300;
/// Events reported later than this after they happened are refused
const MAX_EVENT_LATENESS_SECS: i64 = 3_600;
const MAX_USER_ID_LEN: usize = 128;
const MAX_CONTENT_BYTES: usize = 64 * 1024;
const MAX_EXTENSION_ENTRIES: usize = 16;
const MAX_EXTENSION_KEY_LEN: usize = 64;
const MAX_EXTENSION_TEXT_LEN: usize = 256;

// ============================================================================
// ACTIVITY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    OriginalPost,
    PhotoPost,
    VideoPost,
    Story,
    Comment,
    Like,
    Share,
    Follow,
    DailyLogin,
    DailyQuest,
    Milestone,
    ViralContent,
}

impl ActivityType {
    pub const ALL: [ActivityType; 12] = [
        ActivityType::OriginalPost,
        ActivityType::PhotoPost,
        ActivityType::VideoPost,
        ActivityType::Story,
        ActivityType::Comment,
        ActivityType::Like,
        ActivityType::Share,
        ActivityType::Follow,
        ActivityType::DailyLogin,
        ActivityType::DailyQuest,
        ActivityType::Milestone,
        ActivityType::ViralContent,
    ];

    /// Activities that must reference the content they produced
    pub fn requires_content(&self) -> bool {
        matches!(
            self,
            ActivityType::OriginalPost
                | ActivityType::PhotoPost
                | ActivityType::VideoPost
                | ActivityType::Story
                | ActivityType::Comment
                | ActivityType::ViralContent
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Tiktok,
    Instagram,
    Youtube,
    X,
    Facebook,
    App,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Text,
    Image,
    Video,
}

/// Reference to the content an activity produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRef {
    pub content_id: String,
    #[serde(default)]
    pub text: String,
    pub media: MediaKind,
}

/// Device environment reported by the client
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceSignals {
    pub fingerprint: String,
    #[serde(default)]
    pub is_emulator: bool,
    #[serde(default)]
    pub is_rooted: bool,
    /// Number of accounts seen on this device
    #[serde(default = "default_accounts_on_device")]
    pub accounts_on_device: u32,
}

fn default_accounts_on_device() -> u32 {
    1
}

/// Social-graph snapshot for the acting user
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SocialSignals {
    pub account_age_days: u32,
    pub connections: u32,
    /// Share of interactions that were reciprocated (0.0 - 1.0)
    pub reciprocal_ratio: f64,
}

/// Behavioral signals attached to one event
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventSignals {
    #[serde(default)]
    pub device: Option<DeviceSignals>,
    /// Biometric consistency (0.0 - 1.0), if the client captured it
    #[serde(default)]
    pub biometric_consistency: Option<f64>,
    #[serde(default)]
    pub social: Option<SocialSignals>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtensionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// Bounded metadata carried from the ingestion boundary.
///
/// Calculators never read it; it is kept for audit only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Extensions(BTreeMap<String, ExtensionValue>);

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: ExtensionValue) -> Result<()> {
        let key = key.into();
        if !self.0.contains_key(&key) && self.0.len() >= MAX_EXTENSION_ENTRIES {
            return Err(RewardError::invalid("too many extension entries"));
        }
        Self::validate_entry(&key, &value)?;
        self.0.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&ExtensionValue> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if self.0.len() > MAX_EXTENSION_ENTRIES {
            return Err(RewardError::invalid(format!(
                "extensions exceed {} entries",
                MAX_EXTENSION_ENTRIES
            )));
        }
        for (key, value) in &self.0 {
            Self::validate_entry(key, value)?;
        }
        Ok(())
    }

    fn validate_entry(key: &str, value: &ExtensionValue) -> Result<()> {
        if key.is_empty() || key.len() > MAX_EXTENSION_KEY_LEN {
            return Err(RewardError::invalid(format!("bad extension key '{}'", key)));
        }
        match value {
            ExtensionValue::Text(s) if s.len() > MAX_EXTENSION_TEXT_LEN => Err(
                RewardError::invalid(format!("extension '{}' value too long", key)),
            ),
            ExtensionValue::Float(f) if !f.is_finite() => Err(RewardError::invalid(format!(
                "extension '{}' is not finite",
                key
            ))),
            _ => Ok(()),
        }
    }
}

/// One user action, created by the ingestion layer and consumed once
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub event_id: String,
    pub user_id: String,
    pub activity: ActivityType,
    pub platform: Platform,
    #[serde(default)]
    pub content: Option<ContentRef>,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub signals: EventSignals,
    #[serde(default)]
    pub extensions: Extensions,
}

impl ActivityEvent {
    /// Reject malformed events before any scoring happens
    pub fn validate(&self, now: DateTime<Utc>) -> Result<()> {
        validate_user_id(&self.user_id)?;
        if self.event_id.is_empty() {
            return Err(RewardError::invalid("event_id is empty"));
        }
        if self.occurred_at > now + Duration::seconds(MAX_FUTURE_SKEW_SECS) {
            return Err(RewardError::invalid("event timestamp is in the future"));
        }
        if self.occurred_at < now - Duration::seconds(MAX_EVENT_LATENESS_SECS) {
            return Err(RewardError::invalid("event timestamp is too old"));
        }
        match (&self.content, self.activity.requires_content()) {
            (None, true) => {
                return Err(RewardError::invalid(format!(
                    "{:?} requires a content reference",
                    self.activity
                )))
            }
            (Some(content), _) => {
                if content.content_id.is_empty() {
                    return Err(RewardError::invalid("content_id is empty"));
                }
                if content.text.len() > MAX_CONTENT_BYTES {
                    return Err(RewardError::invalid("content text too large"));
                }
            }
            (None, false) => {}
        }
        if let Some(b) = self.signals.biometric_consistency {
            if !(0.0..=1.0).contains(&b) {
                return Err(RewardError::invalid("biometric_consistency out of range"));
            }
        }
        if let Some(social) = &self.signals.social {
            if !(0.0..=1.0).contains(&social.reciprocal_ratio) {
                return Err(RewardError::invalid("reciprocal_ratio out of range"));
            }
        }
        self.extensions.validate()
    }
}

pub fn validate_user_id(user_id: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(RewardError::invalid("user_id is empty"));
    }
    if user_id.len() > MAX_USER_ID_LEN {
        return Err(RewardError::invalid("user_id too long"));
    }
    Ok(())
}

// ============================================================================
// PROFILE
// ============================================================================

/// UTC day boundary following `now`
pub fn next_utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive() + Duration::days(1);
    tomorrow.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc()
}

/// Amount earned on a single UTC day; rolls over at midnight UTC
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyEarnings {
    pub day: NaiveDate,
    pub amount: f64,
}

impl DailyEarnings {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            day: now.date_naive(),
            amount: 0.0,
        }
    }

    /// Reset at UTC midnight. An earlier `now` never reopens a past day.
    pub fn roll(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today > self.day {
            self.day = today;
            self.amount = 0.0;
        }
    }

    pub fn remaining(&self, daily_cap: f64) -> f64 {
        (daily_cap - self.amount).max(0.0)
    }

    pub fn resets_at(&self) -> DateTime<Utc> {
        (self.day + Duration::days(1))
            .and_hms_opt(0, 0, 0)
            .unwrap_or_default()
            .and_utc()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRewardProfile {
    pub user_id: String,
    pub holdings: f64,
    pub kyc_verified: bool,
    pub xp: XpState,
    pub referral: ReferralState,
    /// Rolling content quality, clamped to [0.5, 2.0]
    pub quality_score: f64,
    /// Last anti-bot result for this user
    pub human_probability: f64,
    pub daily_earned: DailyEarnings,
    #[serde(default)]
    pub boosts: Vec<Boost>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency version, bumped on every save
    #[serde(default)]
    pub version: u64,
}

impl UserRewardProfile {
    pub fn new(user_id: impl Into<String>, kyc_verified: bool, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            holdings: 0.0,
            kyc_verified,
            xp: XpState::new(now),
            referral: ReferralState::default(),
            quality_score: 1.0,
            human_probability: 1.0,
            daily_earned: DailyEarnings::new(now),
            boosts: Vec::new(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Apply every clock-driven rollover: UTC day counters and boost expiry
    pub fn refresh(&mut self, now: DateTime<Utc>) {
        self.daily_earned.roll(now);
        self.xp.daily.roll(now);
        self.boosts.retain(|b| b.is_active(now));
    }
}
