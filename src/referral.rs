//! Referral network calculator
//!
//! `rp = baseBand(active) + 0.1 × networkSize + 1000 × networkQuality`,
//! regressed by `e^(-0.0001 × networkSize × networkQuality)` so that very
//! large but shallow networks stop inflating rewards. The tier is a pure
//! function of the regressed value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RewardError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferralTier {
    #[default]
    Explorer,
    Connector,
    Influencer,
    Leader,
    Ambassador,
}

impl ReferralTier {
    pub const ALL: [ReferralTier; 5] = [
        ReferralTier::Explorer,
        ReferralTier::Connector,
        ReferralTier::Influencer,
        ReferralTier::Leader,
        ReferralTier::Ambassador,
    ];

    pub fn index(&self) -> u32 {
        *self as u32
    }
}

/// Referral network counts supplied by the ingestion layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferralSnapshot {
    pub direct_referrals: u32,
    /// Direct referrals active inside the rolling window
    pub active_referrals: u32,
    /// Direct + 2nd + 3rd degree
    pub network_size: u32,
}

impl ReferralSnapshot {
    pub fn validate(&self) -> Result<()> {
        if self.active_referrals > self.direct_referrals {
            return Err(RewardError::invalid(
                "active_referrals cannot exceed direct_referrals",
            ));
        }
        if self.network_size < self.direct_referrals {
            return Err(RewardError::invalid(
                "network_size cannot be smaller than direct_referrals",
            ));
        }
        Ok(())
    }

    pub fn network_quality(&self) -> f64 {
        self.active_referrals as f64 / self.direct_referrals.max(1) as f64
    }
}

/// Referral state carried on a user profile
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferralState {
    pub snapshot: ReferralSnapshot,
    pub points: f64,
    pub tier: ReferralTier,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub active_referrals: u32,
    pub bonus: f64,
}

/// Base band policy: points per active referral plus the highest milestone reached
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseBand {
    pub per_active: f64,
    pub milestones: Vec<Milestone>,
}

impl Default for BaseBand {
    fn default() -> Self {
        let m = |active_referrals, bonus| Milestone {
            active_referrals,
            bonus,
        };
        Self {
            per_active: 50.0,
            milestones: vec![m(10, 500.0), m(25, 1_500.0), m(50, 5_000.0), m(100, 15_000.0)],
        }
    }
}

impl BaseBand {
    pub fn points(&self, active_referrals: u32) -> f64 {
        let milestone = self
            .milestones
            .iter()
            .filter(|m| active_referrals >= m.active_referrals)
            .map(|m| m.bonus)
            .fold(0.0, f64::max);
        self.per_active * active_referrals as f64 + milestone
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferralConfig {
    pub base_band: BaseBand,
    pub network_size_weight: f64,
    pub quality_weight: f64,
    pub regression_coefficient: f64,
    /// Minimum points for each tier, Explorer first
    pub tier_thresholds: [f64; 5],
}

impl Default for ReferralConfig {
    fn default() -> Self {
        Self {
            base_band: BaseBand::default(),
            network_size_weight: 0.1,
            quality_weight: 1_000.0,
            regression_coefficient: 0.0001,
            tier_thresholds: [0.0, 1_000.0, 5_000.0, 15_000.0, 50_000.0],
        }
    }
}

impl ReferralConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tier_thresholds[0] != 0.0 {
            return Err(RewardError::invalid("first referral tier must start at 0"));
        }
        if self.tier_thresholds.windows(2).any(|w| w[1] <= w[0]) {
            return Err(RewardError::invalid("referral tier thresholds must increase"));
        }
        if self.regression_coefficient < 0.0 {
            return Err(RewardError::invalid("referral regression must be >= 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferralValue {
    pub network_quality: f64,
    pub raw_points: f64,
    pub regression_factor: f64,
    /// Regressed points; the tier is derived from this
    pub points: f64,
    /// Points after live referral boosts, for display and payouts
    pub boosted_points: f64,
    pub tier: ReferralTier,
}

#[derive(Debug, Clone)]
pub struct ReferralCalculator {
    config: ReferralConfig,
}

impl ReferralCalculator {
    pub fn new(config: ReferralConfig) -> Self {
        Self { config }
    }

    pub fn tier_for(&self, points: f64) -> ReferralTier {
        ReferralTier::ALL
            .iter()
            .rev()
            .find(|t| points >= self.config.tier_thresholds[t.index() as usize])
            .copied()
            .unwrap_or_default()
    }

    pub fn calculate(&self, snapshot: &ReferralSnapshot, boost_multiplier: f64) -> ReferralValue {
        let network_quality = snapshot.network_quality();
        let network_size = snapshot.network_size as f64;
        let raw_points = self.config.base_band.points(snapshot.active_referrals)
            + self.config.network_size_weight * network_size
            + self.config.quality_weight * network_quality;
        let regression_factor =
            (-self.config.regression_coefficient * network_size * network_quality).exp();
        let points = raw_points * regression_factor;

        ReferralValue {
            network_quality,
            raw_points,
            regression_factor,
            points,
            boosted_points: points * boost_multiplier.max(1.0),
            tier: self.tier_for(points),
        }
    }
}
