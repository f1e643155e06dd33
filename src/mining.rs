//! Mining rate calculator
//!
//! `rate = baseRate × pioneer × referral × security × xp × rp × quality × regression × boosts`
//!
//! All factors are multiplicative, so their order only matters for the
//! breakdown. The result is clamped so that `rate × 24` never exceeds the
//! phase's daily cap.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::boost::{self, BoostTarget};
use crate::error::{Result, RewardError};
use crate::quality::{MAX_QUALITY_SCORE, MIN_QUALITY_SCORE};
use crate::types::UserRewardProfile;

pub const HOURS_PER_DAY: f64 = 24.0;

/// One band of the network-size step function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    /// Phase applies once total network users reach this count
    pub min_users: u64,
    /// Tokens per hour before multipliers
    pub base_rate: f64,
    pub daily_cap: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MiningConfig {
    pub phases: Vec<Phase>,
    /// Network size at which the pioneer bonus has fully decayed to 1.0
    pub pioneer_decay_users: f64,
    pub referral_bonus_per_active: f64,
    pub kyc_bonus: f64,
    pub non_kyc_penalty: f64,
    pub regression_coefficient: f64,
    pub rp_bonus_per_tier: f64,
    /// Lowest hourly rate ever reported
    pub min_hourly_rate: f64,
    pub min_claim_interval_secs: i64,
    pub max_session_hours: f64,
    pub status_cache_ttl_secs: i64,
    /// Most users with a cached status
    pub status_cache_capacity: usize,
}

impl Default for MiningConfig {
    fn default() -> Self {
        let phase = |name: &str, min_users, base_rate, daily_cap| Phase {
            name: name.to_string(),
            min_users,
            base_rate,
            daily_cap,
        };
        Self {
            phases: vec![
                phase("pioneer", 0, 0.1, 4.8),
                phase("growth", 100_000, 0.05, 1.8),
                phase("maturity", 1_000_000, 0.025, 0.72),
                phase("stability", 10_000_000, 0.01, 0.24),
            ],
            pioneer_decay_users: 1_000_000.0,
            referral_bonus_per_active: 0.1,
            kyc_bonus: 1.2,
            non_kyc_penalty: 0.8,
            regression_coefficient: 0.001,
            rp_bonus_per_tier: 0.2,
            min_hourly_rate: 0.0,
            min_claim_interval_secs: 3600,
            max_session_hours: 24.0,
            status_cache_ttl_secs: 30,
            status_cache_capacity: 10_000,
        }
    }
}

impl MiningConfig {
    pub fn validate(&self) -> Result<()> {
        let first = self
            .phases
            .first()
            .ok_or_else(|| RewardError::invalid("mining.phases is empty"))?;
        if first.min_users != 0 {
            return Err(RewardError::invalid("first mining phase must start at 0 users"));
        }
        for pair in self.phases.windows(2) {
            if pair[1].min_users <= pair[0].min_users {
                return Err(RewardError::invalid(
                    "mining.phases must be sorted by min_users",
                ));
            }
        }
        if self
            .phases
            .iter()
            .any(|p| p.base_rate <= 0.0 || p.daily_cap <= 0.0)
        {
            return Err(RewardError::invalid("mining phase rates and caps must be positive"));
        }
        if self.status_cache_capacity == 0 {
            return Err(RewardError::invalid("mining.status_cache_capacity must be > 0"));
        }
        if self.max_session_hours <= 0.0 || self.min_claim_interval_secs < 0 {
            return Err(RewardError::invalid("invalid mining session timing"));
        }
        Ok(())
    }
}

/// Everything the rate formula reads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningInputs {
    pub phase: Phase,
    pub network_users: u64,
    pub holdings: f64,
    pub active_referrals: u32,
    pub xp_level: u32,
    pub rp_tier_index: u32,
    pub kyc_verified: bool,
    pub quality_score: f64,
    pub boost_multiplier: f64,
}

impl MiningInputs {
    /// Inputs for a profile at `now`, with live mining boosts applied
    pub fn from_profile(
        profile: &UserRewardProfile,
        phase: Phase,
        network_users: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            phase,
            network_users,
            holdings: profile.holdings,
            active_referrals: profile.referral.snapshot.active_referrals,
            xp_level: profile.xp.level,
            rp_tier_index: profile.referral.tier.index(),
            kyc_verified: profile.kyc_verified,
            quality_score: profile.quality_score,
            boost_multiplier: boost::product(&profile.boosts, BoostTarget::Mining, now),
        }
    }

    pub fn with_boost(&self, boost_multiplier: f64) -> Self {
        Self {
            boost_multiplier,
            ..self.clone()
        }
    }
}

/// Per-factor attribution of a computed rate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateBreakdown {
    pub base_rate: f64,
    pub pioneer_bonus: f64,
    pub referral_bonus: f64,
    pub security_bonus: f64,
    pub xp_multiplier: f64,
    pub rp_multiplier: f64,
    pub quality_score: f64,
    pub regression_factor: f64,
    pub boost_multiplier: f64,
}

impl RateBreakdown {
    pub fn product(&self) -> f64 {
        self.base_rate
            * self.pioneer_bonus
            * self.referral_bonus
            * self.security_bonus
            * self.xp_multiplier
            * self.rp_multiplier
            * self.quality_score
            * self.regression_factor
            * self.boost_multiplier
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiningRate {
    /// Paid hourly rate after the daily-cap clamp
    pub hourly_rate: f64,
    pub unclamped_rate: f64,
    /// Hourly amount above the cap; reported, never paid
    pub excess_hourly: f64,
    pub daily_cap: f64,
    pub phase: String,
    pub breakdown: RateBreakdown,
}

#[derive(Debug, Clone)]
pub struct MiningCalculator {
    config: MiningConfig,
}

impl MiningCalculator {
    pub fn new(config: MiningConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MiningConfig {
        &self.config
    }

    /// Phase for the current network size. Phases are sorted, so the last
    /// band whose threshold has been reached wins.
    pub fn phase_for(&self, network_users: u64) -> Phase {
        self.config
            .phases
            .iter()
            .rev()
            .find(|p| network_users >= p.min_users)
            .or_else(|| self.config.phases.first())
            .cloned()
            .unwrap_or_else(|| MiningConfig::default().phases[0].clone())
    }

    pub fn pioneer_bonus(&self, network_users: u64) -> f64 {
        (2.0 - network_users as f64 / self.config.pioneer_decay_users).max(1.0)
    }

    pub fn regression_factor(&self, holdings: f64) -> f64 {
        (-self.config.regression_coefficient * holdings.max(0.0)).exp()
    }

    pub fn breakdown(&self, inputs: &MiningInputs) -> RateBreakdown {
        let security_bonus = if inputs.kyc_verified {
            self.config.kyc_bonus
        } else {
            self.config.non_kyc_penalty
        };
        RateBreakdown {
            base_rate: inputs.phase.base_rate,
            pioneer_bonus: self.pioneer_bonus(inputs.network_users),
            referral_bonus: 1.0
                + self.config.referral_bonus_per_active * inputs.active_referrals as f64,
            security_bonus,
            xp_multiplier: 1.0 + inputs.xp_level as f64 / 100.0,
            rp_multiplier: 1.0 + self.config.rp_bonus_per_tier * inputs.rp_tier_index as f64,
            quality_score: clamp_quality(inputs.quality_score),
            regression_factor: self.regression_factor(inputs.holdings),
            boost_multiplier: inputs.boost_multiplier.max(1.0),
        }
    }

    pub fn calculate(&self, inputs: &MiningInputs) -> MiningRate {
        let breakdown = self.breakdown(inputs);
        let unclamped_rate = breakdown.product();
        let max_hourly = inputs.phase.daily_cap / HOURS_PER_DAY;
        let hourly_rate = unclamped_rate
            .max(self.config.min_hourly_rate)
            .min(max_hourly);

        MiningRate {
            hourly_rate,
            unclamped_rate,
            excess_hourly: (unclamped_rate - hourly_rate).max(0.0),
            daily_cap: inputs.phase.daily_cap,
            phase: inputs.phase.name.clone(),
            breakdown,
        }
    }
}

fn clamp_quality(q: f64) -> f64 {
    if q.is_finite() {
        q.clamp(MIN_QUALITY_SCORE, MAX_QUALITY_SCORE)
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calculator() -> MiningCalculator {
        MiningCalculator::new(MiningConfig::default())
    }

    fn inputs(base_rate: f64, daily_cap: f64) -> MiningInputs {
        MiningInputs {
            phase: Phase {
                name: "test".to_string(),
                min_users: 0,
                base_rate,
                daily_cap,
            },
            network_users: 0,
            holdings: 0.0,
            active_referrals: 0,
            xp_level: 1,
            rp_tier_index: 0,
            kyc_verified: true,
            quality_score: 1.0,
            boost_multiplier: 1.0,
        }
    }

    #[test]
    fn test_reference_rate() {
        let rate = calculator().calculate(&inputs(0.05, 10.0));
        // 0.05 × 2.0 × 1.0 × 1.2 × 1.01
        assert!((rate.hourly_rate - 0.1212).abs() < 1e-9);
        assert_eq!(rate.excess_hourly, 0.0);
        assert_eq!(rate.breakdown.pioneer_bonus, 2.0);
        assert_eq!(rate.breakdown.security_bonus, 1.2);
    }

    #[test]
    fn test_phase_selection() {
        let calc = calculator();
        assert_eq!(calc.phase_for(0).name, "pioneer");
        assert_eq!(calc.phase_for(99_999).name, "pioneer");
        assert_eq!(calc.phase_for(100_000).name, "growth");
        assert_eq!(calc.phase_for(5_000_000).base_rate, 0.025);
        assert_eq!(calc.phase_for(u64::MAX).daily_cap, 0.24);
    }

    #[test]
    fn test_pioneer_bonus_never_below_one() {
        let calc = calculator();
        assert_eq!(calc.pioneer_bonus(0), 2.0);
        assert!((calc.pioneer_bonus(500_000) - 1.5).abs() < 1e-12);
        assert_eq!(calc.pioneer_bonus(1_000_000), 1.0);
        assert_eq!(calc.pioneer_bonus(50_000_000), 1.0);
    }

    #[test]
    fn test_regression_strictly_decreasing_in_holdings() {
        let calc = calculator();
        let mut prev_rate = f64::INFINITY;
        let mut prev_factor = f64::INFINITY;
        for holdings in [0.0, 1.0, 10.0, 100.0, 1_000.0, 5_000.0, 7_000.0] {
            let mut i = inputs(0.05, 10.0);
            i.holdings = holdings;
            let rate = calc.calculate(&i);
            assert!(rate.breakdown.regression_factor < prev_factor);
            assert!(rate.hourly_rate < prev_rate);
            prev_factor = rate.breakdown.regression_factor;
            prev_rate = rate.hourly_rate;
        }
        assert!(calc.regression_factor(7_000.0) < 0.001);
    }

    #[test]
    fn test_rate_clamped_to_daily_cap() {
        let calc = calculator();
        let mut i = inputs(0.1, 4.8);
        i.active_referrals = 50;
        i.xp_level = 100;
        i.rp_tier_index = 4;
        i.quality_score = 2.0;
        i.boost_multiplier = 6.0;

        let rate = calc.calculate(&i);
        assert!(rate.unclamped_rate > rate.hourly_rate);
        assert!((rate.hourly_rate * HOURS_PER_DAY - 4.8).abs() < 1e-9);
        assert!((rate.excess_hourly - (rate.unclamped_rate - rate.hourly_rate)).abs() < 1e-12);
    }

    #[test]
    fn test_unverified_and_quality_clamp() {
        let calc = calculator();
        let mut i = inputs(0.05, 10.0);
        i.kyc_verified = false;
        i.quality_score = 9.0;
        let b = calc.breakdown(&i);
        assert_eq!(b.security_bonus, 0.8);
        assert_eq!(b.quality_score, 2.0);

        i.quality_score = 0.01;
        assert_eq!(calc.breakdown(&i).quality_score, 0.5);
    }

    #[test]
    fn test_config_validation() {
        assert!(MiningConfig::default().validate().is_ok());

        let mut unsorted = MiningConfig::default();
        unsorted.phases.swap(1, 2);
        assert!(unsorted.validate().is_err());

        let mut empty = MiningConfig::default();
        empty.phases.clear();
        assert!(empty.validate().is_err());
    }
}
