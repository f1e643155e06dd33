//! Time-bounded reward multipliers
//!
//! Boosts expire on read: nothing ticks in the background. A boost is live
//! while `now <= expires_at`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, RewardError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoostKind {
    DoubleMining,
    TripleMining,
    MiningFrenzy,
    EternalMiner,
    DoubleXp,
    ReferralBoost,
}

/// Which reward stream a boost multiplies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoostTarget {
    Mining,
    Xp,
    Referral,
}

/// Catalog entry describing how a boost kind behaves
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoostSpec {
    pub kind: BoostKind,
    pub target: BoostTarget,
    pub magnitude: f64,
    pub duration_secs: i64,
    pub stackable: bool,
    pub max_stacks: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostCatalog {
    pub boosts: Vec<BoostSpec>,
}

impl Default for BoostCatalog {
    fn default() -> Self {
        let spec = |kind, target, magnitude, hours: i64, stackable, max_stacks| BoostSpec {
            kind,
            target,
            magnitude,
            duration_secs: hours * 3600,
            stackable,
            max_stacks,
        };
        Self {
            boosts: vec![
                spec(BoostKind::DoubleMining, BoostTarget::Mining, 2.0, 24, true, 3),
                spec(BoostKind::TripleMining, BoostTarget::Mining, 3.0, 12, false, 1),
                spec(BoostKind::MiningFrenzy, BoostTarget::Mining, 6.0, 4, false, 1),
                spec(BoostKind::EternalMiner, BoostTarget::Mining, 1.5, 24 * 30, true, 2),
                spec(BoostKind::DoubleXp, BoostTarget::Xp, 2.0, 24, false, 1),
                spec(BoostKind::ReferralBoost, BoostTarget::Referral, 1.5, 24 * 7, false, 1),
            ],
        }
    }
}

impl BoostCatalog {
    pub fn spec(&self, kind: BoostKind) -> Option<&BoostSpec> {
        self.boosts.iter().find(|s| s.kind == kind)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Boost {
    pub kind: BoostKind,
    pub target: BoostTarget,
    pub magnitude: f64,
    pub stacks: u32,
    pub activated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Boost {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at
    }

    /// Stacks add the bonus part linearly: `1 + (magnitude - 1) * stacks`
    pub fn multiplier(&self) -> f64 {
        (1.0 + (self.magnitude - 1.0) * self.stacks as f64).max(0.0)
    }
}

/// Activate (or stack) a boost on a profile's boost set.
///
/// Expired boosts are dropped first. Re-activating a stackable boost adds a
/// stack and refreshes its expiry; a non-stackable boost that is still live
/// is refused.
pub fn activate(
    boosts: &mut Vec<Boost>,
    kind: BoostKind,
    catalog: &BoostCatalog,
    now: DateTime<Utc>,
) -> Result<Boost> {
    let spec = catalog
        .spec(kind)
        .ok_or_else(|| RewardError::invalid(format!("unknown boost {:?}", kind)))?;
    if spec.magnitude < 1.0 || spec.duration_secs <= 0 || spec.max_stacks == 0 {
        return Err(RewardError::invalid(format!(
            "boost {:?} is misconfigured",
            kind
        )));
    }

    boosts.retain(|b| b.is_active(now));
    let expires_at = now + Duration::seconds(spec.duration_secs);

    if let Some(existing) = boosts.iter_mut().find(|b| b.kind == kind) {
        if !spec.stackable {
            return Err(RewardError::limit(
                format!("{:?} already active", kind),
                Some(existing.expires_at),
            ));
        }
        if existing.stacks >= spec.max_stacks {
            return Err(RewardError::limit(
                format!("{:?} at max stack {}", kind, spec.max_stacks),
                Some(existing.expires_at),
            ));
        }
        existing.stacks += 1;
        existing.expires_at = expires_at;
        debug!("Stacked {:?} to {} (expires {})", kind, existing.stacks, expires_at);
        return Ok(existing.clone());
    }

    let boost = Boost {
        kind,
        target: spec.target,
        magnitude: spec.magnitude,
        stacks: 1,
        activated_at: now,
        expires_at,
    };
    boosts.push(boost.clone());
    Ok(boost)
}

/// Product of live boost multipliers for one target
pub fn product(boosts: &[Boost], target: BoostTarget, now: DateTime<Utc>) -> f64 {
    boosts
        .iter()
        .filter(|b| b.target == target && b.is_active(now))
        .map(Boost::multiplier)
        .product()
}

/// Expiry instants of `target` boosts strictly inside `(from, to)`, ascending
pub fn expiries_between(
    boosts: &[Boost],
    target: BoostTarget,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Vec<DateTime<Utc>> {
    let mut cuts: Vec<_> = boosts
        .iter()
        .filter(|b| b.target == target && b.expires_at > from && b.expires_at < to)
        .map(|b| b.expires_at)
        .collect();
    cuts.sort();
    cuts.dedup();
    cuts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_stackable_boost_respects_max() {
        let catalog = BoostCatalog::default();
        let mut boosts = Vec::new();

        for expected in 1..=3 {
            let b = activate(&mut boosts, BoostKind::DoubleMining, &catalog, t0()).unwrap();
            assert_eq!(b.stacks, expected);
        }
        assert_eq!(boosts.len(), 1);
        assert!((boosts[0].multiplier() - 4.0).abs() < 1e-12);

        let err = activate(&mut boosts, BoostKind::DoubleMining, &catalog, t0()).unwrap_err();
        assert!(matches!(err, RewardError::LimitExceeded { .. }));
    }

    #[test]
    fn test_non_stackable_boost_refused_while_live() {
        let catalog = BoostCatalog::default();
        let mut boosts = Vec::new();
        activate(&mut boosts, BoostKind::MiningFrenzy, &catalog, t0()).unwrap();
        assert!(activate(&mut boosts, BoostKind::MiningFrenzy, &catalog, t0()).is_err());

        // After expiry the same boost can be bought again
        let later = t0() + Duration::hours(5);
        let b = activate(&mut boosts, BoostKind::MiningFrenzy, &catalog, later).unwrap();
        assert_eq!(b.activated_at, later);
        assert_eq!(boosts.len(), 1);
    }

    #[test]
    fn test_product_and_expiry_on_read() {
        let catalog = BoostCatalog::default();
        let mut boosts = Vec::new();
        activate(&mut boosts, BoostKind::TripleMining, &catalog, t0()).unwrap();
        activate(&mut boosts, BoostKind::DoubleXp, &catalog, t0()).unwrap();

        assert_eq!(product(&boosts, BoostTarget::Mining, t0()), 3.0);
        assert_eq!(product(&boosts, BoostTarget::Xp, t0()), 2.0);
        assert_eq!(product(&boosts, BoostTarget::Referral, t0()), 1.0);

        // Expiry is inclusive of the instant itself, exclusive after
        let expiry = t0() + Duration::hours(12);
        assert_eq!(product(&boosts, BoostTarget::Mining, expiry), 3.0);
        assert_eq!(
            product(&boosts, BoostTarget::Mining, expiry + Duration::seconds(1)),
            1.0
        );

        let cuts = expiries_between(&boosts, BoostTarget::Mining, t0(), t0() + Duration::days(1));
        assert_eq!(cuts, vec![expiry]);
    }
}
