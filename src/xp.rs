//! XP engine
//!
//! `xp = floor(baseXP × platform × quality × streak × levelProgression × event)`
//!
//! Level is derived from cumulative XP through a configurable curve and never
//! decreases. Daily per-activity ceilings are counted per UTC day.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, RewardError};
use crate::types::{next_utc_midnight, ActivityType, Platform};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum XpTier {
    Bronze,
    Silver,
    Gold,
    Platinum,
    Diamond,
    Mythic,
}

impl XpTier {
    pub fn from_level(level: u32) -> Self {
        match level {
            0..=10 => XpTier::Bronze,
            11..=25 => XpTier::Silver,
            26..=50 => XpTier::Gold,
            51..=75 => XpTier::Platinum,
            76..=100 => XpTier::Diamond,
            _ => XpTier::Mythic,
        }
    }
}

/// Mining multiplier contributed by an XP level
pub fn xp_mining_multiplier(level: u32) -> f64 {
    1.0 + level as f64 / 100.0
}

// ============================================================================
// LEVEL CURVE
// ============================================================================

/// Linear segment of a banded level curve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelBand {
    pub start_xp: u64,
    pub start_level: u32,
    pub xp_per_level: u64,
}

/// XP → level policy. Both variants are monotone and concave in XP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum LevelCurve {
    /// Piecewise-linear bands with growing XP per level
    Banded { bands: Vec<LevelBand> },
    /// XP needed for level n → n+1 is `base_xp × growth^(n-1)`
    Geometric { base_xp: f64, growth: f64 },
}

impl Default for LevelCurve {
    fn default() -> Self {
        let band = |start_xp, start_level, xp_per_level| LevelBand {
            start_xp,
            start_level,
            xp_per_level,
        };
        LevelCurve::Banded {
            bands: vec![
                band(0, 1, 100),
                band(1_000, 11, 266),
                band(5_000, 26, 600),
                band(20_000, 51, 1_200),
                band(50_000, 76, 2_000),
                band(100_000, 101, 5_000),
            ],
        }
    }
}

impl LevelCurve {
    pub fn validate(&self) -> Result<()> {
        match self {
            LevelCurve::Banded { bands } => {
                let first = bands
                    .first()
                    .ok_or_else(|| RewardError::invalid("level curve has no bands"))?;
                if first.start_xp != 0 || first.start_level == 0 {
                    return Err(RewardError::invalid(
                        "first level band must start at 0 XP and level >= 1",
                    ));
                }
                for pair in bands.windows(2) {
                    let (a, b) = (&pair[0], &pair[1]);
                    if b.start_xp <= a.start_xp || b.start_level < a.start_level {
                        return Err(RewardError::invalid("level bands must be increasing"));
                    }
                    if b.xp_per_level < a.xp_per_level {
                        return Err(RewardError::invalid(
                            "level bands must not get cheaper (curve must be concave)",
                        ));
                    }
                }
                if bands.iter().any(|b| b.xp_per_level == 0) {
                    return Err(RewardError::invalid("xp_per_level must be positive"));
                }
                Ok(())
            }
            LevelCurve::Geometric { base_xp, growth } => {
                if *base_xp <= 0.0 || *growth < 1.0 {
                    return Err(RewardError::invalid(
                        "geometric curve needs base_xp > 0 and growth >= 1",
                    ));
                }
                Ok(())
            }
        }
    }

    pub fn level_for(&self, total_xp: u64) -> u32 {
        match self {
            LevelCurve::Banded { bands } => {
                let Some(i) = bands.iter().rposition(|b| total_xp >= b.start_xp) else {
                    return 1;
                };
                let band = &bands[i];
                let steps = (total_xp - band.start_xp) / band.xp_per_level.max(1);
                let level = band
                    .start_level
                    .saturating_add(u32::try_from(steps).unwrap_or(u32::MAX));
                // A band stops one level short of where the next band starts
                match bands.get(i + 1) {
                    Some(next) => level
                        .min(next.start_level.saturating_sub(1))
                        .max(band.start_level),
                    None => level,
                }
            }
            LevelCurve::Geometric { base_xp, growth } => {
                let xp = total_xp as f64;
                let steps = if (*growth - 1.0).abs() < f64::EPSILON {
                    xp / base_xp
                } else {
                    (1.0 + xp * (growth - 1.0) / base_xp).ln() / growth.ln()
                };
                let mut level = 1 + steps.floor().clamp(0.0, 1_000_000.0) as u32;
                // Float rounding can land one step off at exact boundaries
                while level > 1 && self.xp_for_level(level) > total_xp {
                    level -= 1;
                }
                while level < 1_000_000 && self.xp_for_level(level + 1) <= total_xp {
                    level += 1;
                }
                level
            }
        }
    }

    /// Cumulative XP at which `level` is reached
    pub fn xp_for_level(&self, level: u32) -> u64 {
        let level = level.max(1);
        match self {
            LevelCurve::Banded { bands } => {
                let Some(i) = bands.iter().rposition(|b| level >= b.start_level) else {
                    return 0;
                };
                let band = &bands[i];
                let xp = band
                    .start_xp
                    .saturating_add((level - band.start_level) as u64 * band.xp_per_level);
                // Levels a short band skips are reached at the next band's start
                match bands.get(i + 1) {
                    Some(next) => xp.min(next.start_xp),
                    None => xp,
                }
            }
            LevelCurve::Geometric { base_xp, growth } => {
                let n = (level - 1) as f64;
                let xp = if (*growth - 1.0).abs() < f64::EPSILON {
                    base_xp * n
                } else {
                    base_xp * (growth.powf(n) - 1.0) / (growth - 1.0)
                };
                xp.ceil().min(u64::MAX as f64) as u64
            }
        }
    }
}

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRule {
    pub activity: ActivityType,
    pub base_xp: u32,
    /// `None` means uncapped
    #[serde(default)]
    pub daily_limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformMultiplier {
    pub platform: Platform,
    pub multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct XpConfig {
    pub level_curve: LevelCurve,
    pub activities: Vec<ActivityRule>,
    pub platform_multipliers: Vec<PlatformMultiplier>,
    pub streak_increment: f64,
    pub max_streak_bonus: f64,
    /// A gap longer than this resets the streak
    pub streak_window_hours: i64,
    pub level_decay: f64,
    /// Same content id from the same user inside this window is a duplicate
    pub duplicate_window_secs: i64,
    /// Global event multiplier (campaigns); boosts multiply on top
    pub event_multiplier: f64,
    pub recent_content_capacity: usize,
}

impl Default for XpConfig {
    fn default() -> Self {
        use ActivityType::*;
        let rule = |activity, base_xp, daily_limit| ActivityRule {
            activity,
            base_xp,
            daily_limit,
        };
        let platform = |platform, multiplier| PlatformMultiplier {
            platform,
            multiplier,
        };
        Self {
            level_curve: LevelCurve::default(),
            activities: vec![
                rule(OriginalPost, 50, None),
                rule(PhotoPost, 75, Some(20)),
                rule(VideoPost, 150, Some(10)),
                rule(Story, 25, Some(50)),
                rule(Comment, 25, Some(100)),
                rule(Like, 5, Some(200)),
                rule(Share, 15, Some(50)),
                rule(Follow, 20, Some(25)),
                rule(DailyLogin, 10, Some(1)),
                rule(DailyQuest, 100, Some(3)),
                rule(Milestone, 500, None),
                rule(ViralContent, 1000, None),
            ],
            platform_multipliers: vec![
                platform(Platform::Tiktok, 1.3),
                platform(Platform::Instagram, 1.2),
                platform(Platform::Youtube, 1.4),
                platform(Platform::X, 1.2),
                platform(Platform::Facebook, 1.1),
                platform(Platform::App, 1.0),
            ],
            streak_increment: 0.1,
            max_streak_bonus: 3.0,
            streak_window_hours: 48,
            level_decay: 0.01,
            duplicate_window_secs: 600,
            event_multiplier: 1.0,
            recent_content_capacity: 256,
        }
    }
}

impl XpConfig {
    pub fn validate(&self) -> Result<()> {
        self.level_curve.validate()?;
        for activity in ActivityType::ALL {
            if !self.activities.iter().any(|r| r.activity == activity) {
                return Err(RewardError::invalid(format!(
                    "xp.activities is missing {:?}",
                    activity
                )));
            }
        }
        if self.platform_multipliers.iter().any(|p| p.multiplier <= 0.0) {
            return Err(RewardError::invalid("platform multipliers must be positive"));
        }
        if self.max_streak_bonus < 1.0 || self.event_multiplier <= 0.0 {
            return Err(RewardError::invalid("invalid streak or event multiplier"));
        }
        Ok(())
    }
}

// ============================================================================
// STATE
// ============================================================================

/// Per-activity counts for one UTC day
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyActivityCounts {
    pub day: NaiveDate,
    pub counts: BTreeMap<ActivityType, u32>,
}

impl DailyActivityCounts {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            day: now.date_naive(),
            counts: BTreeMap::new(),
        }
    }

    /// Start a new day's counts. Only moves forward; an earlier `now` keeps
    /// the current day.
    pub fn roll(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today > self.day {
            self.day = today;
            self.counts.clear();
        }
    }

    pub fn get(&self, activity: ActivityType) -> u32 {
        self.counts.get(&activity).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentContent {
    pub content_id: String,
    pub seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XpState {
    pub total_xp: u64,
    pub level: u32,
    pub streak_days: u32,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub last_streak_day: Option<NaiveDate>,
    pub daily: DailyActivityCounts,
    #[serde(default)]
    pub recent_content: VecDeque<RecentContent>,
}

impl XpState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            total_xp: 0,
            level: 1,
            streak_days: 0,
            last_activity_at: None,
            last_streak_day: None,
            daily: DailyActivityCounts::new(now),
            recent_content: VecDeque::new(),
        }
    }

    pub fn tier(&self) -> XpTier {
        XpTier::from_level(self.level)
    }
}

// ============================================================================
// ENGINE
// ============================================================================

#[derive(Debug, Clone)]
pub struct XpRequest<'a> {
    pub activity: ActivityType,
    pub platform: Platform,
    pub content_id: Option<&'a str>,
    /// Effective content quality multiplier
    pub quality_score: f64,
    /// Product of live XP boosts
    pub boost_multiplier: f64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XpBreakdown {
    pub base_xp: u32,
    pub platform_multiplier: f64,
    pub quality_score: f64,
    pub streak_bonus: f64,
    pub level_progression: f64,
    pub event_multiplier: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelUp {
    pub from: u32,
    pub to: u32,
    pub tier: XpTier,
    pub tier_changed: bool,
    pub mining_multiplier: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XpAward {
    pub xp_gained: u64,
    pub total_xp: u64,
    pub level: u32,
    pub streak_days: u32,
    pub level_up: Option<LevelUp>,
    pub breakdown: XpBreakdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum XpRejection {
    /// Same content reference resubmitted inside the duplicate window
    DuplicateContent,
    /// Computed XP was zero; nothing credited
    NoCredit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum XpOutcome {
    Awarded(XpAward),
    Rejected { reason: XpRejection },
}

#[derive(Debug, Clone)]
pub struct XpEngine {
    config: XpConfig,
}

impl XpEngine {
    pub fn new(config: XpConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &XpConfig {
        &self.config
    }

    pub fn rule(&self, activity: ActivityType) -> Option<&ActivityRule> {
        self.config.activities.iter().find(|r| r.activity == activity)
    }

    pub fn platform_multiplier(&self, platform: Platform) -> f64 {
        self.config
            .platform_multipliers
            .iter()
            .find(|p| p.platform == platform)
            .map(|p| p.multiplier)
            .unwrap_or(1.0)
    }

    pub fn streak_bonus(&self, streak_days: u32) -> f64 {
        (1.0 + self.config.streak_increment * streak_days as f64)
            .min(self.config.max_streak_bonus)
    }

    pub fn level_progression(&self, level: u32) -> f64 {
        (-self.config.level_decay * level as f64).exp()
    }

    pub fn level_for(&self, total_xp: u64) -> u32 {
        self.config.level_curve.level_for(total_xp)
    }

    pub fn xp_to_next_level(&self, state: &XpState) -> u64 {
        self.config
            .level_curve
            .xp_for_level(state.level.saturating_add(1))
            .saturating_sub(state.total_xp)
    }

    /// Whether this content id was already submitted inside the duplicate window
    pub fn is_duplicate(&self, state: &XpState, content_id: &str, now: DateTime<Utc>) -> bool {
        let window = Duration::seconds(self.config.duplicate_window_secs);
        state
            .recent_content
            .iter()
            .any(|c| c.content_id == content_id && now - c.seen_at <= window)
    }

    /// Streak after an activity at `now`: resets past the inactivity window,
    /// otherwise grows at most once per UTC day.
    fn next_streak(&self, state: &XpState, now: DateTime<Utc>) -> u32 {
        let window = Duration::hours(self.config.streak_window_hours);
        match state.last_activity_at {
            None => 0,
            Some(last) if now - last > window => 0,
            Some(_) if state.last_streak_day >= Some(now.date_naive()) => state.streak_days,
            Some(_) => state.streak_days + 1,
        }
    }

    /// Compute and apply an XP award.
    ///
    /// Limit violations are errors (retryable next UTC day). Duplicates and
    /// zero awards are rejections that leave the state untouched.
    pub fn award(&self, state: &mut XpState, req: &XpRequest<'_>) -> Result<XpOutcome> {
        let now = req.at;
        if !req.quality_score.is_finite() || req.quality_score < 0.0 {
            return Err(RewardError::invalid("quality score must be finite and >= 0"));
        }
        let rule = self
            .rule(req.activity)
            .ok_or_else(|| RewardError::invalid(format!("no XP rule for {:?}", req.activity)))?
            .clone();

        if now.date_naive() < state.daily.day {
            return Err(RewardError::invalid(format!(
                "activity on {} predates the current day {}",
                now.date_naive(),
                state.daily.day
            )));
        }
        state.daily.roll(now);

        if let Some(content_id) = req.content_id {
            if self.is_duplicate(state, content_id, now) {
                debug!("Duplicate content {} rejected", content_id);
                return Ok(XpOutcome::Rejected {
                    reason: XpRejection::DuplicateContent,
                });
            }
        }

        if let Some(limit) = rule.daily_limit {
            if state.daily.get(req.activity) >= limit {
                return Err(RewardError::limit(
                    format!("{:?} daily limit {}", req.activity, limit),
                    Some(next_utc_midnight(now)),
                ));
            }
        }

        let streak_days = self.next_streak(state, now);
        let breakdown = XpBreakdown {
            base_xp: rule.base_xp,
            platform_multiplier: self.platform_multiplier(req.platform),
            quality_score: req.quality_score.min(2.0),
            streak_bonus: self.streak_bonus(streak_days),
            level_progression: self.level_progression(state.level),
            event_multiplier: self.config.event_multiplier * req.boost_multiplier.max(1.0),
        };
        let raw = breakdown.base_xp as f64
            * breakdown.platform_multiplier
            * breakdown.quality_score
            * breakdown.streak_bonus
            * breakdown.level_progression
            * breakdown.event_multiplier;
        let xp_gained = if raw.is_finite() { raw.floor().max(0.0) as u64 } else { 0 };

        if xp_gained == 0 {
            debug!("{:?} computed zero XP, nothing credited", req.activity);
            return Ok(XpOutcome::Rejected {
                reason: XpRejection::NoCredit,
            });
        }

        let previous_level = state.level;
        state.total_xp = state.total_xp.saturating_add(xp_gained);
        state.level = previous_level.max(self.level_for(state.total_xp));
        state.streak_days = streak_days;
        state.last_streak_day = state.last_streak_day.max(Some(now.date_naive()));
        state.last_activity_at = state.last_activity_at.max(Some(now));
        *state.daily.counts.entry(req.activity).or_insert(0) += 1;

        if let Some(content_id) = req.content_id {
            let window = Duration::seconds(self.config.duplicate_window_secs);
            state.recent_content.retain(|c| now - c.seen_at <= window);
            state.recent_content.push_back(RecentContent {
                content_id: content_id.to_string(),
                seen_at: now,
            });
            while state.recent_content.len() > self.config.recent_content_capacity {
                state.recent_content.pop_front();
            }
        }

        let level_up = (state.level > previous_level).then(|| {
            let tier = XpTier::from_level(state.level);
            info!("Level up {} -> {} ({:?})", previous_level, state.level, tier);
            LevelUp {
                from: previous_level,
                to: state.level,
                tier,
                tier_changed: tier != XpTier::from_level(previous_level),
                mining_multiplier: xp_mining_multiplier(state.level),
            }
        });

        Ok(XpOutcome::Awarded(XpAward {
            xp_gained,
            total_xp: state.total_xp,
            level: state.level,
            streak_days,
            level_up,
            breakdown,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn engine() -> XpEngine {
        XpEngine::new(XpConfig::default())
    }

    fn day(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, d, h, 0, 0).unwrap()
    }

    fn request(activity: ActivityType, content_id: Option<&str>, at: DateTime<Utc>) -> XpRequest<'_> {
        XpRequest {
            activity,
            platform: Platform::Tiktok,
            content_id,
            quality_score: 1.0,
            boost_multiplier: 1.0,
            at,
        }
    }

    fn awarded(outcome: XpOutcome) -> XpAward {
        match outcome {
            XpOutcome::Awarded(a) => a,
            other => panic!("expected award, got {:?}", other),
        }
    }

    #[test]
    fn test_reference_award() {
        let engine = engine();
        let mut state = XpState::new(day(1, 9));
        let award = awarded(
            engine
                .award(&mut state, &request(ActivityType::OriginalPost, Some("p1"), day(1, 9)))
                .unwrap(),
        );
        // floor(50 × 1.3 × 1 × 1 × e^-0.01)
        assert_eq!(award.xp_gained, 64);
        assert_eq!(award.breakdown.streak_bonus, 1.0);
        assert_eq!(state.total_xp, 64);
    }

    #[test]
    fn test_duplicate_content_rejected_without_state_change() {
        let engine = engine();
        let mut state = XpState::new(day(1, 9));
        engine
            .award(&mut state, &request(ActivityType::OriginalPost, Some("p1"), day(1, 9)))
            .unwrap();
        let before = state.total_xp;

        let again = engine
            .award(&mut state, &request(ActivityType::OriginalPost, Some("p1"), day(1, 9)))
            .unwrap();
        assert_eq!(
            again,
            XpOutcome::Rejected {
                reason: XpRejection::DuplicateContent
            }
        );
        assert_eq!(state.total_xp, before);

        // Outside the window the same id scores again
        let later = day(1, 10);
        assert!(matches!(
            engine
                .award(&mut state, &request(ActivityType::OriginalPost, Some("p1"), later))
                .unwrap(),
            XpOutcome::Awarded(_)
        ));
    }

    #[test]
    fn test_daily_limit_is_all_or_nothing() {
        let engine = engine();
        let mut state = XpState::new(day(1, 9));
        engine
            .award(&mut state, &request(ActivityType::DailyLogin, None, day(1, 9)))
            .unwrap();
        let total = state.total_xp;

        let err = engine
            .award(&mut state, &request(ActivityType::DailyLogin, None, day(1, 10)))
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(state.total_xp, total);

        // Next UTC day the counter rolls over
        assert!(engine
            .award(&mut state, &request(ActivityType::DailyLogin, None, day(2, 0)))
            .is_ok());
    }

    #[test]
    fn test_zero_xp_fails_closed() {
        let engine = engine();
        let mut state = XpState::new(day(1, 9));
        let mut req = request(ActivityType::Like, None, day(1, 9));
        req.quality_score = 0.1;
        // floor(5 × 1.3 × 0.1 × ...) == 0
        let outcome = engine.award(&mut state, &req).unwrap();
        assert_eq!(
            outcome,
            XpOutcome::Rejected {
                reason: XpRejection::NoCredit
            }
        );
        assert_eq!(state.total_xp, 0);
        assert_eq!(state.daily.get(ActivityType::Like), 0);
        assert!(state.last_activity_at.is_none());
    }

    #[test]
    fn test_streak_grows_once_per_day_and_resets() {
        let engine = engine();
        let mut state = XpState::new(day(1, 9));
        let like = |at| request(ActivityType::Like, None, at);

        engine.award(&mut state, &like(day(1, 9))).unwrap();
        assert_eq!(state.streak_days, 0);
        engine.award(&mut state, &like(day(1, 20))).unwrap();
        assert_eq!(state.streak_days, 0);
        engine.award(&mut state, &like(day(2, 8))).unwrap();
        assert_eq!(state.streak_days, 1);
        engine.award(&mut state, &like(day(3, 8))).unwrap();
        assert_eq!(state.streak_days, 2);

        // More than 48h of silence resets
        let award = awarded(engine.award(&mut state, &like(day(6, 9))).unwrap());
        assert_eq!(award.streak_days, 0);
        assert_eq!(award.breakdown.streak_bonus, 1.0);
    }

    #[test]
    fn test_streak_bonus_capped() {
        let engine = engine();
        assert_eq!(engine.streak_bonus(0), 1.0);
        assert!((engine.streak_bonus(5) - 1.5).abs() < 1e-12);
        assert_eq!(engine.streak_bonus(20), 3.0);
        assert_eq!(engine.streak_bonus(500), 3.0);
    }

    #[test]
    fn test_level_monotone_and_level_up_reported() {
        let engine = engine();
        let mut state = XpState::new(day(1, 0));
        let mut last_level = state.level;
        let mut saw_level_up = false;
        for i in 0..40 {
            let id = format!("video-{}", i);
            let at = day(1 + (i / 10) as u32, 1 + (i % 10) as u32);
            let outcome = engine
                .award(&mut state, &request(ActivityType::VideoPost, Some(id.as_str()), at))
                .unwrap();
            let award = awarded(outcome);
            assert!(award.level >= last_level);
            if let Some(up) = award.level_up {
                saw_level_up = true;
                assert_eq!(up.from, last_level);
                assert_eq!(up.mining_multiplier, xp_mining_multiplier(up.to));
            }
            last_level = award.level;
        }
        assert!(saw_level_up);
        assert!(state.level > 1);
    }

    #[test]
    fn test_banded_curve() {
        let curve = LevelCurve::default();
        assert_eq!(curve.level_for(0), 1);
        assert_eq!(curve.level_for(99), 1);
        assert_eq!(curve.level_for(100), 2);
        assert_eq!(curve.level_for(999), 10);
        assert_eq!(curve.level_for(1_000), 11);
        assert_eq!(curve.level_for(100_000), 101);
        assert_eq!(curve.xp_for_level(2), 100);
        assert_eq!(curve.xp_for_level(11), 1_000);
        // The 266-per-level band ends at level 25; 26 starts at 5000 XP
        assert_eq!(curve.level_for(4_990), 25);
        assert_eq!(curve.level_for(5_000), 26);
        assert_eq!(curve.xp_for_level(26), 5_000);

        let mut prev = 0;
        for xp in (0..200_000).step_by(137) {
            let level = curve.level_for(xp);
            assert!(level >= prev);
            prev = level;
        }
    }

    #[test]
    fn test_banded_curve_threshold_is_inverse_of_level() {
        let curve = LevelCurve::default();
        for level in 1..=130u32 {
            let xp = curve.xp_for_level(level);
            assert!(curve.level_for(xp) >= level, "level {} at {} XP", level, xp);
            if xp > 0 {
                assert!(curve.level_for(xp - 1) < level, "level {} before {} XP", level, xp);
            }
        }

        // A band too short to reach the next start skips levels
        let short = LevelCurve::Banded {
            bands: vec![
                LevelBand { start_xp: 0, start_level: 1, xp_per_level: 100 },
                LevelBand { start_xp: 250, start_level: 10, xp_per_level: 100 },
            ],
        };
        assert_eq!(short.level_for(249), 3);
        assert_eq!(short.level_for(250), 10);
        assert_eq!(short.xp_for_level(5), 250);
        assert_eq!(short.xp_for_level(11), 350);
    }

    #[test]
    fn test_earlier_day_neither_rolls_back_nor_resets_limits() {
        let engine = engine();
        let mut state = XpState::new(day(2, 9));
        engine
            .award(&mut state, &request(ActivityType::DailyLogin, None, day(2, 9)))
            .unwrap();
        engine
            .award(&mut state, &request(ActivityType::Like, None, day(2, 10)))
            .unwrap();
        let (total, streak) = (state.total_xp, state.streak_days);

        let err = engine
            .award(&mut state, &request(ActivityType::DailyLogin, None, day(1, 9)))
            .unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(state.daily.day, day(2, 0).date_naive());
        assert_eq!(state.daily.get(ActivityType::DailyLogin), 1);
        assert_eq!(state.total_xp, total);

        // Same day, earlier hour: still the same window and the same streak
        let err = engine
            .award(&mut state, &request(ActivityType::DailyLogin, None, day(2, 8)))
            .unwrap_err();
        assert!(err.is_retryable());
        engine
            .award(&mut state, &request(ActivityType::Like, None, day(2, 8)))
            .unwrap();
        assert_eq!(state.streak_days, streak);
        assert_eq!(state.last_activity_at, Some(day(2, 10)));

        let mut counts = DailyActivityCounts::new(day(2, 9));
        counts.counts.insert(ActivityType::Like, 3);
        counts.roll(day(1, 23));
        assert_eq!(counts.get(ActivityType::Like), 3);
    }

    #[test]
    fn test_geometric_curve() {
        let curve = LevelCurve::Geometric {
            base_xp: 100.0,
            growth: 1.5,
        };
        assert!(curve.validate().is_ok());
        assert_eq!(curve.level_for(0), 1);
        assert_eq!(curve.level_for(99), 1);
        // 100 for L2, +150 for L3
        assert_eq!(curve.level_for(100), 2);
        assert_eq!(curve.level_for(249), 2);
        assert_eq!(curve.level_for(250), 3);
        assert_eq!(curve.xp_for_level(3), 250);
    }

    #[test]
    fn test_tiers() {
        assert_eq!(XpTier::from_level(1), XpTier::Bronze);
        assert_eq!(XpTier::from_level(11), XpTier::Silver);
        assert_eq!(XpTier::from_level(50), XpTier::Gold);
        assert_eq!(XpTier::from_level(51), XpTier::Platinum);
        assert_eq!(XpTier::from_level(100), XpTier::Diamond);
        assert_eq!(XpTier::from_level(101), XpTier::Mythic);
    }
}
