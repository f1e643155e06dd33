//! Anti-bot scorer
//!
//! Blends four independent behavioral signals into a human probability in
//! `[0, 1]`. Each coordinator operation has its own threshold; falling below
//! it refuses the operation with `SuspiciousActivity`. When the signal
//! source cannot answer the scorer fails closed.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::collaborators::SignalSource;
use crate::error::{CollaboratorError, Result, RewardError};
use crate::types::{ActivityEvent, DeviceSignals, SocialSignals};

/// Raw signals for one user, as supplied by the signal collaborator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BehaviorSignals {
    /// Gaps between consecutive actions, oldest first
    pub action_intervals_ms: Vec<u64>,
    pub device: Option<DeviceSignals>,
    /// Distinct device fingerprints seen for the user
    pub fingerprints_seen: u32,
    pub biometric_consistency: Option<f64>,
    pub social: Option<SocialSignals>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalWeights {
    pub timing: f64,
    pub device: f64,
    pub biometric: f64,
    pub social: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            timing: 0.35,
            device: 0.20,
            biometric: 0.25,
            social: 0.20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    RecordActivity,
    ActivateBoost,
    StartMining,
    Claim,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationThresholds {
    pub record_activity: f64,
    pub activate_boost: f64,
    pub start_mining: f64,
    pub claim: f64,
}

impl Default for OperationThresholds {
    fn default() -> Self {
        Self {
            record_activity: 0.3,
            activate_boost: 0.4,
            start_mining: 0.5,
            claim: 0.6,
        }
    }
}

impl OperationThresholds {
    pub fn for_operation(&self, op: Operation) -> f64 {
        match op {
            Operation::RecordActivity => self.record_activity,
            Operation::ActivateBoost => self.activate_boost,
            Operation::StartMining => self.start_mining,
            Operation::Claim => self.claim,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AntiBotConfig {
    pub weights: SignalWeights,
    pub thresholds: OperationThresholds,
    /// How long a computed score is reused for the same user
    pub cache_window_secs: i64,
    /// Most users with a cached score
    pub cache_capacity: usize,
    /// Gaps shorter than this are treated as scripted
    pub min_human_interval_ms: u64,
    /// Coefficient of variation at which timing counts as fully human
    pub human_timing_cv: f64,
    /// Timestamps kept per user by the recorded signal source
    pub history_len: usize,
}

impl Default for AntiBotConfig {
    fn default() -> Self {
        Self {
            weights: SignalWeights::default(),
            thresholds: OperationThresholds::default(),
            cache_window_secs: 30,
            cache_capacity: 10_000,
            min_human_interval_ms: 100,
            human_timing_cv: 0.5,
            history_len: 50,
        }
    }
}

impl AntiBotConfig {
    pub fn validate(&self) -> Result<()> {
        let w = &self.weights;
        if [w.timing, w.device, w.biometric, w.social].iter().any(|v| *v < 0.0) {
            return Err(RewardError::invalid("anti_bot weights must be >= 0"));
        }
        if (w.timing + w.device + w.biometric + w.social - 1.0).abs() > 1e-6 {
            return Err(RewardError::invalid("anti_bot weights must sum to 1.0"));
        }
        let t = &self.thresholds;
        if [t.record_activity, t.activate_boost, t.start_mining, t.claim]
            .iter()
            .any(|v| !(0.0..=1.0).contains(v))
        {
            return Err(RewardError::invalid("anti_bot thresholds must be in [0, 1]"));
        }
        if self.cache_capacity == 0 {
            return Err(RewardError::invalid("anti_bot.cache_capacity must be > 0"));
        }
        if self.human_timing_cv <= 0.0 {
            return Err(RewardError::invalid("anti_bot.human_timing_cv must be > 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotScore {
    pub human_probability: f64,
    pub timing: f64,
    pub device: f64,
    pub biometric: Option<f64>,
    pub social: f64,
    pub evaluated_at: DateTime<Utc>,
    #[serde(default)]
    pub from_cache: bool,
}

pub struct AntiBotScorer {
    config: AntiBotConfig,
    source: Arc<dyn SignalSource>,
    cache: Mutex<HashMap<String, BotScore>>,
}

impl AntiBotScorer {
    pub fn new(config: AntiBotConfig, source: Arc<dyn SignalSource>) -> Self {
        Self {
            config,
            source,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &AntiBotConfig {
        &self.config
    }

    pub fn threshold(&self, op: Operation) -> f64 {
        self.config.thresholds.for_operation(op)
    }

    /// Low variance or sub-threshold gaps look scripted. Users with too
    /// little history get the benefit of the doubt.
    pub fn timing_score(&self, intervals_ms: &[u64]) -> f64 {
        if intervals_ms.len() < 3 {
            return 0.7;
        }
        let n = intervals_ms.len() as f64;
        let mean = intervals_ms.iter().sum::<u64>() as f64 / n;
        if mean == 0.0 {
            return 0.0;
        }
        let variance = intervals_ms
            .iter()
            .map(|i| (*i as f64 - mean).powi(2))
            .sum::<f64>()
            / n;
        let cv = variance.sqrt() / mean;
        let regularity = (cv / self.config.human_timing_cv).min(1.0);

        let too_fast = intervals_ms
            .iter()
            .filter(|i| **i < self.config.min_human_interval_ms)
            .count() as f64
            / n;
        (regularity * (1.0 - too_fast)).clamp(0.0, 1.0)
    }

    pub fn device_score(&self, device: Option<&DeviceSignals>, fingerprints_seen: u32) -> f64 {
        let Some(device) = device else {
            return 0.7;
        };
        let mut score = 1.0;
        if device.is_emulator {
            score -= 0.6;
        }
        if device.is_rooted {
            score -= 0.3;
        }
        score -= (0.1 * fingerprints_seen.saturating_sub(3) as f64).min(0.3);
        score -= (0.15 * device.accounts_on_device.saturating_sub(1) as f64).min(0.45);
        score.clamp(0.0, 1.0)
    }

    pub fn social_score(&self, social: Option<&SocialSignals>) -> f64 {
        let Some(social) = social else {
            return 0.5;
        };
        let age = (social.account_age_days as f64 / 30.0).min(1.0);
        let connections = (social.connections as f64 / 20.0).min(1.0);
        (0.4 * age + 0.4 * social.reciprocal_ratio.clamp(0.0, 1.0) + 0.2 * connections)
            .clamp(0.0, 1.0)
    }

    /// Weighted blend; the biometric weight is spread over the other signals
    /// when no biometric reading exists.
    pub fn blend(&self, signals: &BehaviorSignals, now: DateTime<Utc>) -> BotScore {
        let w = &self.config.weights;
        let timing = self.timing_score(&signals.action_intervals_ms);
        let device = self.device_score(signals.device.as_ref(), signals.fingerprints_seen);
        let social = self.social_score(signals.social.as_ref());
        let biometric = signals.biometric_consistency.map(|b| b.clamp(0.0, 1.0));

        let mut total = w.timing * timing + w.device * device + w.social * social;
        let mut weight = w.timing + w.device + w.social;
        if let Some(b) = biometric {
            total += w.biometric * b;
            weight += w.biometric;
        }
        let human_probability = if weight > 0.0 {
            (total / weight).clamp(0.0, 1.0)
        } else {
            0.0
        };

        BotScore {
            human_probability,
            timing,
            device,
            biometric,
            social,
            evaluated_at: now,
            from_cache: false,
        }
    }

    /// Score a user, reusing a score computed inside the cache window
    pub async fn evaluate(&self, user_id: &str, now: DateTime<Utc>) -> Result<BotScore> {
        let window = Duration::seconds(self.config.cache_window_secs);
        let cached = self.cache.lock().get(user_id).cloned();
        if let Some(mut hit) = cached {
            if now >= hit.evaluated_at && now - hit.evaluated_at < window {
                hit.from_cache = true;
                return Ok(hit);
            }
        }

        let signals = self.source.signals(user_id, now).await.map_err(|e| {
            warn!("Signal source failed for {}: {}", user_id, e);
            RewardError::unavailable("signals", e)
        })?;
        let score = self.blend(&signals, now);
        debug!(
            "Anti-bot score for {}: {:.3} (timing {:.2}, device {:.2}, social {:.2})",
            user_id, score.human_probability, score.timing, score.device, score.social
        );
        self.remember(user_id, &score, now);
        Ok(score)
    }

    /// Cache a fresh score. A full cache first drops scores past the window,
    /// then the oldest one.
    fn remember(&self, user_id: &str, score: &BotScore, now: DateTime<Utc>) {
        let window = Duration::seconds(self.config.cache_window_secs);
        let mut cache = self.cache.lock();
        if !cache.contains_key(user_id) && cache.len() >= self.config.cache_capacity {
            cache.retain(|_, s| now - s.evaluated_at < window);
            if cache.len() >= self.config.cache_capacity {
                let oldest = cache
                    .iter()
                    .min_by_key(|(_, s)| s.evaluated_at)
                    .map(|(k, _)| k.clone());
                if let Some(key) = oldest {
                    cache.remove(&key);
                }
            }
        }
        cache.insert(user_id.to_string(), score.clone());
    }

    /// Refuse `op` unless the user scores at or above its threshold
    pub async fn ensure_human(
        &self,
        user_id: &str,
        op: Operation,
        now: DateTime<Utc>,
    ) -> Result<BotScore> {
        let score = self.evaluate(user_id, now).await?;
        let threshold = self.threshold(op);
        if score.human_probability < threshold {
            warn!(
                "Refusing {:?} for {}: human probability {:.3} < {:.3}",
                op, user_id, score.human_probability, threshold
            );
            return Err(RewardError::SuspiciousActivity {
                human_probability: score.human_probability,
                threshold,
            });
        }
        Ok(score)
    }

    pub async fn observe(&self, event: &ActivityEvent) {
        self.source.observe(event).await;
    }
}

// ============================================================================
// RECORDED SIGNALS
// ============================================================================

#[derive(Default)]
struct UserHistory {
    timestamps: VecDeque<DateTime<Utc>>,
    device: Option<DeviceSignals>,
    fingerprints: HashSet<String>,
    biometric: Option<f64>,
    social: Option<SocialSignals>,
}

/// In-process signal source built from the signals carried on accepted events
pub struct RecordedSignals {
    history_len: usize,
    users: Mutex<HashMap<String, UserHistory>>,
}

impl RecordedSignals {
    pub fn new(history_len: usize) -> Self {
        Self {
            history_len: history_len.max(2),
            users: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SignalSource for RecordedSignals {
    async fn observe(&self, event: &ActivityEvent) {
        let mut users = self.users.lock();
        let history = users.entry(event.user_id.clone()).or_default();
        if history.timestamps.len() >= self.history_len {
            history.timestamps.pop_front();
        }
        history.timestamps.push_back(event.occurred_at);
        if let Some(device) = &event.signals.device {
            history.fingerprints.insert(device.fingerprint.clone());
            history.device = Some(device.clone());
        }
        if let Some(b) = event.signals.biometric_consistency {
            history.biometric = Some(b);
        }
        if let Some(social) = &event.signals.social {
            history.social = Some(social.clone());
        }
    }

    async fn signals(
        &self,
        user_id: &str,
        _now: DateTime<Utc>,
    ) -> std::result::Result<BehaviorSignals, CollaboratorError> {
        let users = self.users.lock();
        let Some(history) = users.get(user_id) else {
            return Ok(BehaviorSignals::default());
        };
        let mut sorted: Vec<_> = history.timestamps.iter().copied().collect();
        sorted.sort();
        let action_intervals_ms = sorted
            .windows(2)
            .map(|w| (w[1] - w[0]).num_milliseconds().max(0) as u64)
            .collect();
        Ok(BehaviorSignals {
            action_intervals_ms,
            device: history.device.clone(),
            fingerprints_seen: history.fingerprints.len() as u32,
            biometric_consistency: history.biometric,
            social: history.social.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActivityType, EventSignals, Extensions, Platform};
    use chrono::TimeZone;

    struct FixedSignals(std::result::Result<BehaviorSignals, String>);

    #[async_trait]
    impl SignalSource for FixedSignals {
        async fn signals(
            &self,
            _user_id: &str,
            _now: DateTime<Utc>,
        ) -> std::result::Result<BehaviorSignals, CollaboratorError> {
            self.0.clone().map_err(CollaboratorError::Unavailable)
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap()
    }

    fn scorer(signals: std::result::Result<BehaviorSignals, String>) -> AntiBotScorer {
        AntiBotScorer::new(AntiBotConfig::default(), Arc::new(FixedSignals(signals)))
    }

    fn human() -> BehaviorSignals {
        BehaviorSignals {
            action_intervals_ms: vec![4_000, 31_000, 9_500, 120_000, 2_700],
            device: Some(DeviceSignals {
                fingerprint: "pixel-7".to_string(),
                is_emulator: false,
                is_rooted: false,
                accounts_on_device: 1,
            }),
            fingerprints_seen: 1,
            biometric_consistency: Some(0.9),
            social: Some(SocialSignals {
                account_age_days: 400,
                connections: 150,
                reciprocal_ratio: 0.6,
            }),
        }
    }

    fn bot() -> BehaviorSignals {
        BehaviorSignals {
            action_intervals_ms: vec![50, 50, 50, 50, 50, 50],
            device: Some(DeviceSignals {
                fingerprint: "emu".to_string(),
                is_emulator: true,
                is_rooted: true,
                accounts_on_device: 12,
            }),
            fingerprints_seen: 9,
            biometric_consistency: None,
            social: Some(SocialSignals {
                account_age_days: 0,
                connections: 0,
                reciprocal_ratio: 0.0,
            }),
        }
    }

    #[tokio::test]
    async fn test_human_passes_every_operation() {
        let s = scorer(Ok(human()));
        for op in [
            Operation::RecordActivity,
            Operation::ActivateBoost,
            Operation::StartMining,
            Operation::Claim,
        ] {
            s.ensure_human("alice", op, t0()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_bot_is_refused() {
        let s = scorer(Ok(bot()));
        let err = s
            .ensure_human("mallory", Operation::RecordActivity, t0())
            .await
            .unwrap_err();
        match err {
            RewardError::SuspiciousActivity {
                human_probability,
                threshold,
            } => {
                assert!(human_probability < 0.3);
                assert_eq!(threshold, 0.3);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_signal_failure_fails_closed() {
        let s = scorer(Err("timeout".to_string()));
        let err = s.ensure_human("alice", Operation::Claim, t0()).await.unwrap_err();
        assert_eq!(err.kind(), "dependency_unavailable");
    }

    #[tokio::test]
    async fn test_score_is_cached_within_window() {
        let s = scorer(Ok(human()));
        let first = s.evaluate("alice", t0()).await.unwrap();
        let second = s.evaluate("alice", t0() + Duration::seconds(10)).await.unwrap();
        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(second.evaluated_at, first.evaluated_at);

        let third = s.evaluate("alice", t0() + Duration::seconds(31)).await.unwrap();
        assert!(!third.from_cache);
    }

    #[tokio::test]
    async fn test_score_cache_is_bounded() {
        let config = AntiBotConfig {
            cache_capacity: 3,
            ..Default::default()
        };
        let s = AntiBotScorer::new(config, Arc::new(FixedSignals(Ok(human()))));
        for (i, user) in ["a", "b", "c", "d"].iter().enumerate() {
            s.evaluate(user, t0() + Duration::seconds(i as i64)).await.unwrap();
        }
        assert_eq!(s.cache.lock().len(), 3);
        assert!(!s.cache.lock().contains_key("a"));

        // Expired scores go first once the cache is full
        let later = t0() + Duration::seconds(40);
        s.evaluate("e", later).await.unwrap();
        let cache = s.cache.lock();
        assert_eq!(cache.len(), 1);
        assert!(cache.contains_key("e"));
    }

    #[test]
    fn test_biometric_weight_is_redistributed() {
        let s = scorer(Ok(BehaviorSignals::default()));
        let mut signals = human();
        let with = s.blend(&signals, t0());
        signals.biometric_consistency = None;
        let without = s.blend(&signals, t0());
        assert!(without.biometric.is_none());
        let expected = (0.35 * without.timing + 0.20 * without.device + 0.20 * without.social) / 0.75;
        assert!((without.human_probability - expected).abs() < 1e-12);
        assert!(with.human_probability <= 1.0 && without.human_probability <= 1.0);
    }

    #[test]
    fn test_timing_score() {
        let s = scorer(Ok(BehaviorSignals::default()));
        assert_eq!(s.timing_score(&[1_000, 1_000, 1_000, 1_000]), 0.0);
        assert_eq!(s.timing_score(&[]), 0.7);
        assert!(s.timing_score(&[500, 8_000, 1_500, 30_000]) > 0.9);
    }

    #[tokio::test]
    async fn test_recorded_signals_track_history() {
        let source = RecordedSignals::new(10);
        for (i, secs) in [0i64, 7, 31, 40].iter().enumerate() {
            let event = ActivityEvent {
                event_id: format!("e{}", i),
                user_id: "alice".to_string(),
                activity: ActivityType::Like,
                platform: Platform::Instagram,
                content: None,
                occurred_at: t0() + Duration::seconds(*secs),
                signals: EventSignals {
                    device: Some(DeviceSignals {
                        fingerprint: format!("fp-{}", i % 2),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                extensions: Extensions::new(),
            };
            source.observe(&event).await;
        }
        let signals = source.signals("alice", t0()).await.unwrap();
        assert_eq!(signals.action_intervals_ms, vec![7_000, 24_000, 9_000]);
        assert_eq!(signals.fingerprints_seen, 2);

        let unknown = source.signals("bob", t0()).await.unwrap();
        assert!(unknown.action_intervals_ms.is_empty());
    }
}
