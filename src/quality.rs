//! Content quality scorer
//!
//! Weighted composite of five sub-scores mapped onto a multiplier in
//! `[0.5, 2.0]`. A duplicate detector runs first: an exact content-hash hit
//! inside the cache TTL returns the cached analysis flagged as a duplicate,
//! and a near-duplicate (embedding cosine above the threshold) is scored at
//! the duplicate penalty without asking the model.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::collaborators::ContentModel;
use crate::error::{CollaboratorError, Result, RewardError};
use crate::types::{ContentRef, MediaKind, Platform};

pub const MIN_QUALITY_SCORE: f64 = 0.5;
pub const MAX_QUALITY_SCORE: f64 = 2.0;

/// Raw sub-scores from a content model, each in `[0, 1]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentAssessment {
    pub originality: f64,
    pub engagement_potential: f64,
    pub platform_relevance: f64,
    pub brand_safety: f64,
    pub human_generated: f64,
    /// Severity of a brand-safety violation (0.0 - 1.0), if one was found
    #[serde(default)]
    pub safety_violation: Option<f64>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

impl ContentAssessment {
    fn clamped(mut self) -> Self {
        let unit = |v: f64| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        self.originality = unit(self.originality);
        self.engagement_potential = unit(self.engagement_potential);
        self.platform_relevance = unit(self.platform_relevance);
        self.brand_safety = unit(self.brand_safety);
        self.human_generated = unit(self.human_generated);
        self.safety_violation = self.safety_violation.map(unit);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityWeights {
    pub originality: f64,
    pub engagement: f64,
    pub relevance: f64,
    pub brand_safety: f64,
    pub human: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            originality: 0.30,
            engagement: 0.20,
            relevance: 0.15,
            brand_safety: 0.20,
            human: 0.15,
        }
    }
}

impl QualityWeights {
    fn sum(&self) -> f64 {
        self.originality + self.engagement + self.relevance + self.brand_safety + self.human
    }

    pub fn composite(&self, a: &ContentAssessment) -> f64 {
        self.originality * a.originality
            + self.engagement * a.engagement_potential
            + self.relevance * a.platform_relevance
            + self.brand_safety * a.brand_safety
            + self.human * a.human_generated
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub weights: QualityWeights,
    /// Effective multiplier of duplicate content
    pub duplicate_score: f64,
    /// Cosine similarity at or above which content is a near-duplicate
    pub similarity_threshold: f64,
    pub cache_ttl_secs: i64,
    pub cache_capacity: usize,
    /// Number of recent embeddings kept for near-duplicate checks
    pub embedding_window: usize,
    /// Multiplier lost per unit of violation severity
    pub brand_safety_penalty: f64,
    /// EMA weight of a new event in the quality score of record
    pub record_alpha: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            weights: QualityWeights::default(),
            duplicate_score: 0.25,
            similarity_threshold: 0.95,
            cache_ttl_secs: 3600,
            cache_capacity: 10_000,
            embedding_window: 1024,
            brand_safety_penalty: 0.5,
            record_alpha: 0.2,
        }
    }
}

impl QualityConfig {
    pub fn validate(&self) -> Result<()> {
        if (self.weights.sum() - 1.0).abs() > 1e-6 {
            return Err(RewardError::invalid("quality weights must sum to 1.0"));
        }
        if !(0.0..=1.0).contains(&self.duplicate_score) {
            return Err(RewardError::invalid("quality.duplicate_score must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(RewardError::invalid(
                "quality.similarity_threshold must be in [0, 1]",
            ));
        }
        if !(0.0..=1.0).contains(&self.record_alpha) || self.cache_capacity == 0 {
            return Err(RewardError::invalid("invalid quality cache or EMA settings"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAnalysis {
    pub content_hash: String,
    /// Clamped quality multiplier in `[0.5, 2.0]`
    pub score: f64,
    pub composite: f64,
    pub assessment: Option<ContentAssessment>,
    pub duplicate: bool,
    pub from_cache: bool,
    /// The content model failed and the neutral score was used
    pub fallback: bool,
    pub analyzed_at: DateTime<Utc>,
    duplicate_score: f64,
}

impl QualityAnalysis {
    /// Multiplier the calculators should use
    pub fn effective_score(&self) -> f64 {
        if self.duplicate {
            self.duplicate_score
        } else {
            self.score
        }
    }
}

/// Map a composite in `[0, 1]` onto the quality multiplier range
pub fn composite_to_multiplier(composite: f64) -> f64 {
    (MIN_QUALITY_SCORE + 1.5 * composite).clamp(MIN_QUALITY_SCORE, MAX_QUALITY_SCORE)
}

/// Hash of the normalized content; content without text hashes by id
pub fn content_hash(content: &ContentRef) -> String {
    let normalized = content
        .text
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");
    let mut hasher = Sha256::new();
    if normalized.is_empty() {
        hasher.update(b"id:");
        hasher.update(content.content_id.as_bytes());
    } else {
        hasher.update(b"text:");
        hasher.update(normalized.as_bytes());
    }
    hex::encode(hasher.finalize())
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        dot += *x as f64 * *y as f64;
        na += (*x as f64).powi(2);
        nb += (*y as f64).powi(2);
    }
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na.sqrt() * nb.sqrt())
    }
}

struct CacheEntry {
    analysis: QualityAnalysis,
    inserted_at: DateTime<Utc>,
}

#[derive(Default)]
struct ScorerState {
    cache: HashMap<String, CacheEntry>,
    embeddings: VecDeque<(String, Vec<f32>)>,
}

pub struct QualityScorer {
    config: QualityConfig,
    model: Arc<dyn ContentModel>,
    state: Mutex<ScorerState>,
}

impl QualityScorer {
    pub fn new(config: QualityConfig, model: Arc<dyn ContentModel>) -> Self {
        Self {
            config,
            model,
            state: Mutex::new(ScorerState::default()),
        }
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    /// Multiplier for a set of sub-scores, including the brand-safety penalty
    pub fn multiplier(&self, assessment: &ContentAssessment) -> (f64, f64) {
        let composite = self.config.weights.composite(assessment);
        let mut score = MIN_QUALITY_SCORE + 1.5 * composite;
        if let Some(severity) = assessment.safety_violation {
            score *= (1.0 - self.config.brand_safety_penalty * severity).max(0.0);
        }
        (composite, score.clamp(MIN_QUALITY_SCORE, MAX_QUALITY_SCORE))
    }

    /// New quality score of record after one scored event. Duplicates and
    /// fallbacks do not move it.
    pub fn update_record(&self, current: f64, analysis: &QualityAnalysis) -> f64 {
        if analysis.duplicate || analysis.fallback {
            return current;
        }
        let alpha = self.config.record_alpha;
        ((1.0 - alpha) * current + alpha * analysis.score).clamp(MIN_QUALITY_SCORE, MAX_QUALITY_SCORE)
    }

    fn cached(&self, hash: &str, now: DateTime<Utc>) -> Option<QualityAnalysis> {
        let mut state = self.state.lock();
        let ttl = Duration::seconds(self.config.cache_ttl_secs);
        match state.cache.get(hash) {
            Some(entry) if now - entry.inserted_at <= ttl => {
                let mut hit = entry.analysis.clone();
                hit.from_cache = true;
                hit.duplicate = true;
                Some(hit)
            }
            Some(_) => {
                state.cache.remove(hash);
                None
            }
            None => None,
        }
    }

    fn near_duplicate(&self, hash: &str, embedding: &[f32]) -> bool {
        let state = self.state.lock();
        state
            .embeddings
            .iter()
            .any(|(h, e)| h != hash && cosine(e, embedding) >= self.config.similarity_threshold)
    }

    /// Record an analysis so later submissions of the same or similar
    /// content are detected. Cache hits and fallbacks are not recorded.
    pub fn remember(&self, analysis: &QualityAnalysis, now: DateTime<Utc>) {
        if analysis.from_cache || analysis.fallback {
            return;
        }
        let mut state = self.state.lock();
        let ttl = Duration::seconds(self.config.cache_ttl_secs);
        if state.cache.len() >= self.config.cache_capacity {
            state.cache.retain(|_, e| now - e.inserted_at <= ttl);
        }
        if state.cache.len() >= self.config.cache_capacity {
            let oldest = state
                .cache
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone());
            if let Some(key) = oldest {
                state.cache.remove(&key);
            }
        }
        state.cache.insert(
            analysis.content_hash.clone(),
            CacheEntry {
                analysis: analysis.clone(),
                inserted_at: now,
            },
        );

        if let Some(embedding) = analysis.assessment.as_ref().and_then(|a| a.embedding.clone()) {
            if state.embeddings.len() >= self.config.embedding_window {
                state.embeddings.pop_front();
            }
            state
                .embeddings
                .push_back((analysis.content_hash.clone(), embedding));
        }
    }

    /// Analyze and remember in one step
    pub async fn score(
        &self,
        content: &ContentRef,
        platform: Platform,
        now: DateTime<Utc>,
    ) -> QualityAnalysis {
        let analysis = self.analyze(content, platform, now).await;
        self.remember(&analysis, now);
        analysis
    }

    /// Score content against what has been remembered so far, without
    /// recording it
    pub async fn analyze(
        &self,
        content: &ContentRef,
        platform: Platform,
        now: DateTime<Utc>,
    ) -> QualityAnalysis {
        let hash = content_hash(content);
        if let Some(hit) = self.cached(&hash, now) {
            debug!("Quality cache hit for {} (duplicate)", &hash[..12]);
            return hit;
        }

        let assessment = match self.model.assess(content, platform).await {
            Ok(a) => a.clamped(),
            Err(e) => {
                warn!("Content model failed for {}: {}; using neutral score", content.content_id, e);
                return QualityAnalysis {
                    content_hash: hash,
                    score: 1.0,
                    composite: 0.0,
                    assessment: None,
                    duplicate: false,
                    from_cache: false,
                    fallback: true,
                    analyzed_at: now,
                    duplicate_score: self.config.duplicate_score,
                };
            }
        };

        let duplicate = assessment
            .embedding
            .as_deref()
            .map(|e| self.near_duplicate(&hash, e))
            .unwrap_or(false);
        let (composite, score) = self.multiplier(&assessment);
        if duplicate {
            debug!("Near-duplicate content {}", content.content_id);
        }

        QualityAnalysis {
            content_hash: hash,
            score,
            composite,
            assessment: Some(assessment),
            duplicate,
            from_cache: false,
            fallback: false,
            analyzed_at: now,
            duplicate_score: self.config.duplicate_score,
        }
    }
}

// ============================================================================
// HEURISTIC MODEL
// ============================================================================

const EMBEDDING_DIM: usize = 64;

const DEFAULT_BLOCKED_TERMS: &[&str] = &[
    "scam", "giveaway", "airdrop", "guaranteed", "hate", "violence", "nsfw", "casino",
];

/// Text-statistics content model for deployments without an external one
pub struct HeuristicContentModel {
    blocked_terms: HashSet<String>,
}

impl Default for HeuristicContentModel {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCKED_TERMS.iter().map(|s| s.to_string()))
    }
}

impl HeuristicContentModel {
    pub fn new(blocked_terms: impl IntoIterator<Item = String>) -> Self {
        Self {
            blocked_terms: blocked_terms.into_iter().map(|t| t.to_lowercase()).collect(),
        }
    }

    fn relevance(media: MediaKind, platform: Platform) -> f64 {
        match (platform, media) {
            (Platform::Tiktok, MediaKind::Video) | (Platform::Youtube, MediaKind::Video) => 1.0,
            (Platform::Instagram, MediaKind::Image) | (Platform::Instagram, MediaKind::Video) => 1.0,
            (Platform::X, MediaKind::Text) | (Platform::Facebook, _) | (Platform::App, _) => 0.9,
            (Platform::Tiktok, _) | (Platform::Youtube, _) => 0.4,
            _ => 0.7,
        }
    }

    fn embed(words: &[String]) -> Vec<f32> {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        for w in words {
            let digest = Sha256::digest(w.as_bytes());
            v[digest[0] as usize % EMBEDDING_DIM] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }

    pub fn analyze(&self, content: &ContentRef, platform: Platform) -> ContentAssessment {
        let words: Vec<String> = content
            .text
            .split_whitespace()
            .map(|w| {
                w.trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase()
            })
            .filter(|w| !w.is_empty())
            .collect();
        let word_count = words.len();

        let unique: HashSet<&String> = words.iter().collect();
        let originality = if word_count == 0 {
            0.5
        } else {
            unique.len() as f64 / word_count as f64
        };

        let media_bonus = match content.media {
            MediaKind::Video => 0.3,
            MediaKind::Image => 0.2,
            MediaKind::Text => 0.0,
        };
        let engagement_potential = ((word_count as f64 / 50.0).min(1.0) * 0.7 + media_bonus).min(1.0);

        let hits = words.iter().filter(|w| self.blocked_terms.contains(*w)).count();
        let safety_violation = (hits > 0).then(|| (hits as f64 / 3.0).min(1.0));
        let brand_safety = 1.0 - safety_violation.unwrap_or(0.0);

        let letters: Vec<char> = content.text.chars().filter(|c| c.is_alphabetic()).collect();
        let caps_ratio = if letters.is_empty() {
            0.0
        } else {
            letters.iter().filter(|c| c.is_uppercase()).count() as f64 / letters.len() as f64
        };
        let links = content.text.matches("http").count();
        let link_density = links as f64 / word_count.max(1) as f64;
        let human_generated = (1.0 - (caps_ratio - 0.3).max(0.0) - link_density * 2.0).clamp(0.0, 1.0);

        ContentAssessment {
            originality,
            engagement_potential,
            platform_relevance: Self::relevance(content.media, platform),
            brand_safety,
            human_generated,
            safety_violation,
            embedding: (word_count > 0).then(|| Self::embed(&words)),
        }
    }
}

#[async_trait]
impl ContentModel for HeuristicContentModel {
    async fn assess(
        &self,
        content: &ContentRef,
        platform: Platform,
    ) -> std::result::Result<ContentAssessment, CollaboratorError> {
        Ok(self.analyze(content, platform))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingModel {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingModel {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl ContentModel for CountingModel {
        async fn assess(
            &self,
            content: &ContentRef,
            _platform: Platform,
        ) -> std::result::Result<ContentAssessment, CollaboratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CollaboratorError::Unavailable("model offline".to_string()));
            }
            let mut embedding = vec![0.0f32; 4];
            embedding[content.text.len() % 4] = 1.0;
            Ok(ContentAssessment {
                originality: 0.8,
                engagement_potential: 0.6,
                platform_relevance: 0.5,
                brand_safety: 1.0,
                human_generated: 0.9,
                safety_violation: None,
                embedding: Some(embedding),
            })
        }
    }

    fn content(id: &str, text: &str) -> ContentRef {
        ContentRef {
            content_id: id.to_string(),
            text: text.to_string(),
            media: MediaKind::Text,
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn test_identical_content_hits_cache_and_is_duplicate() {
        let model = CountingModel::new(false);
        let scorer = QualityScorer::new(QualityConfig::default(), model.clone());

        let first = scorer.score(&content("a", "Sunset over the bay"), Platform::Instagram, now()).await;
        assert!(!first.duplicate);
        assert!(!first.from_cache);

        // Same text modulo whitespace and case, different id
        let second = scorer
            .score(&content("b", "  sunset OVER the   bay"), Platform::Instagram, now() + Duration::minutes(5))
            .await;
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        assert!(second.from_cache);
        assert!(second.duplicate);
        assert_eq!(second.score, first.score);
        assert_eq!(second.effective_score(), 0.25);
    }

    #[tokio::test]
    async fn test_cache_expires_after_ttl() {
        let model = CountingModel::new(false);
        let scorer = QualityScorer::new(QualityConfig::default(), model.clone());
        scorer.score(&content("a", "hello world"), Platform::X, now()).await;
        let later = scorer
            .score(&content("a", "hello world"), Platform::X, now() + Duration::hours(2))
            .await;
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
        assert!(!later.from_cache);
    }

    #[tokio::test]
    async fn test_near_duplicate_by_embedding() {
        let model = CountingModel::new(false);
        let scorer = QualityScorer::new(QualityConfig::default(), model.clone());
        // Same text length → same embedding in the counting model
        scorer.score(&content("a", "abcd"), Platform::X, now()).await;
        let near = scorer.score(&content("b", "wxyz"), Platform::X, now()).await;
        assert!(near.duplicate);
        assert!(!near.from_cache);
        assert_eq!(near.effective_score(), 0.25);
    }

    #[tokio::test]
    async fn test_analysis_is_not_remembered_until_recorded() {
        let model = CountingModel::new(false);
        let scorer = QualityScorer::new(QualityConfig::default(), model.clone());
        let post = content("a", "Morning run by the river");

        let first = scorer.analyze(&post, Platform::X, now()).await;
        let retry = scorer.analyze(&post, Platform::X, now()).await;
        assert!(!retry.duplicate);
        assert_eq!(retry.score, first.score);
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);

        scorer.remember(&retry, now());
        let again = scorer.analyze(&post, Platform::X, now()).await;
        assert!(again.duplicate);
        assert!(again.from_cache);

        // Cache hits do not refresh their own entry
        scorer.remember(&again, now() + Duration::minutes(59));
        let expired = scorer
            .analyze(&post, Platform::X, now() + Duration::minutes(61))
            .await;
        assert!(!expired.from_cache);
    }

    #[tokio::test]
    async fn test_model_failure_falls_back_to_neutral() {
        let scorer = QualityScorer::new(QualityConfig::default(), CountingModel::new(true));
        let analysis = scorer.score(&content("a", "anything"), Platform::App, now()).await;
        assert!(analysis.fallback);
        assert_eq!(analysis.effective_score(), 1.0);
        assert_eq!(scorer.update_record(1.4, &analysis), 1.4);
    }

    #[test]
    fn test_multiplier_range_and_brand_penalty() {
        let scorer = QualityScorer::new(QualityConfig::default(), Arc::new(HeuristicContentModel::default()));
        let perfect = ContentAssessment {
            originality: 1.0,
            engagement_potential: 1.0,
            platform_relevance: 1.0,
            brand_safety: 1.0,
            human_generated: 1.0,
            safety_violation: None,
            embedding: None,
        };
        let (composite, score) = scorer.multiplier(&perfect);
        assert!((composite - 1.0).abs() < 1e-12);
        assert_eq!(score, 2.0);

        let violating = ContentAssessment {
            safety_violation: Some(0.5),
            ..perfect.clone()
        };
        // 2.0 × (1 − 0.5 × 0.5)
        assert!((scorer.multiplier(&violating).1 - 1.5).abs() < 1e-12);

        let worst = ContentAssessment {
            originality: 0.0,
            engagement_potential: 0.0,
            platform_relevance: 0.0,
            brand_safety: 0.0,
            human_generated: 0.0,
            safety_violation: Some(1.0),
            embedding: None,
        };
        assert_eq!(scorer.multiplier(&worst).1, MIN_QUALITY_SCORE);
        assert_eq!(composite_to_multiplier(0.5), 1.25);
    }

    #[test]
    fn test_heuristic_model_flags_spam() {
        let model = HeuristicContentModel::default();
        let clean = model.analyze(
            &content("a", "Spent the morning repairing an old bicycle with my daughter, new chain and brakes"),
            Platform::Facebook,
        );
        let spam = model.analyze(
            &content("b", "FREE AIRDROP GIVEAWAY SCAM http://x http://y"),
            Platform::Facebook,
        );
        assert!(clean.brand_safety > spam.brand_safety);
        assert!(spam.safety_violation.is_some());
        assert!(clean.human_generated > spam.human_generated);
        assert_eq!(clean.embedding.as_ref().map(Vec::len), Some(EMBEDDING_DIM));
    }

    #[test]
    fn test_config_validation() {
        assert!(QualityConfig::default().validate().is_ok());
        let mut bad = QualityConfig::default();
        bad.weights.originality = 0.5;
        assert!(bad.validate().is_err());
    }
}
