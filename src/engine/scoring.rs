// ==========================================
// 线索派单引擎 - 打分引擎
// ==========================================
// 职责: 对通过过滤的候选计算适配分（软排序信号）
// 红线: 纯函数；相同 (候选, 线索, 策略) 输入必须得到逐位相同的分数
// ==========================================

use crate::domain::lead::Lead;
use crate::domain::policy::PolicySnapshot;
use crate::domain::types::MatchingStrategy;
use crate::engine::candidate_filter::Candidate;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// 评价数饱和点
pub const REVIEW_SATURATION: i64 = 100;
/// 距离未知时的中性距离分
pub const NEUTRAL_PROXIMITY: f64 = 0.5;
/// 评分满分
pub const MAX_RATING: f64 = 5.0;

// ==========================================
// ScoreBreakdown - 分项明细（可解释性）
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub proximity: f64,
    pub rating: f64,
    pub reviews: f64,
    pub response_rate: f64,
    pub verified: f64,
    pub weight_sum: f64,
    pub urgency_multiplier: f64,
}

/// 已打分候选
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

impl ScoredCandidate {
    pub fn provider_id(&self) -> &str {
        &self.candidate.provider.provider_id
    }
}

// ==========================================
// 分项计算
// ==========================================

/// 距离分: 半径内线性衰减，半径处为 0；距离未知取中性值
pub fn proximity_subscore(distance_km: Option<f64>, radius_km: f64) -> f64 {
    match distance_km {
        Some(d) if radius_km > 0.0 => (1.0 - d / radius_km).clamp(0.0, 1.0),
        Some(_) => 0.0,
        None => NEUTRAL_PROXIMITY,
    }
}

pub fn rating_subscore(rating: Option<f64>) -> f64 {
    (rating.unwrap_or(0.0) / MAX_RATING).clamp(0.0, 1.0)
}

/// 评价数分: ln(1+n) / ln(1+饱和点)
pub fn reviews_subscore(review_count: i64) -> f64 {
    let n = review_count.clamp(0, REVIEW_SATURATION) as f64;
    (1.0 + n).ln() / (1.0 + REVIEW_SATURATION as f64).ln()
}

fn subscores(candidate: &Candidate, policy: &PolicySnapshot, multiplier: f64) -> ScoreBreakdown {
    let p = &candidate.provider;
    let radius = p.radius_km.unwrap_or(policy.geo_radius_km);
    ScoreBreakdown {
        proximity: proximity_subscore(candidate.distance_km, radius),
        rating: rating_subscore(p.rating),
        reviews: reviews_subscore(p.review_count),
        response_rate: p.response_rate.clamp(0.0, 1.0),
        verified: if p.is_verified { 1.0 } else { 0.0 },
        weight_sum: policy.weights.sum(),
        urgency_multiplier: multiplier,
    }
}

// ==========================================
// ScoringStrategy Trait
// ==========================================
pub trait ScoringStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// 计算单个候选的分数
    fn score(&self, candidate: &Candidate, lead: &Lead, policy: &PolicySnapshot) -> (f64, ScoreBreakdown);
}

/// 加权打分（默认）: Σ(w_i × s_i) / Σw_i × 紧急乘数
#[derive(Debug, Default)]
pub struct WeightedScoring;

impl ScoringStrategy for WeightedScoring {
    fn name(&self) -> &'static str {
        "weighted"
    }

    fn score(&self, candidate: &Candidate, lead: &Lead, policy: &PolicySnapshot) -> (f64, ScoreBreakdown) {
        let multiplier = policy.multiplier_for(lead.urgency);
        let b = subscores(candidate, policy, multiplier);
        let w = &policy.weights;

        if b.weight_sum <= 0.0 {
            return (0.0, b);
        }

        let weighted = w.proximity * b.proximity
            + w.rating * b.rating
            + w.reviews * b.reviews
            + w.response_rate * b.response_rate
            + w.verified * b.verified;

        (weighted / b.weight_sum * multiplier, b)
    }
}

/// 纯地理打分（geographic 策略）: 距离分 × 紧急乘数
#[derive(Debug, Default)]
pub struct ProximityOnlyScoring;

impl ScoringStrategy for ProximityOnlyScoring {
    fn name(&self) -> &'static str {
        "proximity_only"
    }

    fn score(&self, candidate: &Candidate, lead: &Lead, policy: &PolicySnapshot) -> (f64, ScoreBreakdown) {
        let multiplier = policy.multiplier_for(lead.urgency);
        let b = subscores(candidate, policy, multiplier);
        (b.proximity * multiplier, b)
    }
}

// ==========================================
// Scorer - 按策略选择打分实现
// ==========================================
#[derive(Debug, Default)]
pub struct Scorer;

impl Scorer {
    pub fn new() -> Self {
        Self
    }

    /// 按匹配策略选择打分实现
    ///
    /// round_robin 没有明确的打分语义，按加权打分处理
    pub fn strategy_for(&self, strategy: MatchingStrategy) -> Box<dyn ScoringStrategy> {
        match strategy {
            MatchingStrategy::Scored => Box::new(WeightedScoring),
            MatchingStrategy::Geographic => Box::new(ProximityOnlyScoring),
            MatchingStrategy::RoundRobin => {
                warn!("round_robin 匹配策略未实现，按 scored 加权打分派单");
                Box::new(WeightedScoring)
            }
        }
    }

    /// 为全部候选打分
    pub fn score_all(
        &self,
        candidates: Vec<Candidate>,
        lead: &Lead,
        policy: &PolicySnapshot,
    ) -> Vec<ScoredCandidate> {
        let strategy = self.strategy_for(policy.matching_strategy);
        candidates
            .into_iter()
            .map(|candidate| {
                let (score, breakdown) = strategy.score(&candidate, lead, policy);
                ScoredCandidate {
                    candidate,
                    score,
                    breakdown,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::lead::GeoPoint;
    use crate::domain::policy::ScoringWeights;
    use crate::domain::provider::Provider;
    use crate::domain::types::{LeadSource, LeadStatus, Urgency};
    use chrono::Utc;

    fn lead(urgency: Urgency) -> Lead {
        let now = Utc::now();
        Lead {
            lead_id: "L1".to_string(),
            source: LeadSource::Primary,
            service_name: "plombier".to_string(),
            urgency,
            location: GeoPoint::new(48.85, 2.35),
            postal_code: None,
            department: Some("75".to_string()),
            city: None,
            status: LeadStatus::New,
            dispatch_round: 0,
            last_dispatch_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn candidate(distance_km: Option<f64>, rating: Option<f64>, reviews: i64, verified: bool) -> Candidate {
        Candidate {
            provider: Provider {
                provider_id: "P1".to_string(),
                name: "P1".to_string(),
                specialties: vec![],
                department: None,
                location: None,
                radius_km: None,
                is_verified: verified,
                is_claimed: false,
                is_active: true,
                rating,
                review_count: reviews,
                response_rate: 0.4,
                offers_received: 10,
                offers_responded: 4,
                last_active_at: None,
                daily_quota: None,
                monthly_quota: None,
                updated_at: Utc::now(),
            },
            distance_km,
        }
    }

    #[test]
    fn test_subscores() {
        assert_eq!(proximity_subscore(Some(0.0), 50.0), 1.0);
        assert_eq!(proximity_subscore(Some(25.0), 50.0), 0.5);
        assert_eq!(proximity_subscore(Some(80.0), 50.0), 0.0);
        assert_eq!(proximity_subscore(None, 50.0), NEUTRAL_PROXIMITY);

        assert_eq!(rating_subscore(Some(5.0)), 1.0);
        assert_eq!(rating_subscore(None), 0.0);

        assert_eq!(reviews_subscore(0), 0.0);
        assert!((reviews_subscore(100) - 1.0).abs() < 1e-12);
        assert_eq!(reviews_subscore(5000), reviews_subscore(100));
        assert!(reviews_subscore(10) < reviews_subscore(50));
    }

    #[test]
    fn test_weighted_score_is_normalized_and_pure() {
        let policy = PolicySnapshot::default();
        let c = candidate(Some(10.0), Some(4.0), 20, true);
        let l = lead(Urgency::Medium);

        let (s1, b) = WeightedScoring.score(&c, &l, &policy);
        let (s2, _) = WeightedScoring.score(&c, &l, &policy);
        assert_eq!(s1.to_bits(), s2.to_bits());
        assert!(s1 > 0.0 && s1 <= 1.0);
        assert_eq!(b.weight_sum, 100.0);

        // 权重整体放大不改变分数
        let mut scaled = policy.clone();
        scaled.weights = ScoringWeights {
            proximity: 50.0,
            rating: 60.0,
            reviews: 30.0,
            response_rate: 20.0,
            verified: 40.0,
        };
        let (s3, _) = WeightedScoring.score(&c, &l, &scaled);
        assert!((s1 - s3).abs() < 1e-12);
    }

    #[test]
    fn test_urgency_multiplier_and_zero_weights() {
        let policy = PolicySnapshot::default();
        let c = candidate(Some(5.0), Some(4.5), 40, false);

        let (medium, _) = WeightedScoring.score(&c, &lead(Urgency::Medium), &policy);
        let (emergency, b) = WeightedScoring.score(&c, &lead(Urgency::Emergency), &policy);
        assert_eq!(b.urgency_multiplier, 2.0);
        assert!((emergency - medium * 2.0).abs() < 1e-12);

        let mut zero = policy.clone();
        zero.weights = ScoringWeights {
            proximity: 0.0,
            rating: 0.0,
            reviews: 0.0,
            response_rate: 0.0,
            verified: 0.0,
        };
        assert_eq!(WeightedScoring.score(&c, &lead(Urgency::High), &zero).0, 0.0);
    }

    #[test]
    fn test_strategy_selection() {
        let scorer = Scorer::new();
        assert_eq!(scorer.strategy_for(MatchingStrategy::Scored).name(), "weighted");
        assert_eq!(scorer.strategy_for(MatchingStrategy::Geographic).name(), "proximity_only");
        assert_eq!(scorer.strategy_for(MatchingStrategy::RoundRobin).name(), "weighted");

        let mut policy = PolicySnapshot::default();
        policy.matching_strategy = MatchingStrategy::Geographic;
        let scored = scorer.score_all(
            vec![candidate(Some(25.0), Some(5.0), 100, true)],
            &lead(Urgency::Low),
            &policy,
        );
        assert_eq!(scored[0].score, 0.5);
    }
}
