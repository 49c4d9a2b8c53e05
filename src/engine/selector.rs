// ==========================================
// 线索派单引擎 - 选择器
// ==========================================
// 职责: 对已打分候选给出全序
// 截断不在这里做: 账本按事务内的空余名额逐个落库，冲突时顺延到下一名
// 排序键:
// 1) score 降序
// 2) prefer_claimed 时已认领优先
// 3) 距离升序（未知距离排最后）
// 4) provider_id 升序（最终确定性兜底）
// ==========================================

use crate::domain::policy::PolicySnapshot;
use crate::engine::scoring::ScoredCandidate;
use std::cmp::Ordering;

#[derive(Debug, Default)]
pub struct Selector;

impl Selector {
    pub fn new() -> Self {
        Self
    }

    /// 全量排序（不截断）
    ///
    /// 落库遇到冲突时需要顺延到下一名，因此账本接收的是完整排序列表
    pub fn rank(&self, mut scored: Vec<ScoredCandidate>, policy: &PolicySnapshot) -> Vec<ScoredCandidate> {
        scored.sort_by(|a, b| compare(a, b, policy.prefer_claimed));
        scored
    }
}

fn compare(a: &ScoredCandidate, b: &ScoredCandidate, prefer_claimed: bool) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| {
            if prefer_claimed {
                b.candidate.provider.is_claimed.cmp(&a.candidate.provider.is_claimed)
            } else {
                Ordering::Equal
            }
        })
        .then_with(|| compare_distance(a.candidate.distance_km, b.candidate.distance_km))
        .then_with(|| a.provider_id().cmp(b.provider_id()))
}

fn compare_distance(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::provider::Provider;
    use crate::engine::candidate_filter::Candidate;
    use crate::engine::scoring::ScoreBreakdown;
    use chrono::Utc;

    fn scored(id: &str, score: f64, claimed: bool, distance: Option<f64>) -> ScoredCandidate {
        ScoredCandidate {
            candidate: Candidate {
                provider: Provider {
                    provider_id: id.to_string(),
                    name: id.to_string(),
                    specialties: vec![],
                    department: None,
                    location: None,
                    radius_km: None,
                    is_verified: false,
                    is_claimed: claimed,
                    is_active: true,
                    rating: None,
                    review_count: 0,
                    response_rate: 0.0,
                    offers_received: 0,
                    offers_responded: 0,
                    last_active_at: None,
                    daily_quota: None,
                    monthly_quota: None,
                    updated_at: Utc::now(),
                },
                distance_km: distance,
            },
            score,
            breakdown: ScoreBreakdown {
                proximity: 0.0,
                rating: 0.0,
                reviews: 0.0,
                response_rate: 0.0,
                verified: 0.0,
                weight_sum: 0.0,
                urgency_multiplier: 1.0,
            },
        }
    }

    fn ids(list: &[ScoredCandidate]) -> Vec<&str> {
        list.iter().map(|s| s.provider_id()).collect()
    }

    #[test]
    fn test_tie_breaks() {
        let policy = PolicySnapshot::default();
        let input = vec![
            scored("P5", 0.7, false, None),
            scored("P4", 0.7, false, Some(3.0)),
            scored("P3", 0.7, true, Some(9.0)),
            scored("P2", 0.9, false, Some(20.0)),
            scored("P1", 0.7, false, Some(3.0)),
        ];

        let ranked = Selector::new().rank(input, &policy);
        assert_eq!(ids(&ranked), vec!["P2", "P3", "P1", "P4", "P5"]);
    }

    #[test]
    fn test_claimed_ignored_when_not_preferred() {
        let mut policy = PolicySnapshot::default();
        policy.prefer_claimed = false;
        let input = vec![scored("P1", 0.5, true, Some(9.0)), scored("P2", 0.5, false, Some(1.0))];
        let ranked = Selector::new().rank(input, &policy);
        assert_eq!(ids(&ranked), vec!["P2", "P1"]);
    }

    #[test]
    fn test_order_is_input_independent() {
        let policy = PolicySnapshot::default();

        let a = vec![
            scored("P1", 0.3, false, None),
            scored("P2", 0.8, false, None),
            scored("P3", 0.5, false, None),
        ];
        let b = vec![
            scored("P3", 0.5, false, None),
            scored("P1", 0.3, false, None),
            scored("P2", 0.8, false, None),
        ];

        let selector = Selector::new();
        let sa = selector.rank(a, &policy);
        let sb = selector.rank(b, &policy);
        assert_eq!(ids(&sa), vec!["P2", "P3", "P1"]);
        assert_eq!(ids(&sa), ids(&sb));
    }
}
