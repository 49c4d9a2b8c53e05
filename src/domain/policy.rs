// ==========================================
// 线索派单引擎 - 派单策略快照
// ==========================================
// 红线: 单次派单只读取一次快照并显式传递，不读全局可变状态
// 默认值与生产库 algorithm_config 默认值一致
// ==========================================

use crate::domain::types::{MatchingStrategy, SpecialtyMatchMode, Urgency};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// ScoringWeights - 打分权重（非负，无需归一，内部按和归一）
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub proximity: f64,
    pub rating: f64,
    pub reviews: f64,
    pub response_rate: f64,
    pub verified: f64,
}

impl ScoringWeights {
    pub fn sum(&self) -> f64 {
        self.proximity + self.rating + self.reviews + self.response_rate + self.verified
    }
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            proximity: 25.0,
            rating: 30.0,
            reviews: 15.0,
            response_rate: 10.0,
            verified: 20.0,
        }
    }
}

// ==========================================
// UrgencyMultipliers - 紧急程度乘数
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UrgencyMultipliers {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub emergency: f64,
}

impl UrgencyMultipliers {
    pub fn for_urgency(&self, urgency: Urgency) -> f64 {
        match urgency {
            Urgency::Low => self.low,
            Urgency::Medium => self.medium,
            Urgency::High => self.high,
            Urgency::Emergency => self.emergency,
        }
    }
}

impl Default for UrgencyMultipliers {
    fn default() -> Self {
        Self {
            low: 1.0,
            medium: 1.0,
            high: 1.5,
            emergency: 2.0,
        }
    }
}

// ==========================================
// PolicySnapshot - 策略快照（不可变）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySnapshot {
    // ===== 版本信息 =====
    pub version: i64,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<String>,

    // ===== 选择算法 =====
    pub matching_strategy: MatchingStrategy,
    pub max_artisans_per_lead: i64,
    pub prefer_claimed: bool,

    // ===== 硬过滤 =====
    pub require_specialty_match: bool,
    pub specialty_match_mode: SpecialtyMatchMode,
    pub require_same_department: bool,
    pub geo_radius_km: f64,
    pub require_verified_urgent: bool,
    pub min_rating: f64,
    pub exclude_inactive_days: i64,
    /// 0 = 不限
    pub daily_lead_quota: i64,
    /// 0 = 不限
    pub monthly_lead_quota: i64,
    pub cooldown_minutes: i64,

    // ===== 打分 =====
    pub weights: ScoringWeights,
    pub urgency_multipliers: UrgencyMultipliers,

    // ===== 计时器 =====
    pub lead_expiry_hours: i64,
    pub quote_expiry_hours: i64,
    pub auto_reassign_hours: i64,
}

impl Default for PolicySnapshot {
    fn default() -> Self {
        Self {
            version: 0,
            updated_at: None,
            updated_by: None,
            matching_strategy: MatchingStrategy::Scored,
            max_artisans_per_lead: 3,
            prefer_claimed: true,
            require_specialty_match: true,
            specialty_match_mode: SpecialtyMatchMode::Category,
            require_same_department: false,
            geo_radius_km: 50.0,
            require_verified_urgent: false,
            min_rating: 0.0,
            exclude_inactive_days: 90,
            daily_lead_quota: 0,
            monthly_lead_quota: 0,
            cooldown_minutes: 30,
            weights: ScoringWeights::default(),
            urgency_multipliers: UrgencyMultipliers::default(),
            lead_expiry_hours: 48,
            quote_expiry_hours: 72,
            auto_reassign_hours: 24,
        }
    }
}

impl PolicySnapshot {
    pub fn multiplier_for(&self, urgency: Urgency) -> f64 {
        self.urgency_multipliers.for_urgency(urgency)
    }
}
