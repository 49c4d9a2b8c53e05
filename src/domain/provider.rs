// ==========================================
// 线索派单引擎 - 服务商领域模型
// ==========================================
// 服务商资料由资料方维护，派单引擎只读；
// 例外: offers_received / offers_responded / response_rate 由引擎维护
// ==========================================

use crate::domain::lead::GeoPoint;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// Provider - 服务商
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub provider_id: String,
    pub name: String,
    pub specialties: Vec<String>,
    pub department: Option<String>,
    pub location: Option<GeoPoint>,
    /// 服务商自定义服务半径（覆盖策略默认半径）
    pub radius_km: Option<f64>,
    pub is_verified: bool,
    /// 已认领自己的主页
    pub is_claimed: bool,
    pub is_active: bool,
    pub rating: Option<f64>,
    pub review_count: i64,

    // ===== 引擎维护的反馈统计 =====
    pub response_rate: f64,
    pub offers_received: i64,
    pub offers_responded: i64,

    pub last_active_at: Option<DateTime<Utc>>,

    // ===== 套餐配额覆写（None = 仅受策略配额约束） =====
    pub daily_quota: Option<i64>,
    pub monthly_quota: Option<i64>,

    pub updated_at: DateTime<Utc>,
}

// ==========================================
// ProviderWorkload - 服务商近期派单负载
// ==========================================
// 每次派单时从指派账本实时统计，不单独存计数器
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderWorkload {
    /// 近 24 小时内新建指派数
    pub assigned_last_day: i64,
    /// 近 30 天内新建指派数
    pub assigned_last_month: i64,
    /// 最近一次指派时间（任何状态）
    pub last_assigned_at: Option<DateTime<Utc>>,
    /// 最近一次指派过期时间
    pub last_expired_at: Option<DateTime<Utc>>,
}

impl ProviderWorkload {
    /// 冷却起算点: 最近一次指派或最近一次过期，取较晚者
    pub fn cooldown_anchor(&self) -> Option<DateTime<Utc>> {
        match (self.last_assigned_at, self.last_expired_at) {
            (Some(a), Some(e)) => Some(a.max(e)),
            (a, e) => a.or(e),
        }
    }

    /// 冷却是否仍在生效
    pub fn in_cooldown(&self, cooldown_minutes: i64, now: DateTime<Utc>) -> bool {
        if cooldown_minutes <= 0 {
            return false;
        }
        self.cooldown_anchor()
            .map(|anchor| anchor > now - Duration::minutes(cooldown_minutes))
            .unwrap_or(false)
    }
}

/// 计算有效配额上限
///
/// # 参数
/// - policy_quota: 策略配额（0 = 不限）
/// - plan_quota: 服务商套餐配额（Some(0) = 暂停接单）
///
/// # 返回
/// - None: 不限
/// - Some(n): 上限 n
pub fn effective_quota(policy_quota: i64, plan_quota: Option<i64>) -> Option<i64> {
    let policy = if policy_quota > 0 { Some(policy_quota) } else { None };
    match (policy, plan_quota.map(|q| q.max(0))) {
        (Some(p), Some(q)) => Some(p.min(q)),
        (Some(p), None) => Some(p),
        (None, Some(q)) => Some(q),
        (None, None) => None,
    }
}

/// 剩余配额（None = 不限）
pub fn remaining_quota(limit: Option<i64>, used: i64) -> Option<i64> {
    limit.map(|l| (l - used).max(0))
}
