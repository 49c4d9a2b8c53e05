// ==========================================
// 线索派单引擎 - 候选过滤引擎
// ==========================================
// 职责: 按硬约束筛出可派单的服务商（不打分）
// 输入: Lead + PolicySnapshot + 服务商全集 + 近期负载
// 输出: 候选（附距离）+ 每个被排除者的原因
// 红线: 有序 AND 链，任何一环不通过即排除，无部分得分
// ==========================================

use crate::domain::assignment::Assignment;
use crate::domain::lead::Lead;
use crate::domain::policy::PolicySnapshot;
use crate::domain::provider::{effective_quota, remaining_quota, Provider, ProviderWorkload};
use crate::domain::types::{AssignmentStatus, SpecialtyMatchMode};
use crate::engine::geo::distance_km;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

// ==========================================
// 排除原因
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Inactive,
    AlreadyAssigned,
    PreviouslyExpired,
    SpecialtyMismatch,
    DepartmentMismatch,
    OutOfRadius,
    UnverifiedForUrgent,
    RatingBelowMin,
    InactiveTooLong,
    DailyQuotaExhausted,
    MonthlyQuotaExhausted,
    Cooldown,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Inactive => "inactive",
            RejectReason::AlreadyAssigned => "already_assigned",
            RejectReason::PreviouslyExpired => "previously_expired",
            RejectReason::SpecialtyMismatch => "specialty_mismatch",
            RejectReason::DepartmentMismatch => "department_mismatch",
            RejectReason::OutOfRadius => "out_of_radius",
            RejectReason::UnverifiedForUrgent => "unverified_for_urgent",
            RejectReason::RatingBelowMin => "rating_below_min",
            RejectReason::InactiveTooLong => "inactive_too_long",
            RejectReason::DailyQuotaExhausted => "daily_quota_exhausted",
            RejectReason::MonthlyQuotaExhausted => "monthly_quota_exhausted",
            RejectReason::Cooldown => "cooldown",
        }
    }
}

/// 通过过滤的候选
#[derive(Debug, Clone)]
pub struct Candidate {
    pub provider: Provider,
    /// 与线索的距离（任一方无坐标时为 None）
    pub distance_km: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub provider_id: String,
    pub reason: RejectReason,
}

/// 过滤上下文（单次派单内不可变）
pub struct FilterInput<'a> {
    pub lead: &'a Lead,
    pub policy: &'a PolicySnapshot,
    /// 该线索已有的全部指派
    pub lead_assignments: &'a [Assignment],
    /// provider_id → 近期负载
    pub workloads: &'a HashMap<String, ProviderWorkload>,
    /// 服务名 → 类目（小写）
    pub catalog: &'a HashMap<String, String>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct FilterOutcome {
    pub candidates: Vec<Candidate>,
    pub rejections: Vec<Rejection>,
}

impl FilterOutcome {
    /// 按原因汇总排除数量（写入 scored 事件）
    pub fn rejection_summary(&self) -> BTreeMap<&'static str, usize> {
        let mut summary = BTreeMap::new();
        for r in &self.rejections {
            *summary.entry(r.reason.as_str()).or_insert(0) += 1;
        }
        summary
    }
}

// ==========================================
// CandidateFilter - 候选过滤引擎
// ==========================================
#[derive(Debug, Default)]
pub struct CandidateFilter;

impl CandidateFilter {
    pub fn new() -> Self {
        Self
    }

    /// 过滤服务商全集
    pub fn filter(&self, input: &FilterInput<'_>, providers: Vec<Provider>) -> FilterOutcome {
        let mut outcome = FilterOutcome::default();

        for provider in providers {
            match self.evaluate(input, &provider) {
                Ok(distance_km) => outcome.candidates.push(Candidate {
                    provider,
                    distance_km,
                }),
                Err(reason) => outcome.rejections.push(Rejection {
                    provider_id: provider.provider_id,
                    reason,
                }),
            }
        }
        outcome
    }

    /// 判定单个服务商
    ///
    /// # 返回
    /// - Ok(distance_km): 通过，附距离
    /// - Err(reason): 第一个不通过的约束
    pub fn evaluate(
        &self,
        input: &FilterInput<'_>,
        provider: &Provider,
    ) -> Result<Option<f64>, RejectReason> {
        let lead = input.lead;
        let policy = input.policy;

        // 1) 启用状态
        if !provider.is_active {
            return Err(RejectReason::Inactive);
        }

        // 2) 同一线索不重复派给同一服务商
        check_prior_assignments(input.lead_assignments, &provider.provider_id)?;

        // 3) 专业匹配
        if policy.require_specialty_match
            && !specialty_matches(
                policy.specialty_match_mode,
                &lead.service_name,
                &provider.specialties,
                input.catalog,
            )
        {
            return Err(RejectReason::SpecialtyMismatch);
        }

        // 4) 地理
        let distance = distance_km(lead.location, provider.location);
        check_geography(lead, provider, policy, distance)?;

        // 5) 紧急线索只派认证服务商
        if policy.require_verified_urgent && lead.urgency.is_urgent() && !provider.is_verified {
            return Err(RejectReason::UnverifiedForUrgent);
        }

        // 6) 评分下限（无评分按 0 计）
        if provider.rating.unwrap_or(0.0) < policy.min_rating {
            return Err(RejectReason::RatingBelowMin);
        }

        // 7) 活跃度（未知活跃时间视为通过）
        if policy.exclude_inactive_days > 0 {
            if let Some(last_active) = provider.last_active_at {
                if last_active < input.now - Duration::days(policy.exclude_inactive_days) {
                    return Err(RejectReason::InactiveTooLong);
                }
            }
        }

        // 8) 配额
        let workload = input
            .workloads
            .get(&provider.provider_id)
            .cloned()
            .unwrap_or_default();
        let daily_limit = effective_quota(policy.daily_lead_quota, provider.daily_quota);
        if remaining_quota(daily_limit, workload.assigned_last_day) == Some(0) {
            return Err(RejectReason::DailyQuotaExhausted);
        }
        let monthly_limit = effective_quota(policy.monthly_lead_quota, provider.monthly_quota);
        if remaining_quota(monthly_limit, workload.assigned_last_month) == Some(0) {
            return Err(RejectReason::MonthlyQuotaExhausted);
        }

        // 9) 冷却
        if workload.in_cooldown(policy.cooldown_minutes, input.now) {
            return Err(RejectReason::Cooldown);
        }

        Ok(distance)
    }
}

/// 已有指派检查
///
/// - 非过期指派（活跃或已响应/拒绝）→ 排除
/// - 仅有过期指派 → 只有线索当前无活跃指派时才允许重新派给他
fn check_prior_assignments(assignments: &[Assignment], provider_id: &str) -> Result<(), RejectReason> {
    let mut has_expired = false;
    for a in assignments.iter().filter(|a| a.provider_id == provider_id) {
        if a.status == AssignmentStatus::Expired {
            has_expired = true;
        } else {
            return Err(RejectReason::AlreadyAssigned);
        }
    }

    if has_expired && assignments.iter().any(|a| a.status.is_active()) {
        return Err(RejectReason::PreviouslyExpired);
    }
    Ok(())
}

/// 地理约束
///
/// - require_same_department: 双方省编号必须一致（线索无省编号时跳过该项）
/// - 双方坐标已知: 距离不超过半径（服务商自定义半径优先）
/// - 坐标未知: 退化为省编号一致；线索也无省编号时不做地理约束
fn check_geography(
    lead: &Lead,
    provider: &Provider,
    policy: &PolicySnapshot,
    distance: Option<f64>,
) -> Result<(), RejectReason> {
    let same_department = match (&lead.department, &provider.department) {
        (Some(l), Some(p)) => Some(l.eq_ignore_ascii_case(p)),
        (Some(_), None) => Some(false),
        (None, _) => None,
    };

    if policy.require_same_department && same_department == Some(false) {
        return Err(RejectReason::DepartmentMismatch);
    }

    match distance {
        Some(d) => {
            let radius = provider.radius_km.unwrap_or(policy.geo_radius_km);
            if d > radius {
                return Err(RejectReason::OutOfRadius);
            }
        }
        None => {
            if same_department == Some(false) {
                return Err(RejectReason::DepartmentMismatch);
            }
        }
    }
    Ok(())
}

/// 专业匹配
pub fn specialty_matches(
    mode: SpecialtyMatchMode,
    service_name: &str,
    specialties: &[String],
    catalog: &HashMap<String, String>,
) -> bool {
    let service = normalize_specialty(service_name);
    if service.is_empty() {
        return false;
    }

    specialties.iter().any(|raw| {
        let specialty = normalize_specialty(raw);
        if specialty.is_empty() {
            return false;
        }
        match mode {
            SpecialtyMatchMode::Exact => specialty == service,
            SpecialtyMatchMode::Fuzzy => fuzzy_match(&service, &specialty),
            SpecialtyMatchMode::Category => {
                match (catalog.get(&service), catalog.get(&specialty)) {
                    (Some(a), Some(b)) => a == b,
                    _ => fuzzy_match(&service, &specialty),
                }
            }
        }
    })
}

fn fuzzy_match(a: &str, b: &str) -> bool {
    a.contains(b) || b.contains(a)
}

/// 专业名规范化: 去首尾空白、小写、去掉常见法语重音
pub fn normalize_specialty(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'à' | 'â' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'î' | 'ï' => 'i',
            'ô' | 'ö' => 'o',
            'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect()
}
