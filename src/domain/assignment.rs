// ==========================================
// 线索派单引擎 - 指派与联系结果领域模型
// ==========================================
// 红线: 指派状态是显式枚举，不从时间戳列推断
// ==========================================

use crate::domain::types::AssignmentStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// Assignment - 一次指派（某线索给某服务商）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub assignment_id: String,
    pub lead_id: String,
    pub provider_id: String,
    /// 本轮内名次（从 0 开始，与选择顺序一致）
    pub rank_position: i64,
    pub score: f64,
    pub distance_km: Option<f64>,
    pub status: AssignmentStatus,
    /// 派单轮次（首次为 1，补派递增）
    pub dispatch_round: i64,
    /// 派单时使用的策略版本
    pub policy_version: i64,
    pub assigned_at: DateTime<Utc>,
    pub viewed_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

// ==========================================
// ContactOutcome - 联系结果（与指派一一对应）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactOutcome {
    pub assignment_id: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub viewed_at: Option<DateTime<Utc>>,
    pub responded_at: Option<DateTime<Utc>>,
    pub declined_at: Option<DateTime<Utc>>,
    pub feedback: Option<String>,
    pub is_billed: bool,
    pub billed_amount: Option<f64>,
    pub billed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ContactOutcome {
    pub fn empty(assignment_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            assignment_id: assignment_id.to_string(),
            sent_at: None,
            viewed_at: None,
            responded_at: None,
            declined_at: None,
            feedback: None,
            is_billed: false,
            billed_amount: None,
            billed_at: None,
            updated_at: now,
        }
    }
}

// ==========================================
// OutcomeUpdate - 联系流程上报的结果变更
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutcomeUpdate {
    /// 已送达服务商（不改变指派状态）
    Delivered,
    /// 服务商查看
    Viewed,
    /// 服务商响应（报价/联系客户）
    Responded { feedback: Option<String> },
    /// 服务商拒绝
    Declined { reason: Option<String> },
    /// 计费
    Billed { amount: f64 },
}

impl OutcomeUpdate {
    pub fn kind(&self) -> &'static str {
        match self {
            OutcomeUpdate::Delivered => "delivered",
            OutcomeUpdate::Viewed => "viewed",
            OutcomeUpdate::Responded { .. } => "responded",
            OutcomeUpdate::Declined { .. } => "declined",
            OutcomeUpdate::Billed { .. } => "billed",
        }
    }

    /// 该更新驱动的目标指派状态（Delivered / Billed 不改变状态）
    pub fn target_status(&self) -> Option<AssignmentStatus> {
        match self {
            OutcomeUpdate::Viewed => Some(AssignmentStatus::Viewed),
            OutcomeUpdate::Responded { .. } => Some(AssignmentStatus::Responded),
            OutcomeUpdate::Declined { .. } => Some(AssignmentStatus::Declined),
            OutcomeUpdate::Delivered | OutcomeUpdate::Billed { .. } => None,
        }
    }
}

// ==========================================
// AssignmentStats - 派单看板统计
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssignmentStats {
    pub pending: i64,
    pub viewed: i64,
    pub responded: i64,
    pub declined: i64,
    pub expired: i64,
    pub total: i64,
}

impl AssignmentStats {
    /// 响应率: (viewed + responded) / total，与运营看板口径一致
    pub fn engagement_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.viewed + self.responded) as f64 / self.total as f64
        }
    }
}
