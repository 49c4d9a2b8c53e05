// ==========================================
// 线索派单引擎 - 领域类型定义
// ==========================================
// 序列化格式: snake_case（与数据库存储值一致）
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ==========================================
// 紧急程度 (Urgency)
// ==========================================
// 顺序: Low < Medium < High < Emergency
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Emergency,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Low => "low",
            Urgency::Medium => "medium",
            Urgency::High => "high",
            Urgency::Emergency => "emergency",
        }
    }

    /// high / emergency 视为紧急线索（影响“紧急需认证”过滤）
    pub fn is_urgent(&self) -> bool {
        matches!(self, Urgency::High | Urgency::Emergency)
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Urgency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Urgency::Low),
            "medium" | "normal" => Ok(Urgency::Medium),
            "high" | "urgent" => Ok(Urgency::High),
            "emergency" => Ok(Urgency::Emergency),
            other => Err(format!("未知紧急程度: {}", other)),
        }
    }
}

// ==========================================
// 线索状态 (Lead Status)
// ==========================================
// 流转: new → contacted → converted；new/contacted → lost（终态）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Contacted,
    Converted,
    Lost,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Contacted => "contacted",
            LeadStatus::Converted => "converted",
            LeadStatus::Lost => "lost",
        }
    }

    /// 仍可派单的状态
    pub fn is_open(&self) -> bool {
        matches!(self, LeadStatus::New | LeadStatus::Contacted)
    }

    /// 校验状态流转是否合法
    pub fn can_transition_to(&self, next: LeadStatus) -> bool {
        matches!(
            (self, next),
            (LeadStatus::New, LeadStatus::Contacted)
                | (LeadStatus::Contacted, LeadStatus::Converted)
                | (LeadStatus::New, LeadStatus::Lost)
                | (LeadStatus::Contacted, LeadStatus::Lost)
        )
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "new" => Ok(LeadStatus::New),
            "contacted" => Ok(LeadStatus::Contacted),
            "converted" => Ok(LeadStatus::Converted),
            "lost" => Ok(LeadStatus::Lost),
            other => Err(format!("未知线索状态: {}", other)),
        }
    }
}

// ==========================================
// 指派状态 (Assignment Status)
// ==========================================
// 流转: pending → viewed → responded | declined；任一非终态 → expired
// 红线: 不允许回退
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Pending,
    Viewed,
    Responded,
    Declined,
    Expired,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Pending => "pending",
            AssignmentStatus::Viewed => "viewed",
            AssignmentStatus::Responded => "responded",
            AssignmentStatus::Declined => "declined",
            AssignmentStatus::Expired => "expired",
        }
    }

    /// 活跃指派（占用派单宽度）
    pub fn is_active(&self) -> bool {
        matches!(self, AssignmentStatus::Pending | AssignmentStatus::Viewed)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// 校验状态流转是否合法
    pub fn can_transition_to(&self, next: AssignmentStatus) -> bool {
        use AssignmentStatus::*;

        matches!(
            (self, next),
            (Pending, Viewed)
                | (Viewed, Responded)
                | (Viewed, Declined)
                | (Pending, Expired)
                | (Viewed, Expired)
        )
    }
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssignmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(AssignmentStatus::Pending),
            "viewed" => Ok(AssignmentStatus::Viewed),
            "responded" => Ok(AssignmentStatus::Responded),
            "declined" => Ok(AssignmentStatus::Declined),
            "expired" => Ok(AssignmentStatus::Expired),
            other => Err(format!("未知指派状态: {}", other)),
        }
    }
}

// ==========================================
// 匹配策略 (Matching Strategy)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchingStrategy {
    Scored,
    Geographic,
    RoundRobin,
}

impl MatchingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchingStrategy::Scored => "scored",
            MatchingStrategy::Geographic => "geographic",
            MatchingStrategy::RoundRobin => "round_robin",
        }
    }
}

impl Default for MatchingStrategy {
    fn default() -> Self {
        MatchingStrategy::Scored
    }
}

impl fmt::Display for MatchingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "scored" => Ok(MatchingStrategy::Scored),
            "geographic" => Ok(MatchingStrategy::Geographic),
            "round_robin" | "round-robin" => Ok(MatchingStrategy::RoundRobin),
            other => Err(format!("未知匹配策略: {}", other)),
        }
    }
}

// ==========================================
// 专业匹配模式 (Specialty Match Mode)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialtyMatchMode {
    Exact,
    Fuzzy,
    Category,
}

impl SpecialtyMatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpecialtyMatchMode::Exact => "exact",
            SpecialtyMatchMode::Fuzzy => "fuzzy",
            SpecialtyMatchMode::Category => "category",
        }
    }
}

impl fmt::Display for SpecialtyMatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpecialtyMatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "exact" => Ok(SpecialtyMatchMode::Exact),
            "fuzzy" => Ok(SpecialtyMatchMode::Fuzzy),
            "category" => Ok(SpecialtyMatchMode::Category),
            other => Err(format!("未知专业匹配模式: {}", other)),
        }
    }
}

// ==========================================
// 线索来源 (Lead Source)
// ==========================================
// 多套历史线索表在边界处归一化，核心流程不再判断字符串标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadSource {
    /// 当前线索表 (leads)
    Primary,
    /// 历史报价请求表 (devis_requests)
    Legacy,
}

impl LeadSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadSource::Primary => "primary",
            LeadSource::Legacy => "legacy",
        }
    }

    /// 从来源表名解析
    pub fn from_source_table(table: &str) -> Option<Self> {
        match table.trim().to_lowercase().as_str() {
            "leads" | "primary" => Some(LeadSource::Primary),
            "devis_requests" | "legacy" => Some(LeadSource::Legacy),
            _ => None,
        }
    }
}

impl fmt::Display for LeadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==========================================
// 派单事件类型 (Dispatch Event Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchEventType {
    Created,
    Scored,
    Assigned,
    NoCandidates,
    DispatchConflict,
    Viewed,
    Responded,
    Declined,
    Billed,
    Expired,
    Reassigned,
    PolicyUpdated,
    LeadStatusChanged,
}

impl DispatchEventType {
    /// 转换为字符串 (用于数据库存储)
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchEventType::Created => "created",
            DispatchEventType::Scored => "scored",
            DispatchEventType::Assigned => "assigned",
            DispatchEventType::NoCandidates => "no_candidates",
            DispatchEventType::DispatchConflict => "dispatch_conflict",
            DispatchEventType::Viewed => "viewed",
            DispatchEventType::Responded => "responded",
            DispatchEventType::Declined => "declined",
            DispatchEventType::Billed => "billed",
            DispatchEventType::Expired => "expired",
            DispatchEventType::Reassigned => "reassigned",
            DispatchEventType::PolicyUpdated => "policy_updated",
            DispatchEventType::LeadStatusChanged => "lead_status_changed",
        }
    }
}

impl fmt::Display for DispatchEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DispatchEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = match s {
            "created" => DispatchEventType::Created,
            "scored" => DispatchEventType::Scored,
            "assigned" => DispatchEventType::Assigned,
            "no_candidates" => DispatchEventType::NoCandidates,
            "dispatch_conflict" => DispatchEventType::DispatchConflict,
            "viewed" => DispatchEventType::Viewed,
            "responded" => DispatchEventType::Responded,
            "declined" => DispatchEventType::Declined,
            "billed" => DispatchEventType::Billed,
            "expired" => DispatchEventType::Expired,
            "reassigned" => DispatchEventType::Reassigned,
            "policy_updated" => DispatchEventType::PolicyUpdated,
            "lead_status_changed" => DispatchEventType::LeadStatusChanged,
            other => return Err(format!("未知事件类型: {}", other)),
        };
        Ok(t)
    }
}
