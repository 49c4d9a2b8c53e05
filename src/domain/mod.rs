// ==========================================
// 线索派单引擎 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、状态流转规则
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod assignment;
pub mod dispatch_event;
pub mod lead;
pub mod policy;
pub mod provider;
pub mod types;

// 重导出核心类型
pub use assignment::{Assignment, AssignmentStats, ContactOutcome, OutcomeUpdate};
pub use dispatch_event::DispatchEvent;
pub use lead::{DispatchRequest, GeoPoint, Lead};
pub use policy::{PolicySnapshot, ScoringWeights, UrgencyMultipliers};
pub use provider::{Provider, ProviderWorkload};
pub use types::{
    AssignmentStatus, DispatchEventType, LeadSource, LeadStatus, MatchingStrategy,
    SpecialtyMatchMode, Urgency,
};
