// ==========================================
// 线索派单引擎 - 核心库
// ==========================================
// 技术栈: Rust + SQLite
// 系统定位: 为家装服务线索选择服务商、记录指派并跟踪联系结果
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 派单规则
pub mod engine;

// 导入层 - 服务商名录
pub mod importer;

// 配置层 - 派单策略
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA/建表）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// 应用层 - 装配
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    AssignmentStatus, DispatchEventType, LeadSource, LeadStatus, MatchingStrategy, SpecialtyMatchMode,
    Urgency,
};

// 领域实体
pub use domain::{
    Assignment, ContactOutcome, DispatchEvent, DispatchRequest, Lead, OutcomeUpdate, PolicySnapshot,
    Provider,
};

// 引擎
pub use engine::{
    DispatchError, DispatchOrchestrator, DispatchOutcome, ExpiryScheduler, OutcomeTracker, SweepReport,
};

// API
pub use api::{ApiError, DispatchApi, PolicyApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "线索派单引擎";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
