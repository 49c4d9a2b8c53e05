// ==========================================
// 线索派单引擎 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// 约定: `*_with(conn, ..)` 关联函数用于在调用方事务内执行
// ==========================================

pub mod assignment_repo;
pub mod dispatch_event_repo;
pub mod error;
pub mod lead_repo;
pub mod provider_repo;
pub mod service_catalog_repo;

// 重导出核心仓储
pub use assignment_repo::{AssignmentLedger, LedgerCandidate, LedgerConflict, OutcomeWrite, PersistReport};
pub use dispatch_event_repo::DispatchEventRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use lead_repo::LeadRepository;
pub use provider_repo::ProviderRepository;
pub use service_catalog_repo::ServiceCatalogRepository;
