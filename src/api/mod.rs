// ==========================================
// 线索派单引擎 - API 层
// ==========================================
// 职责: 提供业务 API 接口，供 CLI 与外部协作方调用
// ==========================================

pub mod dispatch_api;
pub mod error;
pub mod policy_api;

// 重导出核心类型
pub use dispatch_api::{DispatchApi, DispatchBoard, LeadDetail};
pub use error::{ApiError, ApiResult};
pub use policy_api::PolicyApi;
