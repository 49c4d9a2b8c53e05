// ==========================================
// 线索派单引擎 - API层错误类型
// ==========================================
// 职责: 将仓储/策略/引擎/导入错误转换为面向调用方的错误消息
// 红线: 并发冲突在账本内部顺延处理，不会出现在这里
// ==========================================

use crate::config::PolicyError;
use crate::engine::DispatchError;
use crate::importer::ImportError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 业务规则错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("业务规则违反: {0}")]
    BusinessRuleViolation(String),

    #[error("无效的状态转换: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    // ==========================================
    // 并发控制错误
    // ==========================================
    /// 读取后被并发修改，调用方可重试
    #[error("并发修改冲突: {0}")]
    ConcurrentModification(String),

    // ==========================================
    // 策略错误
    // ==========================================
    #[error("派单策略不可用: {0}")]
    PolicyUnavailable(String),

    #[error("策略配置校验失败: {0}")]
    PolicyValidation(String),

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    #[error("数据库事务失败: {0}")]
    DatabaseTransactionError(String),

    // ==========================================
    // 导入错误
    // ==========================================
    #[error("文件导入失败: {0}")]
    ImportError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseConnectionError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseTransactionError(msg) => ApiError::DatabaseTransactionError(msg),
            RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("外键约束违反: {}", msg))
            }
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InvalidInput(format!("字段{}错误: {}", field, message))
            }
        }
    }
}

impl From<PolicyError> for ApiError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::Unavailable(msg) => ApiError::PolicyUnavailable(msg),
            other => ApiError::PolicyValidation(other.to_string()),
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            // 派单时读到的策略不合法同样意味着策略不可用
            DispatchError::PolicyUnavailable(e) => ApiError::PolicyUnavailable(e.to_string()),
            DispatchError::InvalidInput(msg) => ApiError::InvalidInput(msg),
            DispatchError::LeadNotFound(id) => ApiError::NotFound(format!("线索(id={})不存在", id)),
            DispatchError::AssignmentNotFound(id) => {
                ApiError::NotFound(format!("指派(id={})不存在", id))
            }
            DispatchError::InvalidStateTransition { from, to } => {
                ApiError::InvalidStateTransition { from, to }
            }
            DispatchError::ConcurrentModification(msg) => ApiError::ConcurrentModification(msg),
            DispatchError::Repository(e) => e.into(),
        }
    }
}

impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::Repository(e) => e.into(),
            other => ApiError::ImportError(other.to_string()),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;
