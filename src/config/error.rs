// ==========================================
// 线索派单引擎 - 策略配置错误类型
// ==========================================

use crate::repository::RepositoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PolicyError {
    /// 存储不可读（数据库/锁故障）→ 本轮派单失败，下次触发重试
    #[error("策略存储不可用: {0}")]
    Unavailable(String),

    #[error("策略配置值非法 (key={key}, value={value}): {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("策略配置越界 (key={key}): {message}")]
    OutOfRange { key: String, message: String },

    #[error("未知策略配置项: {0}")]
    UnknownKey(String),
}

impl From<rusqlite::Error> for PolicyError {
    fn from(err: rusqlite::Error) -> Self {
        PolicyError::Unavailable(err.to_string())
    }
}

impl From<RepositoryError> for PolicyError {
    fn from(err: RepositoryError) -> Self {
        PolicyError::Unavailable(err.to_string())
    }
}
