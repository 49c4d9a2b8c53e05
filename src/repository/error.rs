// ==========================================
// 线索派单引擎 - 仓储层错误类型
// ==========================================
// 工具: thiserror 派生宏
// 约定: SQLite 约束/忙等错误在此归类，上层只按类别处理
// ==========================================

use thiserror::Error;

/// 仓储层错误类型
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("记录未找到: {entity} with id={id}")]
    NotFound { entity: String, id: String },

    #[error("数据库锁获取失败: {0}")]
    LockError(String),

    /// SQLite 忙（写锁被其他连接占用超过 busy_timeout）
    #[error("数据库事务失败: {0}")]
    DatabaseTransactionError(String),

    #[error("数据库查询失败: {0}")]
    DatabaseQueryError(String),

    /// 活跃指派唯一索引冲突 = 同一对 (线索, 服务商) 已有活跃指派
    #[error("唯一约束违反: {0}")]
    UniqueConstraintViolation(String),

    #[error("外键约束违反: {0}")]
    ForeignKeyViolation(String),

    #[error("字段值错误 (field={field}): {message}")]
    FieldValueError { field: String, message: String },
}

impl RepositoryError {
    pub fn not_found(entity: &str, id: &str) -> Self {
        RepositoryError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    /// 是否为唯一约束冲突（派单并发竞争的信号）
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, RepositoryError::UniqueConstraintViolation(_))
    }
}

impl From<rusqlite::Error> for RepositoryError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, msg) => match code.code {
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                    RepositoryError::DatabaseTransactionError(err.to_string())
                }
                rusqlite::ErrorCode::ConstraintViolation => {
                    let msg = msg.clone().unwrap_or_else(|| err.to_string());
                    if msg.contains("UNIQUE") {
                        RepositoryError::UniqueConstraintViolation(msg)
                    } else if msg.contains("FOREIGN KEY") {
                        RepositoryError::ForeignKeyViolation(msg)
                    } else {
                        RepositoryError::DatabaseQueryError(msg)
                    }
                }
                _ => RepositoryError::DatabaseQueryError(err.to_string()),
            },
            _ => RepositoryError::DatabaseQueryError(err.to_string()),
        }
    }
}

/// Result 类型别名
pub type RepositoryResult<T> = Result<T, RepositoryError>;
