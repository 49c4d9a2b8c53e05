// ==========================================
// 线索派单引擎 - 引擎层错误类型
// ==========================================
// 说明:
// - 无候选不是错误（记录 no_candidates 事件，等待补派）
// - 落库竞争在账本内部顺延处理，不会以错误形式冒出
// ==========================================

use crate::config::PolicyError;
use crate::repository::RepositoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    /// 策略不可读：本轮派单失败，由下一次触发重试
    #[error("派单策略不可用: {0}")]
    PolicyUnavailable(#[from] PolicyError),

    #[error("无效的派单请求: {0}")]
    InvalidInput(String),

    #[error("线索不存在: {0}")]
    LeadNotFound(String),

    #[error("指派不存在: {0}")]
    AssignmentNotFound(String),

    #[error("无效的状态转换: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    /// 读取后被并发修改（调用方可重试）
    #[error("并发修改冲突: {0}")]
    ConcurrentModification(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub type DispatchResult<T> = Result<T, DispatchError>;
