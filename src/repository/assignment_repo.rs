// ==========================================
// 线索派单引擎 - 指派账本
// ==========================================
// 红线:
// - 同一线索的活跃指派数永不超过派单宽度
// - 同一 (lead, provider) 最多一条活跃指派（部分唯一索引兜底）
// - 一轮派单的全部指派在同一事务内写入，要么全成，要么全不成
// ==========================================

mod core;
mod queries;

#[cfg(test)]
mod tests;

pub use core::{AssignmentLedger, LedgerCandidate, LedgerConflict, OutcomeWrite, PersistReport};
