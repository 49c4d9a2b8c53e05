// ==========================================
// 线索派单引擎 - 派单事件数据仓储
// ==========================================
// 红线: dispatch_event 只追加；本仓储不提供 UPDATE/DELETE
// ==========================================

mod core;
mod queries;


pub use core::DispatchEventRepository;
