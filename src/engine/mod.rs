// ==========================================
// 线索派单引擎 - 引擎层
// ==========================================
// 职责: 实现派单业务规则（过滤/打分/选择/状态机），不拼 SQL
// 红线: Engine 不拼 SQL，所有过滤必须输出 reason
// ==========================================

pub mod candidate_filter;
pub mod error;
pub mod events;
pub mod expiry_scheduler;
pub mod geo;
pub mod lead_lock;
pub mod orchestrator;
pub mod outcome_tracker;
pub mod repositories;
pub mod scoring;
pub mod selector;

// 重导出核心引擎
pub use candidate_filter::{Candidate, CandidateFilter, FilterInput, FilterOutcome, RejectReason};
pub use error::{DispatchError, DispatchResult};
pub use events::{DispatchEventPublisher, LoggingEventPublisher, NoOpEventPublisher};
pub use expiry_scheduler::{ExpiryScheduler, SweepReport};
pub use lead_lock::LeadLocks;
pub use orchestrator::{DispatchOrchestrator, DispatchOutcome};
pub use outcome_tracker::{OutcomeRecord, OutcomeTracker};
pub use repositories::DispatchRepositories;
pub use scoring::{ScoreBreakdown, ScoredCandidate, Scorer, ScoringStrategy};
pub use selector::Selector;
