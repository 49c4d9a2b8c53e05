use crate::db::format_ts;
use crate::domain::assignment::{Assignment, ContactOutcome};
use crate::domain::dispatch_event::DispatchEvent;
use crate::domain::policy::PolicySnapshot;
use crate::domain::provider::{effective_quota, remaining_quota};
use crate::domain::types::{AssignmentStatus, DispatchEventType, LeadStatus};
use crate::repository::dispatch_event_repo::DispatchEventRepository;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::lead_repo::LeadRepository;
use crate::repository::provider_repo::ProviderRepository;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, TransactionBehavior};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

// ==========================================
// 落库输入/输出
// ==========================================

/// 待落库的候选（已按选择顺序排好）
#[derive(Debug, Clone)]
pub struct LedgerCandidate {
    pub provider_id: String,
    pub score: f64,
    pub distance_km: Option<f64>,
    /// 打分明细，写入 assigned 事件
    pub breakdown: Option<JsonValue>,
}

/// 落库时被丢弃的候选
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerConflict {
    pub provider_id: String,
    /// duplicate | daily_quota | monthly_quota | cooldown
    pub reason: String,
}

/// 一轮派单的落库结果
#[derive(Debug, Clone, Default)]
pub struct PersistReport {
    pub dispatch_round: i64,
    /// 落库前该线索的空余名额
    pub free_slots: i64,
    pub assignments: Vec<Assignment>,
    pub conflicts: Vec<LedgerConflict>,
    /// 本事务内写入的全部事件（提交后交给发布者）
    pub events: Vec<DispatchEvent>,
}

/// 结果回写（由结果跟踪器校验后构造）
#[derive(Debug, Clone)]
pub struct OutcomeWrite {
    pub assignment_id: String,
    pub lead_id: String,
    pub provider_id: String,
    /// 读取时观察到的状态（条件更新依据）
    pub expected_status: AssignmentStatus,
    pub next_status: AssignmentStatus,
    /// 读取时观察到的计费标记（防止重复计费）
    pub expected_billed: bool,
    pub outcome: ContactOutcome,
    /// 是否计入服务商响应数
    pub count_response: bool,
    /// 线索状态联动 (from, to)
    pub lead_transition: Option<(LeadStatus, LeadStatus)>,
    pub events: Vec<DispatchEvent>,
}

// ==========================================
// AssignmentLedger - 指派账本
// ==========================================
pub struct AssignmentLedger {
    conn: Arc<Mutex<Connection>>,
}

impl AssignmentLedger {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub(super) fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 派单落库
    // ==========================================

    /// 原子落库一轮派单
    ///
    /// # 参数
    /// - `lead_id`: 线索ID（必须已存在）
    /// - `ranked`: 按选择顺序排好的完整候选列表（不截断，冲突时顺延）
    /// - `policy`: 本轮使用的策略快照
    /// - `run_events`: 需与本轮指派同事务写入的事件（如 scored）
    /// - `now`: 本轮统一的 assigned_at
    ///
    /// # 说明
    /// - IMMEDIATE 事务：写锁在读取活跃数之前取得，复核与写入之间无其他写者
    /// - 唯一约束冲突 / 配额用尽 / 冷却未过 → 丢弃该候选，继续下一个
    pub fn persist(
        &self,
        lead_id: &str,
        ranked: &[LedgerCandidate],
        policy: &PolicySnapshot,
        run_events: Vec<DispatchEvent>,
        now: DateTime<Utc>,
    ) -> RepositoryResult<PersistReport> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let active = Self::count_active_with(&tx, lead_id)?;
        let free_slots = (policy.max_artisans_per_lead - active).max(0);
        let dispatch_round = LeadRepository::record_dispatch_attempt_with(&tx, lead_id, now)?;

        let mut report = PersistReport {
            dispatch_round,
            free_slots,
            ..Default::default()
        };

        for event in run_events {
            DispatchEventRepository::insert_with(&tx, &event)?;
            report.events.push(event);
        }

        for candidate in ranked {
            if report.assignments.len() as i64 >= free_slots {
                break;
            }

            if let Some(reason) = Self::recheck_capacity(&tx, &candidate.provider_id, policy, now)? {
                Self::push_conflict(&tx, &mut report, lead_id, candidate, reason, now)?;
                continue;
            }

            let assignment = Assignment {
                assignment_id: uuid::Uuid::new_v4().to_string(),
                lead_id: lead_id.to_string(),
                provider_id: candidate.provider_id.clone(),
                rank_position: report.assignments.len() as i64,
                score: candidate.score,
                distance_km: candidate.distance_km,
                status: AssignmentStatus::Pending,
                dispatch_round,
                policy_version: policy.version,
                assigned_at: now,
                viewed_at: None,
                resolved_at: None,
            };

            match Self::insert_with(&tx, &assignment) {
                Ok(()) => {}
                Err(e) if e.is_unique_violation() => {
                    Self::push_conflict(&tx, &mut report, lead_id, candidate, "duplicate", now)?;
                    continue;
                }
                Err(e) => return Err(e),
            }

            Self::insert_outcome_with(&tx, &ContactOutcome::empty(&assignment.assignment_id, now))?;
            ProviderRepository::record_offer_received_with(&tx, &assignment.provider_id)?;

            let event = DispatchEvent::new(Some(lead_id), DispatchEventType::Assigned, now)
                .with_provider(&assignment.provider_id)
                .with_metadata(&json!({
                    "assignment_id": assignment.assignment_id,
                    "rank_position": assignment.rank_position,
                    "score": assignment.score,
                    "distance_km": assignment.distance_km,
                    "dispatch_round": dispatch_round,
                    "policy_version": policy.version,
                    "breakdown": candidate.breakdown,
                }));
            DispatchEventRepository::insert_with(&tx, &event)?;
            report.events.push(event);
            report.assignments.push(assignment);
        }

        tx.commit()?;

        debug!(
            lead_id = %lead_id,
            dispatch_round,
            assigned = report.assignments.len(),
            conflicts = report.conflicts.len(),
            "派单落库完成"
        );
        Ok(report)
    }

    /// 事务内复核配额与冷却
    ///
    /// # 返回
    /// - None: 可以指派
    /// - Some(reason): 冲突原因
    fn recheck_capacity(
        conn: &Connection,
        provider_id: &str,
        policy: &PolicySnapshot,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Option<&'static str>> {
        let (plan_daily, plan_monthly) = ProviderRepository::plan_quotas_with(conn, provider_id)?;
        let workload = ProviderRepository::workload_with(conn, provider_id, now)?;

        let daily_limit = effective_quota(policy.daily_lead_quota, plan_daily);
        if remaining_quota(daily_limit, workload.assigned_last_day) == Some(0) {
            return Ok(Some("daily_quota"));
        }
        let monthly_limit = effective_quota(policy.monthly_lead_quota, plan_monthly);
        if remaining_quota(monthly_limit, workload.assigned_last_month) == Some(0) {
            return Ok(Some("monthly_quota"));
        }

        if workload.in_cooldown(policy.cooldown_minutes, now) {
            return Ok(Some("cooldown"));
        }
        Ok(None)
    }

    fn push_conflict(
        conn: &Connection,
        report: &mut PersistReport,
        lead_id: &str,
        candidate: &LedgerCandidate,
        reason: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<()> {
        warn!(
            lead_id = %lead_id,
            provider_id = %candidate.provider_id,
            reason,
            "派单冲突，顺延下一候选"
        );

        let event = DispatchEvent::new(Some(lead_id), DispatchEventType::DispatchConflict, now)
            .with_provider(&candidate.provider_id)
            .with_metadata(&json!({ "reason": reason, "score": candidate.score }));
        DispatchEventRepository::insert_with(conn, &event)?;

        report.events.push(event);
        report.conflicts.push(LedgerConflict {
            provider_id: candidate.provider_id.clone(),
            reason: reason.to_string(),
        });
        Ok(())
    }

    fn insert_with(conn: &Connection, a: &Assignment) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT INTO assignment (
                assignment_id, lead_id, provider_id, rank_position, score, distance_km,
                status, dispatch_round, policy_version, assigned_at, viewed_at, resolved_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                a.assignment_id,
                a.lead_id,
                a.provider_id,
                a.rank_position,
                a.score,
                a.distance_km,
                a.status.as_str(),
                a.dispatch_round,
                a.policy_version,
                format_ts(&a.assigned_at),
                a.viewed_at.as_ref().map(format_ts),
                a.resolved_at.as_ref().map(format_ts),
            ],
        )?;
        Ok(())
    }

    fn insert_outcome_with(conn: &Connection, o: &ContactOutcome) -> RepositoryResult<()> {
        conn.execute(
            "INSERT INTO contact_outcome (assignment_id, updated_at) VALUES (?1, ?2)",
            params![o.assignment_id, format_ts(&o.updated_at)],
        )?;
        Ok(())
    }

    pub(super) fn count_active_with(conn: &Connection, lead_id: &str) -> RepositoryResult<i64> {
        let count = conn.query_row(
            "SELECT COUNT(*) FROM assignment WHERE lead_id = ?1 AND status IN ('pending', 'viewed')",
            params![lead_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ==========================================
    // 状态变更
    // ==========================================

    /// 条件过期（仅当当前状态仍为 observed）
    ///
    /// # 返回
    /// - Ok(true): 本次完成过期
    /// - Ok(false): 状态已被他人改变（重复执行时为幂等空操作）
    pub fn expire_if(
        &self,
        assignment_id: &str,
        observed: AssignmentStatus,
        event: &DispatchEvent,
        now: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let rows = tx.execute(
            r#"
            UPDATE assignment SET status = 'expired', resolved_at = ?1
            WHERE assignment_id = ?2 AND status = ?3
            "#,
            params![format_ts(&now), assignment_id, observed.as_str()],
        )?;
        if rows == 0 {
            return Ok(false);
        }

        DispatchEventRepository::insert_with(&tx, event)?;
        tx.commit()?;
        Ok(true)
    }

    /// 原子回写联系结果
    ///
    /// # 返回
    /// - Ok(true): 写入成功
    /// - Ok(false): 读取后状态已变化（并发回写），未做任何修改
    pub fn apply_outcome(&self, write: &OutcomeWrite, now: DateTime<Utc>) -> RepositoryResult<bool> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let ts = format_ts(&now);

        let viewed_ts = (write.next_status == AssignmentStatus::Viewed).then(|| ts.clone());
        let resolved_ts = write.next_status.is_terminal().then(|| ts.clone());

        let rows = tx.execute(
            r#"
            UPDATE assignment
            SET status = ?1,
                viewed_at = COALESCE(viewed_at, ?2),
                resolved_at = COALESCE(resolved_at, ?3)
            WHERE assignment_id = ?4 AND status = ?5
            "#,
            params![
                write.next_status.as_str(),
                viewed_ts,
                resolved_ts,
                write.assignment_id,
                write.expected_status.as_str(),
            ],
        )?;
        if rows == 0 {
            return Ok(false);
        }

        let o = &write.outcome;
        let rows = tx.execute(
            r#"
            UPDATE contact_outcome
            SET sent_at = ?1, viewed_at = ?2, responded_at = ?3, declined_at = ?4,
                feedback = ?5, is_billed = ?6, billed_amount = ?7, billed_at = ?8,
                updated_at = ?9
            WHERE assignment_id = ?10 AND is_billed = ?11
            "#,
            params![
                o.sent_at.as_ref().map(format_ts),
                o.viewed_at.as_ref().map(format_ts),
                o.responded_at.as_ref().map(format_ts),
                o.declined_at.as_ref().map(format_ts),
                o.feedback,
                o.is_billed,
                o.billed_amount,
                o.billed_at.as_ref().map(format_ts),
                ts,
                write.assignment_id,
                write.expected_billed,
            ],
        )?;
        if rows == 0 {
            return Ok(false);
        }

        if write.count_response {
            ProviderRepository::record_response_with(&tx, &write.provider_id)?;
        }
        if let Some((from, to)) = write.lead_transition {
            LeadRepository::set_status_if_with(&tx, &write.lead_id, from, to, now)?;
        }
        for event in &write.events {
            DispatchEventRepository::insert_with(&tx, event)?;
        }

        tx.commit()?;
        Ok(true)
    }
}
