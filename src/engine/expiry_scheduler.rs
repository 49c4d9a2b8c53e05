// ==========================================
// 线索派单引擎 - 过期与补派调度器
// ==========================================
// 职责:
// 1) 过期: pending 超过 lead_expiry_hours / viewed 超过 quote_expiry_hours → expired
// 2) 补派: 仍开放、名额未满、距上次派单超过 auto_reassign_hours，
//    且上次派单之后有新过期指派（或从未派出）的线索重新派单
// 红线: 幂等，重复执行不改变结果
// 红线: 写入失败不丢弃（保持原状态，下一轮重试）
// ==========================================

use crate::config::PolicyReader;
use crate::domain::assignment::Assignment;
use crate::domain::dispatch_event::DispatchEvent;
use crate::domain::lead::Lead;
use crate::domain::policy::PolicySnapshot;
use crate::domain::types::{AssignmentStatus, DispatchEventType};
use crate::engine::error::DispatchResult;
use crate::engine::events::{publish_all, DispatchEventPublisher};
use crate::engine::orchestrator::DispatchOrchestrator;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// 一次巡检的结果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    /// 本轮置为 expired 的指派数
    pub expired: usize,
    /// 过期写入失败数（保持原状态，下一轮重试）
    pub failed: usize,
    /// 因指派过期而补派的线索
    pub redispatched_leads: Vec<String>,
    /// 从未成功派出、本轮重试的线索
    pub retried_leads: Vec<String>,
    /// 补派/重试过程中报错的线索数
    pub dispatch_errors: usize,
}

/// 补派判定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReassignKind {
    /// 上次派单之后有指派过期，补派
    Reassign,
    /// 没有任何指派，重试
    Retry,
}

pub struct ExpiryScheduler<P>
where
    P: PolicyReader,
{
    policy_reader: Arc<P>,
    orchestrator: Arc<DispatchOrchestrator<P>>,
    publisher: Arc<dyn DispatchEventPublisher>,
}

impl<P> ExpiryScheduler<P>
where
    P: PolicyReader,
{
    pub fn new(
        policy_reader: Arc<P>,
        orchestrator: Arc<DispatchOrchestrator<P>>,
        publisher: Arc<dyn DispatchEventPublisher>,
    ) -> Self {
        Self {
            policy_reader,
            orchestrator,
            publisher,
        }
    }

    /// 执行一次巡检
    ///
    /// # 返回
    /// - Err(PolicyUnavailable): 策略不可读，本轮不做任何修改
    #[instrument(skip(self, now))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> DispatchResult<SweepReport> {
        let policy = self.policy_reader.get_active_policy().await?;
        let mut report = SweepReport::default();

        // ==========================================
        // 步骤1: 过期超时指派
        // ==========================================
        self.expire_stale(&policy, now, &mut report)?;

        // ==========================================
        // 步骤2: 补派
        // ==========================================
        self.reassign_due(&policy, now, &mut report).await?;

        if report != SweepReport::default() {
            info!(
                expired = report.expired,
                failed = report.failed,
                redispatched = report.redispatched_leads.len(),
                retried = report.retried_leads.len(),
                dispatch_errors = report.dispatch_errors,
                "巡检完成"
            );
        } else {
            debug!("巡检完成，无变化");
        }
        Ok(report)
    }

    fn expire_stale(&self, policy: &PolicySnapshot, now: DateTime<Utc>, report: &mut SweepReport) -> DispatchResult<()> {
        let ledger = &self.orchestrator.repositories().ledger;
        let stale = ledger.list_stale(now, policy.lead_expiry_hours, policy.quote_expiry_hours)?;

        for assignment in stale {
            let event = expired_event(&assignment, policy, now);
            match ledger.expire_if(&assignment.assignment_id, assignment.status, &event, now) {
                Ok(true) => {
                    report.expired += 1;
                    publish_all(&self.publisher, std::slice::from_ref(&event));
                    debug!(
                        assignment_id = %assignment.assignment_id,
                        lead_id = %assignment.lead_id,
                        provider_id = %assignment.provider_id,
                        "指派已过期"
                    );
                }
                // 读取后已被结果回写推进，不再过期
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    error!(
                        assignment_id = %assignment.assignment_id,
                        error = %e,
                        "指派过期写入失败，下一轮重试"
                    );
                }
            }
        }
        Ok(())
    }

    async fn reassign_due(
        &self,
        policy: &PolicySnapshot,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> DispatchResult<()> {
        let repos = self.orchestrator.repositories();
        let cutoff = now - Duration::hours(policy.auto_reassign_hours);
        let due = repos.lead_repo.list_reassign_due(cutoff)?;

        for lead in due {
            let assignments = repos.ledger.find_by_lead(&lead.lead_id)?;
            let Some(kind) = reassign_kind(&lead, &assignments, policy) else {
                continue;
            };

            if kind == ReassignKind::Reassign {
                let event = reassigned_event(&lead, &assignments, now);
                repos.event_repo.insert(&event)?;
                publish_all(&self.publisher, std::slice::from_ref(&event));
            }

            match self.orchestrator.redispatch(&lead.lead_id, now).await {
                Ok(outcome) => {
                    debug!(
                        lead_id = %lead.lead_id,
                        assigned = outcome.provider_ids.len(),
                        "补派完成"
                    );
                    match kind {
                        ReassignKind::Reassign => report.redispatched_leads.push(lead.lead_id),
                        ReassignKind::Retry => report.retried_leads.push(lead.lead_id),
                    }
                }
                Err(e) => {
                    report.dispatch_errors += 1;
                    warn!(lead_id = %lead.lead_id, error = %e, "补派失败，下一轮重试");
                }
            }
        }
        Ok(())
    }

    /// 按固定间隔循环巡检，直到收到 Ctrl+C
    pub async fn run_forever(&self, interval: std::time::Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = interval.as_secs(), "过期巡检已启动");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep(Utc::now()).await {
                        warn!(error = %e, "巡检失败（下一轮重试）");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("收到 Ctrl+C，过期巡检退出");
                    break;
                }
            }
        }
    }
}

/// 判定线索是否需要补派
///
/// 只有上次派单之后发生的过期才触发补派；已被某一轮补派处理过的过期、
/// 以及单纯的拒绝都不会再触发
fn reassign_kind(lead: &Lead, assignments: &[Assignment], policy: &PolicySnapshot) -> Option<ReassignKind> {
    let active = assignments.iter().filter(|a| a.status.is_active()).count() as i64;
    if active >= policy.max_artisans_per_lead {
        return None;
    }
    if assignments.is_empty() {
        return Some(ReassignKind::Retry);
    }
    unhandled_expiries(lead, assignments)
        .next()
        .map(|_| ReassignKind::Reassign)
}

/// 上次派单之后才过期的指派
fn unhandled_expiries<'a>(lead: &'a Lead, assignments: &'a [Assignment]) -> impl Iterator<Item = &'a Assignment> + 'a {
    assignments.iter().filter(move |a| {
        a.status == AssignmentStatus::Expired
            && match (a.resolved_at, lead.last_dispatch_at) {
                (Some(resolved), Some(last)) => resolved > last,
                (_, None) => true,
                (None, Some(_)) => false,
            }
    })
}

fn expired_event(assignment: &Assignment, policy: &PolicySnapshot, now: DateTime<Utc>) -> DispatchEvent {
    let timeout_hours = match assignment.status {
        AssignmentStatus::Viewed => policy.quote_expiry_hours,
        _ => policy.lead_expiry_hours,
    };
    DispatchEvent::new(Some(&assignment.lead_id), DispatchEventType::Expired, now)
        .with_provider(&assignment.provider_id)
        .with_metadata(&json!({
            "assignment_id": assignment.assignment_id,
            "from": assignment.status.as_str(),
            "timeout_hours": timeout_hours,
            "dispatch_round": assignment.dispatch_round,
        }))
}

fn reassigned_event(lead: &Lead, assignments: &[Assignment], now: DateTime<Utc>) -> DispatchEvent {
    let expired: Vec<&str> = unhandled_expiries(lead, assignments)
        .map(|a| a.provider_id.as_str())
        .collect();
    DispatchEvent::new(Some(&lead.lead_id), DispatchEventType::Reassigned, now).with_metadata(&json!({
        "previous_round": lead.dispatch_round,
        "expired_providers": expired,
    }))
}
