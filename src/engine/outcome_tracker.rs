// ==========================================
// 线索派单引擎 - 联系结果跟踪器
// ==========================================
// 职责: 消费联系流程回传的结果，推进指派状态机
// 状态机: pending → viewed → responded | declined
// 红线: 不允许回退；expired 之后不再接受任何结果
// 红线: 重复的相同结果是幂等空操作
// 副作用: responded 回写服务商响应率（影响后续打分）
// ==========================================

use crate::domain::assignment::{Assignment, ContactOutcome, OutcomeUpdate};
use crate::domain::dispatch_event::DispatchEvent;
use crate::domain::types::{AssignmentStatus, DispatchEventType, LeadStatus};
use crate::engine::error::{DispatchError, DispatchResult};
use crate::engine::events::{publish_all, DispatchEventPublisher};
use crate::engine::repositories::DispatchRepositories;
use crate::repository::OutcomeWrite;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// 一次结果回写的处理结果
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeRecord {
    pub assignment_id: String,
    pub status: AssignmentStatus,
    /// false 表示与已有结果相同，未做任何修改
    pub applied: bool,
    pub outcome: ContactOutcome,
}

pub struct OutcomeTracker {
    repos: DispatchRepositories,
    publisher: Arc<dyn DispatchEventPublisher>,
}

impl OutcomeTracker {
    pub fn new(repos: DispatchRepositories, publisher: Arc<dyn DispatchEventPublisher>) -> Self {
        Self { repos, publisher }
    }

    // ==========================================
    // 指派结果
    // ==========================================

    /// 记录一次联系结果
    ///
    /// # 参数
    /// - `assignment_id`: 指派ID
    /// - `update`: 结果类型（delivered/viewed/responded/declined/billed）
    /// - `actor`: 操作人（联系流程、服务商账号或运营）
    /// - `now`: 结果时间
    ///
    /// # 返回
    /// - Err(InvalidStateTransition): 乱序或回退的结果，或指派已过期
    /// - Err(ConcurrentModification): 读取后被并发修改
    #[instrument(skip(self, update, now), fields(kind = update.kind()))]
    pub fn record(
        &self,
        assignment_id: &str,
        update: &OutcomeUpdate,
        actor: &str,
        now: DateTime<Utc>,
    ) -> DispatchResult<OutcomeRecord> {
        let assignment = self
            .repos
            .ledger
            .find_by_id(assignment_id)?
            .ok_or_else(|| DispatchError::AssignmentNotFound(assignment_id.to_string()))?;
        let current = self
            .repos
            .ledger
            .find_outcome(assignment_id)?
            .unwrap_or_else(|| ContactOutcome::empty(assignment_id, now));

        if assignment.status == AssignmentStatus::Expired {
            return Err(invalid(AssignmentStatus::Expired.as_str(), update.kind()));
        }

        let plan = match plan_update(&assignment, &current, update, now)? {
            Some(plan) => plan,
            None => {
                debug!(assignment_id, kind = update.kind(), "重复结果，忽略");
                return Ok(OutcomeRecord {
                    assignment_id: assignment_id.to_string(),
                    status: assignment.status,
                    applied: false,
                    outcome: current,
                });
            }
        };

        let lead_transition = if plan.count_response {
            let lead = self
                .repos
                .lead_repo
                .find_by_id(&assignment.lead_id)?
                .ok_or_else(|| DispatchError::LeadNotFound(assignment.lead_id.clone()))?;
            (lead.status == LeadStatus::New).then_some((LeadStatus::New, LeadStatus::Contacted))
        } else {
            None
        };

        let events: Vec<DispatchEvent> = plan
            .event_type
            .map(|event_type| {
                DispatchEvent::new(Some(&assignment.lead_id), event_type, now)
                    .with_provider(&assignment.provider_id)
                    .with_actor(actor)
                    .with_metadata(&json!({
                        "assignment_id": assignment.assignment_id,
                        "from": assignment.status.as_str(),
                        "to": plan.next_status.as_str(),
                        "dispatch_round": assignment.dispatch_round,
                        "feedback": plan.outcome.feedback,
                        "billed_amount": plan.outcome.billed_amount,
                    }))
            })
            .into_iter()
            .collect();

        let write = OutcomeWrite {
            assignment_id: assignment.assignment_id.clone(),
            lead_id: assignment.lead_id.clone(),
            provider_id: assignment.provider_id.clone(),
            expected_status: assignment.status,
            next_status: plan.next_status,
            expected_billed: current.is_billed,
            outcome: plan.outcome.clone(),
            count_response: plan.count_response,
            lead_transition,
            events,
        };

        if !self.repos.ledger.apply_outcome(&write, now)? {
            return Err(DispatchError::ConcurrentModification(format!(
                "指派 {} 在回写 {} 时已被修改",
                assignment_id,
                update.kind()
            )));
        }
        publish_all(&self.publisher, &write.events);

        info!(
            assignment_id,
            lead_id = %assignment.lead_id,
            provider_id = %assignment.provider_id,
            from = %assignment.status,
            to = %plan.next_status,
            "联系结果已记录"
        );

        Ok(OutcomeRecord {
            assignment_id: assignment_id.to_string(),
            status: plan.next_status,
            applied: true,
            outcome: plan.outcome,
        })
    }

    // ==========================================
    // 线索状态（CRM 流程）
    // ==========================================

    /// 推进线索状态: new → contacted → converted；new/contacted → lost
    ///
    /// # 返回
    /// - Ok(true): 已更新
    /// - Ok(false): 已处于目标状态
    #[instrument(skip(self, now))]
    pub fn update_lead_status(
        &self,
        lead_id: &str,
        next: LeadStatus,
        actor: &str,
        now: DateTime<Utc>,
    ) -> DispatchResult<bool> {
        let lead = self
            .repos
            .lead_repo
            .find_by_id(lead_id)?
            .ok_or_else(|| DispatchError::LeadNotFound(lead_id.to_string()))?;

        if lead.status == next {
            return Ok(false);
        }
        if !lead.status.can_transition_to(next) {
            return Err(invalid(lead.status.as_str(), next.as_str()));
        }

        let event = DispatchEvent::new(Some(lead_id), DispatchEventType::LeadStatusChanged, now)
            .with_actor(actor)
            .with_metadata(&json!({ "from": lead.status.as_str(), "to": next.as_str() }));

        if !self
            .repos
            .lead_repo
            .transition_status(lead_id, lead.status, next, &event, now)?
        {
            return Err(DispatchError::ConcurrentModification(format!(
                "线索 {} 状态在更新时已被修改",
                lead_id
            )));
        }
        publish_all(&self.publisher, std::slice::from_ref(&event));

        info!(lead_id, from = %lead.status, to = %next, "线索状态已更新");
        Ok(true)
    }
}

// ==========================================
// 状态推进规划（纯函数）
// ==========================================

#[derive(Debug)]
struct UpdatePlan {
    next_status: AssignmentStatus,
    outcome: ContactOutcome,
    count_response: bool,
    event_type: Option<DispatchEventType>,
}

/// 计算一次结果更新的目标状态
///
/// # 返回
/// - Ok(None): 与已有结果相同（幂等）
/// - Ok(Some(plan)): 需要写入
/// - Err: 非法流转
fn plan_update(
    assignment: &Assignment,
    current: &ContactOutcome,
    update: &OutcomeUpdate,
    now: DateTime<Utc>,
) -> DispatchResult<Option<UpdatePlan>> {
    let status = assignment.status;
    let mut outcome = current.clone();
    outcome.updated_at = now;

    let plan = match update {
        OutcomeUpdate::Delivered => {
            if current.sent_at.is_some() {
                return Ok(None);
            }
            outcome.sent_at = Some(now);
            UpdatePlan {
                next_status: status,
                outcome,
                count_response: false,
                event_type: None,
            }
        }
        OutcomeUpdate::Viewed => {
            if status == AssignmentStatus::Viewed {
                return Ok(None);
            }
            ensure_transition(status, AssignmentStatus::Viewed)?;
            outcome.viewed_at = Some(now);
            UpdatePlan {
                next_status: AssignmentStatus::Viewed,
                outcome,
                count_response: false,
                event_type: Some(DispatchEventType::Viewed),
            }
        }
        OutcomeUpdate::Responded { feedback } => {
            if status == AssignmentStatus::Responded {
                return Ok(None);
            }
            ensure_transition(status, AssignmentStatus::Responded)?;
            outcome.responded_at = Some(now);
            if feedback.is_some() {
                outcome.feedback = feedback.clone();
            }
            UpdatePlan {
                next_status: AssignmentStatus::Responded,
                outcome,
                count_response: true,
                event_type: Some(DispatchEventType::Responded),
            }
        }
        OutcomeUpdate::Declined { reason } => {
            if status == AssignmentStatus::Declined {
                return Ok(None);
            }
            ensure_transition(status, AssignmentStatus::Declined)?;
            outcome.declined_at = Some(now);
            if reason.is_some() {
                outcome.feedback = reason.clone();
            }
            UpdatePlan {
                next_status: AssignmentStatus::Declined,
                outcome,
                count_response: false,
                event_type: Some(DispatchEventType::Declined),
            }
        }
        OutcomeUpdate::Billed { amount } => {
            if !amount.is_finite() || *amount <= 0.0 {
                return Err(DispatchError::InvalidInput(format!("计费金额必须为正数: {}", amount)));
            }
            if status != AssignmentStatus::Responded {
                return Err(invalid(status.as_str(), "billed"));
            }
            if current.is_billed {
                // 同额重复回传视为幂等，不同金额视为重复计费
                if current.billed_amount == Some(*amount) {
                    return Ok(None);
                }
                return Err(invalid("billed", "billed"));
            }
            outcome.is_billed = true;
            outcome.billed_amount = Some(*amount);
            outcome.billed_at = Some(now);
            UpdatePlan {
                next_status: status,
                outcome,
                count_response: false,
                event_type: Some(DispatchEventType::Billed),
            }
        }
    };

    Ok(Some(plan))
}

fn ensure_transition(from: AssignmentStatus, to: AssignmentStatus) -> DispatchResult<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(invalid(from.as_str(), to.as_str()))
    }
}

fn invalid(from: &str, to: &str) -> DispatchError {
    DispatchError::InvalidStateTransition {
        from: from.to_string(),
        to: to.to_string(),
    }
}
