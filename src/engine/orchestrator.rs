// ==========================================
// 线索派单引擎 - 派单编排器
// ==========================================
// 职责: 串联一次派单的完整流程
// 流程: 读取策略 → 归一化/登记线索 → 加锁 → 过滤 → 打分 → 排序 → 落库 → 发布事件
// 红线: 每次派单只读取一次策略快照，全流程使用同一份
// 红线: 同一线索的派单串行执行，不同线索完全并行
// ==========================================

use crate::config::PolicyReader;
use crate::domain::assignment::Assignment;
use crate::domain::dispatch_event::DispatchEvent;
use crate::domain::lead::{DispatchRequest, Lead};
use crate::domain::policy::PolicySnapshot;
use crate::domain::types::DispatchEventType;
use crate::engine::candidate_filter::{CandidateFilter, FilterInput};
use crate::engine::error::{DispatchError, DispatchResult};
use crate::engine::events::{publish_all, DispatchEventPublisher};
use crate::engine::lead_lock::LeadLocks;
use crate::engine::repositories::DispatchRepositories;
use crate::engine::scoring::{ScoredCandidate, Scorer};
use crate::engine::selector::Selector;
use crate::repository::{LedgerCandidate, LedgerConflict};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// scored 事件中保留的排名预览条数
const RANKING_PREVIEW: usize = 10;

/// 未派单原因
pub const SKIP_LEAD_CLOSED: &str = "lead_closed";
pub const SKIP_LEAD_FULL: &str = "lead_full";

// ==========================================
// DispatchOutcome - 派单结果
// ==========================================
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchOutcome {
    pub lead_id: String,
    /// 按名次排列的服务商ID（无候选时为空，不视为错误）
    pub provider_ids: Vec<String>,
    pub assignments: Vec<Assignment>,
    /// 本轮轮次（未派单时为线索当前轮次）
    pub dispatch_round: i64,
    pub policy_version: i64,
    /// 通过过滤的候选数
    pub eligible: usize,
    /// 被过滤掉的服务商数
    pub rejected: usize,
    /// 落库时被顺延的候选
    pub conflicts: Vec<LedgerConflict>,
    /// 未进入派单的原因（lead_closed / lead_full）
    pub skipped: Option<String>,
}

impl DispatchOutcome {
    fn skipped(lead: &Lead, policy: &PolicySnapshot, reason: &str) -> Self {
        Self {
            lead_id: lead.lead_id.clone(),
            dispatch_round: lead.dispatch_round,
            policy_version: policy.version,
            skipped: Some(reason.to_string()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.provider_ids.is_empty()
    }
}

// ==========================================
// DispatchOrchestrator - 派单编排器
// ==========================================
pub struct DispatchOrchestrator<P>
where
    P: PolicyReader,
{
    policy_reader: Arc<P>,
    repos: DispatchRepositories,
    locks: Arc<LeadLocks>,
    publisher: Arc<dyn DispatchEventPublisher>,
    filter: CandidateFilter,
    scorer: Scorer,
    selector: Selector,
}

impl<P> DispatchOrchestrator<P>
where
    P: PolicyReader,
{
    /// 创建新的派单编排器
    ///
    /// # 参数
    /// - `policy_reader`: 策略读取器（每次派单读取一次快照）
    /// - `repos`: 仓储集合
    /// - `locks`: 线索级互斥锁表（与调度器共享同一份）
    /// - `publisher`: 事件发布者（提交后调用）
    pub fn new(
        policy_reader: Arc<P>,
        repos: DispatchRepositories,
        locks: Arc<LeadLocks>,
        publisher: Arc<dyn DispatchEventPublisher>,
    ) -> Self {
        Self {
            policy_reader,
            repos,
            locks,
            publisher,
            filter: CandidateFilter::new(),
            scorer: Scorer::new(),
            selector: Selector::new(),
        }
    }

    pub fn repositories(&self) -> &DispatchRepositories {
        &self.repos
    }

    /// 派单入口（新线索或重复请求）
    ///
    /// # 返回
    /// - Ok(DispatchOutcome): provider_ids 为空表示本轮无可用候选，等待补派
    /// - Err(InvalidInput): 请求字段非法
    /// - Err(PolicyUnavailable): 策略不可读，本轮未派单
    #[instrument(skip(self, request, now), fields(lead_id = %request.lead_id, service = %request.service_name))]
    pub async fn dispatch(&self, request: &DispatchRequest, now: DateTime<Utc>) -> DispatchResult<DispatchOutcome> {
        // ==========================================
        // 步骤1: 归一化线索
        // ==========================================
        let (lead, geometry_issue) = request.normalize(now).map_err(DispatchError::InvalidInput)?;
        if let Some(issue) = geometry_issue {
            warn!(
                lead_id = %lead.lead_id,
                issue = %issue,
                "线索坐标不可用，降级为按省匹配"
            );
        }

        let _guard = self.locks.acquire(&lead.lead_id).await;

        // ==========================================
        // 步骤2: 登记线索（已存在则沿用库中状态）
        // ==========================================
        let event = DispatchEvent::new(Some(&lead.lead_id), DispatchEventType::Created, now)
            .with_metadata(&json!({
                "source": lead.source.as_str(),
                "service_name": lead.service_name,
                "urgency": lead.urgency.as_str(),
                "department": lead.department,
                "has_location": lead.location.is_some(),
            }));
        if self.repos.lead_repo.register(&lead, &event)? {
            publish_all(&self.publisher, std::slice::from_ref(&event));
            debug!(lead_id = %lead.lead_id, "新线索已登记");
        }

        self.run_locked(&lead.lead_id, now).await
    }

    /// 对已登记线索重新派单（调度器补派 / 人工重派）
    #[instrument(skip(self, now), fields(lead_id = %lead_id))]
    pub async fn redispatch(&self, lead_id: &str, now: DateTime<Utc>) -> DispatchResult<DispatchOutcome> {
        let _guard = self.locks.acquire(lead_id).await;
        self.run_locked(lead_id, now).await
    }

    /// 持锁执行一轮派单
    async fn run_locked(&self, lead_id: &str, now: DateTime<Utc>) -> DispatchResult<DispatchOutcome> {
        // ==========================================
        // 步骤3: 读取策略快照（本轮唯一一次）
        // ==========================================
        let policy = self.policy_reader.get_active_policy().await?;

        let lead = self
            .repos
            .lead_repo
            .find_by_id(lead_id)?
            .ok_or_else(|| DispatchError::LeadNotFound(lead_id.to_string()))?;

        if !lead.status.is_open() {
            info!(lead_id = %lead_id, status = %lead.status, "线索已关闭，不再派单");
            return Ok(DispatchOutcome::skipped(&lead, &policy, SKIP_LEAD_CLOSED));
        }

        let lead_assignments = self.repos.ledger.find_by_lead(lead_id)?;
        let active = lead_assignments.iter().filter(|a| a.status.is_active()).count() as i64;
        if active >= policy.max_artisans_per_lead {
            debug!(lead_id = %lead_id, active, "线索名额已满，跳过");
            return Ok(DispatchOutcome::skipped(&lead, &policy, SKIP_LEAD_FULL));
        }

        // ==========================================
        // 步骤4: 过滤 → 打分 → 排序
        // ==========================================
        let providers = self.repos.provider_repo.list_all()?;
        let workloads = self.repos.provider_repo.workloads(now)?;
        let catalog = self.repos.catalog_repo.load_all()?;

        let input = FilterInput {
            lead: &lead,
            policy: &policy,
            lead_assignments: &lead_assignments,
            workloads: &workloads,
            catalog: &catalog,
            now,
        };
        let filtered = self.filter.filter(&input, providers);
        let rejection_summary = filtered.rejection_summary();
        let rejected = filtered.rejections.len();

        let scored = self.scorer.score_all(filtered.candidates, &lead, &policy);
        let ranked = self.selector.rank(scored, &policy);
        let eligible = ranked.len();

        debug!(
            lead_id = %lead_id,
            eligible,
            rejected,
            strategy = %policy.matching_strategy,
            "候选筛选完成"
        );

        let scored_event = DispatchEvent::new(Some(lead_id), DispatchEventType::Scored, now).with_metadata(&json!({
            "policy_version": policy.version,
            "strategy": policy.matching_strategy.as_str(),
            "eligible": eligible,
            "rejected": rejected,
            "rejections": rejection_summary,
            "ranking": ranking_preview(&ranked),
        }));

        // ==========================================
        // 步骤5: 落库（冲突候选顺延）
        // ==========================================
        let ledger_candidates: Vec<LedgerCandidate> = ranked.iter().map(to_ledger_candidate).collect();
        let mut report = self
            .repos
            .ledger
            .persist(lead_id, &ledger_candidates, &policy, vec![scored_event], now)?;

        if report.assignments.is_empty() && report.free_slots > 0 {
            warn!(
                lead_id = %lead_id,
                dispatch_round = report.dispatch_round,
                eligible,
                conflicts = report.conflicts.len(),
                "本轮无可用服务商，等待补派"
            );
            let event = DispatchEvent::new(Some(lead_id), DispatchEventType::NoCandidates, now).with_metadata(&json!({
                "dispatch_round": report.dispatch_round,
                "policy_version": policy.version,
                "eligible": eligible,
                "conflicts": report.conflicts.len(),
                "rejections": rejection_summary,
            }));
            self.repos.event_repo.insert(&event)?;
            report.events.push(event);
        }

        // ==========================================
        // 步骤6: 提交后发布事件
        // ==========================================
        publish_all(&self.publisher, &report.events);

        let provider_ids: Vec<String> = report.assignments.iter().map(|a| a.provider_id.clone()).collect();
        info!(
            lead_id = %lead_id,
            dispatch_round = report.dispatch_round,
            assigned = provider_ids.len(),
            policy_version = policy.version,
            "派单完成"
        );

        Ok(DispatchOutcome {
            lead_id: lead_id.to_string(),
            provider_ids,
            assignments: report.assignments,
            dispatch_round: report.dispatch_round,
            policy_version: policy.version,
            eligible,
            rejected,
            conflicts: report.conflicts,
            skipped: None,
        })
    }
}

fn to_ledger_candidate(scored: &ScoredCandidate) -> LedgerCandidate {
    LedgerCandidate {
        provider_id: scored.provider_id().to_string(),
        score: scored.score,
        distance_km: scored.candidate.distance_km,
        breakdown: serde_json::to_value(scored.breakdown).ok(),
    }
}

fn ranking_preview(ranked: &[ScoredCandidate]) -> Vec<serde_json::Value> {
    ranked
        .iter()
        .take(RANKING_PREVIEW)
        .map(|s| json!({ "provider_id": s.provider_id(), "score": s.score }))
        .collect()
}
