// ==========================================
// 线索派单引擎 - 派单 API
// ==========================================
// 职责: 派单、结果回写、线索状态、巡检、看板查询的统一入口
// 调用方: 线索录入流程、联系流程、CRM、运营后台、CLI
// ==========================================

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::api::error::{ApiError, ApiResult};
use crate::config::PolicyStore;
use crate::domain::assignment::{Assignment, AssignmentStats, OutcomeUpdate};
use crate::domain::dispatch_event::DispatchEvent;
use crate::domain::lead::{DispatchRequest, Lead};
use crate::domain::types::{AssignmentStatus, LeadStatus};
use crate::engine::{
    DispatchOrchestrator, DispatchOutcome, DispatchRepositories, ExpiryScheduler, OutcomeRecord,
    OutcomeTracker, SweepReport,
};

/// 分页上限
const MAX_PAGE_SIZE: i64 = 500;

// ==========================================
// DispatchBoard - 运营派单看板
// ==========================================
#[derive(Debug, Clone, Serialize)]
pub struct DispatchBoard {
    pub assignments: AssignmentStats,
    /// (viewed + responded) / total
    pub engagement_rate: f64,
    pub leads_by_status: Vec<(LeadStatus, i64)>,
    pub provider_count: i64,
}

/// 线索详情（线索 + 指派 + 事件轨迹）
#[derive(Debug, Clone, Serialize)]
pub struct LeadDetail {
    pub lead: Lead,
    pub assignments: Vec<Assignment>,
    pub events: Vec<DispatchEvent>,
}

// ==========================================
// DispatchApi - 派单 API
// ==========================================
pub struct DispatchApi {
    repos: DispatchRepositories,
    orchestrator: Arc<DispatchOrchestrator<PolicyStore>>,
    tracker: Arc<OutcomeTracker>,
    scheduler: Arc<ExpiryScheduler<PolicyStore>>,
}

impl DispatchApi {
    pub fn new(
        repos: DispatchRepositories,
        orchestrator: Arc<DispatchOrchestrator<PolicyStore>>,
        tracker: Arc<OutcomeTracker>,
        scheduler: Arc<ExpiryScheduler<PolicyStore>>,
    ) -> Self {
        Self {
            repos,
            orchestrator,
            tracker,
            scheduler,
        }
    }

    // ==========================================
    // 派单
    // ==========================================

    /// 派单（返回按名次排列的服务商ID；为空表示等待补派）
    pub async fn dispatch(&self, request: &DispatchRequest) -> ApiResult<DispatchOutcome> {
        Ok(self.orchestrator.dispatch(request, Utc::now()).await?)
    }

    /// 人工重派
    pub async fn redispatch(&self, lead_id: &str) -> ApiResult<DispatchOutcome> {
        require_non_empty("lead_id", lead_id)?;
        Ok(self.orchestrator.redispatch(lead_id, Utc::now()).await?)
    }

    /// 执行一次过期巡检
    pub async fn sweep(&self) -> ApiResult<SweepReport> {
        Ok(self.scheduler.sweep(Utc::now()).await?)
    }

    // ==========================================
    // 结果回写
    // ==========================================

    /// 记录联系结果
    ///
    /// # 参数
    /// - assignment_id: 指派ID
    /// - update: 结果
    /// - actor: 操作人（不可为空）
    pub fn record_outcome(
        &self,
        assignment_id: &str,
        update: &OutcomeUpdate,
        actor: &str,
    ) -> ApiResult<OutcomeRecord> {
        require_non_empty("assignment_id", assignment_id)?;
        require_non_empty("actor", actor)?;
        Ok(self.tracker.record(assignment_id, update, actor, Utc::now())?)
    }

    /// 更新线索状态（CRM 流程）
    pub fn update_lead_status(&self, lead_id: &str, status: LeadStatus, actor: &str) -> ApiResult<bool> {
        require_non_empty("lead_id", lead_id)?;
        require_non_empty("actor", actor)?;
        Ok(self.tracker.update_lead_status(lead_id, status, actor, Utc::now())?)
    }

    /// 登记服务目录（服务名 → 类目，用于 category 专业匹配）
    pub fn set_service_category(&self, service_name: &str, category: &str) -> ApiResult<()> {
        require_non_empty("service_name", service_name)?;
        require_non_empty("category", category)?;
        self.repos.catalog_repo.upsert(service_name, category)?;
        Ok(())
    }

    // ==========================================
    // 查询
    // ==========================================

    pub fn get_lead_detail(&self, lead_id: &str) -> ApiResult<LeadDetail> {
        let lead = self
            .repos
            .lead_repo
            .find_by_id(lead_id)?
            .ok_or_else(|| ApiError::NotFound(format!("线索(id={})不存在", lead_id)))?;
        Ok(LeadDetail {
            assignments: self.repos.ledger.find_by_lead(lead_id)?,
            events: self.repos.event_repo.find_by_lead(lead_id)?,
            lead,
        })
    }

    pub fn list_assignments_by_status(
        &self,
        status: AssignmentStatus,
        limit: i64,
        offset: i64,
    ) -> ApiResult<Vec<Assignment>> {
        if !(1..=MAX_PAGE_SIZE).contains(&limit) {
            return Err(ApiError::InvalidInput(format!("limit 必须在 1~{} 之间", MAX_PAGE_SIZE)));
        }
        if offset < 0 {
            return Err(ApiError::InvalidInput("offset 不能为负".to_string()));
        }
        Ok(self.repos.ledger.list_by_status(status, limit, offset)?)
    }

    pub fn list_provider_assignments(&self, provider_id: &str) -> ApiResult<Vec<Assignment>> {
        require_non_empty("provider_id", provider_id)?;
        Ok(self.repos.ledger.find_by_provider(provider_id)?)
    }

    pub fn recent_events(&self, limit: i64) -> ApiResult<Vec<DispatchEvent>> {
        if !(1..=MAX_PAGE_SIZE).contains(&limit) {
            return Err(ApiError::InvalidInput(format!("limit 必须在 1~{} 之间", MAX_PAGE_SIZE)));
        }
        Ok(self.repos.event_repo.list_recent(limit)?)
    }

    /// 运营派单看板
    pub fn dispatch_board(&self) -> ApiResult<DispatchBoard> {
        let assignments = self.repos.ledger.status_counts()?;
        Ok(DispatchBoard {
            engagement_rate: assignments.engagement_rate(),
            assignments,
            leads_by_status: self.repos.lead_repo.count_by_status()?,
            provider_count: self.repos.provider_repo.count()?,
        })
    }
}

fn require_non_empty(field: &str, value: &str) -> ApiResult<()> {
    if value.trim().is_empty() {
        return Err(ApiError::InvalidInput(format!("{} 不能为空", field)));
    }
    Ok(())
}
