// ==========================================
// 线索派单引擎 - 引擎层仓储聚合
// ==========================================
// 职责: 聚合派单引擎所需的所有 Repository，减少构造参数
// ==========================================

use rusqlite::Connection;
use std::sync::{Arc, Mutex};

use crate::repository::{
    AssignmentLedger, DispatchEventRepository, LeadRepository, ProviderRepository,
    ServiceCatalogRepository,
};

/// 派单引擎仓储集合
#[derive(Clone)]
pub struct DispatchRepositories {
    pub lead_repo: Arc<LeadRepository>,
    pub provider_repo: Arc<ProviderRepository>,
    pub ledger: Arc<AssignmentLedger>,
    pub event_repo: Arc<DispatchEventRepository>,
    pub catalog_repo: Arc<ServiceCatalogRepository>,
}

impl DispatchRepositories {
    /// 在同一条共享连接上构造全部仓储
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            lead_repo: Arc::new(LeadRepository::new(conn.clone())),
            provider_repo: Arc::new(ProviderRepository::new(conn.clone())),
            ledger: Arc::new(AssignmentLedger::new(conn.clone())),
            event_repo: Arc::new(DispatchEventRepository::new(conn.clone())),
            catalog_repo: Arc::new(ServiceCatalogRepository::new(conn)),
        }
    }
}
