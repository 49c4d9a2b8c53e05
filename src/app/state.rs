// ==========================================
// 线索派单引擎 - 应用状态
// ==========================================
// 职责: 在同一条共享 SQLite 连接上装配仓储、引擎与 API
// ==========================================

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::api::{DispatchApi, PolicyApi};
use crate::config::PolicyStore;
use crate::db::{init_schema, open_sqlite_connection};
use crate::engine::{
    DispatchEventPublisher, DispatchOrchestrator, DispatchRepositories, ExpiryScheduler, LeadLocks,
    LoggingEventPublisher, OutcomeTracker,
};
use crate::importer::ProviderImporter;

/// 数据库路径环境变量
pub const DB_PATH_ENV: &str = "DISPATCH_DB_PATH";

/// 应用状态
///
/// 包含所有API实例和共享资源
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 派单API
    pub dispatch_api: Arc<DispatchApi>,

    /// 策略API
    pub policy_api: Arc<PolicyApi>,

    /// 过期巡检调度器（常驻服务驱动）
    pub scheduler: Arc<ExpiryScheduler<PolicyStore>>,

    /// 服务商名录导入
    pub provider_importer: Arc<ProviderImporter>,

    /// 仓储集合（统计/排查用）
    pub repos: DispatchRepositories,
}

impl AppState {
    /// 创建新的AppState实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径（不存在时自动创建并建表）
    ///
    /// # 返回
    /// - Ok(AppState): 应用状态实例
    /// - Err(String): 初始化错误
    pub fn new(db_path: String) -> Result<Self, String> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        let conn = open_sqlite_connection(&db_path).map_err(|e| format!("无法打开数据库: {}", e))?;
        init_schema(&conn).map_err(|e| format!("数据库建表失败: {}", e))?;

        let mut state = Self::from_connection(Arc::new(Mutex::new(conn)), Arc::new(LoggingEventPublisher));
        state.db_path = db_path;
        Ok(state)
    }

    /// 在已有连接上装配（连接需已建表）
    ///
    /// # 参数
    /// - conn: 共享连接
    /// - publisher: 事件发布者（测试中可替换为记录型发布者）
    pub fn from_connection(conn: Arc<Mutex<Connection>>, publisher: Arc<dyn DispatchEventPublisher>) -> Self {
        // ==========================================
        // 初始化Repository层
        // ==========================================
        let repos = DispatchRepositories::from_connection(conn.clone());
        let policy_store = Arc::new(PolicyStore::from_connection(conn));

        // ==========================================
        // 初始化Engine层
        // ==========================================
        let locks = Arc::new(LeadLocks::new());
        let orchestrator = Arc::new(DispatchOrchestrator::new(
            policy_store.clone(),
            repos.clone(),
            locks,
            publisher.clone(),
        ));
        let tracker = Arc::new(OutcomeTracker::new(repos.clone(), publisher.clone()));
        let scheduler = Arc::new(ExpiryScheduler::new(policy_store.clone(), orchestrator.clone(), publisher));

        // ==========================================
        // 初始化API层
        // ==========================================
        let dispatch_api = Arc::new(DispatchApi::new(
            repos.clone(),
            orchestrator,
            tracker,
            scheduler.clone(),
        ));
        let policy_api = Arc::new(PolicyApi::new(policy_store));
        let provider_importer = Arc::new(ProviderImporter::new(repos.provider_repo.clone()));

        tracing::debug!("AppState装配完成");

        Self {
            db_path: String::new(),
            dispatch_api,
            policy_api,
            scheduler,
            provider_importer,
            repos,
        }
    }
}

/// 获取默认数据库路径
///
/// 优先级: DISPATCH_DB_PATH 环境变量 > 用户数据目录 > 当前目录
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var(DB_PATH_ENV) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./lead_dispatch.db");

    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("lead-dispatch");
        // 目录创建失败时回退到当前目录
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("lead_dispatch.db");
        }
    }

    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_get_default_db_path() {
        let path = get_default_db_path();
        assert!(!path.is_empty());
        assert!(path.ends_with(".db"));
    }

    #[test]
    fn test_new_creates_schema() {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_string_lossy().to_string();

        let state = AppState::new(path.clone()).unwrap();
        assert_eq!(state.db_path, path);

        let policy = state.policy_api.get_policy().unwrap();
        assert_eq!(policy.version, 0);
        assert_eq!(state.repos.provider_repo.count().unwrap(), 0);
    }
}
