use crate::db::format_ts;
use crate::domain::dispatch_event::DispatchEvent;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

// ==========================================
// DispatchEventRepository - 派单事件仓储
// ==========================================
// 红线: Repository 不做业务逻辑,只做数据映射
pub struct DispatchEventRepository {
    conn: Arc<Mutex<Connection>>,
}

impl DispatchEventRepository {
    /// 创建新的派单事件仓储
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    pub(super) fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 写入操作
    // ==========================================

    /// 插入派单事件
    ///
    /// # 返回
    /// - `Ok(event_id)`: 成功插入
    pub fn insert(&self, event: &DispatchEvent) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        Self::insert_with(&conn, event)?;
        Ok(event.event_id.clone())
    }

    /// 在调用方已持有的连接/事务上插入事件
    ///
    /// 指派落库、结果回写、策略更新都需要与业务写入处于同一事务，
    /// 通过此函数复用同一条 INSERT。
    pub fn insert_with(conn: &Connection, event: &DispatchEvent) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT INTO dispatch_event (
                event_id, lead_id, provider_id, event_type, actor, metadata_json, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                event.event_id,
                event.lead_id,
                event.provider_id,
                event.event_type.as_str(),
                event.actor,
                event.metadata.as_ref().map(|v| v.to_string()),
                format_ts(&event.created_at),
            ],
        )?;
        Ok(())
    }

    /// 批量插入派单事件
    pub fn batch_insert(&self, events: &[DispatchEvent]) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        for event in events {
            Self::insert_with(&tx, event)?;
        }

        tx.commit()?;
        Ok(events.len())
    }
}
