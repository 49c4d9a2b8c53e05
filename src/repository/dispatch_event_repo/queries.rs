use super::core::DispatchEventRepository;
use crate::db::{enum_column, ts_column};
use crate::domain::dispatch_event::DispatchEvent;
use crate::domain::types::DispatchEventType;
use crate::repository::error::RepositoryResult;
use rusqlite::{params, Result as SqliteResult, Row};

const SELECT_COLUMNS: &str = r#"
    SELECT event_id, lead_id, provider_id, event_type, actor, metadata_json, created_at
    FROM dispatch_event
"#;

impl DispatchEventRepository {
    // ==========================================
    // 查询操作
    // ==========================================

    /// 查询线索的全部事件（按发生顺序）
    pub fn find_by_lead(&self, lead_id: &str) -> RepositoryResult<Vec<DispatchEvent>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE lead_id = ?1 ORDER BY created_at ASC, rowid ASC", SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;

        let events = stmt
            .query_map(params![lead_id], map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(events)
    }

    /// 查询线索的指定类型事件
    pub fn find_by_lead_and_type(
        &self,
        lead_id: &str,
        event_type: DispatchEventType,
    ) -> RepositoryResult<Vec<DispatchEvent>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE lead_id = ?1 AND event_type = ?2 ORDER BY created_at ASC, rowid ASC",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;

        let events = stmt
            .query_map(params![lead_id, event_type.as_str()], map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(events)
    }

    /// 查询最近的事件（倒序）
    pub fn list_recent(&self, limit: i64) -> RepositoryResult<Vec<DispatchEvent>> {
        let conn = self.get_conn()?;
        let sql = format!("{} ORDER BY created_at DESC, rowid DESC LIMIT ?1", SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;

        let events = stmt
            .query_map(params![limit], map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(events)
    }

    /// 统计某类事件数量
    pub fn count_by_type(&self, event_type: DispatchEventType) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM dispatch_event WHERE event_type = ?1",
            params![event_type.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn map_row(row: &Row<'_>) -> SqliteResult<DispatchEvent> {
    let metadata_raw: Option<String> = row.get(5)?;
    Ok(DispatchEvent {
        event_id: row.get(0)?,
        lead_id: row.get(1)?,
        provider_id: row.get(2)?,
        event_type: enum_column(row, 3)?,
        actor: row.get(4)?,
        metadata: metadata_raw.and_then(|raw| serde_json::from_str(&raw).ok()),
        created_at: ts_column(row, 6)?,
    })
}
