// ==========================================
// 线索派单引擎 - 线索数据仓储
// ==========================================
// 红线: 线索从不删除，只做状态流转
// 状态流转是否合法由引擎层判定，本仓储只执行条件更新
// ==========================================

use crate::db::{enum_column, format_ts, opt_ts_column, ts_column};
use crate::domain::dispatch_event::DispatchEvent;
use crate::domain::lead::{GeoPoint, Lead};
use crate::domain::types::{LeadSource, LeadStatus};
use crate::repository::dispatch_event_repo::DispatchEventRepository;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row, TransactionBehavior};
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = r#"
    SELECT lead_id, source, service_name, urgency, latitude, longitude,
           postal_code, department, city, status, dispatch_round,
           last_dispatch_at, created_at, updated_at
    FROM lead
"#;

// ==========================================
// LeadRepository - 线索仓储
// ==========================================
pub struct LeadRepository {
    conn: Arc<Mutex<Connection>>,
}

impl LeadRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 写入操作
    // ==========================================

    /// 插入线索（已存在则忽略）
    ///
    /// # 返回
    /// - Ok(true): 新插入
    /// - Ok(false): 已存在，未改动
    pub fn insert_if_absent(&self, lead: &Lead) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        Ok(Self::insert_if_absent_with(&conn, lead)?)
    }

    pub fn insert_if_absent_with(conn: &Connection, lead: &Lead) -> RepositoryResult<bool> {
        let rows = conn.execute(
            r#"
            INSERT OR IGNORE INTO lead (
                lead_id, source, service_name, urgency, latitude, longitude,
                postal_code, department, city, status, dispatch_round,
                last_dispatch_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
            params![
                lead.lead_id,
                lead.source.as_str(),
                lead.service_name,
                lead.urgency.as_str(),
                lead.location.map(|p| p.latitude),
                lead.location.map(|p| p.longitude),
                lead.postal_code,
                lead.department,
                lead.city,
                lead.status.as_str(),
                lead.dispatch_round,
                lead.last_dispatch_at.as_ref().map(format_ts),
                format_ts(&lead.created_at),
                format_ts(&lead.updated_at),
            ],
        )?;
        Ok(rows == 1)
    }

    /// 登记新线索并写入 created 事件（同一事务）
    ///
    /// # 返回
    /// - Ok(true): 新登记
    /// - Ok(false): 已存在，未写事件
    pub fn register(&self, lead: &Lead, event: &DispatchEvent) -> RepositoryResult<bool> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if !Self::insert_if_absent_with(&tx, lead)? {
            return Ok(false);
        }
        DispatchEventRepository::insert_with(&tx, event)?;
        tx.commit()?;
        Ok(true)
    }

    /// 条件更新线索状态（仅当当前状态等于 expected）
    ///
    /// # 返回
    /// - 受影响行数（0 表示状态已被他人改变）
    pub fn set_status_if(
        &self,
        lead_id: &str,
        expected: LeadStatus,
        next: LeadStatus,
        now: DateTime<Utc>,
    ) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        Self::set_status_if_with(&conn, lead_id, expected, next, now)
    }

    /// 条件更新线索状态并写入事件（同一事务）
    ///
    /// # 返回
    /// - Ok(true): 已更新
    /// - Ok(false): 状态已被他人改变，未写事件
    pub fn transition_status(
        &self,
        lead_id: &str,
        expected: LeadStatus,
        next: LeadStatus,
        event: &DispatchEvent,
        now: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if Self::set_status_if_with(&tx, lead_id, expected, next, now)? == 0 {
            return Ok(false);
        }
        DispatchEventRepository::insert_with(&tx, event)?;
        tx.commit()?;
        Ok(true)
    }

    pub fn set_status_if_with(
        conn: &Connection,
        lead_id: &str,
        expected: LeadStatus,
        next: LeadStatus,
        now: DateTime<Utc>,
    ) -> RepositoryResult<usize> {
        let rows = conn.execute(
            "UPDATE lead SET status = ?1, updated_at = ?2 WHERE lead_id = ?3 AND status = ?4",
            params![next.as_str(), format_ts(&now), lead_id, expected.as_str()],
        )?;
        Ok(rows)
    }

    /// 记录一次派单尝试（轮次 +1，刷新 last_dispatch_at）
    ///
    /// # 返回
    /// - 本次派单的轮次号
    pub fn record_dispatch_attempt_with(
        conn: &Connection,
        lead_id: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<i64> {
        let ts = format_ts(&now);
        let rows = conn.execute(
            r#"
            UPDATE lead
            SET dispatch_round = dispatch_round + 1, last_dispatch_at = ?1, updated_at = ?1
            WHERE lead_id = ?2
            "#,
            params![ts, lead_id],
        )?;
        if rows == 0 {
            return Err(RepositoryError::not_found("Lead", lead_id));
        }

        let round = conn.query_row(
            "SELECT dispatch_round FROM lead WHERE lead_id = ?1",
            params![lead_id],
            |row| row.get(0),
        )?;
        Ok(round)
    }

    pub fn record_dispatch_attempt(&self, lead_id: &str, now: DateTime<Utc>) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        Self::record_dispatch_attempt_with(&conn, lead_id, now)
    }

    // ==========================================
    // 查询操作
    // ==========================================

    pub fn find_by_id(&self, lead_id: &str) -> RepositoryResult<Option<Lead>> {
        let conn = self.get_conn()?;
        Self::find_by_id_with(&conn, lead_id)
    }

    pub fn find_by_id_with(conn: &Connection, lead_id: &str) -> RepositoryResult<Option<Lead>> {
        let sql = format!("{} WHERE lead_id = ?1", SELECT_COLUMNS);
        let lead = conn.query_row(&sql, params![lead_id], map_row).optional()?;
        Ok(lead)
    }

    /// 查询到期可补派的线索
    ///
    /// 条件: 状态 new/contacted，且最近一次派单不晚于 cutoff（或从未派单）
    pub fn list_reassign_due(&self, cutoff: DateTime<Utc>) -> RepositoryResult<Vec<Lead>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"{}
            WHERE status IN ('new', 'contacted')
              AND (last_dispatch_at IS NULL OR last_dispatch_at <= ?1)
            ORDER BY created_at ASC, lead_id ASC
            "#,
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let leads = stmt
            .query_map(params![format_ts(&cutoff)], map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(leads)
    }

    /// 按状态统计线索数量
    pub fn count_by_status(&self) -> RepositoryResult<Vec<(LeadStatus, i64)>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM lead GROUP BY status ORDER BY status",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((enum_column::<LeadStatus>(row, 0)?, row.get(1)?)))?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rows)
    }
}

fn map_row(row: &Row<'_>) -> SqliteResult<Lead> {
    let source_raw: String = row.get(1)?;
    let source = LeadSource::from_source_table(&source_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            Type::Text,
            format!("未知线索来源: {}", source_raw).into(),
        )
    })?;

    Ok(Lead {
        lead_id: row.get(0)?,
        source,
        service_name: row.get(2)?,
        urgency: enum_column(row, 3)?,
        location: GeoPoint::from_parts(row.get(4)?, row.get(5)?),
        postal_code: row.get(6)?,
        department: row.get(7)?,
        city: row.get(8)?,
        status: enum_column(row, 9)?,
        dispatch_round: row.get(10)?,
        last_dispatch_at: opt_ts_column(row, 11)?,
        created_at: ts_column(row, 12)?,
        updated_at: ts_column(row, 13)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Urgency;
    use chrono::{Duration, TimeZone};

    fn setup() -> LeadRepository {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::configure_sqlite_connection(&conn).unwrap();
        crate::db::init_schema(&conn).unwrap();
        LeadRepository::new(Arc::new(Mutex::new(conn)))
    }

    fn lead(id: &str, now: DateTime<Utc>) -> Lead {
        Lead {
            lead_id: id.to_string(),
            source: LeadSource::Legacy,
            service_name: "plombier".to_string(),
            urgency: Urgency::Medium,
            location: GeoPoint::new(45.76, 4.83),
            postal_code: Some("69001".to_string()),
            department: Some("69".to_string()),
            city: Some("Lyon".to_string()),
            status: LeadStatus::New,
            dispatch_round: 0,
            last_dispatch_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_insert_if_absent_keeps_first_version() {
        let repo = setup();
        let now = Utc.with_ymd_and_hms(2026, 2, 1, 10, 0, 0).unwrap();

        assert!(repo.insert_if_absent(&lead("L1", now)).unwrap());
        let mut again = lead("L1", now);
        again.service_name = "electricien".to_string();
        assert!(!repo.insert_if_absent(&again).unwrap());

        let stored = repo.find_by_id("L1").unwrap().unwrap();
        assert_eq!(stored.service_name, "plombier");
        assert_eq!(stored.source, LeadSource::Legacy);
        assert!(stored.location.is_some());
    }

    #[test]
    fn test_register_writes_lead_and_event_together() {
        let repo = setup();
        let now = Utc.with_ymd_and_hms(2026, 2, 1, 10, 0, 0).unwrap();
        let event = DispatchEvent::new(Some("L1"), crate::domain::types::DispatchEventType::Created, now);

        assert!(repo.register(&lead("L1", now), &event).unwrap());
        assert!(!repo.register(&lead("L1", now), &event).unwrap());

        // 事件写入失败（主键冲突）时线索也不落库，下次请求可完整重登记
        let mut clash = event.clone();
        clash.lead_id = Some("L2".to_string());
        assert!(repo.register(&lead("L2", now), &clash).is_err());
        assert!(repo.find_by_id("L2").unwrap().is_none());

        let retry = DispatchEvent::new(Some("L2"), crate::domain::types::DispatchEventType::Created, now);
        assert!(repo.register(&lead("L2", now), &retry).unwrap());

        let conn = repo.get_conn().unwrap();
        let created: i64 = conn
            .query_row("SELECT COUNT(*) FROM dispatch_event WHERE event_type = 'created'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(created, 2);
    }

    #[test]
    fn test_record_dispatch_attempt_increments_round() {
        let repo = setup();
        let now = Utc.with_ymd_and_hms(2026, 2, 1, 10, 0, 0).unwrap();
        repo.insert_if_absent(&lead("L1", now)).unwrap();

        assert_eq!(repo.record_dispatch_attempt("L1", now).unwrap(), 1);
        assert_eq!(repo.record_dispatch_attempt("L1", now + Duration::hours(1)).unwrap(), 2);
        let stored = repo.find_by_id("L1").unwrap().unwrap();
        assert_eq!(stored.last_dispatch_at, Some(now + Duration::hours(1)));

        assert!(repo.record_dispatch_attempt("missing", now).is_err());
    }

    #[test]
    fn test_conditional_status_update_and_reassign_due() {
        let repo = setup();
        let now = Utc.with_ymd_and_hms(2026, 2, 1, 10, 0, 0).unwrap();
        repo.insert_if_absent(&lead("L1", now)).unwrap();
        repo.insert_if_absent(&lead("L2", now)).unwrap();
        repo.record_dispatch_attempt("L1", now).unwrap();
        repo.record_dispatch_attempt("L2", now).unwrap();

        // 状态不匹配时不更新
        assert_eq!(repo.set_status_if("L2", LeadStatus::Contacted, LeadStatus::Lost, now).unwrap(), 0);
        assert_eq!(repo.set_status_if("L2", LeadStatus::New, LeadStatus::Lost, now).unwrap(), 1);

        let due = repo.list_reassign_due(now + Duration::hours(1)).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].lead_id, "L1");
        assert!(repo.list_reassign_due(now - Duration::hours(1)).unwrap().is_empty());

        let counts = repo.count_by_status().unwrap();
        assert!(counts.contains(&(LeadStatus::New, 1)));
        assert!(counts.contains(&(LeadStatus::Lost, 1)));
    }
}
