use super::core::AssignmentLedger;
use crate::db::{enum_column, format_ts, opt_ts_column, ts_column};
use crate::domain::assignment::{Assignment, AssignmentStats, ContactOutcome};
use crate::domain::types::AssignmentStatus;
use crate::repository::error::RepositoryResult;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Result as SqliteResult, Row};

const SELECT_COLUMNS: &str = r#"
    SELECT assignment_id, lead_id, provider_id, rank_position, score, distance_km,
           status, dispatch_round, policy_version, assigned_at, viewed_at, resolved_at
    FROM assignment
"#;

impl AssignmentLedger {
    // ==========================================
    // 查询操作
    // ==========================================

    pub fn find_by_id(&self, assignment_id: &str) -> RepositoryResult<Option<Assignment>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE assignment_id = ?1", SELECT_COLUMNS);
        let assignment = conn.query_row(&sql, params![assignment_id], map_row).optional()?;
        Ok(assignment)
    }

    /// 查询线索的全部指派（按轮次、名次排序）
    pub fn find_by_lead(&self, lead_id: &str) -> RepositoryResult<Vec<Assignment>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE lead_id = ?1 ORDER BY dispatch_round ASC, rank_position ASC",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![lead_id], map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rows)
    }

    /// 查询服务商的全部指派（按时间倒序）
    pub fn find_by_provider(&self, provider_id: &str) -> RepositoryResult<Vec<Assignment>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE provider_id = ?1 ORDER BY assigned_at DESC, assignment_id ASC",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![provider_id], map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rows)
    }

    /// 线索当前活跃指派数
    pub fn count_active_for_lead(&self, lead_id: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        Self::count_active_with(&conn, lead_id)
    }

    /// 按状态分页查询（派单看板）
    pub fn list_by_status(
        &self,
        status: AssignmentStatus,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<Assignment>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE status = ?1 ORDER BY assigned_at DESC, assignment_id ASC LIMIT ?2 OFFSET ?3",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![status.as_str(), limit, offset], map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rows)
    }

    /// 派单看板统计（各状态数量）
    pub fn status_counts(&self) -> RepositoryResult<AssignmentStats> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM assignment GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((enum_column::<AssignmentStatus>(row, 0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<SqliteResult<Vec<_>>>()?;

        let mut stats = AssignmentStats::default();
        for (status, count) in rows {
            match status {
                AssignmentStatus::Pending => stats.pending = count,
                AssignmentStatus::Viewed => stats.viewed = count,
                AssignmentStatus::Responded => stats.responded = count,
                AssignmentStatus::Declined => stats.declined = count,
                AssignmentStatus::Expired => stats.expired = count,
            }
            stats.total += count;
        }
        Ok(stats)
    }

    /// 查询已超时的活跃指派
    ///
    /// - pending: assigned_at 早于 now - lead_expiry_hours
    /// - viewed:  viewed_at 早于 now - quote_expiry_hours
    pub fn list_stale(
        &self,
        now: DateTime<Utc>,
        lead_expiry_hours: i64,
        quote_expiry_hours: i64,
    ) -> RepositoryResult<Vec<Assignment>> {
        let conn = self.get_conn()?;
        let pending_cutoff = format_ts(&(now - Duration::hours(lead_expiry_hours)));
        let viewed_cutoff = format_ts(&(now - Duration::hours(quote_expiry_hours)));

        let sql = format!(
            r#"{}
            WHERE (status = 'pending' AND assigned_at <= ?1)
               OR (status = 'viewed' AND COALESCE(viewed_at, assigned_at) <= ?2)
            ORDER BY assigned_at ASC, assignment_id ASC
            "#,
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![pending_cutoff, viewed_cutoff], map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rows)
    }

    /// 查询联系结果
    pub fn find_outcome(&self, assignment_id: &str) -> RepositoryResult<Option<ContactOutcome>> {
        let conn = self.get_conn()?;
        let outcome = conn
            .query_row(
                r#"
                SELECT assignment_id, sent_at, viewed_at, responded_at, declined_at,
                       feedback, is_billed, billed_amount, billed_at, updated_at
                FROM contact_outcome
                WHERE assignment_id = ?1
                "#,
                params![assignment_id],
                map_outcome_row,
            )
            .optional()?;
        Ok(outcome)
    }
}

fn map_row(row: &Row<'_>) -> SqliteResult<Assignment> {
    Ok(Assignment {
        assignment_id: row.get(0)?,
        lead_id: row.get(1)?,
        provider_id: row.get(2)?,
        rank_position: row.get(3)?,
        score: row.get(4)?,
        distance_km: row.get(5)?,
        status: enum_column(row, 6)?,
        dispatch_round: row.get(7)?,
        policy_version: row.get(8)?,
        assigned_at: ts_column(row, 9)?,
        viewed_at: opt_ts_column(row, 10)?,
        resolved_at: opt_ts_column(row, 11)?,
    })
}

fn map_outcome_row(row: &Row<'_>) -> SqliteResult<ContactOutcome> {
    Ok(ContactOutcome {
        assignment_id: row.get(0)?,
        sent_at: opt_ts_column(row, 1)?,
        viewed_at: opt_ts_column(row, 2)?,
        responded_at: opt_ts_column(row, 3)?,
        declined_at: opt_ts_column(row, 4)?,
        feedback: row.get(5)?,
        is_billed: row.get(6)?,
        billed_amount: row.get(7)?,
        billed_at: opt_ts_column(row, 8)?,
        updated_at: ts_column(row, 9)?,
    })
}
