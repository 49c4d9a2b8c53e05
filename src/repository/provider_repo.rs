// ==========================================
// 线索派单引擎 - 服务商数据仓储
// ==========================================
// 资料字段由名册导入维护；
// offers_received / offers_responded / response_rate 仅由派单/结果流程维护
// ==========================================

use crate::db::{format_ts, opt_ts_column, ts_column};
use crate::domain::lead::GeoPoint;
use crate::domain::provider::{Provider, ProviderWorkload};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, Duration, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// 日配额滚动窗口
pub const DAILY_WINDOW_HOURS: i64 = 24;
/// 月配额滚动窗口
pub const MONTHLY_WINDOW_DAYS: i64 = 30;

const SELECT_COLUMNS: &str = r#"
    SELECT provider_id, name, specialties_json, department, latitude, longitude,
           radius_km, is_verified, is_claimed, is_active, rating, review_count,
           response_rate, offers_received, offers_responded, last_active_at,
           daily_quota, monthly_quota, updated_at
    FROM provider
"#;

// ==========================================
// ProviderRepository - 服务商仓储
// ==========================================
pub struct ProviderRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ProviderRepository {
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

    /// 写入服务商资料（按 provider_id upsert）
    ///
    /// 说明：首次插入时采用传入的反馈统计；已存在时只覆盖资料字段，
    /// 引擎维护的统计列保持不变。
    pub fn upsert_profile(&self, provider: &Provider) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::upsert_profile_with(&conn, provider)
    }

    pub fn upsert_profile_with(conn: &Connection, provider: &Provider) -> RepositoryResult<()> {
        let specialties_json = serde_json::to_string(&provider.specialties).map_err(|e| {
            RepositoryError::FieldValueError {
                field: "specialties".to_string(),
                message: e.to_string(),
            }
        })?;

        conn.execute(
            r#"
            INSERT INTO provider (
                provider_id, name, specialties_json, department, latitude, longitude,
                radius_km, is_verified, is_claimed, is_active, rating, review_count,
                response_rate, offers_received, offers_responded, last_active_at,
                daily_quota, monthly_quota, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
            ON CONFLICT(provider_id) DO UPDATE SET
                name = excluded.name,
                specialties_json = excluded.specialties_json,
                department = excluded.department,
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                radius_km = excluded.radius_km,
                is_verified = excluded.is_verified,
                is_claimed = excluded.is_claimed,
                is_active = excluded.is_active,
                rating = excluded.rating,
                review_count = excluded.review_count,
                last_active_at = excluded.last_active_at,
                daily_quota = excluded.daily_quota,
                monthly_quota = excluded.monthly_quota,
                updated_at = excluded.updated_at
            "#,
            params![
                provider.provider_id,
                provider.name,
                specialties_json,
                provider.department,
                provider.location.map(|p| p.latitude),
                provider.location.map(|p| p.longitude),
                provider.radius_km,
                provider.is_verified,
                provider.is_claimed,
                provider.is_active,
                provider.rating,
                provider.review_count,
                provider.response_rate,
                provider.offers_received,
                provider.offers_responded,
                provider.last_active_at.as_ref().map(format_ts),
                provider.daily_quota,
                provider.monthly_quota,
                format_ts(&provider.updated_at),
            ],
        )?;
        Ok(())
    }

    /// 记录一次收到的派单（offers_received +1，并重算响应率）
    pub fn record_offer_received_with(conn: &Connection, provider_id: &str) -> RepositoryResult<()> {
        let rows = conn.execute(
            r#"
            UPDATE provider
            SET offers_received = offers_received + 1,
                response_rate = CAST(offers_responded AS REAL) / (offers_received + 1)
            WHERE provider_id = ?1
            "#,
            params![provider_id],
        )?;
        if rows == 0 {
            return Err(RepositoryError::not_found("Provider", provider_id));
        }
        Ok(())
    }

    /// 记录一次响应（offers_responded +1，并重算响应率）
    pub fn record_response_with(conn: &Connection, provider_id: &str) -> RepositoryResult<()> {
        let rows = conn.execute(
            r#"
            UPDATE provider
            SET offers_responded = offers_responded + 1,
                response_rate = MIN(
                    1.0,
                    CAST(offers_responded + 1 AS REAL) / MAX(offers_received, 1)
                )
            WHERE provider_id = ?1
            "#,
            params![provider_id],
        )?;
        if rows == 0 {
            return Err(RepositoryError::not_found("Provider", provider_id));
        }
        Ok(())
    }

    // ==========================================
    // 查询操作
    // ==========================================

    pub fn find_by_id(&self, provider_id: &str) -> RepositoryResult<Option<Provider>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE provider_id = ?1", SELECT_COLUMNS);
        let provider = conn.query_row(&sql, params![provider_id], map_row).optional()?;
        Ok(provider)
    }

    /// 查询全部服务商（按 provider_id 排序，保证过滤顺序稳定）
    pub fn list_all(&self) -> RepositoryResult<Vec<Provider>> {
        let conn = self.get_conn()?;
        let sql = format!("{} ORDER BY provider_id ASC", SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let providers = stmt
            .query_map([], map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(providers)
    }

    pub fn count(&self) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM provider", [], |row| row.get(0))?)
    }

    /// 统计所有服务商的近期派单负载
    ///
    /// # 返回
    /// - provider_id → ProviderWorkload（无指派记录的服务商不在表中，视为 Default）
    pub fn workloads(&self, now: DateTime<Utc>) -> RepositoryResult<HashMap<String, ProviderWorkload>> {
        let conn = self.get_conn()?;
        let (day_cutoff, month_cutoff) = window_cutoffs(now);

        let mut stmt = conn.prepare(
            r#"
            SELECT provider_id,
                   SUM(CASE WHEN assigned_at > ?1 THEN 1 ELSE 0 END),
                   SUM(CASE WHEN assigned_at > ?2 THEN 1 ELSE 0 END),
                   MAX(assigned_at),
                   MAX(CASE WHEN status = 'expired' THEN resolved_at END)
            FROM assignment
            GROUP BY provider_id
            "#,
        )?;

        let rows = stmt
            .query_map(params![day_cutoff, month_cutoff], |row| {
                Ok((row.get::<_, String>(0)?, map_workload(row)?))
            })?
            .collect::<SqliteResult<Vec<_>>>()?;

        Ok(rows.into_iter().collect())
    }

    /// 在事务内统计单个服务商负载（落库前复核配额/冷却）
    pub fn workload_with(
        conn: &Connection,
        provider_id: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<ProviderWorkload> {
        let (day_cutoff, month_cutoff) = window_cutoffs(now);

        let workload = conn.query_row(
            r#"
            SELECT ?3,
                   COALESCE(SUM(CASE WHEN assigned_at > ?1 THEN 1 ELSE 0 END), 0),
                   COALESCE(SUM(CASE WHEN assigned_at > ?2 THEN 1 ELSE 0 END), 0),
                   MAX(assigned_at),
                   MAX(CASE WHEN status = 'expired' THEN resolved_at END)
            FROM assignment
            WHERE provider_id = ?3
            "#,
            params![day_cutoff, month_cutoff, provider_id],
            map_workload,
        )?;
        Ok(workload)
    }

    /// 在事务内读取服务商套餐配额覆写
    pub fn plan_quotas_with(
        conn: &Connection,
        provider_id: &str,
    ) -> RepositoryResult<(Option<i64>, Option<i64>)> {
        let quotas = conn
            .query_row(
                "SELECT daily_quota, monthly_quota FROM provider WHERE provider_id = ?1",
                params![provider_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        quotas.ok_or_else(|| RepositoryError::not_found("Provider", provider_id))
    }
}

fn window_cutoffs(now: DateTime<Utc>) -> (String, String) {
    (
        format_ts(&(now - Duration::hours(DAILY_WINDOW_HOURS))),
        format_ts(&(now - Duration::days(MONTHLY_WINDOW_DAYS))),
    )
}

fn map_workload(row: &Row<'_>) -> SqliteResult<ProviderWorkload> {
    Ok(ProviderWorkload {
        assigned_last_day: row.get(1)?,
        assigned_last_month: row.get(2)?,
        last_assigned_at: opt_ts_column(row, 3)?,
        last_expired_at: opt_ts_column(row, 4)?,
    })
}

fn map_row(row: &Row<'_>) -> SqliteResult<Provider> {
    let specialties_raw: String = row.get(2)?;
    let specialties: Vec<String> = serde_json::from_str(&specialties_raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;

    Ok(Provider {
        provider_id: row.get(0)?,
        name: row.get(1)?,
        specialties,
        department: row.get(3)?,
        location: GeoPoint::from_parts(row.get(4)?, row.get(5)?),
        radius_km: row.get(6)?,
        is_verified: row.get(7)?,
        is_claimed: row.get(8)?,
        is_active: row.get(9)?,
        rating: row.get(10)?,
        review_count: row.get(11)?,
        response_rate: row.get(12)?,
        offers_received: row.get(13)?,
        offers_responded: row.get(14)?,
        last_active_at: opt_ts_column(row, 15)?,
        daily_quota: row.get(16)?,
        monthly_quota: row.get(17)?,
        updated_at: ts_column(row, 18)?,
    })
}
