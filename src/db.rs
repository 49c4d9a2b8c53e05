// ==========================================
// 线索派单引擎 - SQLite 连接与建库
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为（外键、busy_timeout）
// - 统一建表语句，保证测试库与生产库结构一致
// - 统一时间戳的存储格式（字符串比较即时间比较）
// ==========================================

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use std::str::FromStr;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 时间戳存储格式（UTC，毫秒精度，字典序 = 时间序）
pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 初始化数据库 schema（幂等）
///
/// 说明：
/// - assignment 上的部分唯一索引保证同一 (lead, provider) 最多一条活跃指派
/// - dispatch_event 只追加，代码中不存在对它的 UPDATE/DELETE
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );

        CREATE TABLE IF NOT EXISTS service_catalog (
            service_name TEXT PRIMARY KEY,
            category TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS lead (
            lead_id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            service_name TEXT NOT NULL,
            urgency TEXT NOT NULL,
            latitude REAL,
            longitude REAL,
            postal_code TEXT,
            department TEXT,
            city TEXT,
            status TEXT NOT NULL DEFAULT 'new',
            dispatch_round INTEGER NOT NULL DEFAULT 0,
            last_dispatch_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS provider (
            provider_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            specialties_json TEXT NOT NULL DEFAULT '[]',
            department TEXT,
            latitude REAL,
            longitude REAL,
            radius_km REAL,
            is_verified INTEGER NOT NULL DEFAULT 0,
            is_claimed INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            rating REAL,
            review_count INTEGER NOT NULL DEFAULT 0,
            response_rate REAL NOT NULL DEFAULT 0,
            offers_received INTEGER NOT NULL DEFAULT 0,
            offers_responded INTEGER NOT NULL DEFAULT 0,
            last_active_at TEXT,
            daily_quota INTEGER,
            monthly_quota INTEGER,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS assignment (
            assignment_id TEXT PRIMARY KEY,
            lead_id TEXT NOT NULL REFERENCES lead(lead_id),
            provider_id TEXT NOT NULL REFERENCES provider(provider_id),
            rank_position INTEGER NOT NULL,
            score REAL NOT NULL,
            distance_km REAL,
            status TEXT NOT NULL,
            dispatch_round INTEGER NOT NULL,
            policy_version INTEGER NOT NULL,
            assigned_at TEXT NOT NULL,
            viewed_at TEXT,
            resolved_at TEXT
        );

        CREATE UNIQUE INDEX IF NOT EXISTS ux_assignment_active_pair
            ON assignment(lead_id, provider_id)
            WHERE status IN ('pending', 'viewed');
        CREATE INDEX IF NOT EXISTS idx_assignment_provider_ts
            ON assignment(provider_id, assigned_at);
        CREATE INDEX IF NOT EXISTS idx_assignment_status
            ON assignment(status, assigned_at);

        CREATE TABLE IF NOT EXISTS contact_outcome (
            assignment_id TEXT PRIMARY KEY REFERENCES assignment(assignment_id),
            sent_at TEXT,
            viewed_at TEXT,
            responded_at TEXT,
            declined_at TEXT,
            feedback TEXT,
            is_billed INTEGER NOT NULL DEFAULT 0,
            billed_amount REAL,
            billed_at TEXT,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS dispatch_event (
            event_id TEXT PRIMARY KEY,
            lead_id TEXT,
            provider_id TEXT,
            event_type TEXT NOT NULL,
            actor TEXT NOT NULL,
            metadata_json TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_dispatch_event_lead
            ON dispatch_event(lead_id, created_at);
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

// ==========================================
// 时间戳工具
// ==========================================

/// 格式化为存储格式
pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

/// 解析存储格式（兼容无小数秒的旧数据）
pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f").map(|naive| naive.and_utc())
}

/// 从行读取必填时间戳列
pub fn ts_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// 从行读取可空时间戳列
pub fn opt_ts_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        Some(raw) => parse_ts(&raw)
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        None => Ok(None),
    }
}

/// 从行读取枚举列（存储值为 snake_case 字符串）
pub fn enum_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}
