// ==========================================
// 线索派单引擎 - 策略存储
// ==========================================
// 职责: 派单策略的加载、校验、版本化更新
// 存储: config_kv 表 (scope_id = 'global'，一项一行)
// 红线:
// - 快照一次 SELECT 读出全部配置项，不会读到更新中途的混合值
// - 存在非法值时整份快照不可用，不拿默认值顶替
// ==========================================

use crate::config::error::PolicyError;
use crate::config::policy_reader::PolicyReader;
use crate::config::policy_update::PolicyUpdate;
use crate::db::{format_ts, open_sqlite_connection, parse_ts};
use crate::domain::dispatch_event::DispatchEvent;
use crate::domain::policy::PolicySnapshot;
use crate::domain::types::DispatchEventType;
use crate::repository::DispatchEventRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, TransactionBehavior};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::info;

/// 配置作用域（派单策略只有全局一份）
pub const GLOBAL_SCOPE: &str = "global";

// ==========================================
// PolicyStore - 策略存储
// ==========================================
pub struct PolicyStore {
    conn: Arc<Mutex<Connection>>,
}

impl PolicyStore {
    /// 创建新的 PolicyStore 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> Result<Self, PolicyError> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 PolicyStore
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<Connection>, PolicyError> {
        self.conn
            .lock()
            .map_err(|e| PolicyError::Unavailable(format!("锁获取失败: {}", e)))
    }

    /// 读取 global scope 的全部原始配置项
    pub fn get_raw_entries(&self) -> Result<BTreeMap<String, String>, PolicyError> {
        let conn = self.lock()?;
        read_entries(&conn)
    }

    /// 读取当前生效策略快照
    pub fn load_snapshot(&self) -> Result<PolicySnapshot, PolicyError> {
        let entries = self.get_raw_entries()?;
        snapshot_from_entries(&entries)
    }

    /// 更新策略（校验 → 写入变更项 → 版本号 +1 → 记录 policy_updated 事件）
    ///
    /// # 参数
    /// - update: 待变更的配置项
    /// - updated_by: 操作人
    /// - now: 更新时间
    ///
    /// # 返回
    /// - Ok(PolicySnapshot): 更新后的快照；无实际变更时返回当前快照且版本不变
    pub fn update_policy(
        &self,
        update: &PolicyUpdate,
        updated_by: &str,
        now: DateTime<Utc>,
    ) -> Result<PolicySnapshot, PolicyError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = read_entries(&tx)?;
        let current_version = current
            .get(policy_keys::POLICY_VERSION)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(0);

        let mut merged = current.clone();
        for (key, value) in update.entries() {
            merged.insert(key.clone(), value.clone());
        }
        let mut next = snapshot_from_entries(&merged)?;

        // 只写入规范化后确有变化的项
        let changed: BTreeMap<&'static str, String> = snapshot_entries(&next)
            .into_iter()
            .filter(|(key, value)| update.contains(key) && current.get(*key) != Some(value))
            .collect();

        if changed.is_empty() {
            return Ok(next);
        }

        next.version = current_version + 1;
        next.updated_at = Some(now);
        next.updated_by = Some(updated_by.to_string());

        for (key, value) in &changed {
            upsert_entry(&tx, key, value, now)?;
        }
        upsert_entry(&tx, policy_keys::POLICY_VERSION, &next.version.to_string(), now)?;
        upsert_entry(&tx, policy_keys::POLICY_UPDATED_AT, &format_ts(&now), now)?;
        upsert_entry(&tx, policy_keys::POLICY_UPDATED_BY, updated_by, now)?;

        let event = DispatchEvent::new(None, DispatchEventType::PolicyUpdated, now)
            .with_actor(updated_by)
            .with_metadata(&json!({ "version": next.version, "changed": changed }));
        DispatchEventRepository::insert_with(&tx, &event)?;

        tx.commit()?;

        info!(
            version = next.version,
            updated_by = %updated_by,
            changed = changed.len(),
            "派单策略已更新"
        );
        Ok(next)
    }
}

#[async_trait]
impl PolicyReader for PolicyStore {
    async fn get_active_policy(&self) -> Result<PolicySnapshot, PolicyError> {
        self.load_snapshot()
    }
}

fn read_entries(conn: &Connection) -> Result<BTreeMap<String, String>, PolicyError> {
    let mut stmt = conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = ?1")?;
    let rows = stmt.query_map(params![GLOBAL_SCOPE], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut entries = BTreeMap::new();
    for row in rows {
        let (key, value) = row?;
        entries.insert(key, value);
    }
    Ok(entries)
}

fn upsert_entry(conn: &Connection, key: &str, value: &str, now: DateTime<Utc>) -> Result<(), PolicyError> {
    conn.execute(
        r#"
        INSERT INTO config_kv (scope_id, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(scope_id, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
        params![GLOBAL_SCOPE, key, value, format_ts(&now)],
    )?;
    Ok(())
}

// ==========================================
// 配置项 ↔ 快照 编解码
// ==========================================

/// 由原始配置项构造快照（缺失项取默认值，随后整体校验）
pub fn snapshot_from_entries(entries: &BTreeMap<String, String>) -> Result<PolicySnapshot, PolicyError> {
    let mut snapshot = PolicySnapshot::default();
    for (key, value) in entries {
        apply_entry(&mut snapshot, key, value)?;
    }
    validate_snapshot(&snapshot)?;
    Ok(snapshot)
}

/// 快照的全部可调项（规范化字符串）
pub fn snapshot_entries(s: &PolicySnapshot) -> Vec<(&'static str, String)> {
    use policy_keys::*;

    vec![
        (MATCHING_STRATEGY, s.matching_strategy.as_str().to_string()),
        (MAX_ARTISANS_PER_LEAD, s.max_artisans_per_lead.to_string()),
        (PREFER_CLAIMED, s.prefer_claimed.to_string()),
        (REQUIRE_SPECIALTY_MATCH, s.require_specialty_match.to_string()),
        (SPECIALTY_MATCH_MODE, s.specialty_match_mode.as_str().to_string()),
        (REQUIRE_SAME_DEPARTMENT, s.require_same_department.to_string()),
        (GEO_RADIUS_KM, s.geo_radius_km.to_string()),
        (REQUIRE_VERIFIED_URGENT, s.require_verified_urgent.to_string()),
        (MIN_RATING, s.min_rating.to_string()),
        (EXCLUDE_INACTIVE_DAYS, s.exclude_inactive_days.to_string()),
        (DAILY_LEAD_QUOTA, s.daily_lead_quota.to_string()),
        (MONTHLY_LEAD_QUOTA, s.monthly_lead_quota.to_string()),
        (COOLDOWN_MINUTES, s.cooldown_minutes.to_string()),
        (WEIGHT_PROXIMITY, s.weights.proximity.to_string()),
        (WEIGHT_RATING, s.weights.rating.to_string()),
        (WEIGHT_REVIEWS, s.weights.reviews.to_string()),
        (WEIGHT_RESPONSE_RATE, s.weights.response_rate.to_string()),
        (WEIGHT_VERIFIED, s.weights.verified.to_string()),
        (URGENCY_LOW_MULTIPLIER, s.urgency_multipliers.low.to_string()),
        (URGENCY_MEDIUM_MULTIPLIER, s.urgency_multipliers.medium.to_string()),
        (URGENCY_HIGH_MULTIPLIER, s.urgency_multipliers.high.to_string()),
        (URGENCY_EMERGENCY_MULTIPLIER, s.urgency_multipliers.emergency.to_string()),
        (LEAD_EXPIRY_HOURS, s.lead_expiry_hours.to_string()),
        (QUOTE_EXPIRY_HOURS, s.quote_expiry_hours.to_string()),
        (AUTO_REASSIGN_HOURS, s.auto_reassign_hours.to_string()),
    ]
}

/// 将单个配置项写入快照
///
/// 未知 key 忽略（config_kv 的 global scope 可能还存有其他模块的配置）
fn apply_entry(s: &mut PolicySnapshot, key: &str, raw: &str) -> Result<(), PolicyError> {
    use policy_keys::*;

    match key {
        MATCHING_STRATEGY => s.matching_strategy = parse_enum(key, raw)?,
        MAX_ARTISANS_PER_LEAD => s.max_artisans_per_lead = parse_num(key, raw)?,
        PREFER_CLAIMED => s.prefer_claimed = parse_bool(key, raw)?,
        REQUIRE_SPECIALTY_MATCH => s.require_specialty_match = parse_bool(key, raw)?,
        SPECIALTY_MATCH_MODE => s.specialty_match_mode = parse_enum(key, raw)?,
        REQUIRE_SAME_DEPARTMENT => s.require_same_department = parse_bool(key, raw)?,
        GEO_RADIUS_KM => s.geo_radius_km = parse_num(key, raw)?,
        REQUIRE_VERIFIED_URGENT => s.require_verified_urgent = parse_bool(key, raw)?,
        MIN_RATING => s.min_rating = parse_num(key, raw)?,
        EXCLUDE_INACTIVE_DAYS => s.exclude_inactive_days = parse_num(key, raw)?,
        DAILY_LEAD_QUOTA => s.daily_lead_quota = parse_num(key, raw)?,
        MONTHLY_LEAD_QUOTA => s.monthly_lead_quota = parse_num(key, raw)?,
        COOLDOWN_MINUTES => s.cooldown_minutes = parse_num(key, raw)?,
        WEIGHT_PROXIMITY => s.weights.proximity = parse_num(key, raw)?,
        WEIGHT_RATING => s.weights.rating = parse_num(key, raw)?,
        WEIGHT_REVIEWS => s.weights.reviews = parse_num(key, raw)?,
        WEIGHT_RESPONSE_RATE => s.weights.response_rate = parse_num(key, raw)?,
        WEIGHT_VERIFIED => s.weights.verified = parse_num(key, raw)?,
        URGENCY_LOW_MULTIPLIER => s.urgency_multipliers.low = parse_num(key, raw)?,
        URGENCY_MEDIUM_MULTIPLIER => s.urgency_multipliers.medium = parse_num(key, raw)?,
        URGENCY_HIGH_MULTIPLIER => s.urgency_multipliers.high = parse_num(key, raw)?,
        URGENCY_EMERGENCY_MULTIPLIER => s.urgency_multipliers.emergency = parse_num(key, raw)?,
        LEAD_EXPIRY_HOURS => s.lead_expiry_hours = parse_num(key, raw)?,
        QUOTE_EXPIRY_HOURS => s.quote_expiry_hours = parse_num(key, raw)?,
        AUTO_REASSIGN_HOURS => s.auto_reassign_hours = parse_num(key, raw)?,
        POLICY_VERSION => s.version = parse_num(key, raw)?,
        POLICY_UPDATED_AT => {
            s.updated_at = Some(parse_ts(raw.trim()).map_err(|e| invalid(key, raw, e.to_string()))?)
        }
        POLICY_UPDATED_BY => s.updated_by = Some(raw.to_string()),
        _ => {}
    }
    Ok(())
}

/// 校验快照取值范围
pub fn validate_snapshot(s: &PolicySnapshot) -> Result<(), PolicyError> {
    use policy_keys::*;

    check(MAX_ARTISANS_PER_LEAD, (1..=20).contains(&s.max_artisans_per_lead), "取值范围 1..=20")?;
    check(GEO_RADIUS_KM, (1.0..=500.0).contains(&s.geo_radius_km), "取值范围 1..=500")?;
    check(MIN_RATING, (0.0..=5.0).contains(&s.min_rating), "取值范围 0..=5")?;
    check(EXCLUDE_INACTIVE_DAYS, s.exclude_inactive_days >= 0, "不能为负")?;
    check(DAILY_LEAD_QUOTA, s.daily_lead_quota >= 0, "不能为负")?;
    check(MONTHLY_LEAD_QUOTA, s.monthly_lead_quota >= 0, "不能为负")?;
    check(COOLDOWN_MINUTES, s.cooldown_minutes >= 0, "不能为负")?;
    check(LEAD_EXPIRY_HOURS, s.lead_expiry_hours > 0, "必须大于 0")?;
    check(QUOTE_EXPIRY_HOURS, s.quote_expiry_hours > 0, "必须大于 0")?;
    check(AUTO_REASSIGN_HOURS, s.auto_reassign_hours > 0, "必须大于 0")?;

    let weights = [
        (WEIGHT_PROXIMITY, s.weights.proximity),
        (WEIGHT_RATING, s.weights.rating),
        (WEIGHT_REVIEWS, s.weights.reviews),
        (WEIGHT_RESPONSE_RATE, s.weights.response_rate),
        (WEIGHT_VERIFIED, s.weights.verified),
    ];
    for (key, w) in weights {
        check(key, (0.0..=100.0).contains(&w), "权重取值范围 0..=100")?;
    }

    let multipliers = [
        (URGENCY_LOW_MULTIPLIER, s.urgency_multipliers.low),
        (URGENCY_MEDIUM_MULTIPLIER, s.urgency_multipliers.medium),
        (URGENCY_HIGH_MULTIPLIER, s.urgency_multipliers.high),
        (URGENCY_EMERGENCY_MULTIPLIER, s.urgency_multipliers.emergency),
    ];
    for (key, m) in multipliers {
        check(key, m > 0.0 && m <= 10.0, "乘数取值范围 (0, 10]")?;
    }
    Ok(())
}

fn check(key: &str, ok: bool, message: &str) -> Result<(), PolicyError> {
    if ok {
        Ok(())
    } else {
        Err(PolicyError::OutOfRange {
            key: key.to_string(),
            message: message.to_string(),
        })
    }
}

fn invalid(key: &str, raw: &str, reason: String) -> PolicyError {
    PolicyError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
        reason,
    }
}

fn parse_num<T>(key: &str, raw: &str) -> Result<T, PolicyError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| invalid(key, raw, e.to_string()))
}

fn parse_enum<T>(key: &str, raw: &str) -> Result<T, PolicyError>
where
    T: std::str::FromStr<Err = String>,
{
    raw.parse::<T>().map_err(|e| invalid(key, raw, e))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, PolicyError> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(invalid(key, raw, "需要布尔值".to_string())),
    }
}

/// 判断是否为可调策略项（不含版本元信息）
pub fn is_tunable_key(key: &str) -> bool {
    policy_keys::TUNABLE.contains(&key)
}

// ==========================================
// 配置键常量
// ==========================================
pub mod policy_keys {
    // 选择算法
    pub const MATCHING_STRATEGY: &str = "matching_strategy";
    pub const MAX_ARTISANS_PER_LEAD: &str = "max_artisans_per_lead";
    pub const PREFER_CLAIMED: &str = "prefer_claimed";

    // 硬过滤
    pub const REQUIRE_SPECIALTY_MATCH: &str = "require_specialty_match";
    pub const SPECIALTY_MATCH_MODE: &str = "specialty_match_mode";
    pub const REQUIRE_SAME_DEPARTMENT: &str = "require_same_department";
    pub const GEO_RADIUS_KM: &str = "geo_radius_km";
    pub const REQUIRE_VERIFIED_URGENT: &str = "require_verified_urgent";
    pub const MIN_RATING: &str = "min_rating";
    pub const EXCLUDE_INACTIVE_DAYS: &str = "exclude_inactive_days";
    pub const DAILY_LEAD_QUOTA: &str = "daily_lead_quota";
    pub const MONTHLY_LEAD_QUOTA: &str = "monthly_lead_quota";
    pub const COOLDOWN_MINUTES: &str = "cooldown_minutes";

    // 打分权重
    pub const WEIGHT_PROXIMITY: &str = "weight_proximity";
    pub const WEIGHT_RATING: &str = "weight_rating";
    pub const WEIGHT_REVIEWS: &str = "weight_reviews";
    pub const WEIGHT_RESPONSE_RATE: &str = "weight_response_rate";
    pub const WEIGHT_VERIFIED: &str = "weight_verified";

    // 紧急乘数
    pub const URGENCY_LOW_MULTIPLIER: &str = "urgency_low_multiplier";
    pub const URGENCY_MEDIUM_MULTIPLIER: &str = "urgency_medium_multiplier";
    pub const URGENCY_HIGH_MULTIPLIER: &str = "urgency_high_multiplier";
    pub const URGENCY_EMERGENCY_MULTIPLIER: &str = "urgency_emergency_multiplier";

    // 计时器
    pub const LEAD_EXPIRY_HOURS: &str = "lead_expiry_hours";
    pub const QUOTE_EXPIRY_HOURS: &str = "quote_expiry_hours";
    pub const AUTO_REASSIGN_HOURS: &str = "auto_reassign_hours";

    // 版本元信息（只由 update_policy 写入）
    pub const POLICY_VERSION: &str = "policy_version";
    pub const POLICY_UPDATED_AT: &str = "policy_updated_at";
    pub const POLICY_UPDATED_BY: &str = "policy_updated_by";

    pub const TUNABLE: &[&str] = &[
        MATCHING_STRATEGY,
        MAX_ARTISANS_PER_LEAD,
        PREFER_CLAIMED,
        REQUIRE_SPECIALTY_MATCH,
        SPECIALTY_MATCH_MODE,
        REQUIRE_SAME_DEPARTMENT,
        GEO_RADIUS_KM,
        REQUIRE_VERIFIED_URGENT,
        MIN_RATING,
        EXCLUDE_INACTIVE_DAYS,
        DAILY_LEAD_QUOTA,
        MONTHLY_LEAD_QUOTA,
        COOLDOWN_MINUTES,
        WEIGHT_PROXIMITY,
        WEIGHT_RATING,
        WEIGHT_REVIEWS,
        WEIGHT_RESPONSE_RATE,
        WEIGHT_VERIFIED,
        URGENCY_LOW_MULTIPLIER,
        URGENCY_MEDIUM_MULTIPLIER,
        URGENCY_HIGH_MULTIPLIER,
        URGENCY_EMERGENCY_MULTIPLIER,
        LEAD_EXPIRY_HOURS,
        QUOTE_EXPIRY_HOURS,
        AUTO_REASSIGN_HOURS,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{MatchingStrategy, SpecialtyMatchMode};
    use chrono::TimeZone;

    fn setup() -> (Arc<Mutex<Connection>>, PolicyStore) {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::configure_sqlite_connection(&conn).unwrap();
        crate::db::init_schema(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));
        (conn.clone(), PolicyStore::from_connection(conn))
    }

    fn put_raw(conn: &Arc<Mutex<Connection>>, key: &str, value: &str) {
        let guard = conn.lock().unwrap();
        upsert_entry(&guard, key, value, Utc::now()).unwrap();
    }

    #[test]
    fn test_empty_store_yields_defaults() {
        let (_conn, store) = setup();
        let snapshot = store.load_snapshot().unwrap();
        assert_eq!(snapshot, PolicySnapshot::default());
        assert_eq!(snapshot.version, 0);
        assert_eq!(snapshot.max_artisans_per_lead, 3);
        assert_eq!(snapshot.specialty_match_mode, SpecialtyMatchMode::Category);
    }

    #[test]
    fn test_partial_store_merges_with_defaults() {
        let (conn, store) = setup();
        put_raw(&conn, policy_keys::MATCHING_STRATEGY, "geographic");
        put_raw(&conn, policy_keys::WEIGHT_RATING, "12.5");
        put_raw(&conn, "unrelated_module_key", "whatever");

        let snapshot = store.load_snapshot().unwrap();
        assert_eq!(snapshot.matching_strategy, MatchingStrategy::Geographic);
        assert_eq!(snapshot.weights.rating, 12.5);
        assert_eq!(snapshot.weights.proximity, 25.0);
    }

    #[test]
    fn test_garbled_value_makes_policy_unavailable() {
        let (conn, store) = setup();
        put_raw(&conn, policy_keys::GEO_RADIUS_KM, "fifty");
        assert!(matches!(store.load_snapshot(), Err(PolicyError::InvalidValue { .. })));

        put_raw(&conn, policy_keys::GEO_RADIUS_KM, "0");
        assert!(matches!(store.load_snapshot(), Err(PolicyError::OutOfRange { .. })));
    }

    #[test]
    fn test_update_bumps_version_and_records_event() {
        let (conn, store) = setup();
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();

        let update = PolicyUpdate::new()
            .with(policy_keys::MAX_ARTISANS_PER_LEAD, 5)
            .unwrap()
            .with(policy_keys::PREFER_CLAIMED, "FALSE")
            .unwrap();
        let snapshot = store.update_policy(&update, "ops@example.fr", now).unwrap();

        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.max_artisans_per_lead, 5);
        assert!(!snapshot.prefer_claimed);
        assert_eq!(snapshot.updated_by.as_deref(), Some("ops@example.fr"));

        let reloaded = store.load_snapshot().unwrap();
        assert_eq!(reloaded, snapshot);
        assert_eq!(store.get_raw_entries().unwrap()[policy_keys::PREFER_CLAIMED], "false");

        // 无实际变更不升版本
        let same = PolicyUpdate::new().with(policy_keys::MAX_ARTISANS_PER_LEAD, "5").unwrap();
        assert_eq!(store.update_policy(&same, "ops", now).unwrap().version, 1);

        let events = DispatchEventRepository::new(conn)
            .count_by_type(DispatchEventType::PolicyUpdated)
            .unwrap();
        assert_eq!(events, 1);
    }

    #[test]
    fn test_invalid_update_is_rejected_atomically() {
        let (_conn, store) = setup();
        let update = PolicyUpdate::new()
            .with(policy_keys::COOLDOWN_MINUTES, 10)
            .unwrap()
            .with(policy_keys::MAX_ARTISANS_PER_LEAD, 50)
            .unwrap();

        assert!(matches!(
            store.update_policy(&update, "ops", Utc::now()),
            Err(PolicyError::OutOfRange { .. })
        ));
        let snapshot = store.load_snapshot().unwrap();
        assert_eq!(snapshot.cooldown_minutes, 30);
        assert_eq!(snapshot.version, 0);
    }

    #[test]
    fn test_update_can_repair_garbled_key() {
        let (conn, store) = setup();
        put_raw(&conn, policy_keys::MIN_RATING, "n/a");
        assert!(store.load_snapshot().is_err());

        let update = PolicyUpdate::new().with(policy_keys::MIN_RATING, 3.5).unwrap();
        let snapshot = store.update_policy(&update, "ops", Utc::now()).unwrap();
        assert_eq!(snapshot.min_rating, 3.5);
        assert!(store.load_snapshot().is_ok());
    }
}
