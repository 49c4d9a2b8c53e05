// ==========================================
// 线索派单引擎 - 线索领域模型
// ==========================================
// 线索由外部录入方创建；派单引擎只在边界处归一化，
// 之后过滤/打分/选择只面对统一的 Lead 结构
// ==========================================

use crate::domain::types::{LeadSource, LeadStatus, Urgency};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// GeoPoint - 经纬度点
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// 构造并校验坐标（有限值且在合法范围内）
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return None;
        }
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return None;
        }
        Some(Self { latitude, longitude })
    }

    /// 从可空列组合（任一缺失即视为无坐标）
    pub fn from_parts(latitude: Option<f64>, longitude: Option<f64>) -> Option<Self> {
        match (latitude, longitude) {
            (Some(lat), Some(lon)) => Self::new(lat, lon),
            _ => None,
        }
    }
}

// ==========================================
// Lead - 规范化后的线索
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub lead_id: String,
    pub source: LeadSource,
    pub service_name: String,
    pub urgency: Urgency,
    pub location: Option<GeoPoint>,
    pub postal_code: Option<String>,
    pub department: Option<String>,
    pub city: Option<String>,
    pub status: LeadStatus,
    pub dispatch_round: i64,
    pub last_dispatch_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ==========================================
// DispatchRequest - 派单入口参数
// ==========================================
// 对应外部调用: Dispatch(leadID, serviceName, urgency, lat?, lon?, postalCode?, city?, sourceTable)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub lead_id: String,
    pub service_name: String,
    pub urgency: Urgency,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub source_table: String,
}

impl DispatchRequest {
    /// 归一化为 Lead
    ///
    /// # 返回
    /// - Ok((Lead, Option<String>)): 线索 + 坐标问题说明（坐标缺失/非法时降级为按省匹配）
    /// - Err(String): 必填字段缺失或来源表未知
    pub fn normalize(&self, now: DateTime<Utc>) -> Result<(Lead, Option<String>), String> {
        let lead_id = self.lead_id.trim();
        if lead_id.is_empty() {
            return Err("lead_id 不能为空".to_string());
        }

        let service_name = self.service_name.trim();
        if service_name.is_empty() {
            return Err(format!("线索 {} 缺少服务名称", lead_id));
        }

        let source = LeadSource::from_source_table(&self.source_table)
            .ok_or_else(|| format!("未知线索来源表: {}", self.source_table))?;

        let postal_code = non_empty(self.postal_code.as_deref());
        let department = postal_code.as_deref().and_then(department_from_postal_code);

        let location = GeoPoint::from_parts(self.latitude, self.longitude);
        let geometry_issue = match (self.latitude, self.longitude, location) {
            (_, _, Some(_)) => None,
            (None, None, None) => Some("坐标缺失".to_string()),
            (lat, lon, None) => Some(format!("坐标非法: lat={:?}, lon={:?}", lat, lon)),
        };

        let lead = Lead {
            lead_id: lead_id.to_string(),
            source,
            service_name: service_name.to_string(),
            urgency: self.urgency,
            location,
            postal_code,
            department,
            city: non_empty(self.city.as_deref()),
            status: LeadStatus::New,
            dispatch_round: 0,
            last_dispatch_at: None,
            created_at: now,
            updated_at: now,
        };

        Ok((lead, geometry_issue))
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// 由法国邮编推导省编号
///
/// 规则:
/// - 常规: 前两位 (75001 → 75)
/// - 科西嘉: 200xx/201xx → 2A，202xx 及以上 → 2B
/// - 海外省: 97x/98x 取前三位 (97400 → 974)
pub fn department_from_postal_code(postal_code: &str) -> Option<String> {
    let code: String = postal_code.chars().filter(|c| !c.is_whitespace()).collect();
    if code.len() != 5 || !code.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    if code.starts_with("20") {
        let n: u32 = code.parse().ok()?;
        return Some(if n < 20200 { "2A".to_string() } else { "2B".to_string() });
    }
    if code.starts_with("97") || code.starts_with("98") {
        return Some(code[..3].to_string());
    }
    Some(code[..2].to_string())
}
