// ==========================================
// 线索派单引擎 - 服务商名录导入
// ==========================================
// 输入: 资料方导出的 CSV 名录
// 列: provider_id,name,specialties,department,latitude,longitude,radius_km,
//     is_verified,is_claimed,is_active,rating,review_count,last_active_at,
//     daily_quota,monthly_quota
// 规则:
// - 按 provider_id upsert，保留引擎维护的反馈统计
// - 格式错误的行记录行号后跳过，不中断整批导入
// ==========================================

use crate::db::parse_ts;
use crate::domain::lead::GeoPoint;
use crate::domain::provider::Provider;
use crate::importer::error::{ImportError, ImportResult};
use crate::repository::ProviderRepository;
use chrono::{DateTime, NaiveDate, Utc};
use csv::{ReaderBuilder, StringRecord};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// 必需列
const REQUIRED_COLUMNS: [&str; 2] = ["provider_id", "name"];

/// 专业列表分隔符
const SPECIALTY_SEPARATOR: char = ';';

/// 被跳过的行
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedRow {
    pub line: u64,
    pub message: String,
}

/// 导入结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub total_rows: usize,
    pub imported: usize,
    pub skipped: Vec<SkippedRow>,
}

pub struct ProviderImporter {
    provider_repo: Arc<ProviderRepository>,
}

impl ProviderImporter {
    pub fn new(provider_repo: Arc<ProviderRepository>) -> Self {
        Self { provider_repo }
    }

    /// 从文件导入
    pub fn import_file(&self, path: &Path, now: DateTime<Utc>) -> ImportResult<ImportReport> {
        if !path.exists() {
            return Err(ImportError::FileNotFound(path.display().to_string()));
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => {}
            other => return Err(ImportError::UnsupportedFormat(other.unwrap_or("").to_string())),
        }

        let file = File::open(path).map_err(|e| ImportError::CsvParseError(e.to_string()))?;
        let report = self.import_reader(file, now)?;

        info!(
            path = %path.display(),
            total = report.total_rows,
            imported = report.imported,
            skipped = report.skipped.len(),
            "服务商名录导入完成"
        );
        Ok(report)
    }

    /// 从任意读取源导入
    pub fn import_reader<R: Read>(&self, reader: R, now: DateTime<Utc>) -> ImportResult<ImportReport> {
        let mut reader = ReaderBuilder::new().has_headers(true).flexible(true).from_reader(reader);

        let columns: HashMap<String, usize> = reader
            .headers()?
            .iter()
            .enumerate()
            .map(|(idx, h)| (h.trim().to_lowercase(), idx))
            .collect();
        for required in REQUIRED_COLUMNS {
            if !columns.contains_key(required) {
                return Err(ImportError::MissingColumn(required.to_string()));
            }
        }

        let mut report = ImportReport::default();
        for (idx, result) in reader.records().enumerate() {
            // 表头占第 1 行
            let fallback_line = idx as u64 + 2;
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    report.total_rows += 1;
                    skip(&mut report, fallback_line, e.to_string());
                    continue;
                }
            };
            if record.iter().all(|v| v.trim().is_empty()) {
                continue;
            }
            report.total_rows += 1;

            let line = record.position().map(|p| p.line()).unwrap_or(fallback_line);
            let row = RowView {
                record: &record,
                columns: &columns,
                line,
            };

            match parse_provider(&row, now) {
                Ok(provider) => {
                    self.provider_repo.upsert_profile(&provider)?;
                    report.imported += 1;
                }
                Err(e) if e.is_row_error() => skip(&mut report, line, e.to_string()),
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }
}

fn skip(report: &mut ImportReport, line: u64, message: String) {
    warn!(line, message = %message, "名录行格式错误，已跳过");
    report.skipped.push(SkippedRow { line, message });
}

// ==========================================
// 行解析
// ==========================================

struct RowView<'a> {
    record: &'a StringRecord,
    columns: &'a HashMap<String, usize>,
    line: u64,
}

impl RowView<'_> {
    /// 读取单元格（缺列或空白均视为 None）
    fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .get(column)
            .and_then(|idx| self.record.get(*idx))
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    fn required(&self, column: &str) -> ImportResult<String> {
        self.get(column).map(str::to_string).ok_or_else(|| ImportError::FieldMissing {
            line: self.line,
            field: column.to_string(),
        })
    }

    fn parse<T>(&self, column: &str) -> ImportResult<Option<T>>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(column)
            .map(|raw| {
                raw.parse::<T>().map_err(|e| ImportError::TypeConversionError {
                    line: self.line,
                    field: column.to_string(),
                    message: format!("{} ({})", e, raw),
                })
            })
            .transpose()
    }

    fn flag(&self, column: &str, default: bool) -> ImportResult<bool> {
        match self.get(column) {
            None => Ok(default),
            Some(raw) => parse_flag(raw).ok_or_else(|| ImportError::TypeConversionError {
                line: self.line,
                field: column.to_string(),
                message: format!("无法识别的布尔值: {}", raw),
            }),
        }
    }

    fn range_error(&self, column: &str, message: String) -> ImportError {
        ImportError::ValueRangeError {
            line: self.line,
            field: column.to_string(),
            message,
        }
    }
}

fn parse_provider(row: &RowView<'_>, now: DateTime<Utc>) -> ImportResult<Provider> {
    let provider_id = row.required("provider_id")?;
    let name = row.required("name")?;

    let specialties: Vec<String> = row
        .get("specialties")
        .map(|raw| {
            raw.split(SPECIALTY_SEPARATOR)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let latitude = row.parse::<f64>("latitude")?;
    let longitude = row.parse::<f64>("longitude")?;
    let location = match (latitude, longitude) {
        (None, None) => None,
        (lat, lon) => Some(
            GeoPoint::from_parts(lat, lon)
                .ok_or_else(|| row.range_error("latitude", format!("坐标非法: {:?}, {:?}", lat, lon)))?,
        ),
    };

    let radius_km = row.parse::<f64>("radius_km")?;
    if radius_km.is_some_and(|r| !r.is_finite() || r <= 0.0) {
        return Err(row.range_error("radius_km", "服务半径必须为正数".to_string()));
    }

    let rating = row.parse::<f64>("rating")?;
    if rating.is_some_and(|r| !(0.0..=5.0).contains(&r)) {
        return Err(row.range_error("rating", "评分必须在 0~5 之间".to_string()));
    }

    let review_count = row.parse::<i64>("review_count")?.unwrap_or(0);
    if review_count < 0 {
        return Err(row.range_error("review_count", "评价数不能为负".to_string()));
    }

    let daily_quota = row.parse::<i64>("daily_quota")?;
    let monthly_quota = row.parse::<i64>("monthly_quota")?;
    for (column, quota) in [("daily_quota", daily_quota), ("monthly_quota", monthly_quota)] {
        if quota.is_some_and(|q| q < 0) {
            return Err(row.range_error(column, "配额不能为负".to_string()));
        }
    }

    let last_active_at = match row.get("last_active_at") {
        None => None,
        Some(raw) => Some(parse_datetime(raw).ok_or_else(|| ImportError::TypeConversionError {
            line: row.line,
            field: "last_active_at".to_string(),
            message: format!("无法识别的时间: {}", raw),
        })?),
    };

    Ok(Provider {
        provider_id,
        name,
        specialties,
        department: row.get("department").map(|d| d.to_uppercase()),
        location,
        radius_km,
        is_verified: row.flag("is_verified", false)?,
        is_claimed: row.flag("is_claimed", false)?,
        is_active: row.flag("is_active", true)?,
        rating,
        review_count,
        // 反馈统计由引擎维护，upsert 时不会覆盖
        response_rate: 0.0,
        offers_received: 0,
        offers_responded: 0,
        last_active_at,
        daily_quota,
        monthly_quota,
        updated_at: now,
    })
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "oui" => Some(true),
        "0" | "false" | "no" | "n" | "non" => Some(false),
        _ => None,
    }
}

/// 支持 RFC3339、库内时间格式、纯日期
fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = parse_ts(raw) {
        return Some(ts);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
