// ==========================================
// 线索派单引擎 - 导入模块错误类型
// ==========================================
// 工具: thiserror 派生宏
// 行号从 1 开始（第 1 行为表头）
// ==========================================

use crate::repository::RepositoryError;
use thiserror::Error;

/// 导入模块错误类型
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== 文件相关错误 =====
    #[error("文件不存在: {0}")]
    FileNotFound(String),

    #[error("文件格式不支持: {0}（仅支持 .csv）")]
    UnsupportedFormat(String),

    #[error("CSV 解析失败: {0}")]
    CsvParseError(String),

    #[error("缺少必需列: {0}")]
    MissingColumn(String),

    // ===== 行级错误（跳过该行，继续导入） =====
    #[error("必填字段缺失 (行 {line}, 字段 {field})")]
    FieldMissing { line: u64, field: String },

    #[error("类型转换失败 (行 {line}, 字段 {field}): {message}")]
    TypeConversionError {
        line: u64,
        field: String,
        message: String,
    },

    #[error("数值范围错误 (行 {line}, 字段 {field}): {message}")]
    ValueRangeError {
        line: u64,
        field: String,
        message: String,
    },

    // ===== 数据库错误 =====
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::CsvParseError(err.to_string())
    }
}

impl ImportError {
    /// 行级错误（记录后跳过该行）
    pub fn is_row_error(&self) -> bool {
        matches!(
            self,
            ImportError::FieldMissing { .. }
                | ImportError::TypeConversionError { .. }
                | ImportError::ValueRangeError { .. }
        )
    }
}

pub type ImportResult<T> = Result<T, ImportError>;
