// ==========================================
// 线索派单引擎 - 导入层
// ==========================================
// 职责: 外部数据导入（服务商名录 CSV）
// ==========================================

pub mod error;
pub mod provider_importer;

pub use error::{ImportError, ImportResult};
pub use provider_importer::{ImportReport, ProviderImporter, SkippedRow};
