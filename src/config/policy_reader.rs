// ==========================================
// 线索派单引擎 - 策略读取 Trait
// ==========================================
// 职责: 定义派单引擎所需的策略读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::config::error::PolicyError;
use crate::domain::policy::PolicySnapshot;
use async_trait::async_trait;

// ==========================================
// PolicyReader Trait
// ==========================================
// 实现者: PolicyStore（从 config_kv 表读取）
#[async_trait]
pub trait PolicyReader: Send + Sync {
    /// 获取当前生效的策略快照
    ///
    /// # 返回
    /// - Ok(PolicySnapshot): 内部一致的完整快照（缺失项取默认值）
    /// - Err(PolicyError): 存储不可读或存在非法值；调用方不得退化为猜测值
    async fn get_active_policy(&self) -> Result<PolicySnapshot, PolicyError>;
}
