// ==========================================
// 线索派单引擎 - 派单事件领域模型
// ==========================================
// 红线: 只追加，不修改，不删除
// 用途: 审计追踪（“为什么会这样派”），下游通知/分析消费
// ==========================================

use crate::domain::types::DispatchEventType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// 系统自身作为操作人
pub const SYSTEM_ACTOR: &str = "system";

// ==========================================
// DispatchEvent - 派单事件
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchEvent {
    pub event_id: String,
    pub lead_id: Option<String>,
    pub provider_id: Option<String>,
    pub event_type: DispatchEventType,
    pub actor: String,
    pub metadata: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
}

impl DispatchEvent {
    /// 创建新的派单事件
    ///
    /// # 参数
    /// - `lead_id`: 关联线索 (策略变更等系统事件可为 None)
    /// - `event_type`: 事件类型
    /// - `created_at`: 事件时间（由调用方传入，保证同一轮派单时间一致）
    pub fn new(lead_id: Option<&str>, event_type: DispatchEventType, created_at: DateTime<Utc>) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            lead_id: lead_id.map(str::to_string),
            provider_id: None,
            event_type,
            actor: SYSTEM_ACTOR.to_string(),
            metadata: None,
            created_at,
        }
    }

    /// 设置关联服务商
    pub fn with_provider(mut self, provider_id: &str) -> Self {
        self.provider_id = Some(provider_id.to_string());
        self
    }

    /// 设置操作人
    pub fn with_actor(mut self, actor: &str) -> Self {
        self.actor = actor.to_string();
        self
    }

    /// 设置元数据 (转换为JSON)
    pub fn with_metadata<T: Serialize>(mut self, metadata: &T) -> Self {
        self.metadata = serde_json::to_value(metadata).ok();
        self
    }
}
