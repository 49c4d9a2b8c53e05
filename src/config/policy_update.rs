// ==========================================
// 线索派单引擎 - 策略变更请求
// ==========================================
// 运营侧提交的变更以 key → 原始值 形式收集，
// 取值合法性在 PolicyStore::update_policy 中与现有配置合并后整体校验
// ==========================================

use crate::config::error::PolicyError;
use crate::config::policy_store::is_tunable_key;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyUpdate {
    entries: BTreeMap<String, String>,
}

impl PolicyUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加一项变更（key 必须是可调策略项）
    pub fn with(mut self, key: &str, value: impl ToString) -> Result<Self, PolicyError> {
        self.set(key, value)?;
        Ok(self)
    }

    pub fn set(&mut self, key: &str, value: impl ToString) -> Result<(), PolicyError> {
        let key = key.trim();
        if !is_tunable_key(key) {
            return Err(PolicyError::UnknownKey(key.to_string()));
        }
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// 从 JSON 对象解析（如 `{"max_artisans_per_lead": 4, "prefer_claimed": false}`）
    pub fn from_json_str(raw: &str) -> Result<Self, PolicyError> {
        let value: JsonValue = serde_json::from_str(raw).map_err(|e| PolicyError::InvalidValue {
            key: "<json>".to_string(),
            value: raw.to_string(),
            reason: e.to_string(),
        })?;

        let object = value.as_object().ok_or_else(|| PolicyError::InvalidValue {
            key: "<json>".to_string(),
            value: raw.to_string(),
            reason: "需要 JSON 对象".to_string(),
        })?;

        let mut update = Self::new();
        for (key, v) in object {
            let text = match v {
                JsonValue::String(s) => s.clone(),
                JsonValue::Bool(_) | JsonValue::Number(_) => v.to_string(),
                _ => {
                    return Err(PolicyError::InvalidValue {
                        key: key.clone(),
                        value: v.to_string(),
                        reason: "只支持字符串/数字/布尔".to_string(),
                    })
                }
            };
            update.set(key, text)?;
        }
        Ok(update)
    }

    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
