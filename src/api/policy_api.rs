// ==========================================
// 线索派单引擎 - 派单策略 API
// ==========================================
// 职责: 策略查询与更新（运营后台）
// 红线: 更新只影响之后的派单，进行中的派单继续使用已读取的快照
// ==========================================

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;

use crate::api::error::{ApiError, ApiResult};
use crate::config::{PolicyStore, PolicyUpdate};
use crate::domain::policy::PolicySnapshot;

pub struct PolicyApi {
    store: Arc<PolicyStore>,
}

impl PolicyApi {
    pub fn new(store: Arc<PolicyStore>) -> Self {
        Self { store }
    }

    /// 当前生效策略
    pub fn get_policy(&self) -> ApiResult<PolicySnapshot> {
        Ok(self.store.load_snapshot()?)
    }

    /// 原始配置项（排查配置问题用）
    pub fn get_raw_entries(&self) -> ApiResult<BTreeMap<String, String>> {
        Ok(self.store.get_raw_entries()?)
    }

    /// 更新策略
    ///
    /// # 返回
    /// - Ok(PolicySnapshot): 更新后的快照（无实际变化时版本号不变）
    pub fn update_policy(&self, update: &PolicyUpdate, updated_by: &str) -> ApiResult<PolicySnapshot> {
        if updated_by.trim().is_empty() {
            return Err(ApiError::InvalidInput("updated_by 不能为空".to_string()));
        }
        if update.is_empty() {
            return Err(ApiError::InvalidInput("没有需要更新的配置项".to_string()));
        }
        Ok(self.store.update_policy(update, updated_by.trim(), Utc::now())?)
    }

    /// 从 JSON 对象更新策略（CLI / 运营后台）
    pub fn update_policy_json(&self, raw: &str, updated_by: &str) -> ApiResult<PolicySnapshot> {
        let update = PolicyUpdate::from_json_str(raw)?;
        self.update_policy(&update, updated_by)
    }
}
