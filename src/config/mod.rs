// ==========================================
// 线索派单引擎 - 配置层
// ==========================================
// 职责: 派单策略的读取、校验与版本化更新
// 存储: config_kv 表
// ==========================================

pub mod error;
pub mod policy_reader;
pub mod policy_store;
pub mod policy_update;

pub use error::PolicyError;
pub use policy_reader::PolicyReader;
pub use policy_store::{policy_keys, PolicyStore};
pub use policy_update::PolicyUpdate;
