// ==========================================
// 线索派单引擎 - 线索级互斥锁
// ==========================================
// 同一线索的 过滤→打分→选择→落库 串行执行，不同线索完全并行
// 跨进程的兜底是账本的部分唯一索引 + IMMEDIATE 事务
// ==========================================

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct LeadLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// 持有期间独占某线索；释放时顺带清理无人等待的锁条目
pub struct LeadLockGuard<'a> {
    owner: &'a LeadLocks,
    lead_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl LeadLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取线索锁（异步等待）
    pub async fn acquire(&self, lead_id: &str) -> LeadLockGuard<'_> {
        let lock = {
            let mut map = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            map.entry(lead_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        let guard = lock.lock_owned().await;
        LeadLockGuard {
            owner: self,
            lead_id: lead_id.to_string(),
            guard: Some(guard),
        }
    }

    /// 当前登记的锁条目数
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .map(|map| map.len())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for LeadLockGuard<'_> {
    fn drop(&mut self) {
        // 先释放互斥锁，再判断是否还有其他持有者
        drop(self.guard.take());

        let mut map = self
            .owner
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(lock) = map.get(&self.lead_id) {
            // 只剩 map 自身的引用 → 无人持有/等待
            if Arc::strong_count(lock) == 1 {
                map.remove(&self.lead_id);
            }
        }
    }
}
