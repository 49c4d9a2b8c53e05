// ==========================================
// 线索派单引擎 - 事件发布
// ==========================================
// 职责: 事件已随业务写入同事务落库（dispatch_event 表），
//       提交后再交给发布者推送给通知/分析等下游
// 红线: 发布失败只记日志，不影响已提交的派单结果
// ==========================================

use crate::domain::dispatch_event::DispatchEvent;
use std::error::Error;
use std::sync::Arc;

// ==========================================
// 事件发布 Trait
// ==========================================

/// 派单事件发布者
pub trait DispatchEventPublisher: Send + Sync {
    /// 发布单个事件
    fn publish(&self, event: &DispatchEvent) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// 空操作事件发布者
///
/// 用于不需要下游推送的场景（如单元测试、一次性 CLI 命令）
#[derive(Debug, Clone, Default)]
pub struct NoOpEventPublisher;

impl DispatchEventPublisher for NoOpEventPublisher {
    fn publish(&self, event: &DispatchEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        tracing::debug!(
            event_type = event.event_type.as_str(),
            lead_id = ?event.lead_id,
            "NoOpEventPublisher: 跳过事件发布"
        );
        Ok(())
    }
}

/// 日志事件发布者（常驻服务默认使用）
#[derive(Debug, Clone, Default)]
pub struct LoggingEventPublisher;

impl DispatchEventPublisher for LoggingEventPublisher {
    fn publish(&self, event: &DispatchEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        tracing::info!(
            event_id = %event.event_id,
            event_type = event.event_type.as_str(),
            lead_id = ?event.lead_id,
            provider_id = ?event.provider_id,
            "派单事件"
        );
        Ok(())
    }
}

/// 依次发布一批事件，失败只记日志
///
/// # 返回
/// - 发布失败的事件数
pub fn publish_all(publisher: &Arc<dyn DispatchEventPublisher>, events: &[DispatchEvent]) -> usize {
    let mut failed = 0;
    for event in events {
        if let Err(e) = publisher.publish(event) {
            failed += 1;
            tracing::warn!(
                event_id = %event.event_id,
                event_type = event.event_type.as_str(),
                error = %e,
                "事件发布失败（已落库，不影响派单）"
            );
        }
    }
    failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::DispatchEventType;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyPublisher {
        calls: AtomicUsize,
    }

    impl DispatchEventPublisher for FlakyPublisher {
        fn publish(&self, _event: &DispatchEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n % 2 == 0 {
                Err("下游不可用".into())
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_publish_all_counts_failures_and_continues() {
        let flaky = Arc::new(FlakyPublisher {
            calls: AtomicUsize::new(0),
        });
        let publisher: Arc<dyn DispatchEventPublisher> = flaky.clone();
        let events: Vec<_> = (0..3)
            .map(|_| DispatchEvent::new(Some("L1"), DispatchEventType::Assigned, Utc::now()))
            .collect();

        assert_eq!(publish_all(&publisher, &events), 2);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);

        let noop: Arc<dyn DispatchEventPublisher> = Arc::new(NoOpEventPublisher);
        assert_eq!(publish_all(&noop, &events), 0);
    }
}
