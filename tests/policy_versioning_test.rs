// ==========================================
// 派单策略版本测试
// ==========================================
// 职责: 验证策略更新的版本化、校验，以及派单对策略快照的隔离
// ==========================================


#[cfg(test)]
mod policy_versioning_test {
    use async_trait::async_trait;
    use chrono::Duration;
    use lead_dispatch::config::{policy_keys, PolicyError, PolicyReader, PolicyStore, PolicyUpdate};
    use lead_dispatch::domain::types::DispatchEventType;
    use lead_dispatch::domain::PolicySnapshot;
    use lead_dispatch::engine::{DispatchOrchestrator, LeadLocks, NoOpEventPublisher};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::test_helpers::{provider_at, request, t0, TestEnv};

    /// 统计读取次数的策略读取器
    struct CountingReader {
        inner: Arc<PolicyStore>,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl PolicyReader for CountingReader {
        async fn get_active_policy(&self) -> Result<PolicySnapshot, PolicyError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get_active_policy().await
        }
    }

    #[test]
    fn test_uninitialized_policy_uses_defaults() {
        let env = TestEnv::new();
        let snapshot = env.policy_store.load_snapshot().unwrap();
        assert_eq!(snapshot.version, 0);
        assert_eq!(snapshot, PolicySnapshot::default());
    }

    #[test]
    fn test_update_bumps_version_only_on_change() {
        let env = TestEnv::new();

        let v1 = env.set_policy(&[(policy_keys::GEO_RADIUS_KM, "30")]);
        assert_eq!(v1.version, 1);
        assert_eq!(v1.geo_radius_km, 30.0);
        assert_eq!(v1.updated_by.as_deref(), Some("test"));

        // 相同取值不产生新版本
        let same = env.set_policy(&[(policy_keys::GEO_RADIUS_KM, "30")]);
        assert_eq!(same.version, 1);

        let v2 = env.set_policy(&[(policy_keys::COOLDOWN_MINUTES, "60")]);
        assert_eq!(v2.version, 2);
        assert_eq!(v2.geo_radius_km, 30.0);

        let events = env.repos.event_repo.count_by_type(DispatchEventType::PolicyUpdated).unwrap();
        assert_eq!(events, 2);
    }

    #[test]
    fn test_invalid_update_rejected_atomically() {
        let env = TestEnv::new();
        env.set_policy(&[(policy_keys::GEO_RADIUS_KM, "30")]);

        let mut update = PolicyUpdate::new();
        update.set(policy_keys::COOLDOWN_MINUTES, "15").unwrap();
        update.set(policy_keys::MAX_ARTISANS_PER_LEAD, "0").unwrap();
        let err = env.policy_store.update_policy(&update, "ops", t0()).unwrap_err();
        assert!(matches!(err, PolicyError::OutOfRange { .. }));

        // 整批不生效
        let snapshot = env.policy_store.load_snapshot().unwrap();
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.cooldown_minutes, PolicySnapshot::default().cooldown_minutes);
    }

    #[tokio::test]
    async fn test_assignments_record_policy_version_of_their_run() {
        let env = TestEnv::new();
        env.set_policy(&[(policy_keys::MAX_ARTISANS_PER_LEAD, "3")]);
        for (i, id) in ["P1", "P2", "P3"].iter().enumerate() {
            env.add_provider(&provider_at(id, i as f64 * 0.02, 4.5, 50));
        }

        let first = env.orchestrator.dispatch(&request("L1"), t0()).await.unwrap();
        assert_eq!(first.provider_ids.len(), 3);
        assert_eq!(first.policy_version, 1);

        // 新策略只影响之后的派单
        env.set_policy(&[
            (policy_keys::MAX_ARTISANS_PER_LEAD, "1"),
            (policy_keys::COOLDOWN_MINUTES, "0"),
        ]);
        let second = env
            .orchestrator
            .dispatch(&request("L2"), t0() + Duration::minutes(10))
            .await
            .unwrap();
        assert_eq!(second.provider_ids.len(), 1);
        assert_eq!(second.policy_version, 2);

        let l1 = env.repos.ledger.find_by_lead("L1").unwrap();
        assert_eq!(l1.len(), 3);
        assert!(l1.iter().all(|a| a.policy_version == 1));
        assert!(env
            .repos
            .ledger
            .find_by_lead("L2")
            .unwrap()
            .iter()
            .all(|a| a.policy_version == 2));
    }

    #[tokio::test]
    async fn test_policy_read_once_per_run() {
        let env = TestEnv::new();
        env.add_provider(&provider_at("P1", 0.0, 4.5, 50));

        let reader = Arc::new(CountingReader {
            inner: env.policy_store.clone(),
            reads: AtomicUsize::new(0),
        });
        let orchestrator = DispatchOrchestrator::new(
            reader.clone(),
            env.repos.clone(),
            Arc::new(LeadLocks::new()),
            Arc::new(NoOpEventPublisher),
        );

        orchestrator.dispatch(&request("L1"), t0()).await.unwrap();
        assert_eq!(reader.reads.load(Ordering::SeqCst), 1);

        orchestrator.redispatch("L1", t0() + Duration::hours(1)).await.unwrap();
        assert_eq!(reader.reads.load(Ordering::SeqCst), 2);
    }
}
