// ==========================================
// 结果回写与反馈闭环测试
// ==========================================
// 职责: 验证指派状态流转、计费幂等、线索状态联动、响应率反哺打分
// ==========================================


#[cfg(test)]
mod outcome_feedback_test {
    use chrono::Duration;
    use lead_dispatch::config::policy_keys;
    use lead_dispatch::domain::types::{AssignmentStatus, DispatchEventType, LeadStatus};
    use lead_dispatch::domain::{Assignment, OutcomeUpdate};
    use lead_dispatch::engine::DispatchError;

    use crate::test_helpers::{provider_at, request, t0, TestEnv};

    /// 派出 L1 给 P1、P2，返回 (P1 指派, P2 指派)
    async fn dispatch_pair(env: &TestEnv) -> (Assignment, Assignment) {
        env.set_policy(&[
            (policy_keys::MAX_ARTISANS_PER_LEAD, "2"),
            (policy_keys::COOLDOWN_MINUTES, "0"),
        ]);
        env.add_provider(&provider_at("P1", 0.0, 5.0, 200));
        env.add_provider(&provider_at("P2", 0.03, 4.0, 40));

        let outcome = env.orchestrator.dispatch(&request("L1"), t0()).await.unwrap();
        assert_eq!(outcome.assignments.len(), 2);
        let mut it = outcome.assignments.into_iter();
        (it.next().unwrap(), it.next().unwrap())
    }

    /// 先查看再回写（响应/拒绝必须发生在查看之后）
    fn view_then(env: &TestEnv, assignment_id: &str, update: OutcomeUpdate) {
        env.tracker
            .record(assignment_id, &OutcomeUpdate::Viewed, "portal", t0())
            .unwrap();
        env.tracker.record(assignment_id, &update, "portal", t0()).unwrap();
    }

    #[tokio::test]
    async fn test_viewed_then_responded_updates_lead_and_provider() {
        let env = TestEnv::new();
        let (a1, _) = dispatch_pair(&env).await;

        let delivered = env
            .tracker
            .record(&a1.assignment_id, &OutcomeUpdate::Delivered, "notifier", t0())
            .unwrap();
        assert!(delivered.applied);
        assert_eq!(delivered.status, AssignmentStatus::Pending);
        assert_eq!(delivered.outcome.sent_at, Some(t0()));

        let viewed = env
            .tracker
            .record(&a1.assignment_id, &OutcomeUpdate::Viewed, "portal", t0() + Duration::hours(1))
            .unwrap();
        assert_eq!(viewed.status, AssignmentStatus::Viewed);

        let responded_at = t0() + Duration::hours(2);
        let responded = env
            .tracker
            .record(
                &a1.assignment_id,
                &OutcomeUpdate::Responded {
                    feedback: Some("devis envoyé".to_string()),
                },
                "portal",
                responded_at,
            )
            .unwrap();
        assert!(responded.applied);
        assert_eq!(responded.status, AssignmentStatus::Responded);
        assert_eq!(responded.outcome.responded_at, Some(responded_at));
        assert_eq!(responded.outcome.feedback.as_deref(), Some("devis envoyé"));

        let stored = env.repos.ledger.find_by_id(&a1.assignment_id).unwrap().unwrap();
        assert_eq!(stored.status, AssignmentStatus::Responded);
        assert_eq!(stored.viewed_at, Some(t0() + Duration::hours(1)));

        // 首次响应把线索推进到 contacted
        let lead = env.repos.lead_repo.find_by_id("L1").unwrap().unwrap();
        assert_eq!(lead.status, LeadStatus::Contacted);

        let p1 = env.repos.provider_repo.find_by_id("P1").unwrap().unwrap();
        assert_eq!(p1.offers_received, 1);
        assert_eq!(p1.offers_responded, 1);
        assert!((p1.response_rate - 1.0).abs() < 1e-9);

        assert_eq!(env.stored_events("L1", DispatchEventType::Viewed), 1);
        assert_eq!(env.stored_events("L1", DispatchEventType::Responded), 1);
        assert_eq!(env.publisher.count(DispatchEventType::Responded), 1);
    }

    #[tokio::test]
    async fn test_repeated_outcome_is_noop() {
        let env = TestEnv::new();
        let (a1, _) = dispatch_pair(&env).await;
        let update = OutcomeUpdate::Responded { feedback: None };

        view_then(&env, &a1.assignment_id, update.clone());
        let again = env
            .tracker
            .record(&a1.assignment_id, &update, "portal", t0() + Duration::minutes(5))
            .unwrap();
        assert!(!again.applied);

        // 响应只计一次
        let p1 = env.repos.provider_repo.find_by_id("P1").unwrap().unwrap();
        assert_eq!(p1.offers_responded, 1);
        assert_eq!(env.stored_events("L1", DispatchEventType::Responded), 1);
    }

    #[tokio::test]
    async fn test_invalid_transitions_rejected() {
        let env = TestEnv::new();
        let (a1, a2) = dispatch_pair(&env).await;

        // 未查看不能直接响应
        let err = env
            .tracker
            .record(&a1.assignment_id, &OutcomeUpdate::Responded { feedback: None }, "portal", t0())
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidStateTransition { .. }));

        view_then(
            &env,
            &a2.assignment_id,
            OutcomeUpdate::Declined {
                reason: Some("trop loin".to_string()),
            },
        );

        // 已拒绝的不能再响应
        let err = env
            .tracker
            .record(&a2.assignment_id, &OutcomeUpdate::Responded { feedback: None }, "portal", t0())
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidStateTransition { .. }));

        // 未响应不能计费
        let err = env
            .tracker
            .record(&a1.assignment_id, &OutcomeUpdate::Billed { amount: 25.0 }, "billing", t0())
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidStateTransition { .. }));

        let err = env
            .tracker
            .record("missing", &OutcomeUpdate::Viewed, "portal", t0())
            .unwrap_err();
        assert!(matches!(err, DispatchError::AssignmentNotFound(_)));

        // 拒绝不影响响应率分子
        let p2 = env.repos.provider_repo.find_by_id("P2").unwrap().unwrap();
        assert_eq!(p2.offers_responded, 0);
        assert_eq!(p2.response_rate, 0.0);
    }

    #[tokio::test]
    async fn test_billing_is_idempotent_for_same_amount() {
        let env = TestEnv::new();
        let (a1, _) = dispatch_pair(&env).await;
        view_then(&env, &a1.assignment_id, OutcomeUpdate::Responded { feedback: None });

        let billed = env
            .tracker
            .record(&a1.assignment_id, &OutcomeUpdate::Billed { amount: 25.0 }, "billing", t0())
            .unwrap();
        assert!(billed.applied);
        assert!(billed.outcome.is_billed);
        assert_eq!(billed.outcome.billed_amount, Some(25.0));
        // 计费不改变指派状态
        assert_eq!(billed.status, AssignmentStatus::Responded);

        let again = env
            .tracker
            .record(&a1.assignment_id, &OutcomeUpdate::Billed { amount: 25.0 }, "billing", t0())
            .unwrap();
        assert!(!again.applied);

        let err = env
            .tracker
            .record(&a1.assignment_id, &OutcomeUpdate::Billed { amount: 40.0 }, "billing", t0())
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidStateTransition { .. }));

        let err = env
            .tracker
            .record(&a1.assignment_id, &OutcomeUpdate::Billed { amount: -1.0 }, "billing", t0())
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidInput(_)));

        let outcome = env.repos.ledger.find_outcome(&a1.assignment_id).unwrap().unwrap();
        assert_eq!(outcome.billed_amount, Some(25.0));
        assert_eq!(env.stored_events("L1", DispatchEventType::Billed), 1);
    }

    #[tokio::test]
    async fn test_lead_status_flow() {
        let env = TestEnv::new();
        dispatch_pair(&env).await;

        assert!(env
            .tracker
            .update_lead_status("L1", LeadStatus::Contacted, "crm", t0())
            .unwrap());
        // 重复设置同一状态不报错
        assert!(!env
            .tracker
            .update_lead_status("L1", LeadStatus::Contacted, "crm", t0())
            .unwrap());
        // 不能回退
        let err = env
            .tracker
            .update_lead_status("L1", LeadStatus::New, "crm", t0())
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidStateTransition { .. }));

        assert!(env
            .tracker
            .update_lead_status("L1", LeadStatus::Converted, "crm", t0())
            .unwrap());
        assert_eq!(env.stored_events("L1", DispatchEventType::LeadStatusChanged), 2);

        // 已成交线索不再派单
        let outcome = env
            .orchestrator
            .redispatch("L1", t0() + Duration::days(3))
            .await
            .unwrap();
        assert_eq!(outcome.skipped.as_deref(), Some("lead_closed"));
    }

    #[tokio::test]
    async fn test_response_rate_feeds_back_into_ranking() {
        let env = TestEnv::new();
        env.set_policy(&[
            (policy_keys::MAX_ARTISANS_PER_LEAD, "2"),
            (policy_keys::COOLDOWN_MINUTES, "0"),
        ]);
        // 两个条件完全相同的服务商
        env.add_provider(&provider_at("PA", 0.01, 4.5, 50));
        env.add_provider(&provider_at("PB", 0.01, 4.5, 50));

        let first = env.orchestrator.dispatch(&request("L1"), t0()).await.unwrap();
        for a in &first.assignments {
            let update = if a.provider_id == "PB" {
                OutcomeUpdate::Responded { feedback: None }
            } else {
                OutcomeUpdate::Declined { reason: None }
            };
            view_then(&env, &a.assignment_id, update);
        }

        // 只派一个名额时，响应率高的 PB 胜出
        env.set_policy(&[(policy_keys::MAX_ARTISANS_PER_LEAD, "1")]);
        let second = env
            .orchestrator
            .dispatch(&request("L2"), t0() + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(second.provider_ids, vec!["PB".to_string()]);
    }
}
