// ==========================================
// 派单 API 端到端测试
// ==========================================
// 职责: 通过 AppState 装配验证 导入 → 配置 → 派单 → 回写 → 看板 全链路
// ==========================================


#[cfg(test)]
mod dispatch_api_test {
    use chrono::Utc;
    use lead_dispatch::api::ApiError;
    use lead_dispatch::app::AppState;
    use lead_dispatch::domain::types::{AssignmentStatus, DispatchEventType};
    use lead_dispatch::domain::OutcomeUpdate;
    use tempfile::NamedTempFile;

    use crate::test_helpers::{create_test_db, request};

    const PROVIDERS_CSV: &str = "\
provider_id,name,specialties,department,latitude,longitude,rating,review_count,is_verified,is_claimed
P1,Plomberie Martin,plombier;chauffagiste,75,48.8566,2.3522,4.9,120,oui,oui
P2,Dupont Services,plombier,75,48.8700,2.3600,4.2,35,oui,non
P3,Elec Bastille,electricien,75,48.8530,2.3690,4.7,80,oui,oui
";

    fn setup() -> (NamedTempFile, AppState) {
        let (temp_file, db_path) = create_test_db().unwrap();
        let state = AppState::new(db_path).unwrap();
        let report = state
            .provider_importer
            .import_reader(PROVIDERS_CSV.as_bytes(), Utc::now())
            .unwrap();
        assert_eq!(report.imported, 3);
        (temp_file, state)
    }

    #[tokio::test]
    async fn test_full_dispatch_flow() {
        let (_temp, state) = setup();

        let policy = state
            .policy_api
            .update_policy_json(r#"{"max_artisans_per_lead": 2, "require_same_department": true}"#, "ops")
            .unwrap();
        assert_eq!(policy.version, 1);
        assert_eq!(policy.max_artisans_per_lead, 2);

        let outcome = state.dispatch_api.dispatch(&request("L1")).await.unwrap();
        // 电工专业不匹配
        assert_eq!(outcome.provider_ids, vec!["P1".to_string(), "P2".to_string()]);

        let first = &outcome.assignments[0];
        let viewed = state
            .dispatch_api
            .record_outcome(&first.assignment_id, &OutcomeUpdate::Viewed, "portal")
            .unwrap();
        assert_eq!(viewed.status, AssignmentStatus::Viewed);

        let detail = state.dispatch_api.get_lead_detail("L1").unwrap();
        assert_eq!(detail.assignments.len(), 2);
        assert!(detail
            .events
            .iter()
            .any(|e| e.event_type == DispatchEventType::Viewed));

        let board = state.dispatch_api.dispatch_board().unwrap();
        assert_eq!(board.assignments.total, 2);
        assert_eq!(board.assignments.viewed, 1);
        assert_eq!(board.assignments.pending, 1);
        assert!((board.engagement_rate - 0.5).abs() < 1e-9);
        assert_eq!(board.provider_count, 3);

        let pending = state
            .dispatch_api
            .list_assignments_by_status(AssignmentStatus::Pending, 10, 0)
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].provider_id, "P2");

        let p1 = state.dispatch_api.list_provider_assignments("P1").unwrap();
        assert_eq!(p1.len(), 1);

        // 刚派出的指派未超时，巡检无变化
        let report = state.dispatch_api.sweep().await.unwrap();
        assert_eq!(report.expired, 0);
    }

    #[tokio::test]
    async fn test_error_mapping() {
        let (_temp, state) = setup();

        let mut bad = request("L1");
        bad.lead_id = "   ".to_string();
        let err = state.dispatch_api.dispatch(&bad).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));

        let err = state.dispatch_api.get_lead_detail("nope").unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));

        let err = state
            .dispatch_api
            .record_outcome("nope", &OutcomeUpdate::Viewed, "portal")
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));

        let err = state
            .dispatch_api
            .list_assignments_by_status(AssignmentStatus::Pending, 0, 0)
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));

        let err = state
            .policy_api
            .update_policy_json(r#"{"geo_radius_km": 0}"#, "ops")
            .unwrap_err();
        assert!(matches!(err, ApiError::PolicyValidation(_)));

        let err = state
            .policy_api
            .update_policy_json(r#"{"geo_radius_km": 20}"#, "  ")
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_invalid_transition_surfaces_as_api_error() {
        let (_temp, state) = setup();
        let outcome = state.dispatch_api.dispatch(&request("L1")).await.unwrap();
        let assignment_id = &outcome.assignments[0].assignment_id;

        let err = state
            .dispatch_api
            .record_outcome(assignment_id, &OutcomeUpdate::Responded { feedback: None }, "portal")
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidStateTransition { .. }));
    }
}
