use super::{AssignmentLedger, LedgerCandidate, OutcomeWrite};
use crate::domain::assignment::ContactOutcome;
use crate::domain::dispatch_event::DispatchEvent;
use crate::domain::lead::{GeoPoint, Lead};
use crate::domain::policy::PolicySnapshot;
use crate::domain::provider::Provider;
use crate::domain::types::{AssignmentStatus, DispatchEventType, LeadSource, LeadStatus, Urgency};
use crate::repository::{DispatchEventRepository, LeadRepository, ProviderRepository};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap()
}

fn setup_test_db() -> Arc<Mutex<Connection>> {
    let conn = Connection::open_in_memory().unwrap();
    crate::db::configure_sqlite_connection(&conn).unwrap();
    crate::db::init_schema(&conn).unwrap();
    Arc::new(Mutex::new(conn))
}

fn seed_lead(conn: &Arc<Mutex<Connection>>, lead_id: &str) {
    let lead = Lead {
        lead_id: lead_id.to_string(),
        source: LeadSource::Primary,
        service_name: "plombier".to_string(),
        urgency: Urgency::Medium,
        location: GeoPoint::new(48.85, 2.35),
        postal_code: Some("75004".to_string()),
        department: Some("75".to_string()),
        city: None,
        status: LeadStatus::New,
        dispatch_round: 0,
        last_dispatch_at: None,
        created_at: t0(),
        updated_at: t0(),
    };
    LeadRepository::new(conn.clone()).insert_if_absent(&lead).unwrap();
}

fn seed_provider(conn: &Arc<Mutex<Connection>>, provider_id: &str, daily_quota: Option<i64>) {
    let provider = Provider {
        provider_id: provider_id.to_string(),
        name: provider_id.to_string(),
        specialties: vec!["plombier".to_string()],
        department: Some("75".to_string()),
        location: GeoPoint::new(48.86, 2.34),
        radius_km: None,
        is_verified: false,
        is_claimed: false,
        is_active: true,
        rating: Some(4.0),
        review_count: 3,
        response_rate: 0.0,
        offers_received: 0,
        offers_responded: 0,
        last_active_at: Some(t0()),
        daily_quota,
        monthly_quota: None,
        updated_at: t0(),
    };
    ProviderRepository::new(conn.clone()).upsert_profile(&provider).unwrap();
}

fn candidate(provider_id: &str, score: f64) -> LedgerCandidate {
    LedgerCandidate {
        provider_id: provider_id.to_string(),
        score,
        distance_km: Some(1.2),
        breakdown: None,
    }
}

fn policy(max: i64, cooldown_minutes: i64) -> PolicySnapshot {
    PolicySnapshot {
        version: 7,
        max_artisans_per_lead: max,
        cooldown_minutes,
        ..PolicySnapshot::default()
    }
}

#[test]
fn test_persist_fills_free_slots_with_contiguous_ranks() {
    let conn = setup_test_db();
    seed_lead(&conn, "L1");
    for p in ["P1", "P2", "P3"] {
        seed_provider(&conn, p, None);
    }
    let ledger = AssignmentLedger::new(conn.clone());

    let ranked = vec![candidate("P2", 0.9), candidate("P1", 0.8), candidate("P3", 0.1)];
    let report = ledger.persist("L1", &ranked, &policy(2, 0), vec![], t0()).unwrap();

    assert_eq!(report.dispatch_round, 1);
    assert_eq!(report.free_slots, 2);
    assert_eq!(report.assignments.len(), 2);
    assert_eq!(report.assignments[0].provider_id, "P2");
    assert_eq!(report.assignments[0].rank_position, 0);
    assert_eq!(report.assignments[1].provider_id, "P1");
    assert_eq!(report.assignments[1].rank_position, 1);
    assert!(report.assignments.iter().all(|a| a.assigned_at == t0() && a.policy_version == 7));

    assert_eq!(ledger.count_active_for_lead("L1").unwrap(), 2);
    assert!(ledger.find_outcome(&report.assignments[0].assignment_id).unwrap().is_some());

    let p2 = ProviderRepository::new(conn.clone()).find_by_id("P2").unwrap().unwrap();
    assert_eq!(p2.offers_received, 1);

    let events = DispatchEventRepository::new(conn.clone()).find_by_lead("L1").unwrap();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.event_type == DispatchEventType::Assigned));
}

#[test]
fn test_persist_drops_duplicate_and_continues_with_next() {
    let conn = setup_test_db();
    seed_lead(&conn, "L1");
    for p in ["P1", "P2", "P3"] {
        seed_provider(&conn, p, None);
    }
    let ledger = AssignmentLedger::new(conn.clone());

    ledger.persist("L1", &[candidate("P1", 0.9)], &policy(3, 0), vec![], t0()).unwrap();

    // 第二轮：P1 已有活跃指派 → 冲突顺延
    let later = t0() + Duration::minutes(1);
    let ranked = vec![candidate("P1", 0.9), candidate("P2", 0.8), candidate("P3", 0.7)];
    let report = ledger.persist("L1", &ranked, &policy(3, 0), vec![], later).unwrap();

    assert_eq!(report.dispatch_round, 2);
    assert_eq!(report.free_slots, 2);
    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].provider_id, "P1");
    assert_eq!(report.conflicts[0].reason, "duplicate");
    let ids: Vec<_> = report.assignments.iter().map(|a| a.provider_id.as_str()).collect();
    assert_eq!(ids, vec!["P2", "P3"]);
    assert_eq!(report.assignments[0].rank_position, 0);
    assert_eq!(ledger.count_active_for_lead("L1").unwrap(), 3);
}

#[test]
fn test_persist_rechecks_quota_and_cooldown() {
    let conn = setup_test_db();
    seed_lead(&conn, "L1");
    seed_lead(&conn, "L2");
    seed_provider(&conn, "P1", Some(1));
    seed_provider(&conn, "P2", None);
    seed_provider(&conn, "P3", None);
    let ledger = AssignmentLedger::new(conn.clone());

    ledger
        .persist("L1", &[candidate("P1", 0.5), candidate("P2", 0.4)], &policy(2, 30), vec![], t0())
        .unwrap();

    // 10 分钟后：P1 日配额已满，P2 冷却未过，P3 可用
    let later = t0() + Duration::minutes(10);
    let ranked = vec![candidate("P1", 0.9), candidate("P2", 0.8), candidate("P3", 0.1)];
    let report = ledger.persist("L2", &ranked, &policy(3, 30), vec![], later).unwrap();

    let reasons: Vec<_> = report.conflicts.iter().map(|c| c.reason.as_str()).collect();
    assert_eq!(reasons, vec!["daily_quota", "cooldown"]);
    assert_eq!(report.assignments.len(), 1);
    assert_eq!(report.assignments[0].provider_id, "P3");
}

#[test]
fn test_persist_with_no_free_slot_still_records_attempt() {
    let conn = setup_test_db();
    seed_lead(&conn, "L1");
    seed_provider(&conn, "P1", None);
    seed_provider(&conn, "P2", None);
    let ledger = AssignmentLedger::new(conn.clone());

    ledger.persist("L1", &[candidate("P1", 0.5)], &policy(1, 0), vec![], t0()).unwrap();
    let report = ledger
        .persist("L1", &[candidate("P2", 0.5)], &policy(1, 0), vec![], t0() + Duration::hours(1))
        .unwrap();

    assert_eq!(report.free_slots, 0);
    assert!(report.assignments.is_empty());
    assert_eq!(report.dispatch_round, 2);
    assert_eq!(ledger.count_active_for_lead("L1").unwrap(), 1);
}

#[test]
fn test_expire_if_is_conditional() {
    let conn = setup_test_db();
    seed_lead(&conn, "L1");
    seed_provider(&conn, "P1", None);
    let ledger = AssignmentLedger::new(conn.clone());
    let report = ledger.persist("L1", &[candidate("P1", 0.5)], &policy(3, 0), vec![], t0()).unwrap();
    let id = report.assignments[0].assignment_id.clone();

    let now = t0() + Duration::hours(49);
    let event = DispatchEvent::new(Some("L1"), DispatchEventType::Expired, now).with_provider("P1");
    assert!(ledger.expire_if(&id, AssignmentStatus::Pending, &event, now).unwrap());

    let again = DispatchEvent::new(Some("L1"), DispatchEventType::Expired, now).with_provider("P1");
    assert!(!ledger.expire_if(&id, AssignmentStatus::Pending, &again, now).unwrap());

    let stored = ledger.find_by_id(&id).unwrap().unwrap();
    assert_eq!(stored.status, AssignmentStatus::Expired);
    assert_eq!(stored.resolved_at, Some(now));
    assert_eq!(
        DispatchEventRepository::new(conn)
            .count_by_type(DispatchEventType::Expired)
            .unwrap(),
        1
    );
}

#[test]
fn test_apply_outcome_rejects_stale_expected_status() {
    let conn = setup_test_db();
    seed_lead(&conn, "L1");
    seed_provider(&conn, "P1", None);
    let ledger = AssignmentLedger::new(conn.clone());
    let report = ledger.persist("L1", &[candidate("P1", 0.5)], &policy(3, 0), vec![], t0()).unwrap();
    let id = report.assignments[0].assignment_id.clone();
    let now = t0() + Duration::minutes(5);

    let mut outcome = ContactOutcome::empty(&id, now);
    outcome.viewed_at = Some(now);
    let write = OutcomeWrite {
        assignment_id: id.clone(),
        lead_id: "L1".to_string(),
        provider_id: "P1".to_string(),
        expected_status: AssignmentStatus::Pending,
        next_status: AssignmentStatus::Viewed,
        expected_billed: false,
        outcome,
        count_response: false,
        lead_transition: None,
        events: vec![DispatchEvent::new(Some("L1"), DispatchEventType::Viewed, now)],
    };

    assert!(ledger.apply_outcome(&write, now).unwrap());
    // 同一写入重放：状态已不是 pending
    assert!(!ledger.apply_outcome(&write, now).unwrap());

    let stored = ledger.find_by_id(&id).unwrap().unwrap();
    assert_eq!(stored.status, AssignmentStatus::Viewed);
    assert_eq!(stored.viewed_at, Some(now));
    assert_eq!(ledger.find_outcome(&id).unwrap().unwrap().viewed_at, Some(now));

    let stats = ledger.status_counts().unwrap();
    assert_eq!(stats.viewed, 1);
    assert_eq!(stats.total, 1);

    let stale = ledger.list_stale(now + Duration::hours(73), 48, 72).unwrap();
    assert_eq!(stale.len(), 1);
    assert!(ledger.list_stale(now + Duration::hours(71), 48, 72).unwrap().is_empty());
}
