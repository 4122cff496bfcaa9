//! PgStore tests against a real database.
//!
//! **Requirements:**
//! - PostgreSQL reachable at DATABASE_URL (migrations are applied on connect)
//! - Skipped with a notice when DATABASE_URL is unset

use approvals::errors::WorkflowError;
use approvals::models::approval::{Decision, RequestStatus};
use approvals::models::live::{NewTimeLog, TimeLog, UserRecord};
use approvals::models::mutation::{AvailabilityStatus, MutationKind};
use approvals::store::{ChangeStore, PgStore};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::json;

async fn store() -> Option<PgStore> {
    let url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("DATABASE_URL not set, skipping Postgres store test");
            return None;
        }
    };
    let store = PgStore::connect(&url).await.unwrap();
    store.migrate().await.unwrap();
    Some(store)
}

/// A fresh user per test so runs never collide on the pending indexes.
async fn fresh_user(store: &PgStore, role: &str) -> i64 {
    let id = (uuid::Uuid::new_v4().as_u128() % 1_000_000_000) as i64 + 1_000_000;
    store
        .upsert_user(&UserRecord {
            id,
            username: format!("user{}", id),
            full_name: format!("User {}", id),
            role: role.into(),
            is_active: true,
        })
        .await
        .unwrap();
    id
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
}

async fn seed_log(store: &PgStore, user_id: i64) -> TimeLog {
    store
        .insert_time_log(&NewTimeLog {
            user_id,
            project_id: 3,
            page_id: Some(5),
            environment_id: None,
            issue_id: None,
            phase_id: None,
            generic_category_id: None,
            task_type: "page_testing".into(),
            testing_type: None,
            log_date: day(),
            hours_spent: Decimal::from(8),
            description: "first pass".into(),
            is_utilized: true,
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_pg_stage_and_approve_edit() {
    let Some(store) = store().await else { return };
    let user = fresh_user(&store, "qa").await;
    let admin = fresh_user(&store, "admin").await;
    let log = seed_log(&store, user).await;
    let log_id = log.id;

    let edit: MutationKind = serde_json::from_value(json!({
        "kind": "log_edit",
        "log_id": log_id,
        "patch": {"hours_spent": 6.5, "description": "retest"}
    }))
    .unwrap();
    let staged = store.stage(user, day(), edit.clone(), "fix").await.unwrap();

    let err = store.stage(user, day(), edit, "again").await.unwrap_err();
    assert!(matches!(err, WorkflowError::DuplicatePending));

    let decided = store
        .apply_decision(staged.request_id, admin, Decision::Approve, Some("ok"))
        .await
        .unwrap();
    assert_eq!(decided.request.status, RequestStatus::Approved);
    assert_eq!(decided.mutations, 1);

    let live = store.get_time_log(log_id).await.unwrap().unwrap();
    assert_eq!(live.hours_spent, Decimal::new(65, 1));
    assert_eq!(live.description, "retest");
    let expected = TimeLog {
        hours_spent: live.hours_spent,
        description: live.description.clone(),
        updated_at: live.updated_at,
        ..log
    };
    assert_eq!(live, expected);

    let again = store
        .apply_decision(staged.request_id, admin, Decision::Reject, None)
        .await
        .unwrap_err();
    assert!(matches!(again, WorkflowError::AlreadyDecided));
}

#[tokio::test]
async fn test_pg_reject_status_change_keeps_live_state() {
    let Some(store) = store().await else { return };
    let user = fresh_user(&store, "qa").await;
    let admin = fresh_user(&store, "admin").await;
    store
        .upsert_daily_status(user, day(), AvailabilityStatus::Working, None)
        .await
        .unwrap();

    let change: MutationKind = serde_json::from_value(json!({
        "kind": "status_change",
        "status": "on_leave",
        "notes": "medical"
    }))
    .unwrap();
    let staged = store.stage(user, day(), change, "leave").await.unwrap();
    assert_eq!(store.pending_mutations_for(user, day()).await.unwrap().len(), 1);

    store
        .apply_decision(staged.request_id, admin, Decision::Reject, None)
        .await
        .unwrap();
    let status = store.get_daily_status(user, day()).await.unwrap().unwrap();
    assert_eq!(status.status, AvailabilityStatus::Working);
    assert!(store.pending_mutations_for(user, day()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_pg_foreign_log_is_not_found() {
    let Some(store) = store().await else { return };
    let owner = fresh_user(&store, "qa").await;
    let other = fresh_user(&store, "qa").await;
    let log_id = seed_log(&store, owner).await.id;

    let delete: MutationKind =
        serde_json::from_value(json!({"kind": "log_delete", "log_id": log_id})).unwrap();
    let err = store.stage(other, day(), delete, "").await.unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound));
}

#[tokio::test]
async fn test_pg_concurrent_approve_and_reject_only_one_wins() {
    let Some(store) = store().await else { return };
    let user = fresh_user(&store, "qa").await;
    let admin = fresh_user(&store, "admin").await;
    let log_id = seed_log(&store, user).await.id;

    let delete: MutationKind =
        serde_json::from_value(json!({"kind": "log_delete", "log_id": log_id})).unwrap();
    let staged = store.stage(user, day(), delete, "dupe").await.unwrap();
    let id = staged.request_id;

    // Separate pool connections, so both transactions really race on the row lock.
    let (approve, reject) = tokio::join!(
        store.apply_decision(id, admin, Decision::Approve, None),
        store.apply_decision(id, admin, Decision::Reject, None),
    );

    let outcomes = [approve, reject];
    let winners: Vec<_> = outcomes.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(WorkflowError::AlreadyDecided))));

    let request = store.get_request(id).await.unwrap().unwrap();
    assert_eq!(request.status, winners[0].request.status);
    let log_gone = store.get_time_log(log_id).await.unwrap().is_none();
    assert_eq!(log_gone, request.status == RequestStatus::Approved);
}

#[tokio::test]
async fn test_pg_pending_requests_newest_first() {
    let Some(store) = store().await else { return };
    let user = fresh_user(&store, "qa").await;

    let older = store
        .stage(
            user,
            day(),
            serde_json::from_value(json!({"kind": "status_change", "status": "working"}))
                .unwrap(),
            "older",
        )
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let newer = store
        .stage(
            user,
            day().succ_opt().unwrap(),
            serde_json::from_value(json!({"kind": "status_change", "status": "busy"})).unwrap(),
            "newer",
        )
        .await
        .unwrap();

    let rows = store.list_pending_requests(Some(user)).await.unwrap();
    let ids: Vec<_> = rows.iter().map(|r| r.request.id).collect();
    assert_eq!(ids, vec![newer.request_id, older.request_id]);
    assert!(rows.iter().all(|r| r.pending_changes == 1));
}
