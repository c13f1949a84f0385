mod util;

use serde_json::{json, Map, Value};
use sqlx::SqlitePool;

use clinica_lib::commands::{
    create_command, delete_command, get_command, list_command, restore_command, update_command,
    EnqueuePolicy,
};
use clinica_lib::model::{MutationOp, MutationStatus};
use clinica_lib::repo;
use clinica_lib::sync::queue;

use util::memory_pool;

fn object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

async fn seed_clinic(pool: &SqlitePool) {
    create_command(
        pool,
        "clinics",
        object(json!({ "id": "c1", "name": "Riverside Clinic" })),
        EnqueuePolicy::Skip,
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn create_fills_defaults_and_returns_the_row() {
    let pool = memory_pool().await;
    seed_clinic(&pool).await;

    let created = create_command(
        &pool,
        "patients",
        object(json!({
            "clinic_id": "c1",
            "public_id": "P-001",
            "full_name": "Ana Silva",
        })),
        EnqueuePolicy::Skip,
    )
    .await
    .unwrap();

    let id = created["id"].as_str().unwrap();
    assert!(!id.is_empty());
    assert!(created["created_at"].as_i64().unwrap() > 0);
    assert_eq!(created["created_at"], created["updated_at"]);

    let fetched = get_command(&pool, "patients", Some("c1"), id)
        .await
        .unwrap()
        .expect("row exists");
    assert_eq!(fetched["full_name"], "Ana Silva");
}

#[tokio::test]
async fn list_is_clinic_scoped_and_hides_soft_deleted_rows() {
    let pool = memory_pool().await;
    seed_clinic(&pool).await;

    for (id, clinic) in [("p1", "c1"), ("p2", "c1"), ("p3", "other")] {
        create_command(
            &pool,
            "patients",
            object(json!({
                "id": id,
                "clinic_id": clinic,
                "public_id": format!("P-{id}"),
                "full_name": format!("Patient {id}"),
            })),
            EnqueuePolicy::Skip,
        )
        .await
        .unwrap();
    }

    let rows = list_command(&pool, "patients", "c1", None, None, None)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);

    delete_command(&pool, "patients", "c1", "p1", EnqueuePolicy::Skip)
        .await
        .unwrap();
    let rows = list_command(&pool, "patients", "c1", None, None, None)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], "p2");

    // The row is hidden, not gone.
    assert!(get_command(&pool, "patients", Some("c1"), "p1")
        .await
        .unwrap()
        .is_none());
    restore_command(&pool, "patients", "c1", "p1").await.unwrap();
    assert!(get_command(&pool, "patients", Some("c1"), "p1")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn writes_with_record_policy_land_in_the_queue() {
    let pool = memory_pool().await;
    seed_clinic(&pool).await;

    create_command(
        &pool,
        "patients",
        object(json!({
            "id": "p1",
            "clinic_id": "c1",
            "public_id": "P-001",
            "full_name": "Ana Silva",
        })),
        EnqueuePolicy::Record,
    )
    .await
    .unwrap();

    update_command(
        &pool,
        "patients",
        "p1",
        object(json!({ "notes": "follow-up in two weeks" })),
        Some("c1"),
        EnqueuePolicy::Record,
    )
    .await
    .unwrap();

    delete_command(&pool, "patients", "c1", "p1", EnqueuePolicy::Record)
        .await
        .unwrap();

    let items = queue::pending_in_order(&pool).await.unwrap();
    let ops: Vec<MutationOp> = items.iter().map(|m| m.op).collect();
    assert_eq!(
        ops,
        vec![MutationOp::Create, MutationOp::Update, MutationOp::Delete]
    );
    assert!(items.iter().all(|m| m.status == MutationStatus::Pending));

    // The update payload carries the patch plus the row id, nothing else.
    let patch = items[1].payload_json().unwrap();
    assert_eq!(patch["id"], "p1");
    assert_eq!(patch["notes"], "follow-up in two weeks");
    assert!(patch.get("synced_at").is_none());
    assert!(patch.get("created_at").is_none());

    let del = items[2].payload_json().unwrap();
    assert_eq!(del, json!({ "id": "p1" }));
}

#[tokio::test]
async fn update_resets_the_sync_stamp() {
    let pool = memory_pool().await;
    seed_clinic(&pool).await;
    create_command(
        &pool,
        "patients",
        object(json!({
            "id": "p1",
            "clinic_id": "c1",
            "public_id": "P-001",
            "full_name": "Ana Silva",
        })),
        EnqueuePolicy::Skip,
    )
    .await
    .unwrap();

    repo::mark_synced(&pool, "patients", "p1").await.unwrap();
    let stamp: Option<i64> = sqlx::query_scalar("SELECT synced_at FROM patients WHERE id = 'p1'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(stamp.is_some());

    update_command(
        &pool,
        "patients",
        "p1",
        object(json!({ "notes": "changed" })),
        Some("c1"),
        EnqueuePolicy::Skip,
    )
    .await
    .unwrap();

    let stamp: Option<i64> = sqlx::query_scalar("SELECT synced_at FROM patients WHERE id = 'p1'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(stamp.is_none());
}

#[tokio::test]
async fn soft_delete_helpers_round_trip() {
    let pool = memory_pool().await;
    seed_clinic(&pool).await;
    create_command(
        &pool,
        "sessions",
        object(json!({
            "id": "s1",
            "clinic_id": "c1",
            "patient_id": "p1",
            "scheduled_at": 1_700_000_000_000_i64,
            "duration_min": 30,
        })),
        EnqueuePolicy::Skip,
    )
    .await
    .unwrap();

    repo::set_deleted_at(&pool, "sessions", "s1").await.unwrap();
    assert!(get_command(&pool, "sessions", Some("c1"), "s1")
        .await
        .unwrap()
        .is_none());

    repo::clear_deleted_at(&pool, "sessions", "s1").await.unwrap();
    assert!(get_command(&pool, "sessions", Some("c1"), "s1")
        .await
        .unwrap()
        .is_some());

    // Reference tables never soft-delete.
    assert!(repo::set_deleted_at(&pool, "clinics", "c1").await.is_err());
}

#[tokio::test]
async fn clinics_hard_delete_and_skip_the_queue() {
    let pool = memory_pool().await;
    seed_clinic(&pool).await;

    delete_command(&pool, "clinics", "c1", "c1", EnqueuePolicy::Record)
        .await
        .unwrap();
    assert!(get_command(&pool, "clinics", None, "c1")
        .await
        .unwrap()
        .is_none());
    assert!(queue::pending_in_order(&pool).await.unwrap().is_empty());
}

#[tokio::test]
async fn updating_a_missing_row_fails() {
    let pool = memory_pool().await;
    let err = update_command(
        &pool,
        "patients",
        "ghost",
        object(json!({ "notes": "x" })),
        Some("c1"),
        EnqueuePolicy::Skip,
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), "COMMANDS/NOT_FOUND");
}
