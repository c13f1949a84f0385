//! Pending-mutation queue backing the offline data path. Rows are appended on
//! local writes and drained by the sync engine; an errored row stays put until
//! the next sync trigger picks it up again.

use serde::Serialize;
use sqlx::{Executor, Sqlite, SqlitePool};
use ts_rs::TS;

use crate::id::new_uuid_v7;
use crate::model::{EntityType, MutationOp, MutationStatus, PendingMutation};
use crate::time::now_ms;
use crate::{AppError, AppResult};

/// Append a mutation record. Takes any executor so callers can enqueue inside
/// the same transaction as the local write.
pub async fn enqueue<'e, E>(
    executor: E,
    entity_type: EntityType,
    op: MutationOp,
    entity_id: &str,
    payload: &serde_json::Value,
) -> AppResult<PendingMutation>
where
    E: Executor<'e, Database = Sqlite>,
{
    let mutation = PendingMutation {
        id: new_uuid_v7(),
        entity_type,
        op,
        entity_id: entity_id.to_string(),
        payload: serde_json::to_string(payload).map_err(AppError::from)?,
        status: MutationStatus::Pending,
        error_message: None,
        created_at: now_ms(),
    };

    sqlx::query(
        "INSERT INTO pending_mutations (id, entity_type, op, entity_id, payload, status, created_at)\
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&mutation.id)
    .bind(mutation.entity_type.as_str())
    .bind(mutation.op.as_str())
    .bind(&mutation.entity_id)
    .bind(&mutation.payload)
    .bind(mutation.status.as_str())
    .bind(mutation.created_at)
    .execute(executor)
    .await
    .map_err(AppError::from)?;

    tracing::debug!(
        target: "clinica",
        event = "mutation_enqueued",
        mutation_id = %mutation.id,
        entity_type = %mutation.entity_type,
        op = %mutation.op,
        entity_id = %mutation.entity_id
    );
    Ok(mutation)
}

/// The whole queue in insertion order, errored items included; those are
/// retried on the next trigger, never rescheduled automatically.
pub async fn pending_in_order(pool: &SqlitePool) -> AppResult<Vec<PendingMutation>> {
    sqlx::query_as::<_, PendingMutation>(
        "SELECT id, entity_type, op, entity_id, payload, status, error_message, created_at \
         FROM pending_mutations ORDER BY created_at, rowid",
    )
    .fetch_all(pool)
    .await
    .map_err(AppError::from)
}

pub async fn mark_error(pool: &SqlitePool, id: &str, message: &str) -> AppResult<()> {
    sqlx::query("UPDATE pending_mutations SET status = 'error', error_message = ? WHERE id = ?")
        .bind(message)
        .bind(id)
        .execute(pool)
        .await
        .map_err(AppError::from)?;
    Ok(())
}

pub async fn remove(pool: &SqlitePool, id: &str) -> AppResult<()> {
    sqlx::query("DELETE FROM pending_mutations WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .map_err(AppError::from)?;
    Ok(())
}

#[derive(Debug, Clone, Copy, Serialize, TS)]
#[ts(export, export_to = "../bindings/")]
pub struct QueueCounts {
    #[ts(type = "number")]
    pub pending: i64,
    #[ts(type = "number")]
    pub error: i64,
}

pub async fn counts(pool: &SqlitePool) -> AppResult<QueueCounts> {
    let pending: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM pending_mutations WHERE status = 'pending'")
            .fetch_one(pool)
            .await
            .map_err(AppError::from)?;
    let error: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM pending_mutations WHERE status = 'error'")
            .fetch_one(pool)
            .await
            .map_err(AppError::from)?;
    Ok(QueueCounts { pending, error })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("connect");
        migrate::apply_migrations(&pool).await.expect("migrate");
        pool
    }

    #[tokio::test]
    async fn enqueue_preserves_insertion_order() {
        let pool = memory_pool().await;
        for n in 0..3 {
            enqueue(
                &pool,
                EntityType::Patient,
                MutationOp::Create,
                &format!("p{n}"),
                &json!({ "n": n }),
            )
            .await
            .unwrap();
        }

        let items = pending_in_order(&pool).await.unwrap();
        let ids: Vec<&str> = items.iter().map(|m| m.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["p0", "p1", "p2"]);
    }

    #[tokio::test]
    async fn errored_items_stay_in_queue() {
        let pool = memory_pool().await;
        let m = enqueue(
            &pool,
            EntityType::Session,
            MutationOp::Update,
            "s1",
            &json!({ "summary": "x" }),
        )
        .await
        .unwrap();

        mark_error(&pool, &m.id, "remote said no").await.unwrap();

        let items = pending_in_order(&pool).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].status, MutationStatus::Error);
        assert_eq!(items[0].error_message.as_deref(), Some("remote said no"));

        let c = counts(&pool).await.unwrap();
        assert_eq!((c.pending, c.error), (0, 1));
    }

    #[tokio::test]
    async fn remove_drops_the_row() {
        let pool = memory_pool().await;
        let m = enqueue(
            &pool,
            EntityType::Patient,
            MutationOp::Delete,
            "p1",
            &json!({ "id": "p1" }),
        )
        .await
        .unwrap();
        remove(&pool, &m.id).await.unwrap();
        assert!(pending_in_order(&pool).await.unwrap().is_empty());
    }
}
