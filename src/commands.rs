//! Generic CRUD surface over the embedded store. Every write can record a
//! pending mutation in the same transaction, which is how the offline data
//! path keeps the queue consistent with the local rows.

use futures::FutureExt;
use serde_json::{Map, Value};
use sqlx::{sqlite::SqliteRow, Column, Row, SqlitePool, TypeInfo, ValueRef};

use crate::db::run_in_tx;
use crate::model::{EntityType, MutationOp};
use crate::sync::queue;
use crate::{id::new_uuid_v7, repo, time::now_ms, AppError, AppResult};

/// Whether a local write should be mirrored into the mutation queue. The
/// caller decides based on the active data path (offline, or local-first by
/// privacy policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueuePolicy {
    Record,
    Skip,
}

/// Only patient and session rows travel through the sync queue.
fn queue_entity(table: &str) -> Option<EntityType> {
    match table {
        "patients" => Some(EntityType::Patient),
        "sessions" => Some(EntityType::Session),
        _ => None,
    }
}

pub fn row_to_value(row: SqliteRow) -> Value {
    let mut map = Map::new();
    for col in row.columns() {
        let idx = col.ordinal();
        let v = row.try_get_raw(idx).ok();
        let val = match v {
            Some(raw) => {
                if raw.is_null() {
                    Value::Null
                } else {
                    match raw.type_info().name() {
                        "INTEGER" => row
                            .try_get::<i64, _>(idx)
                            .map(Value::from)
                            .unwrap_or(Value::Null),
                        "REAL" => row
                            .try_get::<f64, _>(idx)
                            .map(Value::from)
                            .unwrap_or(Value::Null),
                        _ => row
                            .try_get::<String, _>(idx)
                            .map(Value::from)
                            .unwrap_or(Value::Null),
                    }
                }
            }
            None => Value::Null,
        };
        map.insert(col.name().to_string(), val);
    }
    Value::Object(map)
}

fn bind_value<'q>(
    q: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    v: &Value,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    match v {
        Value::Null => q.bind(Option::<i64>::None),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else if let Some(f) = n.as_f64() {
                q.bind(f)
            } else {
                q.bind(Option::<i64>::None)
            }
        }
        Value::Bool(b) => q.bind(*b as i64),
        Value::String(s) => q.bind(s.clone()),
        _ => q.bind(v.to_string()),
    }
}

pub async fn list_command(
    pool: &SqlitePool,
    table: &str,
    clinic_id: &str,
    order_by: Option<&str>,
    limit: Option<i64>,
    offset: Option<i64>,
) -> AppResult<Vec<Value>> {
    let rows = repo::list_active(pool, table, clinic_id, order_by, limit, offset)
        .await
        .map_err(|err| {
            AppError::from(err)
                .with_context("operation", "list")
                .with_context("table", table.to_string())
                .with_context("clinic_id", clinic_id.to_string())
        })?;
    Ok(rows.into_iter().map(row_to_value).collect())
}

pub async fn get_command(
    pool: &SqlitePool,
    table: &str,
    clinic_id: Option<&str>,
    id: &str,
) -> AppResult<Option<Value>> {
    let row = repo::get_active(pool, table, clinic_id, id)
        .await
        .map_err(|err| {
            AppError::from(err)
                .with_context("operation", "get")
                .with_context("table", table.to_string())
                .with_context("id", id.to_string())
        })?;
    Ok(row.map(row_to_value))
}

pub async fn create_command(
    pool: &SqlitePool,
    table: &str,
    mut data: Map<String, Value>,
    policy: EnqueuePolicy,
) -> AppResult<Value> {
    repo::ensure_table(table).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "create")
            .with_context("table", table.to_string())
    })?;

    let id = data
        .get("id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(new_uuid_v7);
    data.insert("id".into(), Value::String(id.clone()));
    let now = now_ms();
    data.entry(String::from("created_at"))
        .or_insert(Value::from(now));
    data.insert("updated_at".into(), Value::from(now));

    let cols: Vec<String> = data.keys().cloned().collect();
    let placeholders: Vec<String> = cols.iter().map(|_| "?".into()).collect();
    let sql = format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        cols.join(","),
        placeholders.join(",")
    );

    let entity = queue_entity(table).filter(|_| policy == EnqueuePolicy::Record);
    let table_owned = table.to_string();
    let payload = Value::Object(data.clone());

    run_in_tx::<_, AppError, _>(pool, |tx| {
        let data = data.clone();
        let cols = cols.clone();
        let sql = sql.clone();
        let id = id.clone();
        let payload = payload.clone();
        async move {
            let mut query = sqlx::query(&sql);
            for c in &cols {
                let value = data.get(c).ok_or_else(|| {
                    AppError::new("COMMANDS/MISSING_FIELD", "Payload missing value for column")
                        .with_context("column", c.clone())
                })?;
                query = bind_value(query, value);
            }
            query.execute(&mut **tx).await.map_err(AppError::from)?;

            if let Some(entity) = entity {
                queue::enqueue(&mut **tx, entity, MutationOp::Create, &id, &payload).await?;
            }
            Ok(())
        }
        .boxed()
    })
    .await
    .map_err(|err| {
        err.with_context("operation", "create")
            .with_context("table", table_owned)
    })?;

    Ok(payload)
}

pub async fn update_command(
    pool: &SqlitePool,
    table: &str,
    id: &str,
    mut data: Map<String, Value>,
    clinic_id: Option<&str>,
    policy: EnqueuePolicy,
) -> AppResult<()> {
    repo::ensure_table(table).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "update")
            .with_context("table", table.to_string())
    })?;

    data.remove("id");
    data.remove("created_at");
    let now = now_ms();
    data.insert("updated_at".into(), Value::from(now));
    // A local write invalidates the sync stamp until the remote confirms.
    if repo::SYNCED_TABLES.contains(&table) {
        data.insert("synced_at".into(), Value::Null);
    }

    let cols: Vec<String> = data.keys().cloned().collect();
    let set_clause: Vec<String> = cols.iter().map(|c| format!("{c} = ?")).collect();
    let scoped = table != "clinics" && clinic_id.is_some();
    let sql = if scoped {
        format!(
            "UPDATE {table} SET {} WHERE clinic_id = ? AND id = ?",
            set_clause.join(",")
        )
    } else {
        format!("UPDATE {table} SET {} WHERE id = ?", set_clause.join(","))
    };

    let entity = queue_entity(table).filter(|_| policy == EnqueuePolicy::Record);
    let mut payload_map = data.clone();
    payload_map.insert("id".into(), Value::String(id.to_string()));
    payload_map.remove("synced_at");
    let payload = Value::Object(payload_map);

    let id_owned = id.to_string();
    let clinic_owned = clinic_id.map(|c| c.to_string());
    run_in_tx::<_, AppError, _>(pool, |tx| {
        let data = data.clone();
        let cols = cols.clone();
        let sql = sql.clone();
        let id = id_owned.clone();
        let clinic = clinic_owned.clone();
        let payload = payload.clone();
        async move {
            let mut query = sqlx::query(&sql);
            for c in &cols {
                let value = data.get(c).ok_or_else(|| {
                    AppError::new("COMMANDS/MISSING_FIELD", "Payload missing value for column")
                        .with_context("column", c.clone())
                })?;
                query = bind_value(query, value);
            }
            if scoped {
                query = query.bind(clinic.unwrap_or_default()).bind(&id);
            } else {
                query = query.bind(&id);
            }
            let res = query.execute(&mut **tx).await.map_err(AppError::from)?;
            if res.rows_affected() == 0 {
                return Err(AppError::new("COMMANDS/NOT_FOUND", "Record not found")
                    .with_context("id", id.clone()));
            }

            if let Some(entity) = entity {
                queue::enqueue(&mut **tx, entity, MutationOp::Update, &id, &payload).await?;
            }
            Ok(())
        }
        .boxed()
    })
    .await
    .map_err(|err| {
        err.with_context("operation", "update")
            .with_context("table", table.to_string())
            .with_context("id", id.to_string())
    })
}

pub async fn delete_command(
    pool: &SqlitePool,
    table: &str,
    clinic_id: &str,
    id: &str,
    policy: EnqueuePolicy,
) -> AppResult<()> {
    repo::ensure_table(table).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "delete")
            .with_context("table", table.to_string())
    })?;

    let soft = repo::SYNCED_TABLES.contains(&table);
    let sql = if soft {
        format!("UPDATE {table} SET deleted_at = ?, updated_at = ? WHERE clinic_id = ? AND id = ?")
    } else if table == "clinics" {
        format!("DELETE FROM {table} WHERE id = ?")
    } else {
        format!("DELETE FROM {table} WHERE clinic_id = ? AND id = ?")
    };

    let entity = queue_entity(table).filter(|_| policy == EnqueuePolicy::Record);
    let id_owned = id.to_string();
    let clinic_owned = clinic_id.to_string();
    run_in_tx::<_, AppError, _>(pool, |tx| {
        let sql = sql.clone();
        let id = id_owned.clone();
        let clinic = clinic_owned.clone();
        async move {
            let now = now_ms();
            let query = if soft {
                sqlx::query(&sql).bind(now).bind(now).bind(&clinic).bind(&id)
            } else if sql.contains("clinic_id") {
                sqlx::query(&sql).bind(&clinic).bind(&id)
            } else {
                sqlx::query(&sql).bind(&id)
            };
            let res = query.execute(&mut **tx).await.map_err(AppError::from)?;
            if res.rows_affected() == 0 {
                return Err(AppError::new("COMMANDS/NOT_FOUND", "Record not found")
                    .with_context("id", id.clone()));
            }

            if let Some(entity) = entity {
                let payload = serde_json::json!({ "id": id });
                queue::enqueue(&mut **tx, entity, MutationOp::Delete, &id, &payload).await?;
            }
            Ok(())
        }
        .boxed()
    })
    .await
    .map_err(|err| {
        err.with_context("operation", "delete")
            .with_context("table", table.to_string())
            .with_context("clinic_id", clinic_id.to_string())
            .with_context("id", id.to_string())
    })
}

/// Undo a soft delete. Local-only; the remote copy is reconciled by the next
/// update that touches the row.
pub async fn restore_command(
    pool: &SqlitePool,
    table: &str,
    _clinic_id: &str,
    id: &str,
) -> AppResult<()> {
    repo::clear_deleted_at(pool, table, id).await.map_err(|err| {
        AppError::from(err)
            .with_context("operation", "restore")
            .with_context("table", table.to_string())
            .with_context("id", id.to_string())
    })
}
