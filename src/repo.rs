use sqlx::sqlite::SqliteRow;
use sqlx::SqlitePool;

use crate::time::now_ms;

/// Tables reachable through the generic CRUD surface. Everything else
/// (attachments, the mutation queue) has a dedicated module.
pub const DOMAIN_TABLES: &[&str] = &["clinics", "team_members", "patients", "sessions"];

/// Tables that soft-delete and carry a sync stamp.
pub const SYNCED_TABLES: &[&str] = &["patients", "sessions"];

pub fn ensure_table(table: &str) -> anyhow::Result<()> {
    if DOMAIN_TABLES.contains(&table) {
        Ok(())
    } else {
        Err(anyhow::anyhow!("invalid table"))
    }
}

fn ensure_order_by(order_by: &str) -> anyhow::Result<()> {
    let ok = order_by
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ',' | ' '));
    if ok && !order_by.trim().is_empty() {
        Ok(())
    } else {
        Err(anyhow::anyhow!("invalid order_by"))
    }
}

fn scoped(table: &str) -> bool {
    table != "clinics"
}

fn soft_deleting(table: &str) -> bool {
    SYNCED_TABLES.contains(&table)
}

pub async fn list_active(
    pool: &SqlitePool,
    table: &str,
    clinic_id: &str,
    order_by: Option<&str>,
    limit: Option<i64>,
    offset: Option<i64>,
) -> anyhow::Result<Vec<SqliteRow>> {
    ensure_table(table)?;
    let mut sql = format!("SELECT * FROM {table}");
    let mut clauses: Vec<&str> = Vec::new();
    if scoped(table) {
        clauses.push("clinic_id = ?");
    }
    if soft_deleting(table) {
        clauses.push("deleted_at IS NULL");
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    match order_by {
        Some(order) => {
            ensure_order_by(order)?;
            sql.push_str(&format!(" ORDER BY {order}"));
        }
        None => sql.push_str(" ORDER BY created_at, id"),
    }
    if limit.is_some() {
        sql.push_str(" LIMIT ?");
    }
    if offset.is_some() {
        sql.push_str(" OFFSET ?");
    }

    let mut query = sqlx::query(&sql);
    if scoped(table) {
        query = query.bind(clinic_id);
    }
    if let Some(l) = limit {
        query = query.bind(l);
    }
    if let Some(o) = offset {
        query = query.bind(o);
    }
    Ok(query.fetch_all(pool).await?)
}

pub async fn get_active(
    pool: &SqlitePool,
    table: &str,
    clinic_id: Option<&str>,
    id: &str,
) -> anyhow::Result<Option<SqliteRow>> {
    ensure_table(table)?;
    let mut sql = format!("SELECT * FROM {table} WHERE id = ?");
    if scoped(table) && clinic_id.is_some() {
        sql.push_str(" AND clinic_id = ?");
    }
    if soft_deleting(table) {
        sql.push_str(" AND deleted_at IS NULL");
    }
    let mut query = sqlx::query(&sql).bind(id);
    if scoped(table) {
        if let Some(clinic) = clinic_id {
            query = query.bind(clinic);
        }
    }
    Ok(query.fetch_optional(pool).await?)
}

pub async fn set_deleted_at(pool: &SqlitePool, table: &str, id: &str) -> anyhow::Result<()> {
    ensure_table(table)?;
    if !soft_deleting(table) {
        anyhow::bail!("table does not soft-delete");
    }
    let sql = format!("UPDATE {table} SET deleted_at = ?, updated_at = ? WHERE id = ?");
    let now = now_ms();
    let res = sqlx::query(&sql)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        anyhow::bail!("id not found");
    }
    Ok(())
}

pub async fn clear_deleted_at(pool: &SqlitePool, table: &str, id: &str) -> anyhow::Result<()> {
    ensure_table(table)?;
    if !soft_deleting(table) {
        anyhow::bail!("table does not soft-delete");
    }
    let sql = format!("UPDATE {table} SET deleted_at = NULL, updated_at = ? WHERE id = ?");
    let now = now_ms();
    let res = sqlx::query(&sql)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        anyhow::bail!("id not found");
    }
    Ok(())
}

/// Stamp a local row as matching the remote copy.
pub async fn mark_synced(pool: &SqlitePool, table: &str, id: &str) -> anyhow::Result<()> {
    ensure_table(table)?;
    if !SYNCED_TABLES.contains(&table) {
        anyhow::bail!("table has no sync stamp");
    }
    let sql = format!("UPDATE {table} SET synced_at = ? WHERE id = ?");
    sqlx::query(&sql).bind(now_ms()).bind(id).execute(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_table_is_rejected() {
        assert!(ensure_table("patients").is_ok());
        assert!(ensure_table("sqlite_master").is_err());
        assert!(ensure_table("patients; DROP TABLE patients").is_err());
    }

    #[test]
    fn order_by_is_sanitized() {
        assert!(ensure_order_by("scheduled_at").is_ok());
        assert!(ensure_order_by("scheduled_at, id").is_ok());
        assert!(ensure_order_by("scheduled_at; DROP TABLE x").is_err());
        assert!(ensure_order_by("").is_err());
    }
}
