//! Session attachments, stored inline as blobs so the record travels with the
//! database file. When an attachment rides along a queued mutation its bytes
//! are base64-encoded into the JSON payload.

use base64::Engine as _;
use sqlx::SqlitePool;

use crate::id::new_uuid_v7;
use crate::model::AttachmentMeta;
use crate::time::now_ms;
use crate::{AppError, AppResult};

const MAX_ATTACHMENT_BYTES: usize = 25 * 1024 * 1024;
const FALLBACK_MIME: &str = "application/octet-stream";

pub fn sniff_mime(bytes: &[u8]) -> &'static str {
    infer::get(bytes)
        .map(|kind| kind.mime_type())
        .unwrap_or(FALLBACK_MIME)
}

pub async fn save_attachment(
    pool: &SqlitePool,
    clinic_id: &str,
    session_id: &str,
    file_name: &str,
    bytes: &[u8],
) -> AppResult<AttachmentMeta> {
    if bytes.is_empty() {
        return Err(AppError::new("ATTACHMENTS/EMPTY", "Attachment has no content")
            .with_context("file_name", file_name.to_string()));
    }
    if bytes.len() > MAX_ATTACHMENT_BYTES {
        return Err(
            AppError::new("ATTACHMENTS/TOO_LARGE", "Attachment exceeds the size limit")
                .with_context("file_name", file_name.to_string())
                .with_context("size_bytes", bytes.len().to_string()),
        );
    }

    let meta = AttachmentMeta {
        id: new_uuid_v7(),
        clinic_id: clinic_id.to_string(),
        session_id: session_id.to_string(),
        file_name: file_name.to_string(),
        mime: sniff_mime(bytes).to_string(),
        size_bytes: bytes.len() as i64,
        created_at: now_ms(),
    };

    sqlx::query(
        "INSERT INTO attachments (id, clinic_id, session_id, file_name, mime, data, size_bytes, created_at)\
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&meta.id)
    .bind(&meta.clinic_id)
    .bind(&meta.session_id)
    .bind(&meta.file_name)
    .bind(&meta.mime)
    .bind(bytes)
    .bind(meta.size_bytes)
    .bind(meta.created_at)
    .execute(pool)
    .await
    .map_err(|err| {
        AppError::from(err)
            .with_context("operation", "save_attachment")
            .with_context("session_id", session_id.to_string())
    })?;

    Ok(meta)
}

pub async fn list_for_session(
    pool: &SqlitePool,
    session_id: &str,
) -> AppResult<Vec<AttachmentMeta>> {
    sqlx::query_as::<_, AttachmentMeta>(
        "SELECT id, clinic_id, session_id, file_name, mime, size_bytes, created_at \
         FROM attachments WHERE session_id = ? ORDER BY created_at, id",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await
    .map_err(AppError::from)
}

pub async fn load_bytes(pool: &SqlitePool, id: &str) -> AppResult<Vec<u8>> {
    let data: Option<Vec<u8>> = sqlx::query_scalar("SELECT data FROM attachments WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::from)?;
    data.ok_or_else(|| {
        AppError::new("ATTACHMENTS/NOT_FOUND", "Attachment not found")
            .with_context("id", id.to_string())
    })
}

pub async fn delete_attachment(pool: &SqlitePool, id: &str) -> AppResult<()> {
    let res = sqlx::query("DELETE FROM attachments WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .map_err(AppError::from)?;
    if res.rows_affected() == 0 {
        return Err(AppError::new("ATTACHMENTS/NOT_FOUND", "Attachment not found")
            .with_context("id", id.to_string()));
    }
    Ok(())
}

/// JSON shape used when an attachment travels inside a queued mutation.
pub fn encode_payload(meta: &AttachmentMeta, bytes: &[u8]) -> serde_json::Value {
    serde_json::json!({
        "id": meta.id,
        "clinic_id": meta.clinic_id,
        "session_id": meta.session_id,
        "file_name": meta.file_name,
        "mime": meta.mime,
        "data": base64::engine::general_purpose::STANDARD.encode(bytes),
        "size_bytes": meta.size_bytes,
        "created_at": meta.created_at,
    })
}

pub fn decode_payload_bytes(payload: &serde_json::Value) -> AppResult<Vec<u8>> {
    let encoded = payload
        .get("data")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::new("ATTACHMENTS/BAD_PAYLOAD", "Payload has no data field"))?;
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|err| {
            AppError::new("ATTACHMENTS/BAD_PAYLOAD", "Payload data is not valid base64")
                .with_context("error", err.to_string())
        })
}
