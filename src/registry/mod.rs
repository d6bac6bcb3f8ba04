use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{cache, cache::StatusCache, storage::BlobStore};

/// Durable record of an uploaded document. Created on upload, deleted by
/// the retention sweeper, never updated apart from the extracted-text
/// cache.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DocumentRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub original_filename: String,
    pub storage_ref: String,
    pub byte_size: i64,
    pub extension: String,
    pub uploaded_at: DateTime<Utc>,
    pub delete_at: DateTime<Utc>,
    pub extracted_text: Option<String>,
}

/// Metadata supplied when registering a freshly stored upload.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub owner_id: Uuid,
    pub original_filename: String,
    pub storage_ref: String,
    pub byte_size: i64,
    pub extension: String,
}

/// The deletion deadline is always derived from the upload time and the
/// configured retention window.
pub fn delete_at_for(uploaded_at: DateTime<Utc>, retention_hours: i64) -> DateTime<Utc> {
    uploaded_at + Duration::hours(retention_hours)
}

pub async fn register(
    pool: &PgPool,
    new: NewDocument,
    retention_hours: i64,
) -> Result<DocumentRecord> {
    let id = Uuid::new_v4();
    let uploaded_at = Utc::now();
    let delete_at = delete_at_for(uploaded_at, retention_hours);

    sqlx::query(
        "INSERT INTO documents
         (id, owner_id, original_filename, storage_ref, byte_size, extension, uploaded_at, delete_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(id)
    .bind(new.owner_id)
    .bind(&new.original_filename)
    .bind(&new.storage_ref)
    .bind(new.byte_size)
    .bind(&new.extension)
    .bind(uploaded_at)
    .bind(delete_at)
    .execute(pool)
    .await
    .context("failed to register document")?;

    Ok(DocumentRecord {
        id,
        owner_id: new.owner_id,
        original_filename: new.original_filename,
        storage_ref: new.storage_ref,
        byte_size: new.byte_size,
        extension: new.extension,
        uploaded_at,
        delete_at,
        extracted_text: None,
    })
}

pub async fn fetch_document(pool: &PgPool, id: Uuid) -> Result<Option<DocumentRecord>> {
    sqlx::query_as::<_, DocumentRecord>(
        "SELECT id, owner_id, original_filename, storage_ref, byte_size, extension,
                uploaded_at, delete_at, extracted_text
         FROM documents WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("failed to load document")
}

pub async fn save_extracted_text(pool: &PgPool, id: Uuid, text: &str) -> Result<()> {
    sqlx::query("UPDATE documents SET extracted_text = $2 WHERE id = $1")
        .bind(id)
        .bind(text)
        .execute(pool)
        .await
        .context("failed to cache extracted text")?;
    Ok(())
}

pub async fn find_expired(pool: &PgPool, now: DateTime<Utc>) -> Result<Vec<DocumentRecord>> {
    sqlx::query_as::<_, DocumentRecord>(
        "SELECT id, owner_id, original_filename, storage_ref, byte_size, extension,
                uploaded_at, delete_at, extracted_text
         FROM documents WHERE delete_at <= $1",
    )
    .bind(now)
    .fetch_all(pool)
    .await
    .context("failed to query expired documents")
}

/// Deletes the blob first, then the metadata. A blob-delete failure
/// propagates so the sweeper can log and skip the document; the job row
/// goes away with the document via the foreign-key cascade.
pub async fn purge(
    pool: &PgPool,
    blob: &dyn BlobStore,
    cache: &dyn StatusCache,
    document: &DocumentRecord,
) -> Result<()> {
    blob.delete(&document.storage_ref).await?;
    cache::invalidate_entry(cache, document.id).await;

    sqlx::query("DELETE FROM documents WHERE id = $1")
        .bind(document.id)
        .execute(pool)
        .await
        .context("failed to delete document record")?;

    Ok(())
}
