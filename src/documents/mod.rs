/// Document uploads for logged-in accounts
///
/// Only `.pdf` and `.csv` names are accepted. Files land in the upload
/// directory as `{uuid}-{name}` with a row in `document`.
use crate::{
    config::ServerConfig,
    db::models::Document,
    error::PortalResult,
    metrics,
    validation::validate_document_name,
};
use chrono::Utc;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Keep the last path component and replace anything outside `[A-Za-z0-9._-]`
pub fn sanitize_file_name(file_name: &str) -> String {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name);
    base.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[derive(Clone)]
pub struct DocumentStore {
    db: SqlitePool,
    config: Arc<ServerConfig>,
}

impl DocumentStore {
    pub fn new(db: SqlitePool, config: Arc<ServerConfig>) -> Self {
        Self { db, config }
    }

    fn upload_directory(&self) -> &Path {
        &self.config.storage.upload_directory
    }

    /// Store an uploaded file for an account
    pub async fn upload(
        &self,
        account_id: i64,
        file_name: &str,
        content_type: Option<&str>,
        bytes: &[u8],
    ) -> PortalResult<Document> {
        let extension = validate_document_name(file_name)?;

        let clean_name = sanitize_file_name(file_name);
        let stored_name = format!("{}-{}", Uuid::new_v4(), clean_name);
        let directory = self.upload_directory();
        tokio::fs::create_dir_all(directory).await?;
        let stored_path = directory.join(&stored_name);
        tokio::fs::write(&stored_path, bytes).await?;

        let uploaded_at = Utc::now();
        let inserted = sqlx::query_scalar::<_, i64>(
            "INSERT INTO document (account_id, file_name, stored_path, content_type, size_bytes, uploaded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             RETURNING id",
        )
        .bind(account_id)
        .bind(&clean_name)
        .bind(stored_path.to_string_lossy().as_ref())
        .bind(content_type)
        .bind(bytes.len() as i64)
        .bind(uploaded_at)
        .fetch_one(&self.db)
        .await;

        let id = match inserted {
            Ok(id) => id,
            Err(e) => {
                // Don't leave an orphaned file behind
                if let Err(remove_err) = tokio::fs::remove_file(&stored_path).await {
                    tracing::warn!("Failed to remove orphaned upload: {}", remove_err);
                }
                return Err(e.into());
            }
        };

        metrics::DOCUMENTS_UPLOADED_TOTAL
            .with_label_values(&[extension])
            .inc();
        tracing::info!(account_id, document_id = id, size = bytes.len(), "Document uploaded");

        Ok(Document {
            id,
            account_id,
            file_name: clean_name,
            stored_path: stored_path.to_string_lossy().into_owned(),
            content_type: content_type.map(str::to_string),
            size_bytes: bytes.len() as i64,
            uploaded_at,
        })
    }

    /// Documents of one account, newest first
    pub async fn list(&self, account_id: i64) -> PortalResult<Vec<Document>> {
        let documents = sqlx::query_as::<_, Document>(
            "SELECT id, account_id, file_name, stored_path, content_type, size_bytes, uploaded_at
             FROM document WHERE account_id = ?1
             ORDER BY uploaded_at DESC, id DESC",
        )
        .bind(account_id)
        .fetch_all(&self.db)
        .await?;
        Ok(documents)
    }
}
