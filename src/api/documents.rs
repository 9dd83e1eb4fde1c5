/// Document upload endpoints
use crate::{
    auth::SessionAuth,
    context::AppContext,
    db::models::Document,
    error::{PortalError, PortalResult},
};
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde_json::json;

pub fn routes() -> Router<AppContext> {
    Router::new().route("/upload", get(list_documents).post(upload_document))
}

async fn list_documents(
    State(ctx): State<AppContext>,
    auth: SessionAuth,
) -> PortalResult<Json<serde_json::Value>> {
    let documents = ctx.documents.list(auth.account.id).await?;
    Ok(Json(json!({ "documents": documents })))
}

/// Accept the multipart field `file`
async fn upload_document(
    State(ctx): State<AppContext>,
    auth: SessionAuth,
    mut multipart: Multipart,
) -> PortalResult<(StatusCode, Json<Document>)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PortalError::field("file", format!("Invalid upload: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| PortalError::field("file", format!("Invalid upload: {}", e)))?;

        let document = ctx
            .documents
            .upload(auth.account.id, &file_name, content_type.as_deref(), &bytes)
            .await?;
        return Ok((StatusCode::CREATED, Json(document)));
    }

    Err(PortalError::field("file", "No file was submitted."))
}
