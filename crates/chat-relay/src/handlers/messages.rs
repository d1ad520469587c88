use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::database::{ChatRecordView, Repository};
use crate::utils::error::ApiError;

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub messages: Vec<ChatRecordView>,
}

/// Every recorded exchange, most recent first
pub async fn list_messages_handler(
    State(repository): State<Arc<Repository>>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let records = repository
        .list_messages()
        .await
        .map_err(|e| ApiError::DatabaseError(e.to_string()))?;

    debug!("Serving {} chat records", records.len());

    Ok(Json(MessagesResponse {
        messages: records.into_iter().map(ChatRecordView::from).collect(),
    }))
}
