//! HTTP metadata API: create and inspect documents.
//!
//! This is a thin surface over the store and the hub; all real editing goes
//! through the WebSocket transport.

use crate::document::{DocumentSnapshot, DocumentStats};
use crate::engine::EngineError;
use crate::hub::{Hub, HubError};
use crate::store::StoreError;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Clone)]
pub struct ApiState {
    pub hub: Hub,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("document not found")]
    NotFound,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

impl From<HubError> for ApiError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::Engine(EngineError::Store(StoreError::InvalidId(id))) => {
                ApiError::InvalidInput(format!("invalid document id: {id}"))
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

pub fn router(hub: Hub) -> Router {
    Router::new()
        .route("/api/documents", post(create_document))
        .route("/api/documents/:id", get(get_document))
        .route("/api/documents/:id/stats", get(get_document_stats))
        .with_state(ApiState { hub })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateDocumentRequest {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

async fn create_document(
    State(state): State<ApiState>,
    Json(req): Json<CreateDocumentRequest>,
) -> Result<(StatusCode, Json<DocumentSnapshot>), ApiError> {
    let title = req.title.unwrap_or_else(|| "Untitled".to_string());
    let user_id = req.user_id.unwrap_or_else(|| "anonymous".to_string());

    let store = state.hub.store();
    let mut doc = store
        .create(&title, &user_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    if let Some(content) = req.content {
        doc.content = content;
        doc.metadata.refresh_counts(&doc.content);
        store
            .save(&doc, HashMap::new())
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
    }

    Ok((
        StatusCode::CREATED,
        Json(DocumentSnapshot {
            id: doc.id,
            title: doc.title,
            content: doc.content,
            version: doc.version,
            metadata: doc.metadata,
            active_users: Vec::new(),
        }),
    ))
}

async fn get_document(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<DocumentSnapshot>, ApiError> {
    let snapshot = state.hub.snapshot(&id).await?;
    Ok(Json(snapshot))
}

async fn get_document_stats(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<DocumentStats>, ApiError> {
    match state.hub.stats(&id).await? {
        Some(stats) => Ok(Json(stats)),
        None => Err(ApiError::NotFound),
    }
}
