use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("authentication required")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found")]
    NotFound,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ServerResult<T> = Result<T, ServerError>;

impl From<hoard_store::StoreError> for ServerError {
    fn from(e: hoard_store::StoreError) -> Self {
        match e {
            hoard_store::StoreError::NotFound(_) => ServerError::NotFound,
            hoard_store::StoreError::Corrupt { .. } => ServerError::BadRequest(e.to_string()),
            hoard_store::StoreError::TooLarge { .. } => ServerError::BadRequest(e.to_string()),
            hoard_store::StoreError::RemoveUnsupported => ServerError::Forbidden(e.to_string()),
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl From<hoard_index::IndexError> for ServerError {
    fn from(e: hoard_index::IndexError) -> Self {
        ServerError::Internal(e.to_string())
    }
}

impl From<hoard_search::SearchError> for ServerError {
    fn from(e: hoard_search::SearchError) -> Self {
        match e {
            hoard_search::SearchError::BadExpression(_)
            | hoard_search::SearchError::BadQuery(_) => ServerError::BadRequest(e.to_string()),
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl From<hoard_schema::SchemaError> for ServerError {
    fn from(e: hoard_schema::SchemaError) -> Self {
        ServerError::BadRequest(e.to_string())
    }
}

impl From<hoard_types::TypeError> for ServerError {
    fn from(e: hoard_types::TypeError) -> Self {
        ServerError::BadRequest(e.to_string())
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Unauthorized => StatusCode::UNAUTHORIZED,
            ServerError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServerError::NotFound => StatusCode::NOT_FOUND,
            ServerError::Internal(_) | ServerError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // 500-class details go to the log, not the client.
        let message = match &self {
            ServerError::Internal(m) => {
                tracing::error!("internal server error: {m}");
                "internal error".to_string()
            }
            ServerError::Io(e) => {
                tracing::error!("I/O error: {e}");
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        let mut response = (status, Json(json!({ "error": message }))).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                axum::http::header::WWW_AUTHENTICATE,
                axum::http::HeaderValue::from_static("Basic realm=\"hoard\""),
            );
        }
        response
    }
}
