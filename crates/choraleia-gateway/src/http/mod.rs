pub mod assets;
pub mod browsers;
pub mod chat;
pub mod conversations;
pub mod files;
pub mod health;
pub mod memories;
pub mod terminals;
pub mod workspaces;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Uniform API error body: `{ "error": { "code", "message" } }`.
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": { "code": self.code, "message": self.message }
        }));
        (self.status, body).into_response()
    }
}

impl From<choraleia_store::StoreError> for ApiError {
    fn from(e: choraleia_store::StoreError) -> Self {
        match &e {
            choraleia_store::StoreError::NotFound { .. } => ApiError::not_found(e.to_string()),
            choraleia_store::StoreError::Constraint(_) => ApiError::bad_request(e.to_string()),
            _ => ApiError::internal(e.to_string()),
        }
    }
}

impl From<choraleia_runtime::RuntimeError> for ApiError {
    fn from(e: choraleia_runtime::RuntimeError) -> Self {
        match &e {
            choraleia_runtime::RuntimeError::Validation(_)
            | choraleia_runtime::RuntimeError::WrongState { .. } => {
                ApiError::bad_request(e.to_string())
            }
            choraleia_runtime::RuntimeError::Store(inner) => match inner {
                choraleia_store::StoreError::NotFound { .. } => {
                    ApiError::not_found(e.to_string())
                }
                _ => ApiError::internal(e.to_string()),
            },
            _ => ApiError::internal(e.to_string()),
        }
    }
}

impl From<choraleia_memory::MemoryError> for ApiError {
    fn from(e: choraleia_memory::MemoryError) -> Self {
        match &e {
            choraleia_memory::MemoryError::NotFound { .. } => ApiError::not_found(e.to_string()),
            choraleia_memory::MemoryError::Invalid(_) => ApiError::bad_request(e.to_string()),
            _ => ApiError::internal(e.to_string()),
        }
    }
}

impl From<choraleia_agent::AgentError> for ApiError {
    fn from(e: choraleia_agent::AgentError) -> Self {
        match &e {
            choraleia_agent::AgentError::InvalidRequest(_) => ApiError::bad_request(e.to_string()),
            choraleia_agent::AgentError::NoStream(_) => ApiError::not_found(e.to_string()),
            _ => ApiError::internal(e.to_string()),
        }
    }
}

impl From<choraleia_ssh::SshError> for ApiError {
    fn from(e: choraleia_ssh::SshError) -> Self {
        ApiError::internal(e.to_string())
    }
}
