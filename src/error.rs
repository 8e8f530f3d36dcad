//! Typed errors and HTTP mapping.

use crate::middleware::ReportedError;
use crate::response::Envelope;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Message used for every payload binding or schema validation failure.
pub const INVALID_REQUEST: &str = "Invalid request, check and try again";
/// Message used whenever a record addressed by id does not exist.
pub const RECORD_NOT_FOUND: &str = "Invalid request, record not found";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config load: {0}")]
    Load(String),
    #[error("invalid setting {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}

/// Failures surfaced by a [`Repository`](crate::repository::Repository).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("database: {0}")]
    Db(sqlx::Error),
    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("entity must serialize to a JSON object, got {0}")]
    Shape(&'static str),
    #[error("query exceeded deadline of {0:?}")]
    Timeout(Duration),
    #[error("unsupported predicate: {0}")]
    Unsupported(String),
    #[error("transaction already finalized")]
    TransactionClosed,
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            other => StoreError::Db(other),
        }
    }
}

/// Error returned by a lifecycle hook. The message is sent to the caller verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HookError(pub String);

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        HookError(message.into())
    }
}

impl From<&str> for HookError {
    fn from(message: &str) -> Self {
        HookError(message.to_string())
    }
}

impl From<String> for HookError {
    fn from(message: String) -> Self {
        HookError(message)
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("validation: {message}")]
    Validation { message: String, details: Option<Value> },
    #[error("conflict: {message}")]
    Conflict { message: String, data: Value },
    #[error("not found: {message}")]
    NotFound { message: String, data: Option<Value> },
    #[error("hook: {0}")]
    Hook(#[from] HookError),
    #[error("{message}: {source}")]
    Store { message: String, source: StoreError },
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

impl AppError {
    pub fn invalid(details: Option<Value>) -> Self {
        AppError::Validation {
            message: INVALID_REQUEST.to_string(),
            details,
        }
    }

    pub fn not_found(data: Option<Value>) -> Self {
        AppError::NotFound {
            message: RECORD_NOT_FOUND.to_string(),
            data,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Store { source, .. } if source.is_not_found() => StatusCode::NOT_FOUND,
            AppError::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Db(sqlx::Error::RowNotFound) => StatusCode::NOT_FOUND,
            AppError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Validation { .. }
            | AppError::Conflict { .. }
            | AppError::Hook(_)
            | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = self.to_string();
        if status.is_server_error() {
            tracing::error!(error = %detail, "request failed");
        } else {
            tracing::debug!(error = %detail, status = status.as_u16(), "request rejected");
        }
        let (message, data) = match self {
            AppError::Config(_) | AppError::Db(_) => {
                ("Something went wrong, try again in a bit".to_string(), None)
            }
            AppError::Validation { message, details } => (message, details),
            AppError::Conflict { message, data } => (message, Some(data)),
            AppError::NotFound { message, data } => (message, data),
            AppError::Hook(HookError(message)) => (message, None),
            AppError::Store { message, .. } => (message, None),
            AppError::BadRequest(message) | AppError::Unauthorized(message) => (message, None),
        };
        let mut response = (status, Envelope::failure(message, data)).into_response();
        response.extensions_mut().insert(ReportedError(detail));
        response
    }
}
