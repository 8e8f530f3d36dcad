//! Standard response envelope: `{status, message, data?, meta?}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Serialize, Debug, Clone)]
pub struct Envelope<T> {
    pub status: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<PageMeta>,
}

/// Pagination metadata for list responses. `prev` and `next` are 0 when there is no such page.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageMeta {
    pub page: u64,
    pub per_page: u64,
    pub total: u64,
    pub prev: u64,
    pub next: u64,
}

impl PageMeta {
    pub fn new(page: u64, per_page: u64, total: u64) -> Self {
        let per_page = per_page.max(1);
        let page = page.max(1);
        let last_page = total.div_ceil(per_page);
        let next = if page < last_page { page + 1 } else { 0 };
        PageMeta {
            page,
            per_page,
            total,
            prev: page - 1,
            next,
        }
    }

    pub fn last_page(&self) -> u64 {
        self.total.div_ceil(self.per_page)
    }
}

impl<T> Envelope<T> {
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Envelope {
            status: true,
            message: message.into(),
            data: Some(data),
            meta: None,
        }
    }

    pub fn with_meta(mut self, meta: PageMeta) -> Self {
        self.meta = Some(meta);
        self
    }
}

impl Envelope<Value> {
    pub fn failure(message: impl Into<String>, data: Option<Value>) -> Self {
        Envelope {
            status: false,
            message: message.into(),
            data,
            meta: None,
        }
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Failure envelope with an explicit status code; a zero code means 400.
pub fn error_with_code(code: u16, message: impl Into<String>, data: Option<Value>) -> Response {
    let status = match code {
        0 => StatusCode::BAD_REQUEST,
        n => StatusCode::from_u16(n).unwrap_or(StatusCode::BAD_REQUEST),
    };
    (status, Json(Envelope::failure(message, data))).into_response()
}
