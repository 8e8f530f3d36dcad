//! Decodes the `x-user` and `x-workspace` headers into the request context.

use crate::context::{Object, RequestContext};
use axum::{extract::Request, http::HeaderMap, middleware::Next, response::Response};
use base64::{engine::general_purpose::STANDARD, Engine};

pub const USER_HEADER: &str = "x-user";
pub const WORKSPACE_HEADER: &str = "x-workspace";

/// Base64-encoded JSON object to [`Object`]. Anything else yields `None`.
pub fn decode_object(raw: &str) -> Option<Object> {
    let bytes = STANDARD.decode(raw.trim()).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn header_object(headers: &HeaderMap, name: &str) -> Option<Object> {
    let raw = headers.get(name)?.to_str().ok()?;
    if raw.is_empty() {
        return None;
    }
    let decoded = decode_object(raw);
    if decoded.is_none() {
        tracing::warn!(header = name, "ignoring header that is not a base64 JSON object");
    }
    decoded
}

/// Use with `axum::middleware::from_fn(inject)`.
pub async fn inject(mut request: Request, next: Next) -> Response {
    let mut ctx = request
        .extensions_mut()
        .remove::<RequestContext>()
        .unwrap_or_default();
    if let Some(user) = header_object(request.headers(), USER_HEADER) {
        if let Err(e) = ctx.set_user(user) {
            tracing::warn!(error = %e, "user injection");
        }
    }
    if let Some(workspace) = header_object(request.headers(), WORKSPACE_HEADER) {
        if let Err(e) = ctx.set_workspace(workspace) {
            tracing::warn!(error = %e, "workspace injection");
        }
    }
    request.extensions_mut().insert(ctx);
    next.run(request).await
}
