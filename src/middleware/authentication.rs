//! Rejects requests the identity service does not authenticate; stores the returned user and
//! workspace in the request context.

use crate::context::RequestContext;
use crate::error::AppError;
use crate::identity::IdentityClient;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

pub const UNAUTHENTICATED: &str = "Unauthorized, check credentials and try again";

/// Use with `axum::middleware::from_fn_with_state(identity, authenticate)`.
pub async fn authenticate(
    State(identity): State<Arc<IdentityClient>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let headers: Vec<(String, String)> = request
        .headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect();
    let uri = request.uri().to_string();
    let auth = identity
        .authenticate(request.method().as_str(), &uri, &headers)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "authentication check failed");
            AppError::Unauthorized(UNAUTHENTICATED.to_string())
        })?;
    if !auth.status {
        return Err(AppError::Unauthorized(UNAUTHENTICATED.to_string()));
    }

    let mut ctx = request
        .extensions_mut()
        .remove::<RequestContext>()
        .unwrap_or_default();
    if let Some(user) = auth.user {
        if let Err(e) = ctx.set_user(user) {
            tracing::warn!(error = %e, "authenticated user");
        }
    }
    if let Some(workspace) = auth.workspace {
        if let Err(e) = ctx.set_workspace(workspace) {
            tracing::warn!(error = %e, "authenticated workspace");
        }
    }
    request.extensions_mut().insert(ctx);
    Ok(next.run(request).await)
}
