//! Binds one database transaction to each request and finalizes it from the handler's outcome.

use crate::context::{RequestContext, TxHandle};
use crate::response::Envelope;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures::FutureExt;
use sqlx::PgPool;
use std::panic::AssertUnwindSafe;

/// Marker a handler leaves in the response extensions when it reported an error.
/// [`AppError`](crate::error::AppError) responses always carry it.
#[derive(Clone, Debug)]
pub struct ReportedError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackReason {
    Panic,
    ReportedError,
    Status(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Commit,
    Rollback(RollbackReason),
}

/// Panics win over reported errors, which win over a non-2xx status.
pub fn decide(panicked: bool, reported: bool, status: StatusCode) -> Outcome {
    if panicked {
        Outcome::Rollback(RollbackReason::Panic)
    } else if reported {
        Outcome::Rollback(RollbackReason::ReportedError)
    } else if !status.is_success() {
        Outcome::Rollback(RollbackReason::Status(status.as_u16()))
    } else {
        Outcome::Commit
    }
}

/// Use with `axum::middleware::from_fn_with_state(pool, transaction)`.
///
/// A request that already carries a transaction passes through untouched.
pub async fn transaction(State(pool): State<PgPool>, mut request: Request, next: Next) -> Response {
    let mut ctx = request
        .extensions_mut()
        .remove::<RequestContext>()
        .unwrap_or_default();
    if ctx.transaction().is_some() {
        request.extensions_mut().insert(ctx);
        return next.run(request).await;
    }

    let tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(e) => {
            tracing::error!(error = %e, "cannot begin transaction");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let handle = TxHandle::new(tx);
    if let Err(e) = ctx.set_transaction(handle.clone()) {
        tracing::warn!(error = %e, "transaction slot");
    }
    request.extensions_mut().insert(ctx);

    let (response, panicked) = match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => (response, false),
        Err(_) => {
            tracing::error!("handler panicked; rolling back");
            let response = (
                StatusCode::INTERNAL_SERVER_ERROR,
                Envelope::failure("Something went wrong, try again in a bit", None),
            )
                .into_response();
            (response, true)
        }
    };

    let reported = response.extensions().get::<ReportedError>().is_some();
    let Some(tx) = handle.take().await else {
        tracing::warn!("transaction finalized before the request completed");
        return response;
    };
    match decide(panicked, reported, response.status()) {
        Outcome::Commit => {
            if let Err(e) = tx.commit().await {
                tracing::error!(error = %e, "cannot commit transaction");
            }
        }
        Outcome::Rollback(reason) => {
            tracing::debug!(?reason, "rolling back transaction");
            if let Err(e) = tx.rollback().await {
                tracing::error!(error = %e, "cannot rollback transaction");
            }
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_only_on_clean_success() {
        assert_eq!(decide(false, false, StatusCode::OK), Outcome::Commit);
        assert_eq!(decide(false, false, StatusCode::NO_CONTENT), Outcome::Commit);
    }

    #[test]
    fn rollback_reasons_in_priority_order() {
        assert_eq!(
            decide(true, true, StatusCode::OK),
            Outcome::Rollback(RollbackReason::Panic)
        );
        assert_eq!(
            decide(false, true, StatusCode::OK),
            Outcome::Rollback(RollbackReason::ReportedError)
        );
        assert_eq!(
            decide(false, false, StatusCode::BAD_REQUEST),
            Outcome::Rollback(RollbackReason::Status(400))
        );
        assert_eq!(
            decide(false, false, StatusCode::MOVED_PERMANENTLY),
            Outcome::Rollback(RollbackReason::Status(301))
        );
    }
}
