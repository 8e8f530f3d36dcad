//! Request-scoped values: the active transaction, the authenticated user and the workspace.
//!
//! Middlewares take the context out of the request extensions, fill a slot, and put it back.
//! Handlers receive it through the [`RequestContext`] extractor.

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use serde_json::{Map, Value};
use sqlx::{Postgres, Transaction};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// JSON object carried for the user and the workspace.
pub type Object = Map<String, Value>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ContextError {
    #[error("{0} already set on request context")]
    AlreadySet(&'static str),
}

/// Shared handle to a request's transaction. The slot becomes `None` once committed or rolled back.
#[derive(Clone)]
pub struct TxHandle(Arc<Mutex<Option<Transaction<'static, Postgres>>>>);

impl std::fmt::Debug for TxHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TxHandle")
    }
}

impl TxHandle {
    pub fn new(tx: Transaction<'static, Postgres>) -> Self {
        TxHandle(Arc::new(Mutex::new(Some(tx))))
    }

    /// Lock the transaction for the duration of one statement.
    pub async fn lock(&self) -> OwnedMutexGuard<Option<Transaction<'static, Postgres>>> {
        self.0.clone().lock_owned().await
    }

    /// Remove the transaction so it can be committed or rolled back.
    pub async fn take(&self) -> Option<Transaction<'static, Postgres>> {
        self.0.lock().await.take()
    }
}

#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    transaction: Option<TxHandle>,
    user: Option<Arc<Object>>,
    workspace: Option<Arc<Object>>,
}

impl RequestContext {
    pub fn transaction(&self) -> Option<&TxHandle> {
        self.transaction.as_ref()
    }

    pub fn user(&self) -> Option<&Object> {
        self.user.as_deref()
    }

    pub fn workspace(&self) -> Option<&Object> {
        self.workspace.as_deref()
    }

    pub fn set_transaction(&mut self, tx: TxHandle) -> Result<(), ContextError> {
        if self.transaction.is_some() {
            return Err(ContextError::AlreadySet("transaction"));
        }
        self.transaction = Some(tx);
        Ok(())
    }

    pub fn set_user(&mut self, user: Object) -> Result<(), ContextError> {
        if self.user.is_some() {
            return Err(ContextError::AlreadySet("user"));
        }
        self.user = Some(Arc::new(user));
        Ok(())
    }

    pub fn set_workspace(&mut self, workspace: Object) -> Result<(), ContextError> {
        if self.workspace.is_some() {
            return Err(ContextError::AlreadySet("workspace"));
        }
        self.workspace = Some(Arc::new(workspace));
        Ok(())
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_default())
    }
}
