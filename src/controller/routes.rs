//! Conventional HTTP layout for a [`Controller`].

use super::{Controller, ListQuery};
use crate::context::RequestContext;
use crate::entity::Entity;
use crate::error::AppError;
use crate::response::Envelope;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;

type Shared<E> = State<Arc<Controller<E>>>;

impl<E: Entity> Controller<E> {
    /// `GET /`, `POST /`, `PUT /`, `POST /many`, `PUT /many`, `GET|PATCH|DELETE /:id`,
    /// `PATCH|DELETE /many/:ids` (ids comma-separated).
    pub fn routes(self) -> Router {
        Router::new()
            .route("/", get(find_many::<E>).post(create_one::<E>).put(upsert_one::<E>))
            .route("/many", post(create_many::<E>).put(upsert_many::<E>))
            .route(
                "/many/:ids",
                patch(update_many::<E>).delete(delete_many::<E>),
            )
            .route(
                "/:id",
                get(find_one::<E>).patch(update_one::<E>).delete(delete_one::<E>),
            )
            .with_state(Arc::new(self))
    }
}

async fn create_one<E: Entity>(State(c): Shared<E>, ctx: RequestContext, body: Bytes) -> Result<Envelope<E>, AppError> {
    c.create_one(&ctx, &body).await
}

async fn create_many<E: Entity>(
    State(c): Shared<E>,
    ctx: RequestContext,
    body: Bytes,
) -> Result<Envelope<Vec<E>>, AppError> {
    c.create_many(&ctx, &body).await
}

async fn upsert_one<E: Entity>(State(c): Shared<E>, ctx: RequestContext, body: Bytes) -> Result<Envelope<E>, AppError> {
    c.upsert_one(&ctx, &body).await
}

async fn upsert_many<E: Entity>(
    State(c): Shared<E>,
    ctx: RequestContext,
    body: Bytes,
) -> Result<Envelope<Vec<E>>, AppError> {
    c.upsert_many(&ctx, &body).await
}

async fn find_one<E: Entity>(State(c): Shared<E>, ctx: RequestContext, Path(id): Path<String>) -> Result<Envelope<E>, AppError> {
    c.find_one(&ctx, &id).await
}

async fn find_many<E: Entity>(
    State(c): Shared<E>,
    ctx: RequestContext,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Envelope<Vec<E>>, AppError> {
    c.find_many(&ctx, &ListQuery::parse(&pairs)).await
}

async fn update_one<E: Entity>(
    State(c): Shared<E>,
    ctx: RequestContext,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Envelope<E>, AppError> {
    c.update_one(&ctx, &id, &body).await
}

async fn update_many<E: Entity>(
    State(c): Shared<E>,
    ctx: RequestContext,
    Path(ids): Path<String>,
    body: Bytes,
) -> Result<Envelope<Vec<E>>, AppError> {
    c.update_many(&ctx, &ids, &body).await
}

async fn delete_one<E: Entity>(State(c): Shared<E>, ctx: RequestContext, Path(id): Path<String>) -> Result<Envelope<()>, AppError> {
    c.delete_one(&ctx, &id).await
}

async fn delete_many<E: Entity>(
    State(c): Shared<E>,
    ctx: RequestContext,
    Path(ids): Path<String>,
) -> Result<Envelope<()>, AppError> {
    c.delete_many(&ctx, &ids).await
}
