//! Persistence contract for entities, with a PostgreSQL and an in-memory implementation.

mod memory;
mod postgres;

pub use memory::MemoryRepository;
pub use postgres::PgRepository;

use crate::context::RequestContext;
use crate::entity::Entity;
use crate::error::StoreError;
use crate::sql::Predicate;
use async_trait::async_trait;
use uuid::Uuid;

/// Data access for one entity type.
///
/// Every call runs against the transaction carried by `ctx` when present, otherwise on its own
/// connection. Reads, counts, updates and deletes never see soft-deleted rows.
#[async_trait]
pub trait Repository<E: Entity>: Send + Sync {
    /// Insert with a generated id and server timestamps; `entity` is refreshed from the stored row.
    async fn create_one(&self, ctx: &RequestContext, entity: &mut E) -> Result<(), StoreError>;

    async fn create_many(&self, ctx: &RequestContext, entities: &mut [E]) -> Result<(), StoreError>;

    /// Insert, or replace the row with the same id. Generates an id when absent.
    async fn upsert_one(&self, ctx: &RequestContext, entity: &mut E) -> Result<(), StoreError>;

    async fn upsert_many(&self, ctx: &RequestContext, entities: &mut [E]) -> Result<(), StoreError>;

    /// Partial update of the non-null data fields of `entity`. Matching no row is not an error.
    async fn update_one(&self, ctx: &RequestContext, id: Uuid, entity: &mut E) -> Result<(), StoreError>;

    /// Partial update of every row matching `predicate`; returns the number of rows changed.
    async fn update_many(&self, ctx: &RequestContext, entity: &E, predicate: &Predicate) -> Result<u64, StoreError>;

    async fn find_one(&self, ctx: &RequestContext, id: Uuid) -> Result<E, StoreError>;

    async fn find_many(&self, ctx: &RequestContext, predicate: &Predicate) -> Result<Vec<E>, StoreError> {
        self.find_many_with_limit(ctx, -1, -1, predicate).await
    }

    async fn find_all(&self, ctx: &RequestContext) -> Result<Vec<E>, StoreError> {
        self.find_many(ctx, &Predicate::All).await
    }

    /// Rows ordered by creation. A negative `limit` is unbounded and a negative `offset` skips nothing.
    async fn find_many_with_limit(
        &self,
        ctx: &RequestContext,
        limit: i64,
        offset: i64,
        predicate: &Predicate,
    ) -> Result<Vec<E>, StoreError>;

    async fn delete_one(&self, ctx: &RequestContext, id: Uuid) -> Result<(), StoreError>;

    async fn delete_many(&self, ctx: &RequestContext, predicate: &Predicate) -> Result<u64, StoreError>;

    async fn count(&self, ctx: &RequestContext, predicate: &Predicate) -> Result<i64, StoreError>;
}

/// Serialize an entity to its column map, keeping only declared data columns.
pub(crate) fn data_columns<E: Entity>(entity: &E) -> Result<serde_json::Map<String, serde_json::Value>, StoreError> {
    match serde_json::to_value(entity)? {
        serde_json::Value::Object(mut map) => {
            map.retain(|k, _| E::columns().iter().any(|c| c.name == k));
            Ok(map)
        }
        serde_json::Value::Array(_) => Err(StoreError::Shape("array")),
        _ => Err(StoreError::Shape("scalar")),
    }
}
