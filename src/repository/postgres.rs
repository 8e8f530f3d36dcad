//! PostgreSQL repository: builds statements with [`crate::sql`] and decodes rows through serde.

use super::{data_columns, Repository};
use crate::context::RequestContext;
use crate::entity::Entity;
use crate::error::StoreError;
use crate::sql::{self, PgBindValue, Predicate, QueryBuf};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

/// Deadline applied to each repository call unless overridden.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

pub struct PgRepository<E> {
    pool: PgPool,
    timeout: Duration,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for PgRepository<E> {
    fn clone(&self) -> Self {
        PgRepository {
            pool: self.pool.clone(),
            timeout: self.timeout,
            _entity: PhantomData,
        }
    }
}

/// A connection borrowed for one repository call.
enum Conn {
    /// The request's transaction, locked for this call.
    Tx(OwnedMutexGuard<Option<Transaction<'static, Postgres>>>),
    Pooled(PoolConnection<Postgres>),
    /// A transaction opened for a multi-statement call made outside any request transaction.
    Owned(Transaction<'static, Postgres>),
}

impl Conn {
    fn get(&mut self) -> Result<&mut PgConnection, StoreError> {
        match self {
            Conn::Tx(guard) => guard
                .as_mut()
                .map(|tx| &mut **tx)
                .ok_or(StoreError::TransactionClosed),
            Conn::Pooled(conn) => Ok(&mut **conn),
            Conn::Owned(tx) => Ok(&mut **tx),
        }
    }

    async fn finish(self) -> Result<(), StoreError> {
        if let Conn::Owned(tx) = self {
            tx.commit().await?;
        }
        Ok(())
    }
}

impl<E: Entity> PgRepository<E> {
    pub fn new(pool: PgPool) -> Self {
        PgRepository {
            pool,
            timeout: DEFAULT_QUERY_TIMEOUT,
            _entity: PhantomData,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn acquire(&self, ctx: &RequestContext) -> Result<Conn, StoreError> {
        match ctx.transaction() {
            Some(tx) => Ok(Conn::Tx(tx.lock().await)),
            None => Ok(Conn::Pooled(self.pool.acquire().await?)),
        }
    }

    async fn acquire_atomic(&self, ctx: &RequestContext) -> Result<Conn, StoreError> {
        match ctx.transaction() {
            Some(tx) => Ok(Conn::Tx(tx.lock().await)),
            None => Ok(Conn::Owned(self.pool.begin().await?)),
        }
    }

    async fn deadline<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(table = E::TABLE, timeout = ?self.timeout, "query deadline exceeded");
                Err(StoreError::Timeout(self.timeout))
            }
        }
    }

    async fn insert_all(&self, ctx: &RequestContext, entities: &mut [E], upsert: bool) -> Result<(), StoreError> {
        let mut conn = self.acquire_atomic(ctx).await?;
        for entity in entities.iter_mut() {
            let id = if upsert {
                entity.id().unwrap_or_else(Uuid::new_v4)
            } else {
                Uuid::new_v4()
            };
            let q = sql::insert::<E>(id, &data_columns(&*entity)?, upsert);
            let row = fetch_one(conn.get()?, &q).await?;
            *entity = decode(&row)?;
        }
        conn.finish().await
    }
}

fn by_id(id: Uuid) -> Predicate {
    Predicate::eq("id", id.to_string())
}

fn bind_all<'q>(
    q: &'q QueryBuf,
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(PgBindValue::from(p));
    }
    query
}

async fn fetch_one(conn: &mut PgConnection, q: &QueryBuf) -> Result<PgRow, StoreError> {
    Ok(bind_all(q).fetch_one(conn).await?)
}

async fn fetch_optional(conn: &mut PgConnection, q: &QueryBuf) -> Result<Option<PgRow>, StoreError> {
    Ok(bind_all(q).fetch_optional(conn).await?)
}

async fn fetch_all(conn: &mut PgConnection, q: &QueryBuf) -> Result<Vec<PgRow>, StoreError> {
    Ok(bind_all(q).fetch_all(conn).await?)
}

async fn execute(conn: &mut PgConnection, q: &QueryBuf) -> Result<u64, StoreError> {
    Ok(bind_all(q).execute(conn).await?.rows_affected())
}

fn decode<E: Entity>(row: &PgRow) -> Result<E, StoreError> {
    Ok(serde_json::from_value(row_to_json(row))?)
}

#[async_trait]
impl<E: Entity> Repository<E> for PgRepository<E> {
    async fn create_one(&self, ctx: &RequestContext, entity: &mut E) -> Result<(), StoreError> {
        self.deadline(self.insert_all(ctx, std::slice::from_mut(entity), false))
            .await
    }

    async fn create_many(&self, ctx: &RequestContext, entities: &mut [E]) -> Result<(), StoreError> {
        self.deadline(self.insert_all(ctx, entities, false)).await
    }

    async fn upsert_one(&self, ctx: &RequestContext, entity: &mut E) -> Result<(), StoreError> {
        self.deadline(self.insert_all(ctx, std::slice::from_mut(entity), true))
            .await
    }

    async fn upsert_many(&self, ctx: &RequestContext, entities: &mut [E]) -> Result<(), StoreError> {
        self.deadline(self.insert_all(ctx, entities, true)).await
    }

    async fn update_one(&self, ctx: &RequestContext, id: Uuid, entity: &mut E) -> Result<(), StoreError> {
        let q = sql::update::<E>(&data_columns(&*entity)?, &by_id(id), true);
        self.deadline(async {
            let mut conn = self.acquire(ctx).await?;
            if let Some(row) = fetch_optional(conn.get()?, &q).await? {
                *entity = decode(&row)?;
            }
            Ok(())
        })
        .await
    }

    async fn update_many(&self, ctx: &RequestContext, entity: &E, predicate: &Predicate) -> Result<u64, StoreError> {
        let q = sql::update::<E>(&data_columns(entity)?, predicate, false);
        self.deadline(async {
            let mut conn = self.acquire(ctx).await?;
            execute(conn.get()?, &q).await
        })
        .await
    }

    async fn find_one(&self, ctx: &RequestContext, id: Uuid) -> Result<E, StoreError> {
        let q = sql::select_by_id::<E>(id);
        self.deadline(async {
            let mut conn = self.acquire(ctx).await?;
            match fetch_optional(conn.get()?, &q).await? {
                Some(row) => decode(&row),
                None => Err(StoreError::NotFound),
            }
        })
        .await
    }

    async fn find_many_with_limit(
        &self,
        ctx: &RequestContext,
        limit: i64,
        offset: i64,
        predicate: &Predicate,
    ) -> Result<Vec<E>, StoreError> {
        let q = sql::select_list::<E>(predicate, limit, offset);
        self.deadline(async {
            let mut conn = self.acquire(ctx).await?;
            let rows = fetch_all(conn.get()?, &q).await?;
            rows.iter().map(decode::<E>).collect()
        })
        .await
    }

    async fn delete_one(&self, ctx: &RequestContext, id: Uuid) -> Result<(), StoreError> {
        self.delete_many(ctx, &by_id(id)).await.map(|_| ())
    }

    async fn delete_many(&self, ctx: &RequestContext, predicate: &Predicate) -> Result<u64, StoreError> {
        let q = sql::soft_delete::<E>(predicate);
        self.deadline(async {
            let mut conn = self.acquire(ctx).await?;
            execute(conn.get()?, &q).await
        })
        .await
    }

    async fn count(&self, ctx: &RequestContext, predicate: &Predicate) -> Result<i64, StoreError> {
        let q = sql::count::<E>(predicate);
        self.deadline(async {
            let mut conn = self.acquire(ctx).await?;
            tracing::debug!(sql = %q.sql, params = ?q.params, "query");
            let mut query = sqlx::query_scalar::<_, i64>(&q.sql);
            for p in &q.params {
                query = query.bind(PgBindValue::from(p));
            }
            Ok(query.fetch_one(conn.get()?).await?)
        })
        .await
    }
}

fn row_to_json(row: &PgRow) -> Value {
    use sqlx::Column;
    use sqlx::Row;
    let mut map = serde_json::Map::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    Value::Object(map)
}

fn cell_to_value(row: &PgRow, name: &str) -> Value {
    use sqlx::Row;
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f32>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n as f64) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    Value::Null
}
