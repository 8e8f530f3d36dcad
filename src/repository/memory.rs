//! In-memory repository for tests and prototypes. Transactions in the context are ignored.

use super::{data_columns, Repository};
use crate::context::RequestContext;
use crate::entity::Entity;
use crate::error::StoreError;
use crate::sql::Predicate;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Rows are kept in insertion order, which stands in for creation order.
pub struct MemoryRepository<E> {
    rows: Arc<RwLock<Vec<E>>>,
}

impl<E> Clone for MemoryRepository<E> {
    fn clone(&self) -> Self {
        MemoryRepository {
            rows: self.rows.clone(),
        }
    }
}

impl<E> Default for MemoryRepository<E> {
    fn default() -> Self {
        MemoryRepository {
            rows: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl<E: Entity> MemoryRepository<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows, soft-deleted ones included.
    pub async fn stored(&self) -> usize {
        self.rows.read().await.len()
    }

    fn stamp_new(entity: &mut E, id: Uuid) {
        let now = Utc::now();
        let record = entity.record_mut();
        record.id = Some(id);
        record.created_at = Some(now);
        record.updated_at = Some(now);
        record.deleted_at = None;
    }

    async fn insert_all(&self, entities: &mut [E], upsert: bool) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;
        for entity in entities.iter_mut() {
            let existing = if upsert {
                entity
                    .id()
                    .and_then(|id| rows.iter().position(|r| r.id() == Some(id)))
            } else {
                None
            };
            match existing {
                Some(pos) => {
                    let created_at = rows[pos].record().created_at;
                    let record = entity.record_mut();
                    record.created_at = created_at;
                    record.updated_at = Some(Utc::now());
                    record.deleted_at = None;
                    rows[pos] = entity.clone();
                }
                None => {
                    let id = if upsert {
                        entity.id().unwrap_or_else(Uuid::new_v4)
                    } else {
                        Uuid::new_v4()
                    };
                    Self::stamp_new(entity, id);
                    rows.push(entity.clone());
                }
            }
        }
        Ok(())
    }

    async fn patch_matching(&self, patch: &E, predicate: &Predicate) -> Result<Vec<E>, StoreError> {
        let changes = data_columns(patch)?;
        let mut rows = self.rows.write().await;
        let mut updated = Vec::new();
        for row in rows.iter_mut() {
            if !is_live(row) || !matches(predicate, &serde_json::to_value(&*row)?)? {
                continue;
            }
            let mut current = serde_json::to_value(&*row)?;
            if let Value::Object(map) = &mut current {
                for (k, v) in changes.iter().filter(|(_, v)| !v.is_null()) {
                    map.insert(k.clone(), v.clone());
                }
            }
            let record = row.record().clone();
            let mut next: E = serde_json::from_value(current)?;
            *next.record_mut() = record;
            next.record_mut().updated_at = Some(Utc::now());
            *row = next.clone();
            updated.push(next);
        }
        Ok(updated)
    }
}

fn is_live<E: Entity>(e: &E) -> bool {
    e.record().deleted_at.is_none()
}

fn field<'a>(row: &'a Value, column: &str) -> &'a Value {
    row.get(column).unwrap_or(&Value::Null)
}

fn same(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn matches(predicate: &Predicate, row: &Value) -> Result<bool, StoreError> {
    Ok(match predicate {
        Predicate::All => true,
        Predicate::Eq(c, v) => same(field(row, c), v),
        Predicate::NotEq(c, Value::Null) => !field(row, c).is_null(),
        Predicate::NotEq(c, v) => {
            let f = field(row, c);
            !f.is_null() && !same(f, v)
        }
        Predicate::In(c, values) => values.iter().any(|v| same(field(row, c), v)),
        Predicate::And(parts) => {
            for p in parts {
                if !matches(p, row)? {
                    return Ok(false);
                }
            }
            true
        }
        Predicate::Or(parts) => {
            for p in parts {
                if matches(p, row)? {
                    return Ok(true);
                }
            }
            false
        }
        Predicate::Raw { sql, .. } => return Err(StoreError::Unsupported(sql.clone())),
    })
}

#[async_trait]
impl<E: Entity> Repository<E> for MemoryRepository<E> {
    async fn create_one(&self, _ctx: &RequestContext, entity: &mut E) -> Result<(), StoreError> {
        self.insert_all(std::slice::from_mut(entity), false).await
    }

    async fn create_many(&self, _ctx: &RequestContext, entities: &mut [E]) -> Result<(), StoreError> {
        self.insert_all(entities, false).await
    }

    async fn upsert_one(&self, _ctx: &RequestContext, entity: &mut E) -> Result<(), StoreError> {
        self.insert_all(std::slice::from_mut(entity), true).await
    }

    async fn upsert_many(&self, _ctx: &RequestContext, entities: &mut [E]) -> Result<(), StoreError> {
        self.insert_all(entities, true).await
    }

    async fn update_one(&self, _ctx: &RequestContext, id: Uuid, entity: &mut E) -> Result<(), StoreError> {
        let updated = self
            .patch_matching(entity, &Predicate::eq("id", id.to_string()))
            .await?;
        if let Some(row) = updated.into_iter().next() {
            *entity = row;
        }
        Ok(())
    }

    async fn update_many(&self, _ctx: &RequestContext, entity: &E, predicate: &Predicate) -> Result<u64, StoreError> {
        Ok(self.patch_matching(entity, predicate).await?.len() as u64)
    }

    async fn find_one(&self, _ctx: &RequestContext, id: Uuid) -> Result<E, StoreError> {
        self.rows
            .read()
            .await
            .iter()
            .find(|r| is_live(*r) && r.id() == Some(id))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn find_many_with_limit(
        &self,
        _ctx: &RequestContext,
        limit: i64,
        offset: i64,
        predicate: &Predicate,
    ) -> Result<Vec<E>, StoreError> {
        let rows = self.rows.read().await;
        let mut out = Vec::new();
        for row in rows.iter().filter(|r| is_live(*r)) {
            if matches(predicate, &serde_json::to_value(row)?)? {
                out.push(row.clone());
            }
        }
        let skip = usize::try_from(offset).unwrap_or(0);
        let take = usize::try_from(limit).unwrap_or(usize::MAX);
        Ok(out.into_iter().skip(skip).take(take).collect())
    }

    async fn delete_one(&self, ctx: &RequestContext, id: Uuid) -> Result<(), StoreError> {
        self.delete_many(ctx, &Predicate::eq("id", id.to_string()))
            .await
            .map(|_| ())
    }

    async fn delete_many(&self, _ctx: &RequestContext, predicate: &Predicate) -> Result<u64, StoreError> {
        let mut rows = self.rows.write().await;
        let now = Utc::now();
        let mut n = 0;
        for row in rows.iter_mut() {
            if is_live(row) && matches(predicate, &serde_json::to_value(&*row)?)? {
                row.record_mut().deleted_at = Some(now);
                n += 1;
            }
        }
        Ok(n)
    }

    async fn count(&self, ctx: &RequestContext, predicate: &Predicate) -> Result<i64, StoreError> {
        Ok(self.find_many(ctx, predicate).await?.len() as i64)
    }
}
