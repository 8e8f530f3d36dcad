//! Generic CRUD controller over a [`Repository`].
//!
//! Each operation binds and validates the payload, runs the lifecycle morphs and hooks around the
//! repository call, and answers with an [`Envelope`]. Failures are [`AppError`]s; the transaction
//! middleware rolls back whenever one is returned.

mod lifecycle;
mod query;
mod routes;

pub use lifecycle::{Hook, Lifecycle, Morph, Phase};
pub use query::{Joiner, ListQuery, DEFAULT_PAGE, DEFAULT_PER_PAGE};

use crate::context::RequestContext;
use crate::entity::Entity;
use crate::error::{AppError, HookError, StoreError};
use crate::repository::Repository;
use crate::response::{Envelope, PageMeta};
use crate::sql::Predicate;
use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Separator for the id list in bulk update and delete paths.
pub const ID_DELIMITER: char = ',';

type Unique<E> = Arc<dyn Fn(&E) -> Predicate + Send + Sync>;

pub struct Controller<E: Entity> {
    repository: Arc<dyn Repository<E>>,
    name: String,
    plural: String,
    searchable: Vec<&'static str>,
    unique: Option<Unique<E>>,
    lifecycle: Lifecycle<E>,
}

impl<E: Entity> Controller<E> {
    pub fn new(repository: Arc<dyn Repository<E>>, name: impl Into<String>, plural: impl Into<String>) -> Self {
        Controller {
            repository,
            name: name.into(),
            plural: plural.into(),
            searchable: Vec::new(),
            unique: None,
            lifecycle: Lifecycle::default(),
        }
    }

    /// Fields list queries may filter on. Empty means every entity column.
    pub fn searchable(mut self, fields: &[&'static str]) -> Self {
        self.searchable = fields.to_vec();
        self
    }

    /// Predicate matching records that would duplicate the given entity. Checked against stored
    /// records and, for batch creates, against earlier entries of the same batch by comparing
    /// the predicates each entry produces.
    pub fn unique<F>(mut self, f: F) -> Self
    where
        F: Fn(&E) -> Predicate + Send + Sync + 'static,
    {
        self.unique = Some(Arc::new(f));
        self
    }

    pub fn morph<F>(mut self, phase: Phase, f: F) -> Self
    where
        F: Fn(&mut E, &RequestContext) + Send + Sync + 'static,
    {
        self.lifecycle.set_morph(phase, f);
        self
    }

    pub fn hook<F>(mut self, phase: Phase, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut E, &'a RequestContext) -> BoxFuture<'a, Result<(), HookError>>
            + Send
            + Sync
            + 'static,
    {
        self.lifecycle.set_hook(phase, f);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn plural(&self) -> &str {
        &self.plural
    }

    /// Conventional mount point, `/<plural>`.
    pub fn mount_path(&self) -> String {
        format!("/{}", self.plural)
    }

    fn store_error(&self, action: &str, source: StoreError) -> AppError {
        AppError::Store {
            message: format!("Unable to {} {} record, try again in a bit", action, self.name),
            source,
        }
    }

    fn conflict(&self, entity: &E) -> AppError {
        AppError::Conflict {
            message: format!("A similar {} record exist, check and try again", self.name),
            data: serde_json::to_value(entity).unwrap_or(Value::Null),
        }
    }

    /// Fails with a conflict when another live record matches the uniqueness predicate.
    /// `except` excludes the record being updated.
    async fn ensure_unique(&self, ctx: &RequestContext, entity: &E, except: Option<&str>) -> Result<(), AppError> {
        let Some(unique) = &self.unique else {
            return Ok(());
        };
        let mut predicate = unique(entity);
        if let Some(id) = except {
            predicate = predicate.and(Predicate::not_eq("id", id));
        }
        let existing = self.repository.count(ctx, &predicate).await.map_err(|e| {
            tracing::error!(entity = %self.name, error = %e, "uniqueness check failed");
            AppError::BadRequest("Something went wrong, check and try again".into())
        })?;
        if existing > 0 {
            return Err(self.conflict(entity));
        }
        Ok(())
    }

    /// Rejects a batch in which two entries produce the same uniqueness predicate.
    fn ensure_unique_within(&self, entities: &[E]) -> Result<(), AppError> {
        let Some(unique) = &self.unique else {
            return Ok(());
        };
        let mut seen: Vec<Predicate> = Vec::with_capacity(entities.len());
        for entity in entities {
            let predicate = unique(entity);
            if seen.contains(&predicate) {
                return Err(self.conflict(entity));
            }
            seen.push(predicate);
        }
        Ok(())
    }

    /// Fetch by path id. An id that is not a UUID cannot exist, so it is reported as not found.
    async fn fetch(&self, ctx: &RequestContext, raw: &str, with_id: bool) -> Result<E, AppError> {
        let data = with_id.then(|| json!({ "id": raw }));
        let id = Uuid::parse_str(raw.trim()).map_err(|_| AppError::not_found(data.clone()))?;
        match self.repository.find_one(ctx, id).await {
            Ok(entity) => Ok(entity),
            Err(StoreError::NotFound) => Err(AppError::not_found(data)),
            Err(e) => Err(self.store_error("retrieve", e)),
        }
    }

    async fn before_read(&self, ctx: &RequestContext) -> Result<(), AppError> {
        let mut blank = E::default();
        self.lifecycle.morph(Phase::BeforeRead, &mut blank, ctx);
        self.lifecycle.hook(Phase::BeforeRead, &mut blank, ctx).await?;
        Ok(())
    }

    pub async fn create_one(&self, ctx: &RequestContext, body: &[u8]) -> Result<Envelope<E>, AppError> {
        let mut entity: E = bind_one(body)?;
        self.lifecycle.morph(Phase::BeforeCreate, &mut entity, ctx);
        self.ensure_unique(ctx, &entity, None).await?;
        self.lifecycle.hook(Phase::BeforeCreate, &mut entity, ctx).await?;
        self.repository
            .create_one(ctx, &mut entity)
            .await
            .map_err(|e| self.store_error("save", e))?;
        self.lifecycle.hook(Phase::AfterCreate, &mut entity, ctx).await?;
        self.lifecycle.morph(Phase::AfterCreate, &mut entity, ctx);
        Ok(Envelope::success(
            format!("{} record saved successfully", self.name),
            entity,
        ))
    }

    pub async fn create_many(&self, ctx: &RequestContext, body: &[u8]) -> Result<Envelope<Vec<E>>, AppError> {
        let mut entities: Vec<E> = bind_many(body)?;
        self.lifecycle.morph_all(Phase::BeforeCreate, &mut entities, ctx);
        self.ensure_unique_within(&entities)?;
        for entity in &entities {
            self.ensure_unique(ctx, entity, None).await?;
        }
        self.lifecycle.hook_all(Phase::BeforeCreate, &mut entities, ctx).await?;
        self.repository
            .create_many(ctx, &mut entities)
            .await
            .map_err(|e| self.store_error("save", e))?;
        self.lifecycle.hook_all(Phase::AfterCreate, &mut entities, ctx).await?;
        self.lifecycle.morph_all(Phase::AfterCreate, &mut entities, ctx);
        Ok(Envelope::success(
            format!("{} records saved successfully", self.name),
            entities,
        ))
    }

    pub async fn upsert_one(&self, ctx: &RequestContext, body: &[u8]) -> Result<Envelope<E>, AppError> {
        let mut entity: E = bind_one(body)?;
        self.lifecycle.morph(Phase::BeforeCreate, &mut entity, ctx);
        self.lifecycle.hook(Phase::BeforeCreate, &mut entity, ctx).await?;
        self.repository
            .upsert_one(ctx, &mut entity)
            .await
            .map_err(|e| self.store_error("save", e))?;
        self.lifecycle.hook(Phase::AfterCreate, &mut entity, ctx).await?;
        self.lifecycle.morph(Phase::AfterCreate, &mut entity, ctx);
        Ok(Envelope::success(
            format!("{} record saved successfully", self.name),
            entity,
        ))
    }

    pub async fn upsert_many(&self, ctx: &RequestContext, body: &[u8]) -> Result<Envelope<Vec<E>>, AppError> {
        let mut entities: Vec<E> = bind_many(body)?;
        self.lifecycle.morph_all(Phase::BeforeCreate, &mut entities, ctx);
        self.lifecycle.hook_all(Phase::BeforeCreate, &mut entities, ctx).await?;
        self.repository
            .upsert_many(ctx, &mut entities)
            .await
            .map_err(|e| self.store_error("save", e))?;
        self.lifecycle.hook_all(Phase::AfterCreate, &mut entities, ctx).await?;
        self.lifecycle.morph_all(Phase::AfterCreate, &mut entities, ctx);
        Ok(Envelope::success(
            format!("{} records saved successfully", self.name),
            entities,
        ))
    }

    pub async fn update_one(&self, ctx: &RequestContext, id: &str, body: &[u8]) -> Result<Envelope<E>, AppError> {
        let mut entity: E = bind_one(body)?;
        let current = self.fetch(ctx, id, false).await?;
        let id = current.id().unwrap_or_default();
        self.lifecycle.morph(Phase::BeforeUpdate, &mut entity, ctx);
        self.ensure_unique(ctx, &entity, Some(&id.to_string())).await?;
        self.lifecycle.hook(Phase::BeforeUpdate, &mut entity, ctx).await?;
        self.repository
            .update_one(ctx, id, &mut entity)
            .await
            .map_err(|e| self.store_error("update", e))?;
        self.lifecycle.hook(Phase::AfterUpdate, &mut entity, ctx).await?;
        self.lifecycle.morph(Phase::AfterUpdate, &mut entity, ctx);
        Ok(Envelope::success(
            format!("{} record updated successfully", self.name),
            entity,
        ))
    }

    /// Applies one payload to every listed record. Each id must exist; the payload passes the
    /// uniqueness check against every id it is applied to.
    pub async fn update_many(&self, ctx: &RequestContext, ids: &str, body: &[u8]) -> Result<Envelope<Vec<E>>, AppError> {
        let mut payload: E = bind_one(body)?;
        let ids = split_ids(ids)?;
        for id in &ids {
            self.fetch(ctx, id, true).await?;
        }
        self.lifecycle.morph(Phase::BeforeUpdate, &mut payload, ctx);
        for id in &ids {
            self.ensure_unique(ctx, &payload, Some(id)).await?;
        }
        self.lifecycle.hook(Phase::BeforeUpdate, &mut payload, ctx).await?;

        let matching = Predicate::is_in("id", ids.iter().map(String::as_str));
        self.repository
            .update_many(ctx, &payload, &matching)
            .await
            .map_err(|e| self.store_error("update", e))?;
        let mut updated = self
            .repository
            .find_many(ctx, &matching)
            .await
            .map_err(|e| self.store_error("retrieve", e))?;

        self.lifecycle.hook_all(Phase::AfterUpdate, &mut updated, ctx).await?;
        self.lifecycle.morph_all(Phase::AfterUpdate, &mut updated, ctx);
        Ok(Envelope::success(
            format!("{} records updated successfully", self.name),
            updated,
        ))
    }

    pub async fn find_one(&self, ctx: &RequestContext, id: &str) -> Result<Envelope<E>, AppError> {
        self.before_read(ctx).await?;
        let mut entity = self.fetch(ctx, id, false).await?;
        self.lifecycle.hook(Phase::AfterRead, &mut entity, ctx).await?;
        self.lifecycle.morph(Phase::AfterRead, &mut entity, ctx);
        Ok(Envelope::success(
            format!("{} record retrieved successfully", self.name),
            entity,
        ))
    }

    pub async fn find_many(&self, ctx: &RequestContext, query: &ListQuery) -> Result<Envelope<Vec<E>>, AppError> {
        self.before_read(ctx).await?;
        let predicate = query.predicate::<E>(&self.searchable);
        tracing::debug!(entity = %self.name, ?predicate, page = query.page, per_page = query.per_page, "list");

        let total = self
            .repository
            .count(ctx, &predicate)
            .await
            .map_err(|e| self.store_error("retrieve", e))?;
        let mut entities = self
            .repository
            .find_many_with_limit(ctx, clamp_i64(query.per_page), clamp_i64(query.offset()), &predicate)
            .await
            .map_err(|e| self.store_error("retrieve", e))?;

        self.lifecycle.hook_all(Phase::AfterRead, &mut entities, ctx).await?;
        self.lifecycle.morph_all(Phase::AfterRead, &mut entities, ctx);
        let meta = PageMeta::new(query.page, query.per_page, total.max(0) as u64);
        Ok(Envelope::success(
            format!("{} records retrieved successfully", self.name),
            entities,
        )
        .with_meta(meta))
    }

    pub async fn delete_one(&self, ctx: &RequestContext, id: &str) -> Result<Envelope<()>, AppError> {
        let mut entity = self.fetch(ctx, id, false).await?;
        let id = entity.id().unwrap_or_default();
        self.lifecycle.morph(Phase::BeforeDelete, &mut entity, ctx);
        self.lifecycle.hook(Phase::BeforeDelete, &mut entity, ctx).await?;
        self.repository
            .delete_one(ctx, id)
            .await
            .map_err(|e| self.store_error("remove", e))?;
        self.lifecycle.hook(Phase::AfterDelete, &mut entity, ctx).await?;
        self.lifecycle.morph(Phase::AfterDelete, &mut entity, ctx);
        Ok(Envelope::success(
            format!("{} record removed successfully", self.name),
            (),
        ))
    }

    pub async fn delete_many(&self, ctx: &RequestContext, ids: &str) -> Result<Envelope<()>, AppError> {
        let ids = split_ids(ids)?;
        let mut entities = Vec::with_capacity(ids.len());
        for id in &ids {
            entities.push(self.fetch(ctx, id, true).await?);
        }
        self.lifecycle.morph_all(Phase::BeforeDelete, &mut entities, ctx);
        self.lifecycle.hook_all(Phase::BeforeDelete, &mut entities, ctx).await?;
        let matching = Predicate::is_in("id", ids.iter().map(String::as_str));
        self.repository
            .delete_many(ctx, &matching)
            .await
            .map_err(|e| self.store_error("remove", e))?;
        self.lifecycle.hook_all(Phase::AfterDelete, &mut entities, ctx).await?;
        self.lifecycle.morph_all(Phase::AfterDelete, &mut entities, ctx);
        Ok(Envelope::success(
            format!("{} records removed successfully", self.name),
            (),
        ))
    }
}

/// Comma-separated ids, trimmed, empties dropped.
fn clamp_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn split_ids(raw: &str) -> Result<Vec<String>, AppError> {
    let ids: Vec<String> = raw
        .split(ID_DELIMITER)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    if ids.is_empty() {
        return Err(AppError::invalid(None));
    }
    Ok(ids)
}

fn parse_error(e: serde_json::Error) -> AppError {
    AppError::invalid(Some(json!({ "body": e.to_string() })))
}

fn bind_one<E: Entity>(body: &[u8]) -> Result<E, AppError> {
    let entity: E = serde_json::from_slice(body).map_err(parse_error)?;
    entity
        .validate()
        .map_err(|e| AppError::invalid(serde_json::to_value(&e).ok()))?;
    Ok(entity)
}

/// Validation errors are keyed by the element index.
fn bind_many<E: Entity>(body: &[u8]) -> Result<Vec<E>, AppError> {
    let entities: Vec<E> = serde_json::from_slice(body).map_err(parse_error)?;
    let mut errors = Map::new();
    for (i, entity) in entities.iter().enumerate() {
        if let Err(e) = entity.validate() {
            errors.insert(i.to_string(), serde_json::to_value(&e).unwrap_or(Value::Null));
        }
    }
    if !errors.is_empty() {
        return Err(AppError::invalid(Some(Value::Object(errors))));
    }
    Ok(entities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::tests::{widget, Widget};
    use crate::repository::MemoryRepository;
    use axum::http::StatusCode;
    use futures::FutureExt;

    fn controller(repo: &MemoryRepository<Widget>) -> Controller<Widget> {
        Controller::new(Arc::new(repo.clone()), "Widget", "widgets")
            .unique(|w: &Widget| Predicate::eq("name", w.name.clone()))
    }

    fn ctx() -> RequestContext {
        RequestContext::default()
    }

    #[tokio::test]
    async fn create_then_conflict() {
        let repo = MemoryRepository::new();
        let c = controller(&repo);
        let created = c.create_one(&ctx(), br#"{"name":"a"}"#).await.unwrap();
        assert_eq!(created.message, "Widget record saved successfully");
        assert!(created.data.as_ref().and_then(Widget::id).is_some());

        let err = c.create_one(&ctx(), br#"{"name":"a"}"#).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(matches!(
            &err,
            AppError::Conflict { message, .. } if message == "A similar Widget record exist, check and try again"
        ));
        assert_eq!(repo.stored().await, 1);
    }

    #[tokio::test]
    async fn duplicate_within_batch_is_a_conflict() {
        let repo = MemoryRepository::new();
        let c = controller(&repo);
        let err = c
            .create_many(&ctx(), br#"[{"name":"twin"},{"name":"other"},{"name":"twin"}]"#)
            .await
            .unwrap_err();
        assert!(matches!(
            &err,
            AppError::Conflict { data, .. } if data["name"] == "twin"
        ));
        assert_eq!(repo.stored().await, 0);

        let ok = c
            .create_many(&ctx(), br#"[{"name":"twin"},{"name":"other"}]"#)
            .await
            .unwrap();
        assert_eq!(ok.data.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn huge_page_lists_nothing() {
        let c = controller(&MemoryRepository::new());
        c.create_one(&ctx(), br#"{"name":"a"}"#).await.unwrap();
        let query = ListQuery::parse(&[
            ("page".to_string(), "9223372036854775807".to_string()),
            ("per_page".to_string(), "100".to_string()),
        ]);
        let env = c.find_many(&ctx(), &query).await.unwrap();
        assert!(env.data.unwrap().is_empty());
        let meta = env.meta.unwrap();
        assert_eq!((meta.total, meta.next), (1, 0));
    }

    #[tokio::test]
    async fn invalid_payloads_are_rejected() {
        let c = controller(&MemoryRepository::new());
        let err = c.create_one(&ctx(), br#"{"name":""}"#).await.unwrap_err();
        assert!(matches!(&err, AppError::Validation { details: Some(_), .. }));
        let err = c.create_one(&ctx(), b"not json").await.unwrap_err();
        assert_eq!(err.to_string(), "validation: Invalid request, check and try again");

        let err = c
            .create_many(&ctx(), br#"[{"name":"ok"},{"name":""}]"#)
            .await
            .unwrap_err();
        match err {
            AppError::Validation { details: Some(d), .. } => {
                assert!(d.get("1").is_some());
                assert!(d.get("0").is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn before_create_hook_vetoes() {
        let repo = MemoryRepository::new();
        let c = controller(&repo).hook(Phase::BeforeCreate, |w, _| {
            async move {
                if w.name == "blocked" {
                    return Err(HookError::new("name is blocked"));
                }
                Ok(())
            }
            .boxed()
        });
        let err = c.create_one(&ctx(), br#"{"name":"blocked"}"#).await.unwrap_err();
        assert!(matches!(&err, AppError::Hook(h) if h.0 == "name is blocked"));
        assert_eq!(repo.stored().await, 0);
    }

    #[tokio::test]
    async fn morphs_shape_input_and_output() {
        let c = controller(&MemoryRepository::new())
            .morph(Phase::BeforeCreate, |w, _| w.name = w.name.to_uppercase())
            .morph(Phase::AfterCreate, |w, _| w.size = Some(w.name.len() as i64));
        let env = c.create_one(&ctx(), br#"{"name":"abc"}"#).await.unwrap();
        let w = env.data.unwrap();
        assert_eq!(w.name, "ABC");
        assert_eq!(w.size, Some(3));
    }

    #[tokio::test]
    async fn update_checks_uniqueness_against_others() {
        let repo = MemoryRepository::new();
        let c = controller(&repo);
        let a = c.create_one(&ctx(), br#"{"name":"a"}"#).await.unwrap().data.unwrap();
        c.create_one(&ctx(), br#"{"name":"b"}"#).await.unwrap();
        let id = a.id().unwrap().to_string();

        let same = c.update_one(&ctx(), &id, br#"{"name":"a","size":4}"#).await.unwrap();
        assert_eq!(same.data.unwrap().size, Some(4));

        let err = c.update_one(&ctx(), &id, br#"{"name":"b"}"#).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));

        let err = c.update_one(&ctx(), "not-a-uuid", br#"{"name":"z"}"#).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bulk_update_and_delete() {
        let repo = MemoryRepository::new();
        let c = Controller::new(Arc::new(repo.clone()), "Widget", "widgets");
        let rows = c
            .create_many(&ctx(), br#"[{"name":"a"},{"name":"b"},{"name":"c"}]"#)
            .await
            .unwrap()
            .data
            .unwrap();
        let ids: Vec<String> = rows.iter().filter_map(Widget::id).map(|u| u.to_string()).collect();
        let two = format!("{},{}", ids[0], ids[1]);

        let updated = c
            .update_many(&ctx(), &two, br#"{"name":"same","active":true}"#)
            .await
            .unwrap()
            .data
            .unwrap();
        assert_eq!(updated.len(), 2);
        assert!(updated.iter().all(|w| w.name == "same" && w.active == Some(true)));

        let missing = Uuid::new_v4().to_string();
        let err = c
            .delete_many(&ctx(), &format!("{},{}", ids[2], missing))
            .await
            .unwrap_err();
        match err {
            AppError::NotFound { data: Some(d), .. } => assert_eq!(d["id"], missing),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(repo.count(&ctx(), &Predicate::All).await.unwrap(), 3);

        c.delete_many(&ctx(), &two).await.unwrap();
        assert_eq!(repo.count(&ctx(), &Predicate::All).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn list_paginates() {
        let repo = MemoryRepository::new();
        let c = controller(&repo);
        for name in ["a", "b", "c", "d", "e"] {
            let mut w = widget(name);
            repo.create_one(&ctx(), &mut w).await.unwrap();
        }
        let q = ListQuery {
            page: 2,
            per_page: 2,
            ..Default::default()
        };
        let env = c.find_many(&ctx(), &q).await.unwrap();
        let meta = env.meta.unwrap();
        assert_eq!((meta.total, meta.prev, meta.next), (5, 1, 3));
        let names: Vec<_> = env.data.unwrap().into_iter().map(|w| w.name).collect();
        assert_eq!(names, ["c", "d"]);

        let past = ListQuery {
            page: 4,
            per_page: 2,
            ..Default::default()
        };
        let env = c.find_many(&ctx(), &past).await.unwrap();
        assert!(env.data.unwrap().is_empty());
        assert_eq!(env.meta.unwrap().next, 0);
    }

    #[tokio::test]
    async fn before_read_hook_guards_reads() {
        let repo = MemoryRepository::new();
        let c = controller(&repo).hook(Phase::BeforeRead, |_, ctx| {
            let allowed = ctx.user().is_some();
            async move {
                if allowed {
                    Ok(())
                } else {
                    Err(HookError::new("sign in first"))
                }
            }
            .boxed()
        });
        let err = c.find_many(&ctx(), &ListQuery::default()).await.unwrap_err();
        assert_eq!(err.to_string(), "hook: sign in first");
    }
}
