//! Lifecycle table: one optional morph and one optional hook per phase.
//!
//! A morph is a synchronous transform of the entity. A hook is asynchronous and may veto the
//! operation by returning a [`HookError`], whose message is sent to the caller.

use crate::context::RequestContext;
use crate::error::HookError;
use futures::future::BoxFuture;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    BeforeCreate,
    AfterCreate,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
    BeforeRead,
    AfterRead,
}

impl Phase {
    pub const ALL: [Phase; 8] = [
        Phase::BeforeCreate,
        Phase::AfterCreate,
        Phase::BeforeUpdate,
        Phase::AfterUpdate,
        Phase::BeforeDelete,
        Phase::AfterDelete,
        Phase::BeforeRead,
        Phase::AfterRead,
    ];

    const fn index(self) -> usize {
        self as usize
    }
}

pub type Morph<E> = Arc<dyn Fn(&mut E, &RequestContext) + Send + Sync>;

pub type Hook<E> = Arc<
    dyn for<'a> Fn(&'a mut E, &'a RequestContext) -> BoxFuture<'a, Result<(), HookError>> + Send + Sync,
>;

pub struct Lifecycle<E> {
    morphs: [Option<Morph<E>>; 8],
    hooks: [Option<Hook<E>>; 8],
}

impl<E> Default for Lifecycle<E> {
    fn default() -> Self {
        Lifecycle {
            morphs: std::array::from_fn(|_| None),
            hooks: std::array::from_fn(|_| None),
        }
    }
}

impl<E> Lifecycle<E> {
    /// Replaces any morph already registered for `phase`.
    pub fn set_morph<F>(&mut self, phase: Phase, morph: F)
    where
        F: Fn(&mut E, &RequestContext) + Send + Sync + 'static,
    {
        self.morphs[phase.index()] = Some(Arc::new(morph));
    }

    /// Replaces any hook already registered for `phase`.
    pub fn set_hook<F>(&mut self, phase: Phase, hook: F)
    where
        F: for<'a> Fn(&'a mut E, &'a RequestContext) -> BoxFuture<'a, Result<(), HookError>>
            + Send
            + Sync
            + 'static,
    {
        self.hooks[phase.index()] = Some(Arc::new(hook));
    }

    pub fn has_hook(&self, phase: Phase) -> bool {
        self.hooks[phase.index()].is_some()
    }

    pub fn morph(&self, phase: Phase, entity: &mut E, ctx: &RequestContext) {
        if let Some(morph) = &self.morphs[phase.index()] {
            morph(entity, ctx);
        }
    }

    pub async fn hook(&self, phase: Phase, entity: &mut E, ctx: &RequestContext) -> Result<(), HookError> {
        match &self.hooks[phase.index()] {
            Some(hook) => hook(entity, ctx).await,
            None => Ok(()),
        }
    }

    pub fn morph_all(&self, phase: Phase, entities: &mut [E], ctx: &RequestContext) {
        for entity in entities {
            self.morph(phase, entity, ctx);
        }
    }

    /// Runs the hook on each entity in order, stopping at the first error.
    pub async fn hook_all(&self, phase: Phase, entities: &mut [E], ctx: &RequestContext) -> Result<(), HookError> {
        for entity in entities {
            self.hook(phase, entity, ctx).await?;
        }
        Ok(())
    }
}
