//! Bedrock SDK: generic CRUD controllers and repositories over axum + PostgreSQL, with
//! request-scoped transactions and a few service utilities (documents, events, HTTP, identity,
//! object storage).

pub mod config;
pub mod context;
pub mod controller;
pub mod document;
pub mod entity;
pub mod error;
pub mod event;
pub mod identity;
pub mod middleware;
pub mod repository;
pub mod request;
pub mod response;
pub mod routes;
pub mod sql;
pub mod state;
pub mod storage;
pub mod store;

pub use config::Settings;
pub use context::{Object, RequestContext, TxHandle};
pub use controller::{Controller, ListQuery, Phase};
pub use document::{Document, DocumentKind};
pub use entity::{Column, Entity, Record};
pub use error::{AppError, ConfigError, HookError, StoreError};
pub use event::{Dispatcher, Event, RetryPolicy};
pub use identity::IdentityClient;
pub use repository::{MemoryRepository, PgRepository, Repository};
pub use request::HttpClient;
pub use response::{Envelope, PageMeta};
pub use routes::{common_routes, common_routes_with_ready};
pub use sql::Predicate;
pub use state::AppState;
pub use storage::ObjectStore;
pub use store::{connect, ensure_database_exists, ensure_table};
