//! Example consumer: a notes API on top of bedrock-sdk.
//!
//! Run from repo root: `cargo run -p example-consumer`
//! Settings come from `env/<APP_ENV>.env` and the process environment.

use axum::middleware::{from_fn, from_fn_with_state};
use axum::Router;
use bedrock_sdk::middleware::{authenticate, inject, transaction};
use bedrock_sdk::{
    common_routes_with_ready, connect, ensure_table, AppState, Column, Controller, Dispatcher, Entity, Event,
    HookError, HttpClient, IdentityClient, PgRepository, Phase, Predicate, Record, Settings,
};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use validator::Validate;

const NOTE_CREATED: &str = "note.created";

#[derive(Clone, Debug, Default, Serialize, Deserialize, Validate)]
struct Note {
    #[serde(flatten)]
    record: Record,
    #[validate(length(min = 1, max = 200))]
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    pinned: Option<bool>,
}

impl Entity for Note {
    const TABLE: &'static str = "notes";

    fn columns() -> &'static [Column] {
        const COLUMNS: &[Column] = &[
            Column::new("title", "text"),
            Column::new("body", "text"),
            Column::new("pinned", "boolean"),
        ];
        COLUMNS
    }

    fn record(&self) -> &Record {
        &self.record
    }

    fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }
}

fn notes(repo: PgRepository<Note>, events: Dispatcher) -> Controller<Note> {
    Controller::new(Arc::new(repo), "Note", "notes")
        .searchable(&["title", "pinned"])
        .unique(|n: &Note| Predicate::eq("title", n.title.clone()))
        .morph(Phase::BeforeCreate, |n, _| n.title = n.title.trim().to_string())
        .hook(Phase::AfterCreate, move |n, _| {
            let events = events.clone();
            let event = Event::new(NOTE_CREATED, vec![json!(n.record.id), json!(n.title)]);
            async move {
                events
                    .dispatch(event)
                    .await
                    .map_err(|e| HookError::new(e.to_string()))
            }
            .boxed()
        })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("bedrock_sdk=info,example_consumer=info")),
        )
        .init();

    let settings = Settings::load_lenient()?;
    let pool = connect(&settings.database).await?;
    ensure_table::<Note>(&pool).await?;

    let (events, dispatch_task) = Dispatcher::spawn(settings.events.buffer, settings.events.retry_policy());
    events.register(NOTE_CREATED, |payload| async move {
        tracing::info!(?payload, "note created");
        Ok(())
    });

    let repo = PgRepository::<Note>::new(pool.clone()).with_timeout(settings.database.query_timeout);
    let controller = notes(repo, events.clone());
    let mut api = Router::new()
        .nest(&controller.mount_path(), controller.routes())
        .layer(from_fn_with_state(pool.clone(), transaction));
    if let Some(base_url) = &settings.identity.base_url {
        let identity = IdentityClient::new(base_url, HttpClient::with_timeout(settings.http.timeout)?);
        api = api.layer(from_fn_with_state(Arc::new(identity), authenticate));
    }
    let listen_addr = settings.server.listen_addr.clone();
    let app = api
        .layer(from_fn(inject))
        .merge(common_routes_with_ready(AppState::new(pool, settings)));

    let listener = TcpListener::bind(&listen_addr).await?;
    tracing::info!("notes service listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    drop(events);
    dispatch_task.await?;
    Ok(())
}
