use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::middleware::from_fn;
use axum::Router;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bedrock_sdk::middleware::{inject, injection::USER_HEADER};
use bedrock_sdk::{Column, Controller, Entity, HookError, MemoryRepository, Phase, Predicate, Record};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use validator::Validate;

#[derive(Clone, Debug, Default, Serialize, Deserialize, Validate)]
struct Note {
    #[serde(flatten)]
    record: Record,
    #[validate(length(min = 1))]
    title: String,
    #[serde(default)]
    priority: Option<i64>,
    #[serde(default)]
    done: Option<bool>,
    #[serde(default)]
    author: Option<String>,
}

impl Entity for Note {
    const TABLE: &'static str = "notes";

    fn columns() -> &'static [Column] {
        const COLUMNS: &[Column] = &[
            Column::new("title", "text"),
            Column::new("priority", "bigint"),
            Column::new("done", "boolean"),
            Column::new("author", "text"),
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

fn notes(repo: &MemoryRepository<Note>) -> Controller<Note> {
    Controller::new(Arc::new(repo.clone()), "Note", "notes")
        .searchable(&["title", "priority", "done"])
        .unique(|n: &Note| Predicate::eq("title", n.title.clone()))
        .morph(Phase::BeforeCreate, |n, ctx| {
            if let Some(name) = ctx.user().and_then(|u| u.get("name")).and_then(Value::as_str) {
                n.author = Some(name.to_string());
            }
        })
        .hook(Phase::BeforeDelete, |n, _| {
            let pinned = n.priority == Some(99);
            async move {
                if pinned {
                    Err(HookError::new("pinned notes cannot be removed"))
                } else {
                    Ok(())
                }
            }
            .boxed()
        })
}

fn app(repo: &MemoryRepository<Note>) -> Router {
    let controller = notes(repo);
    let path = controller.mount_path();
    Router::new()
        .nest(&path, controller.routes())
        .layer(from_fn(inject))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    send_with(app, method, uri, body, &[]).await
}

async fn send_with(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    headers: &[(&str, String)],
) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    for (k, v) in headers {
        req = req.header(*k, v);
    }
    let req = match body {
        Some(b) => req
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn seed(app: &Router, titles: &[(&str, i64, bool)]) -> Vec<String> {
    let body: Vec<Value> = titles
        .iter()
        .map(|(t, p, d)| json!({"title": t, "priority": p, "done": d}))
        .collect();
    let (status, res) = send(app, "POST", "/notes/many", Some(json!(body))).await;
    assert_eq!(status, StatusCode::OK, "{res}");
    res["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["id"].as_str().unwrap().to_string())
        .collect()
}

fn titles(res: &Value) -> Vec<String> {
    res["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["title"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn second_identical_create_is_a_conflict() {
    let repo = MemoryRepository::new();
    let app = app(&repo);

    let (status, first) = send(&app, "POST", "/notes", Some(json!({"title": "a"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["status"], true);
    assert_eq!(first["message"], "Note record saved successfully");
    assert!(first["data"]["id"].is_string());
    assert!(first["data"].get("deleted_at").is_none());

    let (status, second) = send(&app, "POST", "/notes", Some(json!({"title": "a"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(second["status"], false);
    assert_eq!(second["message"], "A similar Note record exist, check and try again");
    assert_eq!(second["data"]["title"], "a");
    assert_eq!(repo.stored().await, 1);
}

#[tokio::test]
async fn invalid_body_is_rejected() {
    let app = app(&MemoryRepository::new());
    let (status, res) = send(&app, "POST", "/notes", Some(json!({"title": ""}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(res["message"], "Invalid request, check and try again");
    assert!(res["data"]["title"].is_array());
}

#[tokio::test]
async fn created_record_reads_back() {
    let app = app(&MemoryRepository::new());
    let (_, created) = send(&app, "POST", "/notes", Some(json!({"title": "read me", "priority": 2}))).await;
    let id = created["data"]["id"].as_str().unwrap();

    let (status, found) = send(&app, "GET", &format!("/notes/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(found["message"], "Note record retrieved successfully");
    assert_eq!(found["data"], created["data"]);
}

#[tokio::test]
async fn pagination_meta() {
    let app = app(&MemoryRepository::new());
    seed(&app, &[("a", 1, false), ("b", 1, false), ("c", 2, true), ("d", 2, true), ("e", 3, false)]).await;

    let (_, res) = send(&app, "GET", "/notes?page=2&per_page=2", None).await;
    assert_eq!(titles(&res), ["c", "d"]);
    assert_eq!(
        res["meta"],
        json!({"page": 2, "per_page": 2, "total": 5, "prev": 1, "next": 3})
    );

    let (_, res) = send(&app, "GET", "/notes?page=9&per_page=2", None).await;
    assert!(titles(&res).is_empty());
    assert_eq!(res["meta"]["next"], 0);

    let (_, res) = send(&app, "GET", "/notes", None).await;
    assert_eq!(res["meta"]["per_page"], 12);
    assert_eq!(titles(&res).len(), 5);
}

#[tokio::test]
async fn filters_intersect_or_union() {
    let app = app(&MemoryRepository::new());
    seed(&app, &[("a", 1, false), ("b", 1, true), ("c", 2, true)]).await;

    let (_, res) = send(&app, "GET", "/notes?priority=1&done=true", None).await;
    assert_eq!(titles(&res), ["b"]);

    let (_, res) = send(&app, "GET", "/notes?priority=1&done=true&joiner=OR", None).await;
    assert_eq!(titles(&res), ["a", "b", "c"]);

    let (_, res) = send(&app, "GET", "/notes?author=nobody", None).await;
    assert_eq!(titles(&res).len(), 3, "non-searchable fields are ignored");

    let (status, res) = send(&app, "GET", "/notes?priority=high", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(titles(&res).is_empty());
    assert_eq!(res["meta"]["total"], 0);

    let (_, res) = send(&app, "GET", "/notes?priority=high&done=true&joiner=or", None).await;
    assert_eq!(titles(&res), ["b", "c"]);
}

#[tokio::test]
async fn batch_with_repeated_title_stores_nothing() {
    let repo = MemoryRepository::new();
    let app = app(&repo);
    let (status, res) = send(&app, "POST", "/notes/many", Some(json!([{"title": "dup"}, {"title": "dup"}]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(res["message"], "A similar Note record exist, check and try again");
    assert_eq!(repo.stored().await, 0);
}

#[tokio::test]
async fn update_then_delete() {
    let app = app(&MemoryRepository::new());
    let ids = seed(&app, &[("a", 1, false), ("b", 1, false)]).await;

    let (status, res) = send(&app, "PATCH", &format!("/notes/{}", ids[0]), Some(json!({"title": "a2", "done": true}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(res["message"], "Note record updated successfully");
    assert_eq!(res["data"]["done"], true);
    assert_eq!(res["data"]["priority"], 1);

    let (status, res) = send(&app, "PATCH", &format!("/notes/{}", ids[0]), Some(json!({"title": "b"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(res["message"], "A similar Note record exist, check and try again");

    let (status, res) = send(&app, "DELETE", &format!("/notes/{}", ids[0]), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(res["message"], "Note record removed successfully");

    let (status, res) = send(&app, "GET", &format!("/notes/{}", ids[0]), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(res["message"], "Invalid request, record not found");
}

#[tokio::test]
async fn delete_hook_veto_keeps_the_record() {
    let app = app(&MemoryRepository::new());
    let ids = seed(&app, &[("pinned", 99, false)]).await;

    let (status, res) = send(&app, "DELETE", &format!("/notes/{}", ids[0]), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(res["message"], "pinned notes cannot be removed");

    let (status, _) = send(&app, "GET", &format!("/notes/{}", ids[0]), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn bulk_update_and_delete() {
    let app = app(&MemoryRepository::new());
    let ids = seed(&app, &[("a", 1, false), ("b", 1, false), ("c", 1, false)]).await;
    let pair = format!("{},{}", ids[0], ids[1]);

    let (status, res) = send(&app, "PATCH", &format!("/notes/many/{pair}"), Some(json!({"title": "c", "done": true}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{res}");

    let (status, res) = send(&app, "PATCH", &format!("/notes/many/{pair}"), Some(json!({"title": "x", "done": true}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(res["message"], "Note records updated successfully");
    let updated = res["data"].as_array().unwrap();
    assert_eq!(updated.len(), 2);
    assert!(updated.iter().all(|n| n["title"] == "x" && n["done"] == true));

    let (status, res) = send(&app, "DELETE", &format!("/notes/many/{pair}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(res["message"], "Note records removed successfully");

    let (_, res) = send(&app, "GET", "/notes", None).await;
    assert_eq!(titles(&res), ["c"]);
}

#[tokio::test]
async fn injected_user_reaches_morphs() {
    let app = app(&MemoryRepository::new());
    let user = STANDARD.encode(json!({"id": "u1", "name": "ada"}).to_string());
    let (status, res) = send_with(
        &app,
        "POST",
        "/notes",
        Some(json!({"title": "mine"})),
        &[(USER_HEADER, user)],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(res["data"]["author"], "ada");
}

#[tokio::test]
async fn upsert_revives_by_id() {
    let app = app(&MemoryRepository::new());
    let ids = seed(&app, &[("a", 1, false)]).await;
    send(&app, "DELETE", &format!("/notes/{}", ids[0]), None).await;

    let (status, res) = send(&app, "PUT", "/notes", Some(json!({"id": ids[0], "title": "a", "priority": 5}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(res["data"]["id"], ids[0]);

    let (status, res) = send(&app, "GET", &format!("/notes/{}", ids[0]), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(res["data"]["priority"], 5);
}
