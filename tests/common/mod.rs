#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use legadilo_host::{ApiClient, MemoryOptionsStore, Options, OptionsStore};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};

pub const EMAIL: &str = "reader@example.com";
pub const TOKEN_ID: &str = "token-id";
pub const TOKEN_SECRET: &str = "token-secret";
pub const APPLICATION_TOKEN: &str = "application-token";

/// Knobs and recordings shared with the stub's handlers.
#[derive(Clone, Default)]
pub struct StubState {
    calls: Arc<Mutex<Vec<String>>>,
    bodies: Arc<Mutex<Vec<Value>>>,
    valid_token: Arc<Mutex<Option<String>>>,
    issued: Arc<AtomicUsize>,
    /// Refuse every API call with 401, whatever the token.
    pub always_unauthorized: Arc<AtomicBool>,
    /// Refuse bad tokens with 403 instead of 401.
    pub forbid_bad_tokens: Arc<AtomicBool>,
    /// Answer article saves that carry page content with 400.
    pub reject_content: Arc<AtomicBool>,
    /// Answer article saves with 500 (after the content check).
    pub fail_saves: Arc<AtomicBool>,
}

pub struct InstanceStub {
    pub base_url: String,
    pub state: StubState,
    shutdown: Option<oneshot::Sender<()>>,
}

impl InstanceStub {
    pub async fn calls(&self) -> Vec<String> {
        self.state.calls.lock().await.clone()
    }

    pub async fn bodies(&self) -> Vec<Value> {
        self.state.bodies.lock().await.clone()
    }

    pub async fn accept_token(&self, token: &str) {
        *self.state.valid_token.lock().await = Some(token.to_string());
    }

    pub fn options(&self) -> Options {
        Options {
            instance_url: format!("{}/", self.base_url),
            user_email: EMAIL.into(),
            token_id: TOKEN_ID.into(),
            token_secret: TOKEN_SECRET.into(),
            ..Options::default()
        }
    }

    pub fn application_token_options(&self) -> Options {
        Options {
            instance_url: self.base_url.clone(),
            application_token: APPLICATION_TOKEN.into(),
            ..Options::default()
        }
    }

    pub fn client(&self, options: Options) -> Result<(ApiClient, Arc<MemoryOptionsStore>)> {
        let store = Arc::new(MemoryOptionsStore::new(options));
        let shared: Arc<dyn OptionsStore> = store.clone();
        Ok((ApiClient::new(shared)?, store))
    }

    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

pub async fn spawn_instance_stub() -> Result<InstanceStub> {
    let state = StubState::default();
    let app = Router::new()
        .route("/api/users/tokens/", post(create_token))
        .route("/api/reading/articles/", get(list_articles).post(save_article))
        .route(
            "/api/reading/articles/:id/",
            patch(update_article).delete(delete_article),
        )
        .route("/api/reading/tags/", get(list_tags))
        .route("/api/feeds/", get(list_feeds).post(subscribe_to_feed))
        .route("/api/feeds/:id/", patch(update_feed).delete(delete_feed))
        .route("/api/feeds/categories/", get(list_categories))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });
        let _ = server.await;
    });

    Ok(InstanceStub {
        base_url: format!("http://{addr}"),
        state,
        shutdown: Some(shutdown_tx),
    })
}

async fn record_call(state: &StubState, method: &Method, uri: &Uri) {
    let target = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());
    state.calls.lock().await.push(format!("{method} {target}"));
}

async fn authorize(state: &StubState, headers: &HeaderMap) -> Result<(), Response> {
    let unauthorized = || {
        (StatusCode::UNAUTHORIZED, Json(json!({"detail": "Unauthorized"}))).into_response()
    };

    if state.always_unauthorized.load(Ordering::SeqCst) {
        return Err(unauthorized());
    }
    let refused = || {
        if state.forbid_bad_tokens.load(Ordering::SeqCst) {
            (StatusCode::FORBIDDEN, Json(json!({"detail": "Forbidden"}))).into_response()
        } else {
            unauthorized()
        }
    };

    let presented = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);
    let valid = state.valid_token.lock().await.clone();

    match (presented, valid) {
        (Some(presented), Some(valid)) if presented == valid => Ok(()),
        (Some(presented), _) if presented == APPLICATION_TOKEN => Ok(()),
        _ => Err(refused()),
    }
}

async fn create_token(
    State(state): State<StubState>,
    method: Method,
    uri: Uri,
    Json(body): Json<Value>,
) -> Response {
    record_call(&state, &method, &uri).await;

    if body["email"] != EMAIL
        || body["application_token_uuid"] != TOKEN_ID
        || body["application_token_secret"] != TOKEN_SECRET
    {
        let detail = Json(json!({"detail": "Invalid credentials"}));
        return (StatusCode::UNAUTHORIZED, detail).into_response();
    }

    let n = state.issued.fetch_add(1, Ordering::SeqCst) + 1;
    let token = format!("access-{n}");
    *state.valid_token.lock().await = Some(token.clone());
    Json(json!({ "access_token": token })).into_response()
}

fn article_json(id: i64, url: &str, title: &str) -> Value {
    json!({
        "id": id,
        "title": title,
        "link": url,
        "slug": "article",
        "tags": [],
        "is_favorite": false,
        "is_for_later": false,
        "read_at": null,
    })
}

async fn list_articles(
    State(state): State<StubState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<Vec<(String, String)>>,
) -> Response {
    record_call(&state, &method, &uri).await;
    if let Err(response) = authorize(&state, &headers).await {
        return response;
    }

    let searched = query.iter().find(|(k, _)| k == "q").map(|(_, v)| v.clone());

    match searched {
        Some(url) => Json(json!({
            "items": [article_json(url.len() as i64, &url, "Found")],
            "count": url.len(),
        }))
        .into_response(),
        None => Json(json!({
            "items": [
                article_json(1, "https://example.com/a", "A"),
                article_json(2, "https://example.com/b", "B"),
            ],
            "count": 2,
        }))
        .into_response(),
    }
}

async fn save_article(
    State(state): State<StubState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record_call(&state, &method, &uri).await;
    if let Err(response) = authorize(&state, &headers).await {
        return response;
    }
    state.bodies.lock().await.push(body.clone());

    if state.reject_content.load(Ordering::SeqCst) && body.get("content").is_some() {
        let detail = Json(json!({"detail": "Payload too big"}));
        return (StatusCode::BAD_REQUEST, detail).into_response();
    }
    if state.fail_saves.load(Ordering::SeqCst) {
        let detail = Json(json!({"detail": "boom"}));
        return (StatusCode::INTERNAL_SERVER_ERROR, detail).into_response();
    }

    let url = body["url"].as_str().unwrap_or_default();
    let title = body["title"].as_str().unwrap_or("Fetched by server");
    (StatusCode::CREATED, Json(article_json(7, url, title))).into_response()
}

async fn update_article(
    State(state): State<StubState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> Response {
    record_call(&state, &method, &uri).await;
    if let Err(response) = authorize(&state, &headers).await {
        return response;
    }
    state.bodies.lock().await.push(body.clone());

    let mut article = article_json(id, "https://example.com/updated", "Updated");
    apply_changes(&mut article, &body);
    Json(article).into_response()
}

async fn delete_article(
    State(state): State<StubState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response {
    record_call(&state, &method, &uri).await;
    if let Err(response) = authorize(&state, &headers).await {
        return response;
    }
    if id == 404 {
        return (StatusCode::NOT_FOUND, Json(json!({"detail": "Not Found"}))).into_response();
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn list_tags(
    State(state): State<StubState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    record_call(&state, &method, &uri).await;
    if let Err(response) = authorize(&state, &headers).await {
        return response;
    }
    Json(json!({
        "items": [
            {"title": "Rust", "slug": "rust", "id": 1},
            {"title": "Reading", "slug": "reading", "id": 2},
        ],
        "count": 2,
    }))
    .into_response()
}

fn feed_json(id: i64, feed_url: &str) -> Value {
    json!({
        "id": id,
        "title": "Example feed",
        "feed_url": feed_url,
        "site_url": "https://example.com",
        "category": null,
        "tags": [],
        "refresh_delay": "DAILY_AT_NOON",
        "article_retention_time": 0,
        "enabled": true,
        "disabled_at": null,
        "disabled_reason": "",
    })
}

async fn list_feeds(
    State(state): State<StubState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<Vec<(String, String)>>,
) -> Response {
    record_call(&state, &method, &uri).await;
    if let Err(response) = authorize(&state, &headers).await {
        return response;
    }

    let urls: Vec<String> = query
        .into_iter()
        .filter(|(k, _)| k == "feed_urls")
        .map(|(_, v)| v)
        .collect();
    let items: Vec<Value> = urls
        .iter()
        .enumerate()
        .map(|(i, url)| feed_json(i as i64 + 1, url))
        .collect();
    let count = items.len();
    Json(json!({ "items": items, "count": count })).into_response()
}

async fn subscribe_to_feed(
    State(state): State<StubState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record_call(&state, &method, &uri).await;
    if let Err(response) = authorize(&state, &headers).await {
        return response;
    }
    state.bodies.lock().await.push(body.clone());

    let feed_url = body["feed_url"].as_str().unwrap_or_default();
    (StatusCode::CREATED, Json(feed_json(12, feed_url))).into_response()
}

async fn update_feed(
    State(state): State<StubState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> Response {
    record_call(&state, &method, &uri).await;
    if let Err(response) = authorize(&state, &headers).await {
        return response;
    }
    state.bodies.lock().await.push(body.clone());

    let mut feed = feed_json(id, "https://example.com/feed.xml");
    apply_changes(&mut feed, &body);
    Json(feed).into_response()
}

/// Merge a PATCH body into `record` the way the server reports it back:
/// tag slugs become tag objects and `category_id` becomes a category.
fn apply_changes(record: &mut Value, changes: &Value) {
    let (Some(record), Some(changes)) = (record.as_object_mut(), changes.as_object()) else {
        return;
    };
    for (key, value) in changes {
        match (key.as_str(), value) {
            ("tags", Value::Array(slugs)) => {
                let tags: Vec<Value> = slugs
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|slug| json!({ "title": slug, "slug": slug }))
                    .collect();
                record.insert("tags".into(), Value::Array(tags));
            }
            ("category_id", Value::Number(id)) => {
                let category = json!({ "id": id, "title": "Tech", "slug": "tech" });
                record.insert("category".into(), category);
            }
            ("category_id", Value::Null) => {
                record.insert("category".into(), Value::Null);
            }
            _ => {
                record.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Answers 200 with a body that is not JSON.
async fn delete_feed(
    State(state): State<StubState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    record_call(&state, &method, &uri).await;
    if let Err(response) = authorize(&state, &headers).await {
        return response;
    }
    (StatusCode::OK, "deleted").into_response()
}

async fn list_categories(
    State(state): State<StubState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    record_call(&state, &method, &uri).await;
    if let Err(response) = authorize(&state, &headers).await {
        return response;
    }
    Json(json!({
        "items": [{"id": 3, "title": "Tech", "slug": "tech"}],
        "count": 1,
    }))
    .into_response()
}
