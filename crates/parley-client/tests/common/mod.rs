//! Stub chat server for integration tests: HTTP routes and a push socket on
//! one ephemeral port. Every request and inbound frame is recorded.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use url::Url;

pub const TOKEN: &str = "tok-123";

#[derive(Clone)]
pub struct Stub {
    hits: Arc<Mutex<Vec<String>>>,
    frames: broadcast::Sender<String>,
}

impl Stub {
    pub fn hits(&self) -> Vec<String> {
        self.hits.lock().unwrap().clone()
    }

    fn record(&self, entry: String) {
        self.hits.lock().unwrap().push(entry);
    }

    /// Push a frame to every connected socket.
    pub fn push(&self, frame: Value) {
        let _ = self.frames.send(frame.to_string());
    }

    /// Poll the hit log until `pred` matches an entry.
    pub async fn wait_for_hit(&self, pred: impl Fn(&str) -> bool) -> String {
        for _ in 0..200 {
            if let Some(hit) = self.hits().into_iter().find(|h| pred(h)) {
                return hit;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("expected hit never arrived; got {:?}", self.hits());
    }
}

pub async fn spawn_stub() -> (Url, Stub) {
    let (frames, _) = broadcast::channel(64);
    let stub = Stub {
        hits: Arc::new(Mutex::new(Vec::new())),
        frames,
    };

    let app = Router::new()
        .route("/ws/:user_id", get(ws_handler))
        .fallback(http_handler)
        .with_state(stub.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (Url::parse(&format!("http://{addr}")).unwrap(), stub)
}

fn user_json(full_name: &str) -> Value {
    json!({ "id": 1, "username": "alice", "full_name": full_name })
}

fn chat_json(id: i64, username: &str) -> Value {
    json!({
        "id": id,
        "other_user": { "id": 2, "username": username, "full_name": "Bob B" },
        "last_message": null,
        "last_message_at": "2024-03-01T12:00:00",
        "created_at": "2024-03-01T11:00:00"
    })
}

fn detail(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "detail": message }))).into_response()
}

async fn http_handler(
    State(stub): State<Stub>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    let query = uri.query().unwrap_or("").to_string();
    stub.record(format!("{method} {}", uri));

    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some(&format!("Bearer {TOKEN}"));
    if !path.starts_with("/auth/") && !authorized {
        return detail(StatusCode::UNAUTHORIZED, "Could not validate credentials");
    }

    match (method.as_str(), path.as_str()) {
        ("POST", "/auth/login") => {
            let creds: Value = serde_json::from_slice(&body).unwrap_or_default();
            if creds["password"] == "secret" {
                Json(json!({ "access_token": TOKEN, "token_type": "bearer" })).into_response()
            } else {
                detail(StatusCode::BAD_REQUEST, "Incorrect username or password")
            }
        }
        ("GET", "/users/me") => Json(user_json("Alice A")).into_response(),
        ("PUT", "/users/me") => {
            let name = url::form_urlencoded::parse(query.as_bytes())
                .find(|(k, _)| k == "full_name")
                .map(|(_, v)| v.into_owned());
            match name {
                Some(name) => Json(user_json(&name)).into_response(),
                None => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    Json(json!({ "detail": [{ "msg": "field required" }] })),
                )
                    .into_response(),
            }
        }
        ("GET", "/chats/") => Json(json!([chat_json(42, "bob")])).into_response(),
        ("POST", "/chats/") => create_chat(&query, &body),
        ("GET", "/chats/42/messages") => Json(json!([])).into_response(),
        ("GET", "/chats/42/files") => Json(json!([])).into_response(),
        ("GET", "/chats/unread-count") => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/html")],
            "<h1>boom</h1>",
        )
            .into_response(),
        ("POST", "/chats/3/files") => {
            let content_type = headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            let text = String::from_utf8_lossy(&body);
            if content_type.starts_with("multipart/form-data")
                && text.contains("name=\"file\"; filename=\"notes.txt\"")
                && text.contains("hello upload")
            {
                Json(json!({
                    "id": 9, "filename": "notes.txt", "file_size": 12,
                    "mime_type": "text/plain", "download_url": "/files/abc_notes.txt"
                }))
                .into_response()
            } else {
                detail(StatusCode::BAD_REQUEST, "bad upload")
            }
        }
        ("DELETE", "/files/5") => StatusCode::NO_CONTENT.into_response(),
        ("DELETE", "/files/6") => {
            Json(json!({ "message": "File deleted successfully" })).into_response()
        }
        _ => detail(StatusCode::NOT_FOUND, "Not Found"),
    }
}

/// `bob` works with the query form, `legacy` only with a JSON body and
/// `ghost` does not exist.
fn create_chat(query: &str, body: &[u8]) -> Response {
    let from_query = url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == "recipient_username")
        .map(|(_, v)| v.into_owned());
    let from_body = serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| v["recipient_username"].as_str().map(str::to_string));

    match (from_query.as_deref(), from_body.as_deref()) {
        (Some("ghost"), _) | (_, Some("ghost")) => detail(StatusCode::NOT_FOUND, "User not found"),
        (Some("legacy"), _) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "detail": [{ "msg": "field required" }] })),
        )
            .into_response(),
        (_, Some(name)) | (Some(name), None) => Json(chat_json(43, name)).into_response(),
        _ => detail(StatusCode::BAD_REQUEST, "recipient required"),
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(user_id): Path<i64>,
    State(stub): State<Stub>,
) -> Response {
    stub.record(format!("WS connect {user_id}"));
    ws.on_upgrade(move |socket| serve_socket(socket, stub))
}

async fn serve_socket(mut socket: WebSocket, stub: Stub) {
    let mut frames = stub.frames.subscribe();
    loop {
        tokio::select! {
            inbound = socket.recv() => match inbound {
                Some(Ok(WsMessage::Text(text))) => stub.record(format!("WS {text}")),
                Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
            outbound = frames.recv() => match outbound {
                Ok(text) => {
                    if socket.send(WsMessage::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(_) => break,
            },
        }
    }
}
