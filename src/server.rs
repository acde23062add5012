//! HTTP surface of the playground
//!
//! The WebSocket channel at `/` (and `/ws`) carries one interactive session
//! per connection. Plain requests to `/` get the editor page, and a few JSON
//! routes back the editor's default-code and share features.

use std::path::Path as FsPath;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::session::{SessionChannel, SessionRegistry};
use crate::share::{ShareStore, SharedCode};

const DEFAULT_FILENAME: &str = "main.cpp";

const DEFAULT_CODE: &str = r#"#include <iostream>
using namespace std;

int main() {
    cout << "Hello, Abhishek";
    return 0;
}"#;

/// Sent for unknown share ids so the browser lands back on the editor
const REDIRECT_HOME: &str = "<script>window.location.replace('/');</script>";

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub shares: Arc<ShareStore>,
    pub config: Arc<ServerConfig>,
}

pub fn router(state: AppState) -> Router {
    let assets = ServeDir::new(&state.config.public_dir);

    Router::new()
        .route("/", get(root))
        .route("/ws", get(websocket))
        .route("/default-code", post(default_code))
        .route("/generate-url", post(generate_url))
        .route("/code/share/{id}", post(shared_code))
        .route("/share/{id}", get(share_page))
        .fallback_service(assets)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// WebSocket upgrade when requested, the editor page otherwise
async fn root(
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match ws {
        Ok(ws) => upgrade(ws, state),
        Err(_) => editor_page(&state.config.public_dir).await,
    }
}

async fn websocket(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    upgrade(ws, state)
}

fn upgrade(ws: WebSocketUpgrade, state: AppState) -> Response {
    ws.on_upgrade(move |socket| async move {
        match state.registry.open() {
            Some(channel) => {
                debug!("{} sessions active", state.registry.len());
                pump(socket, channel).await
            }
            None => {
                debug!("Refusing WebSocket during shutdown");
                let mut socket = socket;
                let _ = socket.send(Message::Close(None)).await;
            }
        }
    })
}

/// Shuttle frames between the socket and its session until either side ends
async fn pump(mut socket: WebSocket, channel: SessionChannel) {
    let SessionChannel {
        id,
        inbound,
        mut outbound,
    } = channel;
    info!("WebSocket connected for session {}", id);

    loop {
        tokio::select! {
            frame = socket.recv() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text.to_string(),
                    Some(Ok(Message::Binary(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!("WebSocket error for session {}: {}", id, e);
                        break;
                    }
                };
                if inbound.send(text).await.is_err() {
                    break;
                }
            }
            message = outbound.recv() => match message {
                Some(message) => {
                    if socket.send(Message::Text(message.to_json().into())).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            },
        }
    }

    // Dropping the sender ends the session, which then cleans up on its own
    drop(inbound);
    info!("WebSocket closed for session {}", id);
}

async fn editor_page(public_dir: &FsPath) -> Response {
    let index = public_dir.join("index.html");
    match tokio::fs::read_to_string(&index).await {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            warn!("Failed to read {:?}: {}", index, e);
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

#[derive(Debug, Serialize)]
struct DefaultCode {
    #[serde(rename = "type")]
    kind: &'static str,
    filename: &'static str,
    code: &'static str,
}

async fn default_code() -> Json<DefaultCode> {
    Json(DefaultCode {
        kind: "default",
        filename: DEFAULT_FILENAME,
        code: DEFAULT_CODE,
    })
}

#[derive(Debug, Deserialize)]
struct GenerateUrlRequest {
    code: Option<String>,
    filename: Option<String>,
}

async fn generate_url(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<GenerateUrlRequest>,
) -> Response {
    let code = match request.code {
        Some(code) if !code.is_empty() => code,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": "Code is required" })),
            )
                .into_response();
        }
    };

    let id = state.shares.insert(SharedCode::new(code, request.filename));
    let scheme = header_str(&headers, "x-forwarded-proto").unwrap_or("http");
    let host = match header_str(&headers, header::HOST.as_str()) {
        Some(host) => host.to_string(),
        None => state.config.bind_addr.to_string(),
    };
    let url = format!("{}://{}/share/{}", scheme, host, id);
    debug!("Shared snippet {} ({} live)", id, state.shares.len());

    Json(serde_json::json!({ "message": true, "url": url })).into_response()
}

async fn shared_code(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match lookup(&state.shares, &id) {
        Some(shared) => Json(shared).into_response(),
        None => (StatusCode::NOT_FOUND, Html(REDIRECT_HOME)).into_response(),
    }
}

async fn share_page(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if lookup(&state.shares, &id).is_none() {
        return Redirect::to("/").into_response();
    }
    editor_page(&state.config.public_dir).await
}

fn lookup(shares: &ShareStore, id: &str) -> Option<SharedCode> {
    let id = Uuid::parse_str(id).ok()?;
    shares.get(&id)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
