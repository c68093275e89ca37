use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, VaultError};
use crate::model::SearchReport;
use crate::tools::{render_search, FilePath, SearchArgs, VaultTools};

type Sessions = Arc<RwLock<HashMap<String, mpsc::UnboundedSender<Event>>>>;

#[derive(Clone)]
pub struct AppState {
    pub tools: Arc<VaultTools>,
    pub sessions: Sessions,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: &'static str,
    error: String,
}

fn error_response(status: StatusCode, code: &'static str, error: String) -> axum::response::Response {
    (status, Json(ErrorResponse { code, error })).into_response()
}

fn status_for(err: &VaultError) -> StatusCode {
    match err {
        VaultError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        VaultError::PathTraversal { .. } => StatusCode::FORBIDDEN,
        VaultError::NotFound { .. } => StatusCode::NOT_FOUND,
        VaultError::ReadError { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub report: SearchReport,
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NoteResponse {
    pub path: String,
    pub content: String,
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn search_handler(
    State(state): State<AppState>,
    payload: std::result::Result<Json<SearchArgs>, JsonRejection>,
) -> impl IntoResponse {
    let args = match payload {
        Ok(Json(args)) => args,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_input",
                format!("invalid request body: {e}"),
            )
        }
    };

    match state.tools.search_report(args.query).await {
        Ok(report) => {
            let text = report.render();
            (StatusCode::OK, Json(SearchResponse { report, text })).into_response()
        }
        Err(e) => {
            let status = status_for(&e);
            let code = e.code();
            error_response(status, code, render_search(Err(e)).text)
        }
    }
}

async fn note_handler(
    State(state): State<AppState>,
    payload: std::result::Result<Json<FilePath>, JsonRejection>,
) -> impl IntoResponse {
    let FilePath { path } = match payload {
        Ok(Json(p)) => p,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_input",
                format!("invalid request body: {e}"),
            )
        }
    };

    match state.tools.read_note(path.clone()).await {
        Ok(content) => (StatusCode::OK, Json(NoteResponse { path, content })).into_response(),
        Err(e) => {
            let status = status_for(&e);
            let code = e.code();
            let text = crate::tools::render_note(&path, Err(e)).text;
            error_response(status, code, text)
        }
    }
}

/// SSE 会话的事件流，流被丢弃（客户端断开）时从会话表中移除自身。
pub struct SessionStream {
    inner: UnboundedReceiverStream<Event>,
    id: String,
    sessions: Sessions,
}

impl Stream for SessionStream {
    type Item = std::result::Result<Event, axum::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx).map(|ev| ev.map(Ok))
    }
}

impl Drop for SessionStream {
    fn drop(&mut self) {
        self.sessions
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&self.id);
        debug!("sse session {} closed", self.id);
    }
}

async fn sse_handler(State(state): State<AppState>) -> Sse<SessionStream> {
    let (tx, rx) = mpsc::unbounded_channel();
    let session_id = Uuid::new_v4().to_string();

    // 第一个事件告诉客户端消息 POST 的地址
    let endpoint_url = format!("/message?session_id={}", session_id);
    let _ = tx.send(Event::default().event("endpoint").data(endpoint_url));

    state
        .sessions
        .write()
        .unwrap_or_else(|p| p.into_inner())
        .insert(session_id.clone(), tx);
    info!("sse session {} opened", session_id);

    let stream = SessionStream {
        inner: UnboundedReceiverStream::new(rx),
        id: session_id,
        sessions: state.sessions.clone(),
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Deserialize)]
struct MessageQuery {
    session_id: String,
}

async fn message_handler(
    State(state): State<AppState>,
    Query(q): Query<MessageQuery>,
    Json(req): Json<crate::mcp::RpcRequest>,
) -> impl IntoResponse {
    let sender = {
        let sessions = state.sessions.read().unwrap_or_else(|p| p.into_inner());
        sessions.get(&q.session_id).cloned()
    };

    let Some(sender) = sender else {
        return StatusCode::NOT_FOUND;
    };

    let tools = state.tools.clone();
    let sessions = state.sessions.clone();
    tokio::spawn(async move {
        let Some(resp) = crate::mcp::process_request(tools, req).await else {
            return;
        };
        if let Ok(json_str) = serde_json::to_string(&resp) {
            if sender
                .send(Event::default().event("message").data(json_str))
                .is_err()
            {
                warn!("sse session {} is gone, dropping it", q.session_id);
                sessions
                    .write()
                    .unwrap_or_else(|p| p.into_inner())
                    .remove(&q.session_id);
            }
        }
    });
    StatusCode::ACCEPTED
}

pub fn build_router(tools: Arc<VaultTools>) -> Router {
    let state = AppState {
        tools,
        sessions: Arc::new(RwLock::new(HashMap::new())),
    };
    Router::new()
        .route("/health", get(health_handler))
        .route("/search", post(search_handler))
        .route("/note", post(note_handler))
        .route("/sse", get(sse_handler))
        .route("/message", post(message_handler))
        .with_state(state)
}

pub async fn serve_http(tools: Arc<VaultTools>, addr: String) -> Result<()> {
    let router = build_router(tools);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| VaultError::ConfigError(format!("bind {addr} failed: {e}")))?;
    info!("HTTP server listening on http://{}", addr);
    axum::serve(listener, router).await?;
    Ok(())
}
