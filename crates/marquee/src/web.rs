//! HTTP control surface for operators and the touch-panel UI.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::Instant;

use crate::{Coordinator, CoordinatorError};

#[derive(Clone)]
pub struct WebState {
    pub coordinator: Arc<Coordinator>,
    pub started: Instant,
}

impl WebState {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self {
            coordinator,
            started: Instant::now(),
        }
    }
}

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/", get(serve_root))
        .route("/videos", get(list_videos))
        .route("/play", post(play))
        .route("/commands/{id}", get(command_status))
        .route("/clients/count", get(client_count))
        .route("/health", get(health))
        .with_state(state)
}

/// Touch-panel page: a button per video and the live client count.
async fn serve_root(State(state): State<WebState>) -> Html<String> {
    let library = state.coordinator.videos().await;
    let buttons: String = library
        .names()
        .iter()
        .enumerate()
        .map(|(index, name)| {
            format!(
                "    <button class=\"video-btn\" data-index=\"{}\">{}</button>\n",
                index,
                escape_html(name)
            )
        })
        .collect();
    Html(CONTROL_HTML.replace("{{BUTTONS}}", &buttons))
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[derive(Debug, Serialize)]
struct VideoEntry {
    index: usize,
    name: String,
}

async fn list_videos(State(state): State<WebState>) -> impl IntoResponse {
    let library = state.coordinator.videos().await;
    let videos: Vec<VideoEntry> = library
        .names()
        .iter()
        .enumerate()
        .map(|(index, name)| VideoEntry {
            index,
            name: name.clone(),
        })
        .collect();
    Json(serde_json::json!({ "videos": videos }))
}

#[derive(Debug, Deserialize)]
pub struct PlayRequest {
    pub index: i64,
}

async fn play(State(state): State<WebState>, Json(request): Json<PlayRequest>) -> Response {
    match state.coordinator.play(request.index).await {
        Ok(command_id) => Json(serde_json::json!({
            "status": "success",
            "command_id": command_id.as_str(),
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn command_status(State(state): State<WebState>, Path(id): Path<String>) -> Response {
    match state.coordinator.command_status(&id).await {
        Ok(status) => Json(status).into_response(),
        Err(e) => error_response(e),
    }
}

async fn client_count(State(state): State<WebState>) -> impl IntoResponse {
    Json(serde_json::json!({ "count": state.coordinator.active_node_count().await }))
}

async fn health(State(state): State<WebState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "uptime_secs": state.started.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "membership": state.coordinator.membership().summary().await,
        "commands": state.coordinator.commands().len().await,
    }))
}

fn error_response(error: CoordinatorError) -> Response {
    let status = match &error {
        CoordinatorError::InvalidIndex { .. } => StatusCode::BAD_REQUEST,
        CoordinatorError::NoReceivers => StatusCode::SERVICE_UNAVAILABLE,
        CoordinatorError::PublishFailed { .. } => StatusCode::BAD_GATEWAY,
        CoordinatorError::CommandNotFound(_) => StatusCode::NOT_FOUND,
    };
    (
        status,
        Json(serde_json::json!({
            "status": "error",
            "message": error.to_string(),
        })),
    )
        .into_response()
}

const CONTROL_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>Marquee</title>
  <style>
    :root { --bg: #1a1a2e; --card: #16213e; --accent: #e94560; --text: #eee; --muted: #888; }
    * { box-sizing: border-box; margin: 0; padding: 0; }
    body { font-family: system-ui, sans-serif; background: var(--bg); color: var(--text); padding: 1.5rem; text-align: center; }
    h1 { color: var(--accent); margin-bottom: 0.5rem; }
    .clients { color: var(--muted); margin-bottom: 1.5rem; }
    .video-btn { background: var(--card); color: var(--text); border: 2px solid var(--accent); border-radius: 12px;
                 font-size: 1.3rem; padding: 1rem 2rem; margin: 0.5rem; cursor: pointer; }
    .video-btn:active { background: var(--accent); }
    #status { margin-top: 1rem; min-height: 1.5rem; color: var(--muted); }
  </style>
</head>
<body>
  <h1>Marquee</h1>
  <div class="clients">Connected screens: <span id="client-count">0</span></div>
  <div id="videos">
{{BUTTONS}}  </div>
  <div id="status"></div>
  <script>
    const status = document.getElementById('status');
    document.querySelectorAll('.video-btn').forEach(btn => {
      btn.addEventListener('click', async () => {
        const index = parseInt(btn.dataset.index, 10);
        try {
          const resp = await fetch('/play', {
            method: 'POST',
            headers: { 'Content-Type': 'application/json' },
            body: JSON.stringify({ index }),
          });
          const data = await resp.json();
          status.textContent = data.status === 'success' ? 'Playing ' + btn.textContent : 'Error: ' + data.message;
        } catch (e) {
          status.textContent = 'Error: ' + e;
        }
      });
    });

    async function updateClientCount() {
      try {
        const resp = await fetch('/clients/count');
        const data = await resp.json();
        document.getElementById('client-count').textContent = data.count;
      } catch (e) {}
    }
    updateClientCount();
    setInterval(updateClientCount, 5000);
  </script>
</body>
</html>
"##;
