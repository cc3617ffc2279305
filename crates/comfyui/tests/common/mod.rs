//! In-process stand-in for a ComfyUI server.
//!
//! Serves `POST /prompt`, `POST /free` and `GET /ws` on an ephemeral
//! loopback port. The WebSocket replays a scripted list of frames and
//! then stays open until the client hangs up (or closes it, if asked).

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

/// How `POST /prompt` answers.
#[derive(Clone)]
pub enum SubmitReply {
    PromptId(String),
    Status(u16, String),
    Body(Value),
}

/// One frame pushed to the client over the WebSocket.
#[derive(Clone)]
pub enum Frame {
    Json(Value),
    Binary(Vec<u8>),
    Text(String),
}

#[derive(Clone)]
pub struct Script {
    pub submit: SubmitReply,
    pub frames: Vec<Frame>,
    /// Close the socket right after the scripted frames.
    pub close_after_frames: bool,
    pub free_status: u16,
}

impl Script {
    pub fn new(prompt_id: &str) -> Self {
        Self {
            submit: SubmitReply::PromptId(prompt_id.to_string()),
            frames: Vec::new(),
            close_after_frames: false,
            free_status: 200,
        }
    }

    pub fn executing(mut self, prompt_id: &str, node: Option<&str>) -> Self {
        self.frames.push(Frame::Json(json!({
            "type": "executing",
            "data": { "node": node, "prompt_id": prompt_id },
        })));
        self
    }

    /// A binary frame: 8 header bytes followed by `payload`.
    pub fn image(mut self, payload: &[u8]) -> Self {
        let mut frame = vec![0, 0, 0, 1, 0, 0, 0, 2];
        frame.extend_from_slice(payload);
        self.frames.push(Frame::Binary(frame));
        self
    }

    pub fn frame(mut self, frame: Frame) -> Self {
        self.frames.push(frame);
        self
    }
}

/// What the mock saw from the client.
#[derive(Default)]
pub struct Recorded {
    pub submissions: Vec<Value>,
    pub ws_client_ids: Vec<String>,
    pub free_requests: Vec<Value>,
}

struct MockState {
    script: Script,
    recorded: Mutex<Recorded>,
}

pub struct MockComfyUI {
    pub addr: SocketAddr,
    state: Arc<MockState>,
}

impl MockComfyUI {
    pub async fn start(script: Script) -> Self {
        let state = Arc::new(MockState {
            script,
            recorded: Mutex::new(Recorded::default()),
        });

        let app = Router::new()
            .route("/prompt", post(submit))
            .route("/free", post(free))
            .route("/ws", get(ws_upgrade))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    /// `host:port` as the client expects it.
    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    pub fn with_recorded<T>(&self, f: impl FnOnce(&Recorded) -> T) -> T {
        f(&self.state.recorded.lock().unwrap())
    }
}

async fn submit(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> impl IntoResponse {
    state.recorded.lock().unwrap().submissions.push(body);
    match &state.script.submit {
        SubmitReply::PromptId(id) => {
            (StatusCode::OK, Json(json!({ "prompt_id": id, "number": 0 }))).into_response()
        }
        SubmitReply::Status(code, body) => {
            (StatusCode::from_u16(*code).unwrap(), body.clone()).into_response()
        }
        SubmitReply::Body(body) => (StatusCode::OK, Json(body.clone())).into_response(),
    }
}

async fn free(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> impl IntoResponse {
    state.recorded.lock().unwrap().free_requests.push(body);
    StatusCode::from_u16(state.script.free_status).unwrap()
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<MockState>>,
) -> impl IntoResponse {
    if let Some(id) = params.get("clientId") {
        state.recorded.lock().unwrap().ws_client_ids.push(id.clone());
    }
    ws.on_upgrade(move |socket| replay(socket, state))
}

async fn replay(mut socket: WebSocket, state: Arc<MockState>) {
    for frame in &state.script.frames {
        let msg = match frame {
            Frame::Json(value) => Message::Text(value.to_string().into()),
            Frame::Text(text) => Message::Text(text.clone().into()),
            Frame::Binary(bytes) => Message::Binary(bytes.clone().into()),
        };
        if socket.send(msg).await.is_err() {
            return;
        }
    }

    if state.script.close_after_frames {
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    while let Some(Ok(msg)) = socket.recv().await {
        if matches!(msg, Message::Close(_)) {
            break;
        }
    }
}
