//! In-process stand-in for the analysis backend.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use data_processor::services::file_check::SelectedFile;
use data_processor::Config;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::broadcast;

#[derive(Clone, Default)]
pub struct Behaviour {
    pub analyze_error: Option<(u16, &'static str)>,
    pub analyze_delay: Duration,
    pub process_error: Option<(u16, &'static str)>,
    pub process_delay: Duration,
    /// Frames pushed to every progress socket when `/process-dataset` is hit.
    pub process_events: Vec<Value>,
}

#[derive(Default)]
pub struct Hits {
    pub analyze: AtomicUsize,
    pub process: AtomicUsize,
    pub sockets: AtomicUsize,
    pub upload_fields: Mutex<Vec<(String, String)>>,
    pub process_body: Mutex<Option<Value>>,
    pub socket_sessions: Mutex<Vec<String>>,
}

struct Mock {
    behaviour: Behaviour,
    hits: Arc<Hits>,
    events: broadcast::Sender<String>,
}

pub struct MockBackend {
    pub addr: SocketAddr,
    pub hits: Arc<Hits>,
}

impl MockBackend {
    pub async fn start(behaviour: Behaviour) -> MockBackend {
        let hits = Arc::new(Hits::default());
        let (events, _) = broadcast::channel(32);
        let mock = Arc::new(Mock {
            behaviour,
            hits: hits.clone(),
            events,
        });

        let router = Router::new()
            .route("/analyze-dataset", post(analyze))
            .route("/process-dataset", post(process))
            .route("/ws/progress/:session_id", get(progress))
            .with_state(mock);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        MockBackend { addr, hits }
    }

    pub fn config(&self) -> Config {
        let mut config = Config::with_api_url(&format!("http://{}", self.addr));
        config.reconnect_delay = Duration::from_millis(10);
        config
    }

    pub fn count(&self, counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub fn metadata_json() -> Value {
    json!({
        "columns": [
            {"name": "region", "dtype": "object", "unique_count": 2, "missing_count": 0},
            {"name": "sales", "dtype": "float64", "unique_count": 3, "missing_count": 1}
        ],
        "can_aggregate": true,
        "can_filter": true,
        "sample_data": [
            {"region": "north", "sales": 120.0},
            {"region": "south", "sales": null}
        ]
    })
}

pub fn result_json() -> Value {
    json!({
        "result": [
            {"region": "north", "sales": 120.0},
            {"region": "south", "sales": 80.5}
        ],
        "graphs": [
            {
                "chart_type": "bar",
                "chart_data": [{"name": "north", "sales": 120.0}, {"name": "south", "sales": 80.5}],
                "value_key": "sales"
            },
            {"chart_type": "pie", "chart_data": [], "value_key": "sales"}
        ]
    })
}

fn failure(status: u16, detail: &str) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({ "detail": detail }))).into_response()
}

async fn analyze(State(mock): State<Arc<Mock>>, mut multipart: Multipart) -> Response {
    mock.hits.analyze.fetch_add(1, Ordering::SeqCst);

    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let bytes = field.bytes().await.unwrap_or_default();
        let value = file_name.unwrap_or_else(|| String::from_utf8_lossy(&bytes).into_owned());
        mock.hits.upload_fields.lock().push((name, value));
    }
    tokio::time::sleep(mock.behaviour.analyze_delay).await;

    match mock.behaviour.analyze_error {
        Some((status, detail)) => failure(status, detail),
        None => Json(metadata_json()).into_response(),
    }
}

async fn process(State(mock): State<Arc<Mock>>, Json(body): Json<Value>) -> Response {
    mock.hits.process.fetch_add(1, Ordering::SeqCst);
    *mock.hits.process_body.lock() = Some(body);

    for frame in &mock.behaviour.process_events {
        let _ = mock.events.send(frame.to_string());
    }
    tokio::time::sleep(mock.behaviour.process_delay).await;

    match mock.behaviour.process_error {
        Some((status, detail)) => failure(status, detail),
        None => Json(result_json()).into_response(),
    }
}

async fn progress(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(mock): State<Arc<Mock>>,
) -> Response {
    let events = mock.events.subscribe();
    mock.hits.socket_sessions.lock().push(session_id);
    mock.hits.sockets.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |socket| forward(socket, events))
}

async fn forward(mut socket: WebSocket, mut events: broadcast::Receiver<String>) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(text) => {
                    if socket.send(Message::Text(text)).await.is_err() {
                        return;
                    }
                }
                Err(_) => return,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            },
        }
    }
}

pub async fn csv_file(dir: &tempfile::TempDir, name: &str) -> SelectedFile {
    let path = dir.path().join(name);
    tokio::fs::write(&path, "region,sales\nnorth,120\nsouth,\n")
        .await
        .unwrap();
    SelectedFile::from_path(&path).await.unwrap()
}

/// Accepts TCP connections and drops them before any handshake. Returns the
/// address and a connect counter.
pub async fn dropping_listener() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connects = Arc::new(AtomicUsize::new(0));
    tokio::spawn({
        let connects = connects.clone();
        async move {
            while let Ok((stream, _)) = listener.accept().await {
                connects.fetch_add(1, Ordering::SeqCst);
                drop(stream);
            }
        }
    });
    (addr, connects)
}

/// Completes the WebSocket handshake, then closes straight away.
pub async fn handshake_then_drop_listener() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let opens = Arc::new(AtomicUsize::new(0));
    tokio::spawn({
        let opens = opens.clone();
        async move {
            while let Ok((stream, _)) = listener.accept().await {
                if let Ok(socket) = tokio_tungstenite::accept_async(stream).await {
                    opens.fetch_add(1, Ordering::SeqCst);
                    drop(socket);
                }
            }
        }
    });
    (addr, opens)
}

/// Polls `check` every few milliseconds until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
