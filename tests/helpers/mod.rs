#![allow(dead_code)] // Test helpers appear unused when compiled independently

use axum::{
    body::Bytes,
    extract::State,
    http::{Method, StatusCode, Uri},
    routing::get,
    Router,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

const WAIT_ATTEMPTS: usize = 50;
const WAIT_DELAY: Duration = Duration::from_millis(100);

/// One request seen by the mock logging endpoint.
#[derive(Clone, Debug, Serialize)]
pub struct Hit {
    pub method: String,
    pub uri: String,
    pub content_type: Option<String>,
    pub body: String,
}

#[derive(Clone)]
struct CollectorState {
    hits: Arc<Mutex<Vec<Hit>>>,
    reject_posts: bool,
}

pub struct MockCollector {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
    hits: Arc<Mutex<Vec<Hit>>>,
    pub base_url: String,
}

impl MockCollector {
    pub async fn hits(&self) -> Vec<Hit> {
        self.hits.lock().await.clone()
    }

    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }
}

/// Best-effort check for whether binding to loopback is permitted in the current sandbox.
pub async fn can_bind_loopback() -> bool {
    match TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => false,
        Err(_) => true, // treat other errors as non-fatal for skipping
    }
}

/// Spawn a logging endpoint on a free port. With `reject_posts`, every POST
/// answers 503 so only the pixel tier can succeed.
pub async fn spawn_mock_collector(reject_posts: bool) -> MockCollector {
    let hits = Arc::new(Mutex::new(Vec::new()));
    let state = CollectorState {
        hits: hits.clone(),
        reject_posts,
    };

    let app = Router::new()
        .route("/l", get(record).post(record))
        .route("/xls", axum::routing::post(record))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind mock collector listener");
    let port = listener.local_addr().unwrap().port();

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });
        if let Err(err) = server.await {
            eprintln!("mock collector server error: {}", err);
        }
    });

    MockCollector {
        shutdown_tx,
        handle,
        hits,
        base_url: format!("http://127.0.0.1:{}", port),
    }
}

/// Poll the collector until at least `min_count` hits have arrived.
pub async fn wait_for_hits(collector: &MockCollector, min_count: usize) -> Vec<Hit> {
    poll_until(|| async {
        let hits = collector.hits().await;
        (hits.len() >= min_count).then_some(hits)
    })
    .await
    .unwrap_or_else(|| panic!("timed out waiting for {} hits", min_count))
}

async fn poll_until<T, F, Fut>(mut f: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for _ in 0..WAIT_ATTEMPTS {
        if let Some(result) = f().await {
            return Some(result);
        }
        tokio::time::sleep(WAIT_DELAY).await;
    }
    None
}

/// Decode the `DATA` parameter of a batch into its JSON events.
pub fn decode_events(body_or_query: &str) -> Vec<serde_json::Value> {
    let data = body_or_query
        .split('&')
        .find_map(|pair| pair.strip_prefix("DATA="))
        .expect("missing DATA parameter");
    let json = urlencoding::decode(data).expect("DATA is not valid percent-encoding");
    serde_json::from_str(&json).expect("DATA is not a JSON array")
}

async fn record(
    State(state): State<CollectorState>,
    method: Method,
    uri: Uri,
    headers: axum::http::HeaderMap,
    body: Bytes,
) -> StatusCode {
    state.hits.lock().await.push(Hit {
        method: method.to_string(),
        uri: uri.to_string(),
        content_type: headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string()),
        body: String::from_utf8_lossy(&body).into_owned(),
    });

    if state.reject_posts && method == Method::POST {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::NO_CONTENT
    }
}
