//! Local in-memory HTTP fixture server for integration tests.
//!
//! Serves configurable blobs under arbitrary paths with per-path request
//! counting, failure injection (always-fail and fail-after-N), response
//! delays, and request-header capture. No external network is touched.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use bytes::Bytes;
use tokio::net::TcpListener;

#[derive(Default)]
struct FixtureState {
    bodies: Mutex<HashMap<String, Bytes>>,
    hits: Mutex<HashMap<String, usize>>,
    fail_paths: Mutex<HashSet<String>>,
    // Remaining successes before the path starts failing.
    successes_before_fail: Mutex<HashMap<String, usize>>,
    delays: Mutex<HashMap<String, Duration>>,
    last_headers: Mutex<HashMap<String, Vec<(String, String)>>>,
}

/// Handle to a running fixture server.
pub struct Fixture {
    pub base_url: String,
    state: Arc<FixtureState>,
}

impl Fixture {
    /// Bind an ephemeral port and start serving.
    pub async fn start() -> Self {
        init_logging();
        let state = Arc::new(FixtureState::default());
        let app = Router::new().fallback(serve).with_state(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fixture listener");
        let addr = listener.local_addr().expect("fixture addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("fixture server");
        });
        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    /// Absolute URL for a fixture path.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Serve `bytes` at `path`.
    pub fn set_body(&self, path: &str, bytes: impl Into<Bytes>) {
        self.state
            .bodies
            .lock()
            .unwrap()
            .insert(path.to_string(), bytes.into());
    }

    /// Make every request to `path` answer 500.
    pub fn set_fail(&self, path: &str) {
        self.state.fail_paths.lock().unwrap().insert(path.to_string());
    }

    /// Let the first `successes` requests to `path` succeed, then fail.
    pub fn set_fail_after(&self, path: &str, successes: usize) {
        self.state
            .successes_before_fail
            .lock()
            .unwrap()
            .insert(path.to_string(), successes);
    }

    /// Delay responses for `path`.
    pub fn set_delay(&self, path: &str, delay: Duration) {
        self.state
            .delays
            .lock()
            .unwrap()
            .insert(path.to_string(), delay);
    }

    /// Number of requests observed for `path` (any method).
    pub fn hits(&self, path: &str) -> usize {
        self.state
            .hits
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    /// Value of a request header captured from the most recent request to
    /// `path`.
    pub fn last_header(&self, path: &str, name: &str) -> Option<String> {
        self.state
            .last_headers
            .lock()
            .unwrap()
            .get(path)?
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }
}

async fn serve(State(state): State<Arc<FixtureState>>, req: Request<Body>) -> Response<Body> {
    let path = req.uri().path().to_string();

    *state.hits.lock().unwrap().entry(path.clone()).or_insert(0) += 1;
    let headers: Vec<(String, String)> = req
        .headers()
        .iter()
        .filter_map(|(n, v)| v.to_str().ok().map(|v| (n.to_string(), v.to_string())))
        .collect();
    state
        .last_headers
        .lock()
        .unwrap()
        .insert(path.clone(), headers);

    let delay = state.delays.lock().unwrap().get(&path).copied();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    let failing = {
        if state.fail_paths.lock().unwrap().contains(&path) {
            true
        } else {
            let mut budget = state.successes_before_fail.lock().unwrap();
            match budget.get_mut(&path) {
                Some(remaining) if *remaining == 0 => true,
                Some(remaining) => {
                    *remaining -= 1;
                    false
                }
                None => false,
            }
        }
    };
    if failing {
        return respond(StatusCode::INTERNAL_SERVER_ERROR, Bytes::from_static(b"fixture failure"));
    }

    let body = state.bodies.lock().unwrap().get(&path).cloned();
    match body {
        Some(bytes) => respond(StatusCode::OK, bytes),
        None => respond(StatusCode::NOT_FOUND, Bytes::from_static(b"not found")),
    }
}

fn respond(status: StatusCode, body: Bytes) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("content-type", "application/octet-stream")
        .body(Body::from(body))
        .expect("fixture response")
}

/// Initialize test logging once per binary.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
