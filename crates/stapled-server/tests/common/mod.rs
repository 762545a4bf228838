//! Shared test harness: an in-process OCSP responder with scriptable
//! responses, headers, and 304 behavior.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;

#[derive(Default)]
pub struct MockResponder {
    response: Mutex<Vec<u8>>,
    etag: Mutex<Option<String>>,
    cache_control: Mutex<Option<String>>,
    not_modified: Mutex<bool>,
    hits: AtomicUsize,
}

impl MockResponder {
    /// Bind an ephemeral port and serve `initial` for every request.
    pub async fn start(initial: Vec<u8>) -> (Arc<Self>, String) {
        let state = Arc::new(MockResponder {
            response: Mutex::new(initial),
            ..Default::default()
        });
        let router = Router::new().fallback(serve).with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock responder");
        let url = format!("http://{}", listener.local_addr().expect("local addr"));
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        (state, url)
    }

    pub fn set_response(&self, bytes: Vec<u8>) {
        *self.response.lock().unwrap() = bytes;
        *self.not_modified.lock().unwrap() = false;
    }

    pub fn set_etag(&self, etag: Option<&str>) {
        *self.etag.lock().unwrap() = etag.map(|e| e.to_string());
    }

    pub fn set_cache_control(&self, value: Option<&str>) {
        *self.cache_control.lock().unwrap() = value.map(|v| v.to_string());
    }

    /// Answer every request with 304 until the next `set_response`.
    pub fn answer_not_modified(&self) {
        *self.not_modified.lock().unwrap() = true;
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn serve(State(state): State<Arc<MockResponder>>) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);

    let mut builder = Response::builder();
    if let Some(etag) = state.etag.lock().unwrap().clone() {
        builder = builder.header(header::ETAG, etag);
    }
    if let Some(cache_control) = state.cache_control.lock().unwrap().clone() {
        builder = builder.header(header::CACHE_CONTROL, cache_control);
    }

    if *state.not_modified.lock().unwrap() {
        return builder
            .status(StatusCode::NOT_MODIFIED)
            .body(axum::body::Body::empty())
            .expect("build 304")
            .into_response();
    }

    let body = state.response.lock().unwrap().clone();
    builder
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/ocsp-response"),
        )
        .body(axum::body::Body::from(body))
        .expect("build 200")
        .into_response()
}
