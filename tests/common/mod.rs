//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use futures_util::StreamExt;
use tokio::net::TcpListener;

/// `Authorization` value for dave/secret.
pub const DAVE: &str = "Basic ZGF2ZTpzZWNyZXQ=";

/// Bind `app` on an ephemeral local port and serve it in the background.
pub async fn spawn_app(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Size of the `/large` response body.
pub const LARGE_BODY: usize = 100 * 1024;

/// Requests seen by the mock backend.
#[derive(Default)]
pub struct Hits {
    pub total: AtomicUsize,
}

impl Hits {
    pub fn count(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

/// A backend covering the conduit's interesting responses:
///
/// - `/ok`       200 `hello`
/// - `/redirect` 302 to `/ok` (absolute)
/// - `/loop`     302 to itself
/// - `/secure`   401 Basic challenge unless dave/secret is presented
/// - `/missing`  404
/// - `/echo`     echoes the body; `X-Seen-Content-Length` reports framing
/// - `/login`    sets a session cookie
/// - `/whoami`   echoes the `Cookie` header
/// - `/accepted` bare 202 with `Content-Length: 0`
/// - `/accepted-chunked` 202 with an empty chunked body
/// - `/large`    200 with [`LARGE_BODY`] bytes
/// - `/slow`     200 that sends `first` and then stalls
pub async fn start_backend() -> (SocketAddr, Arc<Hits>) {
    let hits = Arc::new(Hits::default());
    let app = Router::new()
        .route("/ok", any(ok))
        .route("/redirect", any(redirect))
        .route("/loop", any(redirect_loop))
        .route("/secure", any(secure))
        .route("/missing", any(missing))
        .route("/echo", any(echo))
        .route("/login", any(login))
        .route("/whoami", any(whoami))
        .route("/accepted", any(accepted))
        .route("/accepted-chunked", any(accepted_chunked))
        .route("/large", any(large))
        .route("/slow", any(slow))
        .with_state(hits.clone());
    (spawn_app(app).await, hits)
}

fn count(hits: &Hits) {
    hits.total.fetch_add(1, Ordering::SeqCst);
}

fn host(headers: &HeaderMap) -> String {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost")
        .to_string()
}

async fn ok(State(hits): State<Arc<Hits>>) -> &'static str {
    count(&hits);
    "hello"
}

async fn redirect(State(hits): State<Arc<Hits>>, headers: HeaderMap) -> Response {
    count(&hits);
    let location = format!("http://{}/ok", host(&headers));
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

async fn redirect_loop(State(hits): State<Arc<Hits>>, headers: HeaderMap) -> Response {
    count(&hits);
    let location = format!("http://{}/loop", host(&headers));
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

async fn secure(State(hits): State<Arc<Hits>>, headers: HeaderMap) -> Response {
    count(&hits);
    match headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        Some(DAVE) => "welcome dave".into_response(),
        _ => (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Basic realm=\"test\"")],
            "denied",
        )
            .into_response(),
    }
}

async fn missing(State(hits): State<Arc<Hits>>) -> Response {
    count(&hits);
    (StatusCode::NOT_FOUND, "nothing here").into_response()
}

async fn echo(State(hits): State<Arc<Hits>>, headers: HeaderMap, body: Bytes) -> Response {
    count(&hits);
    let length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("none")
        .to_string();
    ([("x-seen-content-length", length)], body).into_response()
}

async fn login(State(hits): State<Arc<Hits>>) -> Response {
    count(&hits);
    ([(header::SET_COOKIE, "session=abc123; Path=/")], "logged in").into_response()
}

async fn whoami(State(hits): State<Arc<Hits>>, headers: HeaderMap) -> String {
    count(&hits);
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("anonymous")
        .to_string()
}

async fn accepted(State(hits): State<Arc<Hits>>) -> StatusCode {
    count(&hits);
    StatusCode::ACCEPTED
}

async fn accepted_chunked(State(hits): State<Arc<Hits>>) -> Response {
    count(&hits);
    let empty = futures_util::stream::empty::<Result<Bytes, std::io::Error>>();
    (StatusCode::ACCEPTED, Body::from_stream(empty)).into_response()
}

async fn large(State(hits): State<Arc<Hits>>) -> Vec<u8> {
    count(&hits);
    vec![b'x'; LARGE_BODY]
}

async fn slow(State(hits): State<Arc<Hits>>) -> Response {
    count(&hits);
    let first = futures_util::stream::once(async {
        Ok::<_, std::io::Error>(Bytes::from_static(b"first"))
    });
    Body::from_stream(first.chain(futures_util::stream::pending())).into_response()
}
