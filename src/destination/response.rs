//! Outbound response handle of a destination.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use bytes::{Bytes, BytesMut};
use http::header::{HeaderMap, CONTENT_LENGTH, LOCATION};
use http::{Response, StatusCode};
use tokio::sync::Mutex;

use crate::http::headers::HeaderSink;

/// The physical response a destination writes to.
#[async_trait]
pub trait ServerResponse: HeaderSink + Send {
    fn set_status(&mut self, status: u16);

    fn status(&self) -> u16;

    fn set_content_length(&mut self, len: u64);

    /// True once the status and headers can no longer change.
    fn is_committed(&self) -> bool;

    async fn write(&mut self, data: Bytes) -> io::Result<()>;

    async fn close(&mut self) -> io::Result<()>;

    /// Answer with a redirect to `location` instead of dispatching.
    fn send_redirect(&mut self, location: &str);

    fn is_redirected(&self) -> bool;
}

/// Response handle shared between the server adapter and the message.
pub type SharedResponse = Arc<Mutex<dyn ServerResponse>>;

/// A response collected in memory and turned into an `http::Response`
/// once the destination is done with it.
#[derive(Debug)]
pub struct BufferedResponse {
    status: u16,
    headers: HeaderMap,
    content_length: Option<u64>,
    body: BytesMut,
    committed: bool,
    closed: bool,
    redirected: bool,
}

impl Default for BufferedResponse {
    fn default() -> Self {
        Self {
            status: 200,
            headers: HeaderMap::new(),
            content_length: None,
            body: BytesMut::new(),
            committed: false,
            closed: false,
            redirected: false,
        }
    }
}

impl BufferedResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh response behind the lock the destination expects.
    pub fn shared() -> Arc<Mutex<BufferedResponse>> {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn into_http_response(self) -> Response<Body> {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut headers = self.headers;
        if let Some(len) = self.content_length {
            headers.insert(CONTENT_LENGTH, len.into());
        }
        let mut response = Response::new(Body::from(self.body.freeze()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

impl HeaderSink for BufferedResponse {
    fn set_header(&mut self, name: &str, value: &str) {
        self.headers.set_header(name, value);
    }

    fn add_header(&mut self, name: &str, value: &str) {
        self.headers.add_header(name, value);
    }
}

#[async_trait]
impl ServerResponse for BufferedResponse {
    fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    fn status(&self) -> u16 {
        self.status
    }

    fn set_content_length(&mut self, len: u64) {
        self.content_length = Some(len);
    }

    fn is_committed(&self) -> bool {
        self.committed
    }

    async fn write(&mut self, data: Bytes) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "response already closed"));
        }
        self.committed = true;
        self.body.extend_from_slice(&data);
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        self.committed = true;
        self.closed = true;
        Ok(())
    }

    fn send_redirect(&mut self, location: &str) {
        self.status = StatusCode::FOUND.as_u16();
        self.headers.set_header(LOCATION.as_str(), location);
        self.redirected = true;
        self.committed = true;
        self.closed = true;
    }

    fn is_redirected(&self) -> bool {
        self.redirected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collects_status_headers_and_body() {
        let mut response = BufferedResponse::new();
        response.set_status(201);
        response.set_header("X-Trace", "abc");
        response.write(Bytes::from_static(b"created")).await.unwrap();
        response.close().await.unwrap();
        assert!(response.is_committed());

        let response = response.into_http_response();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["x-trace"], "abc");
    }

    #[tokio::test]
    async fn write_after_close_fails() {
        let mut response = BufferedResponse::new();
        response.close().await.unwrap();
        assert!(response.write(Bytes::from_static(b"late")).await.is_err());
    }

    #[test]
    fn redirect_sets_location() {
        let mut response = BufferedResponse::new();
        response.send_redirect("http://elsewhere/");
        assert!(response.is_redirected());
        assert_eq!(response.status(), 302);
        assert_eq!(response.header("location"), Some("http://elsewhere/"));
    }

    #[test]
    fn content_length_becomes_header() {
        let mut response = BufferedResponse::new();
        response.set_content_length(0);
        let response = response.into_http_response();
        assert_eq!(response.headers()[CONTENT_LENGTH], "0");
    }
}
