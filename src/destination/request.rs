//! Inbound request seen by a destination.

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue, HOST};
use http::request::Parts;
use uuid::Uuid;

use crate::message::BodyReader;

/// The physical request a destination is invoked with.
///
/// One physical request may be invoked more than once when its processing
/// is suspended; `key` identifies it across invocations.
pub trait ServerRequest: Send {
    fn key(&self) -> &str;

    fn method(&self) -> &str;

    /// Path part of the request URI.
    fn request_uri(&self) -> &str;

    /// Absolute request URL, without the query.
    fn request_url(&self) -> String;

    fn query_string(&self) -> Option<&str>;

    fn headers(&self) -> &HeaderMap;

    fn user_principal(&self) -> Option<&str> {
        None
    }

    /// The request body; empty once taken.
    fn take_body(&mut self) -> BodyReader;

    fn header(&self, name: &str) -> Option<&str> {
        self.headers().get(name).and_then(|v| v.to_str().ok())
    }
}

/// A request whose body was read into memory.
#[derive(Debug)]
pub struct BufferedRequest {
    key: String,
    method: String,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    body: Option<Bytes>,
    principal: Option<String>,
}

impl BufferedRequest {
    pub fn new(method: &str, uri: &str) -> Self {
        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (uri.to_string(), None),
        };
        Self {
            key: Uuid::new_v4().to_string(),
            method: method.to_ascii_uppercase(),
            path,
            query,
            headers: HeaderMap::new(),
            body: None,
            principal: None,
        }
    }

    pub fn from_parts(parts: Parts, body: Bytes) -> Self {
        let mut request = Self::new(parts.method.as_str(), parts.uri.path());
        request.query = parts.uri.query().map(str::to_string);
        request.headers = parts.headers;
        request.body = Some(body);
        request
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => tracing::warn!(header = %name, "Dropping invalid request header"),
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }
}

impl ServerRequest for BufferedRequest {
    fn key(&self) -> &str {
        &self.key
    }

    fn method(&self) -> &str {
        &self.method
    }

    fn request_uri(&self) -> &str {
        &self.path
    }

    fn request_url(&self) -> String {
        let host = self
            .headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("localhost");
        format!("http://{}{}", host, self.path)
    }

    fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn user_principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    fn take_body(&mut self) -> BodyReader {
        self.body.take().map(BodyReader::from_bytes).unwrap_or_else(BodyReader::empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_query_and_builds_url() {
        let request = BufferedRequest::new("post", "/svc/orders?id=3").with_header("Host", "example.org:8080");
        assert_eq!(request.method(), "POST");
        assert_eq!(request.request_uri(), "/svc/orders");
        assert_eq!(request.query_string(), Some("id=3"));
        assert_eq!(request.request_url(), "http://example.org:8080/svc/orders");
    }

    #[tokio::test]
    async fn body_taken_once() {
        let mut request = BufferedRequest::new("POST", "/").with_body("abc");
        let first = request.take_body().read_to_end().await.unwrap();
        let second = request.take_body().read_to_end().await.unwrap();
        assert_eq!(&first[..], b"abc");
        assert!(second.is_empty());
    }

    #[test]
    fn from_http_parts() {
        let (parts, _) = http::Request::builder()
            .method("PUT")
            .uri("/a/b?x=1")
            .header("Content-Type", "text/plain")
            .body(())
            .unwrap()
            .into_parts();
        let request = BufferedRequest::from_parts(parts, Bytes::from_static(b"hi"));
        assert_eq!(request.method(), "PUT");
        assert_eq!(request.query_string(), Some("x=1"));
        assert_eq!(request.header("content-type"), Some("text/plain"));
    }
}
