//! Physical connection capability used by the conduit.
//!
//! # Responsibilities
//! - Define the operations the conduit needs from one HTTP request/response
//!   on the wire (headers, framing, body, response head, response body)
//! - Define the factory seam `(tls params, proxy, url) -> connection`
//! - Generate unique connection IDs for tracing
//!
//! # Connection States
//! ```text
//! Created → (connect) → Connected → (finish) → Sent → (response_head) → Answered
//!     any state → (disconnect) → Closed
//! ```
//!
//! # Design Decisions
//! - `connect` is idempotent: the trust check forces it, the first body
//!   write may call it again, and only the first call does any work
//! - A connection serves exactly one request; retransmissions open a new one
//! - Redirects are never followed below this layer

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::config::TlsClientParameters;
use crate::http::headers::HeaderSink;
use crate::message::{BodyReader, ProtocolHeaders};

/// Global atomic counter for connection IDs.
/// Relaxed ordering is enough since we only need uniqueness.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Session details a trust decider inspects once the connection is up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub url: String,
    /// Negotiated cipher suite; `None` for plain HTTP.
    pub cipher_suite: Option<String>,
    /// DER-encoded peer certificate chain, leaf first.
    pub peer_certificates: Vec<Vec<u8>>,
}

/// Status line and headers of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub reason: String,
    pub headers: ProtocolHeaders,
}

/// Everything a factory needs to build one connection.
#[derive(Debug, Clone)]
pub struct ConnectionRequest {
    pub url: Url,
    pub method: String,
    pub tls: Option<TlsClientParameters>,
    /// `host:port` of an HTTP proxy.
    pub proxy: Option<String>,
    pub connect_timeout: Option<Duration>,
    pub receive_timeout: Option<Duration>,
}

/// One HTTP request/response exchange on the wire.
///
/// Headers are set through the [`HeaderSink`] supertrait and must be set
/// before the first [`write`](PhysicalConnection::write).
#[async_trait]
pub trait PhysicalConnection: HeaderSink + Send {
    fn id(&self) -> ConnectionId;

    fn url(&self) -> &Url;

    fn method(&self) -> &str;

    /// Frame the body with `Content-Length: len`.
    fn set_fixed_length(&mut self, len: u64);

    /// Frame the body with chunked transfer encoding.
    fn set_chunked(&mut self);

    /// Establish the connection. Calls after the first are no-ops.
    async fn connect(&mut self) -> std::io::Result<()>;

    fn is_connected(&self) -> bool;

    /// Session info; only meaningful once connected.
    fn connection_info(&self) -> ConnectionInfo;

    /// Send body bytes.
    async fn write(&mut self, data: Bytes) -> std::io::Result<()>;

    /// End of request body; the request is complete on the wire after this.
    async fn finish(&mut self) -> std::io::Result<()>;

    /// Wait for the response status line and headers.
    async fn response_head(&mut self) -> std::io::Result<ResponseHead>;

    /// Response body as it arrives; `None` once taken or when the response
    /// carries no content.
    async fn take_response_body(&mut self) -> std::io::Result<Option<BodyReader>>;

    /// Close the connection. Safe to call more than once.
    async fn disconnect(&mut self);
}

/// Creates physical connections for the conduit.
pub trait ConnectionFactory: Send + Sync + fmt::Debug {
    fn create(&self, request: ConnectionRequest) -> std::io::Result<Box<dyn PhysicalConnection>>;
}
