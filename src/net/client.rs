//! Plain-HTTP physical connections built on `hyper`'s HTTP/1 client.
//!
//! # Responsibilities
//! - Open one TCP connection per request (directly or via an HTTP proxy)
//! - Frame the request body with `Content-Length` or chunked encoding
//! - Enforce connect and receive timeouts
//! - Stream the response body to the pipeline as it arrives
//!
//! # Design Decisions
//! - The low-level `client::conn` API is used so redirects are never
//!   followed and every attempt gets a fresh connection
//! - Chunked bodies stream through a bounded channel into the request task
//! - Response bodies stream through a bounded channel out of a pump task
//!   that owns the connection driver, so a dropped reader ends the
//!   connection and the receive timeout bounds each read
//! - `https` URLs are refused: TLS belongs to a TLS-capable factory

use std::future::Future;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::header::{HeaderMap, HeaderValue, HOST};
use http::{Method, Request};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Body, Frame, Incoming};
use hyper::client::conn::http1::SendRequest;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::io::StreamReader;
use url::{Position, Url};

use crate::http::headers::HeaderSink;
use crate::message::{BodyReader, ProtocolHeaders};
use crate::net::connection::{
    ConnectionFactory, ConnectionId, ConnectionInfo, ConnectionRequest, PhysicalConnection,
    ResponseHead,
};

type RequestBody = UnsyncBoxBody<Bytes, io::Error>;
type PendingResponse = JoinHandle<Result<hyper::Response<Incoming>, hyper::Error>>;

/// Chunks buffered between the body writer and the request task.
const CHUNK_CHANNEL_CAPACITY: usize = 8;

/// Response frames read ahead of the pipeline.
const RESPONSE_CHANNEL_CAPACITY: usize = 2;

/// Factory for [`HyperConnection`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct HyperConnectionFactory;

impl ConnectionFactory for HyperConnectionFactory {
    fn create(&self, request: ConnectionRequest) -> io::Result<Box<dyn PhysicalConnection>> {
        match request.url.scheme() {
            "http" => Ok(Box::new(HyperConnection::new(request))),
            "https" => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "https needs a TLS-capable connection factory",
            )),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported URL scheme '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Unset,
    Fixed(u64),
    Chunked,
}

/// One HTTP/1.1 request over a dedicated TCP connection.
pub struct HyperConnection {
    id: ConnectionId,
    request: ConnectionRequest,
    headers: HeaderMap,
    framing: Framing,
    connected: bool,
    sender: Option<SendRequest<RequestBody>>,
    driver: Option<JoinHandle<()>>,
    buffer: BytesMut,
    chunk_tx: Option<mpsc::Sender<Bytes>>,
    pending: Option<PendingResponse>,
    head: Option<ResponseHead>,
    body: Option<Incoming>,
}

impl HyperConnection {
    pub fn new(request: ConnectionRequest) -> Self {
        Self {
            id: ConnectionId::new(),
            request,
            headers: HeaderMap::new(),
            framing: Framing::Unset,
            connected: false,
            sender: None,
            driver: None,
            buffer: BytesMut::new(),
            chunk_tx: None,
            pending: None,
            head: None,
            body: None,
        }
    }

    /// Request target: absolute form through a proxy, origin form otherwise.
    fn request_target(&self) -> String {
        if self.request.proxy.is_some() {
            self.request.url[..Position::AfterQuery].to_string()
        } else {
            let target = &self.request.url[Position::BeforePath..Position::AfterQuery];
            if target.is_empty() {
                "/".to_string()
            } else {
                target.to_string()
            }
        }
    }

    fn host_header(url: &Url) -> Option<String> {
        let host = url.host_str()?;
        Some(match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        })
    }

    fn start_request(&mut self, body: RequestBody) -> io::Result<()> {
        let mut sender = self
            .sender
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "request already sent"))?;

        let method = Method::from_bytes(self.request.method.as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let mut request = Request::builder()
            .method(method)
            .uri(self.request_target())
            .body(body)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let mut headers = std::mem::take(&mut self.headers);
        if !headers.contains_key(HOST) {
            if let Some(host) = Self::host_header(&self.request.url) {
                if let Ok(value) = HeaderValue::from_str(&host) {
                    headers.insert(HOST, value);
                }
            }
        }
        *request.headers_mut() = headers;

        tracing::trace!(
            connection_id = %self.id,
            method = %self.request.method,
            url = %self.request.url,
            "Sending request"
        );
        self.pending = Some(tokio::spawn(async move { sender.send_request(request).await }));
        Ok(())
    }

    fn start_chunked(&mut self) -> io::Result<()> {
        let (tx, rx) = mpsc::channel::<Bytes>(CHUNK_CHANNEL_CAPACITY);
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv()
                .await
                .map(|chunk| (Ok::<_, io::Error>(Frame::data(chunk)), rx))
        });
        self.start_request(StreamBody::new(stream).boxed_unsync())?;
        self.chunk_tx = Some(tx);
        Ok(())
    }
}

async fn with_timeout<T, F>(limit: Option<Duration>, what: &str, fut: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match limit {
        Some(limit) if !limit.is_zero() => tokio::time::timeout(limit, fut).await.map_err(|_| {
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("{} timed out after {:?}", what, limit),
            )
        })?,
        _ => fut.await,
    }
}

/// Forward data frames of `body` into `tx` until the body ends, fails, or
/// the reader goes away; then stop the connection driver.
async fn pump_response(
    id: ConnectionId,
    mut body: Incoming,
    receive_timeout: Option<Duration>,
    tx: mpsc::Sender<io::Result<Bytes>>,
    driver: Option<JoinHandle<()>>,
) {
    loop {
        let next = tokio::select! {
            _ = tx.closed() => break,
            next = with_timeout(receive_timeout, "receive", async {
                body.frame().await.transpose().map_err(io::Error::other)
            }) => next,
        };
        match next {
            Ok(Some(frame)) => {
                let Ok(data) = frame.into_data() else { continue };
                if !data.is_empty() && tx.send(Ok(data)).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(connection_id = %id, error = %e, "Response body read failed");
                let _ = tx.send(Err(e)).await;
                break;
            }
        }
    }
    tracing::trace!(connection_id = %id, "Response body released");
    if let Some(driver) = driver {
        driver.abort();
    }
}

impl HeaderSink for HyperConnection {
    fn set_header(&mut self, name: &str, value: &str) {
        self.headers.set_header(name, value);
    }

    fn add_header(&mut self, name: &str, value: &str) {
        self.headers.add_header(name, value);
    }
}

#[async_trait]
impl PhysicalConnection for HyperConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn url(&self) -> &Url {
        &self.request.url
    }

    fn method(&self) -> &str {
        &self.request.method
    }

    fn set_fixed_length(&mut self, len: u64) {
        self.framing = Framing::Fixed(len);
    }

    fn set_chunked(&mut self) {
        self.framing = Framing::Chunked;
    }

    async fn connect(&mut self) -> io::Result<()> {
        if self.connected {
            return Ok(());
        }

        let stream = match &self.request.proxy {
            Some(proxy) => {
                with_timeout(self.request.connect_timeout, "connect", TcpStream::connect(proxy.as_str()))
                    .await?
            }
            None => {
                let host = self
                    .request
                    .url
                    .host_str()
                    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "URL has no host"))?
                    .to_string();
                let port = self.request.url.port_or_known_default().unwrap_or(80);
                with_timeout(
                    self.request.connect_timeout,
                    "connect",
                    TcpStream::connect((host.as_str(), port)),
                )
                .await?
            }
        };
        stream.set_nodelay(true)?;

        let (sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(io::Error::other)?;
        let id = self.id;
        self.driver = Some(tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(connection_id = %id, error = %e, "Connection closed with error");
            }
        }));
        self.sender = Some(sender);
        self.connected = true;
        tracing::debug!(connection_id = %self.id, url = %self.request.url, "Connected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            url: self.request.url.to_string(),
            cipher_suite: None,
            peer_certificates: Vec::new(),
        }
    }

    async fn write(&mut self, data: Bytes) -> io::Result<()> {
        self.connect().await?;
        if self.framing != Framing::Chunked {
            self.buffer.extend_from_slice(&data);
            return Ok(());
        }
        if self.chunk_tx.is_none() {
            self.start_chunked()?;
        }
        match &self.chunk_tx {
            Some(tx) => tx
                .send(data)
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "request body receiver closed")),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "request body already finished")),
        }
    }

    async fn finish(&mut self) -> io::Result<()> {
        if self.pending.is_some() {
            // Dropping the sender ends the chunked body.
            self.chunk_tx = None;
            return Ok(());
        }
        self.connect().await?;
        let body = self.buffer.split().freeze();
        if let Framing::Fixed(len) = self.framing {
            if len != body.len() as u64 {
                tracing::debug!(
                    connection_id = %self.id,
                    declared = len,
                    actual = body.len(),
                    "Declared length differs from body; sending actual length"
                );
            }
        }
        self.start_request(Full::new(body).map_err(|never| match never {}).boxed_unsync())
    }

    async fn response_head(&mut self) -> io::Result<ResponseHead> {
        if let Some(head) = &self.head {
            return Ok(head.clone());
        }
        if self.pending.is_none() || self.chunk_tx.is_some() {
            self.finish().await?;
        }
        let pending = self
            .pending
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no request in flight"))?;

        let response = with_timeout(self.request.receive_timeout, "receive", async {
            pending
                .await
                .map_err(io::Error::other)?
                .map_err(io::Error::other)
        })
        .await?;

        let (parts, body) = response.into_parts();
        let reason = parts
            .extensions
            .get::<hyper::ext::ReasonPhrase>()
            .and_then(|r| std::str::from_utf8(r.as_bytes()).ok().map(str::to_string))
            .or_else(|| parts.status.canonical_reason().map(str::to_string))
            .unwrap_or_default();
        let mut headers = ProtocolHeaders::new();
        for (name, value) in parts.headers.iter() {
            match value.to_str() {
                Ok(value) => headers.append(name.as_str(), value),
                Err(_) => tracing::debug!(header = %name, "Skipping non-visible-ASCII response header"),
            }
        }

        let head = ResponseHead {
            status: parts.status.as_u16(),
            reason,
            headers,
        };
        tracing::debug!(connection_id = %self.id, status = head.status, "Response received");
        self.head = Some(head.clone());
        self.body = Some(body);
        Ok(head)
    }

    async fn take_response_body(&mut self) -> io::Result<Option<BodyReader>> {
        let Some(body) = self.body.take() else {
            return Ok(None);
        };
        if body.is_end_stream() || body.size_hint().exact() == Some(0) {
            return Ok(None);
        }

        let (tx, mut rx) = mpsc::channel(RESPONSE_CHANNEL_CAPACITY);
        tokio::spawn(pump_response(
            self.id,
            body,
            self.request.receive_timeout,
            tx,
            self.driver.take(),
        ));

        // Chunked or close-delimited bodies may still turn out empty.
        let first = match rx.recv().await {
            Some(Ok(first)) => first,
            Some(Err(e)) => return Err(e),
            None => return Ok(None),
        };
        let frames = tokio_stream::once(Ok::<_, io::Error>(first)).chain(ReceiverStream::new(rx));
        Ok(Some(BodyReader::new(StreamReader::new(frames))))
    }

    async fn disconnect(&mut self) {
        self.chunk_tx = None;
        self.sender = None;
        self.body = None;
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        if self.connected {
            tracing::trace!(connection_id = %self.id, "Disconnected");
        }
        self.connected = false;
    }
}

impl Drop for HyperConnection {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}
