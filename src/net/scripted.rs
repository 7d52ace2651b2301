//! In-memory connections that replay canned responses, for unit tests.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::http::headers::HeaderSink;
use crate::message::{BodyReader, ProtocolHeaders};
use crate::net::connection::{
    ConnectionFactory, ConnectionId, ConnectionInfo, ConnectionRequest, PhysicalConnection,
    ResponseHead,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Unset,
    Fixed(u64),
    Chunked,
}

/// What one connection put on the wire.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub framing: Framing,
    pub body: Vec<u8>,
    pub proxy: Option<String>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl ScriptedResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: http::StatusCode::from_u16(status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("")
                .to_string(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

#[derive(Debug, Default)]
struct Script {
    responses: VecDeque<ScriptedResponse>,
    requests: Vec<RecordedRequest>,
    events: Vec<String>,
}

/// Hands out connections that answer from a shared script, in order.
#[derive(Debug, Clone, Default)]
pub struct ScriptedFactory {
    script: Arc<Mutex<Script>>,
}

impl ScriptedFactory {
    pub fn new(responses: Vec<ScriptedResponse>) -> Self {
        let factory = Self::default();
        factory.lock().responses = responses.into();
        factory
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    pub fn events(&self) -> Vec<String> {
        self.lock().events.clone()
    }

    /// Append an event from outside a connection, e.g. a trust decider.
    pub fn record(&self, event: impl Into<String>) {
        self.lock().events.push(event.into());
    }

    pub fn remaining(&self) -> usize {
        self.lock().responses.len()
    }
}

impl ConnectionFactory for ScriptedFactory {
    fn create(&self, request: ConnectionRequest) -> io::Result<Box<dyn PhysicalConnection>> {
        let index = {
            let mut script = self.lock();
            script.requests.push(RecordedRequest {
                url: request.url.to_string(),
                method: request.method.clone(),
                headers: Vec::new(),
                framing: Framing::Unset,
                body: Vec::new(),
                proxy: request.proxy.clone(),
            });
            script.requests.len() - 1
        };
        Ok(Box::new(ScriptedConnection {
            id: ConnectionId::new(),
            index,
            url: request.url,
            method: request.method,
            factory: self.clone(),
            connected: false,
            body: None,
        }))
    }
}

pub struct ScriptedConnection {
    id: ConnectionId,
    index: usize,
    url: Url,
    method: String,
    factory: ScriptedFactory,
    connected: bool,
    body: Option<Bytes>,
}

impl ScriptedConnection {
    fn with_request<R>(&self, f: impl FnOnce(&mut RecordedRequest) -> R) -> R {
        let mut script = self.factory.lock();
        f(&mut script.requests[self.index])
    }

    fn event(&self, what: &str) {
        self.factory.record(format!("{}:{}", what, self.index));
    }
}

impl HeaderSink for ScriptedConnection {
    fn set_header(&mut self, name: &str, value: &str) {
        self.with_request(|r| {
            r.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
            r.headers.push((name.to_string(), value.to_string()));
        });
    }

    fn add_header(&mut self, name: &str, value: &str) {
        self.with_request(|r| r.headers.push((name.to_string(), value.to_string())));
    }
}

#[async_trait]
impl PhysicalConnection for ScriptedConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn url(&self) -> &Url {
        &self.url
    }

    fn method(&self) -> &str {
        &self.method
    }

    fn set_fixed_length(&mut self, len: u64) {
        self.with_request(|r| r.framing = Framing::Fixed(len));
    }

    fn set_chunked(&mut self) {
        self.with_request(|r| r.framing = Framing::Chunked);
    }

    async fn connect(&mut self) -> io::Result<()> {
        if !self.connected {
            self.connected = true;
            self.event("connect");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            url: self.url.to_string(),
            ..Default::default()
        }
    }

    async fn write(&mut self, data: Bytes) -> io::Result<()> {
        self.connect().await?;
        self.event("write");
        self.with_request(|r| r.body.extend_from_slice(&data));
        Ok(())
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.connect().await?;
        self.event("finish");
        Ok(())
    }

    async fn response_head(&mut self) -> io::Result<ResponseHead> {
        let response = self
            .factory
            .lock()
            .responses
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "script exhausted"))?;
        let mut headers = ProtocolHeaders::new();
        for (name, value) in &response.headers {
            headers.append(name, value.as_str());
        }
        if !response.body.is_empty() {
            self.body = Some(response.body);
        }
        Ok(ResponseHead {
            status: response.status,
            reason: response.reason,
            headers,
        })
    }

    async fn take_response_body(&mut self) -> io::Result<Option<BodyReader>> {
        Ok(self.body.take().map(BodyReader::from_bytes))
    }

    async fn disconnect(&mut self) {
        if self.connected {
            self.connected = false;
            self.event("disconnect");
        }
    }
}
