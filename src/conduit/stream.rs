//! Request body stream of one conduit invocation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use url::Url;

use super::HttpConduit;
use crate::config::ClientPolicy;
use crate::error::{Result, TransportError};
use crate::http::headers::Headers;
use crate::message::Message;
use crate::net::connection::{PhysicalConnection, ResponseHead};
use crate::observability::metrics;
use crate::security::trust::make_trust_decision;

/// Per-request decisions taken at prepare time.
#[derive(Debug, Clone, Copy)]
pub(super) struct Options {
    pub sends_body: bool,
    pub chunking_allowed: bool,
    pub needs_caching: bool,
}

/// Writable body of a prepared request.
///
/// Bytes are buffered until the chunking threshold is exceeded; a request
/// closed before that goes out with a fixed `Content-Length`.
pub struct ConduitStream {
    pub(super) conduit: Arc<HttpConduit>,
    pub(super) message: Message,
    pub(super) policy: Arc<ClientPolicy>,
    pub(super) url: Url,
    pub(super) method: String,
    pub(super) connection: Box<dyn PhysicalConnection>,
    pub(super) options: Options,
    buffer: BytesMut,
    /// Everything written so far, kept for replay.
    cache: Option<BytesMut>,
    pub(super) cached: Option<Bytes>,
    /// Threshold exceeded; writes go straight to the connection.
    streaming: bool,
    /// Headers and trust decision done for the current connection.
    committed: bool,
    pub(super) started: Instant,
}

impl ConduitStream {
    pub(super) fn new(
        conduit: Arc<HttpConduit>,
        message: Message,
        policy: Arc<ClientPolicy>,
        url: Url,
        method: String,
        connection: Box<dyn PhysicalConnection>,
        options: Options,
    ) -> Self {
        let cache = (options.needs_caching && options.sends_body).then(BytesMut::new);
        Self {
            conduit,
            message,
            policy,
            url,
            method,
            connection,
            options,
            buffer: BytesMut::new(),
            cache,
            cached: None,
            streaming: false,
            committed: false,
            started: Instant::now(),
        }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Append body bytes.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        if !self.options.sends_body {
            tracing::debug!(method = %self.method, url = %self.url, len = data.len(), "Ignoring body for method without content");
            return Ok(());
        }
        if let Some(cache) = self.cache.as_mut() {
            cache.extend_from_slice(data);
        }

        if self.streaming {
            return self.send(Bytes::copy_from_slice(data)).await;
        }
        self.buffer.extend_from_slice(data);
        if self.options.chunking_allowed && self.buffer.len() > self.policy.chunking_threshold {
            self.connection.set_chunked();
            self.commit().await?;
            self.streaming = true;
            let pending = self.buffer.split().freeze();
            self.send(pending).await?;
        }
        Ok(())
    }

    /// Finish the request, run the retransmission loop and hand the response on.
    pub async fn close(mut self) -> Result<()> {
        let head = match self.transmit().await {
            Ok(head) => head,
            Err(e) => {
                self.connection.disconnect().await;
                self.record("error");
                return Err(e);
            }
        };
        self.handle_response(head).await
    }

    pub(super) async fn transmit(&mut self) -> Result<ResponseHead> {
        if !self.streaming && self.options.sends_body {
            self.connection.set_fixed_length(self.buffer.len() as u64);
        }
        self.commit().await?;
        if !self.buffer.is_empty() {
            let pending = self.buffer.split().freeze();
            self.send(pending).await?;
        }
        self.cached = self.cache.take().map(BytesMut::freeze);

        let head = self.finish_and_read_head().await?;
        let head = if self.options.needs_caching {
            self.handle_retransmits(head).await?
        } else {
            head
        };
        self.cached = None;
        Ok(head)
    }

    /// Set protocol headers and make the trust decision, once per connection.
    pub(super) async fn commit(&mut self) -> Result<()> {
        if self.committed {
            return Ok(());
        }
        self.committed = true;
        Headers::new(&mut self.message).set_protocol_headers(&mut *self.connection);
        make_trust_decision(
            self.conduit.name(),
            self.conduit.trust_decider.as_ref(),
            &self.message,
            &mut *self.connection,
        )
        .await
    }

    async fn send(&mut self, data: Bytes) -> Result<()> {
        self.connection
            .write(data)
            .await
            .map_err(|e| TransportError::io(self.url.to_string(), e))
    }

    pub(super) async fn finish_and_read_head(&mut self) -> Result<ResponseHead> {
        let url = self.url.to_string();
        self.connection
            .finish()
            .await
            .map_err(|e| TransportError::io(url.clone(), e))?;
        let head = self
            .connection
            .response_head()
            .await
            .map_err(|e| TransportError::io(url, e))?;
        self.conduit.cookies.read_from_headers(&self.url, &head.headers);
        tracing::debug!(
            conduit = %self.conduit.name(),
            connection_id = %self.connection.id(),
            url = %self.url,
            status = head.status,
            "Response received"
        );
        Ok(head)
    }

    /// Open a fresh connection to `url` and replay the request on it.
    pub(super) async fn retransmit(&mut self, url: Url) -> Result<ResponseHead> {
        self.connection.disconnect().await;
        self.connection =
            self.conduit
                .open_connection(&url, &self.method, &self.policy, &self.message)?;
        self.url = url;
        self.committed = false;

        let replay = self.cached.clone().filter(|_| self.options.sends_body);
        if let Some(body) = &replay {
            self.connection.set_fixed_length(body.len() as u64);
        }
        self.commit().await?;
        if let Some(body) = replay {
            if !body.is_empty() {
                self.send(body).await?;
            }
        }
        self.finish_and_read_head().await
    }

    /// Visited URL counts of this request.
    pub(super) fn visited(&mut self) -> &mut HashMap<String, u32> {
        self.message.visited_urls.get_or_insert_with(HashMap::new)
    }

    /// URL and realm pairs already answered.
    pub(super) fn auth_urls(&mut self) -> &mut HashSet<String> {
        self.message.auth_urls.get_or_insert_with(HashSet::new)
    }

    pub(super) fn record(&self, outcome: &str) {
        metrics::record_conduit_request(&self.method, outcome, self.started.elapsed().as_secs_f64());
    }
}

impl std::fmt::Debug for ConduitStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConduitStream")
            .field("conduit", &self.conduit.name())
            .field("url", &self.url.as_str())
            .field("method", &self.method)
            .field("buffered", &self.buffer.len())
            .field("streaming", &self.streaming)
            .finish_non_exhaustive()
    }
}
