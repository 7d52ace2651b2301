//! Server-side HTTP destination.
//!
//! # Data Flow
//! ```text
//! server adapter (axum) → ServerRequest + SharedResponse
//!     → HttpDestination::invoke
//!         → resume a suspended message, or build one from the request
//!         → MessageObserver::on_message
//!     → observer answers through BackChannel
//!         → flush_headers (status, policy headers, header copy)
//!         → body bytes → close (also closes the request input)
//! ```
//!
//! # Design Decisions
//! - The destination is a cheap handle; every inbound message carries a
//!   clone so the observer can open the back channel
//! - A suspended message is keyed by the physical request and reused as is
//!   on the next invocation
//! - The server policy is swapped atomically on config reload

pub mod back_channel;
pub mod continuation;
pub mod request;
pub mod response;
pub mod server;

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;

use crate::config::{ListenerConfig, ServerPolicy};
use crate::error::{Result, TransportError};
use crate::http::charset::encoding_of;
use crate::http::headers::{Headers, AUTHORIZATION};
use crate::message::{Delivery, Exchange, Message, MessageObserver};
use crate::observability::metrics;
use crate::security::auth::ReceivedCredentials;

pub use back_channel::BackChannel;
pub use continuation::{Continuation, ContinuationState};
pub use request::{BufferedRequest, ServerRequest};
pub use response::{BufferedResponse, ServerResponse, SharedResponse};

/// Largest unread request body drained before a response is flushed.
pub const MAX_REQUEST_DRAIN: u64 = 16 * 1024 * 1024;

/// What one invocation did with the request.
#[derive(Debug)]
pub enum InvokeOutcome {
    /// The observer finished with the message.
    Completed,
    /// The observer suspended processing; invoke again once resumed.
    Suspended(Arc<Continuation>),
    /// The server policy redirected the request elsewhere.
    Redirected,
}

/// Receiving endpoint for one base path.
#[derive(Clone)]
pub struct HttpDestination {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    base_path: String,
    async_supported: bool,
    policy: ArcSwap<ServerPolicy>,
    observer: Arc<dyn MessageObserver>,
    suspended: DashMap<String, Message>,
}

impl HttpDestination {
    pub fn new(
        name: impl Into<String>,
        base_path: impl Into<String>,
        policy: ServerPolicy,
        observer: Arc<dyn MessageObserver>,
    ) -> Self {
        Self::with_inner(name.into(), base_path.into(), true, policy, observer)
    }

    /// A destination mounted as the listener describes.
    pub fn from_listener(
        name: impl Into<String>,
        listener: &ListenerConfig,
        policy: ServerPolicy,
        observer: Arc<dyn MessageObserver>,
    ) -> Self {
        Self::with_inner(
            name.into(),
            listener.base_path.clone(),
            listener.async_supported,
            policy,
            observer,
        )
    }

    fn with_inner(
        name: String,
        base_path: String,
        async_supported: bool,
        policy: ServerPolicy,
        observer: Arc<dyn MessageObserver>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                base_path,
                async_supported,
                policy: ArcSwap::from_pointee(policy),
                observer,
                suspended: DashMap::new(),
            }),
        }
    }

    pub fn is_async_supported(&self) -> bool {
        self.inner.async_supported
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn base_path(&self) -> &str {
        &self.inner.base_path
    }

    pub fn server_policy(&self) -> Arc<ServerPolicy> {
        self.inner.policy.load_full()
    }

    pub fn set_server_policy(&self, policy: ServerPolicy) {
        tracing::info!(destination = %self.inner.name, "Server policy updated");
        self.inner.policy.store(Arc::new(policy));
    }

    /// Requests currently parked by a suspension.
    pub fn suspended_count(&self) -> usize {
        self.inner.suspended.len()
    }

    /// Forget the parked message of `key`. Returns whether one was parked.
    pub fn release_suspended(&self, key: &str) -> bool {
        self.inner.suspended.remove(key).is_some()
    }

    /// Dispatch one physical request to the observer.
    pub async fn invoke(
        &self,
        request: &mut dyn ServerRequest,
        response: SharedResponse,
    ) -> Result<InvokeOutcome> {
        let policy = self.server_policy();
        let method = request.method().to_string();

        if let Some(target) = &policy.redirect_url {
            tracing::debug!(destination = %self.inner.name, uri = %request.request_uri(), to = %target, "Redirecting request");
            response.lock().await.send_redirect(target);
            metrics::record_destination_request(&method, "redirected");
            return Ok(InvokeOutcome::Redirected);
        }

        let key = request.key().to_string();
        let message = match self.inner.suspended.remove(&key) {
            Some((_, saved)) => {
                tracing::debug!(destination = %self.inner.name, message_id = %saved.id, "Resuming suspended message");
                saved
            }
            None => match self.build_message(request, response) {
                Ok(message) => message,
                Err(e) => {
                    metrics::record_destination_request(&method, "rejected");
                    return Err(e);
                }
            },
        };

        let continuation = message.continuation.clone();
        match self.inner.observer.on_message(message).await {
            Delivery::Completed => {
                if let Some(continuation) = continuation {
                    continuation.complete();
                }
                metrics::record_destination_request(&method, "completed");
                Ok(InvokeOutcome::Completed)
            }
            Delivery::Suspended(mut saved) => {
                let continuation = saved
                    .continuation
                    .get_or_insert_with(|| Arc::new(Continuation::new(self.inner.async_supported)))
                    .clone();
                if continuation.state() == ContinuationState::Idle && !continuation.suspend(None) {
                    tracing::warn!(
                        destination = %self.inner.name,
                        message_id = %saved.id,
                        "Observer suspended a request that cannot be suspended"
                    );
                    metrics::record_destination_request(&method, "completed");
                    return Ok(InvokeOutcome::Completed);
                }
                tracing::debug!(destination = %self.inner.name, message_id = %saved.id, "Message suspended");
                self.inner.suspended.insert(key, saved);
                metrics::record_destination_request(&method, "suspended");
                Ok(InvokeOutcome::Suspended(continuation))
            }
        }
    }

    fn build_message(&self, request: &mut dyn ServerRequest, response: SharedResponse) -> Result<Message> {
        let mut message = Message::new();
        let uri = request.request_uri().to_string();

        message.method = Some(request.method().to_string());
        message.endpoint_address = Some(request.request_url());
        message.query_string = request.query_string().map(str::to_string);
        message.path_info = Some(
            uri.strip_prefix(self.inner.base_path.trim_end_matches('/'))
                .unwrap_or(&uri)
                .to_string(),
        );
        message.request_uri = Some(uri);
        message.base_path = Some(self.inner.base_path.clone());

        let content_type = request.header("Content-Type").map(str::to_string);
        let encoding = encoding_of(content_type.as_deref()).map_err(|charset| {
            tracing::warn!(destination = %self.inner.name, charset = %charset, "Unsupported request encoding");
            TransportError::InvalidEncoding { charset }
        })?;
        message.content_type = content_type;
        message.encoding = Some(encoding);
        message.accept = request.header("Accept").map(str::to_string);
        message.user_principal = request.user_principal().map(str::to_string);
        if let Some(credentials) = request.header(AUTHORIZATION).and_then(ReceivedCredentials::parse) {
            message.authorization_policy = Some(credentials.into_policy());
        }

        Headers::new(&mut message).copy_from_request(request.headers());
        message.body = Some(request.take_body());
        message.continuation = Some(Arc::new(Continuation::new(self.inner.async_supported)));
        message.http_response = Some(response);
        message.exchange = Some(Exchange::new());
        message.destination = Some(self.clone());

        tracing::debug!(
            destination = %self.inner.name,
            message_id = %message.id,
            method = ?message.method,
            uri = ?message.request_uri,
            "Inbound message created"
        );
        Ok(message)
    }

    /// Commit status and headers of `out` to its response.
    ///
    /// Returns the response to write the body to, or `None` when there is
    /// no body to write (no content, redirected, or already flushed).
    pub async fn flush_headers(
        &self,
        out: &mut Message,
        in_message: Option<&mut Message>,
    ) -> Result<Option<SharedResponse>> {
        if out.response_headers_copied {
            return Ok(None);
        }
        let response = out.http_response.clone().ok_or_else(|| {
            TransportError::MissingResponse(format!("no response object on message {}", out.id))
        })?;
        let mut guard = response.lock().await;
        if guard.is_redirected() {
            return Ok(None);
        }

        if let Some(in_message) = in_message {
            cache_input(in_message).await;
        }
        let policy = self.server_policy();
        Headers::new(out).set_from_server_policy(&policy);

        let no_content = has_no_response_content(out);
        let status = *out
            .response_code
            .get_or_insert(if no_content { 202 } else { 200 });
        if status == 500 {
            Headers::new(out).remove_content_type();
        }

        guard.set_status(status);
        Headers::new(out).copy_to_response(&mut *guard);
        out.response_headers_copied = true;
        tracing::debug!(destination = %self.inner.name, status, no_content, "Response headers flushed");

        let stream = if no_content {
            guard.set_content_length(0);
            guard
                .close()
                .await
                .map_err(|e| TransportError::io(out.endpoint_address.clone().unwrap_or_default(), e))?;
            None
        } else {
            Some(Arc::clone(&response))
        };
        drop(guard);

        if out.is_oneway() {
            out.http_response = None;
        }
        Ok(stream)
    }

    /// The response channel of `in_message`'s request.
    pub fn back_channel(&self, in_message: Message) -> BackChannel {
        BackChannel::new(self.clone(), in_message)
    }
}

/// Read any unconsumed request input so the connection stays usable.
async fn cache_input(in_message: &mut Message) {
    if !in_message.attachments.is_empty() {
        for attachment in &mut in_message.attachments {
            if let Err(e) = attachment.cache().await {
                tracing::debug!(attachment = %attachment.id, error = %e, "Failed caching attachment");
            }
        }
        return;
    }
    if let Some(body) = in_message.body.as_mut() {
        if !body.is_consumed() {
            match body.drain(MAX_REQUEST_DRAIN).await {
                Ok(drained) => tracing::trace!(drained, "Drained unread request body"),
                Err(e) => tracing::debug!(error = %e, "Failed draining request body"),
            }
        }
    }
}

/// True when the response to `message` carries no body.
pub fn has_no_response_content(message: &Message) -> bool {
    let oneway = message.is_oneway();
    let partial = message.partial_response;
    let empty_partial = message.empty_partial_response;
    (oneway && (!partial || empty_partial)) || (!oneway && empty_partial)
}

impl fmt::Debug for HttpDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpDestination")
            .field("name", &self.inner.name)
            .field("base_path", &self.inner.base_path)
            .field("async_supported", &self.inner.async_supported)
            .field("suspended", &self.inner.suspended.len())
            .finish()
    }
}

#[cfg(test)]
mod tests;
