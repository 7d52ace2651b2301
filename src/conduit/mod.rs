//! Client-side HTTP conduit.
//!
//! # Data Flow
//! ```text
//! HttpConduit::prepare(message)
//!     → resolve address, merge policy headers, preemptive credentials, cookies
//!     → open a physical connection through the factory
//!     → ConduitStream
//!
//! ConduitStream::write (buffered up to the chunking threshold)
//!     → first write: protocol headers, trust decision, chunked framing
//! ConduitStream::close
//!     → fixed length if the threshold was never reached
//!     → response head → retransmit loop (redirect / 401 / 407)
//!     → response assembly → observer or exchange (sync, or on the work queue)
//! ```
//!
//! # Design Decisions
//! - One conduit per target, shared through `Arc`; per-request state lives
//!   in the stream and its message
//! - The client policy is swapped atomically; a stream keeps the policy it
//!   was prepared with
//! - Bodies are cached for replay only when a retransmission is possible

mod response;
mod retransmit;
mod stream;

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use bytes::Bytes;
use url::Url;

use crate::config::{AuthorizationPolicy, ClientPolicy, TlsClientParameters, TransportConfig};
use crate::error::{Result, TransportError};
use crate::http::cookies::Cookies;
use crate::http::headers::Headers;
use crate::message::{Exchange, Message, MessageObserver};
use crate::net::client::HyperConnectionFactory;
use crate::net::connection::{ConnectionFactory, ConnectionRequest, PhysicalConnection};
use crate::resilience::workqueue::WorkQueue;
use crate::security::auth::{supplier_for, AuthSupplier};
use crate::security::trust::TrustDecider;

pub use stream::ConduitStream;

/// Largest response body drained when a caller closes an inbound message.
pub const DRAIN_LIMIT: u64 = 25 * 1024;

/// Methods that never carry a request body.
const NO_CONTENT_METHODS: [&str; 4] = ["GET", "HEAD", "OPTIONS", "TRACE"];

pub(crate) fn method_sends_body(method: &str) -> bool {
    !NO_CONTENT_METHODS.contains(&method)
}

/// Client transport to one logical endpoint.
pub struct HttpConduit {
    name: String,
    default_address: Option<String>,
    client_policy: ArcSwap<ClientPolicy>,
    authorization: AuthorizationPolicy,
    proxy_authorization: AuthorizationPolicy,
    auth_supplier: Arc<dyn AuthSupplier>,
    proxy_auth_supplier: Arc<dyn AuthSupplier>,
    trust_decider: Option<Arc<dyn TrustDecider>>,
    tls: Option<TlsClientParameters>,
    factory: Arc<dyn ConnectionFactory>,
    cookies: Cookies,
    workqueue: Arc<WorkQueue>,
    observer: Option<Arc<dyn MessageObserver>>,
}

/// Builder for [`HttpConduit`].
pub struct HttpConduitBuilder {
    name: String,
    address: Option<String>,
    client_policy: ClientPolicy,
    authorization: AuthorizationPolicy,
    proxy_authorization: AuthorizationPolicy,
    auth_supplier: Option<Arc<dyn AuthSupplier>>,
    proxy_auth_supplier: Option<Arc<dyn AuthSupplier>>,
    trust_decider: Option<Arc<dyn TrustDecider>>,
    tls: Option<TlsClientParameters>,
    factory: Option<Arc<dyn ConnectionFactory>>,
    workqueue: Option<Arc<WorkQueue>>,
    observer: Option<Arc<dyn MessageObserver>>,
}

impl HttpConduitBuilder {
    /// Address used when a message carries none.
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn client_policy(mut self, policy: ClientPolicy) -> Self {
        self.client_policy = policy;
        self
    }

    pub fn authorization(mut self, policy: AuthorizationPolicy) -> Self {
        self.authorization = policy;
        self
    }

    pub fn proxy_authorization(mut self, policy: AuthorizationPolicy) -> Self {
        self.proxy_authorization = policy;
        self
    }

    /// Overrides the supplier picked from the authorization policy.
    pub fn auth_supplier(mut self, supplier: Arc<dyn AuthSupplier>) -> Self {
        self.auth_supplier = Some(supplier);
        self
    }

    pub fn proxy_auth_supplier(mut self, supplier: Arc<dyn AuthSupplier>) -> Self {
        self.proxy_auth_supplier = Some(supplier);
        self
    }

    pub fn trust_decider(mut self, decider: Arc<dyn TrustDecider>) -> Self {
        self.trust_decider = Some(decider);
        self
    }

    pub fn tls(mut self, tls: TlsClientParameters) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn connection_factory(mut self, factory: Arc<dyn ConnectionFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn workqueue(mut self, workqueue: Arc<WorkQueue>) -> Self {
        self.workqueue = Some(workqueue);
        self
    }

    /// Receives every inbound message; without one, responses go to the exchange.
    pub fn observer(mut self, observer: Arc<dyn MessageObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> Arc<HttpConduit> {
        let auth_supplier = self
            .auth_supplier
            .unwrap_or_else(|| supplier_for(&self.authorization));
        let proxy_auth_supplier = self
            .proxy_auth_supplier
            .unwrap_or_else(|| supplier_for(&self.proxy_authorization));
        let workqueue = self
            .workqueue
            .unwrap_or_else(|| Arc::new(WorkQueue::new(format!("{}-workqueue", self.name), 25)));

        tracing::debug!(
            conduit = %self.name,
            address = ?self.address,
            auto_redirect = self.client_policy.auto_redirect,
            max_retransmits = self.client_policy.max_retransmits,
            "Conduit created"
        );

        Arc::new(HttpConduit {
            name: self.name,
            default_address: self.address,
            client_policy: ArcSwap::from_pointee(self.client_policy),
            authorization: self.authorization,
            proxy_authorization: self.proxy_authorization,
            auth_supplier,
            proxy_auth_supplier,
            trust_decider: self.trust_decider,
            tls: self.tls,
            factory: self.factory.unwrap_or_else(|| Arc::new(HyperConnectionFactory)),
            cookies: Cookies::new(),
            workqueue,
            observer: self.observer,
        })
    }
}

impl HttpConduit {
    pub fn builder(name: impl Into<String>) -> HttpConduitBuilder {
        HttpConduitBuilder {
            name: name.into(),
            address: None,
            client_policy: ClientPolicy::default(),
            authorization: AuthorizationPolicy::default(),
            proxy_authorization: AuthorizationPolicy::default(),
            auth_supplier: None,
            proxy_auth_supplier: None,
            trust_decider: None,
            tls: None,
            factory: None,
            workqueue: None,
            observer: None,
        }
    }

    /// Builder seeded with every client-side section of a loaded config.
    pub fn from_config(name: impl Into<String>, config: &TransportConfig) -> HttpConduitBuilder {
        let mut builder = Self::builder(name)
            .client_policy(config.client.clone())
            .authorization(config.authorization.clone())
            .proxy_authorization(config.proxy_authorization.clone())
            .workqueue(Arc::new(WorkQueue::from_config(&config.workqueue)));
        if let Some(tls) = &config.tls {
            builder = builder.tls(tls.clone());
        }
        builder
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client_policy(&self) -> Arc<ClientPolicy> {
        self.client_policy.load_full()
    }

    /// Replace the client policy. Streams already prepared keep the old one.
    pub fn set_client_policy(&self, policy: ClientPolicy) {
        tracing::info!(
            conduit = %self.name,
            auto_redirect = policy.auto_redirect,
            allow_chunking = policy.allow_chunking,
            chunking_threshold = policy.chunking_threshold,
            "Client policy updated"
        );
        self.client_policy.store(Arc::new(policy));
    }

    pub fn cookies(&self) -> &Cookies {
        &self.cookies
    }

    pub fn workqueue(&self) -> &Arc<WorkQueue> {
        &self.workqueue
    }

    /// Resolve the target, stamp request headers and open the first connection.
    pub fn prepare(self: &Arc<Self>, mut message: Message) -> Result<ConduitStream> {
        let policy = match message.client_policy.clone() {
            Some(policy) => Arc::new(policy),
            None => self.client_policy.load_full(),
        };
        let url = self.setup_address(&mut message)?;
        let method = message.method_or_default();
        message.method = Some(method.clone());
        message.exchange.get_or_insert_with(Exchange::new);

        Headers::new(&mut message).set_from_client_policy(&policy);
        self.set_headers_by_authorization_policy(&mut message, &url);
        self.cookies.write_to_message_headers(&mut message, &url);

        let needs_caching = self.auth_supplier.requires_request_caching()
            || self.proxy_auth_supplier.requires_request_caching()
            || policy.auto_redirect
            || policy.max_retransmits > 0;
        let sends_body = method_sends_body(&method) && !message.flags.empty_request;
        let chunking_supported = method == "POST" || sends_body;
        let chunking_allowed = policy.allow_chunking && chunking_supported;

        let connection = self.open_connection(&url, &method, &policy, &message)?;
        tracing::debug!(
            conduit = %self.name,
            connection_id = %connection.id(),
            method = %method,
            url = %url,
            chunking_allowed,
            needs_caching,
            "Prepared request"
        );

        Ok(ConduitStream::new(
            Arc::clone(self),
            message,
            policy,
            url,
            method,
            connection,
            stream::Options {
                sends_body,
                chunking_allowed,
                needs_caching,
            },
        ))
    }

    /// Send `body` and wait for the response.
    ///
    /// Returns `None` when an observer consumed the response.
    pub async fn send(self: &Arc<Self>, mut message: Message, body: Bytes) -> Result<Option<Message>> {
        let exchange = message.exchange.get_or_insert_with(Exchange::new).clone();
        let mut stream = self.prepare(message)?;
        if !body.is_empty() {
            stream.write(&body).await?;
        }
        stream.close().await?;

        if self.observer.is_some() {
            return Ok(None);
        }
        if exchange.is_synchronous() {
            if let Some(fault) = exchange.take_fault() {
                return Err(fault);
            }
            return Ok(exchange.take_in_message());
        }
        exchange.wait_for_in_message().await
    }

    /// Release an inbound message, draining a little of its body so the
    /// connection can be reused.
    pub async fn close_message(&self, message: &mut Message) {
        if let Some(body) = message.body.as_mut() {
            match body.drain(DRAIN_LIMIT).await {
                Ok(drained) => tracing::trace!(conduit = %self.name, drained, "Drained response body"),
                Err(e) => tracing::debug!(conduit = %self.name, error = %e, "Failed draining response body"),
            }
            body.close();
        }
    }

    /// The full request URL: endpoint address (or the default one) plus
    /// path info and query string. Written back into the message.
    fn setup_address(&self, message: &mut Message) -> Result<Url> {
        let mut address = message
            .endpoint_address
            .clone()
            .or_else(|| self.default_address.clone())
            .ok_or_else(|| {
                TransportError::InvalidAddress(format!("no endpoint address for conduit '{}'", self.name))
            })?;
        if let Some(path_info) = message.path_info.as_deref() {
            if !address.ends_with(path_info) {
                address.push_str(path_info);
            }
        }
        if let Some(query) = message.query_string.as_deref() {
            if !query.is_empty() && !address.contains('?') {
                address.push('?');
                address.push_str(query);
            }
        }
        let url = Url::parse(&address)
            .map_err(|e| TransportError::InvalidAddress(format!("{}: {}", address, e)))?;
        message.endpoint_address = Some(address);
        Ok(url)
    }

    /// Credentials from the message's policy (or the conduit's) for `url`.
    fn set_headers_by_authorization_policy(&self, message: &mut Message, url: &Url) {
        let policy = message
            .authorization_policy
            .clone()
            .unwrap_or_else(|| self.authorization.clone());
        let authorization = self.auth_supplier.authorization(&policy, url, message, None);
        let proxy_authorization =
            self.proxy_auth_supplier
                .authorization(&self.proxy_authorization, url, message, None);

        let mut headers = Headers::new(message);
        if let Some(value) = authorization {
            headers.set_authorization(value);
        }
        if let Some(value) = proxy_authorization {
            headers.set_proxy_authorization(value);
        }
    }

    fn open_connection(
        &self,
        url: &Url,
        method: &str,
        policy: &ClientPolicy,
        message: &Message,
    ) -> Result<Box<dyn PhysicalConnection>> {
        let request = ConnectionRequest {
            url: url.clone(),
            method: method.to_string(),
            tls: self.tls.clone(),
            proxy: policy.proxy_address(),
            connect_timeout: message
                .connection_timeout
                .or_else(|| millis(policy.connection_timeout_ms)),
            receive_timeout: message
                .receive_timeout
                .or_else(|| millis(policy.receive_timeout_ms)),
        };
        self.factory
            .create(request)
            .map_err(|e| TransportError::io(url.to_string(), e))
    }
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl std::fmt::Debug for HttpConduit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConduit")
            .field("name", &self.name)
            .field("default_address", &self.default_address)
            .field("client_policy", &self.client_policy.load())
            .field("trust_decider", &self.trust_decider)
            .field("workqueue", &self.workqueue.name())
            .finish_non_exhaustive()
    }
}
