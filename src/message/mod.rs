//! Messages exchanged between the transport and the enclosing pipeline.
//!
//! # Data Flow
//! ```text
//! Client:  pipeline builds outbound Message
//!              → HttpConduit::prepare / ConduitStream::close
//!              → inbound Message (status, headers, body) → observer / Exchange
//!
//! Server:  raw request → HttpDestination::invoke → inbound Message → observer
//!              → outbound Message → BackChannel → flush_headers → raw response
//! ```
//!
//! # Design Decisions
//! - Typed fields for everything the transport reads or writes
//! - `extensions` is the only open-ended slot, for caller-defined objects
//! - Visited and auth URL sets live on the outbound message and die with it

pub mod body;
pub mod exchange;
pub mod headers;
pub mod observer;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::config::{AuthorizationPolicy, ClientPolicy};
use crate::destination::continuation::Continuation;
use crate::destination::response::SharedResponse;
use crate::destination::HttpDestination;
use crate::security::trust::TrustDecider;

pub use body::{Attachment, AttachmentData, BodyReader, CloseHandle};
pub use exchange::{Exchange, ExchangeBuilder};
pub use headers::ProtocolHeaders;
pub use observer::{Delivery, MessageObserver};

/// Contextual switches a caller may set per message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextFlags {
    /// Never turn an HTTP error status into an error.
    pub no_io_exceptions: bool,
    /// Treat a 400 as a fault response instead of an error.
    pub process_fault_on_http_400: bool,
    /// A oneway call still processes a 500 response.
    pub robust_oneway: bool,
    /// Deliver the partial response body of a oneway call.
    pub process_oneway_response: bool,
    /// Short-circuit 202 / oneway responses (default true).
    pub process_202_response: bool,
    /// Copy the status reason phrase into the inbound message.
    pub set_http_response_message: bool,
    /// Only follow redirects that keep scheme and host.
    pub redirect_same_host_only: bool,
    /// Resolve relative `Location` values against the current URL.
    pub allow_relative_redirect: bool,
    /// Redirect targets must start with this prefix.
    pub allowed_redirect_uri: Option<String>,
    /// How many times a URL other than the current one may be revisited.
    pub max_same_uri_count: Option<u32>,
    /// The request has no body regardless of method.
    pub empty_request: bool,
    /// Write one header instance per value instead of comma-joining.
    pub add_headers: bool,
}

impl Default for ContextFlags {
    fn default() -> Self {
        Self {
            no_io_exceptions: false,
            process_fault_on_http_400: false,
            robust_oneway: false,
            process_oneway_response: false,
            process_202_response: true,
            set_http_response_message: false,
            redirect_same_host_only: false,
            allow_relative_redirect: false,
            allowed_redirect_uri: None,
            max_same_uri_count: None,
            empty_request: false,
            add_headers: false,
        }
    }
}

/// One request or response unit.
pub struct Message {
    pub id: Uuid,

    /// Absolute target address (client) or request URL (server).
    pub endpoint_address: Option<String>,
    pub path_info: Option<String>,
    pub query_string: Option<String>,
    pub method: Option<String>,
    pub content_type: Option<String>,
    /// Normalized character encoding.
    pub encoding: Option<String>,
    pub response_code: Option<u16>,
    pub response_message: Option<String>,
    pub request_uri: Option<String>,
    pub base_path: Option<String>,
    pub accept: Option<String>,

    /// Protocol headers, created on first use by [`crate::http::headers::Headers`].
    pub headers: Option<ProtocolHeaders>,
    pub exchange: Option<Exchange>,
    pub body: Option<BodyReader>,
    pub attachments: Vec<Attachment>,

    /// Overrides of the client policy timeouts.
    pub connection_timeout: Option<Duration>,
    pub receive_timeout: Option<Duration>,
    /// Replaces the conduit's client policy for this message.
    pub client_policy: Option<ClientPolicy>,
    /// Client: credentials to send. Server: credentials received.
    pub authorization_policy: Option<AuthorizationPolicy>,
    /// Consulted after the conduit-level trust decider.
    pub trust_decider: Option<Arc<dyn TrustDecider>>,
    pub user_principal: Option<String>,

    pub partial_response: bool,
    pub empty_partial_response: bool,

    /// Last URL a redirect sent the request to.
    pub retransmit_url: Option<String>,
    pub visited_urls: Option<HashMap<String, u32>>,
    pub auth_urls: Option<HashSet<String>>,

    pub flags: ContextFlags,
    pub continuation: Option<Arc<Continuation>>,
    /// Server side: the physical response this request is answered on.
    pub http_response: Option<SharedResponse>,
    /// Server side: response headers were already written.
    pub response_headers_copied: bool,
    /// Server side: the destination that received this request.
    pub destination: Option<HttpDestination>,
    pub extensions: http::Extensions,
}

impl Message {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            endpoint_address: None,
            path_info: None,
            query_string: None,
            method: None,
            content_type: None,
            encoding: None,
            response_code: None,
            response_message: None,
            request_uri: None,
            base_path: None,
            accept: None,
            headers: None,
            exchange: None,
            body: None,
            attachments: Vec::new(),
            connection_timeout: None,
            receive_timeout: None,
            client_policy: None,
            authorization_policy: None,
            trust_decider: None,
            user_principal: None,
            partial_response: false,
            empty_partial_response: false,
            retransmit_url: None,
            visited_urls: None,
            auth_urls: None,
            flags: ContextFlags::default(),
            continuation: None,
            http_response: None,
            response_headers_copied: false,
            destination: None,
            extensions: http::Extensions::new(),
        }
    }

    /// An outbound request to `address` on a fresh synchronous exchange.
    pub fn request(method: &str, address: impl Into<String>) -> Self {
        let mut message = Self::new();
        message.method = Some(method.to_string());
        message.endpoint_address = Some(address.into());
        message.exchange = Some(Exchange::new());
        message
    }

    pub fn with_exchange(mut self, exchange: Exchange) -> Self {
        self.exchange = Some(exchange);
        self
    }

    pub fn is_oneway(&self) -> bool {
        self.exchange.as_ref().map(Exchange::is_oneway).unwrap_or(false)
    }

    /// Method, upper-cased, defaulting to POST.
    pub fn method_or_default(&self) -> String {
        self.method
            .as_deref()
            .map(str::to_ascii_uppercase)
            .unwrap_or_else(|| "POST".to_string())
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("endpoint_address", &self.endpoint_address)
            .field("method", &self.method)
            .field("response_code", &self.response_code)
            .field("content_type", &self.content_type)
            .field("encoding", &self.encoding)
            .field("headers", &self.headers)
            .field("exchange", &self.exchange)
            .finish_non_exhaustive()
    }
}
