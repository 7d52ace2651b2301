//! Translation between a message's protocol headers and wire headers.
//!
//! # Responsibilities
//! - Get-or-create the header map of a message
//! - Merge client and server policy defaults (fill-only)
//! - Copy inbound server request headers into the map
//! - Write the map onto a connection or a response
//! - Authorization header accessors
//!
//! # Design Decisions
//! - `Cookie` is always emitted as one header instance per value
//! - Other multi-valued headers are comma-joined unless `add_headers` is set
//! - A `charset` is appended to `Content-Type` only for a known encoding

use http::header::{HeaderMap, HeaderName, HeaderValue};

use crate::config::{ClientPolicy, ServerPolicy};
use crate::message::{Message, ProtocolHeaders};

pub const ACCEPT: &str = "Accept";
pub const ACCEPT_ENCODING: &str = "Accept-Encoding";
pub const ACCEPT_LANGUAGE: &str = "Accept-Language";
pub const AUTHORIZATION: &str = "Authorization";
pub const CACHE_CONTROL: &str = "Cache-Control";
pub const CONNECTION: &str = "Connection";
pub const CONTENT_LENGTH: &str = "Content-Length";
pub const CONTENT_TYPE: &str = "Content-Type";
pub const COOKIE: &str = "Cookie";
pub const HOST: &str = "Host";
pub const KEEP_ALIVE: &str = "Keep-Alive";
pub const LOCATION: &str = "Location";
pub const PROXY_AUTHORIZATION: &str = "Proxy-Authorization";
pub const PROXY_AUTHENTICATE: &str = "Proxy-Authenticate";
pub const REFERER: &str = "Referer";
pub const SERVER: &str = "Server";
pub const SET_COOKIE: &str = "Set-Cookie";
pub const USER_AGENT: &str = "User-Agent";
pub const WWW_AUTHENTICATE: &str = "WWW-Authenticate";

/// `User-Agent` sent when neither the message nor the policy names one.
pub const DEFAULT_USER_AGENT: &str = concat!("http-conduit/", env!("CARGO_PKG_VERSION"));

/// Anything wire headers can be written to.
pub trait HeaderSink {
    /// Replace every value of `name`.
    fn set_header(&mut self, name: &str, value: &str);
    /// Add another instance of `name`.
    fn add_header(&mut self, name: &str, value: &str);
}

impl HeaderSink for HeaderMap {
    fn set_header(&mut self, name: &str, value: &str) {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                self.insert(name, value);
            }
            _ => tracing::warn!(header = %name, "Dropping header that is not valid on the wire"),
        }
    }

    fn add_header(&mut self, name: &str, value: &str) {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                self.append(name, value);
            }
            _ => tracing::warn!(header = %name, "Dropping header that is not valid on the wire"),
        }
    }
}

/// Header view over one message.
pub struct Headers<'a> {
    message: &'a mut Message,
}

impl<'a> Headers<'a> {
    pub fn new(message: &'a mut Message) -> Self {
        Self { message }
    }

    /// The message's header map, created empty if missing.
    pub fn get_set_protocol_headers(message: &mut Message) -> &mut ProtocolHeaders {
        message.headers.get_or_insert_with(ProtocolHeaders::new)
    }

    pub fn protocol_headers(&mut self) -> &mut ProtocolHeaders {
        Self::get_set_protocol_headers(self.message)
    }

    /// Fill unset request headers from the client policy.
    pub fn set_from_client_policy(&mut self, policy: &ClientPolicy) {
        let headers = self.protocol_headers();
        if let Some(cache_control) = &policy.cache_control {
            headers.set_if_absent(CACHE_CONTROL, cache_control.as_str());
        }
        if let Some(host) = &policy.host {
            headers.set_if_absent(HOST, host.as_str());
        }
        if let Some(connection) = policy.connection {
            headers.set_if_absent(CONNECTION, connection.as_header_value());
        }
        headers.set_if_absent(ACCEPT, policy.accept.as_deref().unwrap_or("*/*"));
        if let Some(encoding) = &policy.accept_encoding {
            headers.set_if_absent(ACCEPT_ENCODING, encoding.as_str());
        }
        if let Some(language) = &policy.accept_language {
            headers.set_if_absent(ACCEPT_LANGUAGE, language.as_str());
        }
        if let Some(cookie) = &policy.cookie {
            headers.set_if_absent(COOKIE, cookie.as_str());
        }
        if let Some(browser) = &policy.browser_type {
            headers.set_if_absent(USER_AGENT, browser.as_str());
        }
        if let Some(referer) = &policy.referer {
            headers.set_if_absent(REFERER, referer.as_str());
        }
    }

    /// Fill unset response headers from the server policy.
    pub fn set_from_server_policy(&mut self, policy: &ServerPolicy) {
        let headers = self.protocol_headers();
        if let Some(content_type) = &policy.content_type {
            headers.set_if_absent(CONTENT_TYPE, content_type.as_str());
        }
        if let Some(server) = &policy.server_type {
            headers.set_if_absent(SERVER, server.as_str());
        }
        if let Some(cache_control) = &policy.cache_control {
            headers.set_if_absent(CACHE_CONTROL, cache_control.as_str());
        }
        if !policy.honor_keep_alive {
            headers.set_if_absent(CONNECTION, "close");
        } else if let Some(params) = &policy.keep_alive_parameters {
            headers.set_if_absent(KEEP_ALIVE, params.as_str());
        }
    }

    /// Copy the headers of an inbound server request, keeping value order.
    pub fn copy_from_request(&mut self, request_headers: &HeaderMap) {
        let headers = self.protocol_headers();
        for (name, value) in request_headers {
            match value.to_str() {
                Ok(value) => headers.append(canonical_name(name.as_str()).as_str(), value),
                Err(_) => tracing::debug!(header = %name, "Skipping non-visible-ASCII request header"),
            }
        }
    }

    /// Content type to send, with a charset parameter where appropriate.
    pub fn determine_content_type(&self) -> Option<String> {
        let content_type = self.message.content_type.clone().or_else(|| {
            self.message
                .headers
                .as_ref()
                .and_then(|h| h.get_first(CONTENT_TYPE))
                .map(str::to_string)
        })?;
        Some(match &self.message.encoding {
            Some(encoding)
                if !content_type.to_ascii_lowercase().contains("charset")
                    && !content_type.to_ascii_lowercase().starts_with("multipart/") =>
            {
                format!("{}; charset={}", content_type, encoding)
            }
            _ => content_type,
        })
    }

    /// Write request headers onto an outbound connection.
    pub fn set_protocol_headers<S: HeaderSink + ?Sized>(&mut self, sink: &mut S) {
        if let Some(content_type) = self.determine_content_type() {
            sink.set_header(CONTENT_TYPE, &content_type);
        }
        let add_headers = self.message.flags.add_headers;
        let headers = self.protocol_headers();
        headers.set_if_absent(USER_AGENT, DEFAULT_USER_AGENT);
        write_headers(headers, sink, add_headers);
    }

    /// Write response headers onto a server response.
    pub fn copy_to_response<S: HeaderSink + ?Sized>(&mut self, sink: &mut S) {
        if let Some(content_type) = self.determine_content_type() {
            sink.set_header(CONTENT_TYPE, &content_type);
        }
        let add_headers = self.message.flags.add_headers;
        write_headers(self.protocol_headers(), sink, add_headers);
    }

    /// Drop the content type from both the message and its headers.
    pub fn remove_content_type(&mut self) {
        self.message.content_type = None;
        if let Some(headers) = self.message.headers.as_mut() {
            headers.remove(CONTENT_TYPE);
        }
    }

    pub fn authorization(&self) -> Option<&str> {
        self.message.headers.as_ref()?.get_first(AUTHORIZATION)
    }

    pub fn set_authorization(&mut self, value: impl Into<String>) {
        self.protocol_headers().set_single(AUTHORIZATION, value);
    }

    pub fn proxy_authorization(&self) -> Option<&str> {
        self.message.headers.as_ref()?.get_first(PROXY_AUTHORIZATION)
    }

    pub fn set_proxy_authorization(&mut self, value: impl Into<String>) {
        self.protocol_headers().set_single(PROXY_AUTHORIZATION, value);
    }

    /// Strip both credentials headers, as done before following a redirect.
    pub fn remove_authorization_headers(&mut self) {
        let headers = self.protocol_headers();
        headers.remove(AUTHORIZATION);
        headers.remove(PROXY_AUTHORIZATION);
    }
}

fn write_headers<S: HeaderSink + ?Sized>(headers: &ProtocolHeaders, sink: &mut S, add_headers: bool) {
    for (name, values) in headers.iter() {
        if name.eq_ignore_ascii_case(CONTENT_TYPE) || values.is_empty() {
            continue;
        }
        if name.eq_ignore_ascii_case(COOKIE) || add_headers {
            sink.set_header(name, &values[0]);
            for value in &values[1..] {
                sink.add_header(name, value);
            }
        } else {
            sink.set_header(name, &values.join(", "));
        }
    }
}

/// `content-type` → `Content-Type`, since `http` lower-cases every name.
fn canonical_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionType;

    /// Records every call so tests can see exact instances.
    #[derive(Default)]
    struct RecordingSink {
        calls: Vec<(String, String)>,
    }

    impl HeaderSink for RecordingSink {
        fn set_header(&mut self, name: &str, value: &str) {
            self.calls.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
            self.calls.push((name.to_string(), value.to_string()));
        }

        fn add_header(&mut self, name: &str, value: &str) {
            self.calls.push((name.to_string(), value.to_string()));
        }
    }

    impl RecordingSink {
        fn values(&self, name: &str) -> Vec<&str> {
            self.calls
                .iter()
                .filter(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
                .collect()
        }
    }

    #[test]
    fn client_policy_only_fills_unset_headers() {
        let mut message = Message::new();
        Headers::get_set_protocol_headers(&mut message).set_single("cache-control", "no-store");

        let policy = ClientPolicy {
            cache_control: Some("max-age=10".into()),
            connection: Some(ConnectionType::Close),
            accept_language: Some("en".into()),
            ..ClientPolicy::default()
        };
        Headers::new(&mut message).set_from_client_policy(&policy);

        let headers = message.headers.as_ref().unwrap();
        assert_eq!(headers.get_first("Cache-Control"), Some("no-store"));
        assert_eq!(headers.get_first("accept"), Some("*/*"));
        assert_eq!(headers.get_first("CONNECTION"), Some("close"));
        assert_eq!(headers.get_first("Accept-Language"), Some("en"));
    }

    #[test]
    fn server_policy_connection_close_without_keep_alive() {
        let mut message = Message::new();
        let policy = ServerPolicy {
            honor_keep_alive: false,
            keep_alive_parameters: Some("timeout=5".into()),
            server_type: Some("conduit-test".into()),
            ..ServerPolicy::default()
        };
        Headers::new(&mut message).set_from_server_policy(&policy);

        let headers = message.headers.as_ref().unwrap();
        assert_eq!(headers.get_first("Connection"), Some("close"));
        assert!(!headers.contains("Keep-Alive"));
        assert_eq!(headers.get_first("Server"), Some("conduit-test"));
    }

    #[test]
    fn server_policy_keep_alive_parameters() {
        let mut message = Message::new();
        let policy = ServerPolicy {
            keep_alive_parameters: Some("timeout=5, max=100".into()),
            ..ServerPolicy::default()
        };
        Headers::new(&mut message).set_from_server_policy(&policy);
        assert_eq!(
            message.headers.unwrap().get_first("keep-alive"),
            Some("timeout=5, max=100")
        );
    }

    #[test]
    fn cookies_are_separate_and_others_joined() {
        let mut message = Message::new();
        {
            let headers = Headers::get_set_protocol_headers(&mut message);
            headers.append("Cookie", "a=1");
            headers.append("Cookie", "b=2");
            headers.append("Accept", "text/xml");
            headers.append("Accept", "application/json");
        }
        let mut sink = RecordingSink::default();
        Headers::new(&mut message).set_protocol_headers(&mut sink);

        assert_eq!(sink.values("cookie"), vec!["a=1", "b=2"]);
        assert_eq!(sink.values("accept"), vec!["text/xml, application/json"]);
        assert_eq!(sink.values("user-agent"), vec![DEFAULT_USER_AGENT]);
    }

    #[test]
    fn add_headers_mode_emits_each_value() {
        let mut message = Message::new();
        message.flags.add_headers = true;
        {
            let headers = Headers::get_set_protocol_headers(&mut message);
            headers.append("X-Tag", "one");
            headers.append("X-Tag", "two");
        }
        let mut sink = RecordingSink::default();
        Headers::new(&mut message).set_protocol_headers(&mut sink);
        assert_eq!(sink.values("x-tag"), vec!["one", "two"]);
    }

    #[test]
    fn charset_appended_only_when_known() {
        let mut message = Message::new();
        message.content_type = Some("text/xml".into());
        assert_eq!(Headers::new(&mut message).determine_content_type().as_deref(), Some("text/xml"));

        message.encoding = Some("UTF-8".into());
        assert_eq!(
            Headers::new(&mut message).determine_content_type().as_deref(),
            Some("text/xml; charset=UTF-8")
        );

        message.content_type = Some("text/xml; charset=ISO-8859-1".into());
        assert_eq!(
            Headers::new(&mut message).determine_content_type().as_deref(),
            Some("text/xml; charset=ISO-8859-1")
        );

        message.content_type = Some("multipart/related; type=\"text/xml\"".into());
        assert_eq!(
            Headers::new(&mut message).determine_content_type().as_deref(),
            Some("multipart/related; type=\"text/xml\"")
        );
    }

    #[test]
    fn copies_request_headers_in_order() {
        let mut request = HeaderMap::new();
        request.append("accept", HeaderValue::from_static("text/html"));
        request.append("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));
        request.append("accept", HeaderValue::from_static("application/xml"));

        let mut message = Message::new();
        Headers::new(&mut message).copy_from_request(&request);
        let headers = message.headers.unwrap();
        assert_eq!(
            headers.get("Accept").unwrap(),
            &["text/html".to_string(), "application/xml".to_string()]
        );
        assert_eq!(headers.get_first("X-Forwarded-For"), Some("10.0.0.1"));
    }

    #[test]
    fn authorization_accessors() {
        let mut message = Message::new();
        let mut headers = Headers::new(&mut message);
        headers.set_authorization("Basic abc");
        headers.set_proxy_authorization("Basic def");
        assert_eq!(headers.authorization(), Some("Basic abc"));
        assert_eq!(headers.proxy_authorization(), Some("Basic def"));

        headers.remove_authorization_headers();
        assert_eq!(headers.authorization(), None);
        assert_eq!(headers.proxy_authorization(), None);
    }

    #[test]
    fn header_map_sink_appends() {
        let mut map = HeaderMap::new();
        map.set_header("Cookie", "a=1");
        map.add_header("Cookie", "b=2");
        map.set_header("bad header", "x");
        assert_eq!(map.get_all("cookie").iter().count(), 2);
        assert_eq!(map.len(), 2);
    }
}
