//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the transport.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the transport.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TransportConfig {
    /// Client-side (conduit) policy.
    pub client: ClientPolicy,

    /// Server-side (destination) policy.
    pub server: ServerPolicy,

    /// Credentials the conduit presents.
    pub authorization: AuthorizationPolicy,

    /// Credentials presented to an HTTP proxy.
    pub proxy_authorization: AuthorizationPolicy,

    /// TLS client parameters handed to the connection factory.
    pub tls: Option<TlsClientParameters>,

    /// Listener used by the destination server binary.
    pub listener: ListenerConfig,

    /// Bounded worker queue for asynchronous response delivery.
    pub workqueue: WorkQueueConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Value of the `Connection` header a client requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionType {
    KeepAlive,
    Close,
}

impl ConnectionType {
    pub fn as_header_value(&self) -> &'static str {
        match self {
            ConnectionType::KeepAlive => "Keep-Alive",
            ConnectionType::Close => "close",
        }
    }
}

/// Client-side HTTP policy, read-only to the conduit.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientPolicy {
    /// Connection establishment timeout in milliseconds (0 = none).
    pub connection_timeout_ms: u64,

    /// Response read timeout in milliseconds (0 = none).
    pub receive_timeout_ms: u64,

    /// How long an async delivery task may wait for a worker slot.
    /// Unset means 1000 ms.
    pub async_execute_timeout_ms: Option<u64>,

    /// Propagate worker queue rejection instead of delivering inline.
    pub async_execute_timeout_rejection: bool,

    /// Allow chunked transfer encoding.
    pub allow_chunking: bool,

    /// Bodies below this size are sent with a fixed `Content-Length`.
    pub chunking_threshold: usize,

    /// Follow 3xx redirects inside the conduit.
    pub auto_redirect: bool,

    /// Maximum retransmissions per request; negative means unbounded.
    pub max_retransmits: i32,

    /// Default `Accept` header.
    pub accept: Option<String>,

    /// Default `Accept-Encoding` header.
    pub accept_encoding: Option<String>,

    /// Default `Accept-Language` header.
    pub accept_language: Option<String>,

    /// Default `Cache-Control` header.
    pub cache_control: Option<String>,

    /// Default `Host` header.
    pub host: Option<String>,

    /// Default `Connection` header.
    pub connection: Option<ConnectionType>,

    /// Default `Cookie` header.
    pub cookie: Option<String>,

    /// Default `Referer` header.
    pub referer: Option<String>,

    /// `User-Agent` value; falls back to the crate identifier.
    pub browser_type: Option<String>,

    /// HTTP proxy host.
    pub proxy_server: Option<String>,

    /// HTTP proxy port.
    pub proxy_server_port: Option<u16>,
}

impl Default for ClientPolicy {
    fn default() -> Self {
        Self {
            connection_timeout_ms: 30_000,
            receive_timeout_ms: 60_000,
            async_execute_timeout_ms: None,
            async_execute_timeout_rejection: false,
            allow_chunking: true,
            chunking_threshold: 4096,
            auto_redirect: false,
            max_retransmits: -1,
            accept: None,
            accept_encoding: None,
            accept_language: None,
            cache_control: None,
            host: None,
            connection: None,
            cookie: None,
            referer: None,
            browser_type: None,
            proxy_server: None,
            proxy_server_port: None,
        }
    }
}

impl ClientPolicy {
    /// Timeout applied to an async delivery submission.
    pub fn async_execute_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.async_execute_timeout_ms.unwrap_or(1000))
    }

    /// `host:port` of the configured proxy, if any.
    pub fn proxy_address(&self) -> Option<String> {
        self.proxy_server
            .as_ref()
            .map(|host| format!("{}:{}", host, self.proxy_server_port.unwrap_or(8080)))
    }
}

/// Server-side HTTP policy, read-only to the destination.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerPolicy {
    /// Default `Content-Type` of responses.
    pub content_type: Option<String>,

    /// `Server` header value.
    pub server_type: Option<String>,

    /// Default `Cache-Control` header.
    pub cache_control: Option<String>,

    /// Keep connections alive; when false responses carry `Connection: close`.
    pub honor_keep_alive: bool,

    /// `Keep-Alive` header parameters (e.g. `timeout=5, max=100`).
    pub keep_alive_parameters: Option<String>,

    /// Redirect every request to this URL instead of dispatching it.
    pub redirect_url: Option<String>,

    /// Maximum request body accepted by the server adapter, in bytes.
    pub max_request_body: usize,
}

impl Default for ServerPolicy {
    fn default() -> Self {
        Self {
            content_type: None,
            server_type: None,
            cache_control: None,
            honor_keep_alive: true,
            keep_alive_parameters: None,
            redirect_url: None,
            max_request_body: 16 * 1024 * 1024,
        }
    }
}

/// Credentials for HTTP authentication.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthorizationPolicy {
    pub user_name: Option<String>,
    pub password: Option<String>,
    /// `Basic` (default) or a custom scheme name.
    pub authorization_type: Option<String>,
    /// Raw credentials used with a custom scheme.
    pub authorization: Option<String>,
}

/// TLS parameters forwarded untouched to the connection factory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsClientParameters {
    /// Skip the hostname / certificate CN comparison.
    pub disable_cn_check: bool,
    /// Cipher suites the factory should restrict the handshake to.
    pub cipher_suites: Vec<String>,
}

/// Listener configuration for the destination server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Path prefix the destination is mounted under.
    pub base_path: String,

    /// Whether handlers may suspend requests.
    pub async_supported: bool,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            base_path: "/".to_string(),
            async_supported: true,
            request_timeout_secs: 30,
        }
    }
}

/// Worker queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkQueueConfig {
    /// Queue name used in logs and metrics.
    pub name: String,

    /// Maximum concurrently running delivery tasks.
    pub max_workers: usize,
}

impl Default for WorkQueueConfig {
    fn default() -> Self {
        Self {
            name: "http-conduit".to_string(),
            max_workers: 25,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of the human format.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_uses_defaults() {
        let config: TransportConfig = toml::from_str("[client]\nauto_redirect = true\n").unwrap();
        assert!(config.client.auto_redirect);
        assert_eq!(config.client.chunking_threshold, 4096);
        assert_eq!(config.client.max_retransmits, -1);
        assert!(config.server.honor_keep_alive);
    }

    #[test]
    fn connection_type_kebab_case() {
        let policy: ClientPolicy = toml::from_str("connection = \"close\"").unwrap();
        assert_eq!(policy.connection, Some(ConnectionType::Close));
        assert_eq!(ConnectionType::KeepAlive.as_header_value(), "Keep-Alive");
    }

    #[test]
    fn async_timeout_defaults_to_one_second() {
        let policy = ClientPolicy::default();
        assert_eq!(policy.async_execute_timeout().as_millis(), 1000);
    }
}
