//! HTTP authentication: credential suppliers and header parsing.
//!
//! # Responsibilities
//! - Produce `Authorization` / `Proxy-Authorization` values from an
//!   [`AuthorizationPolicy`], preemptively or in answer to a challenge
//! - Parse `WWW-Authenticate` / `Proxy-Authenticate` challenges
//! - Decode Basic credentials received by the destination
//!
//! # Design Decisions
//! - Suppliers are stateless; repeated challenges for the same URL and realm
//!   are caught by the conduit's loop check, not here
//! - The supplier is picked from the policy's `authorization_type`

use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use url::Url;

use crate::config::AuthorizationPolicy;
use crate::message::Message;

/// Source of credentials for one conduit.
pub trait AuthSupplier: Send + Sync + fmt::Debug {
    /// Whether the request body must be cached so it can be replayed
    /// after a challenge.
    fn requires_request_caching(&self) -> bool;

    /// Header value to send to `url`. `challenge` is the raw
    /// `WWW-Authenticate` value when answering a 401, `None` when sending
    /// preemptively.
    fn authorization(
        &self,
        policy: &AuthorizationPolicy,
        url: &Url,
        message: &Message,
        challenge: Option<&str>,
    ) -> Option<String>;
}

/// `Basic` credentials from the policy's user name and password.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultBasicAuthSupplier;

impl DefaultBasicAuthSupplier {
    pub fn header_value(user_name: &str, password: &str) -> String {
        format!("Basic {}", BASE64.encode(format!("{}:{}", user_name, password)))
    }
}

impl AuthSupplier for DefaultBasicAuthSupplier {
    fn requires_request_caching(&self) -> bool {
        false
    }

    fn authorization(
        &self,
        policy: &AuthorizationPolicy,
        _url: &Url,
        _message: &Message,
        challenge: Option<&str>,
    ) -> Option<String> {
        if let Some(challenge) = challenge {
            let header = HttpAuthHeader::parse(challenge);
            if !header.is_scheme("Basic") {
                tracing::debug!(scheme = %header.scheme, "Basic supplier cannot answer challenge");
                return None;
            }
        }
        let user_name = policy.user_name.as_deref()?;
        Some(Self::header_value(user_name, policy.password.as_deref().unwrap_or("")))
    }
}

/// Emits the policy's `authorization_type` and raw `authorization` verbatim.
#[derive(Debug, Default, Clone, Copy)]
pub struct CustomAuthSupplier;

impl AuthSupplier for CustomAuthSupplier {
    fn requires_request_caching(&self) -> bool {
        false
    }

    fn authorization(
        &self,
        policy: &AuthorizationPolicy,
        _url: &Url,
        _message: &Message,
        _challenge: Option<&str>,
    ) -> Option<String> {
        let credentials = policy.authorization.as_deref()?;
        Some(match policy.authorization_type.as_deref() {
            Some(scheme) => format!("{} {}", scheme, credentials),
            None => credentials.to_string(),
        })
    }
}

/// Supplier matching the policy's authorization type (Basic when unset).
pub fn supplier_for(policy: &AuthorizationPolicy) -> Arc<dyn AuthSupplier> {
    match policy.authorization_type.as_deref() {
        Some(scheme) if !scheme.eq_ignore_ascii_case("Basic") => Arc::new(CustomAuthSupplier),
        _ => Arc::new(DefaultBasicAuthSupplier),
    }
}

/// A parsed authentication challenge or credentials header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpAuthHeader {
    pub scheme: String,
    /// Everything after the scheme.
    pub params: String,
    pub realm: Option<String>,
}

impl HttpAuthHeader {
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        let (scheme, params) = match value.split_once(char::is_whitespace) {
            Some((scheme, rest)) => (scheme, rest.trim()),
            None => (value, ""),
        };
        Self {
            scheme: scheme.to_string(),
            params: params.to_string(),
            realm: param_value(params, "realm"),
        }
    }

    pub fn is_scheme(&self, scheme: &str) -> bool {
        self.scheme.eq_ignore_ascii_case(scheme)
    }
}

fn param_value(params: &str, wanted: &str) -> Option<String> {
    params.split(',').find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if name.trim().eq_ignore_ascii_case(wanted) {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

/// Credentials carried by an inbound `Authorization` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedCredentials {
    pub authorization_type: String,
    pub user_name: Option<String>,
    pub password: Option<String>,
    /// Raw credentials for non-Basic schemes.
    pub authorization: Option<String>,
}

impl ReceivedCredentials {
    /// Parse `scheme credentials`. Basic credentials are base64 decoded into
    /// user name and password, with empty strings for missing parts.
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, credentials) = header.split_once(' ')?;
        let credentials = credentials.trim();

        if !scheme.eq_ignore_ascii_case("Basic") {
            return Some(Self {
                authorization_type: scheme.to_string(),
                user_name: None,
                password: None,
                authorization: Some(credentials.to_string()),
            });
        }

        let decoded = BASE64.decode(credentials).ok()?;
        let decoded = String::from_utf8_lossy(&decoded);
        let (user, pass) = match decoded.split_once(':') {
            Some((user, pass)) => (user.to_string(), pass.to_string()),
            None => (decoded.to_string(), String::new()),
        };
        Some(Self {
            authorization_type: "Basic".to_string(),
            user_name: Some(user),
            password: Some(pass),
            authorization: Some(credentials.to_string()),
        })
    }

    pub fn into_policy(self) -> AuthorizationPolicy {
        AuthorizationPolicy {
            user_name: self.user_name,
            password: self.password,
            authorization_type: Some(self.authorization_type),
            authorization: self.authorization,
        }
    }
}
