//! Per-conduit cookie jar.
//!
//! # Responsibilities
//! - Parse `Set-Cookie` response headers
//! - Keep cookies keyed by domain, path and name for the conduit's lifetime
//! - Render matching cookies into the `Cookie` header before each transmission
//!
//! # Design Decisions
//! - Backed by `DashMap`: concurrent requests on one conduit update
//!   independent entries without a global lock and without lost updates
//! - Expired cookies (including `Max-Age=0`) delete the stored entry

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use url::Url;

use crate::http::headers::{Headers, COOKIE, SET_COOKIE};
use crate::message::{Message, ProtocolHeaders};

/// A single stored cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// Lower-case domain without a leading dot.
    pub domain: String,
    /// Only sent to exactly `domain` (no `Domain` attribute was given).
    pub host_only: bool,
    pub path: String,
    pub expires: Option<SystemTime>,
    pub secure: bool,
}

impl Cookie {
    /// Parse one `Set-Cookie` value received from `url`.
    pub fn parse(set_cookie: &str, url: &Url) -> Option<Cookie> {
        let mut parts = set_cookie.split(';');
        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let host = url.host_str()?.to_ascii_lowercase();
        let mut cookie = Cookie {
            name: name.to_string(),
            value: value.trim().trim_matches('"').to_string(),
            domain: host,
            host_only: true,
            path: default_path(url.path()),
            expires: None,
            secure: false,
        };

        let mut max_age: Option<i64> = None;
        for attribute in parts {
            let (key, val) = match attribute.split_once('=') {
                Some((k, v)) => (k.trim(), v.trim()),
                None => (attribute.trim(), ""),
            };
            if key.eq_ignore_ascii_case("domain") && !val.is_empty() {
                cookie.domain = val.trim_start_matches('.').to_ascii_lowercase();
                cookie.host_only = false;
            } else if key.eq_ignore_ascii_case("path") && val.starts_with('/') {
                cookie.path = val.to_string();
            } else if key.eq_ignore_ascii_case("max-age") {
                max_age = val.parse().ok();
            } else if key.eq_ignore_ascii_case("expires") {
                cookie.expires = httpdate::parse_http_date(val).ok();
            } else if key.eq_ignore_ascii_case("secure") {
                cookie.secure = true;
            }
        }
        if let Some(seconds) = max_age {
            cookie.expires = Some(if seconds <= 0 {
                SystemTime::UNIX_EPOCH
            } else {
                SystemTime::now() + Duration::from_secs(seconds as u64)
            });
        }
        Some(cookie)
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expires.map(|at| at <= now).unwrap_or(false)
    }

    /// Whether this cookie should accompany a request to `url`.
    pub fn matches(&self, url: &Url, now: SystemTime) -> bool {
        if self.is_expired(now) || (self.secure && url.scheme() != "https") {
            return false;
        }
        let Some(host) = url.host_str().map(str::to_ascii_lowercase) else {
            return false;
        };
        let domain_ok = if self.host_only {
            host == self.domain
        } else {
            host == self.domain || host.ends_with(&format!(".{}", self.domain))
        };
        domain_ok && path_matches(url.path(), &self.path)
    }

    fn key(&self) -> String {
        format!("{}|{}|{}", self.domain, self.path, self.name)
    }
}

/// Directory of the request path, per RFC 6265 §5.1.4.
fn default_path(request_path: &str) -> String {
    match request_path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(i) => request_path[..i].to_string(),
    }
}

fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    request_path == cookie_path
        || (request_path.starts_with(cookie_path)
            && (cookie_path.ends_with('/') || request_path[cookie_path.len()..].starts_with('/')))
}

/// Cookie jar shared by every request of one conduit.
#[derive(Debug, Clone, Default)]
pub struct Cookies {
    jar: Arc<DashMap<String, Cookie>>,
}

impl Cookies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store every `Set-Cookie` of a response received from `url`.
    pub fn read_from_headers(&self, url: &Url, headers: &ProtocolHeaders) {
        let Some(values) = headers.get(SET_COOKIE) else {
            return;
        };
        let now = SystemTime::now();
        for value in values {
            match Cookie::parse(value, url) {
                Some(cookie) if cookie.is_expired(now) => {
                    self.jar.remove(&cookie.key());
                }
                Some(cookie) => {
                    tracing::trace!(cookie = %cookie.name, domain = %cookie.domain, "Storing cookie");
                    self.jar.insert(cookie.key(), cookie);
                }
                None => tracing::debug!(value = %value, "Ignoring malformed Set-Cookie"),
            }
        }
    }

    /// `name=value` pairs for every live cookie matching `url`.
    pub fn cookies_for(&self, url: &Url) -> Vec<String> {
        let now = SystemTime::now();
        let mut matching: Vec<Cookie> = self
            .jar
            .iter()
            .filter(|entry| entry.value().matches(url, now))
            .map(|entry| entry.value().clone())
            .collect();
        // Longer paths first, as user agents conventionally order them.
        matching.sort_by(|a, b| b.path.len().cmp(&a.path.len()).then(a.name.cmp(&b.name)));
        matching
            .into_iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect()
    }

    /// Put the cookies matching `url` into the message's `Cookie` header.
    pub fn write_to_message_headers(&self, message: &mut Message, url: &Url) {
        let cookies = self.cookies_for(url);
        if cookies.is_empty() {
            return;
        }
        Headers::get_set_protocol_headers(message).set(COOKIE, cookies);
    }

    /// Every stored cookie that has not expired.
    pub fn session_cookies(&self) -> Vec<Cookie> {
        let now = SystemTime::now();
        self.jar
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jar.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jar.is_empty()
    }
}
