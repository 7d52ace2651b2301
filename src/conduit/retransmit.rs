//! Redirect and authentication retransmission.
//!
//! A redirect is followed only with `auto_redirect`, after the loop check
//! and the redirect policy pass. A 401/407 is answered at most once per
//! (URL, realm). Each retransmission uses a new physical connection.

use std::collections::{HashMap, HashSet};

use url::Url;

use super::stream::ConduitStream;
use crate::error::{Result, TransportError};
use crate::http::headers::{
    Headers, LOCATION, PROXY_AUTHENTICATE, WWW_AUTHENTICATE,
};
use crate::message::ContextFlags;
use crate::net::connection::ResponseHead;
use crate::observability::metrics;
use crate::security::auth::HttpAuthHeader;

pub(crate) fn is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Challenge {
    Server,
    Proxy,
}

impl Challenge {
    fn header(self) -> &'static str {
        match self {
            Challenge::Server => WWW_AUTHENTICATE,
            Challenge::Proxy => PROXY_AUTHENTICATE,
        }
    }

    fn metric(self) -> &'static str {
        match self {
            Challenge::Server => "auth",
            Challenge::Proxy => "proxy_auth",
        }
    }
}

impl ConduitStream {
    /// Retransmit while the response asks for it and the limit allows.
    pub(super) async fn handle_retransmits(&mut self, mut head: ResponseHead) -> Result<ResponseHead> {
        let max = self.policy.max_retransmits;
        let mut count = 0;
        while max < 0 || count < max {
            match self.process_retransmit(&head).await? {
                Some(next) => {
                    head = next;
                    count += 1;
                }
                None => return Ok(head),
            }
        }

        if self.wants_retransmit(&head) {
            tracing::warn!(
                conduit = %self.conduit.name(),
                url = %self.url,
                limit = max,
                status = head.status,
                "Retransmit limit reached"
            );
            return Err(TransportError::RetransmitLimitExceeded {
                url: self.url.to_string(),
                limit: max,
                status: head.status,
            });
        }
        Ok(head)
    }

    async fn process_retransmit(&mut self, head: &ResponseHead) -> Result<Option<ResponseHead>> {
        if let Some(exchange) = &self.message.exchange {
            exchange.set_response_code(head.status);
        }
        match head.status {
            status if is_redirect(status) => self.redirect_retransmit(head).await,
            401 => self.authorization_retransmit(head, Challenge::Server).await,
            407 => self.authorization_retransmit(head, Challenge::Proxy).await,
            _ => Ok(None),
        }
    }

    /// True when `head` would have been retransmitted given more attempts.
    fn wants_retransmit(&self, head: &ResponseHead) -> bool {
        match head.status {
            status if is_redirect(status) => {
                self.policy.auto_redirect && head.headers.contains(LOCATION)
            }
            401 => head.headers.contains(WWW_AUTHENTICATE),
            407 => head.headers.contains(PROXY_AUTHENTICATE),
            _ => false,
        }
    }

    async fn redirect_retransmit(&mut self, head: &ResponseHead) -> Result<Option<ResponseHead>> {
        if !self.policy.auto_redirect {
            return Ok(None);
        }
        let Some(location) = head.headers.get_first(LOCATION) else {
            tracing::debug!(url = %self.url, status = head.status, "Redirect without Location");
            return Ok(None);
        };

        let conduit = self.conduit.name().to_string();
        let flags = self.message.flags.clone();
        let target = absolute_redirect_url(&conduit, &self.url, location, &flags)?;
        let current = self.url.to_string();
        detect_redirect_loop(&conduit, &current, target.as_str(), self.visited(), flags.max_same_uri_count)?;
        check_allowed_redirect(&conduit, &self.url, &target, &flags)?;

        Headers::new(&mut self.message).remove_authorization_headers();
        self.conduit.set_headers_by_authorization_policy(&mut self.message, &target);
        self.conduit.cookies.write_to_message_headers(&mut self.message, &target);
        self.message.retransmit_url = Some(target.to_string());

        metrics::record_retransmit("redirect");
        tracing::info!(
            conduit = %conduit,
            from = %current,
            to = %target,
            status = head.status,
            "Following redirect"
        );
        self.retransmit(target).await.map(Some)
    }

    async fn authorization_retransmit(
        &mut self,
        head: &ResponseHead,
        challenge: Challenge,
    ) -> Result<Option<ResponseHead>> {
        let Some(header) = head.headers.get_first(challenge.header()) else {
            tracing::warn!(url = %self.url, status = head.status, "{} response header is not set", challenge.header());
            return Ok(None);
        };
        let realm = HttpAuthHeader::parse(header).realm.unwrap_or_default();

        let conduit = self.conduit.name().to_string();
        let url = self.url.to_string();
        let key = match challenge {
            Challenge::Server => url.clone(),
            Challenge::Proxy => format!("proxy:{}", url),
        };
        detect_authorization_loop(&conduit, &key, &url, &realm, self.auth_urls())?;

        let answer = match challenge {
            Challenge::Server => {
                let policy = self
                    .message
                    .authorization_policy
                    .clone()
                    .unwrap_or_else(|| self.conduit.authorization.clone());
                self.conduit
                    .auth_supplier
                    .authorization(&policy, &self.url, &self.message, Some(header))
            }
            Challenge::Proxy => self.conduit.proxy_auth_supplier.authorization(
                &self.conduit.proxy_authorization,
                &self.url,
                &self.message,
                Some(header),
            ),
        };
        let Some(answer) = answer else {
            tracing::debug!(conduit = %conduit, url = %url, realm = %realm, "No credentials for challenge");
            return Ok(None);
        };

        let mut headers = Headers::new(&mut self.message);
        match challenge {
            Challenge::Server => headers.set_authorization(answer),
            Challenge::Proxy => headers.set_proxy_authorization(answer),
        }
        let target = self.url.clone();
        self.conduit.cookies.write_to_message_headers(&mut self.message, &target);

        metrics::record_retransmit(challenge.metric());
        tracing::info!(conduit = %conduit, url = %url, realm = %realm, status = head.status, "Answering authentication challenge");
        self.retransmit(target).await.map(Some)
    }
}

/// Resolve a `Location` value; relative values need `allow_relative_redirect`.
pub(crate) fn absolute_redirect_url(
    conduit: &str,
    current: &Url,
    location: &str,
    flags: &ContextFlags,
) -> Result<Url> {
    let rejected = |reason: &str| TransportError::RedirectRejected {
        conduit: conduit.to_string(),
        url: location.to_string(),
        reason: reason.to_string(),
    };
    if location.starts_with("http") {
        return Url::parse(location).map_err(|_| rejected("Invalid Redirect URI"));
    }
    if !flags.allow_relative_redirect {
        return Err(rejected("Relative Redirect"));
    }
    current.join(location).map_err(|_| rejected("Invalid Redirect URI"))
}

/// Record a visit to `current` and refuse `target` if it was seen before.
///
/// Going back to the URL just visited is a loop unless `max_same_uri_count`
/// allows it; going back to an earlier URL is a loop unless the count allows
/// that many visits.
pub(crate) fn detect_redirect_loop(
    conduit: &str,
    current: &str,
    target: &str,
    visited: &mut HashMap<String, u32>,
    max_same_uri_count: Option<u32>,
) -> Result<()> {
    visited.entry(current.to_string()).or_insert(1);

    if let Some(&count) = visited.get(target) {
        let allowed = match max_same_uri_count {
            Some(max) => count <= max,
            None => false,
        };
        if !allowed {
            tracing::warn!(conduit = %conduit, from = %current, to = %target, visits = count, "Redirect loop detected");
            return Err(TransportError::RedirectLoop {
                conduit: conduit.to_string(),
                url: target.to_string(),
            });
        }
    }
    *visited.entry(target.to_string()).or_insert(0) += 1;
    Ok(())
}

/// Enforce `redirect_same_host_only` and `allowed_redirect_uri`.
pub(crate) fn check_allowed_redirect(
    conduit: &str,
    current: &Url,
    target: &Url,
    flags: &ContextFlags,
) -> Result<()> {
    if flags.redirect_same_host_only
        && (current.scheme() != target.scheme() || current.host_str() != target.host_str())
    {
        return Err(TransportError::RedirectRejected {
            conduit: conduit.to_string(),
            url: target.to_string(),
            reason: "Different HTTP Scheme or Host Redirect".to_string(),
        });
    }
    if let Some(prefix) = &flags.allowed_redirect_uri {
        if !target.as_str().starts_with(prefix.as_str()) {
            return Err(TransportError::RedirectRejected {
                conduit: conduit.to_string(),
                url: target.to_string(),
                reason: "Forbidden Redirect URI".to_string(),
            });
        }
    }
    Ok(())
}

/// Refuse a second answer to the same (`key`, `realm`) challenge.
pub(crate) fn detect_authorization_loop(
    conduit: &str,
    key: &str,
    url: &str,
    realm: &str,
    answered: &mut HashSet<String>,
) -> Result<()> {
    if !answered.insert(format!("{}{}", key, realm)) {
        tracing::warn!(conduit = %conduit, url = %url, realm = %realm, "Authorization loop detected");
        return Err(TransportError::AuthorizationLoop {
            conduit: conduit.to_string(),
            url: url.to_string(),
            realm: realm.to_string(),
        });
    }
    Ok(())
}
