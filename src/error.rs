//! Transport error taxonomy.
//!
//! Every failure surfaced to the invocation layer carries the offending URL
//! and, where one exists, the HTTP status code.

use thiserror::Error;

/// Errors raised by the conduit and the destination.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket, connect or read failure on a physical connection.
    #[error("{kind} invoking {url}: {source}")]
    Io {
        kind: String,
        url: String,
        #[source]
        source: std::io::Error,
    },

    /// A redirect target was already visited during this exchange.
    #[error("Redirect loop detected on Conduit '{conduit}' on '{url}'")]
    RedirectLoop { conduit: String, url: String },

    /// The same (URL, realm) challenge was answered twice.
    #[error("Authorization loop detected on Conduit \"{conduit}\" on URL \"{url}\" with realm \"{realm}\"")]
    AuthorizationLoop {
        conduit: String,
        url: String,
        realm: String,
    },

    /// The server kept asking for retransmission past the configured limit.
    #[error("Retransmit limit of {limit} exceeded invoking {url} (last status {status})")]
    RetransmitLimitExceeded { url: String, limit: i32, status: u16 },

    /// A redirect was refused by the redirect policy (relative, cross-host, not allowed).
    #[error("{reason} detected on Conduit '{conduit}' on '{url}'")]
    RedirectRejected {
        conduit: String,
        url: String,
        reason: String,
    },

    /// A trust decider vetoed the connection.
    #[error("Trust decider '{decider}' considers Conduit '{conduit}' untrusted for {url}: {reason}")]
    UntrustedConnection {
        conduit: String,
        decider: String,
        url: String,
        reason: String,
    },

    /// A content-type charset that cannot be mapped to a supported encoding.
    #[error("Invalid character encoding: {charset}")]
    InvalidEncoding { charset: String },

    /// Server side programming error: no response object to flush to.
    #[error("Missing or unexpected response object: {0}")]
    MissingResponse(String),

    /// Terminal HTTP status that is treated as a failure.
    #[error("HTTP response '{code}: {reason}' when communicating with {url}")]
    HttpStatus {
        code: u16,
        reason: String,
        url: String,
    },

    /// No usable endpoint address could be resolved.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// The worker queue rejected the response task and policy forbids inline fallback.
    #[error("Response delivery for {url} rejected by the worker queue")]
    ExecutorRejected { url: String },
}

impl TransportError {
    /// Wrap an I/O error so the message names the URL being invoked.
    pub fn io(url: impl Into<String>, source: std::io::Error) -> Self {
        TransportError::Io {
            kind: format!("{:?}", source.kind()),
            url: url.into(),
            source,
        }
    }

    /// Status code carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::HttpStatus { code, .. } => Some(*code),
            TransportError::RetransmitLimitExceeded { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for errors that must never trigger another attempt.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransportError::Io { .. })
    }
}

/// Result alias used throughout the transport.
pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_names_url() {
        let err = TransportError::io(
            "http://localhost:9000/svc",
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        );
        let msg = err.to_string();
        assert!(msg.contains("http://localhost:9000/svc"));
        assert!(msg.contains("ConnectionRefused"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn status_error_carries_code() {
        let err = TransportError::HttpStatus {
            code: 404,
            reason: "Not Found".into(),
            url: "http://h/a".into(),
        };
        assert_eq!(err.status(), Some(404));
        assert!(err.is_fatal());
    }
}
