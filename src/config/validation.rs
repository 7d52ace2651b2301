//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (worker counts > 0, addresses parse)
//! - Detect contradictory policy settings
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: TransportConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::TransportConfig;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check a parsed configuration for semantic errors.
pub fn validate_config(config: &TransportConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if !config.listener.base_path.starts_with('/') {
        errors.push(ValidationError::new("listener.base_path", "must start with '/'"));
    }

    if config.workqueue.max_workers == 0 {
        errors.push(ValidationError::new("workqueue.max_workers", "must be greater than 0"));
    }

    if config.client.proxy_server_port.is_some() && config.client.proxy_server.is_none() {
        errors.push(ValidationError::new(
            "client.proxy_server_port",
            "set without client.proxy_server",
        ));
    }
    if config.client.async_execute_timeout_ms == Some(0) && config.client.async_execute_timeout_rejection {
        errors.push(ValidationError::new(
            "client.async_execute_timeout_rejection",
            "a zero async timeout with rejection enabled rejects every async response",
        ));
    }

    if config.server.max_request_body == 0 {
        errors.push(ValidationError::new("server.max_request_body", "must be greater than 0"));
    }

    if !LOG_LEVELS.contains(&config.observability.log_level.as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level '{}'", config.observability.log_level),
        ));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
