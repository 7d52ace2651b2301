//! Connection trust decision.
//!
//! # Responsibilities
//! - Force the physical connection to connect so session info exists
//! - Consult the conduit-level decider, then the message-level decider
//! - Disconnect and fail on a veto
//!
//! # Design Decisions
//! - Runs once per physical connection, after headers are set and before
//!   the first body byte; the conduit stream owns the "already decided" flag
//! - With no decider at all, trust is assumed

use std::fmt;
use std::sync::Arc;

use crate::error::{Result, TransportError};
use crate::message::Message;
use crate::net::connection::{ConnectionInfo, PhysicalConnection};

/// Pluggable veto over an established connection.
pub trait TrustDecider: Send + Sync + fmt::Debug {
    /// Name reported in logs and errors.
    fn logical_name(&self) -> &str;

    /// `Err(reason)` vetoes the connection.
    fn establish_trust(
        &self,
        conduit_name: &str,
        info: &ConnectionInfo,
        message: &Message,
    ) -> std::result::Result<(), String>;
}

/// Connect `connection` and run every applicable trust decider against it.
pub async fn make_trust_decision(
    conduit_name: &str,
    conduit_decider: Option<&Arc<dyn TrustDecider>>,
    message: &Message,
    connection: &mut dyn PhysicalConnection,
) -> Result<()> {
    let url = connection.url().to_string();
    connection
        .connect()
        .await
        .map_err(|e| TransportError::io(url.clone(), e))?;

    let deciders: Vec<&Arc<dyn TrustDecider>> = conduit_decider
        .into_iter()
        .chain(message.trust_decider.as_ref())
        .collect();
    if deciders.is_empty() {
        tracing::debug!(conduit = %conduit_name, url = %url, "No trust decider configured; trust assumed");
        return Ok(());
    }

    let info = connection.connection_info();
    for decider in deciders {
        if let Err(reason) = decider.establish_trust(conduit_name, &info, message) {
            tracing::warn!(
                conduit = %conduit_name,
                decider = %decider.logical_name(),
                url = %url,
                reason = %reason,
                "Connection vetoed by trust decider"
            );
            connection.disconnect().await;
            return Err(TransportError::UntrustedConnection {
                conduit: conduit_name.to_string(),
                decider: decider.logical_name().to_string(),
                url,
                reason,
            });
        }
        tracing::debug!(
            conduit = %conduit_name,
            decider = %decider.logical_name(),
            url = %url,
            "Connection trusted"
        );
    }
    Ok(())
}
