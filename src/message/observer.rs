//! Sink for inbound messages.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::message::Message;

/// What the observer did with a delivered message.
#[derive(Debug)]
pub enum Delivery {
    /// Processing finished (or was handed off for good).
    Completed,
    /// Processing was suspended; the message comes back to be resumed
    /// by a later invocation for the same request.
    Suspended(Message),
}

/// Receives completed inbound messages from a conduit or destination.
#[async_trait]
pub trait MessageObserver: Send + Sync {
    async fn on_message(&self, message: Message) -> Delivery;

    /// A response that was being delivered off the caller's task failed.
    async fn on_fault(&self, error: TransportError) {
        tracing::warn!(error = %error, "Asynchronous delivery failed");
    }
}
