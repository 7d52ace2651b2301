//! The HTTP response channel of one inbound request.

use std::fmt;

use bytes::Bytes;

use crate::destination::response::SharedResponse;
use crate::destination::HttpDestination;
use crate::error::{Result, TransportError};
use crate::message::{CloseHandle, Message};

/// Writes the response to an inbound message.
///
/// Headers are flushed on the first write (or on close when nothing was
/// written). Closing the channel also closes the request's input, so the
/// pipeline cannot keep reading a request that was already answered.
pub struct BackChannel {
    destination: HttpDestination,
    in_message: Message,
    input: Option<CloseHandle>,
    stream: Option<SharedResponse>,
    flushed: bool,
}

impl BackChannel {
    pub(super) fn new(destination: HttpDestination, in_message: Message) -> Self {
        let input = in_message.body.as_ref().map(|body| body.close_handle());
        Self {
            destination,
            in_message,
            input,
            stream: None,
            flushed: false,
        }
    }

    pub fn in_message(&self) -> &Message {
        &self.in_message
    }

    pub fn in_message_mut(&mut self) -> &mut Message {
        &mut self.in_message
    }

    /// An outbound message answering on this request's response.
    pub fn create_out_message(&self) -> Message {
        let mut out = Message::new();
        out.exchange = self.in_message.exchange.clone();
        out.http_response = self.in_message.http_response.clone();
        out.destination = Some(self.destination.clone());
        out.encoding = self.in_message.encoding.clone();
        out
    }

    /// An interim 202 answer sent before the full response.
    pub fn create_partial_response(&self) -> Message {
        let mut out = self.create_out_message();
        out.partial_response = true;
        out.response_code = Some(202);
        out
    }

    /// Append `data` to the response body of `out`.
    ///
    /// Data written to a response that carries no content is discarded.
    pub async fn write(&mut self, out: &mut Message, data: Bytes) -> Result<()> {
        self.flush(out).await?;
        let Some(stream) = &self.stream else {
            tracing::trace!(message_id = %out.id, bytes = data.len(), "Discarding body of content-free response");
            return Ok(());
        };
        stream
            .lock()
            .await
            .write(data)
            .await
            .map_err(|e| TransportError::io(self.url(), e))
    }

    /// Finish the response and close the request input.
    pub async fn close(mut self, out: &mut Message) -> Result<()> {
        let flushed = self.flush(out).await;
        let closed = match (&flushed, self.stream.take()) {
            (Ok(()), Some(stream)) => stream
                .lock()
                .await
                .close()
                .await
                .map_err(|e| TransportError::io(self.url(), e)),
            _ => Ok(()),
        };
        if let Some(input) = &self.input {
            input.close();
        }
        tracing::debug!(
            destination = %self.destination.name(),
            message_id = %self.in_message.id,
            status = ?out.response_code,
            "Back channel closed"
        );
        flushed.and(closed)
    }

    async fn flush(&mut self, out: &mut Message) -> Result<()> {
        if self.flushed {
            return Ok(());
        }
        self.stream = self
            .destination
            .flush_headers(out, Some(&mut self.in_message))
            .await?;
        self.flushed = true;
        Ok(())
    }

    fn url(&self) -> String {
        self.in_message.endpoint_address.clone().unwrap_or_default()
    }
}

impl fmt::Debug for BackChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackChannel")
            .field("destination", &self.destination.name())
            .field("in_message", &self.in_message.id)
            .field("flushed", &self.flushed)
            .finish_non_exhaustive()
    }
}
