//! Response processing and delivery.
//!
//! Synchronous exchanges are delivered on the caller's task. Asynchronous
//! ones go to the exchange's executor or the conduit's work queue; when no
//! worker frees up in time the response is delivered inline, unless the
//! policy asks for the rejection to be raised.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::stream::ConduitStream;
use super::HttpConduit;
use crate::error::{Result, TransportError};
use crate::http::charset::{find_charset, map_charset};
use crate::http::headers::CONTENT_TYPE;
use crate::message::{BodyReader, Delivery, Exchange, Message};
use crate::net::connection::ResponseHead;

/// Logged once per process, the first time a work queue rejects a task.
static EXECUTOR_FULL_WARNED: AtomicBool = AtomicBool::new(false);

impl ConduitStream {
    pub(super) async fn handle_response(self, head: ResponseHead) -> Result<()> {
        let synchronous = self
            .message
            .exchange
            .as_ref()
            .map(|e| e.is_synchronous())
            .unwrap_or(true);
        if synchronous {
            return self.handle_response_internal(head).await;
        }
        self.handle_response_async(head).await
    }

    async fn handle_response_async(self, head: ResponseHead) -> Result<()> {
        let conduit = Arc::clone(&self.conduit);
        let queue = self
            .message
            .exchange
            .as_ref()
            .and_then(|e| e.executor().cloned())
            .unwrap_or_else(|| Arc::clone(&conduit.workqueue));
        let timeout = self.policy.async_execute_timeout();

        match queue.reserve(timeout).await {
            Ok(slot) => {
                tracing::debug!(conduit = %conduit.name(), queue = %queue.name(), "Delivering response on work queue");
                let exchange = self.message.exchange.clone();
                slot.spawn(async move {
                    if let Err(e) = self.handle_response_internal(head).await {
                        deliver_fault(&conduit, exchange.as_ref(), e).await;
                    }
                });
                Ok(())
            }
            Err(rejected) => {
                if self.policy.async_execute_timeout_rejection {
                    self.record("rejected");
                    return Err(TransportError::ExecutorRejected {
                        url: self.url.to_string(),
                    });
                }
                if !EXECUTOR_FULL_WARNED.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        queue = %rejected.queue,
                        "Work queue is full; responses will be delivered on the calling task. \
                         Consider a larger queue or a longer async_execute_timeout_ms"
                    );
                }
                tracing::debug!(conduit = %conduit.name(), error = %rejected, "Delivering response inline");
                self.handle_response_internal(head).await
            }
        }
    }

    /// Build the inbound message and deliver it.
    async fn handle_response_internal(mut self, head: ResponseHead) -> Result<()> {
        let result = self.deliver(head).await;
        self.record(match &result {
            Ok(()) => "ok",
            Err(_) => "error",
        });
        result
    }

    async fn deliver(&mut self, head: ResponseHead) -> Result<()> {
        let exchange = self.message.exchange.clone();
        let oneway = self.message.is_oneway();
        let code = match self.process_response_code(&head) {
            Ok(code) => code,
            Err(e) => {
                self.connection.disconnect().await;
                return Err(e);
            }
        };

        let reason = head.reason.clone();
        let mut inbound = Message::new();
        inbound.exchange = exchange.clone();
        inbound.endpoint_address = Some(self.url.to_string());
        inbound.response_code = Some(code);
        inbound.content_type = head.headers.get_first(CONTENT_TYPE).map(str::to_string);
        if self.message.flags.set_http_response_message {
            inbound.response_message = Some(reason.clone());
        }
        inbound.headers = Some(head.headers);

        let process_response = !oneway || (self.message.flags.robust_oneway && code == 500);
        if (!process_response || code == 202) && self.message.flags.process_202_response {
            let partial = if self.message.flags.process_oneway_response {
                self.take_body().await?
            } else {
                None
            };
            match partial {
                Some(body) => {
                    inbound.partial_response = true;
                    inbound.body = Some(body);
                }
                None => {
                    self.connection.disconnect().await;
                    if oneway && code > 300 {
                        return Err(TransportError::HttpStatus {
                            code,
                            reason,
                            url: self.url.to_string(),
                        });
                    }
                    if let Some(exchange) = &exchange {
                        exchange.mark_in_chain_complete();
                        exchange.set_in_message(inbound);
                    }
                    tracing::debug!(url = %self.url, status = code, "Exchange completed without response body");
                    return Ok(());
                }
            }
        }

        let charset = find_charset(inbound.content_type.as_deref());
        let encoding = map_charset(charset.as_deref()).ok_or_else(|| {
            tracing::warn!(url = %self.url, charset = ?charset, "Unsupported response encoding");
            TransportError::InvalidEncoding {
                charset: charset.clone().unwrap_or_default(),
            }
        })?;
        inbound.encoding = Some(encoding);
        if inbound.body.is_none() {
            inbound.body = Some(self.take_body().await?.unwrap_or_else(BodyReader::empty));
        }

        match &self.conduit.observer {
            Some(observer) => {
                if let Delivery::Suspended(_) = observer.on_message(inbound).await {
                    tracing::debug!(url = %self.url, "Observer suspended a client response");
                }
            }
            None => match &exchange {
                Some(exchange) => exchange.set_in_message(inbound),
                None => tracing::debug!(url = %self.url, "No exchange or observer for response"),
            },
        }
        Ok(())
    }

    /// Record the status on the exchange and turn error statuses into errors.
    fn process_response_code(&self, head: &ResponseHead) -> Result<u16> {
        let code = head.status;
        if let Some(exchange) = &self.message.exchange {
            exchange.set_response_code(code);
            if matches!(code, 404 | 429 | 503) {
                exchange.mark_service_not_available();
            }
        }
        let flags = &self.message.flags;
        if code >= 400
            && code != 500
            && !flags.no_io_exceptions
            && (code > 400 || !flags.process_fault_on_http_400)
        {
            tracing::debug!(url = %self.url, status = code, reason = %head.reason, "Error status");
            return Err(TransportError::HttpStatus {
                code,
                reason: head.reason.clone(),
                url: self.url.to_string(),
            });
        }
        Ok(code)
    }

    async fn take_body(&mut self) -> Result<Option<BodyReader>> {
        self.connection
            .take_response_body()
            .await
            .map_err(|e| TransportError::io(self.url.to_string(), e))
    }
}

async fn deliver_fault(conduit: &HttpConduit, exchange: Option<&Exchange>, error: TransportError) {
    tracing::warn!(conduit = %conduit.name(), error = %error, "Asynchronous response delivery failed");
    match (&conduit.observer, exchange) {
        (Some(observer), _) => observer.on_fault(error).await,
        (None, Some(exchange)) => exchange.set_fault(error),
        (None, None) => {}
    }
}
