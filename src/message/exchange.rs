//! Correlation of one outbound and one inbound message.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::error::{Result, TransportError};
use crate::message::Message;
use crate::resilience::workqueue::WorkQueue;

/// Shared handle to an exchange. Cloning is cheap; all clones see the same state.
#[derive(Clone)]
pub struct Exchange {
    inner: Arc<ExchangeInner>,
}

struct ExchangeInner {
    synchronous: bool,
    oneway: bool,
    executor: Option<Arc<WorkQueue>>,
    response_code: Mutex<Option<u16>>,
    service_not_available: AtomicBool,
    in_chain_complete: AtomicBool,
    in_message: Mutex<Option<Message>>,
    fault: Mutex<Option<TransportError>>,
    done: watch::Sender<bool>,
}

/// Builder for [`Exchange`].
#[derive(Default)]
pub struct ExchangeBuilder {
    asynchronous: bool,
    oneway: bool,
    executor: Option<Arc<WorkQueue>>,
}

impl ExchangeBuilder {
    /// Deliver the response from a worker task instead of the caller.
    pub fn asynchronous(mut self) -> Self {
        self.asynchronous = true;
        self
    }

    /// No response is expected.
    pub fn oneway(mut self) -> Self {
        self.oneway = true;
        self
    }

    /// Queue used instead of the conduit's own worker queue.
    pub fn executor(mut self, executor: Arc<WorkQueue>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn build(self) -> Exchange {
        let (done, _) = watch::channel(false);
        Exchange {
            inner: Arc::new(ExchangeInner {
                synchronous: !self.asynchronous,
                oneway: self.oneway,
                executor: self.executor,
                response_code: Mutex::new(None),
                service_not_available: AtomicBool::new(false),
                in_chain_complete: AtomicBool::new(false),
                in_message: Mutex::new(None),
                fault: Mutex::new(None),
                done,
            }),
        }
    }
}

impl Exchange {
    pub fn builder() -> ExchangeBuilder {
        ExchangeBuilder::default()
    }

    /// A synchronous two-way exchange.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn is_synchronous(&self) -> bool {
        self.inner.synchronous
    }

    pub fn is_oneway(&self) -> bool {
        self.inner.oneway
    }

    pub fn executor(&self) -> Option<&Arc<WorkQueue>> {
        self.inner.executor.as_ref()
    }

    pub fn response_code(&self) -> Option<u16> {
        *lock(&self.inner.response_code)
    }

    pub fn set_response_code(&self, code: u16) {
        *lock(&self.inner.response_code) = Some(code);
    }

    /// Set when the server answered 404, 429 or 503.
    pub fn is_service_not_available(&self) -> bool {
        self.inner.service_not_available.load(Ordering::Acquire)
    }

    pub fn mark_service_not_available(&self) {
        self.inner.service_not_available.store(true, Ordering::Release);
    }

    /// Set when a oneway or 202 response completed the exchange without a body.
    pub fn is_in_chain_complete(&self) -> bool {
        self.inner.in_chain_complete.load(Ordering::Acquire)
    }

    pub fn mark_in_chain_complete(&self) {
        self.inner.in_chain_complete.store(true, Ordering::Release);
    }

    /// Store the inbound message and wake anyone waiting on the exchange.
    pub fn set_in_message(&self, message: Message) {
        *lock(&self.inner.in_message) = Some(message);
        self.inner.done.send_replace(true);
    }

    pub fn take_in_message(&self) -> Option<Message> {
        lock(&self.inner.in_message).take()
    }

    pub fn has_in_message(&self) -> bool {
        lock(&self.inner.in_message).is_some()
    }

    /// Record a failure of an asynchronous delivery.
    pub fn set_fault(&self, error: TransportError) {
        *lock(&self.inner.fault) = Some(error);
        self.inner.done.send_replace(true);
    }

    pub fn take_fault(&self) -> Option<TransportError> {
        lock(&self.inner.fault).take()
    }

    /// Wait until a message or a fault has been recorded, then take it.
    pub async fn wait_for_in_message(&self) -> Result<Option<Message>> {
        let mut rx = self.inner.done.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|done| *done).await;
        if let Some(fault) = self.take_fault() {
            return Err(fault);
        }
        Ok(self.take_in_message())
    }
}

impl Default for Exchange {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("synchronous", &self.inner.synchronous)
            .field("oneway", &self.inner.oneway)
            .field("response_code", &self.response_code())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
