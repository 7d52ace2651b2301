//! Suspend/resume handle for one server request.
//!
//! # States
//! ```text
//! Idle → suspend → Suspended → resume (or timeout) → Resumed → suspend → ...
//!     any → complete → Completed
//! ```
//!
//! A suspension is resumed exactly once: the first `resume` wins, later
//! calls return `false` until the request is suspended again.

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuationState {
    Idle,
    Suspended,
    Resumed,
    Completed,
}

pub struct Continuation {
    async_supported: bool,
    state: watch::Sender<ContinuationState>,
    timeout: Mutex<Option<Duration>>,
}

impl Continuation {
    pub fn new(async_supported: bool) -> Self {
        let (state, _) = watch::channel(ContinuationState::Idle);
        Self {
            async_supported,
            state,
            timeout: Mutex::new(None),
        }
    }

    pub fn is_async_supported(&self) -> bool {
        self.async_supported
    }

    pub fn state(&self) -> ContinuationState {
        *self.state.borrow()
    }

    pub fn is_suspended(&self) -> bool {
        self.state() == ContinuationState::Suspended
    }

    pub fn is_resumed(&self) -> bool {
        self.state() == ContinuationState::Resumed
    }

    /// Park the request. Returns `false` when the server cannot suspend or
    /// the request is already suspended or complete.
    pub fn suspend(&self, timeout: Option<Duration>) -> bool {
        if !self.async_supported {
            return false;
        }
        let suspended = self.state.send_if_modified(|state| match state {
            ContinuationState::Idle | ContinuationState::Resumed => {
                *state = ContinuationState::Suspended;
                true
            }
            _ => false,
        });
        if suspended {
            *self.timeout.lock().unwrap_or_else(|p| p.into_inner()) = timeout;
            tracing::debug!(timeout_ms = ?timeout.map(|t| t.as_millis()), "Request suspended");
        }
        suspended
    }

    /// Wake a suspended request. Only the first call per suspension succeeds.
    pub fn resume(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == ContinuationState::Suspended {
                *state = ContinuationState::Resumed;
                true
            } else {
                false
            }
        })
    }

    pub fn complete(&self) {
        self.state.send_replace(ContinuationState::Completed);
    }

    /// Wait while suspended. The suspension timeout, if any, resumes the
    /// request.
    pub async fn wait_resumed(&self) -> ContinuationState {
        let mut rx = self.state.subscribe();
        let timeout = *self.timeout.lock().unwrap_or_else(|p| p.into_inner());
        let wait = rx.wait_for(|state| *state != ContinuationState::Suspended);
        match timeout {
            Some(timeout) => {
                if tokio::time::timeout(timeout, wait).await.is_err() && self.resume() {
                    tracing::debug!("Suspended request resumed by timeout");
                }
            }
            None => {
                let _ = wait.await;
            }
        }
        self.state()
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("async_supported", &self.async_supported)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn exactly_one_resume_per_suspension() {
        let continuation = Continuation::new(true);
        assert!(!continuation.resume());
        assert!(continuation.suspend(None));
        assert!(!continuation.suspend(None));
        assert!(continuation.resume());
        assert!(!continuation.resume());
        assert!(continuation.suspend(None));
        assert!(continuation.resume());
    }

    #[test]
    fn cannot_suspend_without_async_support() {
        let continuation = Continuation::new(false);
        assert!(!continuation.suspend(None));
        assert_eq!(continuation.state(), ContinuationState::Idle);
    }

    #[tokio::test]
    async fn wait_returns_on_resume() {
        let continuation = Arc::new(Continuation::new(true));
        continuation.suspend(None);
        let waker = Arc::clone(&continuation);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waker.resume();
        });
        assert_eq!(continuation.wait_resumed().await, ContinuationState::Resumed);
    }

    #[tokio::test]
    async fn timeout_resumes() {
        let continuation = Continuation::new(true);
        continuation.suspend(Some(Duration::from_millis(10)));
        assert_eq!(continuation.wait_resumed().await, ContinuationState::Resumed);
        assert!(!continuation.resume());
    }

    #[test]
    fn complete_is_terminal() {
        let continuation = Continuation::new(true);
        continuation.complete();
        assert!(!continuation.suspend(None));
        assert_eq!(continuation.state(), ContinuationState::Completed);
    }
}
