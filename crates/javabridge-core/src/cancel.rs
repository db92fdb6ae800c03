//! Cooperative interruption for work spawned on behalf of a peer.
//!
//! Threads cannot be interrupted from the outside, so every thread started in
//! a [`ResourceGroup`](crate::pool::ResourceGroup) receives a
//! `CancellationToken` and is expected to poll it. Interrupting or destroying
//! the group cancels the token.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::Fault;
use crate::types::{exceptions, Throwable};

const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// A shared interruption flag.
///
/// Clones observe the same state; cancelling any clone cancels all of them.
///
/// ```
/// use javabridge_core::cancel::CancellationToken;
///
/// let token = CancellationToken::new();
/// let seen_by_worker = token.clone();
/// token.cancel();
/// assert!(seen_by_worker.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request interruption.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Return an error if interruption was requested.
    pub fn check(&self) -> Result<(), CancelledError> {
        if self.is_cancelled() {
            Err(CancelledError)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking early when the token is cancelled.
    pub fn sleep(&self, duration: Duration) -> Result<(), CancelledError> {
        let deadline = Instant::now() + duration;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

/// Error returned when work observes an interruption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelledError;

impl std::fmt::Display for CancelledError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Operation was interrupted")
    }
}

impl std::error::Error for CancelledError {}

impl From<CancelledError> for Fault {
    fn from(err: CancelledError) -> Self {
        Fault::from(Throwable::new(exceptions::INTERRUPTED, err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_token_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());
    }

    #[test]
    fn test_clone_shares_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        assert_eq!(token.check(), Err(CancelledError));
    }

    #[test]
    fn test_sleep_completes() {
        let token = CancellationToken::new();
        assert!(token.sleep(Duration::from_millis(15)).is_ok());
    }

    #[test]
    fn test_sleep_wakes_on_cancel() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            canceller.cancel();
        });

        let started = Instant::now();
        assert_eq!(token.sleep(Duration::from_secs(10)), Err(CancelledError));
        assert!(started.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_cancelled_error_becomes_interrupted_fault() {
        match Fault::from(CancelledError) {
            Fault::Thrown(t) => assert_eq!(&*t.class, exceptions::INTERRUPTED),
            other => panic!("unexpected fault: {:?}", other),
        }
    }
}
