//! Threads started on behalf of one peer exchange.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::config::PoolConfig;
use crate::error::{BridgeError, Result};

#[derive(Debug)]
struct GroupInner {
    name: String,
    token: CancellationToken,
    threads: Mutex<Vec<JoinHandle<()>>>,
    locked: AtomicBool,
    destroyed: AtomicBool,
}

/// Registry of threads owned by an exchange.
///
/// Every thread receives the group's [`CancellationToken`]. When the
/// exchange ends the group is locked (no new threads), interrupted and
/// destroyed; destroy waits a bounded time for the threads to notice.
#[derive(Debug, Clone)]
pub struct ResourceGroup {
    inner: Arc<GroupInner>,
}

impl ResourceGroup {
    pub fn new(name: &str) -> Self {
        Self {
            inner: Arc::new(GroupInner {
                name: name.to_string(),
                token: CancellationToken::new(),
                threads: Mutex::new(Vec::new()),
                locked: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    pub fn is_locked(&self) -> bool {
        self.inner.locked.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    fn threads(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.inner
            .threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Start `work` on a new thread owned by this group.
    pub fn spawn<F>(&self, name: &str, work: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) + Send + 'static,
    {
        if self.is_destroyed() {
            return Err(BridgeError::GroupDestroyed {
                name: self.inner.name.clone(),
            });
        }
        if self.is_locked() {
            return Err(BridgeError::Pool(format!(
                "resource group {} no longer accepts threads",
                self.inner.name
            )));
        }
        let token = self.token();
        let handle = thread::Builder::new()
            .name(format!("{}/{}", self.inner.name, name))
            .spawn(move || work(token))
            .map_err(|e| {
                BridgeError::ResourceExhausted(format!("cannot start thread {}: {}", name, e))
            })?;
        self.threads().push(handle);
        Ok(())
    }

    /// Cancel the token seen by every thread of the group.
    pub fn interrupt(&self) {
        self.inner.token.cancel();
    }

    /// Refuse further threads.
    pub fn lock(&self) {
        self.inner.locked.store(true, Ordering::SeqCst);
    }

    /// Threads that have not finished yet.
    pub fn active_count(&self) -> usize {
        self.threads().iter().filter(|h| !h.is_finished()).count()
    }

    /// Lock, interrupt and wait up to `timeout` for the group's threads.
    /// Returns how many were still running. Destroying twice is a no-op.
    pub fn destroy(&self, timeout: Duration) -> usize {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return 0;
        }
        self.lock();
        self.interrupt();

        let deadline = Instant::now() + timeout;
        let mut running = std::mem::take(&mut *self.threads());
        loop {
            let (done, still_running): (Vec<_>, Vec<_>) =
                running.into_iter().partition(|h| h.is_finished());
            for handle in done {
                if handle.join().is_err() {
                    warn!("A thread of resource group {} panicked", self.inner.name);
                }
            }
            running = still_running;
            if running.is_empty() || Instant::now() >= deadline {
                break;
            }
            thread::sleep(PoolConfig::GROUP_JOIN_POLL);
        }

        if running.is_empty() {
            debug!("Resource group {} destroyed", self.inner.name);
        } else {
            warn!(
                "{} threads of resource group {} did not stop within {:?}",
                running.len(),
                self.inner.name,
                timeout
            );
        }
        running.len()
    }
}
