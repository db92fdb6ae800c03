//! Bounded pool of worker threads, one connection per job.

use std::any::Any;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::group::ResourceGroup;
use crate::config::PoolConfig;
use crate::error::{BridgeError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct PoolState {
    queue: VecDeque<Job>,
    /// Pooled threads, busy or idle. Persistent threads are not counted.
    threads: usize,
    idles: usize,
    next_id: usize,
    shutdown: bool,
    workers: Vec<Arc<Worker>>,
}

struct Shared {
    name: String,
    max: usize,
    group_timeout: Duration,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reserve(&self) -> usize {
        (self.max >> 2) * 3
    }

    fn check_reserve(&self) -> bool {
        let state = self.lock();
        state.threads - state.idles < self.reserve()
    }

    /// Block until a job is queued. `None` once the pool is destroyed.
    fn next_job(&self) -> Option<Job> {
        let mut state = self.lock();
        loop {
            if state.shutdown {
                return None;
            }
            if let Some(job) = state.queue.pop_front() {
                return Some(job);
            }
            state.idles += 1;
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
            state.idles -= 1;
        }
    }
}

struct Worker {
    name: String,
    /// Set when the thread left the pool; it exits after its current job.
    terminate: AtomicBool,
    group: Mutex<Option<ResourceGroup>>,
}

impl Worker {
    fn group(&self) -> MutexGuard<'_, Option<ResourceGroup>> {
        self.group.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self) {
        *self.group() = Some(ResourceGroup::new(&self.name));
    }

    fn end(&self, timeout: Duration) {
        let group = self.group().take();
        if let Some(group) = group {
            group.lock();
            group.interrupt();
            group.destroy(timeout);
        }
    }

    fn interrupt(&self) {
        if let Some(group) = self.group().as_ref() {
            group.interrupt();
        }
    }
}

#[derive(Clone)]
struct WorkerRef {
    shared: Arc<Shared>,
    worker: Arc<Worker>,
}

thread_local! {
    static CURRENT: RefCell<Option<WorkerRef>> = const { RefCell::new(None) };
}

/// Snapshot of a pool's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub max: usize,
    pub threads: usize,
    pub idles: usize,
    pub queued: usize,
}

/// Worker pool with a fixed upper bound of pooled threads.
///
/// A job that turns its thread persistent (see [`set_current_persistent`])
/// takes the thread out of the pool; a replacement is started so the pool
/// keeps its capacity.
#[derive(Clone)]
pub struct ThreadPool {
    shared: Arc<Shared>,
}

impl ThreadPool {
    pub fn new(name: &str, max: usize) -> Result<Self> {
        Self::with_group_timeout(name, max, PoolConfig::GROUP_DESTROY_TIMEOUT)
    }

    pub fn with_group_timeout(name: &str, max: usize, group_timeout: Duration) -> Result<Self> {
        if max == 0 {
            return Err(BridgeError::Pool(
                "pool size must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            shared: Arc::new(Shared {
                name: name.to_string(),
                max,
                group_timeout,
                state: Mutex::new(PoolState::default()),
                available: Condvar::new(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Queue `job`, starting a thread when none is idle and the bound
    /// allows it.
    pub fn start<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.shared.lock();
        if state.shutdown {
            return Err(BridgeError::Pool(format!(
                "pool {} has been destroyed",
                self.shared.name
            )));
        }
        state.queue.push_back(Box::new(job));
        if state.idles == 0 && state.threads < self.shared.max {
            state.threads += 1;
            drop(state);
            if let Err(e) = spawn_worker(&self.shared) {
                self.shared.lock().threads -= 1;
                return Err(BridgeError::ResourceExhausted(format!(
                    "cannot start worker thread: {}",
                    e
                )));
            }
        } else {
            drop(state);
            self.shared.available.notify_one();
        }
        Ok(())
    }

    /// Whether fewer than three quarters of the pool are busy.
    pub fn check_reserve(&self) -> bool {
        self.shared.check_reserve()
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.lock();
        PoolStats {
            max: self.shared.max,
            threads: state.threads,
            idles: state.idles,
            queued: state.queue.len(),
        }
    }

    /// Stop accepting jobs, wake idle workers so they exit and interrupt
    /// the work of busy ones.
    pub fn destroy(&self) {
        let workers = {
            let mut state = self.shared.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            state.queue.clear();
            state.workers.clone()
        };
        self.shared.available.notify_all();
        for worker in &workers {
            worker.interrupt();
        }
        info!(
            "Pool {} destroyed ({} workers interrupted)",
            self.shared.name,
            workers.len()
        );
    }
}

/// Start one more worker thread. The caller accounts for it.
fn spawn_worker(shared: &Arc<Shared>) -> std::io::Result<()> {
    let worker = {
        let mut state = shared.lock();
        let id = state.next_id;
        state.next_id += 1;
        let worker = Arc::new(Worker {
            name: format!("{}#{}", shared.name, id),
            terminate: AtomicBool::new(false),
            group: Mutex::new(None),
        });
        state.workers.push(worker.clone());
        worker
    };

    let name = worker.name.clone();
    let thread_shared = shared.clone();
    let thread_worker = worker.clone();
    let spawned = thread::Builder::new()
        .name(name)
        .spawn(move || worker_main(thread_shared, thread_worker));
    if spawned.is_err() {
        retire(shared, &worker);
    }
    spawned.map(|_| ())
}

fn retire(shared: &Shared, worker: &Arc<Worker>) {
    shared.lock().workers.retain(|w| !Arc::ptr_eq(w, worker));
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn worker_main(shared: Arc<Shared>, worker: Arc<Worker>) {
    CURRENT.with(|current| {
        *current.borrow_mut() = Some(WorkerRef {
            shared: shared.clone(),
            worker: worker.clone(),
        })
    });
    debug!("Worker {} started", worker.name);

    // Whether this thread still holds a slot of the pool on exit.
    let mut holds_slot = true;
    loop {
        if worker.terminate.load(Ordering::SeqCst) {
            holds_slot = false;
            break;
        }
        let Some(job) = shared.next_job() else {
            break;
        };
        worker.begin();
        let outcome = panic::catch_unwind(AssertUnwindSafe(job));
        worker.end(shared.group_timeout);

        if let Err(payload) = outcome {
            error!(
                "Worker {} panicked: {}",
                worker.name,
                panic_message(payload.as_ref())
            );
            if !worker.terminate.load(Ordering::SeqCst) && !shared.lock().shutdown {
                match spawn_worker(&shared) {
                    Ok(()) => holds_slot = false,
                    Err(e) => warn!("Cannot replace worker {}: {}", worker.name, e),
                }
            } else {
                holds_slot = false;
            }
            break;
        }
    }

    retire(&shared, &worker);
    if holds_slot {
        let mut state = shared.lock();
        state.threads = state.threads.saturating_sub(1);
    }
    CURRENT.with(|current| current.borrow_mut().take());
    debug!("Worker {} stopped", worker.name);
}

/// Resource group of the job running on this thread, if it is a pool
/// worker.
pub fn current_group() -> Option<ResourceGroup> {
    CURRENT.with(|current| {
        current
            .borrow()
            .as_ref()
            .and_then(|r| r.worker.group().clone())
    })
}

/// Called when a connection switches to keep-alive.
///
/// The current exchange's resource group is replaced by a fresh one. When
/// the pool is busy beyond its reserve, the thread also leaves the pool: it
/// keeps serving its connection and exits afterwards, while a new pooled
/// thread takes its slot. Returns whether the thread left the pool.
pub fn set_current_persistent() -> bool {
    let Some(current) = CURRENT.with(|current| current.borrow().clone()) else {
        return false;
    };
    let WorkerRef { shared, worker } = current;

    worker.end(shared.group_timeout);
    worker.begin();

    if worker.terminate.load(Ordering::SeqCst) || shared.check_reserve() {
        return false;
    }
    worker.terminate.store(true, Ordering::SeqCst);
    match spawn_worker(&shared) {
        Ok(()) => {
            info!("Worker {} now serves a persistent connection", worker.name);
            true
        }
        Err(e) => {
            warn!("Cannot replace persistent worker {}: {}", worker.name, e);
            worker.terminate.store(false, Ordering::SeqCst);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Instant;

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_zero_size_is_rejected() {
        assert!(matches!(
            ThreadPool::new("test", 0),
            Err(BridgeError::Pool(_))
        ));
    }

    #[test]
    fn test_runs_jobs() {
        let pool = ThreadPool::new("test", 2).unwrap();
        let (tx, rx) = mpsc::channel();
        for i in 0..5 {
            let tx = tx.clone();
            pool.start(move || tx.send(i).unwrap()).unwrap();
        }
        let mut seen: Vec<i32> = (0..5)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert!(pool.stats().threads <= 2);
        pool.destroy();
    }

    #[test]
    fn test_job_sees_resource_group() {
        let pool = ThreadPool::new("test", 1).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.start(move || tx.send(current_group().is_some()).unwrap())
            .unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        assert!(current_group().is_none());
        pool.destroy();
    }

    #[test]
    fn test_panicking_job_is_replaced() {
        let pool = ThreadPool::new("test", 1).unwrap();
        pool.start(|| panic!("job failed")).unwrap();

        let (tx, rx) = mpsc::channel();
        pool.start(move || tx.send(42).unwrap()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
        assert!(wait_for(|| pool.stats().threads == 1));
        pool.destroy();
    }

    #[test]
    fn test_reserve_rule() {
        let pool = ThreadPool::new("test", 4).unwrap();
        assert!(pool.check_reserve());

        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Arc::new(Mutex::new(release_rx));
        for _ in 0..3 {
            let rx = release_rx.clone();
            pool.start(move || {
                let _ = rx.lock().unwrap().recv();
            })
            .unwrap();
        }
        assert!(wait_for(|| pool.stats().threads == 3));
        assert!(!pool.check_reserve());

        for _ in 0..3 {
            release_tx.send(()).unwrap();
        }
        assert!(wait_for(|| pool.check_reserve()));
        pool.destroy();
    }

    #[test]
    fn test_persistent_outside_pool_is_noop() {
        assert!(!set_current_persistent());
    }

    #[test]
    fn test_persistent_worker_is_replaced() {
        // Size 1 has no reserve, so keep-alive always leaves the pool.
        let pool = ThreadPool::new("test", 1).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.start(move || tx.send(set_current_persistent()).unwrap())
            .unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());

        let (tx, rx) = mpsc::channel();
        pool.start(move || tx.send(7).unwrap()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
        assert_eq!(pool.stats().threads, 1);
        pool.destroy();
    }

    #[test]
    fn test_start_after_destroy_fails() {
        let pool = ThreadPool::new("test", 1).unwrap();
        pool.destroy();
        assert!(pool.start(|| {}).is_err());
    }
}
