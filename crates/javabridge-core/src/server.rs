//! TCP acceptor for bridge connections.
//!
//! Accepting runs on the tokio runtime; serving does not. Each accepted
//! socket is turned back into a blocking std stream and handed to the
//! worker pool, where a [`Bridge`] serves it to completion on one thread.
//!
//! # Thread Safety
//!
//! The registry is shared read-only via `Arc`. Everything a connection
//! mutates belongs to its own `Bridge`.

use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::bridge::{Bridge, Exit};
use crate::config::{PoolConfig, ServerConfig};
use crate::error::Result;
use crate::pool::ThreadPool;
use crate::registry::Registry;

/// Handle to a running server. Dropping shuts the server down.
pub struct BridgeServerHandle {
    pub addr: SocketAddr,
    pub port: u16,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
    pool: ThreadPool,
}

impl BridgeServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn pool(&self) -> &ThreadPool {
        &self.pool
    }

    /// Stop accepting connections and interrupt the ones being served.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.pool.destroy();
    }
}

impl Drop for BridgeServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// Decrements the connection count when a connection job ends, even when
/// it panics.
struct ConnectionGuard(Arc<AtomicUsize>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

pub struct BridgeServer;

impl BridgeServer {
    /// Bind the configured address and start accepting in a background
    /// task.
    pub async fn start(registry: Arc<Registry>, config: &ServerConfig) -> Result<BridgeServerHandle> {
        config.validate()?;
        let listener = TcpListener::bind(config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let port = addr.port();

        let pool = ThreadPool::with_group_timeout(
            PoolConfig::THREAD_NAME_PREFIX,
            config.pool_size,
            config.group_destroy_timeout(),
        )?;
        info!(
            "Bridge server listening on {} ({} workers)",
            addr, config.pool_size
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            registry,
            pool.clone(),
            config.max_connections,
            shutdown_rx,
        ));

        Ok(BridgeServerHandle {
            addr,
            port,
            shutdown_tx: Some(shutdown_tx),
            task_handle: Some(task_handle),
            pool,
        })
    }

    async fn accept_loop(
        listener: TcpListener,
        registry: Arc<Registry>,
        pool: ThreadPool,
        max_connections: usize,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        let active_connections = Arc::new(AtomicUsize::new(0));
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Bridge server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    let (stream, peer_addr) = match accept_result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            error!("Accept error: {}", e);
                            continue;
                        }
                    };
                    let current = active_connections.load(Ordering::Relaxed);
                    if current >= max_connections {
                        warn!(
                            "Rejecting connection from {}: at max capacity ({})",
                            peer_addr, max_connections
                        );
                        continue;
                    }

                    let stream = match stream.into_std().and_then(|s| {
                        s.set_nonblocking(false)?;
                        Ok(s)
                    }) {
                        Ok(stream) => stream,
                        Err(e) => {
                            error!("Cannot prepare connection from {}: {}", peer_addr, e);
                            continue;
                        }
                    };

                    active_connections.fetch_add(1, Ordering::Relaxed);
                    let guard = ConnectionGuard(active_connections.clone());
                    let registry = registry.clone();
                    let submitted = pool.start(move || {
                        let _guard = guard;
                        debug!("Connection from {}", peer_addr);
                        let exit = serve_connection(registry, stream);
                        debug!("Connection {} ended: {:?}", peer_addr, exit);
                    });
                    if let Err(e) = submitted {
                        error!("Cannot serve connection from {}: {}", peer_addr, e);
                    }
                }
            }
        }
    }
}

/// Serve one blocking stream until the peer finishes it.
pub fn serve_connection(registry: Arc<Registry>, stream: std::net::TcpStream) -> Exit {
    let reader = match stream.try_clone() {
        Ok(reader) => BufReader::new(reader),
        Err(e) => {
            error!("Cannot split connection stream: {}", e);
            return Exit::IoError;
        }
    };
    Bridge::new(registry, reader, stream).run()
}
