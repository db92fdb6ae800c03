//! JavaBridge Core - protocol engine that lets a PHP peer drive native
//! objects over a byte stream.
//!
//! The peer sends XML-like requests naming objects by integer handles; the
//! bridge resolves the target method among its overloads, coerces the
//! arguments, runs it and writes the result back as a handle or a value.
//! Native code may call back into the peer through closures while a request
//! is running.
//!
//! # Example
//!
//! ```rust,ignore
//! use javabridge_core::{BridgeServer, Registry, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> javabridge_core::Result<()> {
//!     let registry = Registry::with_builtins();
//!     let mut server = BridgeServer::start(registry, &ServerConfig::default()).await?;
//!     println!("listening on {}", server.addr());
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown();
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod error;
pub mod pool;
pub mod protocol;
pub mod refs;
pub mod registry;
pub mod resolve;
pub mod server;
pub mod types;

// Re-export commonly used types
pub use bridge::{Bridge, CallContext, Exit, Session};
pub use cancel::{CancellationToken, CancelledError};
pub use config::{PoolConfig, ProtocolConfig, ServerConfig};
pub use error::{BridgeError, Fault, Result};
pub use pool::{ResourceGroup, ThreadPool};
pub use protocol::{BridgeOptions, TextEncoding};
pub use refs::{Handle, ReferenceTable};
pub use registry::{Registry, RegistryBuilder};
pub use server::{BridgeServer, BridgeServerHandle};
pub use types::{Closure, NativeObject, NativeType, Throwable, Value};
