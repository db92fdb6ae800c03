//! Worker threads for connections and the threads their exchanges start.

mod group;
mod thread_pool;

pub use group::ResourceGroup;
pub use thread_pool::{current_group, set_current_persistent, PoolStats, ThreadPool};
