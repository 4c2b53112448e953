//! Worker pools.

mod pool;

#[cfg(test)]
pub use pool::MockWorkerPool;
pub use pool::{StaticWorkerPool, WorkerHandle, WorkerPool, WorkerSpec};
