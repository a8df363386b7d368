//! Runtime abstraction layer for async operations
//!
//! The tile worker pool never talks to tokio directly; it goes through the
//! [`AsyncSpawner`] installed here so a host embedding the overlay can route
//! the work onto its own executor.

use futures::future::BoxFuture;
use std::sync::OnceLock;
use std::time::Duration;

use crate::{AerialMapError, Result};

/// A trait for spawning async tasks (object-safe version)
pub trait AsyncSpawner: Send + Sync + 'static {
    /// Spawn a future and return a handle to it
    fn spawn_boxed(&self, future: BoxFuture<'static, ()>) -> Box<dyn AsyncHandle>;
}

/// Handle to a spawned async task
pub trait AsyncHandle: Send + Sync {
    /// Check if the task is finished
    fn is_finished(&self) -> bool;

    /// Cancel the task
    fn cancel(&self);
}

/// Convenience function for spawning with type safety
pub fn spawn<F>(future: F) -> Box<dyn AsyncHandle>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    runtime().spawn_boxed(Box::pin(future))
}

/// Run CPU-bound work (tile decoding) off the async worker threads
pub async fn execute_blocking<F, R>(task: F) -> Result<R>
where
    F: FnOnce() -> Result<R> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| AerialMapError::Runtime(format!("Blocking task failed: {}", e)))?
}

/// Async delay that yields to the executor
pub async fn async_delay(duration: Duration) {
    tokio::time::sleep(duration).await;
}

/// Default spawner implementations
pub mod spawners {
    use super::*;
    use tokio::task::JoinHandle;

    /// Tokio-based async spawner
    pub struct TokioSpawner;

    impl AsyncSpawner for TokioSpawner {
        fn spawn_boxed(&self, future: BoxFuture<'static, ()>) -> Box<dyn AsyncHandle> {
            Box::new(TokioHandle(tokio::spawn(future)))
        }
    }

    struct TokioHandle(JoinHandle<()>);

    impl AsyncHandle for TokioHandle {
        fn is_finished(&self) -> bool {
            self.0.is_finished()
        }

        fn cancel(&self) {
            self.0.abort();
        }
    }
}

/// Global runtime instance
static RUNTIME: OnceLock<Box<dyn AsyncSpawner>> = OnceLock::new();

/// Initialize the runtime with a specific spawner.
///
/// Must happen before the first tile cache is created; later calls are ignored.
pub fn init_runtime(spawner: Box<dyn AsyncSpawner>) {
    if RUNTIME.set(spawner).is_err() {
        log::warn!("Async runtime already initialised, keeping the existing spawner");
    }
}

/// Get the global runtime spawner, defaulting to tokio
pub fn runtime() -> &'static dyn AsyncSpawner {
    RUNTIME
        .get_or_init(|| Box::new(spawners::TokioSpawner))
        .as_ref()
}
