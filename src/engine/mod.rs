//! Command execution engine.
//!
//! Immediate commands run inline on the caller's thread. Long-running ones
//! go to a fixed-size [`WorkerPool`] and report back through the
//! presentation thread's [`Poster`].

pub mod pool;
pub mod registry;

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use pool::WorkerPool;
pub use registry::{BoxError, CommandRegistry};

use crate::command::{Context, Handler, ProgressListener, TaskHandle, TaskId};
use crate::config::PropertySource;
use crate::dispatch::Poster;
use crate::errors::{CommandError, EngineError, EngineResult};

/// Property holding the worker count
pub const POOL_SIZE_KEY: &str = "thread.pool.size";
pub const DEFAULT_POOL_SIZE: usize = 5;

type ActiveTasks = Arc<Mutex<HashMap<TaskId, TaskHandle>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Read the pool size, falling back to the default on anything unusable
pub fn pool_size(props: &dyn PropertySource) -> usize {
    let Some(raw) = props.property(POOL_SIZE_KEY) else {
        tracing::warn!(
            "{} not configured; using default value [{}]",
            POOL_SIZE_KEY,
            DEFAULT_POOL_SIZE
        );
        return DEFAULT_POOL_SIZE;
    };
    match raw.trim().parse::<i64>() {
        Ok(n) if n > 0 => usize::try_from(n).unwrap_or(DEFAULT_POOL_SIZE),
        _ => {
            tracing::warn!(
                value = %raw,
                "cannot read {} from config; using default value [{}]",
                POOL_SIZE_KEY,
                DEFAULT_POOL_SIZE
            );
            DEFAULT_POOL_SIZE
        }
    }
}

/// Process-wide dispatcher of commands
pub struct CommandExecutor {
    pool: Mutex<Option<WorkerPool>>,
    stopped: Arc<AtomicBool>,
    active: ActiveTasks,
    registry: CommandRegistry,
    poster: Poster,
}

impl CommandExecutor {
    /// Start the worker pool, sized from `thread.pool.size`.
    /// Notifications of long-running commands are delivered through `poster`.
    pub fn new(props: &dyn PropertySource, poster: Poster) -> EngineResult<Self> {
        let size = pool_size(props);
        let pool = WorkerPool::new(size).map_err(EngineError::Spawn)?;
        tracing::debug!(workers = size, "command executor started");
        Ok(Self {
            pool: Mutex::new(Some(pool)),
            stopped: Arc::new(AtomicBool::new(false)),
            active: Arc::new(Mutex::new(HashMap::new())),
            registry: CommandRegistry::new(),
            poster,
        })
    }

    pub fn with_registry(mut self, registry: CommandRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn pool_size(&self) -> usize {
        lock(&self.pool).as_ref().map_or(0, WorkerPool::size)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Tasks submitted and not yet ended
    pub fn active_tasks(&self) -> Vec<TaskHandle> {
        lock(&self.active).values().cloned().collect()
    }

    /// Dispatch a handler.
    ///
    /// Returns `Ok(false)` once an immediate command has run inline, and
    /// `Ok(true)` as soon as a long-running one is queued. `listener` is
    /// registered on long-running commands only.
    pub fn execute(
        &self,
        handler: Handler,
        active: Context,
        inactive: Context,
        listener: Option<Box<dyn ProgressListener>>,
    ) -> EngineResult<bool> {
        if self.is_stopped() {
            return Err(EngineError::Stopped);
        }

        match handler {
            Handler::Immediate(mut command) => {
                let outcome =
                    panic::catch_unwind(AssertUnwindSafe(|| command.execute(&active, &inactive)));
                match outcome {
                    Ok(result) => result.map(|()| false).map_err(EngineError::Failed),
                    Err(_) => Err(EngineError::Failed(CommandError::Panicked(format!(
                        "{} panicked",
                        command.name()
                    )))),
                }
            }
            Handler::Long(task) => {
                let handle = task.handle();
                if let Some(listener) = listener {
                    handle.add_listener(listener);
                }
                let id = handle.id();
                lock(&self.active).insert(id, handle.clone());

                let stopped = Arc::clone(&self.stopped);
                let registry = Arc::clone(&self.active);
                let poster = self.poster.clone();
                let job = Box::new(move || {
                    if stopped.load(Ordering::SeqCst) {
                        task.abort(Some(poster), CommandError::Canceled);
                    } else {
                        task.run(Some(poster), &active, &inactive);
                    }
                    lock(&registry).remove(&id);
                });

                let submitted = match lock(&self.pool).as_ref() {
                    Some(pool) => pool.submit(job).is_ok(),
                    None => false,
                };
                if !submitted {
                    lock(&self.active).remove(&id);
                    return Err(EngineError::Stopped);
                }
                tracing::debug!(task = id, name = handle.name(), "task queued");
                Ok(true)
            }
        }
    }

    /// Create a handler from its registered type name
    pub fn create_handler(&self, type_name: &str) -> EngineResult<Handler> {
        self.registry.create(type_name)
    }

    /// Create a handler by type name and dispatch it
    pub fn execute_named(
        &self,
        type_name: &str,
        active: Context,
        inactive: Context,
        listener: Option<Box<dyn ProgressListener>>,
    ) -> EngineResult<bool> {
        if self.is_stopped() {
            return Err(EngineError::Stopped);
        }
        let handler = self.create_handler(type_name)?;
        self.execute(handler, active, inactive, listener)
    }

    /// Cancel all queued and running work and release the workers.
    /// Only the first call does anything.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let pending = self.active_tasks();
        tracing::debug!(tasks = pending.len(), "shutting down command executor");
        for task in &pending {
            task.cancel();
        }
        let pool = lock(&self.pool).take();
        if let Some(mut pool) = pool {
            pool.shutdown();
        }
    }
}

impl Drop for CommandExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("workers", &self.pool_size())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
