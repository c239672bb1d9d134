// std
use std::future::Future;
use std::sync::Arc;
// crates
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::error;
// internal
use crate::settings::RetrievalSettings;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("{0} pool is closed")]
    Closed(&'static str),
}

/// Bounded, fire-and-forget task pool.
///
/// At most `size` submitted tasks run at any time; the rest wait until a slot
/// frees up, in no particular order. Clones share the same slots.
#[derive(Clone, Debug)]
pub struct WorkerPool {
    name: &'static str,
    size: usize,
    slots: Arc<Semaphore>,
}

impl WorkerPool {
    #[must_use]
    pub fn new(name: &'static str, size: usize) -> Self {
        let size = size.max(1);
        Self {
            name,
            size,
            slots: Arc::new(Semaphore::new(size)),
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Number of slots not taken by running tasks.
    #[must_use]
    pub fn idle_slots(&self) -> usize {
        self.slots.available_permits()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.slots.is_closed()
    }

    /// Run an I/O bound task once a slot frees up.
    pub fn submit<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_closed() {
            return Err(PoolError::Closed(self.name));
        }
        let slots = Arc::clone(&self.slots);
        let name = self.name;
        tokio::spawn(async move {
            // closed while queued, drop the task
            let Ok(_slot) = slots.acquire_owned().await else {
                return;
            };
            if let Err(e) = tokio::spawn(task).await {
                error!("Task in {name} pool panicked: {e}");
            }
        });
        Ok(())
    }

    /// Run a CPU bound closure on the blocking thread pool once a slot frees up.
    pub fn submit_blocking<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_closed() {
            return Err(PoolError::Closed(self.name));
        }
        let slots = Arc::clone(&self.slots);
        let name = self.name;
        tokio::spawn(async move {
            let Ok(slot) = slots.acquire_owned().await else {
                return;
            };
            let handle = tokio::task::spawn_blocking(move || {
                let _slot = slot;
                task();
            });
            if let Err(e) = handle.await {
                error!("Task in {name} pool panicked: {e}");
            }
        });
        Ok(())
    }

    /// Refuse new work. Queued tasks are dropped without running, so a task
    /// that must report back has to do so from its own `Drop`. Running tasks
    /// finish.
    pub fn close(&self) {
        self.slots.close();
    }
}

/// The two pools shared by every retrieval of a client: one for network bound
/// downloads, one for verification and decoding.
#[derive(Clone, Debug)]
pub struct WorkerPools {
    pub connection: WorkerPool,
    pub compute: WorkerPool,
}

impl WorkerPools {
    #[must_use]
    pub fn new(settings: &RetrievalSettings) -> Self {
        Self {
            connection: WorkerPool::new("connection", settings.connection_pool_size),
            compute: WorkerPool::new("compute", settings.compute_pool_size),
        }
    }

    pub fn close(&self) {
        self.connection.close();
        self.compute.close();
    }
}
