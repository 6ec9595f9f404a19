//! Serial task queue of one world
//!
//! Anything that touches entity or component state runs here, one task at a
//! time, instead of on whichever connection thread noticed the change.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

type WorldTask = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, thiserror::Error)]
#[error("World queue '{0}' is shut down")]
pub struct QueueClosed(pub Arc<str>);

/// Handle for submitting work to a world's queue
#[derive(Clone)]
pub struct WorldQueue {
    name: Arc<str>,
    tx: mpsc::UnboundedSender<WorldTask>,
    /// Runtime the executor lives on; delayed tasks are timed there
    runtime: Handle,
}

impl WorldQueue {
    /// Start the queue's executor task
    ///
    /// Must be called from within a tokio runtime. The returned handle can
    /// then submit work from any thread. The executor stops once every
    /// handle has been dropped.
    pub fn spawn(name: &str) -> (Self, JoinHandle<()>) {
        let runtime = Handle::current();
        let (tx, mut rx) = mpsc::unbounded_channel::<WorldTask>();
        let name: Arc<str> = Arc::from(name);

        let executor_name = name.clone();
        let handle = runtime.spawn(async move {
            info!("World '{}' queue started", executor_name);
            let mut executed: u64 = 0;
            while let Some(task) = rx.recv().await {
                task();
                executed += 1;
            }
            info!("World '{}' queue stopped after {} tasks", executor_name, executed);
        });

        (Self { name, tx, runtime }, handle)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue `task` behind everything already submitted
    pub fn execute<F>(&self, task: F) -> Result<(), QueueClosed>
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx
            .send(Box::new(task))
            .map_err(|_| QueueClosed(self.name.clone()))
    }

    /// Queue `task` once `delay` has passed
    ///
    /// Safe to call from threads outside the runtime. If the queue is shut
    /// down by then, `task` is dropped without running.
    pub fn execute_after<F>(&self, delay: Duration, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let queue = self.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = queue.execute(task) {
                debug!("Dropping delayed task: {}", e);
            }
        });
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
