// Single-writer event loop.
//
// Every mutation of balancer state (property indexes, derived caches, the
// listener registry) is funneled through this queue and executed one task at
// a time, in submission order. Readers never take this path; they go straight
// at the concurrent maps.

use tokio::sync::mpsc;
use tracing::{debug, warn};

type Task = Box<dyn FnOnce() + Send + 'static>;

enum QueueEntry {
    Run { label: &'static str, task: Task },
    Drain { on_drained: Task },
}

/// Handle to the single-consumer task queue. Cheap to clone; all clones feed
/// the same consumer.
#[derive(Clone)]
pub struct PropertyEventLoop {
    tx: mpsc::UnboundedSender<QueueEntry>,
}

impl PropertyEventLoop {
    /// Spawn the consumer task and return a handle to it.
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                match entry {
                    QueueEntry::Run { label, task } => {
                        debug!(task = label, "executing event task");
                        task();
                    }
                    QueueEntry::Drain { on_drained } => {
                        on_drained();
                        break;
                    }
                }
            }
            debug!("event loop stopped");
        });
        Self { tx }
    }

    /// Enqueue a task and return immediately. Tasks run strictly in enqueue
    /// order, one at a time.
    pub fn submit(&self, label: &'static str, task: impl FnOnce() + Send + 'static) {
        let entry = QueueEntry::Run {
            label,
            task: Box::new(task),
        };
        if self.tx.send(entry).is_err() {
            warn!(task = label, "event loop is stopped; dropping task");
        }
    }

    /// Stop the consumer once every previously submitted task has run, then
    /// invoke `on_drained`.
    pub fn shutdown(&self, on_drained: impl FnOnce() + Send + 'static) {
        let entry = QueueEntry::Drain {
            on_drained: Box::new(on_drained),
        };
        if let Err(err) = self.tx.send(entry) {
            warn!("event loop already stopped; completing drain callback inline");
            if let QueueEntry::Drain { on_drained } = err.0 {
                on_drained();
            }
        }
    }
}
