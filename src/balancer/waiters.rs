// Listen-and-wait handshake plumbing.
//
// Callers may ask to listen to a property and be called back once its first
// value has arrived. Each concrete subscriber composes a `SubscriberSupport`
// that keeps one closable waiter queue per property name; the queue is
// closed irrevocably when the property initializes.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// The three property kinds the balancer listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    Uri,
    Cluster,
    Service,
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKind::Uri => write!(f, "uri"),
            PropertyKind::Cluster => write!(f, "cluster"),
            PropertyKind::Service => write!(f, "service"),
        }
    }
}

/// One-shot callback fired when a property finishes first-time
/// initialization.
pub type ListenCallback = Box<dyn FnOnce(PropertyKind, &str) + Send + 'static>;

/// A closable queue of one-shot callbacks.
///
/// `offer` and `close` are mutually exclusive: once closed, the queue rejects
/// further offers and hands the callback back to the caller, which must then
/// invoke it itself.
pub struct WaiterQueue {
    pending: Mutex<Option<Vec<ListenCallback>>>,
}

impl WaiterQueue {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Some(Vec::new())),
        }
    }

    /// Enqueue a callback. `Err` returns the callback when the queue is
    /// already closed.
    pub fn offer(&self, callback: ListenCallback) -> Result<(), ListenCallback> {
        let mut pending = self.pending.lock();
        match pending.as_mut() {
            Some(queue) => {
                queue.push(callback);
                Ok(())
            }
            None => Err(callback),
        }
    }

    /// Close irrevocably, returning the accumulated callbacks. A second
    /// close returns an empty list.
    pub fn close(&self) -> Vec<ListenCallback> {
        self.pending.lock().take().unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.pending.lock().is_none()
    }
}

impl Default for WaiterQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Waiter bookkeeping composed by each concrete property subscriber.
pub(crate) struct SubscriberSupport {
    kind: PropertyKind,
    waiters: DashMap<String, Arc<WaiterQueue>>,
    listen_count: AtomicU64,
}

impl SubscriberSupport {
    pub fn new(kind: PropertyKind) -> Self {
        Self {
            kind,
            waiters: DashMap::new(),
            listen_count: AtomicU64::new(0),
        }
    }

    /// Ensure the property is being listened to and arrange for `callback`
    /// to fire exactly once when its initialization completes.
    ///
    /// The waiter queue has exactly one creator per name, and only the
    /// creator runs `register` (the sole bus registration for the name). If
    /// initialization already happened, the callback fires immediately.
    pub fn ensure_listening(
        &self,
        name: &str,
        callback: ListenCallback,
        register: impl FnOnce(&str),
    ) {
        self.listen_count.fetch_add(1, Ordering::Relaxed);
        let queue = match self.waiters.entry(name.to_string()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let queue = Arc::new(WaiterQueue::new());
                entry.insert(queue.clone());
                register(name);
                queue
            }
        };
        if let Err(callback) = queue.offer(callback) {
            // Lost the race against close: the property is already
            // initialized.
            callback(self.kind, name);
        }
    }

    /// Close the waiter queue for `name` and fire every accumulated
    /// callback. Runs on the event loop when the first value arrives.
    pub fn complete_initialization(&self, name: &str) {
        let queue = self.waiters.get(name).map(|queue| queue.clone());
        if let Some(queue) = queue {
            for callback in queue.close() {
                callback(self.kind, name);
            }
        }
    }

    pub fn kind(&self) -> PropertyKind {
        self.kind
    }

    /// How many listen requests this subscriber has ever received.
    pub fn listen_count(&self) -> u64 {
        self.listen_count.load(Ordering::Relaxed)
    }
}

/// Invokes the wrapped callback once `count` parts have fired. Used to gate
/// the cluster handshake on both the cluster and URI properties
/// initializing.
pub(crate) struct CountdownCallback {
    remaining: AtomicUsize,
    callback: Mutex<Option<ListenCallback>>,
}

impl CountdownCallback {
    pub fn new(count: usize, callback: ListenCallback) -> Arc<Self> {
        Arc::new(Self {
            remaining: AtomicUsize::new(count),
            callback: Mutex::new(Some(callback)),
        })
    }

    /// A part-callback; the wrapped callback fires when the last part does,
    /// with that part's kind and name.
    pub fn part(self: &Arc<Self>) -> ListenCallback {
        let this = self.clone();
        Box::new(move |kind, name| {
            if this.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                if let Some(callback) = this.callback.lock().take() {
                    callback(kind, name);
                }
            }
        })
    }
}
