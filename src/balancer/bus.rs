// Property event bus.
//
// One bus exists per property kind (URI, cluster, service). A bus multiplexes
// a publisher's initialize/add/remove notifications to the subscribers
// registered for each property name. All callbacks run on the event loop.
//
// Contract per (name, subscription): exactly one `on_initialize` as the first
// callback, then zero or more `on_add` / `on_remove` in publisher order. A
// `None` payload is legal and means "known absent".

use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

use super::event_loop::PropertyEventLoop;

/// Receiver side of a bus. Implementations are invoked on the event loop.
pub trait PropertyEventSubscriber<T>: Send + Sync {
    fn on_initialize(&self, name: &str, value: Option<Arc<T>>);
    fn on_add(&self, name: &str, value: Option<Arc<T>>);
    fn on_remove(&self, name: &str);
}

/// Source side of a bus: the discovery backend adapter.
///
/// `start_publishing` is called (on the event loop) when the first subscriber
/// registers for a name. The publisher must then push one
/// `publish_initialize` for that name, followed by adds/removes in its own
/// order.
pub trait PropertyPublisher<T>: Send + Sync {
    fn start_publishing(&self, bus: &PropertyEventBus<T>, name: &str);
    fn stop_publishing(&self, bus: &PropertyEventBus<T>, name: &str);
}

struct BusInner<T> {
    event_loop: PropertyEventLoop,
    subscribers: DashMap<String, Vec<Arc<dyn PropertyEventSubscriber<T>>>>,
    /// Last published value per name; an entry exists only once the property
    /// has initialized. Late subscribers get their `on_initialize` from here.
    published: DashMap<String, Option<Arc<T>>>,
    /// Names for which `start_publishing` has already been issued.
    requested: DashSet<String>,
    publisher: RwLock<Option<Arc<dyn PropertyPublisher<T>>>>,
}

/// Multiplexes property events for one property kind. Cheap to clone.
pub struct PropertyEventBus<T> {
    inner: Arc<BusInner<T>>,
}

impl<T> Clone for PropertyEventBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> PropertyEventBus<T> {
    pub fn new(event_loop: PropertyEventLoop) -> Self {
        Self {
            inner: Arc::new(BusInner {
                event_loop,
                subscribers: DashMap::new(),
                published: DashMap::new(),
                requested: DashSet::new(),
                publisher: RwLock::new(None),
            }),
        }
    }

    /// Install the publisher. Names already subscribed but not yet
    /// initialized are requested from it.
    pub fn set_publisher(&self, publisher: Arc<dyn PropertyPublisher<T>>) {
        let bus = self.clone();
        self.inner.event_loop.submit("bus-set-publisher", move || {
            *bus.inner.publisher.write() = Some(publisher.clone());
            let pending: Vec<String> = bus
                .inner
                .subscribers
                .iter()
                .map(|entry| entry.key().clone())
                .filter(|name| !bus.inner.published.contains_key(name))
                .collect();
            for name in pending {
                if bus.inner.requested.insert(name.clone()) {
                    publisher.start_publishing(&bus, &name);
                }
            }
        });
    }

    /// Register a subscriber for the given property names.
    pub fn register(&self, names: &[String], subscriber: Arc<dyn PropertyEventSubscriber<T>>) {
        let bus = self.clone();
        let names = names.to_vec();
        self.inner.event_loop.submit("bus-register", move || {
            for name in &names {
                bus.inner
                    .subscribers
                    .entry(name.clone())
                    .or_default()
                    .push(subscriber.clone());

                let cached = bus.inner.published.get(name).map(|value| value.clone());
                match cached {
                    // Already initialized: this subscription still gets its
                    // one on_initialize, from the cache.
                    Some(value) => subscriber.on_initialize(name, value),
                    None => {
                        let publisher = bus.inner.publisher.read().clone();
                        if let Some(publisher) = publisher {
                            if bus.inner.requested.insert(name.clone()) {
                                publisher.start_publishing(&bus, name);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Remove a subscriber from the given names. When a name loses its last
    /// subscriber, the publisher is told to stop publishing it.
    pub fn unregister(&self, names: &[String], subscriber: Arc<dyn PropertyEventSubscriber<T>>) {
        let bus = self.clone();
        let names = names.to_vec();
        self.inner.event_loop.submit("bus-unregister", move || {
            for name in &names {
                let now_empty = match bus.inner.subscribers.get_mut(name) {
                    Some(mut list) => {
                        list.retain(|s| !Arc::ptr_eq(s, &subscriber));
                        list.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    bus.inner.subscribers.remove(name);
                    if bus.inner.requested.remove(name).is_some() {
                        let publisher = bus.inner.publisher.read().clone();
                        if let Some(publisher) = publisher {
                            publisher.stop_publishing(&bus, name);
                        }
                    }
                }
            }
        });
    }

    /// Publisher-facing: first value for a name. A duplicate initialize for
    /// an already-initialized name is delivered as an add, preserving the
    /// exactly-once initialize contract.
    pub fn publish_initialize(&self, name: &str, value: Option<Arc<T>>) {
        let bus = self.clone();
        let name = name.to_string();
        self.inner.event_loop.submit("bus-initialize", move || {
            let first = bus
                .inner
                .published
                .insert(name.clone(), value.clone())
                .is_none();
            let subscribers = bus.subscribers_for(&name);
            debug!(
                property = %name,
                subscribers = subscribers.len(),
                first,
                "publishing initialize"
            );
            for subscriber in subscribers {
                if first {
                    subscriber.on_initialize(&name, value.clone());
                } else {
                    subscriber.on_add(&name, value.clone());
                }
            }
        });
    }

    /// Publisher-facing: updated value for a name. `None` means known absent.
    pub fn publish_add(&self, name: &str, value: Option<Arc<T>>) {
        let bus = self.clone();
        let name = name.to_string();
        self.inner.event_loop.submit("bus-add", move || {
            bus.inner.published.insert(name.clone(), value.clone());
            for subscriber in bus.subscribers_for(&name) {
                subscriber.on_add(&name, value.clone());
            }
        });
    }

    /// Publisher-facing: the property disappeared.
    pub fn publish_remove(&self, name: &str) {
        let bus = self.clone();
        let name = name.to_string();
        self.inner.event_loop.submit("bus-remove", move || {
            bus.inner.published.remove(&name);
            for subscriber in bus.subscribers_for(&name) {
                subscriber.on_remove(&name);
            }
        });
    }

    pub fn event_loop(&self) -> &PropertyEventLoop {
        &self.inner.event_loop
    }

    // Snapshot the subscriber list so no map guard is held across callbacks;
    // callbacks may register or unregister re-entrantly.
    fn subscribers_for(&self, name: &str) -> Vec<Arc<dyn PropertyEventSubscriber<T>>> {
        self.inner
            .subscribers
            .get(name)
            .map(|list| list.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Seen {
        Init(String, Option<u32>),
        Add(String, Option<u32>),
        Remove(String),
    }

    struct Recorder {
        seen: Mutex<Vec<Seen>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
            })
        }

        fn events(&self) -> Vec<Seen> {
            self.seen.lock().clone()
        }
    }

    impl PropertyEventSubscriber<u32> for Recorder {
        fn on_initialize(&self, name: &str, value: Option<Arc<u32>>) {
            self.seen
                .lock()
                .push(Seen::Init(name.to_string(), value.map(|v| *v)));
        }

        fn on_add(&self, name: &str, value: Option<Arc<u32>>) {
            self.seen
                .lock()
                .push(Seen::Add(name.to_string(), value.map(|v| *v)));
        }

        fn on_remove(&self, name: &str) {
            self.seen.lock().push(Seen::Remove(name.to_string()));
        }
    }

    struct PresetPublisher {
        values: Mutex<std::collections::HashMap<String, Option<Arc<u32>>>>,
        started: Mutex<Vec<String>>,
        stopped: Mutex<Vec<String>>,
    }

    impl PresetPublisher {
        fn new(values: std::collections::HashMap<String, Option<Arc<u32>>>) -> Arc<Self> {
            Arc::new(Self {
                values: Mutex::new(values),
                started: Mutex::new(Vec::new()),
                stopped: Mutex::new(Vec::new()),
            })
        }
    }

    impl PropertyPublisher<u32> for PresetPublisher {
        fn start_publishing(&self, bus: &PropertyEventBus<u32>, name: &str) {
            self.started.lock().push(name.to_string());
            let value = self.values.lock().get(name).cloned().unwrap_or(None);
            bus.publish_initialize(name, value);
        }

        fn stop_publishing(&self, _bus: &PropertyEventBus<u32>, name: &str) {
            self.stopped.lock().push(name.to_string());
        }
    }

    async fn quiesce(event_loop: &PropertyEventLoop) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        event_loop.submit("test-quiesce", move || {
            let _ = tx.send(());
        });
        rx.await.unwrap();
    }

    #[tokio::test]
    async fn test_initialize_is_first_and_only_once() {
        let event_loop = PropertyEventLoop::spawn();
        let bus: PropertyEventBus<u32> = PropertyEventBus::new(event_loop.clone());
        let recorder = Recorder::new();

        bus.register(&["a".to_string()], recorder.clone());
        bus.publish_initialize("a", Some(Arc::new(1)));
        bus.publish_add("a", Some(Arc::new(2)));
        bus.publish_remove("a");
        quiesce(&event_loop).await;

        assert_eq!(
            recorder.events(),
            vec![
                Seen::Init("a".to_string(), Some(1)),
                Seen::Add("a".to_string(), Some(2)),
                Seen::Remove("a".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_cached_initialize() {
        let event_loop = PropertyEventLoop::spawn();
        let bus: PropertyEventBus<u32> = PropertyEventBus::new(event_loop.clone());

        bus.publish_initialize("a", Some(Arc::new(7)));
        quiesce(&event_loop).await;

        let recorder = Recorder::new();
        bus.register(&["a".to_string()], recorder.clone());
        quiesce(&event_loop).await;

        assert_eq!(recorder.events(), vec![Seen::Init("a".to_string(), Some(7))]);
    }

    #[tokio::test]
    async fn test_duplicate_initialize_becomes_add() {
        let event_loop = PropertyEventLoop::spawn();
        let bus: PropertyEventBus<u32> = PropertyEventBus::new(event_loop.clone());
        let recorder = Recorder::new();

        bus.register(&["a".to_string()], recorder.clone());
        bus.publish_initialize("a", Some(Arc::new(1)));
        bus.publish_initialize("a", Some(Arc::new(2)));
        quiesce(&event_loop).await;

        assert_eq!(
            recorder.events(),
            vec![
                Seen::Init("a".to_string(), Some(1)),
                Seen::Add("a".to_string(), Some(2)),
            ]
        );
    }

    #[tokio::test]
    async fn test_publisher_started_once_per_name() {
        let event_loop = PropertyEventLoop::spawn();
        let bus: PropertyEventBus<u32> = PropertyEventBus::new(event_loop.clone());
        let publisher = PresetPublisher::new(std::collections::HashMap::from([(
            "a".to_string(),
            Some(Arc::new(5)),
        )]));
        bus.set_publisher(publisher.clone());

        let first = Recorder::new();
        let second = Recorder::new();
        bus.register(&["a".to_string()], first.clone());
        bus.register(&["a".to_string()], second.clone());
        quiesce(&event_loop).await;

        assert_eq!(publisher.started.lock().clone(), vec!["a".to_string()]);
        assert_eq!(first.events(), vec![Seen::Init("a".to_string(), Some(5))]);
        // The second registration initializes from the cache, not from a
        // second publisher round-trip.
        assert_eq!(second.events(), vec![Seen::Init("a".to_string(), Some(5))]);
    }

    #[tokio::test]
    async fn test_unregister_stops_publishing_when_last_leaves() {
        let event_loop = PropertyEventLoop::spawn();
        let bus: PropertyEventBus<u32> = PropertyEventBus::new(event_loop.clone());
        let publisher = PresetPublisher::new(std::collections::HashMap::new());
        bus.set_publisher(publisher.clone());

        let recorder = Recorder::new();
        bus.register(&["a".to_string()], recorder.clone());
        bus.unregister(&["a".to_string()], recorder.clone());
        quiesce(&event_loop).await;

        assert_eq!(publisher.stopped.lock().clone(), vec!["a".to_string()]);

        // Publishing to a name with no subscribers is a no-op.
        bus.publish_add("a", Some(Arc::new(9)));
        quiesce(&event_loop).await;
        assert!(recorder.events().iter().all(|e| !matches!(e, Seen::Add(_, _))));
    }
}
