use crate::domain::channel::Device;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc;
use tracing::debug;

/// Event published by the session manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Full list of devices known so far in the current discovery
    DevicesDiscovered(Vec<Device>),
    DiscoveryStarted,
    DiscoveryFinished,
    AdapterEnabled,
    AdapterDisabled,
    DeviceConnected(Device),
    DeviceDisconnected,
    /// One inbound message, before any decoding
    MessageReceived(String),
}

/// Receiver of link events
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn on_event(&self, event: &LinkEvent);
}

/// Forwards every event into a channel
#[async_trait]
impl Subscriber for mpsc::UnboundedSender<LinkEvent> {
    async fn on_event(&self, event: &LinkEvent) {
        if self.send(event.clone()).is_err() {
            debug!("Event receiver dropped");
        }
    }
}

type Entry = (u64, Arc<dyn Subscriber>);

/// Ordered set of subscribers
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<Entry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a subscriber; it stays registered while the handle lives
    pub fn subscribe(self: &Arc<Self>, subscriber: Arc<dyn Subscriber>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push((id, subscriber));
        Subscription {
            id,
            bus: Arc::downgrade(self),
        }
    }

    fn unsubscribe(&self, id: u64) -> bool {
        let mut subscribers = self.lock();
        let before = subscribers.len();
        subscribers.retain(|(entry_id, _)| *entry_id != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Deliver one event to every subscriber in registration order.
    ///
    /// Works on a snapshot of the list, so subscribers may register or
    /// unsubscribe from inside `on_event`.
    pub async fn deliver(&self, event: &LinkEvent) {
        let subscribers: Vec<Arc<dyn Subscriber>> =
            self.lock().iter().map(|(_, s)| Arc::clone(s)).collect();

        for subscriber in subscribers {
            subscriber.on_event(event).await;
        }
    }
}

/// Registration handle; dropping it removes the subscriber
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    bus: Weak<EventBus>,
}

impl Subscription {
    /// Remove the subscriber now
    pub fn unsubscribe(self) {}

    /// Keep the subscriber registered for the lifetime of the bus
    pub fn detach(mut self) {
        self.bus = Weak::new();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Subscriber for Recorder {
        async fn on_event(&self, event: &LinkEvent) {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{:?}", self.name, event));
        }
    }

    #[tokio::test]
    async fn test_delivery_in_registration_order() {
        let bus = Arc::new(EventBus::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let _a = bus.subscribe(Arc::new(Recorder {
            name: "a",
            log: log.clone(),
        }));
        let _b = bus.subscribe(Arc::new(Recorder {
            name: "b",
            log: log.clone(),
        }));

        bus.deliver(&LinkEvent::DiscoveryStarted).await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:DiscoveryStarted", "b:DiscoveryStarted"]
        );
    }

    #[tokio::test]
    async fn test_dropping_handle_unsubscribes() {
        let bus = Arc::new(EventBus::new());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let subscription = bus.subscribe(Arc::new(tx));
        assert_eq!(bus.subscriber_count(), 1);

        subscription.unsubscribe();
        assert_eq!(bus.subscriber_count(), 0);

        bus.deliver(&LinkEvent::DeviceDisconnected).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_detached_subscription_stays() {
        let bus = Arc::new(EventBus::new());
        let (tx, mut rx) = mpsc::unbounded_channel();

        bus.subscribe(Arc::new(tx)).detach();
        bus.deliver(&LinkEvent::AdapterEnabled).await;

        assert_eq!(rx.try_recv().unwrap(), LinkEvent::AdapterEnabled);
    }
}
