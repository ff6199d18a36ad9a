//! Topic-addressed publish/subscribe with best-effort delivery.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::{BusError, TopicPattern};

/// One serialized event as seen by a subscriber.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic: Arc<str>,
    pub payload: Arc<str>,
}

impl Delivery {
    /// Deserialize the payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}

/// Handle returned by every subscribe call; pass it to `unsubscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    id: u64,
    target: Target,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Target {
    Topic(String),
    Pattern(String),
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The topic or pattern this subscription listens on.
    pub fn target(&self) -> &str {
        match &self.target {
            Target::Topic(topic) => topic,
            Target::Pattern(pattern) => pattern,
        }
    }
}

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
struct Registry {
    topics: HashMap<String, Vec<Subscriber>>,
    patterns: Vec<(TopicPattern, Subscriber)>,
    /// Liveness flags of callback subscriptions, cleared on unsubscribe.
    callbacks: HashMap<u64, Arc<AtomicBool>>,
}

#[derive(Default)]
struct Inner {
    next_id: AtomicU64,
    registry: RwLock<Registry>,
}

/// In-process publish/subscribe bus.
///
/// Clones share the same subscription table. Events are serialized to JSON
/// once per publish and handed to each matching subscriber's queue, so a slow
/// subscriber never blocks the publisher. Nothing is retained: a subscriber
/// only sees events published after it registered.
#[derive(Clone, Default)]
pub struct PubSub {
    inner: Arc<Inner>,
}

impl PubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `event` on `topic`, returning how many subscribers it reached.
    pub fn publish<E>(&self, topic: &str, event: &E) -> Result<usize, BusError>
    where
        E: Serialize + ?Sized,
    {
        let payload: Arc<str> = serde_json::to_string(event)
            .map_err(|e| BusError::Serialize {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?
            .into();
        let delivery = Delivery {
            topic: Arc::from(topic),
            payload,
        };

        let mut delivered = 0;
        let mut closed = Vec::new();
        {
            let registry = self.read();
            let exact = registry.topics.get(topic).into_iter().flatten();
            let patterned = registry
                .patterns
                .iter()
                .filter(|(pattern, _)| pattern.matches(topic))
                .map(|(_, subscriber)| subscriber);

            for subscriber in exact.chain(patterned) {
                if subscriber.tx.send(delivery.clone()).is_ok() {
                    delivered += 1;
                } else {
                    closed.push(subscriber.id);
                }
            }
        }

        if !closed.is_empty() {
            self.prune(&closed);
        }

        tracing::trace!(topic, delivered, "Published event");
        Ok(delivered)
    }

    /// Invoke `handler` for every future event on `topic`, in publish order.
    ///
    /// Events that do not deserialize into `T` are logged and dropped. The
    /// handler runs on a task spawned onto the current Tokio runtime.
    pub fn subscribe<T, F>(
        &self,
        topic: impl Into<String>,
        handler: F,
    ) -> Result<Subscription, BusError>
    where
        T: DeserializeOwned + Send + 'static,
        F: FnMut(T) + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| BusError::NoRuntime)?;
        let (subscription, rx) = self.subscribe_channel(topic);
        let mut handler = handler;
        let active = self.track(&subscription);
        runtime.spawn(dispatch(rx, active, move |_topic: String, event: T| {
            handler(event)
        }));
        Ok(subscription)
    }

    /// Invoke `handler` for every future event on any topic matching
    /// `pattern`; the handler also receives the concrete topic.
    pub fn subscribe_pattern<T, F>(&self, pattern: &str, handler: F) -> Result<Subscription, BusError>
    where
        T: DeserializeOwned + Send + 'static,
        F: FnMut(String, T) + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| BusError::NoRuntime)?;
        let (subscription, rx) = self.subscribe_pattern_channel(pattern)?;
        let active = self.track(&subscription);
        runtime.spawn(dispatch(rx, active, handler));
        Ok(subscription)
    }

    /// Receive raw deliveries for `topic` on a channel instead of a callback.
    pub fn subscribe_channel(
        &self,
        topic: impl Into<String>,
    ) -> (Subscription, mpsc::UnboundedReceiver<Delivery>) {
        let topic = topic.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id();

        self.write()
            .topics
            .entry(topic.clone())
            .or_default()
            .push(Subscriber { id, tx });

        tracing::debug!(topic = %topic, id, "Subscribed");
        (
            Subscription {
                id,
                target: Target::Topic(topic),
            },
            rx,
        )
    }

    /// Receive raw deliveries for every topic matching `pattern`.
    pub fn subscribe_pattern_channel(
        &self,
        pattern: &str,
    ) -> Result<(Subscription, mpsc::UnboundedReceiver<Delivery>), BusError> {
        let compiled = TopicPattern::new(pattern)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id();

        self.write().patterns.push((compiled, Subscriber { id, tx }));

        tracing::debug!(pattern, id, "Subscribed to pattern");
        Ok((
            Subscription {
                id,
                target: Target::Pattern(pattern.to_string()),
            },
            rx,
        ))
    }

    /// Remove a subscription. Unknown or already removed handles are a no-op.
    ///
    /// For callback subscriptions, events still queued are dropped: once this
    /// returns the handler is not invoked again, apart from a call already in
    /// progress on another thread.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        let mut registry = self.write();
        if let Some(active) = registry.callbacks.remove(&subscription.id) {
            active.store(false, Ordering::SeqCst);
        }
        match &subscription.target {
            Target::Topic(topic) => {
                if let Some(subscribers) = registry.topics.get_mut(topic) {
                    subscribers.retain(|s| s.id != subscription.id);
                    if subscribers.is_empty() {
                        registry.topics.remove(topic);
                    }
                }
            }
            Target::Pattern(_) => {
                registry.patterns.retain(|(_, s)| s.id != subscription.id);
            }
        }
    }

    /// Number of live subscriptions that would receive an event on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let registry = self.read();
        let exact = registry.topics.get(topic).map_or(0, Vec::len);
        let patterned = registry
            .patterns
            .iter()
            .filter(|(pattern, _)| pattern.matches(topic))
            .count();
        exact + patterned
    }

    fn track(&self, subscription: &Subscription) -> Arc<AtomicBool> {
        let active = Arc::new(AtomicBool::new(true));
        self.write()
            .callbacks
            .insert(subscription.id, active.clone());
        active
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn prune(&self, ids: &[u64]) {
        let mut registry = self.write();
        registry.topics.retain(|_, subscribers| {
            subscribers.retain(|s| !ids.contains(&s.id));
            !subscribers.is_empty()
        });
        registry.patterns.retain(|(_, s)| !ids.contains(&s.id));
        registry.callbacks.retain(|id, _| !ids.contains(id));
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Registry> {
        self.inner
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Registry> {
        self.inner
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

async fn dispatch<T, F>(
    mut rx: mpsc::UnboundedReceiver<Delivery>,
    active: Arc<AtomicBool>,
    mut handler: F,
) where
    T: DeserializeOwned,
    F: FnMut(String, T),
{
    while let Some(delivery) = rx.recv().await {
        if !active.load(Ordering::SeqCst) {
            break;
        }
        match delivery.decode::<T>() {
            Ok(event) => handler(delivery.topic.to_string(), event),
            Err(e) => {
                tracing::error!(topic = %delivery.topic, error = %e, "Dropping malformed event");
            }
        }
    }
}
