//! Status Publisher
//!
//! Holds the authoritative [`StatusSnapshot`] and fans every change out to
//! registered observers. Observers are plain callbacks invoked on the thread
//! that published the change, outside of any internal lock, so an observer
//! may call back into the controller.

use crate::domain::models::StatusSnapshot;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub type Observer = Box<dyn Fn(&StatusSnapshot) + Send + Sync>;

/// Handle returned by [`StatusPublisher::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    // highest snapshot version already handed to this observer
    delivered: AtomicU64,
    observer: Observer,
}

impl Subscriber {
    fn deliver(&self, version: u64, snapshot: &StatusSnapshot) {
        // Concurrent publishers may finish out of order; never go backwards.
        if self.delivered.fetch_max(version, Ordering::AcqRel) < version {
            (self.observer)(snapshot);
        }
    }
}

struct Inner {
    snapshot: StatusSnapshot,
    version: u64,
    next_id: u64,
    subscribers: Vec<Arc<Subscriber>>,
}

/// A stored snapshot that has not been handed to observers yet.
///
/// Produced by [`StatusPublisher::stage`] so the caller can release its own
/// locks before observers run.
#[must_use = "staged snapshots must be delivered"]
pub struct PendingDelivery {
    version: u64,
    snapshot: StatusSnapshot,
    subscribers: Vec<Arc<Subscriber>>,
}

impl PendingDelivery {
    pub fn deliver(self) {
        for subscriber in &self.subscribers {
            subscriber.deliver(self.version, &self.snapshot);
        }
    }
}

#[derive(Clone)]
pub struct StatusPublisher {
    inner: Arc<Mutex<Inner>>,
}

impl StatusPublisher {
    pub fn new(initial: StatusSnapshot) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                snapshot: initial,
                version: 0,
                next_id: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read-only copy of the current snapshot.
    pub fn current(&self) -> StatusSnapshot {
        self.lock().snapshot.clone()
    }

    /// Stores `snapshot` as current and returns the pending fan-out.
    pub fn stage(&self, snapshot: StatusSnapshot) -> PendingDelivery {
        let mut inner = self.lock();
        inner.version += 1;
        inner.snapshot = snapshot.clone();
        PendingDelivery {
            version: inner.version,
            snapshot,
            subscribers: inner.subscribers.clone(),
        }
    }

    /// Registers an observer. It receives the current snapshot right away,
    /// then every later one.
    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&StatusSnapshot) + Send + Sync + 'static,
    {
        let (subscriber, version, snapshot) = {
            let mut inner = self.lock();
            inner.next_id += 1;
            let subscriber = Arc::new(Subscriber {
                id: SubscriptionId(inner.next_id),
                delivered: AtomicU64::new(0),
                observer: Box::new(observer),
            });
            inner.subscribers.push(subscriber.clone());
            (subscriber, inner.version, inner.snapshot.clone())
        };

        // a concurrent publish may already have handed over something newer
        if subscriber.delivered.fetch_max(version, Ordering::AcqRel) <= version {
            (subscriber.observer)(&snapshot);
        }
        subscriber.id
    }

    /// Returns `false` if the id was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|s| s.id != id);
        inner.subscribers.len() != before
    }
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new(StatusSnapshot::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn with_message(message: &str) -> StatusSnapshot {
        StatusSnapshot {
            message: message.to_string(),
            ..StatusSnapshot::default()
        }
    }

    #[test]
    fn late_subscriber_gets_current_snapshot_first() {
        let publisher = StatusPublisher::default();
        publisher.stage(with_message("Found 2 paired device(s)")).deliver();

        let (tx, rx) = mpsc::channel();
        publisher.subscribe(move |s| {
            let _ = tx.send(s.message.clone());
        });
        publisher.stage(with_message("Connecting to RC Car...")).deliver();

        let seen: Vec<String> = rx.try_iter().collect();
        assert_eq!(seen, vec!["Found 2 paired device(s)", "Connecting to RC Car..."]);
    }

    #[test]
    fn subscriber_on_fresh_publisher_sees_initial_snapshot() {
        let publisher = StatusPublisher::default();
        let (tx, rx) = mpsc::channel();
        publisher.subscribe(move |s| {
            let _ = tx.send(s.message.clone());
        });
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec!["Ready"]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let publisher = StatusPublisher::default();
        let (tx, rx) = mpsc::channel();
        let id = publisher.subscribe(move |s| {
            let _ = tx.send(s.message.clone());
        });
        assert!(publisher.unsubscribe(id));
        assert!(!publisher.unsubscribe(id));
        publisher.stage(with_message("Disconnected")).deliver();

        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn stale_delivery_is_dropped() {
        let publisher = StatusPublisher::default();
        let (tx, rx) = mpsc::channel();
        publisher.subscribe(move |s| {
            let _ = tx.send(s.message.clone());
        });

        let older = publisher.stage(with_message("older"));
        let newer = publisher.stage(with_message("newer"));
        newer.deliver();
        older.deliver();

        let seen: Vec<String> = rx.try_iter().collect();
        assert_eq!(seen, vec!["Ready", "newer"]);
        assert_eq!(publisher.current().message, "newer");
    }

    #[test]
    fn observer_may_read_publisher_reentrantly() {
        let publisher = StatusPublisher::default();
        let inner = publisher.clone();
        let (tx, rx) = mpsc::channel();
        publisher.subscribe(move |_| {
            let _ = tx.send(inner.current().message);
        });
        publisher.stage(with_message("Connected to RC Car")).deliver();

        assert_eq!(rx.try_iter().last().as_deref(), Some("Connected to RC Car"));
    }
}
