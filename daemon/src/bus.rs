//! Event fan-out primitives: a 1→N publisher and an M→1 merger.

use ::log::warn;
use ::std::collections::HashMap;
use ::std::sync::atomic::{AtomicU64, Ordering};
use ::std::sync::{Arc, Mutex};
use ::tokio::sync::mpsc;
use ::tokio::task::JoinHandle;

/// Per-subscriber buffer depth. Emission never blocks: a subscriber whose
/// buffer is full loses the new event (counted and logged).
pub const SUBSCRIBER_CAPACITY: usize = 64;

/// Receiving end of a subscription. `recv` returns `None` once the
/// publisher closes or the subscription is dropped server-side.
pub struct Subscription<T> {
    id: u64,
    rx: mpsc::Receiver<T>,
}

impl<T> Subscription<T> {
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

struct Outlet<T> {
    id: u64,
    tx: mpsc::Sender<T>,
    dropped: u64,
}

/// Fans each emitted event out to every live subscriber, without blocking.
pub struct Publisher<T> {
    outlets: Mutex<Vec<Outlet<T>>>,
    next_id: AtomicU64,
}

impl<T: Clone> Publisher<T> {
    pub fn new() -> Publisher<T> {
        Publisher { outlets: Mutex::new(Vec::new()), next_id: AtomicU64::new(1) }
    }

    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.outlets.lock().unwrap().push(Outlet { id, tx, dropped: 0 });
        Subscription { id, rx }
    }

    /// Removes the subscription and closes its channel.
    pub fn unsubscribe(&self, subscription: Subscription<T>) {
        self.outlets.lock().unwrap().retain(|outlet| outlet.id != subscription.id);
    }

    /// Non-blocking scatter to all subscribers. Subscribers that went away
    /// are pruned; slow subscribers lose the event.
    pub fn emit(&self, value: &T) {
        let mut outlets = self.outlets.lock().unwrap();
        outlets.retain_mut(|outlet| match outlet.tx.try_send(value.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                outlet.dropped += 1;
                if outlet.dropped == 1 {
                    warn!("subscriber {} is not keeping up, dropping events", outlet.id);
                }
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Closes every subscriber channel, signalling end-of-stream.
    pub fn close(&self) {
        self.outlets.lock().unwrap().clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.outlets.lock().unwrap().len()
    }
}

/// Forwards events from any number of upstream subscriptions into one
/// downstream publisher. Events from a single upstream stay in order; order
/// across upstreams is arbitrary.
pub struct Merger<T> {
    downstream: Arc<Publisher<T>>,
    forwards: Mutex<HashMap<u64, JoinHandle<()>>>,
}

impl<T: Clone + Send + 'static> Merger<T> {
    pub fn new() -> Merger<T> {
        Merger { downstream: Arc::new(Publisher::new()), forwards: Mutex::new(HashMap::new()) }
    }

    /// Starts forwarding `upstream` into the downstream publisher under
    /// `key`. Merging a key twice replaces the previous upstream.
    pub fn merge(&self, key: u64, mut upstream: Subscription<T>) {
        let downstream = self.downstream.clone();
        let handle = ::tokio::spawn(async move {
            while let Some(event) = upstream.recv().await {
                downstream.emit(&event);
            }
        });
        if let Some(previous) = self.forwards.lock().unwrap().insert(key, handle) {
            previous.abort();
        }
    }

    /// Stops forwarding the keyed upstream. Returns false for unknown keys.
    pub fn unmerge(&self, key: u64) -> bool {
        match self.forwards.lock().unwrap().remove(&key) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn subscribe(&self) -> Subscription<T> {
        self.downstream.subscribe()
    }

    pub fn unsubscribe(&self, subscription: Subscription<T>) {
        self.downstream.unsubscribe(subscription)
    }

    /// Stops all forwarders and closes the downstream publisher.
    pub fn close(&self) {
        for (_, handle) in self.forwards.lock().unwrap().drain() {
            handle.abort();
        }
        self.downstream.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_reaches_every_subscriber_in_order() {
        let publisher = Publisher::new();
        let mut a = publisher.subscribe();
        let mut b = publisher.subscribe();
        for i in 0..5u32 {
            publisher.emit(&i);
        }
        for sub in [&mut a, &mut b] {
            for i in 0..5u32 {
                assert_eq!(sub.recv().await, Some(i));
            }
        }
    }

    #[tokio::test]
    async fn close_signals_end_of_stream() {
        let publisher = Publisher::<u32>::new();
        let mut sub = publisher.subscribe();
        publisher.emit(&1);
        publisher.close();
        assert_eq!(sub.recv().await, Some(1));
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn unsubscribe_removes_outlet() {
        let publisher = Publisher::<u32>::new();
        let sub = publisher.subscribe();
        assert_eq!(publisher.subscriber_count(), 1);
        publisher.unsubscribe(sub);
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn slow_subscriber_loses_events_but_stays_subscribed() {
        let publisher = Publisher::new();
        let mut sub = publisher.subscribe();
        for i in 0..(SUBSCRIBER_CAPACITY as u32 + 10) {
            publisher.emit(&i);
        }
        assert_eq!(publisher.subscriber_count(), 1);
        // The buffered prefix is intact; the overflow was dropped.
        for i in 0..SUBSCRIBER_CAPACITY as u32 {
            assert_eq!(sub.recv().await, Some(i));
        }
        publisher.emit(&999);
        assert_eq!(sub.recv().await, Some(999));
    }

    #[tokio::test]
    async fn dropped_subscriber_is_pruned_on_emit() {
        let publisher = Publisher::new();
        let sub = publisher.subscribe();
        drop(sub);
        publisher.emit(&1u32);
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn merger_forwards_and_preserves_per_source_order() {
        let merger = Merger::new();
        let mut out = merger.subscribe();

        let source = Publisher::new();
        merger.merge(7, source.subscribe());
        for i in 0..10u32 {
            source.emit(&i);
        }
        for i in 0..10u32 {
            assert_eq!(out.recv().await, Some(i));
        }
    }

    #[tokio::test]
    async fn unmerge_detaches_source() {
        let merger = Merger::<u32>::new();
        let source = Publisher::new();
        merger.merge(1, source.subscribe());
        assert!(merger.unmerge(1));
        assert!(!merger.unmerge(1));
    }

    #[tokio::test]
    async fn merger_close_ends_downstream() {
        let merger = Merger::<u32>::new();
        let mut out = merger.subscribe();
        merger.close();
        assert_eq!(out.recv().await, None);
    }
}
