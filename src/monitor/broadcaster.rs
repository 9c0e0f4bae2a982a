//! Bounded multi-subscriber fan-out with drop-oldest backpressure.
//!
//! Every subscriber owns an independent bounded queue. Publishing is
//! best-effort fan-out: a full queue loses its oldest item to admit the new
//! one, so a slow stream consumer sees recent events instead of stalling the
//! monitoring loop. Dropped (closed) subscribers are pruned on publish.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use crate::events::StreamEvent;

/// Default per-subscriber queue capacity.
pub const DEFAULT_CAPACITY: usize = 200;

struct SubscriberQueue {
    items: std::sync::Mutex<VecDeque<StreamEvent>>,
    notify: Notify,
    capacity: usize,
    closed: AtomicBool,
}

impl SubscriberQueue {
    fn push(&self, event: StreamEvent) {
        let mut items = self.items.lock().expect("subscriber queue poisoned");
        if items.len() >= self.capacity {
            // Drop-oldest: recency over completeness for live viewing.
            items.pop_front();
        }
        items.push_back(event);
        drop(items);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<StreamEvent> {
        self.items
            .lock()
            .expect("subscriber queue poisoned")
            .pop_front()
    }
}

/// Receiving end handed to a stream connection. Dropping it marks the
/// subscription closed; the broadcaster prunes it on the next publish.
pub struct Subscriber {
    id: u64,
    queue: Arc<SubscriberQueue>,
}

impl Subscriber {
    /// Wait for the next event. Pair with `tokio::time::timeout` for
    /// heartbeat-style waits.
    pub async fn recv(&self) -> StreamEvent {
        loop {
            if let Some(event) = self.queue.pop() {
                return event;
            }
            self.queue.notify.notified().await;
        }
    }

    pub fn try_recv(&self) -> Option<StreamEvent> {
        self.queue.pop()
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.queue.closed.store(true, Ordering::Release);
    }
}

/// Registry of subscriber queues.
pub struct Broadcaster {
    subs: Mutex<HashMap<u64, Arc<SubscriberQueue>>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            subs: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity,
        }
    }

    pub async fn add_subscriber(&self) -> Subscriber {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubscriberQueue {
            items: std::sync::Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: self.capacity,
            closed: AtomicBool::new(false),
        });
        self.subs.lock().await.insert(id, queue.clone());
        Subscriber { id, queue }
    }

    /// Remove a subscription. Removing one that is already gone is a no-op.
    pub async fn remove_subscriber(&self, id: u64) {
        self.subs.lock().await.remove(&id);
    }

    /// Fan an event out to every live subscriber, pruning closed ones.
    pub async fn publish(&self, event: StreamEvent) {
        let mut subs = self.subs.lock().await;
        subs.retain(|_, queue| !queue.closed.load(Ordering::Acquire));
        for queue in subs.values() {
            queue.push(event.clone());
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subs.lock().await.len()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{FileEvent, FileEventKind};

    fn event(path: &str) -> StreamEvent {
        StreamEvent::from_file_event(&FileEvent::new(FileEventKind::Created, path, 1.0))
    }

    #[tokio::test]
    async fn test_drop_oldest_at_capacity_one() {
        let bcast = Broadcaster::new(1);
        let sub = bcast.add_subscriber().await;
        bcast.publish(event("/first")).await;
        bcast.publish(event("/second")).await;
        match sub.try_recv() {
            Some(StreamEvent::FileEvent { path, .. }) => assert_eq!(path, "/second"),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let bcast = Broadcaster::default();
        let sub = bcast.add_subscriber().await;
        let id = sub.id();
        bcast.remove_subscriber(id).await;
        bcast.remove_subscriber(id).await;
        assert_eq!(bcast.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned_on_publish() {
        let bcast = Broadcaster::default();
        let sub = bcast.add_subscriber().await;
        drop(sub);
        bcast.publish(event("/a")).await;
        assert_eq!(bcast.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_recv_wakes_on_publish() {
        let bcast = Arc::new(Broadcaster::default());
        let sub = bcast.add_subscriber().await;
        let publisher = {
            let bcast = bcast.clone();
            tokio::spawn(async move { bcast.publish(event("/late")).await })
        };
        let got = tokio::time::timeout(std::time::Duration::from_secs(2), sub.recv())
            .await
            .expect("recv timed out");
        assert!(matches!(got, StreamEvent::FileEvent { .. }));
        publisher.await.unwrap();
    }
}
