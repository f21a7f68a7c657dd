use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify, RwLock};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// What happens to a subscriber whose queue is full when a new frame
/// arrives. Broadcast audio is latency-sensitive, so the hub never blocks
/// the publisher to wait for a slow subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Discard the oldest queued frame to make room for the newest one.
    DropOldest,
    /// Disconnect the subscriber outright.
    Disconnect,
}

struct Buffer<T> {
    queue: Mutex<VecDeque<T>>,
    notify: Notify,
    closed: AtomicBool,
}

impl<T> Buffer<T> {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }
}

/// Receiving half returned by [`FanoutHub::subscribe`].
pub struct SubscriberReceiver<T> {
    id: SubscriberId,
    buffer: Arc<Buffer<T>>,
}

impl<T> SubscriberReceiver<T> {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Waits for the next item. Returns `None` once the hub has closed
    /// this subscriber (via [`FanoutHub::unsubscribe`] or disconnect
    /// overflow), after draining anything still queued.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            if let Some(item) = self.buffer.queue.lock().await.pop_front() {
                return Some(item);
            }
            if self.buffer.closed.load(Ordering::Acquire) {
                return None;
            }
            self.buffer.notify.notified().await;
        }
    }
}

/// Single-publisher, many-subscriber fan-out, generic over the item type
/// so one hub instance can carry raw audio frames or tagged broadcast
/// events depending on the session that owns it.
pub struct FanoutHub<T> {
    subscribers: RwLock<HashMap<SubscriberId, Arc<Buffer<T>>>>,
    queue_depth: usize,
    overflow: OverflowPolicy,
}

impl<T: Clone> FanoutHub<T> {
    pub fn new(queue_depth: usize, overflow: OverflowPolicy) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            queue_depth,
            overflow,
        }
    }

    pub async fn subscribe(&self) -> SubscriberReceiver<T> {
        let id = SubscriberId::new();
        let buffer = Arc::new(Buffer::new());
        self.subscribers.write().await.insert(id, buffer.clone());
        SubscriberReceiver { id, buffer }
    }

    pub async fn unsubscribe(&self, id: SubscriberId) {
        if let Some(buffer) = self.subscribers.write().await.remove(&id) {
            buffer.closed.store(true, Ordering::Release);
            buffer.notify.notify_waiters();
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Drops whatever is currently queued for every subscriber, without
    /// disconnecting anyone. Used when an authoritative `stop` makes the
    /// queued backlog stale (e.g. a cancelled in-flight utterance).
    pub async fn clear_all(&self) {
        let subs = self.subscribers.read().await;
        for buffer in subs.values() {
            buffer.queue.lock().await.clear();
        }
    }

    /// Delivers one item to every current subscriber, applying the
    /// configured overflow policy to anyone whose queue is already full.
    pub async fn publish(&self, item: T) {
        let snapshot: Vec<(SubscriberId, Arc<Buffer<T>>)> = {
            let subs = self.subscribers.read().await;
            subs.iter().map(|(id, b)| (*id, b.clone())).collect()
        };

        let mut to_disconnect = Vec::new();

        for (id, buffer) in snapshot {
            let mut queue = buffer.queue.lock().await;
            if queue.len() >= self.queue_depth {
                match self.overflow {
                    OverflowPolicy::DropOldest => {
                        queue.pop_front();
                        queue.push_back(item.clone());
                    }
                    OverflowPolicy::Disconnect => {
                        drop(queue);
                        to_disconnect.push(id);
                        continue;
                    }
                }
            } else {
                queue.push_back(item.clone());
            }
            drop(queue);
            buffer.notify.notify_one();
        }

        for id in to_disconnect {
            self.unsubscribe(id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_frames() {
        let hub = FanoutHub::<Arc<[u8]>>::new(4, OverflowPolicy::DropOldest);
        let mut rx = hub.subscribe().await;

        hub.publish(Arc::from(vec![1, 2, 3])).await;

        let frame = rx.recv().await.expect("frame delivered");
        assert_eq!(&*frame, &[1, 2, 3]);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery_and_closes_receiver() {
        let hub = FanoutHub::<Arc<[u8]>>::new(4, OverflowPolicy::DropOldest);
        let mut rx = hub.subscribe().await;
        hub.unsubscribe(rx.id()).await;

        hub.publish(Arc::from(vec![9])).await;

        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn drop_oldest_keeps_the_newest_frame() {
        let hub = FanoutHub::<Arc<[u8]>>::new(1, OverflowPolicy::DropOldest);
        let mut rx = hub.subscribe().await;

        hub.publish(Arc::from(vec![1])).await;
        hub.publish(Arc::from(vec![2])).await;

        let frame = rx.recv().await.expect("frame delivered");
        assert_eq!(&*frame, &[2]);
    }

    #[tokio::test]
    async fn disconnect_policy_drops_slow_subscriber() {
        let hub = FanoutHub::<Arc<[u8]>>::new(1, OverflowPolicy::Disconnect);
        let mut rx = hub.subscribe().await;

        hub.publish(Arc::from(vec![1])).await;
        hub.publish(Arc::from(vec![2])).await;

        assert_eq!(hub.subscriber_count().await, 0);
        // The frame queued before disconnect is still drained...
        let _ = rx.recv().await;
        // ...then the channel reports closed.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn double_unsubscribe_is_idempotent() {
        let hub = FanoutHub::<Arc<[u8]>>::new(4, OverflowPolicy::DropOldest);
        let mut rx = hub.subscribe().await;
        let id = rx.id();
        hub.unsubscribe(id).await;
        hub.unsubscribe(id).await;
        assert_eq!(hub.subscriber_count().await, 0);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn clear_all_drops_queued_items_without_disconnecting() {
        let hub = FanoutHub::<Arc<[u8]>>::new(4, OverflowPolicy::DropOldest);
        let mut rx = hub.subscribe().await;

        hub.publish(Arc::from(vec![1])).await;
        hub.clear_all().await;
        hub.publish(Arc::from(vec![2])).await;

        let frame = rx.recv().await.expect("frame delivered");
        assert_eq!(&*frame, &[2]);
        assert_eq!(hub.subscriber_count().await, 1);
    }
}
