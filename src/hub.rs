//! Fan-out of engine events to a dynamic set of subscribers.
//!
//! Delivery never blocks the publisher: each subscriber owns a bounded
//! queue, and a full or closed queue drops that subscriber for good.

use crate::alerts::Alert;
use crate::sample::Sample;
use crate::sampler::CollectionError;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

pub type SubscriberId = u64;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    Started,
    Sample(Arc<Sample>),
    Alert(Alert),
    Error(CollectionError),
    Stopped,
}

impl MonitorEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            MonitorEvent::Started => "started",
            MonitorEvent::Sample(_) => "sample",
            MonitorEvent::Alert(_) => "alert",
            MonitorEvent::Error(_) => "error",
            MonitorEvent::Stopped => "stopped",
        }
    }
}

pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<MonitorEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next event, or `None` once the hub has dropped this subscriber and
    /// the queue is drained.
    pub async fn recv(&mut self) -> Option<MonitorEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<MonitorEvent, TryRecvError> {
        self.rx.try_recv()
    }

    pub fn into_stream(self) -> ReceiverStream<MonitorEvent> {
        ReceiverStream::new(self.rx)
    }
}

pub struct Hub {
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<MonitorEvent>>>,
    latest: RwLock<Option<Arc<Sample>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl Hub {
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            latest: RwLock::new(None),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    pub async fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().await.insert(id, tx);
        debug!(subscriber = id, "подписчик добавлен");
        Subscription { id, rx }
    }

    /// Registers a subscriber and returns the latest sample as of that
    /// moment. Both happen under the subscriber lock, so a concurrent
    /// sample lands either in the returned value or in the queue, never both.
    pub async fn subscribe_with_latest(&self) -> (Subscription, Option<Arc<Sample>>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self.subscribers.lock().await;
        subscribers.insert(id, tx);
        let latest = self.latest.read().await.clone();
        drop(subscribers);
        debug!(subscriber = id, "подписчик добавлен");
        (Subscription { id, rx }, latest)
    }

    pub async fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.subscribers.lock().await.remove(&id).is_some()
    }

    /// Drops every subscriber; their streams end after draining.
    pub async fn close_all(&self) {
        self.subscribers.lock().await.clear();
    }

    /// Delivers `event` to every live subscriber and returns how many got it.
    /// A `Sample` also replaces the latest-sample cache.
    pub async fn publish(&self, event: MonitorEvent) -> usize {
        let mut subscribers = self.subscribers.lock().await;
        if let MonitorEvent::Sample(sample) = &event {
            *self.latest.write().await = Some(Arc::clone(sample));
        }
        subscribers.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(subscriber = *id, event = event.kind(), "очередь подписчика переполнена, подписчик удалён");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(subscriber = *id, "подписчик отключился");
                false
            }
        });
        subscribers.len()
    }

    pub async fn latest(&self) -> Option<Arc<Sample>> {
        self.latest.read().await.clone()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_receives_in_order() {
        let hub = Hub::new(8);
        let mut a = hub.subscribe().await;
        let mut b = hub.subscribe().await;

        assert_eq!(hub.publish(MonitorEvent::Started).await, 2);
        assert_eq!(hub.publish(MonitorEvent::Stopped).await, 2);

        for sub in [&mut a, &mut b] {
            assert!(matches!(sub.recv().await, Some(MonitorEvent::Started)));
            assert!(matches!(sub.recv().await, Some(MonitorEvent::Stopped)));
        }
    }

    #[tokio::test]
    async fn disconnected_subscriber_is_pruned_after_one_attempt() {
        let hub = Hub::new(8);
        let dropped = hub.subscribe().await;
        let mut alive = hub.subscribe().await;
        drop(dropped);

        assert_eq!(hub.publish(MonitorEvent::Started).await, 1);
        assert_eq!(hub.subscriber_count().await, 1);
        assert_eq!(hub.publish(MonitorEvent::Stopped).await, 1);

        assert!(matches!(alive.recv().await, Some(MonitorEvent::Started)));
        assert!(matches!(alive.recv().await, Some(MonitorEvent::Stopped)));
    }

    #[tokio::test]
    async fn slow_subscriber_is_dropped_without_blocking_others() {
        let hub = Hub::new(1);
        let mut slow = hub.subscribe().await;
        let mut fast = hub.subscribe().await;

        hub.publish(MonitorEvent::Started).await;
        assert!(matches!(fast.recv().await, Some(MonitorEvent::Started)));
        // slow never read its first event, so the second overflows it
        assert_eq!(hub.publish(MonitorEvent::Stopped).await, 1);

        assert!(matches!(slow.recv().await, Some(MonitorEvent::Started)));
        assert!(slow.recv().await.is_none());
        assert!(matches!(fast.recv().await, Some(MonitorEvent::Stopped)));
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let hub = Hub::new(4);
        let mut sub = hub.subscribe().await;
        assert!(hub.unsubscribe(sub.id()).await);
        assert!(!hub.unsubscribe(sub.id()).await);

        assert_eq!(hub.publish(MonitorEvent::Started).await, 0);
        assert!(matches!(sub.try_recv(), Err(TryRecvError::Disconnected)));
    }

    fn sample(cpu: f64) -> Arc<Sample> {
        use crate::collectors::testing::ScriptedSource;
        use crate::collectors::{CpuRaw, DiskRaw, MemoryRaw, NetworkRaw};
        use crate::sampler::{RawReadings, Sampler};
        use std::time::Duration;

        let mut sampler = Sampler::new(ScriptedSource::new(), Duration::from_secs(1));
        let raw = RawReadings {
            cpu: CpuRaw {
                usage_percent: cpu,
                core_count: 1,
                clock_ghz: 1.0,
                temperature_c: None,
            },
            memory: MemoryRaw {
                total_bytes: 100,
                free_bytes: 50,
                available_bytes: 50,
                swap_total_bytes: 0,
                swap_used_bytes: 0,
            },
            disk: DiskRaw {
                total_bytes: 100,
                available_bytes: 50,
                read_bytes_total: 0,
                written_bytes_total: 0,
            },
            network: NetworkRaw::default(),
        };
        Arc::new(sampler.assemble(raw, tokio::time::Instant::now(), chrono::Utc::now()))
    }

    fn sample_values(latest: Option<Arc<Sample>>, sub: &mut Subscription) -> Vec<f64> {
        let mut seen: Vec<f64> = latest.iter().map(|s| s.cpu.usage_percent).collect();
        while let Ok(event) = sub.try_recv() {
            if let MonitorEvent::Sample(s) = event {
                seen.push(s.cpu.usage_percent);
            }
        }
        seen
    }

    #[tokio::test]
    async fn late_subscriber_sees_each_sample_once() {
        let hub = Hub::new(8);
        hub.publish(MonitorEvent::Sample(sample(1.0))).await;

        let (mut early, latest_early) = hub.subscribe_with_latest().await;
        hub.publish(MonitorEvent::Sample(sample(2.0))).await;
        let (mut late, latest_late) = hub.subscribe_with_latest().await;

        assert_eq!(sample_values(latest_early, &mut early), vec![1.0, 2.0]);
        assert_eq!(sample_values(latest_late, &mut late), vec![2.0]);
    }

    #[tokio::test]
    async fn latest_is_empty_until_first_sample() {
        let hub = Hub::new(4);
        assert!(hub.latest().await.is_none());
        hub.publish(MonitorEvent::Started).await;
        assert!(hub.latest().await.is_none());
    }
}
