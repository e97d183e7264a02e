//! Fan-out of [`DriveEvent`]s to subscribers.
//!
//! Two entry points:
//!
//! - [`EventBus::publish`] delivers synchronously. Used off the cyclic
//!   thread (session lifecycle, handshake).
//! - [`EventSender::send`] never blocks and never logs. The cyclic thread
//!   queues into a bounded channel; a dispatcher thread logs the event and
//!   fans it out. A full queue drops the event.
//!
//! Subscriber queues are bounded too: a receiver that is held but not read
//! stops receiving once [`SUBSCRIBER_QUEUE_LEN`] events are pending.
//! Subscribers whose receiver was dropped are pruned on the next publish.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

use linmot_common::consts::{EVENT_QUEUE_LEN, SUBSCRIBER_QUEUE_LEN};
use linmot_common::events::DriveEvent;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
struct Subscribers {
    queues: Mutex<Vec<SyncSender<DriveEvent>>>,
    dropped: AtomicU64,
}

impl Subscribers {
    fn deliver(&self, event: DriveEvent) {
        if event.is_fault() {
            warn!(?event, "drive event");
        } else {
            info!(?event, "drive event");
        }
        self.queues.lock().retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("subscriber queue full, event dropped");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}

/// Non-blocking handle for the cyclic thread.
#[derive(Debug, Clone)]
pub struct EventSender {
    queue: SyncSender<DriveEvent>,
    subscribers: Arc<Subscribers>,
}

impl EventSender {
    /// Queue for the dispatcher; dropped (and counted) when the queue is full.
    #[inline]
    pub fn send(&self, event: DriveEvent) {
        if self.queue.try_send(event).is_err() {
            self.subscribers.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: EventSender,
}

impl EventBus {
    /// Create the bus and start its dispatcher thread. The thread exits
    /// once every bus and sender clone is gone.
    pub fn new() -> Self {
        let subscribers = Arc::new(Subscribers::default());
        let (queue, pending) = mpsc::sync_channel(EVENT_QUEUE_LEN);

        let dispatch = subscribers.clone();
        let spawned = std::thread::Builder::new()
            .name("linmot-events".to_string())
            .spawn(move || dispatch_loop(pending, dispatch));
        if let Err(e) = spawned {
            error!(error = %e, "event dispatcher not started, cyclic events will be dropped");
        }

        Self {
            sender: EventSender { queue, subscribers },
        }
    }

    /// New subscriber; receives every event published from now on.
    pub fn subscribe(&self) -> Receiver<DriveEvent> {
        let (tx, rx) = mpsc::sync_channel(SUBSCRIBER_QUEUE_LEN);
        self.sender.subscribers.queues.lock().push(tx);
        rx
    }

    /// Log and deliver on the calling thread.
    pub fn publish(&self, event: DriveEvent) {
        self.sender.subscribers.deliver(event);
    }

    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.subscribers.queues.lock().len()
    }

    /// Events lost to a full queue since the bus was created.
    pub fn dropped(&self) -> u64 {
        self.sender.subscribers.dropped.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn dispatch_loop(pending: Receiver<DriveEvent>, subscribers: Arc<Subscribers>) {
    for event in pending {
        subscribers.deliver(event);
    }
    debug!("event dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn delivers_in_order_to_every_subscriber() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.publish(DriveEvent::FaultCleared);
        bus.publish(DriveEvent::LinkFaulted { consecutive: 3 });

        for rx in [a, b] {
            assert_eq!(rx.try_recv().unwrap(), DriveEvent::FaultCleared);
            assert_eq!(
                rx.try_recv().unwrap(),
                DriveEvent::LinkFaulted { consecutive: 3 }
            );
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let keep = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);
        bus.publish(DriveEvent::FaultCleared);
        assert_eq!(bus.subscriber_count(), 1);
        assert!(keep.try_recv().is_ok());
    }

    #[test]
    fn sender_delivers_through_dispatcher() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        let sender = bus.sender();
        sender.send(DriveEvent::CycleMissed {
            cycle: 7,
            consecutive: 1,
        });
        sender.send(DriveEvent::FaultCleared);

        let timeout = Duration::from_secs(1);
        assert_eq!(
            rx.recv_timeout(timeout).unwrap(),
            DriveEvent::CycleMissed {
                cycle: 7,
                consecutive: 1
            }
        );
        assert_eq!(rx.recv_timeout(timeout).unwrap(), DriveEvent::FaultCleared);
    }

    #[test]
    fn unread_subscriber_is_bounded() {
        let bus = EventBus::new();
        let idle = bus.subscribe();
        let extra = 10;
        for cycle in 0..(SUBSCRIBER_QUEUE_LEN + extra) as u64 {
            bus.publish(DriveEvent::CycleMissed {
                cycle,
                consecutive: 1,
            });
        }
        assert_eq!(bus.dropped(), extra as u64);
        assert_eq!(idle.try_iter().count(), SUBSCRIBER_QUEUE_LEN);
        // Still subscribed once drained.
        bus.publish(DriveEvent::FaultCleared);
        assert_eq!(idle.try_recv().unwrap(), DriveEvent::FaultCleared);
    }
}
