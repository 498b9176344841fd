//! In-process topic-addressed pub/sub.
//!
//! The bus distributes [`Event`]s to per-topic subscribers in two delivery
//! modes:
//!
//! - [`Delivery::Sync`]: the handler runs on the publisher's thread, inside
//!   [`EventBus::publish`]. Handler panics are caught and logged; publication
//!   never fails because of a subscriber.
//! - [`Delivery::Buffered`]: events are queued on a bounded per-subscriber
//!   buffer and drained in FIFO order by a dedicated consumer task. A full
//!   buffer drops the event for that subscriber only; a per-subscriber drop
//!   counter records how many were lost.
//!
//! For any single subscriber, delivery order matches publication order:
//! publishers to the same topic are serialized at the enqueue boundary.
//! Across subscribers or topics no ordering is guaranteed.
//!
//! Buffered subscriptions spawn their consumer on the current tokio runtime,
//! so they must be created from within one.

use crate::events::Event;
use crate::{Error, Result};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;

/// Identifier handed out by [`EventBus::subscribe`].
pub type SubscriberId = u64;

/// Delivery mode for a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handler runs on the publisher's thread before `publish` returns.
    Sync,
    /// Events are queued on a bounded buffer of the given capacity and
    /// drained by a dedicated consumer task.
    Buffered(usize),
}

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

enum Channel {
    Sync(Handler),
    Buffered {
        queue: mpsc::Sender<Event>,
        dropped: Arc<AtomicU64>,
    },
}

struct Subscriber {
    id: SubscriberId,
    channel: Channel,
}

#[derive(Default)]
struct Topic {
    subscribers: Mutex<Vec<Subscriber>>,
}

/// Topic pub/sub with mixed sync and buffered-async subscribers.
pub struct EventBus {
    topics: RwLock<HashMap<String, Arc<Topic>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Register a handler for a topic and return its subscriber id.
    ///
    /// [`Delivery::Buffered`] spawns the consumer task on the current tokio
    /// runtime; the capacity must be non-zero.
    pub fn subscribe<F>(&self, topic: &str, handler: F, delivery: Delivery) -> Result<SubscriberId>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::BusClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let handler: Handler = Arc::new(handler);

        let channel = match delivery {
            Delivery::Sync => Channel::Sync(handler),
            Delivery::Buffered(capacity) => {
                if capacity == 0 {
                    return Err(Error::invalid_input("buffered subscriber capacity must be > 0"));
                }
                let (tx, mut rx) = mpsc::channel::<Event>(capacity);
                let dropped = Arc::new(AtomicU64::new(0));
                tokio::spawn(async move {
                    // Drains remaining events after the sender side is dropped
                    // (unsubscribe or bus close), then exits.
                    while let Some(event) = rx.recv().await {
                        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                            log::error!("buffered subscriber panicked: {:?}", panic);
                        }
                    }
                });
                Channel::Buffered { queue: tx, dropped }
            }
        };

        let topic_state = {
            let mut topics = self.topics.write().expect("topic map poisoned");
            Arc::clone(topics.entry(topic.to_string()).or_default())
        };
        topic_state
            .subscribers
            .lock()
            .expect("subscriber list poisoned")
            .push(Subscriber { id, channel });

        Ok(id)
    }

    /// Remove a subscriber from a topic. Returns false if it was not there.
    ///
    /// A buffered subscriber's consumer task drains its queue and exits.
    pub fn unsubscribe(&self, topic: &str, id: SubscriberId) -> bool {
        let topic_state = {
            let topics = self.topics.read().expect("topic map poisoned");
            match topics.get(topic) {
                Some(state) => Arc::clone(state),
                None => return false,
            }
        };
        let mut subscribers = topic_state
            .subscribers
            .lock()
            .expect("subscriber list poisoned");
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        before != subscribers.len()
    }

    /// Deliver an event to every subscriber of its topic.
    ///
    /// Sync handlers run inline; buffered subscribers are enqueued with
    /// best-effort semantics (a full buffer drops the event for that
    /// subscriber only). Subscriber failures never fail the publish.
    pub fn publish(&self, event: Event) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::BusClosed);
        }

        let topic_state = {
            let topics = self.topics.read().expect("topic map poisoned");
            match topics.get(&event.topic) {
                Some(state) => Arc::clone(state),
                None => return Ok(()),
            }
        };

        // Holding the topic lock across delivery serializes concurrent
        // publishers to one topic, which is what preserves per-subscriber
        // publication order.
        let subscribers = topic_state
            .subscribers
            .lock()
            .expect("subscriber list poisoned");
        for subscriber in subscribers.iter() {
            match &subscriber.channel {
                Channel::Sync(handler) => {
                    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                        log::error!(
                            "sync subscriber {} on '{}' panicked: {:?}",
                            subscriber.id,
                            event.topic,
                            panic
                        );
                    }
                }
                Channel::Buffered { queue, dropped } => {
                    if queue.try_send(event.clone()).is_err() {
                        let total = dropped.fetch_add(1, Ordering::SeqCst) + 1;
                        log::warn!(
                            "buffered subscriber {} on '{}' full, dropped event ({} total)",
                            subscriber.id,
                            event.topic,
                            total
                        );
                    }
                }
            }
        }

        Ok(())
    }

    /// Number of events dropped for a buffered subscriber, if it exists.
    pub fn dropped(&self, topic: &str, id: SubscriberId) -> Option<u64> {
        let topics = self.topics.read().expect("topic map poisoned");
        let topic_state = topics.get(topic)?;
        let subscribers = topic_state
            .subscribers
            .lock()
            .expect("subscriber list poisoned");
        subscribers.iter().find(|s| s.id == id).and_then(|s| match &s.channel {
            Channel::Buffered { dropped, .. } => Some(dropped.load(Ordering::SeqCst)),
            Channel::Sync(_) => None,
        })
    }

    /// Close the bus. Further publishes fail with
    /// [`Error::BusClosed`]; buffered consumers drain what they hold and
    /// exit.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the topic map drops every queue sender, which lets the
        // consumer tasks run to completion.
        self.topics.write().expect("topic map poisoned").clear();
    }

    /// True once [`close`](EventBus::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
