//! In-process broker.
//!
//! Durable named FIFO queues with manual acknowledgement and per-consumer
//! prefetch. A nacked-with-requeue message goes to the back of its queue;
//! unacknowledged messages return to the head when their channel closes.
//!
//! Failure injection (`fail_next_connects`, `fail_publishes`, `fail_declares`,
//! `drop_connections`) and per-queue counters make it the backend for tests
//! and local demos.

use crate::broker::{Broker, BrokerChannel, DeliveryStream};
use crate::error::BrokerError;
use crate::message::{Acknowledger, Delivery, Message};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{Mutex, Notify, OwnedSemaphorePermit, Semaphore, watch};
use tracing::debug;

/// Value of the `messaging.system` attribute for this backend.
pub const SYSTEM: &str = "in-memory";

/// Snapshot of one queue's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Messages waiting for delivery
    pub depth: usize,
    /// Delivered, not yet settled
    pub unacked: usize,
    /// Total accepted publishes
    pub published: usize,
    pub acked: usize,
    /// Nacks with `requeue = true`
    pub requeued: usize,
    /// Nacks with `requeue = false`
    pub rejected: usize,
    /// Number of `assert_queue` calls
    pub assertions: usize,
}

/// Broker living entirely in process memory. Clones share the same queues.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    notify: Notify,
    connect_attempts: AtomicUsize,
    failing_connects: AtomicUsize,
    fail_publishes: AtomicBool,
    fail_declares: AtomicBool,
    next_channel_id: AtomicU64,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, QueueState>,
    channels: HashMap<u64, Arc<watch::Sender<bool>>>,
    next_tag: u64,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Stored>,
    unacked: HashMap<u64, Unacked>,
    log: Vec<Message>,
    acked: usize,
    requeued: usize,
    rejected: usize,
    assertions: usize,
}

#[derive(Clone)]
struct Stored {
    message: Message,
    deliveries: u32,
}

struct Unacked {
    stored: Stored,
    channel: u64,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.shared.failing_connects.store(n, Ordering::SeqCst);
    }

    /// Reject every publish while `fail` is set.
    pub fn fail_publishes(&self, fail: bool) {
        self.shared.fail_publishes.store(fail, Ordering::SeqCst);
    }

    /// Reject every queue declaration while `fail` is set.
    pub fn fail_declares(&self, fail: bool) {
        self.shared.fail_declares.store(fail, Ordering::SeqCst);
    }

    /// Connection attempts so far, failed ones included.
    pub fn connect_attempts(&self) -> usize {
        self.shared.connect_attempts.load(Ordering::SeqCst)
    }

    /// Close every open channel as if the broker went away.
    pub async fn drop_connections(&self) {
        let ids: Vec<u64> = self.shared.state.lock().await.channels.keys().copied().collect();
        for id in ids {
            self.shared.close_channel(id).await;
        }
    }

    pub async fn open_channels(&self) -> usize {
        self.shared.state.lock().await.channels.len()
    }

    /// Counters for `queue`; all zero for an unknown queue.
    pub async fn stats(&self, queue: &str) -> QueueStats {
        let state = self.shared.state.lock().await;
        state
            .queues
            .get(queue)
            .map(|q| QueueStats {
                depth: q.ready.len(),
                unacked: q.unacked.len(),
                published: q.log.len(),
                acked: q.acked,
                requeued: q.requeued,
                rejected: q.rejected,
                assertions: q.assertions,
            })
            .unwrap_or_default()
    }

    /// Every message accepted on `queue`, in publish order.
    pub async fn published(&self, queue: &str) -> Vec<Message> {
        let state = self.shared.state.lock().await;
        state
            .queues
            .get(queue)
            .map(|q| q.log.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn connect(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError> {
        let attempt = self.shared.connect_attempts.fetch_add(1, Ordering::SeqCst) + 1;

        let refused = self
            .shared
            .failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            debug!(attempt, "In-memory broker refused connection");
            return Err(BrokerError::Connect("connection refused".to_string()));
        }

        let id = self.shared.next_channel_id.fetch_add(1, Ordering::SeqCst);
        let (tx, _) = watch::channel(false);
        let closed = Arc::new(tx);
        self.shared
            .state
            .lock()
            .await
            .channels
            .insert(id, closed.clone());

        debug!(attempt, channel = id, "In-memory broker connected");
        Ok(Arc::new(MemoryChannel {
            id,
            shared: self.shared.clone(),
            closed,
        }))
    }

    fn system(&self) -> &'static str {
        SYSTEM
    }
}

impl Shared {
    async fn close_channel(&self, id: u64) {
        let mut state = self.state.lock().await;
        let Some(closed) = state.channels.remove(&id) else {
            return;
        };
        closed.send_replace(true);

        for queue in state.queues.values_mut() {
            let mut tags: Vec<u64> = queue
                .unacked
                .iter()
                .filter(|(_, unacked)| unacked.channel == id)
                .map(|(tag, _)| *tag)
                .collect();
            tags.sort_unstable();
            let mut returned: Vec<(u64, Stored)> = tags
                .into_iter()
                .filter_map(|tag| queue.unacked.remove(&tag).map(|u| (tag, u.stored)))
                .collect();
            // Oldest delivery ends up at the head.
            returned.sort_by_key(|(tag, _)| std::cmp::Reverse(*tag));
            for (_, stored) in returned {
                queue.ready.push_front(stored);
            }
        }
        drop(state);
        self.notify.notify_waiters();
    }

    async fn take_next(&self, queue: &str, channel: u64) -> Result<Option<(u64, Stored)>, BrokerError> {
        let mut state = self.state.lock().await;
        let State {
            queues, next_tag, ..
        } = &mut *state;

        let q = queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;
        let Some(mut stored) = q.ready.pop_front() else {
            return Ok(None);
        };

        stored.deliveries += 1;
        *next_tag += 1;
        let tag = *next_tag;
        q.unacked.insert(
            tag,
            Unacked {
                stored: stored.clone(),
                channel,
            },
        );
        Ok(Some((tag, stored)))
    }

    async fn settle(&self, queue: &str, tag: u64, outcome: Settlement) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        let q = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;
        let unacked = q
            .unacked
            .remove(&tag)
            .ok_or_else(|| BrokerError::Acknowledge(format!("unknown delivery tag {tag}")))?;

        match outcome {
            Settlement::Ack => q.acked += 1,
            Settlement::Nack { requeue: true } => {
                q.requeued += 1;
                q.ready.push_back(unacked.stored);
            }
            Settlement::Nack { requeue: false } => q.rejected += 1,
        }
        drop(state);
        self.notify.notify_waiters();
        Ok(())
    }
}

enum Settlement {
    Ack,
    Nack { requeue: bool },
}

struct MemoryChannel {
    id: u64,
    shared: Arc<Shared>,
    closed: Arc<watch::Sender<bool>>,
}

impl MemoryChannel {
    fn check_open(&self) -> Result<(), BrokerError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(BrokerError::Closed)
        }
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn assert_queue(&self, queue: &str) -> Result<(), BrokerError> {
        self.check_open()?;
        if self.shared.fail_declares.load(Ordering::SeqCst) {
            return Err(BrokerError::Declare(format!("queue '{queue}' refused")));
        }
        let mut state = self.shared.state.lock().await;
        state.queues.entry(queue.to_string()).or_default().assertions += 1;
        Ok(())
    }

    async fn publish(&self, queue: &str, message: Message) -> Result<(), BrokerError> {
        self.check_open()?;
        if self.shared.fail_publishes.load(Ordering::SeqCst) {
            return Err(BrokerError::Publish("message rejected by broker".to_string()));
        }

        let mut state = self.shared.state.lock().await;
        let q = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;
        q.log.push(message.clone());
        q.ready.push_back(Stored {
            message,
            deliveries: 0,
        });
        drop(state);

        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn consume(&self, queue: &str, prefetch: u16) -> Result<DeliveryStream, BrokerError> {
        self.check_open()?;
        if !self.shared.state.lock().await.queues.contains_key(queue) {
            return Err(BrokerError::QueueNotFound(queue.to_string()));
        }

        let consumer = MemoryConsumer {
            shared: self.shared.clone(),
            queue: queue.to_string(),
            channel: self.id,
            closed: self.closed.subscribe(),
            permits: Arc::new(Semaphore::new(usize::from(prefetch.max(1)))),
        };

        let stream = futures::stream::unfold(consumer, |mut consumer| async move {
            let item = consumer.next_delivery().await?;
            Some((item, consumer))
        });
        Ok(stream.boxed())
    }

    async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        wait_closed(&mut rx).await;
    }

    fn is_open(&self) -> bool {
        !*self.closed.borrow()
    }

    async fn close(&self) {
        self.shared.close_channel(self.id).await;
    }
}

struct MemoryConsumer {
    shared: Arc<Shared>,
    queue: String,
    channel: u64,
    closed: watch::Receiver<bool>,
    permits: Arc<Semaphore>,
}

impl MemoryConsumer {
    async fn next_delivery(&mut self) -> Option<Result<Delivery, BrokerError>> {
        if *self.closed.borrow() {
            return None;
        }

        let permit = tokio::select! {
            permit = self.permits.clone().acquire_owned() => permit.ok()?,
            _ = wait_closed(&mut self.closed) => return None,
        };

        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if *self.closed.borrow() {
                return None;
            }
            match self.shared.take_next(&self.queue, self.channel).await {
                Ok(Some((tag, stored))) => {
                    let acker = MemoryAcker {
                        shared: self.shared.clone(),
                        queue: self.queue.clone(),
                        tag,
                        _permit: permit,
                    };
                    return Some(Ok(Delivery::new(
                        stored.message,
                        stored.deliveries,
                        Box::new(acker),
                    )));
                }
                Ok(None) => {}
                Err(e) => return Some(Err(e)),
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = wait_closed(&mut self.closed) => return None,
            }
        }
    }
}

async fn wait_closed(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|closed| *closed).await;
}

/// Settles one delivery; releases its prefetch slot when dropped.
struct MemoryAcker {
    shared: Arc<Shared>,
    queue: String,
    tag: u64,
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.shared.settle(&self.queue, self.tag, Settlement::Ack).await
    }

    async fn nack(&self, requeue: bool) -> Result<(), BrokerError> {
        self.shared
            .settle(&self.queue, self.tag, Settlement::Nack { requeue })
            .await
    }
}
