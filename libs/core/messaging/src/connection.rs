//! Broker connection supervision.
//!
//! The [`ConnectionManager`] owns the single broker channel shared by the
//! publisher and consumer loops. A background supervisor connects, declares
//! every registered queue, reports `Connected`, then waits for the channel to
//! close and starts over after the configured reconnect delay. Failures are
//! logged and retried until [`ConnectionManager::close`] is called.

use crate::broker::{Broker, BrokerChannel};
use crate::config::ConnectionConfig;
use crate::error::{BrokerError, MessagingError};
use crate::metrics;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use strum::{AsRefStr, Display};
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

/// Connection lifecycle as seen by publishers and consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Owned handle on the broker connection. Clones share the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    broker: Arc<dyn Broker>,
    config: ConnectionConfig,
    queues: Mutex<BTreeSet<String>>,
    state: watch::Sender<ConnectionState>,
    channel: watch::Sender<Option<Arc<dyn BrokerChannel>>>,
    started: AtomicBool,
    shutdown: watch::Sender<bool>,
    stopped: watch::Sender<bool>,
}

impl ConnectionManager {
    pub fn new(broker: Arc<dyn Broker>, config: ConnectionConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                broker,
                config,
                queues: Mutex::new(BTreeSet::new()),
                state: watch::Sender::new(ConnectionState::Disconnected),
                channel: watch::Sender::new(None),
                started: AtomicBool::new(false),
                shutdown: watch::Sender::new(false),
                stopped: watch::Sender::new(false),
            }),
        }
    }

    /// Declare `queue` on every connect from now on.
    ///
    /// When a channel is already open the queue is declared on it immediately;
    /// if that declaration fails the queue stays unregistered.
    pub async fn register_queue(&self, queue: impl Into<String>) -> Result<(), MessagingError> {
        let queue = queue.into();
        let mut queues = self.inner.queues.lock().await;
        if queues.contains(&queue) {
            return Ok(());
        }

        let channel = self.inner.channel.borrow().clone();
        if let Some(channel) = channel {
            channel.assert_queue(&queue).await?;
            debug!(queue = %queue, "Queue declared on open channel");
        }
        queues.insert(queue);
        Ok(())
    }

    /// Start the connection supervisor if it is not running yet.
    ///
    /// Returns immediately; watch [`state`](Self::state) or await
    /// [`wait_until_connected`](Self::wait_until_connected) to observe progress.
    pub fn ensure_connected(&self) {
        if *self.inner.shutdown.borrow() {
            warn!("ensure_connected called on a closed connection manager");
            return;
        }
        if self
            .inner
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let inner = self.inner.clone();
        tokio::spawn(async move { inner.supervise().await });
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// `messaging.system` value of the underlying broker.
    pub fn system(&self) -> &'static str {
        self.inner.broker.system()
    }

    /// The open channel, or `ChannelUnavailable`.
    pub fn channel(&self) -> Result<Arc<dyn BrokerChannel>, MessagingError> {
        if !self.is_connected() {
            return Err(MessagingError::ChannelUnavailable);
        }
        self.inner
            .channel
            .borrow()
            .clone()
            .filter(|channel| channel.is_open())
            .ok_or(MessagingError::ChannelUnavailable)
    }

    /// Wait for the next `Connected` state.
    ///
    /// Fails with `ChannelUnavailable` once the manager is closed.
    pub async fn wait_until_connected(&self) -> Result<(), MessagingError> {
        let mut state = self.watch_state();
        let mut stopped = self.inner.stopped.subscribe();
        let mut shutdown = self.inner.shutdown.subscribe();

        tokio::select! {
            result = state.wait_for(|s| *s == ConnectionState::Connected) => {
                result.map(|_| ()).map_err(|_| MessagingError::ChannelUnavailable)
            }
            _ = wait_true(&mut shutdown) => Err(MessagingError::ChannelUnavailable),
            _ = wait_true(&mut stopped) => Err(MessagingError::ChannelUnavailable),
        }
    }

    /// Close the channel and stop reconnecting. Terminal.
    pub async fn close(&self) {
        self.inner.shutdown.send_replace(true);

        if self.inner.started.load(Ordering::SeqCst) {
            let mut stopped = self.inner.stopped.subscribe();
            wait_true(&mut stopped).await;
        } else {
            self.inner.stopped.send_replace(true);
        }
        info!(system = self.system(), "Connection manager closed");
    }
}

impl Inner {
    async fn supervise(self: Arc<Self>) {
        let system = self.broker.system();
        let mut shutdown = self.shutdown.subscribe();
        let mut failures: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.state.send_replace(ConnectionState::Connecting);
            metrics::reconnect_attempt(system);

            match self.connect_once().await {
                Ok(channel) => {
                    failures = 0;
                    self.state.send_replace(ConnectionState::Connected);
                    metrics::connection_up(system, true);
                    info!(system, "Connected to broker");

                    tokio::select! {
                        _ = channel.closed() => {
                            warn!(system, "Broker connection closed");
                        }
                        _ = wait_true(&mut shutdown) => {
                            channel.close().await;
                            self.mark_disconnected();
                            break;
                        }
                    }
                    self.mark_disconnected();
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    self.state.send_replace(ConnectionState::Disconnected);
                    error!(system, attempt = failures, error = %e, "Failed to connect to broker");
                }
            }

            let delay = self.config.reconnect.delay(failures.saturating_sub(1));
            info!(system, delay_ms = delay.as_millis() as u64, "Reconnecting to broker");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wait_true(&mut shutdown) => break,
            }
        }

        self.mark_disconnected();
        self.stopped.send_replace(true);
        debug!(system, "Connection supervisor stopped");
    }

    /// Connect and declare registered queues. The channel is published only
    /// once every queue is declared.
    async fn connect_once(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError> {
        let channel = self.broker.connect().await?;

        let queues = self.queues.lock().await;
        for queue in queues.iter() {
            if let Err(e) = channel.assert_queue(queue).await {
                channel.close().await;
                return Err(e);
            }
            debug!(queue = %queue, "Queue declared");
        }
        self.channel.send_replace(Some(channel.clone()));
        drop(queues);

        Ok(channel)
    }

    fn mark_disconnected(&self) {
        self.channel.send_replace(None);
        let previous = self.state.send_replace(ConnectionState::Disconnected);
        if previous == ConnectionState::Connected {
            metrics::connection_up(self.broker.system(), false);
        }
    }
}

async fn wait_true(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|v| *v).await;
}
