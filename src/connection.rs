// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Resilient Broker Connection
//!
//! [`Connection`] owns the physical broker connection and the ordered
//! registry of [`Channel`]s. `start` dials with an exponential backoff and
//! replays `connect` on every channel; afterwards a close-notification
//! listener rebuilds everything when the broker drops the connection.
//!
//! The lifecycle is observable through [`ConnectionState`]:
//!
//! ```text
//! Idle -> Connecting -> Connected -> Disconnected -> Connecting -> ...
//!                                 \-> Closed (after `close`, terminal)
//! ```

use crate::{
    backoff::BackoffSettings,
    broker::{Broker, BrokerConnection},
    channel::Channel,
    client::LapinBroker,
    configs::RabbitMQConfigs,
    errors::AmqpError,
};
use futures_util::{future::BoxFuture, FutureExt};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Lifecycle of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, `start` never called.
    Idle,
    /// Dialing the broker or attaching channels.
    Connecting,
    /// Every channel is attached to a live connection.
    Connected,
    /// The last attempt failed or the broker dropped the connection.
    Disconnected,
    /// Closed by its owner. Terminal.
    Closed,
}

struct Inner {
    cfg: RabbitMQConfigs,
    broker: Arc<dyn Broker>,
    backoff: BackoffSettings,
    conn: RwLock<Option<Arc<dyn BrokerConnection>>>,
    channels: RwLock<Vec<Arc<dyn Channel>>>,
    state: watch::Sender<ConnectionState>,
    start_lock: Mutex<()>,
    generation: AtomicU64,
}

/// Handle on the resilient broker connection. Clones share the same state.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    pub fn new(cfg: RabbitMQConfigs, broker: Arc<dyn Broker>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);

        Self {
            inner: Arc::new(Inner {
                cfg,
                broker,
                backoff: BackoffSettings::default(),
                conn: RwLock::new(None),
                channels: RwLock::new(Vec::new()),
                state,
                start_lock: Mutex::new(()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Connection backed by `lapin`.
    pub fn lapin(cfg: RabbitMQConfigs) -> Self {
        Self::new(cfg, Arc::new(LapinBroker::new()))
    }

    /// Connection backed by `lapin`, configured from the `RABBITMQ_*`
    /// environment variables.
    pub fn from_env() -> Result<Self, AmqpError> {
        Ok(Self::lapin(RabbitMQConfigs::from_env()?))
    }

    /// Replaces the backoff used to pace dial attempts.
    ///
    /// Must be called before the handle is cloned or started.
    pub fn with_backoff(mut self, backoff: BackoffSettings) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.backoff = backoff,
            None => warn!("backoff settings ignored, connection already shared"),
        }
        self
    }

    /// Registers `channel`. Registration order is the order in which channels
    /// are connected on every (re)connection.
    pub async fn add_channel(&self, channel: Arc<dyn Channel>) {
        debug!(channel = channel.name(), "channel registered");
        self.inner.channels.write().await.push(channel);
    }

    /// Dials the broker and attaches every registered channel. Returns
    /// immediately when already connected to a live broker connection.
    pub async fn start(&self) -> Result<(), AmqpError> {
        self.inner.start().await
    }

    /// Closes the connection for good. The reconnect listener stops and
    /// further calls to `start` fail.
    pub async fn close(&self) -> Result<(), AmqpError> {
        self.inner.state.send_replace(ConnectionState::Closed);

        let Some(conn) = self.inner.conn.write().await.take() else {
            debug!("closing an idle connection");
            return Ok(());
        };

        if conn.is_closed() {
            return Ok(());
        }

        conn.close().await.map_err(|err| {
            error!(error = err.to_string(), "failure to close the connection");
            err
        })?;

        info!("rabbitmq connection closed");
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.current()
    }

    /// Watches state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// `true` while connected with a live broker connection.
    pub async fn is_connected(&self) -> bool {
        self.inner.is_live().await
    }
}

impl Inner {
    fn current(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn is_closed(&self) -> bool {
        self.current() == ConnectionState::Closed
    }

    /// Moves to `next` unless the connection has been closed.
    fn transition(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == ConnectionState::Closed || *current == next {
                return false;
            }
            debug!(from = ?current, to = ?next, "connection state changed");
            *current = next;
            true
        });
    }

    async fn start(self: &Arc<Self>) -> Result<(), AmqpError> {
        if self.is_closed() {
            return Err(AmqpError::ConnectionClosed);
        }

        let _guard = self.start_lock.lock().await;
        if self.is_closed() {
            return Err(AmqpError::ConnectionClosed);
        }

        if self.is_live().await {
            debug!("already connected, nothing to start");
            return Ok(());
        }

        self.transition(ConnectionState::Connecting);

        let conn = match self.dial().await {
            Ok(conn) => conn,
            Err(err) => {
                self.transition(ConnectionState::Disconnected);
                return Err(err);
            }
        };

        if conn.is_closed() {
            error!("amqp connection is closed");
            self.transition(ConnectionState::Disconnected);
            return Err(AmqpError::ClosedConnection);
        }

        if let Err(err) = self.connect_channels(conn.clone()).await {
            if let Err(close_err) = conn.close().await {
                warn!(
                    error = close_err.to_string(),
                    "failure to close the half-built connection"
                );
            }
            self.transition(ConnectionState::Disconnected);
            return Err(err);
        }

        let close_rx = conn.notify_close();

        let previous = {
            let mut slot = self.conn.write().await;
            if self.is_closed() {
                drop(slot);
                if let Err(err) = conn.close().await {
                    warn!(
                        error = err.to_string(),
                        "failure to close the connection dialed during close"
                    );
                }
                return Err(AmqpError::ConnectionClosed);
            }
            slot.replace(conn)
        };

        if let Some(previous) = previous.filter(|c| !c.is_closed()) {
            if let Err(err) = previous.close().await {
                warn!(
                    error = err.to_string(),
                    "failure to close the previous connection"
                );
            }
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::spawn(listen(self.clone(), close_rx, generation));

        self.transition(ConnectionState::Connected);
        info!(host = self.cfg.host.as_str(), "amqp connected");

        Ok(())
    }

    /// Connected with a handle the broker still considers open.
    async fn is_live(&self) -> bool {
        if self.current() != ConnectionState::Connected {
            return false;
        }

        match self.conn.read().await.as_ref() {
            Some(conn) => !conn.is_closed(),
            None => false,
        }
    }

    /// Detaches every channel from the lost connection.
    async fn disconnect_channels(&self) {
        let channels = self.channels.read().await.clone();
        for channel in channels {
            channel.disconnect().await;
        }
    }

    async fn dial(&self) -> Result<Arc<dyn BrokerConnection>, AmqpError> {
        let mut backoff = self.backoff.build();

        loop {
            debug!(host = self.cfg.host.as_str(), "dialing rabbitmq...");

            let err = match self.broker.dial(&self.cfg).await {
                Ok(conn) => return Ok(conn),
                Err(err) => err,
            };

            let Some(delay) = backoff.next_delay() else {
                error!(
                    error = err.to_string(),
                    elapsed_ms = backoff.elapsed().as_millis() as u64,
                    "giving up connecting to rabbitmq"
                );
                let reason = match err {
                    AmqpError::ConnectionError { reason, .. } => reason,
                    other => other.to_string(),
                };
                return Err(AmqpError::ConnectionError {
                    host: self.cfg.target(),
                    reason,
                });
            };

            warn!(
                error = err.to_string(),
                retry_in_ms = delay.as_millis() as u64,
                "failure to connect, retrying"
            );
            tokio::time::sleep(delay).await;

            if self.is_closed() {
                return Err(AmqpError::ConnectionClosed);
            }
        }
    }

    async fn connect_channels(&self, conn: Arc<dyn BrokerConnection>) -> Result<(), AmqpError> {
        let channels = self.channels.read().await.clone();

        for channel in channels {
            if let Err(err) = channel.connect(conn.clone()).await {
                error!(
                    error = err.to_string(),
                    channel = channel.name(),
                    "failure to attach channel"
                );
                return Err(AmqpError::ChannelAttachError {
                    channel: channel.name().to_owned(),
                    source: Box::new(err),
                });
            }
        }

        Ok(())
    }
}

async fn closed(mut state: watch::Receiver<ConnectionState>) {
    let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
}

/// Waits for one close notification of the connection armed as `generation`
/// and restores the connection.
fn listen(
    inner: Arc<Inner>,
    mut close_rx: mpsc::Receiver<AmqpError>,
    generation: u64,
) -> BoxFuture<'static, ()> {
    async move {
        let reason = tokio::select! {
            reason = close_rx.recv() => reason,
            _ = closed(inner.state.subscribe()) => None,
        };

        let Some(reason) = reason else {
            debug!(generation, "close listener stopped");
            return;
        };

        if inner.is_closed() || inner.generation.load(Ordering::SeqCst) != generation {
            return;
        }

        warn!(error = reason.to_string(), "rabbitmq broken connection");
        inner.transition(ConnectionState::Disconnected);
        inner.disconnect_channels().await;

        loop {
            match inner.start().await {
                Ok(()) => {
                    info!("rabbitmq connection restored");
                    return;
                }
                Err(AmqpError::ConnectionClosed) => return,
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        "failure to restore the connection"
                    );
                    tokio::time::sleep(inner.backoff.initial_interval).await;
                }
            }
        }
    }
    .boxed()
}
