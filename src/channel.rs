// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Channel Abstraction
//!
//! A [`Channel`] is one logical unit of broker topology (an exchange,
//! optionally a queue and a consumer) that knows how to attach itself to a
//! live broker connection. Channels are registered on a
//! [`Connection`](crate::connection::Connection), which replays
//! [`Channel::connect`] after every successful (re)connection.

use crate::{broker::BrokerConnection, consumer::Deliveries, errors::AmqpError};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

/// Capability set shared by every event family.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Name of the exchange this channel manages.
    fn name(&self) -> &str;

    /// Publishes `body` with the routing key derived from `event_type`.
    ///
    /// Fails with [`AmqpError::NotConnected`] while the owning connection is
    /// being rebuilt; nothing is buffered.
    async fn send(&self, body: &str, event_type: &str) -> Result<(), AmqpError>;

    /// Inbound message bodies. Never blocks, and every call returns a handle
    /// on the same long-lived queue.
    fn receive(&self) -> Deliveries;

    /// Opens a fresh logical channel on `conn` and installs the topology,
    /// replacing whatever a previous call attached.
    async fn connect(&self, conn: Arc<dyn BrokerConnection>) -> Result<(), AmqpError>;

    /// Drops whatever the last `connect` attached. Called when the owning
    /// connection is lost, so `send` fails with [`AmqpError::NotConnected`]
    /// until the next `connect`.
    async fn disconnect(&self);
}

/// Helpers available on every [`Channel`].
#[async_trait]
pub trait ChannelExt: Channel {
    /// Serializes `event` as JSON and sends it.
    async fn send_event<T>(&self, event: &T, event_type: &str) -> Result<(), AmqpError>
    where
        T: Serialize + Sync,
    {
        let body = serde_json::to_string(event)
            .map_err(|err| AmqpError::SerializePayloadError(err.to_string()))?;
        self.send(&body, event_type).await
    }
}

impl<C: Channel + ?Sized> ChannelExt for C {}
