// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Client Primitives
//!
//! The connection layer does not speak AMQP itself. It drives a lower-level
//! client through the traits of this module: dial a connection, open logical
//! channels on it, declare topology, publish and consume. [`crate::client`]
//! implements them on top of `lapin`.

use crate::{
    configs::RabbitMQConfigs,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::mpsc;

/// Stream of raw message bodies delivered by an auto-ack consumer.
///
/// The stream ends when the logical channel it was created on goes away.
pub type DeliveryStream = BoxStream<'static, Result<Vec<u8>, AmqpError>>;

/// A message ready to be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publishing {
    pub body: Vec<u8>,
    pub content_type: String,
    pub persistent: bool,
    /// AMQP `type` property.
    pub kind: Option<String>,
    pub message_id: Option<String>,
    pub headers: BTreeMap<String, String>,
}

/// Dials connections to the broker.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    async fn dial(&self, cfg: &RabbitMQConfigs) -> Result<Arc<dyn BrokerConnection>, AmqpError>;
}

/// A physical connection to the broker.
#[async_trait]
pub trait BrokerConnection: Send + Sync + 'static {
    /// Opens a new logical channel multiplexed over this connection.
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, AmqpError>;

    fn is_closed(&self) -> bool;

    /// Registers a close listener.
    ///
    /// The receiver yields the close reason when the connection is lost and
    /// completes without a value once the notification source is dropped.
    fn notify_close(&self) -> mpsc::Receiver<AmqpError>;

    async fn close(&self) -> Result<(), AmqpError>;
}

/// A logical channel on a [`BrokerConnection`].
#[async_trait]
pub trait BrokerChannel: Send + Sync + 'static {
    async fn exchange_declare(&self, def: &ExchangeDefinition) -> Result<(), AmqpError>;

    async fn queue_declare(&self, def: &QueueDefinition) -> Result<(), AmqpError>;

    async fn queue_bind(&self, binding: &QueueBinding) -> Result<(), AmqpError>;

    /// Starts an auto-acknowledged consumer on `queue`.
    async fn basic_consume(&self, queue: &str, consumer_tag: &str)
        -> Result<DeliveryStream, AmqpError>;

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        msg: &Publishing,
    ) -> Result<(), AmqpError>;

    /// Closes the logical channel, cancelling its consumers on the broker.
    async fn close(&self) -> Result<(), AmqpError>;
}
