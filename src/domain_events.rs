// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Domain Event Channels
//!
//! [`DomainEventChannel`] publishes the events of one family (for example the
//! order events) on a durable topic exchange and, when configured with a
//! consumer, drains a durable queue bound to that exchange into its
//! [`Deliveries`].

use crate::{
    broker::{BrokerChannel, BrokerConnection},
    channel::Channel,
    consumer::{spawn_pump, Deliveries, DEFAULT_DELIVERY_BUFFER},
    errors::AmqpError,
    exchange::ExchangeDefinition,
    publisher,
    queue::{QueueBinding, QueueDefinition},
    topology::Topology,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::{
    sync::{mpsc, Mutex, RwLock},
    task::JoinHandle,
};
use tracing::{debug, error, warn};

pub const ORDER_DOMAIN_EVENTS_EXCHANGE_NAME: &str = "domain_event";
pub const ORDER_DOMAIN_EVENTS_QUEUE_NAME: &str = "order_domain_event";
pub const ORDER_DOMAIN_EVENTS_ROUTING_KEY: &str = "#";
pub const ORDER_DOMAIN_EVENTS_ROUTING_PREFIX: &str = "order.";

/// Event routed when an order has been paid.
pub const ORDER_PAID_EVENT: &str = "order_paid";

/// Queue side of a consuming channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerDefinition {
    pub queue: QueueDefinition,
    pub binding_key: String,
}

/// Shape of a domain event family on the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainEventTopology {
    pub exchange: ExchangeDefinition,
    pub routing_prefix: String,
    /// `None` for pure producers: no queue and no consumer are declared.
    pub consumer: Option<ConsumerDefinition>,
}

impl DomainEventTopology {
    /// Publish-only topology on a durable topic exchange.
    pub fn publisher(exchange: &str, routing_prefix: &str) -> Self {
        Self {
            exchange: ExchangeDefinition::new(exchange).topic().durable(),
            routing_prefix: routing_prefix.to_owned(),
            consumer: None,
        }
    }

    /// Also consume the family from a durable `queue` bound with `binding_key`.
    pub fn consume_from(mut self, queue: &str, binding_key: &str) -> Self {
        self.consumer = Some(ConsumerDefinition {
            queue: QueueDefinition::new(queue).durable(),
            binding_key: binding_key.to_owned(),
        });
        self
    }

    /// Drops the consumer part.
    pub fn publish_only(mut self) -> Self {
        self.consumer = None;
        self
    }

    /// The order events: `domain_event` topic exchange, `order.` prefix and
    /// the `order_domain_event` queue bound with `#`.
    pub fn order_domain_events() -> Self {
        Self::publisher(
            ORDER_DOMAIN_EVENTS_EXCHANGE_NAME,
            ORDER_DOMAIN_EVENTS_ROUTING_PREFIX,
        )
        .consume_from(
            ORDER_DOMAIN_EVENTS_QUEUE_NAME,
            ORDER_DOMAIN_EVENTS_ROUTING_KEY,
        )
    }

    pub(crate) fn topology(&self) -> Topology {
        let topology = Topology::new(self.exchange.clone());

        match &self.consumer {
            None => topology,
            Some(consumer) => topology.queue(consumer.queue.clone()).queue_binding(
                QueueBinding::new(consumer.queue.name())
                    .exchange(self.exchange.name())
                    .routing_key(&consumer.binding_key),
            ),
        }
    }
}

/// [`Channel`] implementation for one domain event family.
pub struct DomainEventChannel {
    settings: DomainEventTopology,
    topology: Topology,
    write_channel: RwLock<Option<Arc<dyn BrokerChannel>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    delivery_tx: mpsc::Sender<String>,
    deliveries: Deliveries,
}

impl DomainEventChannel {
    pub fn new(settings: DomainEventTopology) -> Self {
        Self::with_buffer(settings, DEFAULT_DELIVERY_BUFFER)
    }

    /// Like [`DomainEventChannel::new`] with a custom delivery buffer size.
    pub fn with_buffer(settings: DomainEventTopology, buffer: usize) -> Self {
        let (delivery_tx, rx) = mpsc::channel(buffer.max(1));

        Self {
            topology: settings.topology(),
            settings,
            write_channel: RwLock::new(None),
            pump: Mutex::new(None),
            delivery_tx,
            deliveries: Deliveries::new(rx),
        }
    }

    /// Channel for the order events, publishing and consuming.
    pub fn order_domain_events() -> Self {
        Self::new(DomainEventTopology::order_domain_events())
    }

    pub fn settings(&self) -> &DomainEventTopology {
        &self.settings
    }

    /// Whether a write handle is attached.
    pub async fn is_attached(&self) -> bool {
        self.write_channel.read().await.is_some()
    }

    /// Detaches the write handle, stops the pump and closes the logical
    /// channel they belonged to, cancelling its consumer on the broker.
    async fn release(&self) {
        let previous = self.write_channel.write().await.take();
        if let Some(pump) = self.pump.lock().await.take() {
            pump.abort();
        }

        if let Some(channel) = previous {
            if let Err(err) = channel.close().await {
                debug!(
                    error = err.to_string(),
                    channel = self.name(),
                    "previous channel already gone"
                );
            }
        }
    }

    /// Installs the topology on `channel` and starts the consumer, if any.
    async fn attach(
        &self,
        channel: &dyn BrokerChannel,
    ) -> Result<Option<JoinHandle<()>>, AmqpError> {
        self.topology.install(channel).await?;

        match &self.settings.consumer {
            Some(consumer) => Ok(Some(self.start_consumer(channel, consumer).await?)),
            None => Ok(None),
        }
    }

    async fn start_consumer(
        &self,
        channel: &dyn BrokerChannel,
        consumer: &ConsumerDefinition,
    ) -> Result<JoinHandle<()>, AmqpError> {
        let queue = consumer.queue.name();

        let stream = match channel.basic_consume(queue, "").await {
            Ok(stream) => stream,
            Err(err) => {
                error!(error = err.to_string(), queue, "error to create the consumer");
                return Err(AmqpError::BindingConsumerError(queue.to_owned()));
            }
        };

        Ok(spawn_pump(
            self.name().to_owned(),
            stream,
            self.delivery_tx.clone(),
        ))
    }
}

#[async_trait]
impl Channel for DomainEventChannel {
    fn name(&self) -> &str {
        self.settings.exchange.name()
    }

    async fn send(&self, body: &str, event_type: &str) -> Result<(), AmqpError> {
        let Some(channel) = self.write_channel.read().await.clone() else {
            return Err(AmqpError::NotConnected(self.name().to_owned()));
        };

        let routing_key = publisher::routing_key(&self.settings.routing_prefix, event_type);
        let msg = publisher::domain_event(body, event_type);

        channel
            .basic_publish(self.name(), &routing_key, &msg)
            .await
            .map_err(|err| {
                error!(
                    error = err.to_string(),
                    routing_key = routing_key.as_str(),
                    "error publishing message"
                );
                err
            })
    }

    fn receive(&self) -> Deliveries {
        self.deliveries.clone()
    }

    async fn connect(&self, conn: Arc<dyn BrokerConnection>) -> Result<(), AmqpError> {
        self.release().await;

        debug!(channel = self.name(), "creating amqp channel...");
        let channel = conn.create_channel().await.map_err(|err| {
            error!(
                error = err.to_string(),
                channel = self.name(),
                "error to create the channel"
            );
            err
        })?;

        match self.attach(channel.as_ref()).await {
            Ok(pump) => *self.pump.lock().await = pump,
            Err(err) => {
                if let Err(close_err) = channel.close().await {
                    warn!(
                        error = close_err.to_string(),
                        channel = self.name(),
                        "failure to close the half-built channel"
                    );
                }
                return Err(err);
            }
        }

        *self.write_channel.write().await = Some(channel);
        debug!(channel = self.name(), "channel attached");

        Ok(())
    }

    async fn disconnect(&self) {
        self.release().await;
        debug!(channel = self.name(), "channel detached");
    }
}
