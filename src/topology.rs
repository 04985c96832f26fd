// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Topology Installation
//!
//! A [`Topology`] groups the objects one channel owns on the broker: an
//! exchange and, for consuming channels, a queue with its bindings.
//! [`Topology::install`] declares them in dependency order and is replayed on
//! every reconnect, so every declaration must be idempotent on the broker side.

use crate::{
    broker::BrokerChannel,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub(crate) exchange: ExchangeDefinition,
    pub(crate) queue: Option<QueueDefinition>,
    pub(crate) bindings: Vec<QueueBinding>,
}

impl Topology {
    pub fn new(exchange: ExchangeDefinition) -> Topology {
        Topology {
            exchange,
            queue: None,
            bindings: vec![],
        }
    }

    pub fn queue(mut self, def: QueueDefinition) -> Self {
        self.queue = Some(def);
        self
    }

    pub fn queue_binding(mut self, binding: QueueBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    pub fn exchange_name(&self) -> &str {
        self.exchange.name()
    }

    pub fn queue_name(&self) -> Option<&str> {
        self.queue.as_ref().map(QueueDefinition::name)
    }

    /// Declares the exchange, then the queue, then the bindings.
    pub async fn install(&self, channel: &dyn BrokerChannel) -> Result<(), AmqpError> {
        self.install_exchange(channel).await?;
        self.install_queue(channel).await?;
        self.binding_queues(channel).await
    }

    async fn install_exchange(&self, channel: &dyn BrokerChannel) -> Result<(), AmqpError> {
        debug!("creating exchange: {}", self.exchange.name);

        if let Err(err) = channel.exchange_declare(&self.exchange).await {
            error!(
                error = err.to_string(),
                name = self.exchange.name.as_str(),
                "error to declare the exchange"
            );
            return Err(AmqpError::DeclareExchangeError(self.exchange.name.clone()));
        }

        debug!("exchange: {} was created", self.exchange.name);
        Ok(())
    }

    async fn install_queue(&self, channel: &dyn BrokerChannel) -> Result<(), AmqpError> {
        let Some(def) = &self.queue else {
            return Ok(());
        };

        debug!("creating queue: {}", def.name);

        if let Err(err) = channel.queue_declare(def).await {
            error!(
                error = err.to_string(),
                name = def.name.as_str(),
                "error to declare the queue"
            );
            return Err(AmqpError::DeclareQueueError(def.name.clone()));
        }

        debug!("queue: {} was created", def.name);
        Ok(())
    }

    async fn binding_queues(&self, channel: &dyn BrokerChannel) -> Result<(), AmqpError> {
        for binding in &self.bindings {
            debug!(
                "binding queue: {} to the exchange: {} with the key: {}",
                binding.queue_name, binding.exchange_name, binding.routing_key
            );

            if let Err(err) = channel.queue_bind(binding).await {
                error!(error = err.to_string(), "error to bind queue to exchange");
                return Err(AmqpError::BindingExchangeToQueueError(
                    binding.exchange_name.clone(),
                    binding.queue_name.clone(),
                ));
            }
        }

        Ok(())
    }
}
