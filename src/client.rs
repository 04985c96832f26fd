// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Lapin Broker Client
//!
//! Production implementation of the [`crate::broker`] traits on top of
//! `lapin`. Connection loss is reported through lapin's error callback and
//! consumers are started in auto-ack mode.

use crate::{
    broker::{Broker, BrokerChannel, BrokerConnection, DeliveryStream, Publishing},
    configs::RabbitMQConfigs,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    options::{
        BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable, LongInt, LongString, ShortString},
    uri::{AMQPAuthority, AMQPScheme, AMQPUri, AMQPUserInfo},
    BasicProperties, ConnectionProperties,
};
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Constant for the header field used to specify message TTL
pub const AMQP_HEADERS_MESSAGE_TTL: &str = "x-message-ttl";
/// Constant for the header field used to specify maximum queue length
pub const AMQP_HEADERS_MAX_LENGTH: &str = "x-max-length";

const PERSISTENT_DELIVERY_MODE: u8 = 2;
const TRANSIENT_DELIVERY_MODE: u8 = 1;
const REPLY_SUCCESS: u16 = 200;

/// Dials RabbitMQ with `lapin`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LapinBroker;

impl LapinBroker {
    pub fn new() -> Self {
        LapinBroker
    }
}

fn amqp_uri(cfg: &RabbitMQConfigs) -> AMQPUri {
    AMQPUri {
        scheme: AMQPScheme::AMQP,
        authority: AMQPAuthority {
            userinfo: AMQPUserInfo {
                username: cfg.user.clone(),
                password: cfg.password.expose_secret().clone(),
            },
            host: cfg.host.clone(),
            port: cfg.port,
        },
        vhost: cfg.vhost.clone(),
        query: Default::default(),
    }
}

#[async_trait]
impl Broker for LapinBroker {
    async fn dial(&self, cfg: &RabbitMQConfigs) -> Result<Arc<dyn BrokerConnection>, AmqpError> {
        debug!(host = cfg.host.as_str(), "creating amqp connection...");
        let options = ConnectionProperties::default()
            .with_connection_name(LongString::from(cfg.connection_name.clone()));

        match lapin::Connection::connect_uri(amqp_uri(cfg), options).await {
            Ok(conn) => {
                debug!("amqp connected");
                Ok(Arc::new(LapinConnection(conn)))
            }
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                Err(AmqpError::ConnectionError {
                    host: cfg.target(),
                    reason: err.to_string(),
                })
            }
        }
    }
}

/// A `lapin` connection.
pub struct LapinConnection(lapin::Connection);

#[async_trait]
impl BrokerConnection for LapinConnection {
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, AmqpError> {
        match self.0.create_channel().await {
            Ok(c) => {
                debug!("channel created");
                Ok(Arc::new(LapinChannel(c)))
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError(err.to_string()))
            }
        }
    }

    fn is_closed(&self) -> bool {
        !self.0.status().connected()
    }

    fn notify_close(&self) -> mpsc::Receiver<AmqpError> {
        let (tx, rx) = mpsc::channel(1);
        self.0.on_error(move |err| {
            warn!(error = err.to_string(), "rabbitmq broken connection");
            let _ = tx.try_send(AmqpError::ConnectionLost(err.to_string()));
        });
        rx
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.0
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(|err| AmqpError::CloseError(err.to_string()))
    }
}

/// A `lapin` channel.
pub struct LapinChannel(lapin::Channel);

fn queue_arguments(def: &QueueDefinition) -> FieldTable {
    let mut args = BTreeMap::new();

    if let Some(ttl) = def.ttl {
        args.insert(
            ShortString::from(AMQP_HEADERS_MESSAGE_TTL),
            AMQPValue::LongInt(LongInt::from(ttl)),
        );
    }

    if let Some(max) = def.max_length {
        args.insert(
            ShortString::from(AMQP_HEADERS_MAX_LENGTH),
            AMQPValue::LongInt(LongInt::from(max)),
        );
    }

    FieldTable::from(args)
}

fn properties(msg: &Publishing) -> BasicProperties {
    let headers: BTreeMap<ShortString, AMQPValue> = msg
        .headers
        .iter()
        .map(|(k, v)| {
            (
                ShortString::from(k.clone()),
                AMQPValue::LongString(LongString::from(v.clone())),
            )
        })
        .collect();

    let delivery_mode = if msg.persistent {
        PERSISTENT_DELIVERY_MODE
    } else {
        TRANSIENT_DELIVERY_MODE
    };

    let mut props = BasicProperties::default()
        .with_content_type(ShortString::from(msg.content_type.clone()))
        .with_delivery_mode(delivery_mode)
        .with_headers(FieldTable::from(headers));

    if let Some(kind) = &msg.kind {
        props = props.with_kind(ShortString::from(kind.clone()));
    }
    if let Some(id) = &msg.message_id {
        props = props.with_message_id(ShortString::from(id.clone()));
    }

    props
}

#[async_trait]
impl BrokerChannel for LapinChannel {
    async fn exchange_declare(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        self.0
            .exchange_declare(
                &def.name,
                def.kind.into(),
                ExchangeDeclareOptions {
                    passive: false,
                    durable: def.durable,
                    auto_delete: def.delete,
                    internal: def.internal,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "exchange declaration refused");
                AmqpError::DeclareExchangeError(def.name.clone())
            })
    }

    async fn queue_declare(&self, def: &QueueDefinition) -> Result<(), AmqpError> {
        self.0
            .queue_declare(
                &def.name,
                QueueDeclareOptions {
                    passive: false,
                    durable: def.durable,
                    exclusive: def.exclusive,
                    auto_delete: def.delete,
                    nowait: false,
                },
                queue_arguments(def),
            )
            .await
            .map(|_| ())
            .map_err(|err| {
                error!(error = err.to_string(), "queue declaration refused");
                AmqpError::DeclareQueueError(def.name.clone())
            })
    }

    async fn queue_bind(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        self.0
            .queue_bind(
                &binding.queue_name,
                &binding.exchange_name,
                &binding.routing_key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "queue binding refused");
                AmqpError::BindingExchangeToQueueError(
                    binding.exchange_name.clone(),
                    binding.queue_name.clone(),
                )
            })
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, AmqpError> {
        let consumer = self
            .0
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: true,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "failure to create the consumer");
                AmqpError::BindingConsumerError(queue.to_owned())
            })?;

        Ok(consumer
            .map(|result| {
                result
                    .map(|delivery| delivery.data)
                    .map_err(|err| AmqpError::ConsumerError(err.to_string()))
            })
            .boxed())
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        msg: &Publishing,
    ) -> Result<(), AmqpError> {
        self.0
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                &msg.body,
                properties(msg),
            )
            .await
            .map_err(|err| AmqpError::PublishingError(err.to_string()))?
            .await
            .map_err(|err| AmqpError::PublishingError(err.to_string()))?;

        Ok(())
    }

    async fn close(&self) -> Result<(), AmqpError> {
        if !self.0.status().connected() {
            return Ok(());
        }

        self.0
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(|err| AmqpError::CloseError(err.to_string()))
    }
}
