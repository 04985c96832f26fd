// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Domain Event Connection Layer
//!
//! This module provides the error taxonomy shared by the connection manager,
//! the channels and the broker client. Dial errors are retried by the
//! connection, topology errors abort a `start` attempt, and publish errors are
//! returned synchronously to the producer.

use thiserror::Error;

/// Represents errors that can occur while talking to the message broker.
///
/// Variants carry the name of the object (host, exchange, queue, channel)
/// involved so the caller of `Connection::start` knows which step failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Error establishing a connection to the broker, after every retry
    #[error("failure to connect to `{host}`: {reason}")]
    ConnectionError { host: String, reason: String },

    /// A freshly dialed connection was already closed
    #[error("amqp connection is closed")]
    ClosedConnection,

    /// `start` was called on a connection closed by its owner
    #[error("connection was closed by its owner")]
    ConnectionClosed,

    /// The broker or the network closed a live connection
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Error creating a logical channel on an established connection
    #[error("failure to create a channel: {0}")]
    ChannelError(String),

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding a queue to an exchange
    #[error("failure to binding exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// Error starting a consumer on a queue
    #[error("failure to declare consumer `{0}`")]
    BindingConsumerError(String),

    /// A channel failed to attach itself to a new connection
    #[error("failure to attach channel `{channel}`")]
    ChannelAttachError {
        channel: String,
        #[source]
        source: Box<AmqpError>,
    },

    /// Publish attempted while the channel has no write handle
    #[error("channel `{0}` is not connected")]
    NotConnected(String),

    /// Error publishing a message
    #[error("failure to publish: {0}")]
    PublishingError(String),

    /// Error consuming a message
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),

    /// Error parsing a message payload
    #[error("failure to parse payload: {0}")]
    ParsePayloadError(String),

    /// Error serializing a message payload
    #[error("failure to serialize payload: {0}")]
    SerializePayloadError(String),

    /// Error closing the broker connection
    #[error("failure to close connection: {0}")]
    CloseError(String),

    /// Missing or invalid configuration
    #[error("invalid configuration: {0}")]
    ConfigError(String),
}
