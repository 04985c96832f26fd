// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod consumer;
mod otel;

#[cfg(test)]
mod fake;

pub mod backoff;
pub mod broker;
pub mod channel;
pub mod client;
pub mod configs;
pub mod connection;
pub mod domain_events;
pub mod errors;
pub mod exchange;
pub mod publisher;
pub mod queue;
pub mod topology;

pub use channel::{Channel, ChannelExt};
pub use connection::{Connection, ConnectionState};
pub use consumer::{decode_event, Deliveries};
