// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delivery Stream and Pump
//!
//! A consuming channel owns one long-lived [`Deliveries`] queue for the whole
//! process. Each successful `connect` spawns a pump that forwards the bodies
//! received from the broker into that queue; the pump ends together with the
//! broker stream it reads, so the queue outlives any number of reconnects.

use crate::{broker::DeliveryStream, errors::AmqpError};
use futures_util::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error};

/// Default number of bodies buffered between the pump and the readers.
pub const DEFAULT_DELIVERY_BUFFER: usize = 64;

/// Inbound message bodies of one channel.
///
/// Every clone reads from the same queue: a body is handed to exactly one
/// reader.
#[derive(Clone)]
pub struct Deliveries {
    rx: Arc<Mutex<mpsc::Receiver<String>>>,
}

impl Deliveries {
    pub(crate) fn new(rx: mpsc::Receiver<String>) -> Self {
        Self {
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Waits for the next body. Returns `None` once the owning channel is gone.
    pub async fn recv(&self) -> Option<String> {
        self.rx.lock().await.recv().await
    }

    /// Turns the handle into a [`Stream`] of bodies.
    pub fn into_stream(self) -> impl Stream<Item = String> + Send + 'static {
        futures_util::stream::unfold(self, |deliveries| async move {
            deliveries.recv().await.map(|body| (body, deliveries))
        })
    }
}

/// Spawns the task forwarding every delivery of `stream` into `tx`.
///
/// The task exits when the broker closes the stream or when no reader is
/// left. Delivery errors are logged and skipped.
pub(crate) fn spawn_pump(
    channel: String,
    mut stream: DeliveryStream,
    tx: mpsc::Sender<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!(channel = channel.as_str(), "delivery pump started");

        while let Some(result) = stream.next().await {
            match result {
                Ok(body) => {
                    let body = String::from_utf8_lossy(&body).into_owned();
                    if tx.send(body).await.is_err() {
                        debug!(channel = channel.as_str(), "no reader left");
                        break;
                    }
                }
                Err(err) => error!(
                    error = err.to_string(),
                    channel = channel.as_str(),
                    "errors consume msg"
                ),
            }
        }

        debug!(channel = channel.as_str(), "delivery pump stopped");
    })
}

/// Decodes a JSON domain event received through [`Deliveries`].
pub fn decode_event<T>(body: &str) -> Result<T, AmqpError>
where
    T: DeserializeOwned,
{
    serde_json::from_str(body).map_err(|err| AmqpError::ParsePayloadError(err.to_string()))
}
