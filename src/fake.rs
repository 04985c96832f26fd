// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! In-memory broker used by the unit tests. Every call is recorded so tests
//! can assert on ordering, and published messages are routed to bound queues
//! with topic matching.

use crate::{
    broker::{Broker, BrokerChannel, BrokerConnection, DeliveryStream, Publishing},
    configs::RabbitMQConfigs,
    errors::AmqpError,
    exchange::{ExchangeDefinition, ExchangeKind},
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Published {
    pub exchange: String,
    pub routing_key: String,
    pub msg: Publishing,
}

/// A consumer registered on the broker. It stays registered until its logical
/// channel or its connection is closed, whether or not its stream is read.
struct Consumer {
    queue: String,
    conn_id: usize,
    channel_id: usize,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

struct ConnectionHandle {
    closed: Arc<AtomicBool>,
    close_tx: Arc<Mutex<Option<mpsc::Sender<AmqpError>>>>,
}

#[derive(Default)]
struct State {
    calls: Vec<String>,
    fail_on: HashSet<String>,
    failing_dials: usize,
    connections: Vec<ConnectionHandle>,
    bindings: Vec<QueueBinding>,
    consumers: Vec<Consumer>,
    published: Vec<Published>,
    channels_opened: usize,
    round_robin: usize,
}

impl State {
    fn fails(&self, op: &str) -> bool {
        self.fail_on.contains(op)
    }

    fn drop_consumers_of(&mut self, conn_id: usize) {
        self.consumers.retain(|c| c.conn_id != conn_id);
    }

    fn cancel_consumers_of_channel(&mut self, channel_id: usize) {
        self.consumers.retain(|c| c.channel_id != channel_id);
    }
}

#[derive(Clone, Default)]
pub(crate) struct FakeBroker {
    state: Arc<Mutex<State>>,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call to `op` fail from now on.
    pub fn fail_on(&self, op: &str) {
        self.state.lock().unwrap().fail_on.insert(op.to_owned());
    }

    pub fn succeed_on(&self, op: &str) {
        self.state.lock().unwrap().fail_on.remove(op);
    }

    /// Makes the next `n` dials fail.
    pub fn fail_dials(&self, n: usize) {
        self.state.lock().unwrap().failing_dials = n;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn published(&self) -> Vec<Published> {
        self.state.lock().unwrap().published.clone()
    }

    pub fn bindings(&self) -> Vec<QueueBinding> {
        self.state.lock().unwrap().bindings.clone()
    }

    /// Consumers registered on `queue`, read or not.
    pub fn active_consumers(&self, queue: &str) -> usize {
        self.consumer_channels(queue).len()
    }

    /// Ids of the logical channels holding a consumer on `queue`. Channel ids
    /// are assigned in creation order, starting at zero.
    pub fn consumer_channels(&self, queue: &str) -> Vec<usize> {
        self.state
            .lock()
            .unwrap()
            .consumers
            .iter()
            .filter(|c| c.queue == queue)
            .map(|c| c.channel_id)
            .collect()
    }

    pub fn connection_closed(&self, index: usize) -> bool {
        self.state.lock().unwrap().connections[index]
            .closed
            .load(Ordering::SeqCst)
    }

    /// Pushes a message straight into every consumer of `queue`.
    pub fn deliver(&self, queue: &str, body: &str) {
        let state = self.state.lock().unwrap();
        for consumer in state.consumers.iter().filter(|c| c.queue == queue) {
            let _ = consumer.tx.send(body.as_bytes().to_vec());
        }
    }

    /// Simulates the broker dropping the latest connection, emitting `signals`
    /// close notifications back-to-back.
    pub fn lose_connection(&self, signals: usize) {
        let mut state = self.state.lock().unwrap();
        let conn_id = state.connections.len() - 1;
        state.drop_consumers_of(conn_id);

        let conn = &state.connections[conn_id];
        conn.closed.store(true, Ordering::SeqCst);
        if let Some(tx) = conn.close_tx.lock().unwrap().take() {
            for i in 0..signals {
                let _ = tx.try_send(AmqpError::ConnectionLost(format!("signal {}", i)));
            }
        };
    }
}

#[async_trait]
impl Broker for FakeBroker {
    async fn dial(&self, _cfg: &RabbitMQConfigs) -> Result<Arc<dyn BrokerConnection>, AmqpError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("dial".to_owned());

        if state.failing_dials > 0 || state.fails("dial") {
            state.failing_dials = state.failing_dials.saturating_sub(1);
            return Err(AmqpError::ConnectionError {
                host: "fake".to_owned(),
                reason: "connection refused".to_owned(),
            });
        }

        let closed = Arc::new(AtomicBool::new(false));
        let close_tx = Arc::new(Mutex::new(None));
        let id = state.connections.len();
        state.connections.push(ConnectionHandle {
            closed: closed.clone(),
            close_tx: close_tx.clone(),
        });

        Ok(Arc::new(FakeConnection {
            id,
            state: self.state.clone(),
            closed,
            close_tx,
        }))
    }
}

struct FakeConnection {
    id: usize,
    state: Arc<Mutex<State>>,
    closed: Arc<AtomicBool>,
    close_tx: Arc<Mutex<Option<mpsc::Sender<AmqpError>>>>,
}

#[async_trait]
impl BrokerConnection for FakeConnection {
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, AmqpError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("create_channel".to_owned());

        if state.fails("create_channel") || self.is_closed() {
            return Err(AmqpError::ChannelError("channel refused".to_owned()));
        }

        let id = state.channels_opened;
        state.channels_opened += 1;

        Ok(Arc::new(FakeChannel {
            id,
            conn_id: self.id,
            state: self.state.clone(),
            conn_closed: self.closed.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn notify_close(&self) -> mpsc::Receiver<AmqpError> {
        let (tx, rx) = mpsc::channel(8);
        *self.close_tx.lock().unwrap() = Some(tx);
        rx
    }

    async fn close(&self) -> Result<(), AmqpError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("close".to_owned());
        state.drop_consumers_of(self.id);

        self.closed.store(true, Ordering::SeqCst);
        self.close_tx.lock().unwrap().take();
        Ok(())
    }
}

struct FakeChannel {
    id: usize,
    conn_id: usize,
    state: Arc<Mutex<State>>,
    conn_closed: Arc<AtomicBool>,
    closed: AtomicBool,
}

impl FakeChannel {
    fn record(&self, op: &str, call: String) -> Result<(), String> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);

        if state.fails(op) {
            return Err(format!("{} refused", op));
        }
        if self.conn_closed.load(Ordering::SeqCst) || self.closed.load(Ordering::SeqCst) {
            return Err("channel closed".to_owned());
        }
        Ok(())
    }
}

fn kind_name(kind: ExchangeKind) -> &'static str {
    match kind {
        ExchangeKind::Direct => "direct",
        ExchangeKind::Fanout => "fanout",
        ExchangeKind::Topic => "topic",
        ExchangeKind::Headers => "headers",
    }
}

fn durability(durable: bool) -> &'static str {
    if durable {
        "durable"
    } else {
        "transient"
    }
}

/// AMQP topic matching: `*` matches one word, `#` zero or more.
pub(crate) fn topic_matches(pattern: &str, key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match (pattern.split_first(), key.split_first()) {
            (None, None) => true,
            (Some((&"#", rest)), _) => {
                matches(rest, key) || (!key.is_empty() && matches(pattern, &key[1..]))
            }
            (Some((&"*", rest)), Some((_, key_rest))) => matches(rest, key_rest),
            (Some((word, rest)), Some((key_word, key_rest))) => {
                word == key_word && matches(rest, key_rest)
            }
            _ => false,
        }
    }

    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = key.split('.').collect();
    matches(&pattern, &key)
}

#[async_trait]
impl BrokerChannel for FakeChannel {
    async fn exchange_declare(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        let call = format!(
            "exchange_declare {} {} {}",
            def.name,
            kind_name(def.kind),
            durability(def.durable)
        );
        self.record("exchange_declare", call)
            .map_err(|_| AmqpError::DeclareExchangeError(def.name.clone()))
    }

    async fn queue_declare(&self, def: &QueueDefinition) -> Result<(), AmqpError> {
        let call = format!("queue_declare {} {}", def.name, durability(def.durable));
        self.record("queue_declare", call)
            .map_err(|_| AmqpError::DeclareQueueError(def.name.clone()))
    }

    async fn queue_bind(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        let call = format!(
            "queue_bind {} {} {}",
            binding.queue_name, binding.exchange_name, binding.routing_key
        );
        self.record("queue_bind", call).map_err(|_| {
            AmqpError::BindingExchangeToQueueError(
                binding.exchange_name.clone(),
                binding.queue_name.clone(),
            )
        })?;

        let mut state = self.state.lock().unwrap();
        if !state.bindings.contains(binding) {
            state.bindings.push(binding.clone());
        }
        Ok(())
    }

    async fn basic_consume(
        &self,
        queue: &str,
        _consumer_tag: &str,
    ) -> Result<DeliveryStream, AmqpError> {
        self.record("basic_consume", format!("basic_consume {}", queue))
            .map_err(|_| AmqpError::BindingConsumerError(queue.to_owned()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().unwrap().consumers.push(Consumer {
            queue: queue.to_owned(),
            conn_id: self.conn_id,
            channel_id: self.id,
            tx,
        });

        Ok(futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|body| (Ok(body), rx))
        })
        .boxed())
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        msg: &Publishing,
    ) -> Result<(), AmqpError> {
        self.record(
            "basic_publish",
            format!("basic_publish {} {}", exchange, routing_key),
        )
        .map_err(AmqpError::PublishingError)?;

        let mut state = self.state.lock().unwrap();
        state.published.push(Published {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            msg: msg.clone(),
        });

        let queues: Vec<String> = state
            .bindings
            .iter()
            .filter(|b| b.exchange_name == exchange && topic_matches(&b.routing_key, routing_key))
            .map(|b| b.queue_name.clone())
            .collect();

        // Round-robin across every registered consumer of the queue, as the
        // broker does. A consumer nobody reads swallows its share.
        for queue in queues {
            let targets: Vec<usize> = (0..state.consumers.len())
                .filter(|&i| state.consumers[i].queue == queue)
                .collect();
            if targets.is_empty() {
                continue;
            }

            let target = targets[state.round_robin % targets.len()];
            state.round_robin += 1;
            let _ = state.consumers[target].tx.send(msg.body.clone());
        }

        Ok(())
    }

    async fn close(&self) -> Result<(), AmqpError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("channel_close".to_owned());

        self.closed.store(true, Ordering::SeqCst);
        state.cancel_consumers_of_channel(self.id);
        Ok(())
    }
}

#[test]
fn topic_matching_follows_amqp_wildcards() {
    assert!(topic_matches("#", "order.order_paid"));
    assert!(topic_matches("order.*", "order.order_paid"));
    assert!(topic_matches("order.#", "order"));
    assert!(!topic_matches("order.*", "order"));
    assert!(!topic_matches("cart.#", "order.order_paid"));
}
