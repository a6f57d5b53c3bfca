//! In-process broker with AMQP-like routing and acknowledgment semantics.
//!
//! Models exchanges (direct/topic/fanout), queue declare flags, exclusive and
//! auto-delete queues, dead-letter exchanges, per-channel prefetch windows,
//! and requeue-on-close. Every successful settle is recorded so tests can
//! assert exactly-once acknowledgment.
//!
//! Meant for tests: the settlement log and closed-channel records are kept
//! for the broker's whole lifetime so assertions can inspect them.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use peril_core::QueueFlags;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::channel::{BrokerChannel, BrokerConnection, DeliveryStream};
use crate::error::BrokerError;
use crate::types::{DeclaredQueue, Delivery, ExchangeKind, PublishProperties, QueueArguments};

/// Name of the nameless exchange that routes by queue name.
const DEFAULT_EXCHANGE: &str = "";

/// How one delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleAction {
    Ack,
    Nack { requeue: bool },
}

/// One successful acknowledgment or rejection recorded by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub channel_id: u64,
    pub delivery_tag: u64,
    pub message_id: u64,
    pub queue: String,
    pub action: SettleAction,
}

/// Channel call that [`InMemoryBroker::inject_fault`] can make fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    Qos,
    Consume,
}

/// Point-in-time view of one channel's delivery window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStats {
    pub channel_id: u64,
    pub prefetch: u16,
    pub unacked: usize,
    pub peak_unacked: usize,
    pub open: bool,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    id: u64,
    exchange: String,
    routing_key: String,
    content_type: Option<String>,
    payload: Vec<u8>,
    redelivered: bool,
}

#[derive(Debug)]
struct ExchangeState {
    kind: ExchangeKind,
    durable: bool,
    bindings: Vec<(String, String)>,
}

#[derive(Debug)]
struct ConsumerState {
    channel_id: u64,
    tag: String,
    tx: mpsc::UnboundedSender<Delivery>,
}

#[derive(Debug)]
struct QueueState {
    flags: QueueFlags,
    arguments: QueueArguments,
    owner: Option<u64>,
    ready: VecDeque<StoredMessage>,
    consumers: Vec<ConsumerState>,
    next_consumer: usize,
    had_consumer: bool,
}

#[derive(Debug)]
struct Unacked {
    queue: String,
    message: StoredMessage,
}

#[derive(Debug)]
struct ChannelState {
    connection_id: u64,
    prefetch: u16,
    next_tag: u64,
    unacked: BTreeMap<u64, Unacked>,
    peak_unacked: usize,
    open: bool,
}

impl ChannelState {
    fn has_capacity(&self) -> bool {
        self.open && (self.prefetch == 0 || self.unacked.len() < usize::from(self.prefetch))
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    next_connection_id: u64,
    next_channel_id: u64,
    next_message_id: u64,
    next_queue_suffix: u64,
    open_connections: Vec<u64>,
    exchanges: HashMap<String, ExchangeState>,
    queues: HashMap<String, QueueState>,
    channels: HashMap<u64, ChannelState>,
    settlements: Vec<Settlement>,
    invalid_settles: u64,
    faults: Vec<(FaultPoint, BrokerError)>,
}

impl BrokerState {
    fn take_fault(&mut self, point: FaultPoint) -> Option<BrokerError> {
        let index = self.faults.iter().position(|(p, _)| *p == point)?;
        Some(self.faults.remove(index).1)
    }

    fn usable_channel(&self, channel_id: u64) -> Result<&ChannelState, BrokerError> {
        match self.channels.get(&channel_id) {
            Some(channel) if channel.open => Ok(channel),
            _ => Err(BrokerError::ChannelClosed),
        }
    }

    fn check_owner(queue: &QueueState, name: &str, connection_id: u64) -> Result<(), BrokerError> {
        match queue.owner {
            Some(owner) if owner != connection_id => Err(BrokerError::ResourceLocked(format!(
                "queue '{name}' is exclusive to another connection"
            ))),
            _ => Ok(()),
        }
    }

    fn declare_exchange(
        &mut self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError> {
        if name.is_empty() {
            return Err(BrokerError::PreconditionFailed(
                "the default exchange cannot be redeclared".into(),
            ));
        }
        if let Some(existing) = self.exchanges.get(name) {
            if existing.kind != kind || existing.durable != durable {
                return Err(BrokerError::PreconditionFailed(format!(
                    "inequivalent arg for exchange '{name}': declared as {}",
                    existing.kind.as_str()
                )));
            }
            return Ok(());
        }
        self.exchanges.insert(
            name.to_string(),
            ExchangeState {
                kind,
                durable,
                bindings: Vec::new(),
            },
        );
        Ok(())
    }

    fn declare_queue(
        &mut self,
        connection_id: u64,
        name: &str,
        flags: QueueFlags,
        arguments: &QueueArguments,
    ) -> Result<DeclaredQueue, BrokerError> {
        let name = if name.is_empty() {
            self.next_queue_suffix += 1;
            format!("amq.gen-{}", self.next_queue_suffix)
        } else {
            name.to_string()
        };

        if let Some(existing) = self.queues.get(&name) {
            Self::check_owner(existing, &name, connection_id)?;
            if existing.flags != flags {
                return Err(BrokerError::PreconditionFailed(format!(
                    "inequivalent flags for queue '{name}': durable={}, auto_delete={}, exclusive={}",
                    existing.flags.durable, existing.flags.auto_delete, existing.flags.exclusive
                )));
            }
            if existing.arguments != *arguments {
                return Err(BrokerError::PreconditionFailed(format!(
                    "inequivalent arguments for queue '{name}'"
                )));
            }
            return Ok(DeclaredQueue {
                name,
                flags,
                message_count: existing.ready.len() as u32,
                consumer_count: existing.consumers.len() as u32,
            });
        }

        self.queues.insert(
            name.clone(),
            QueueState {
                flags,
                arguments: arguments.clone(),
                owner: flags.exclusive.then_some(connection_id),
                ready: VecDeque::new(),
                consumers: Vec::new(),
                next_consumer: 0,
                had_consumer: false,
            },
        );
        debug!(queue = %name, durable = flags.durable, exclusive = flags.exclusive, "queue declared");
        Ok(DeclaredQueue {
            name,
            flags,
            message_count: 0,
            consumer_count: 0,
        })
    }

    fn bind(
        &mut self,
        connection_id: u64,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        let queue_state = self
            .queues
            .get(queue)
            .ok_or_else(|| BrokerError::NotFound(format!("queue '{queue}'")))?;
        Self::check_owner(queue_state, queue, connection_id)?;
        let exchange_state = self
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BrokerError::NotFound(format!("exchange '{exchange}'")))?;
        let binding = (queue.to_string(), routing_key.to_string());
        if !exchange_state.bindings.contains(&binding) {
            exchange_state.bindings.push(binding);
        }
        Ok(())
    }

    fn consume(
        &mut self,
        channel_id: u64,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<mpsc::UnboundedReceiver<Delivery>, BrokerError> {
        let connection_id = self.usable_channel(channel_id)?.connection_id;
        let queue_state = self
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::NotFound(format!("queue '{queue}'")))?;
        Self::check_owner(queue_state, queue, connection_id)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let tag = if consumer_tag.is_empty() {
            format!("ctag-{channel_id}-{}", queue_state.consumers.len() + 1)
        } else {
            consumer_tag.to_string()
        };
        queue_state.consumers.push(ConsumerState {
            channel_id,
            tag,
            tx,
        });
        queue_state.had_consumer = true;
        self.dispatch(queue);
        Ok(rx)
    }

    fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        properties: &PublishProperties,
        payload: &[u8],
    ) -> Result<(), BrokerError> {
        let targets: Vec<String> = if exchange == DEFAULT_EXCHANGE {
            self.queues
                .contains_key(routing_key)
                .then(|| routing_key.to_string())
                .into_iter()
                .collect()
        } else {
            let exchange_state = self
                .exchanges
                .get(exchange)
                .ok_or_else(|| BrokerError::NotFound(format!("exchange '{exchange}'")))?;
            let mut targets = Vec::new();
            for (queue, binding_key) in &exchange_state.bindings {
                if exchange_state.kind.routes(binding_key, routing_key) && !targets.contains(queue)
                {
                    targets.push(queue.clone());
                }
            }
            targets
        };

        if targets.is_empty() {
            trace!(exchange, routing_key, "message unroutable; dropped");
        }
        for queue in targets {
            self.next_message_id += 1;
            let message = StoredMessage {
                id: self.next_message_id,
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                content_type: properties.content_type.clone(),
                payload: payload.to_vec(),
                redelivered: false,
            };
            if let Some(queue_state) = self.queues.get_mut(&queue) {
                queue_state.ready.push_back(message);
            }
            self.dispatch(&queue);
        }
        Ok(())
    }

    /// Pushes ready messages to consumers with free prefetch capacity,
    /// round-robin across consumers.
    fn dispatch(&mut self, queue: &str) {
        let BrokerState {
            queues, channels, ..
        } = self;
        let Some(queue_state) = queues.get_mut(queue) else {
            return;
        };

        loop {
            if queue_state.ready.is_empty() || queue_state.consumers.is_empty() {
                return;
            }
            let n = queue_state.consumers.len();
            let chosen = (0..n)
                .map(|offset| (queue_state.next_consumer + offset) % n)
                .find(|&idx| {
                    channels
                        .get(&queue_state.consumers[idx].channel_id)
                        .is_some_and(ChannelState::has_capacity)
                });
            let Some(idx) = chosen else {
                return;
            };
            let Some(message) = queue_state.ready.pop_front() else {
                return;
            };
            let consumer = &queue_state.consumers[idx];
            let Some(channel) = channels.get_mut(&consumer.channel_id) else {
                queue_state.ready.push_front(message);
                return;
            };

            let delivery_tag = channel.next_tag + 1;
            let delivery = Delivery {
                delivery_tag,
                exchange: message.exchange.clone(),
                routing_key: message.routing_key.clone(),
                redelivered: message.redelivered,
                content_type: message.content_type.clone(),
                payload: message.payload.clone(),
            };
            if consumer.tx.send(delivery).is_err() {
                trace!(queue, consumer = %consumer.tag, "consumer receiver dropped; removing");
                queue_state.ready.push_front(message);
                queue_state.consumers.remove(idx);
                queue_state.next_consumer = 0;
                continue;
            }

            channel.next_tag = delivery_tag;
            channel.unacked.insert(
                delivery_tag,
                Unacked {
                    queue: queue.to_string(),
                    message,
                },
            );
            channel.peak_unacked = channel.peak_unacked.max(channel.unacked.len());
            queue_state.next_consumer = (idx + 1) % n;
        }
    }

    fn settle(
        &mut self,
        channel_id: u64,
        delivery_tag: u64,
        action: SettleAction,
    ) -> Result<(), BrokerError> {
        self.usable_channel(channel_id)?;
        let removed = self
            .channels
            .get_mut(&channel_id)
            .and_then(|channel| channel.unacked.remove(&delivery_tag));
        let Some(Unacked { queue, mut message }) = removed else {
            self.invalid_settles += 1;
            debug!(channel_id, delivery_tag, "unknown delivery tag; closing channel");
            self.close_channel(channel_id);
            return Err(BrokerError::UnknownDeliveryTag(delivery_tag));
        };

        self.settlements.push(Settlement {
            channel_id,
            delivery_tag,
            message_id: message.id,
            queue: queue.clone(),
            action,
        });

        match action {
            SettleAction::Ack => {}
            SettleAction::Nack { requeue: true } => {
                message.redelivered = true;
                if let Some(queue_state) = self.queues.get_mut(&queue) {
                    queue_state.ready.push_front(message);
                }
            }
            SettleAction::Nack { requeue: false } => {
                let dlx = self
                    .queues
                    .get(&queue)
                    .and_then(|q| q.arguments.dead_letter_exchange.clone());
                if let Some(dlx) = dlx {
                    let properties = PublishProperties {
                        content_type: message.content_type.clone(),
                    };
                    if let Err(err) =
                        self.publish(&dlx, &message.routing_key, &properties, &message.payload)
                    {
                        debug!(queue = %queue, %dlx, error = %err, "dead-letter exchange missing; message dropped");
                    }
                }
            }
        }

        self.dispatch(&queue);
        Ok(())
    }

    /// Closes a channel: cancels its consumers, requeues its unacked
    /// deliveries in order, and deletes auto-delete queues left unused.
    fn close_channel(&mut self, channel_id: u64) {
        let Some(channel) = self.channels.get_mut(&channel_id) else {
            return;
        };
        if !channel.open {
            return;
        }
        channel.open = false;
        let unacked = std::mem::take(&mut channel.unacked);

        let mut touched: Vec<String> = Vec::new();
        for (name, queue) in self.queues.iter_mut() {
            let before = queue.consumers.len();
            queue.consumers.retain(|c| c.channel_id != channel_id);
            if queue.consumers.len() != before {
                queue.next_consumer = 0;
                touched.push(name.clone());
            }
        }

        for (_, Unacked { queue, mut message }) in unacked.into_iter().rev() {
            message.redelivered = true;
            if let Some(queue_state) = self.queues.get_mut(&queue) {
                queue_state.ready.push_front(message);
            }
            if !touched.contains(&queue) {
                touched.push(queue);
            }
        }

        for name in touched {
            let unused = self
                .queues
                .get(&name)
                .is_some_and(|q| q.flags.auto_delete && q.had_consumer && q.consumers.is_empty());
            if unused {
                self.delete_queue(&name);
            } else {
                self.dispatch(&name);
            }
        }
    }

    fn delete_queue(&mut self, name: &str) {
        if self.queues.remove(name).is_some() {
            debug!(queue = name, "queue deleted");
        }
        for exchange in self.exchanges.values_mut() {
            exchange.bindings.retain(|(queue, _)| queue != name);
        }
    }

    fn close_connection(&mut self, connection_id: u64) {
        self.open_connections.retain(|id| *id != connection_id);
        let channel_ids: Vec<u64> = self
            .channels
            .iter()
            .filter(|(_, c)| c.connection_id == connection_id && c.open)
            .map(|(id, _)| *id)
            .collect();
        for channel_id in channel_ids {
            self.close_channel(channel_id);
        }
        let exclusive: Vec<String> = self
            .queues
            .iter()
            .filter(|(_, q)| q.owner == Some(connection_id))
            .map(|(name, _)| name.clone())
            .collect();
        for name in exclusive {
            self.delete_queue(&name);
        }
    }
}

/// Shared handle to one in-process broker.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

fn lock(state: &Mutex<BrokerState>) -> MutexGuard<'_, BrokerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new connection to this broker.
    pub fn connect(&self) -> InMemoryConnection {
        let mut state = lock(&self.state);
        state.next_connection_id += 1;
        let id = state.next_connection_id;
        state.open_connections.push(id);
        InMemoryConnection {
            state: Arc::clone(&self.state),
            id,
        }
    }

    /// Number of ready (not yet delivered) messages in `queue`.
    pub fn queue_depth(&self, queue: &str) -> Option<usize> {
        lock(&self.state).queues.get(queue).map(|q| q.ready.len())
    }

    pub fn queue_flags(&self, queue: &str) -> Option<QueueFlags> {
        lock(&self.state).queues.get(queue).map(|q| q.flags)
    }

    pub fn queue_arguments(&self, queue: &str) -> Option<QueueArguments> {
        lock(&self.state)
            .queues
            .get(queue)
            .map(|q| q.arguments.clone())
    }

    pub fn queue_exists(&self, queue: &str) -> bool {
        lock(&self.state).queues.contains_key(queue)
    }

    pub fn consumer_count(&self, queue: &str) -> usize {
        lock(&self.state)
            .queues
            .get(queue)
            .map_or(0, |q| q.consumers.len())
    }

    /// Deliveries from `queue` currently awaiting settlement on any channel.
    pub fn unacked_count(&self, queue: &str) -> usize {
        lock(&self.state)
            .channels
            .values()
            .flat_map(|c| c.unacked.values())
            .filter(|u| u.queue == queue)
            .count()
    }

    pub fn channel_stats(&self) -> Vec<ChannelStats> {
        let state = lock(&self.state);
        let mut stats: Vec<ChannelStats> = state
            .channels
            .iter()
            .map(|(id, c)| ChannelStats {
                channel_id: *id,
                prefetch: c.prefetch,
                unacked: c.unacked.len(),
                peak_unacked: c.peak_unacked,
                open: c.open,
            })
            .collect();
        stats.sort_by_key(|s| s.channel_id);
        stats
    }

    /// Every successful settle, in the order the broker applied them.
    pub fn settlements(&self) -> Vec<Settlement> {
        lock(&self.state).settlements.clone()
    }

    /// Settles against the same queue, in order.
    pub fn settlements_for(&self, queue: &str) -> Vec<Settlement> {
        lock(&self.state)
            .settlements
            .iter()
            .filter(|s| s.queue == queue)
            .cloned()
            .collect()
    }

    /// Makes the next `point` call on any open channel fail with `error`.
    pub fn inject_fault(&self, point: FaultPoint, error: BrokerError) {
        lock(&self.state).faults.push((point, error));
    }

    /// Settle calls rejected for an unknown or already-settled tag.
    pub fn invalid_settles(&self) -> u64 {
        lock(&self.state).invalid_settles
    }
}

/// Connection to an [`InMemoryBroker`].
#[derive(Debug)]
pub struct InMemoryConnection {
    state: Arc<Mutex<BrokerState>>,
    id: u64,
}

impl InMemoryConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Closes every channel opened on this connection, ending their
    /// delivery streams, and deletes its exclusive queues.
    pub fn close(&self) {
        lock(&self.state).close_connection(self.id);
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).open_connections.contains(&self.id)
    }
}

#[async_trait]
impl BrokerConnection for InMemoryConnection {
    type Channel = InMemoryChannel;

    async fn open_channel(&self) -> Result<Self::Channel, BrokerError> {
        let mut state = lock(&self.state);
        if !state.open_connections.contains(&self.id) {
            return Err(BrokerError::ChannelClosed);
        }
        state.next_channel_id += 1;
        let id = state.next_channel_id;
        state.channels.insert(
            id,
            ChannelState {
                connection_id: self.id,
                prefetch: 0,
                next_tag: 0,
                unacked: BTreeMap::new(),
                peak_unacked: 0,
                open: true,
            },
        );
        Ok(InMemoryChannel {
            state: Arc::clone(&self.state),
            id,
            connection_id: self.id,
        })
    }
}

/// Channel on an [`InMemoryBroker`] connection.
#[derive(Debug)]
pub struct InMemoryChannel {
    state: Arc<Mutex<BrokerState>>,
    id: u64,
    connection_id: u64,
}

impl InMemoryChannel {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).usable_channel(self.id).is_ok()
    }
}

#[async_trait]
impl BrokerChannel for InMemoryChannel {
    type Deliveries = InMemoryDeliveries;

    async fn exchange_declare(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError> {
        let mut state = lock(&self.state);
        state.usable_channel(self.id)?;
        state.declare_exchange(exchange, kind, durable)
    }

    async fn queue_declare(
        &self,
        queue: &str,
        flags: QueueFlags,
        arguments: &QueueArguments,
    ) -> Result<DeclaredQueue, BrokerError> {
        let mut state = lock(&self.state);
        state.usable_channel(self.id)?;
        state.declare_queue(self.connection_id, queue, flags, arguments)
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        let mut state = lock(&self.state);
        state.usable_channel(self.id)?;
        state.bind(self.connection_id, queue, exchange, routing_key)
    }

    async fn basic_qos(&self, prefetch_count: u16, _global: bool) -> Result<(), BrokerError> {
        let mut state = lock(&self.state);
        state.usable_channel(self.id)?;
        if let Some(err) = state.take_fault(FaultPoint::Qos) {
            return Err(err);
        }
        if let Some(channel) = state.channels.get_mut(&self.id) {
            channel.prefetch = prefetch_count;
        }
        let queues: Vec<String> = state.queues.keys().cloned().collect();
        for queue in queues {
            state.dispatch(&queue);
        }
        Ok(())
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<Self::Deliveries, BrokerError> {
        let mut state = lock(&self.state);
        state.usable_channel(self.id)?;
        if let Some(err) = state.take_fault(FaultPoint::Consume) {
            return Err(err);
        }
        let rx = state.consume(self.id, queue, consumer_tag)?;
        Ok(InMemoryDeliveries { rx })
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: &PublishProperties,
        payload: &[u8],
    ) -> Result<(), BrokerError> {
        let mut state = lock(&self.state);
        state.usable_channel(self.id)?;
        state.publish(exchange, routing_key, properties, payload)
    }

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        lock(&self.state).settle(self.id, delivery_tag, SettleAction::Ack)
    }

    async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        lock(&self.state).settle(self.id, delivery_tag, SettleAction::Nack { requeue })
    }

    async fn close(&self) -> Result<(), BrokerError> {
        lock(&self.state).close_channel(self.id);
        Ok(())
    }
}

/// Delivery stream returned by [`InMemoryChannel::basic_consume`].
#[derive(Debug)]
pub struct InMemoryDeliveries {
    rx: mpsc::UnboundedReceiver<Delivery>,
}

#[async_trait]
impl DeliveryStream for InMemoryDeliveries {
    async fn next_delivery(&mut self) -> Option<Result<Delivery, BrokerError>> {
        self.rx.recv().await.map(Ok)
    }
}
