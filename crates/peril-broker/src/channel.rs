use async_trait::async_trait;
use peril_core::QueueFlags;

use crate::error::BrokerError;
use crate::types::{DeclaredQueue, Delivery, ExchangeKind, PublishProperties, QueueArguments};

/// A process-wide broker connection; only used to open channels.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    type Channel: BrokerChannel;

    /// Opens a new channel owned exclusively by the caller.
    async fn open_channel(&self) -> Result<Self::Channel, BrokerError>;
}

/// A broker channel. One publisher or one consumption loop owns each channel.
#[async_trait]
pub trait BrokerChannel: Send + Sync + 'static {
    type Deliveries: DeliveryStream;

    async fn exchange_declare(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError>;

    async fn queue_declare(
        &self,
        queue: &str,
        flags: QueueFlags,
        arguments: &QueueArguments,
    ) -> Result<DeclaredQueue, BrokerError>;

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError>;

    /// Caps unacknowledged deliveries handed to this channel.
    async fn basic_qos(&self, prefetch_count: u16, global: bool) -> Result<(), BrokerError>;

    /// Starts a manual-acknowledgment consumer on `queue`.
    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<Self::Deliveries, BrokerError>;

    /// Fire-and-forget publish; no publisher confirm is awaited.
    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: &PublishProperties,
        payload: &[u8],
    ) -> Result<(), BrokerError>;

    /// Acknowledges a single delivery.
    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), BrokerError>;

    /// Rejects a single delivery, optionally requeueing it.
    async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;
}

/// Stream of deliveries produced by `basic_consume`.
///
/// `None` means the consumer was closed by the broker, the channel, or the
/// connection.
#[async_trait]
pub trait DeliveryStream: Send + 'static {
    async fn next_delivery(&mut self) -> Option<Result<Delivery, BrokerError>>;
}
