//! Broker abstractions for Peril.
//!
//! The pub/sub engine only depends on the connection, channel, and delivery
//! stream traits defined here. [`memory::InMemoryBroker`] is the reference
//! implementation used by tests; the AMQP adapter lives in
//! `peril-broker-amqp`.

pub mod channel;
pub mod error;
pub mod memory;
pub mod types;

pub use channel::{BrokerChannel, BrokerConnection, DeliveryStream};
pub use error::BrokerError;
pub use types::{
    DeclaredQueue, Delivery, ExchangeKind, PublishProperties, QueueArguments,
    ARG_DEAD_LETTER_EXCHANGE,
};
