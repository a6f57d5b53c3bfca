//! Generic publish/consume engine for Peril.
//!
//! [`QueueProvisioner`] declares dead-lettered queues, [`Publisher`] emits
//! encoded events, and [`ConsumptionLoop`] drives one subscription: it decodes
//! each delivery, asks a [`Handler`] for an [`AckDecision`], and applies
//! exactly one acknowledgment action per delivery.
//!
//! [`AckDecision`]: peril_core::AckDecision

pub mod config;
pub mod consume;
pub mod error;
pub mod handler;
pub mod provision;
pub mod publish;
pub mod stats;

pub use config::EngineConfig;
pub use consume::{ConsumptionLoop, SubscriptionHandle};
pub use error::{PublishError, SetupError};
pub use handler::Handler;
pub use provision::QueueProvisioner;
pub use publish::Publisher;
pub use stats::ConsumerStatsSnapshot;
