//! Core Peril primitives shared across crates.
//!
//! Includes routing constants, subscription descriptors, acknowledgment
//! decisions, game event payloads, and base errors.

pub mod ack;
pub mod error;
pub mod events;
pub mod routing;
pub mod subscription;

pub use ack::AckDecision;
pub use error::CoreError;
pub use subscription::{QueueFlags, QueueType, Subscription, DEFAULT_PREFETCH};
