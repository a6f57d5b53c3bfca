use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Unacknowledged-delivery window used when a subscription does not set one.
pub const DEFAULT_PREFETCH: u16 = 10;

/// Durability policy of a subscriber queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueType {
    /// Survives broker restarts; shared between connections.
    Durable,
    /// Deleted when unused; owned by the declaring connection.
    Transient,
}

/// Broker-side flags sent with a queue declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueFlags {
    pub durable: bool,
    pub auto_delete: bool,
    pub exclusive: bool,
}

impl QueueType {
    /// Derives all three declare flags from the queue type in one place.
    pub fn declare_flags(self) -> QueueFlags {
        let durable = self == QueueType::Durable;
        QueueFlags {
            durable,
            auto_delete: !durable,
            exclusive: !durable,
        }
    }
}

/// Everything needed to provision and consume one queue.
///
/// Built once by the caller and moved into the consumption loop, which never
/// mutates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    exchange: String,
    queue: String,
    routing_key: String,
    queue_type: QueueType,
    prefetch: u16,
}

impl Subscription {
    pub fn new(
        exchange: impl Into<String>,
        queue: impl Into<String>,
        routing_key: impl Into<String>,
        queue_type: QueueType,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            queue: queue.into(),
            routing_key: routing_key.into(),
            queue_type,
            prefetch: DEFAULT_PREFETCH,
        }
    }

    /// Overrides the unacknowledged-delivery window.
    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    pub fn prefetch(&self) -> u16 {
        self.prefetch
    }

    /// Rejects descriptors the engine cannot consume safely.
    ///
    /// A zero prefetch means "unlimited" to the broker and would remove the
    /// only backpressure the loop has.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.exchange.is_empty() {
            return Err(CoreError::InvalidInput("exchange must not be empty"));
        }
        if self.queue.is_empty() {
            return Err(CoreError::InvalidInput("queue name must not be empty"));
        }
        if self.prefetch == 0 {
            return Err(CoreError::InvalidInput("prefetch must be non-zero"));
        }
        Ok(())
    }
}
