use peril_core::routing::EXCHANGE_PERIL_DLX;
use peril_core::{QueueType, Subscription, DEFAULT_PREFETCH};

/// Engine-wide settings handed to [`crate::QueueProvisioner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Exchange attached to every provisioned queue as its dead-letter target.
    pub dead_letter_exchange: String,
    /// Prefetch applied by [`EngineConfig::subscription`].
    pub default_prefetch: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dead_letter_exchange: EXCHANGE_PERIL_DLX.to_string(),
            default_prefetch: DEFAULT_PREFETCH,
        }
    }
}

impl EngineConfig {
    /// Builds a subscription that uses this engine's default prefetch.
    pub fn subscription(
        &self,
        exchange: impl Into<String>,
        queue: impl Into<String>,
        routing_key: impl Into<String>,
        queue_type: QueueType,
    ) -> Subscription {
        Subscription::new(exchange, queue, routing_key, queue_type)
            .with_prefetch(self.default_prefetch)
    }
}
