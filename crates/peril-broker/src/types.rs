use peril_core::routing::topic_matches;
use peril_core::QueueFlags;

/// Queue argument naming the exchange that receives rejected messages.
pub const ARG_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";

/// Routing behavior of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    /// Exact routing-key match.
    Direct,
    /// Dot-separated pattern match with `*` and `#` wildcards.
    Topic,
    /// Every bound queue, routing key ignored.
    Fanout,
}

impl ExchangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Fanout => "fanout",
        }
    }

    /// Whether a message published with `routing_key` reaches a binding
    /// declared with `binding_key`.
    pub fn routes(self, binding_key: &str, routing_key: &str) -> bool {
        match self {
            ExchangeKind::Direct => binding_key == routing_key,
            ExchangeKind::Topic => topic_matches(binding_key, routing_key),
            ExchangeKind::Fanout => true,
        }
    }
}

/// Optional queue-declare arguments understood by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueArguments {
    pub dead_letter_exchange: Option<String>,
}

impl QueueArguments {
    pub fn with_dead_letter_exchange(exchange: impl Into<String>) -> Self {
        Self {
            dead_letter_exchange: Some(exchange.into()),
        }
    }
}

/// Broker reply to a successful queue declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredQueue {
    pub name: String,
    pub flags: QueueFlags,
    pub message_count: u32,
    pub consumer_count: u32,
}

/// Per-message properties attached at publish time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishProperties {
    pub content_type: Option<String>,
}

impl PublishProperties {
    pub fn with_content_type(content_type: impl Into<String>) -> Self {
        Self {
            content_type: Some(content_type.into()),
        }
    }
}

/// One message handed to a consumer in manual-acknowledgment mode.
///
/// Not `Clone`: a delivery is owned by exactly one processing step until it
/// is settled.
#[derive(Debug, PartialEq, Eq)]
pub struct Delivery {
    /// Channel-scoped handle used to acknowledge or reject this delivery.
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    /// Set when the broker has delivered this message before.
    pub redelivered: bool,
    pub content_type: Option<String>,
    pub payload: Vec<u8>,
}
