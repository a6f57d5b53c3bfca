use std::fmt;

/// Outcome a handler returns for one decoded delivery.
///
/// The consumption loop maps every variant to exactly one broker action, so
/// handlers never acknowledge deliveries themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckDecision {
    /// Positive acknowledgment; the broker removes the message.
    Ack,
    /// Negative acknowledgment without requeue; the broker drops the message
    /// or routes it to the queue's dead-letter exchange.
    NackDiscard,
    /// Negative acknowledgment with requeue; the broker redelivers at once.
    NackRequeue,
}

impl AckDecision {
    /// Whether the decision removes the message from its queue for good.
    pub fn is_terminal(self) -> bool {
        !matches!(self, AckDecision::NackRequeue)
    }

    /// The `requeue` flag of the negative acknowledgment, `None` for `Ack`.
    pub fn requeue(self) -> Option<bool> {
        match self {
            AckDecision::Ack => None,
            AckDecision::NackDiscard => Some(false),
            AckDecision::NackRequeue => Some(true),
        }
    }

    /// Stable label used in logs and counters.
    pub fn as_str(self) -> &'static str {
        match self {
            AckDecision::Ack => "ack",
            AckDecision::NackDiscard => "nack_discard",
            AckDecision::NackRequeue => "nack_requeue",
        }
    }
}

impl fmt::Display for AckDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
