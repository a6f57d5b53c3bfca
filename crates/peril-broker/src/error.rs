use thiserror::Error;

/// Errors surfaced by broker connections and channels.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The channel or its connection is no longer usable.
    #[error("channel closed")]
    ChannelClosed,
    /// Referenced exchange or queue does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Redeclaration with inequivalent settings, or another broker-side
    /// precondition rejected the call.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    /// Exclusive queue owned by another connection.
    #[error("resource locked: {0}")]
    ResourceLocked(String),
    /// Delivery tag is unknown on this channel (already settled or never
    /// delivered).
    #[error("unknown delivery tag {0}")]
    UnknownDeliveryTag(u64),
    /// Underlying transport or client library failure.
    #[error("transport error: {0}")]
    Transport(String),
}

#[cfg(test)]
mod tests {
    use super::BrokerError;

    #[test]
    fn error_messages_are_stable() {
        assert_eq!(BrokerError::ChannelClosed.to_string(), "channel closed");
        assert_eq!(
            BrokerError::UnknownDeliveryTag(4).to_string(),
            "unknown delivery tag 4"
        );
        assert_eq!(
            BrokerError::NotFound("queue 'q'".into()).to_string(),
            "not found: queue 'q'"
        );
    }
}
