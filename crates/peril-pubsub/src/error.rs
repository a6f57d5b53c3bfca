use peril_broker::BrokerError;
use peril_codec::CodecError;
use peril_core::CoreError;
use thiserror::Error;

/// Failure while provisioning or starting a subscription. Never retried.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("invalid subscription: {0}")]
    InvalidSubscription(#[from] CoreError),
    #[error("failed to open channel: {0}")]
    OpenChannel(#[source] BrokerError),
    #[error("failed to declare exchange '{exchange}': {source}")]
    DeclareExchange {
        exchange: String,
        source: BrokerError,
    },
    #[error("failed to declare queue '{queue}': {source}")]
    DeclareQueue { queue: String, source: BrokerError },
    #[error("failed to bind queue '{queue}' to '{exchange}' with key '{routing_key}': {source}")]
    Bind {
        queue: String,
        exchange: String,
        routing_key: String,
        source: BrokerError,
    },
    #[error("failed to set prefetch {prefetch} for queue '{queue}': {source}")]
    Qos {
        queue: String,
        prefetch: u16,
        source: BrokerError,
    },
    #[error("failed to start consumer on queue '{queue}': {source}")]
    Consume { queue: String, source: BrokerError },
}

impl SetupError {
    /// Short name of the setup step that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            SetupError::InvalidSubscription(_) => "validate",
            SetupError::OpenChannel(_) => "open_channel",
            SetupError::DeclareExchange { .. } => "declare_exchange",
            SetupError::DeclareQueue { .. } => "declare_queue",
            SetupError::Bind { .. } => "bind",
            SetupError::Qos { .. } => "qos",
            SetupError::Consume { .. } => "consume",
        }
    }

    /// Broker error behind this failure, if the broker rejected a call.
    pub fn broker_error(&self) -> Option<&BrokerError> {
        match self {
            SetupError::InvalidSubscription(_) => None,
            SetupError::OpenChannel(source)
            | SetupError::DeclareExchange { source, .. }
            | SetupError::DeclareQueue { source, .. }
            | SetupError::Bind { source, .. }
            | SetupError::Qos { source, .. }
            | SetupError::Consume { source, .. } => Some(source),
        }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to encode message: {0}")]
    Encode(#[from] CodecError),
    #[error("failed to publish message: {0}")]
    Transport(#[from] BrokerError),
}

#[cfg(test)]
mod tests {
    use peril_broker::BrokerError;
    use peril_core::CoreError;

    use super::SetupError;

    #[test]
    fn stage_names_the_failing_step() {
        let err = SetupError::Bind {
            queue: "q".into(),
            exchange: "x".into(),
            routing_key: "k".into(),
            source: BrokerError::NotFound("exchange 'x'".into()),
        };
        assert_eq!(err.stage(), "bind");
        assert_eq!(
            err.broker_error(),
            Some(&BrokerError::NotFound("exchange 'x'".into()))
        );
        assert!(err.to_string().contains("'q' to 'x'"));

        let err = SetupError::from(CoreError::InvalidInput("prefetch must be non-zero"));
        assert_eq!(err.stage(), "validate");
        assert!(err.broker_error().is_none());
    }
}
