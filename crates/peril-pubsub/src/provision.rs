use std::sync::Arc;

use peril_broker::{BrokerChannel, BrokerConnection, DeclaredQueue, ExchangeKind, QueueArguments};
use peril_core::routing::{EXCHANGE_PERIL_DIRECT, EXCHANGE_PERIL_TOPIC, QUEUE_PERIL_DLQ};
use peril_core::QueueType;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::SetupError;

/// Declares queues and exchanges on the shared connection.
///
/// Every queue it declares carries the configured dead-letter exchange, so
/// deliveries rejected without requeue are rerouted by the broker.
pub struct QueueProvisioner<C> {
    connection: Arc<C>,
    config: EngineConfig,
}

impl<C> Clone for QueueProvisioner<C> {
    fn clone(&self) -> Self {
        Self {
            connection: Arc::clone(&self.connection),
            config: self.config.clone(),
        }
    }
}

impl<C: BrokerConnection> QueueProvisioner<C> {
    pub fn new(connection: Arc<C>, config: EngineConfig) -> Self {
        Self { connection, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn connection(&self) -> &Arc<C> {
        &self.connection
    }

    /// Opens a fresh channel, declares `queue` with flags derived from
    /// `queue_type`, and binds it to `exchange` under `routing_key`.
    ///
    /// The returned channel belongs to the caller. On declare or bind
    /// failure it is closed before the error is returned.
    pub async fn declare_and_bind(
        &self,
        exchange: &str,
        queue: &str,
        routing_key: &str,
        queue_type: QueueType,
    ) -> Result<(C::Channel, DeclaredQueue), SetupError> {
        let channel = self
            .connection
            .open_channel()
            .await
            .map_err(SetupError::OpenChannel)?;

        let arguments =
            QueueArguments::with_dead_letter_exchange(self.config.dead_letter_exchange.as_str());
        let declared = match channel
            .queue_declare(queue, queue_type.declare_flags(), &arguments)
            .await
        {
            Ok(declared) => declared,
            Err(source) => {
                close_quietly(&channel).await;
                return Err(SetupError::DeclareQueue {
                    queue: queue.to_string(),
                    source,
                });
            }
        };

        if let Err(source) = channel
            .queue_bind(&declared.name, exchange, routing_key)
            .await
        {
            close_quietly(&channel).await;
            return Err(SetupError::Bind {
                queue: declared.name,
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                source,
            });
        }

        debug!(
            queue = %declared.name,
            exchange,
            routing_key,
            ?queue_type,
            "queue declared and bound"
        );
        Ok((channel, declared))
    }

    /// Declares a durable exchange on a short-lived channel.
    pub async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> Result<(), SetupError> {
        let channel = self
            .connection
            .open_channel()
            .await
            .map_err(SetupError::OpenChannel)?;
        let result = declare_exchange_on(&channel, name, kind).await;
        close_quietly(&channel).await;
        result
    }

    /// Declares the game exchanges, the dead-letter exchange, and the
    /// dead-letter queue that collects everything routed to it.
    pub async fn declare_topology(&self) -> Result<(), SetupError> {
        let channel = self
            .connection
            .open_channel()
            .await
            .map_err(SetupError::OpenChannel)?;
        let result = self.declare_topology_on(&channel).await;
        close_quietly(&channel).await;
        if result.is_ok() {
            info!(
                dead_letter_exchange = %self.config.dead_letter_exchange,
                "broker topology declared"
            );
        }
        result
    }

    async fn declare_topology_on(&self, channel: &C::Channel) -> Result<(), SetupError> {
        let dlx = self.config.dead_letter_exchange.as_str();
        declare_exchange_on(channel, EXCHANGE_PERIL_DIRECT, ExchangeKind::Direct).await?;
        declare_exchange_on(channel, EXCHANGE_PERIL_TOPIC, ExchangeKind::Topic).await?;
        declare_exchange_on(channel, dlx, ExchangeKind::Fanout).await?;

        // The dead-letter queue itself must not dead-letter.
        channel
            .queue_declare(
                QUEUE_PERIL_DLQ,
                QueueType::Durable.declare_flags(),
                &QueueArguments::default(),
            )
            .await
            .map_err(|source| SetupError::DeclareQueue {
                queue: QUEUE_PERIL_DLQ.to_string(),
                source,
            })?;
        channel
            .queue_bind(QUEUE_PERIL_DLQ, dlx, "")
            .await
            .map_err(|source| SetupError::Bind {
                queue: QUEUE_PERIL_DLQ.to_string(),
                exchange: dlx.to_string(),
                routing_key: String::new(),
                source,
            })
    }
}

async fn declare_exchange_on<Ch: BrokerChannel>(
    channel: &Ch,
    name: &str,
    kind: ExchangeKind,
) -> Result<(), SetupError> {
    channel
        .exchange_declare(name, kind, true)
        .await
        .map_err(|source| SetupError::DeclareExchange {
            exchange: name.to_string(),
            source,
        })?;
    debug!(exchange = name, kind = kind.as_str(), "exchange declared");
    Ok(())
}

async fn close_quietly<Ch: BrokerChannel>(channel: &Ch) {
    if let Err(err) = channel.close().await {
        warn!(%err, "failed to close channel after setup");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use peril_broker::memory::{InMemoryBroker, InMemoryConnection};
    use peril_broker::{BrokerError, ExchangeKind};
    use peril_core::routing::{EXCHANGE_PERIL_TOPIC, QUEUE_PERIL_DLQ};
    use peril_core::{QueueFlags, QueueType};

    use super::QueueProvisioner;
    use crate::config::EngineConfig;
    use crate::error::SetupError;

    fn provisioner(broker: &InMemoryBroker) -> QueueProvisioner<InMemoryConnection> {
        QueueProvisioner::new(Arc::new(broker.connect()), EngineConfig::default())
    }

    #[tokio::test]
    async fn declares_queue_with_dead_letter_argument() {
        let broker = InMemoryBroker::new();
        let prov = provisioner(&broker);
        prov.declare_topology().await.expect("topology");

        let (channel, declared) = prov
            .declare_and_bind(
                EXCHANGE_PERIL_TOPIC,
                "army_moves.bob",
                "army_moves.*",
                QueueType::Transient,
            )
            .await
            .expect("declare and bind");
        assert!(channel.is_open());
        assert_eq!(declared.name, "army_moves.bob");
        assert_eq!(
            declared.flags,
            QueueFlags {
                durable: false,
                auto_delete: true,
                exclusive: true,
            }
        );
        let args = broker.queue_arguments("army_moves.bob").expect("queue exists");
        assert_eq!(args.dead_letter_exchange.as_deref(), Some("peril_dlx"));
    }

    #[tokio::test]
    async fn topology_creates_undeadlettered_dlq() {
        let broker = InMemoryBroker::new();
        let prov = provisioner(&broker);
        prov.declare_topology().await.expect("topology");
        // Idempotent.
        prov.declare_topology().await.expect("second topology");

        assert!(broker.queue_exists(QUEUE_PERIL_DLQ));
        let args = broker.queue_arguments(QUEUE_PERIL_DLQ).expect("dlq");
        assert!(args.dead_letter_exchange.is_none());
        // Topology channels are short-lived.
        assert!(broker.channel_stats().iter().all(|c| !c.open));
    }

    #[tokio::test]
    async fn bind_failure_closes_the_new_channel() {
        let broker = InMemoryBroker::new();
        let prov = provisioner(&broker);

        let err = prov
            .declare_and_bind("missing", "q", "k", QueueType::Durable)
            .await
            .err()
            .expect("bind should fail");
        assert!(matches!(err, SetupError::Bind { .. }));
        assert!(matches!(err.broker_error(), Some(BrokerError::NotFound(_))));
        assert!(broker.channel_stats().iter().all(|c| !c.open));
    }

    #[tokio::test]
    async fn exchange_redeclare_with_other_kind_fails() {
        let broker = InMemoryBroker::new();
        let prov = provisioner(&broker);
        prov.declare_exchange("x", ExchangeKind::Direct)
            .await
            .expect("first declare");
        let err = prov
            .declare_exchange("x", ExchangeKind::Topic)
            .await
            .err()
            .expect("kind mismatch");
        assert_eq!(err.stage(), "declare_exchange");
    }

    #[tokio::test]
    async fn closed_connection_fails_to_open_channel() {
        let broker = InMemoryBroker::new();
        let connection = Arc::new(broker.connect());
        connection.close();
        let prov = QueueProvisioner::new(connection, EngineConfig::default());
        let err = prov.declare_topology().await.err().expect("closed");
        assert!(matches!(err, SetupError::OpenChannel(BrokerError::ChannelClosed)));
    }
}
