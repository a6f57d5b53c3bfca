#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use peril_broker::memory::{InMemoryBroker, InMemoryChannel, InMemoryConnection};
use peril_pubsub::{EngineConfig, Publisher, QueueProvisioner};

pub struct Fixture {
    pub broker: InMemoryBroker,
    pub connection: Arc<InMemoryConnection>,
    pub provisioner: QueueProvisioner<InMemoryConnection>,
}

impl Fixture {
    /// Broker with the game exchanges, dead-letter exchange and queue
    /// already declared.
    pub async fn with_topology() -> Self {
        let broker = InMemoryBroker::new();
        let connection = Arc::new(broker.connect());
        let provisioner = QueueProvisioner::new(Arc::clone(&connection), EngineConfig::default());
        provisioner
            .declare_topology()
            .await
            .expect("topology should declare");
        Self {
            broker,
            connection,
            provisioner,
        }
    }

    pub async fn publisher(&self) -> Publisher<InMemoryChannel> {
        Publisher::open(self.connection.as_ref())
            .await
            .expect("publisher channel should open")
    }
}

pub async fn wait_for(mut done: impl FnMut() -> bool) {
    for _ in 0..400 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

/// Gives the loop a chance to (wrongly) process more than expected.
pub async fn settle_time() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
