use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::SecondsFormat;
use peril_broker::BrokerConnection;
use peril_codec::CborCodec;
use peril_core::events::GameLog;
use peril_core::routing::{wildcard_pattern, EXCHANGE_PERIL_TOPIC, GAME_LOG_SLUG};
use peril_core::{AckDecision, QueueType};
use peril_pubsub::{ConsumerStatsSnapshot, ConsumptionLoop, Handler, QueueProvisioner};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info};

/// Appends one line per game log to a file.
pub struct GameLogWriter {
    path: PathBuf,
    file: File,
}

impl GameLogWriter {
    pub async fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    async fn append_line(&mut self, line: &str) -> io::Result<()> {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        self.file.write_all(&bytes).await?;
        // The write only counts once it has left tokio's buffer.
        self.file.flush().await
    }
}

pub fn format_log(log: &GameLog) -> String {
    format!(
        "{} {}: {}",
        log.current_time.to_rfc3339_opts(SecondsFormat::Nanos, true),
        log.username,
        log.message
    )
}

#[async_trait]
impl Handler<GameLog> for GameLogWriter {
    async fn handle(&mut self, log: GameLog) -> AckDecision {
        match self.append_line(&format_log(&log)).await {
            Ok(()) => {
                debug!(username = %log.username, "game log written");
                AckDecision::Ack
            }
            Err(err) => {
                // Transient disk trouble; let the broker hand it back.
                error!(path = %self.path.display(), %err, "failed to write game log");
                AckDecision::NackRequeue
            }
        }
    }
}

/// Consumes the durable game-log queue into `output` until `stop` resolves
/// or the loop ends on its own.
pub async fn consume_logs<C, S>(
    provisioner: &QueueProvisioner<C>,
    output: &Path,
    stop: S,
) -> anyhow::Result<ConsumerStatsSnapshot>
where
    C: BrokerConnection,
    S: Future<Output = ()>,
{
    let writer = GameLogWriter::open(output)
        .await
        .with_context(|| format!("failed to open {}", output.display()))?;
    let subscription = provisioner.config().subscription(
        EXCHANGE_PERIL_TOPIC,
        GAME_LOG_SLUG,
        wildcard_pattern(GAME_LOG_SLUG),
        QueueType::Durable,
    );
    let mut handle = ConsumptionLoop::start(provisioner, subscription, CborCodec, writer)
        .await
        .context("failed to start game log consumer")?;
    info!(queue = handle.name(), output = %output.display(), "writing game logs");

    tokio::select! {
        _ = stop => info!("stopping game log consumer"),
        _ = handle.wait_finished() => info!("game log consumer ended"),
    }
    let stats = handle.shutdown().await;
    info!(
        received = stats.received,
        acked = stats.acked,
        discarded = stats.discarded,
        "game log consumer stopped"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use peril_broker::memory::InMemoryBroker;
    use peril_codec::{CborCodec, JsonCodec};
    use peril_core::events::GameLog;
    use peril_core::routing::{EXCHANGE_PERIL_TOPIC, QUEUE_PERIL_DLQ};
    use peril_core::AckDecision;
    use peril_pubsub::{EngineConfig, Handler, Publisher, QueueProvisioner};
    use tokio::sync::oneshot;

    use super::{consume_logs, format_log, GameLogWriter};

    fn sample_log(message: &str) -> GameLog {
        GameLog {
            current_time: Utc
                .with_ymd_and_hms(2024, 5, 1, 12, 30, 0)
                .single()
                .expect("valid time"),
            message: message.to_string(),
            username: "alice".to_string(),
        }
    }

    #[test]
    fn log_lines_keep_full_precision() {
        let line = format_log(&sample_log("took europe"));
        assert_eq!(line, "2024-05-01T12:30:00.000000000Z alice: took europe");
    }

    #[tokio::test]
    async fn writer_appends_lines() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("game.log");
        let mut writer = GameLogWriter::open(&path).await.expect("open");
        assert_eq!(writer.handle(sample_log("one")).await, AckDecision::Ack);
        assert_eq!(writer.handle(sample_log("two")).await, AckDecision::Ack);

        let contents = std::fs::read_to_string(&path).expect("read log");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].ends_with("alice: two"));
    }

    #[tokio::test]
    async fn consumes_logs_until_stopped() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("game.log");

        let broker = InMemoryBroker::new();
        let connection = Arc::new(broker.connect());
        let provisioner = QueueProvisioner::new(Arc::clone(&connection), EngineConfig::default());
        provisioner.declare_topology().await.expect("topology");

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let consumer = {
            let provisioner = provisioner.clone();
            let path = path.clone();
            tokio::spawn(async move {
                consume_logs(&provisioner, &path, async {
                    let _ = stop_rx.await;
                })
                .await
            })
        };

        // Wait for the consumer to register before publishing.
        for _ in 0..200 {
            if broker.consumer_count("game_logs") == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let mut publisher = Publisher::open(connection.as_ref()).await.expect("publisher");
        let log = sample_log("declared war");
        publisher
            .publish(EXCHANGE_PERIL_TOPIC, &log.routing_key(), &log, &CborCodec)
            .await
            .expect("publish log");
        publisher
            .publish(EXCHANGE_PERIL_TOPIC, "game_logs.bob", "not cbor", &JsonCodec)
            .await
            .expect("publish junk");

        for _ in 0..200 {
            if broker.settlements_for("game_logs").len() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        let _ = stop_tx.send(());
        let stats = consumer
            .await
            .expect("consumer task")
            .expect("consume logs");

        assert_eq!((stats.acked, stats.discarded), (1, 1));
        assert_eq!(broker.queue_depth(QUEUE_PERIL_DLQ), Some(1));
        let contents = std::fs::read_to_string(&path).expect("read log");
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("alice: declared war"));
    }

    #[tokio::test]
    async fn returns_when_the_connection_closes() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("game.log");

        let broker = InMemoryBroker::new();
        let connection = Arc::new(broker.connect());
        let provisioner = QueueProvisioner::new(Arc::clone(&connection), EngineConfig::default());
        provisioner.declare_topology().await.expect("topology");

        let consumer = {
            let provisioner = provisioner.clone();
            let path = path.clone();
            tokio::spawn(async move {
                consume_logs(&provisioner, &path, std::future::pending::<()>()).await
            })
        };
        for _ in 0..200 {
            if broker.consumer_count("game_logs") == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        connection.close();
        // No stop signal ever fires; the loop's own end must wake the caller.
        let stats = tokio::time::timeout(std::time::Duration::from_millis(200), consumer)
            .await
            .expect("consumer should return promptly")
            .expect("consumer task")
            .expect("consume logs");
        assert_eq!(stats.received, 0);
    }
}
