use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use peril_broker::BrokerConnection;
use peril_broker_amqp::AmqpConnection;
use peril_codec::JsonCodec;
use peril_core::events::PlayingState;
use peril_core::routing::{EXCHANGE_PERIL_DIRECT, PAUSE_KEY};
use peril_pubsub::{Publisher, QueueProvisioner};
use tracing::{info, warn};

mod config;
mod logs;

use config::ServerConfig;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (TOML, YAML, JSON, or .env)
    #[arg(long, short)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Declare the game exchanges and the dead-letter queue
    Topology,
    /// Tell every client the game is paused
    Pause,
    /// Tell every client the game is running again
    Resume,
    /// Append game logs to a file until interrupted
    Logs {
        /// Overrides the configured log file
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = std::env::var("PERIL_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = ServerConfig::new(cli.config).context("failed to load configuration")?;

    let connection = Arc::new(
        AmqpConnection::connect(&config.amqp_url, &config.connection_name)
            .await
            .context("could not connect to the broker")?,
    );
    info!("peril server connected to the broker");
    let provisioner = QueueProvisioner::new(Arc::clone(&connection), config.engine_config());

    let result = match cli.command {
        Commands::Topology => provisioner
            .declare_topology()
            .await
            .context("failed to declare topology"),
        Commands::Pause => broadcast_playing_state(connection.as_ref(), true).await,
        Commands::Resume => broadcast_playing_state(connection.as_ref(), false).await,
        Commands::Logs { output } => {
            let output = output.unwrap_or_else(|| config.log_output.clone());
            logs::consume_logs(&provisioner, &output, async {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    warn!(%err, "failed to listen for ctrl-c");
                }
            })
            .await
            .map(|_| ())
        }
    };

    if let Err(err) = connection.close().await {
        warn!(%err, "failed to close broker connection");
    }
    result
}

async fn broadcast_playing_state<C: BrokerConnection>(
    connection: &C,
    is_paused: bool,
) -> anyhow::Result<()> {
    let mut publisher = Publisher::open(connection)
        .await
        .context("failed to open publisher channel")?;
    info!(is_paused, "publishing game state");
    publisher
        .publish(
            EXCHANGE_PERIL_DIRECT,
            PAUSE_KEY,
            &PlayingState { is_paused },
            &JsonCodec,
        )
        .await
        .context("failed to publish game state")?;
    publisher
        .close()
        .await
        .context("failed to close publisher channel")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["peril-server", "topology"]).unwrap();
        assert!(matches!(cli.command, Commands::Topology));
        assert!(cli.config.is_none());

        let cli =
            Cli::try_parse_from(["peril-server", "--config", "peril.toml", "pause"]).unwrap();
        assert!(matches!(cli.command, Commands::Pause));
        assert_eq!(cli.config, Some(PathBuf::from("peril.toml")));

        let cli = Cli::try_parse_from(["peril-server", "logs", "--output", "out.log"]).unwrap();
        match cli.command {
            Commands::Logs { output } => assert_eq!(output, Some(PathBuf::from("out.log"))),
            _ => panic!("expected Logs command"),
        }

        assert!(Cli::try_parse_from(["peril-server"]).is_err());
        assert!(Cli::try_parse_from(["peril-server", "quit"]).is_err());
    }

    #[tokio::test]
    async fn pause_and_resume_reach_subscribers() {
        use peril_broker::memory::InMemoryBroker;
        use peril_core::QueueType;
        use peril_pubsub::EngineConfig;

        let broker = InMemoryBroker::new();
        let connection = Arc::new(broker.connect());
        let provisioner = QueueProvisioner::new(Arc::clone(&connection), EngineConfig::default());
        provisioner.declare_topology().await.unwrap();
        let (_channel, _) = provisioner
            .declare_and_bind(
                EXCHANGE_PERIL_DIRECT,
                "pause.alice",
                PAUSE_KEY,
                QueueType::Transient,
            )
            .await
            .unwrap();

        broadcast_playing_state(connection.as_ref(), true).await.unwrap();
        broadcast_playing_state(connection.as_ref(), false).await.unwrap();
        assert_eq!(broker.queue_depth("pause.alice"), Some(2));
    }
}
