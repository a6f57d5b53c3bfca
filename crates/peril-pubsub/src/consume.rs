use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use peril_broker::{BrokerChannel, BrokerConnection, Delivery, DeliveryStream};
use peril_codec::Codec;
use peril_core::{AckDecision, Subscription};
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::error::SetupError;
use crate::handler::Handler;
use crate::provision::QueueProvisioner;
use crate::stats::{ConsumerStats, ConsumerStatsSnapshot};

/// Entry point for consuming one subscription.
pub struct ConsumptionLoop;

impl ConsumptionLoop {
    /// Provisions the subscription's queue, starts a manual-ack consumer on
    /// a channel owned by the loop, and spawns the loop task.
    ///
    /// Returns once the consumer is registered; setup failures are returned
    /// here and never retried. Must be called inside a tokio runtime.
    pub async fn start<C, T, K, H>(
        provisioner: &QueueProvisioner<C>,
        subscription: Subscription,
        codec: K,
        handler: H,
    ) -> Result<SubscriptionHandle, SetupError>
    where
        C: BrokerConnection,
        T: DeserializeOwned + Send + 'static,
        K: Codec,
        H: Handler<T>,
    {
        subscription.validate()?;

        let (channel, declared) = provisioner
            .declare_and_bind(
                subscription.exchange(),
                subscription.queue(),
                subscription.routing_key(),
                subscription.queue_type(),
            )
            .await?;
        let queue = declared.name;

        if let Err(source) = channel.basic_qos(subscription.prefetch(), false).await {
            close_channel(&channel).await;
            return Err(SetupError::Qos {
                queue,
                prefetch: subscription.prefetch(),
                source,
            });
        }

        let deliveries = match channel.basic_consume(&queue, "").await {
            Ok(deliveries) => deliveries,
            Err(source) => {
                close_channel(&channel).await;
                return Err(SetupError::Consume { queue, source });
            }
        };

        let stats = Arc::new(ConsumerStats::default());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let worker = LoopWorker {
            channel,
            codec,
            handler,
            stats: Arc::clone(&stats),
        };
        let span = info_span!("consume", queue = %queue);
        let task = tokio::spawn(worker.run::<T, _>(deliveries, shutdown_rx).instrument(span));

        info!(
            queue = %queue,
            exchange = subscription.exchange(),
            routing_key = subscription.routing_key(),
            prefetch = subscription.prefetch(),
            "subscription started"
        );
        Ok(SubscriptionHandle {
            name: queue,
            stats,
            shutdown_tx: Some(shutdown_tx),
            task,
            outcome: None,
        })
    }
}

/// Owner-side handle to a running consumption loop.
///
/// Dropping the handle detaches the loop; it keeps running until its
/// delivery stream ends.
pub struct SubscriptionHandle {
    name: String,
    stats: Arc<ConsumerStats>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<ConsumerStatsSnapshot>,
    outcome: Option<ConsumerStatsSnapshot>,
}

impl SubscriptionHandle {
    /// Queue name the loop consumes from.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> ConsumerStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some() || self.task.is_finished()
    }

    /// Resolves when the loop has ended, without giving up the handle.
    ///
    /// Cancel-safe, so it can sit in a `select!` next to a stop signal.
    pub async fn wait_finished(&mut self) -> ConsumerStatsSnapshot {
        if let Some(snapshot) = self.outcome {
            return snapshot;
        }
        let snapshot = match (&mut self.task).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                error!(queue = %self.name, %err, "consumption loop task failed");
                self.stats.snapshot()
            }
        };
        self.outcome = Some(snapshot);
        snapshot
    }

    /// Waits for the loop to end on its own, e.g. after the connection closes.
    pub async fn join(mut self) -> ConsumerStatsSnapshot {
        self.wait_finished().await
    }

    /// Asks the loop to stop before its next delivery and waits for it.
    ///
    /// A delivery already being handled is settled first.
    pub async fn shutdown(mut self) -> ConsumerStatsSnapshot {
        if let Some(tx) = self.shutdown_tx.take() {
            // Err means the loop already ended.
            let _ = tx.send(());
        }
        self.join().await
    }
}

struct LoopWorker<Ch, K, H> {
    channel: Ch,
    codec: K,
    handler: H,
    stats: Arc<ConsumerStats>,
}

impl<Ch, K, H> LoopWorker<Ch, K, H>
where
    Ch: BrokerChannel,
    K: Codec,
{
    async fn run<T, D>(
        mut self,
        mut deliveries: D,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) -> ConsumerStatsSnapshot
    where
        T: DeserializeOwned + Send + 'static,
        H: Handler<T>,
        D: DeliveryStream,
    {
        let mut detached = false;
        loop {
            let next = tokio::select! {
                biased;
                signal = &mut shutdown_rx, if !detached => match signal {
                    Ok(()) => {
                        info!("shutdown requested");
                        break;
                    }
                    Err(_) => {
                        detached = true;
                        continue;
                    }
                },
                next = deliveries.next_delivery() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(err)) => {
                    error!(%err, "delivery stream failed");
                    break;
                }
                None => {
                    info!("delivery stream closed");
                    break;
                }
            };

            self.stats.record_received();
            let decision = self.decide::<T>(&delivery).await;
            settle(&self.channel, &self.stats, delivery, decision).await;
        }

        close_channel(&self.channel).await;
        let snapshot = self.stats.snapshot();
        info!(
            received = snapshot.received,
            settled = snapshot.settled(),
            "consumption loop finished"
        );
        snapshot
    }

    async fn decide<T>(&mut self, delivery: &Delivery) -> AckDecision
    where
        T: DeserializeOwned + Send + 'static,
        H: Handler<T>,
    {
        let value: T = match self.codec.decode(&delivery.payload) {
            Ok(value) => value,
            Err(err) => {
                self.stats.record_decode_failure();
                warn!(
                    delivery_tag = delivery.delivery_tag,
                    routing_key = %delivery.routing_key,
                    %err,
                    "undecodable delivery, discarding"
                );
                return AckDecision::NackDiscard;
            }
        };

        match AssertUnwindSafe(self.handler.handle(value))
            .catch_unwind()
            .await
        {
            Ok(decision) => decision,
            Err(_) => {
                self.stats.record_handler_panic();
                warn!(
                    delivery_tag = delivery.delivery_tag,
                    routing_key = %delivery.routing_key,
                    "handler panicked, discarding"
                );
                AckDecision::NackDiscard
            }
        }
    }
}

/// Applies exactly one acknowledgment action and consumes the delivery.
async fn settle<Ch: BrokerChannel>(
    channel: &Ch,
    stats: &ConsumerStats,
    delivery: Delivery,
    decision: AckDecision,
) {
    let tag = delivery.delivery_tag;
    let result = match decision.requeue() {
        None => channel.basic_ack(tag).await,
        Some(requeue) => channel.basic_nack(tag, requeue).await,
    };
    match result {
        Ok(()) => {
            stats.record_settled(decision);
            debug!(delivery_tag = tag, %decision, "settled");
        }
        Err(err) => {
            stats.record_settle_failure();
            error!(delivery_tag = tag, %decision, %err, "settle failed");
        }
    }
}

async fn close_channel<Ch: BrokerChannel>(channel: &Ch) {
    if let Err(err) = channel.close().await {
        debug!(%err, "channel close failed");
    }
}
