use peril_broker::{BrokerChannel, BrokerConnection, BrokerError, PublishProperties};
use peril_codec::Codec;
use serde::Serialize;
use tracing::trace;

use crate::error::{PublishError, SetupError};

/// Emits encoded events on a channel it owns exclusively.
///
/// `publish` takes `&mut self`, so one publisher is never driven from two
/// places at once. Open one publisher per task that needs to publish.
pub struct Publisher<Ch> {
    channel: Ch,
}

impl<Ch: BrokerChannel> Publisher<Ch> {
    /// Opens a new channel on `connection` for this publisher.
    pub async fn open<C>(connection: &C) -> Result<Self, SetupError>
    where
        C: BrokerConnection<Channel = Ch>,
    {
        let channel = connection
            .open_channel()
            .await
            .map_err(SetupError::OpenChannel)?;
        Ok(Self { channel })
    }

    /// Wraps a channel the caller already opened.
    pub fn new(channel: Ch) -> Self {
        Self { channel }
    }

    /// Encodes `value` with `codec` and publishes it without waiting for a
    /// broker confirm. Errors are returned as-is; nothing is retried.
    pub async fn publish<T, K>(
        &mut self,
        exchange: &str,
        routing_key: &str,
        value: &T,
        codec: &K,
    ) -> Result<(), PublishError>
    where
        T: Serialize + ?Sized,
        K: Codec,
    {
        let payload = codec.encode(value)?;
        let properties = PublishProperties::with_content_type(codec.content_type());
        self.channel
            .basic_publish(exchange, routing_key, &properties, &payload)
            .await?;
        trace!(exchange, routing_key, bytes = payload.len(), "published");
        Ok(())
    }

    pub async fn close(self) -> Result<(), BrokerError> {
        self.channel.close().await
    }
}
