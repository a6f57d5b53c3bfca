use std::future::Future;

use async_trait::async_trait;
use peril_core::AckDecision;

/// Application callback invoked once per decoded delivery.
///
/// The handler only sees the decoded value. It cannot reach the delivery tag
/// or the channel, so the consumption loop stays the single place that
/// acknowledges. Handlers that need to publish own their own
/// [`crate::Publisher`].
#[async_trait]
pub trait Handler<T>: Send + 'static
where
    T: Send + 'static,
{
    async fn handle(&mut self, value: T) -> AckDecision;
}

#[async_trait]
impl<T, F, Fut> Handler<T> for F
where
    T: Send + 'static,
    F: FnMut(T) -> Fut + Send + 'static,
    Fut: Future<Output = AckDecision> + Send,
{
    async fn handle(&mut self, value: T) -> AckDecision {
        (self)(value).await
    }
}
