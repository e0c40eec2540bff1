use crate::Message;

use std::error::Error as StdError;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

/// Marker trait for transport errors.
pub trait TransportError: StdError + Send + Sync + 'static {}

/// Handles messages delivered to a subscription.
#[async_trait]
pub trait SubscriptionHandler: Send + Sync + 'static {
    /// Handles one delivered message.
    async fn handle(&self, message: Message);
}

/// Contract the message bus driver must satisfy.
///
/// All four methods take `&self` and must be safe to call concurrently;
/// the protocol layer shares one transport among every handler it runs.
#[async_trait]
pub trait Transport: Clone + Debug + Send + Sync + 'static {
    /// The error type for the transport.
    type Error: TransportError;

    /// Opaque handle identifying an active subscription.
    type SubscriptionId: Clone + Debug + Eq + Hash + Send + Sync + 'static;

    /// Subscribes `handler` to `subject`. Wildcard tokens (`*`, `>`) are
    /// permitted in the subject.
    async fn subscribe(
        &self,
        subject: &str,
        handler: Arc<dyn SubscriptionHandler>,
    ) -> Result<Self::SubscriptionId, Self::Error>;

    /// Releases a subscription previously returned by [`subscribe`].
    ///
    /// [`subscribe`]: Transport::subscribe
    async fn unsubscribe(&self, id: Self::SubscriptionId) -> Result<(), Self::Error>;

    /// Publishes a fire-and-forget message.
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), Self::Error>;

    /// Publishes a request and resolves with the first reply. The caller
    /// owns any timeout.
    async fn request(&self, subject: &str, payload: Bytes) -> Result<Bytes, Self::Error>;
}
