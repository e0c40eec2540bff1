use courier_core::transport::TransportError;
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// Failed to publish a message.
    #[error("failed to publish message: {0}")]
    Publish(async_nats::client::PublishErrorKind),

    /// Failed to send a request.
    #[error("failed to send request: {0}")]
    Request(async_nats::client::RequestErrorKind),

    /// Failed to subscribe to a subject.
    #[error("failed to subscribe to subject")]
    Subscribe,
}

impl TransportError for Error {}
