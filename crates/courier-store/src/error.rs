use std::error::Error as StdError;
use std::sync::Arc;

use courier_core::transport::TransportError;
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error<TE: TransportError> {
    /// The store is already open.
    #[error("store is already open")]
    AlreadyOpen,

    /// The store is not open.
    #[error("store is not open")]
    NotOpen,

    /// Subject derivation failed.
    #[error("failed to build subjects: {0}")]
    Subject(#[source] courier_core::subject::Error),

    /// The transport failed.
    #[error(transparent)]
    Transport(TE),
}

/// A failure while dispatching one inbound request.
///
/// Delivered to the group's error listeners and flattened to an
/// `{"error": {"message": ...}}` envelope on the reply subject; the
/// display string is the message that crosses the wire.
#[derive(Clone, Debug, Error)]
pub enum DispatchError {
    /// The inbound payload was not valid JSON.
    #[error("{0}")]
    Decode(Arc<serde_json::Error>),

    /// The model rejected the request.
    #[error("{0}")]
    Model(Arc<dyn StdError + Send + Sync>),
}
