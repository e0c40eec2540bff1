use courier_core::transport::TransportError;
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The reply channel for a request was dropped before a reply arrived.
    #[error("request dropped without a reply")]
    NoReply,
}

impl TransportError for Error {}
