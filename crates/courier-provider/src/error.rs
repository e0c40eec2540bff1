use courier_core::transport::TransportError;
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error<TE: TransportError> {
    /// A required argument was missing or null. Argument errors fail
    /// locally and never reach the bus.
    #[error("missing required argument: {0}")]
    Argument(&'static str),

    /// Failed to parse a reply or a bus event payload.
    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),

    /// Failed to serialize a request.
    #[error("failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),

    /// A bus create message carried no `object` member.
    #[error("stream message missing object member")]
    MissingObject,

    /// The store replied with an error envelope.
    #[error("{0}")]
    Remote(String),

    /// The schema has no `metadata.deleted` field, so soft deletes are
    /// unsupported.
    #[error("schema '{0}' has no metadata.deleted field; delete is unsupported")]
    SoftDeleteUnsupported(String),

    /// Subject derivation failed.
    #[error("failed to build subjects: {0}")]
    Subject(#[source] courier_core::subject::Error),

    /// No reply arrived within the configured timeout.
    #[error("query timeout after {millis}ms")]
    Timeout {
        /// The configured timeout in milliseconds.
        millis: u64,

        /// The serialized query, retained for diagnostics.
        query: String,
    },

    /// The transport failed.
    #[error(transparent)]
    Transport(TE),

    /// A reply decoded cleanly but did not have the shape the operation
    /// requires.
    #[error("unexpected reply shape: {0}")]
    UnexpectedReply(&'static str),
}
