//! Contracts and wire types for the courier CRUD protocol layer.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Request records and the response envelope.
pub mod envelope;

/// Data-model contract consumed by stores.
pub mod model;

/// Schemas drive subject naming and tombstone policy.
pub mod schema;

/// Subjects are named channels for messages.
pub mod subject;

/// Message-bus contract consumed by providers and stores.
pub mod transport;

use bytes::Bytes;

/// A message delivered to a subscription handler.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message {
    /// Subject the message was delivered on.
    pub subject: String,

    /// Raw payload.
    pub payload: Bytes,

    /// Reply subject for request/reply exchanges.
    pub reply: Option<String>,
}
