use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of a wire error envelope. Only the message survives the wire.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ErrorBody {
    /// Human-readable error message.
    pub message: String,
}

/// Response envelope carried on every reply subject.
///
/// Exactly one of `result` or `error` is present in the serialized form.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Envelope {
    /// Successful result, `{"result": ...}`.
    Result {
        /// The wrapped value.
        result: Value,
    },

    /// Failure, `{"error": {"message": ...}}`.
    Error {
        /// The wrapped error body.
        error: ErrorBody,
    },
}

impl Envelope {
    /// Wraps a successful value.
    #[must_use]
    pub const fn result(value: Value) -> Self {
        Self::Result { result: value }
    }

    /// Wraps an error; only its display message is kept.
    #[must_use]
    pub fn error(err: &dyn std::fmt::Display) -> Self {
        Self::Error {
            error: ErrorBody {
                message: err.to_string(),
            },
        }
    }

    /// Serializes the envelope to wire bytes.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    /// Parses an envelope from wire bytes.
    ///
    /// # Errors
    /// Returns an error if the bytes are not a valid envelope.
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Serializes a request record to wire bytes.
///
/// Field order is stable per record so both ends of a test scenario see
/// identical payloads.
///
/// # Errors
/// Returns an error if serialization fails.
pub fn encode_request<T: Serialize>(request: &T) -> Result<Bytes, serde_json::Error> {
    serde_json::to_vec(request).map(Bytes::from)
}

/// `count` request payload.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct CountRequest {
    /// Query conditions.
    #[serde(default)]
    pub conditions: Value,
}

/// `create` request payload. The object may be a single document or an
/// array of documents.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CreateRequest {
    /// Document(s) to create.
    pub object: Value,

    /// Field selection applied to the created document(s).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection: Option<Value>,
}

/// `find` request payload.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct FindRequest {
    /// Query conditions.
    #[serde(default)]
    pub conditions: Value,

    /// Field selection applied to the result documents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection: Option<Value>,

    /// Query options such as `limit` and `skip`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

/// `update` request payload.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct UpdateRequest {
    /// Query conditions selecting the documents to update.
    #[serde(default)]
    pub conditions: Value,

    /// Update document or operators.
    pub object: Value,

    /// Field selection applied to the update result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection: Option<Value>,

    /// Query options. Ignored by stores for multiplicity: `multi` is
    /// always forced server-side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}
