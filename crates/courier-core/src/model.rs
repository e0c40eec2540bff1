use std::error::Error as StdError;

use async_trait::async_trait;
use serde_json::Value;

/// Marker trait for model errors.
pub trait ModelError: StdError + Send + Sync + 'static {}

/// Options forwarded to [`Model::update`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateOptions {
    /// Field selection applied to the update result.
    pub select: Option<Value>,

    /// Whether the update applies to every matching document. Stores force
    /// this on; callers cannot override it through the wire payload.
    pub multi: bool,
}

/// Contract a pluggable data model must satisfy.
///
/// A store builds its model once at construction and dispatches every
/// decoded request to it.
#[async_trait]
pub trait Model: Send + Sync + 'static {
    /// The error type for the model.
    type Error: ModelError;

    /// Counts the documents matching `conditions`.
    async fn count(&self, conditions: Value) -> Result<i64, Self::Error>;

    /// Creates one document, or several when `object` is an array. The
    /// model is contractually required to handle both shapes.
    async fn create(&self, object: Value, projection: Option<Value>)
        -> Result<Value, Self::Error>;

    /// Finds the documents matching `conditions`.
    async fn find(
        &self,
        conditions: Value,
        projection: Option<Value>,
        options: Option<Value>,
    ) -> Result<Vec<Value>, Self::Error>;

    /// Applies `object` to the documents matching `conditions`.
    async fn update(
        &self,
        conditions: Value,
        object: Value,
        options: UpdateOptions,
    ) -> Result<Value, Self::Error>;
}
