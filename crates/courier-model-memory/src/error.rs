use courier_core::model::ModelError;
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// Conditions were not a JSON object.
    #[error("conditions must be a JSON object")]
    InvalidConditions,

    /// A document to create was not a JSON object.
    #[error("document must be a JSON object")]
    InvalidDocument,

    /// An update document was not a JSON object.
    #[error("update document must be a JSON object")]
    InvalidUpdate,
}

impl ModelError for Error {}
