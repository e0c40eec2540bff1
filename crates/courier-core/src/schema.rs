use serde_json::Value;
use thiserror::Error;

/// Errors that can occur validating a schema.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// Schema name is empty.
    #[error("schema name must not be empty")]
    EmptyName,
}

/// Placeholder type references handed to functional field definitions.
///
/// Field maps that need to reference other types receive one of these at
/// schema construction and are evaluated exactly once.
#[derive(Clone, Copy, Debug, Default)]
pub struct TypeRefs;

impl TypeRefs {
    /// An opaque placeholder standing in for a reference to `name`.
    #[must_use]
    pub fn reference(&self, name: &str) -> Value {
        Value::String(format!("$ref:{name}"))
    }
}

/// A named schema.
///
/// Only the name and the presence of a `metadata.deleted` field influence
/// the protocol layer: the name derives the wire subjects and the field
/// enables the tombstone policy.
#[derive(Clone, Debug)]
pub struct Schema {
    name: String,
    fields: Value,
}

impl Schema {
    /// Creates a schema from a literal field map.
    ///
    /// # Errors
    /// Returns an error if the name is empty.
    pub fn new(name: impl Into<String>, fields: Value) -> Result<Self, Error> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::EmptyName);
        }
        Ok(Self { name, fields })
    }

    /// Creates a schema from a functional field definition, evaluated once
    /// with placeholder type references.
    ///
    /// # Errors
    /// Returns an error if the name is empty.
    pub fn resolve<F>(name: impl Into<String>, fields: F) -> Result<Self, Error>
    where
        F: FnOnce(&TypeRefs) -> Value,
    {
        Self::new(name, fields(&TypeRefs))
    }

    /// The schema name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The resolved field map.
    #[must_use]
    pub const fn fields(&self) -> &Value {
        &self.fields
    }

    /// Whether the schema declares `metadata.deleted` and so participates
    /// in the soft-delete policy.
    #[must_use]
    pub fn soft_delete(&self) -> bool {
        self.fields
            .get("metadata")
            .and_then(|metadata| metadata.get("deleted"))
            .is_some_and(|deleted| !deleted.is_null())
    }
}
