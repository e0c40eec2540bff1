//! In-memory implementation of the courier model contract.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod query;

pub use error::Error;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use courier_core::model::{Model, UpdateOptions};
use courier_core::schema::Schema;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

/// An in-memory data model.
///
/// Documents live in a vector behind a mutex; `_id` values are assigned
/// from a per-model counter when absent. Supports the condition and
/// update operators the protocol layer emits; see [`Error`] for the
/// rejected input shapes.
#[derive(Clone, Debug, Default)]
pub struct MemoryModel {
    documents: Arc<Mutex<Vec<Map<String, Value>>>>,
    next_id: Arc<AtomicU64>,
}

impl MemoryModel {
    /// Creates an empty model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty model for `schema`. The schema does not constrain
    /// the stored documents; this constructor exists so the model can be
    /// used directly as a store's `build_model`.
    #[must_use]
    pub fn for_schema(_schema: &Schema) -> Self {
        Self::new()
    }

    fn now_millis() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }

    fn conditions_object(conditions: &Value) -> Result<Map<String, Value>, Error> {
        match conditions {
            Value::Null => Ok(Map::new()),
            Value::Object(object) => Ok(object.clone()),
            _ => Err(Error::InvalidConditions),
        }
    }

    async fn insert_one(
        &self,
        object: &Value,
        projection: Option<&Value>,
    ) -> Result<Value, Error> {
        let Some(fields) = object.as_object() else {
            return Err(Error::InvalidDocument);
        };

        let mut document = fields.clone();
        document.entry("_id".to_owned()).or_insert_with(|| {
            Value::from(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
        });

        let projected = query::project(&document, projection);
        self.documents.lock().await.push(document);
        Ok(Value::Object(projected))
    }
}

#[async_trait]
impl Model for MemoryModel {
    type Error = Error;

    async fn count(&self, conditions: Value) -> Result<i64, Error> {
        let conditions = Self::conditions_object(&conditions)?;
        let documents = self.documents.lock().await;
        let count = documents
            .iter()
            .filter(|doc| query::matches(&conditions, doc))
            .count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    async fn create(&self, object: Value, projection: Option<Value>) -> Result<Value, Error> {
        match object {
            Value::Array(objects) => {
                let mut created = Vec::with_capacity(objects.len());
                for object in &objects {
                    created.push(self.insert_one(object, projection.as_ref()).await?);
                }
                Ok(Value::Array(created))
            }
            object => self.insert_one(&object, projection.as_ref()).await,
        }
    }

    async fn find(
        &self,
        conditions: Value,
        projection: Option<Value>,
        options: Option<Value>,
    ) -> Result<Vec<Value>, Error> {
        let conditions = Self::conditions_object(&conditions)?;
        let skip = options
            .as_ref()
            .and_then(|o| o.get("skip"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let limit = options
            .as_ref()
            .and_then(|o| o.get("limit"))
            .and_then(Value::as_u64)
            .unwrap_or(u64::MAX);

        let documents = self.documents.lock().await;
        Ok(documents
            .iter()
            .filter(|doc| query::matches(&conditions, doc))
            .skip(usize::try_from(skip).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .map(|doc| Value::Object(query::project(doc, projection.as_ref())))
            .collect())
    }

    async fn update(
        &self,
        conditions: Value,
        object: Value,
        options: UpdateOptions,
    ) -> Result<Value, Error> {
        let conditions = Self::conditions_object(&conditions)?;
        let Some(update) = object.as_object() else {
            return Err(Error::InvalidUpdate);
        };

        let now = Self::now_millis();
        let mut updated = Vec::new();
        let mut documents = self.documents.lock().await;
        for document in documents.iter_mut() {
            if !query::matches(&conditions, document) {
                continue;
            }
            query::apply_update(document, update, now);
            updated.push(Value::Object(query::project(
                document,
                options.select.as_ref(),
            )));
            if !options.multi {
                break;
            }
        }

        Ok(serde_json::json!({"matched": updated.len(), "documents": updated}))
    }
}
