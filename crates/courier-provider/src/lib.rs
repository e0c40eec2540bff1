//! Typed CRUD client for the courier protocol layer.
//!
//! A [`Provider`] translates typed CRUD calls into request/reply messages
//! on a subject-addressed bus, applies the tombstone-aware default filter
//! for schemas that declare `metadata.deleted`, re-publishes bus
//! create/update traffic to local listeners, and exposes a bidirectional
//! object stream over the create group.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod batch;
mod conditions;
mod error;
mod events;
mod exec;
mod object_stream;

pub use error::Error;
pub use events::{EventPayload, Listener, ListenerId, ProviderEvent};
pub use object_stream::ObjectDuplex;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use courier_core::envelope::{CountRequest, CreateRequest, FindRequest, UpdateRequest};
use courier_core::schema::Schema;
use courier_core::subject::{SubjectOptions, SubjectSet};
use courier_core::transport::{SubscriptionHandler, Transport};
use courier_core::Message;
use events::{Registration, Registry};
use exec::{exec, ExecOptions};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

/// Options configuring a provider.
#[derive(Clone, Debug)]
pub struct ProviderOptions {
    /// Reply deadline for acknowledged requests, in milliseconds.
    pub timeout_ms: u64,

    /// Page size for batched finds; also the default readable burst size
    /// of the object stream.
    pub batch_size: u64,

    /// Stream writes publish without awaiting replies.
    pub no_ack_stream: bool,

    /// Capacity of the readable side of the object stream. Defaults to
    /// `batch_size`.
    pub high_water_mark: Option<usize>,

    /// Subject derivation options.
    pub subjects: SubjectOptions,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            batch_size: 10,
            no_ack_stream: false,
            high_water_mark: None,
            subjects: SubjectOptions::default(),
        }
    }
}

struct ProviderInner<T: Transport> {
    schema: Schema,
    transport: T,
    subjects: SubjectSet,
    soft_delete: bool,
    default_conditions: Value,
    options: ProviderOptions,
    listeners: Mutex<Registry<T::SubscriptionId>>,
    next_listener_id: AtomicU64,
}

/// A schema-aware CRUD client bound to one schema and one transport.
///
/// Cheap to clone; clones share listener registrations.
pub struct Provider<T: Transport> {
    inner: Arc<ProviderInner<T>>,
}

impl<T: Transport> Clone for Provider<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn single_or_none(mut items: Vec<Value>) -> Option<Value> {
    if items.len() == 1 {
        items.pop()
    } else {
        None
    }
}

impl<T: Transport> Provider<T> {
    /// Creates a provider for `schema` over `transport`.
    ///
    /// # Errors
    /// Returns an error if subject derivation fails.
    pub fn new(schema: Schema, transport: T, options: ProviderOptions) -> Result<Self, Error<T::Error>> {
        let subjects = SubjectSet::build(schema.name(), &options.subjects).map_err(Error::Subject)?;
        let soft_delete = schema.soft_delete();
        let default_conditions = if soft_delete {
            conditions::default_conditions()
        } else {
            json!({})
        };

        Ok(Self {
            inner: Arc::new(ProviderInner {
                schema,
                transport,
                subjects,
                soft_delete,
                default_conditions,
                options,
                listeners: Mutex::new(Registry::default()),
                next_listener_id: AtomicU64::new(0),
            }),
        })
    }

    /// The schema this provider serves.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    /// The derived wire subjects.
    #[must_use]
    pub fn subjects(&self) -> &SubjectSet {
        &self.inner.subjects
    }

    /// Whether the schema participates in the soft-delete policy.
    #[must_use]
    pub fn soft_delete(&self) -> bool {
        self.inner.soft_delete
    }

    fn exec_options(&self) -> ExecOptions {
        ExecOptions {
            no_ack: false,
            timeout_ms: self.inner.options.timeout_ms,
        }
    }

    fn required(value: &Value, name: &'static str) -> Result<(), Error<T::Error>> {
        if value.is_null() {
            Err(Error::Argument(name))
        } else {
            Ok(())
        }
    }

    /// Counts the documents matching `conditions`, merged with the
    /// default filter.
    ///
    /// # Errors
    /// Fails locally on a null argument; otherwise propagates transport,
    /// timeout and remote errors.
    pub async fn count(&self, conditions: Value) -> Result<i64, Error<T::Error>> {
        Self::required(&conditions, "conditions")?;
        self.count_conditions(conditions::merge(&self.inner.default_conditions, &conditions))
            .await
    }

    /// Counts every document visible under the default filter.
    ///
    /// # Errors
    /// Propagates transport, timeout and remote errors.
    pub async fn count_all(&self) -> Result<i64, Error<T::Error>> {
        self.count_conditions(self.inner.default_conditions.clone())
            .await
    }

    async fn count_conditions(&self, conditions: Value) -> Result<i64, Error<T::Error>> {
        let request = CountRequest { conditions };
        let result = exec(
            &self.inner.transport,
            &self.inner.subjects.count.base,
            self.exec_options(),
            &request,
        )
        .await?;
        result
            .as_i64()
            .ok_or(Error::UnexpectedReply("count result is not an integer"))
    }

    /// Creates `object`, which may be a single document or an array of
    /// documents. The default filter is never applied here.
    ///
    /// # Errors
    /// Fails locally on a null argument; otherwise propagates transport,
    /// timeout and remote errors.
    pub async fn create(
        &self,
        object: Value,
        projection: Option<Value>,
    ) -> Result<Value, Error<T::Error>> {
        Self::required(&object, "object")?;
        let request = CreateRequest { object, projection };
        exec(
            &self.inner.transport,
            &self.inner.subjects.create.base,
            self.exec_options(),
            &request,
        )
        .await
    }

    /// Finds the documents matching `conditions` merged with the default
    /// filter, paging through the result set `batch_size` at a time.
    ///
    /// # Errors
    /// Fails locally on a null argument; otherwise propagates transport,
    /// timeout and remote errors.
    pub async fn find(
        &self,
        conditions: Value,
        projection: Option<Value>,
        options: Option<Value>,
    ) -> Result<Vec<Value>, Error<T::Error>> {
        Self::required(&conditions, "conditions")?;
        let merged = conditions::merge(&self.inner.default_conditions, &conditions);
        self.find_raw(merged, projection, options).await
    }

    /// Finds every document visible under the default filter.
    ///
    /// # Errors
    /// Propagates transport, timeout and remote errors.
    pub async fn find_all(
        &self,
        projection: Option<Value>,
        options: Option<Value>,
    ) -> Result<Vec<Value>, Error<T::Error>> {
        self.find(json!({}), projection, options).await
    }

    /// Finds one document by `_id`. Resolves `None` when the reply holds
    /// zero documents or — should the query leak past `limit: 1` — more
    /// than one.
    ///
    /// # Errors
    /// Fails locally on a null argument; otherwise propagates transport,
    /// timeout and remote errors.
    pub async fn find_by_id(
        &self,
        id: Value,
        projection: Option<Value>,
    ) -> Result<Option<Value>, Error<T::Error>> {
        Self::required(&id, "id")?;
        let merged = conditions::merge(&self.inner.default_conditions, &json!({ "_id": id }));
        let request = FindRequest {
            conditions: merged,
            projection,
            options: Some(json!({"limit": 1})),
        };
        let result = exec(
            &self.inner.transport,
            &self.inner.subjects.find.base,
            self.exec_options(),
            &request,
        )
        .await?;
        match result {
            Value::Array(items) => Ok(single_or_none(items)),
            _ => Err(Error::UnexpectedReply("find result is not an array")),
        }
    }

    /// Applies `object` to the documents matching `conditions` merged
    /// with the default filter. For soft-delete schemas the update is
    /// stamped with `$currentDate: {"metadata.updated": true}`.
    ///
    /// # Errors
    /// Fails locally on a null argument; otherwise propagates transport,
    /// timeout and remote errors.
    pub async fn update(
        &self,
        conditions: Value,
        object: Value,
        projection: Option<Value>,
        options: Option<Value>,
    ) -> Result<Value, Error<T::Error>> {
        Self::required(&conditions, "conditions")?;
        Self::required(&object, "object")?;
        let merged = conditions::merge(&self.inner.default_conditions, &conditions);
        let object = if self.inner.soft_delete {
            conditions::stamp_current_date(&object, &["metadata.updated"])
        } else {
            object
        };
        let request = UpdateRequest {
            conditions: merged,
            object,
            projection,
            options,
        };
        exec(
            &self.inner.transport,
            &self.inner.subjects.update.base,
            self.exec_options(),
            &request,
        )
        .await
    }

    /// Updates one document by `_id`, then re-reads it. Resolves `None`
    /// under the same reducer as [`find_by_id`].
    ///
    /// # Errors
    /// Fails locally on a null argument; otherwise propagates transport,
    /// timeout and remote errors.
    ///
    /// [`find_by_id`]: Provider::find_by_id
    pub async fn update_by_id(
        &self,
        id: Value,
        object: Value,
        projection: Option<Value>,
    ) -> Result<Option<Value>, Error<T::Error>> {
        Self::required(&id, "id")?;
        Self::required(&object, "object")?;
        self.update(json!({ "_id": id.clone() }), object, projection.clone(), None)
            .await?;
        self.find_by_id(id, projection).await
    }

    /// Soft-deletes the documents matching `conditions` by stamping
    /// `metadata.deleted`, then returns the tombstoned documents.
    ///
    /// # Errors
    /// Fails locally on a null argument or when the schema has no
    /// `metadata.deleted` field; otherwise propagates transport, timeout
    /// and remote errors.
    pub async fn delete(
        &self,
        conditions: Value,
        projection: Option<Value>,
    ) -> Result<Vec<Value>, Error<T::Error>> {
        if !self.inner.soft_delete {
            return Err(Error::SoftDeleteUnsupported(
                self.inner.schema.name().to_owned(),
            ));
        }
        Self::required(&conditions, "conditions")?;

        let merged = conditions::merge(&self.inner.default_conditions, &conditions);
        let request = UpdateRequest {
            conditions: merged,
            object: json!({"$currentDate": {"metadata.deleted": true, "metadata.updated": true}}),
            projection: projection.clone(),
            options: None,
        };
        exec(
            &self.inner.transport,
            &self.inner.subjects.update.base,
            self.exec_options(),
            &request,
        )
        .await?;

        // The default filter excludes tombstoned documents, so the
        // follow-up find matches the fresh tombstones directly.
        let tombstoned = conditions::merge(
            &conditions,
            &json!({"metadata.deleted": {"$exists": true}}),
        );
        self.find_raw(tombstoned, projection, None).await
    }

    /// Soft-deletes one document by `_id`. Resolves `None` under the same
    /// reducer as [`find_by_id`].
    ///
    /// # Errors
    /// Fails locally on a null argument or when the schema has no
    /// `metadata.deleted` field; otherwise propagates transport, timeout
    /// and remote errors.
    ///
    /// [`find_by_id`]: Provider::find_by_id
    pub async fn delete_by_id(
        &self,
        id: Value,
        projection: Option<Value>,
    ) -> Result<Option<Value>, Error<T::Error>> {
        Self::required(&id, "id")?;
        let deleted = self.delete(json!({ "_id": id }), projection).await?;
        Ok(single_or_none(deleted))
    }

    async fn find_raw(
        &self,
        conditions: Value,
        projection: Option<Value>,
        options: Option<Value>,
    ) -> Result<Vec<Value>, Error<T::Error>> {
        let user_options = options
            .as_ref()
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let limit = user_options.get("limit").and_then(Value::as_u64);

        let this = self.clone();
        batch::batch_exec(
            move |page_limit, skip| {
                let this = this.clone();
                let mut page_options = user_options.clone();
                page_options.insert("limit".to_owned(), Value::from(page_limit));
                page_options.insert("skip".to_owned(), Value::from(skip));
                let request = FindRequest {
                    conditions: conditions.clone(),
                    projection: projection.clone(),
                    options: Some(Value::Object(page_options)),
                };
                async move {
                    let result = exec(
                        &this.inner.transport,
                        &this.inner.subjects.find.base,
                        this.exec_options(),
                        &request,
                    )
                    .await?;
                    match result {
                        Value::Array(items) => Ok(items),
                        _ => Err(Error::UnexpectedReply("find result is not an array")),
                    }
                }
            },
            self.inner.options.batch_size,
            limit,
        )
        .await
    }

    /// Registers `listener` for `event`. For `create`/`update` this
    /// allocates bus subscriptions on both subjects of the group; other
    /// events are local-only.
    ///
    /// # Errors
    /// Propagates transport subscription failures.
    pub async fn on(
        &self,
        event: ProviderEvent,
        listener: Listener,
    ) -> Result<ListenerId, Error<T::Error>> {
        self.register(event, listener, false).await
    }

    /// Registers `listener` for a single delivery of `event`.
    ///
    /// # Errors
    /// Propagates transport subscription failures.
    pub async fn once(
        &self,
        event: ProviderEvent,
        listener: Listener,
    ) -> Result<ListenerId, Error<T::Error>> {
        self.register(event, listener, true).await
    }

    /// Alias of [`on`]: prepending has no re-ordering effect on the bus.
    ///
    /// # Errors
    /// Propagates transport subscription failures.
    ///
    /// [`on`]: Provider::on
    pub async fn prepend_listener(
        &self,
        event: ProviderEvent,
        listener: Listener,
    ) -> Result<ListenerId, Error<T::Error>> {
        self.on(event, listener).await
    }

    /// Alias of [`once`]: prepending has no re-ordering effect on the bus.
    ///
    /// # Errors
    /// Propagates transport subscription failures.
    ///
    /// [`once`]: Provider::once
    pub async fn prepend_once_listener(
        &self,
        event: ProviderEvent,
        listener: Listener,
    ) -> Result<ListenerId, Error<T::Error>> {
        self.once(event, listener).await
    }

    /// Removes one registration, releasing exactly the bus subscriptions
    /// it owns. Unknown ids are a no-op; unsubscribe failures are
    /// swallowed.
    pub async fn remove_listener(&self, event: ProviderEvent, id: ListenerId) {
        let removed = self.inner.listeners.lock().await.remove(&event, id);
        if let Some(registration) = removed {
            self.release_sids(registration.sids).await;
        }
    }

    /// Removes every registration for `event`, or every registration
    /// outright when `event` is `None`.
    pub async fn remove_all_listeners(&self, event: Option<ProviderEvent>) {
        let drained = self.inner.listeners.lock().await.drain(event.as_ref());
        for registration in drained {
            self.release_sids(registration.sids).await;
        }
    }

    /// Delivers `payload` to the local listeners registered for `event`.
    pub async fn emit(&self, event: &ProviderEvent, payload: EventPayload) {
        let targets = self.inner.listeners.lock().await.listeners_for(event);
        for (id, listener, once) in targets {
            listener(payload.clone());
            if once {
                self.remove_listener(event.clone(), id).await;
            }
        }
    }

    /// Opens the bidirectional object stream over the create group.
    #[must_use]
    pub fn open_stream(&self) -> ObjectDuplex<T> {
        let capacity = self.inner.options.high_water_mark.unwrap_or_else(|| {
            usize::try_from(self.inner.options.batch_size).unwrap_or(usize::MAX)
        });
        ObjectDuplex::new(self.clone(), capacity, self.inner.options.no_ack_stream)
    }

    async fn register(
        &self,
        event: ProviderEvent,
        listener: Listener,
        once: bool,
    ) -> Result<ListenerId, Error<T::Error>> {
        let id = ListenerId(self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.lock().await.insert(
            event.clone(),
            Registration {
                id,
                listener: Arc::clone(&listener),
                once,
                sids: Vec::new(),
            },
        );

        if let Some(kind) = event.crud_kind() {
            let pair = self.inner.subjects.pair(kind).clone();
            let handler: Arc<dyn SubscriptionHandler> = Arc::new(BridgeHandler {
                provider: self.clone(),
                event: event.clone(),
                id,
                listener,
                once,
                fired: AtomicBool::new(false),
            });

            let base = match self
                .inner
                .transport
                .subscribe(&pair.base, Arc::clone(&handler))
                .await
            {
                Ok(sid) => sid,
                Err(err) => {
                    self.inner.listeners.lock().await.remove(&event, id);
                    return Err(Error::Transport(err));
                }
            };
            let wildcard = match self.inner.transport.subscribe(&pair.wildcard, handler).await {
                Ok(sid) => sid,
                Err(err) => {
                    self.inner.listeners.lock().await.remove(&event, id);
                    self.release_sids(vec![base]).await;
                    return Err(Error::Transport(err));
                }
            };

            let orphaned = self
                .inner
                .listeners
                .lock()
                .await
                .assign_sids(&event, id, vec![base, wildcard]);
            if let Some(sids) = orphaned {
                // The registration was removed while we were subscribing.
                self.release_sids(sids).await;
            }
        }

        Ok(id)
    }

    async fn release_sids(&self, sids: Vec<T::SubscriptionId>) {
        for sid in sids {
            if let Err(err) = self.inner.transport.unsubscribe(sid).await {
                debug!(error = %err, "failed to release listener subscription");
            }
        }
    }

    pub(crate) async fn attach_stream_source(
        &self,
        sender: mpsc::Sender<Value>,
        sids: Arc<Mutex<Vec<T::SubscriptionId>>>,
    ) {
        let pair = self.inner.subjects.create.clone();
        let handler: Arc<dyn SubscriptionHandler> = Arc::new(SourceHandler {
            provider: self.clone(),
            sender,
        });
        for subject in [pair.base, pair.wildcard] {
            match self
                .inner
                .transport
                .subscribe(&subject, Arc::clone(&handler))
                .await
            {
                Ok(sid) => sids.lock().await.push(sid),
                Err(err) => {
                    self.emit(
                        &ProviderEvent::StreamError,
                        EventPayload::Error(Arc::new(Error::<T::Error>::Transport(err))),
                    )
                    .await;
                }
            }
        }
    }

    pub(crate) async fn release_stream_source(&self, sids: Vec<T::SubscriptionId>) {
        self.release_sids(sids).await;
    }

    pub(crate) async fn publish_create_batch(&self, mut chunks: Vec<Value>) {
        if chunks.is_empty() {
            return;
        }
        let object = if chunks.len() == 1 {
            chunks.remove(0)
        } else {
            Value::Array(chunks)
        };
        let request = CreateRequest {
            object,
            projection: Some(json!({"id": 1})),
        };
        let options = ExecOptions {
            no_ack: true,
            timeout_ms: self.inner.options.timeout_ms,
        };
        if let Err(err) = exec(
            &self.inner.transport,
            &self.inner.subjects.create.base,
            options,
            &request,
        )
        .await
        {
            self.emit(
                &ProviderEvent::StreamError,
                EventPayload::Error(Arc::new(err)),
            )
            .await;
        }
    }
}

struct BridgeHandler<T: Transport> {
    provider: Provider<T>,
    event: ProviderEvent,
    id: ListenerId,
    listener: Listener,
    once: bool,
    fired: AtomicBool,
}

#[async_trait]
impl<T: Transport> SubscriptionHandler for BridgeHandler<T> {
    async fn handle(&self, message: Message) {
        // The base and wildcard subscriptions share this handler; a once
        // listener fires for whichever delivery arrives first.
        if self.once && self.fired.swap(true, Ordering::SeqCst) {
            return;
        }

        let payload = match serde_json::from_slice::<Value>(&message.payload) {
            Ok(query) => EventPayload::Query(query),
            Err(err) => EventPayload::Error(Arc::new(err)),
        };
        (self.listener)(payload);

        if self.once {
            self.provider
                .remove_listener(self.event.clone(), self.id)
                .await;
        }
    }
}

struct SourceHandler<T: Transport> {
    provider: Provider<T>,
    sender: mpsc::Sender<Value>,
}

#[async_trait]
impl<T: Transport> SubscriptionHandler for SourceHandler<T> {
    async fn handle(&self, message: Message) {
        let mut value = match serde_json::from_slice::<Value>(&message.payload) {
            Ok(value) => value,
            Err(err) => {
                self.provider
                    .emit(
                        &ProviderEvent::StreamError,
                        EventPayload::Error(Arc::new(err)),
                    )
                    .await;
                return;
            }
        };

        match value.get_mut("object").map(Value::take) {
            None => {
                self.provider
                    .emit(
                        &ProviderEvent::StreamError,
                        EventPayload::Error(Arc::new(Error::<T::Error>::MissingObject)),
                    )
                    .await;
            }
            Some(Value::Array(items)) => {
                for item in items {
                    if self.sender.send(item).await.is_err() {
                        break;
                    }
                }
            }
            Some(object) => {
                let _ = self.sender.send(object).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex as StdMutex;

    use bytes::Bytes;
    use courier_transport_memory::MemoryTransport;
    use tokio::time::{timeout, Duration};

    fn soft_delete_schema() -> Schema {
        Schema::new(
            "Schema",
            json!({"metadata": {"deleted": "date", "updated": "date"}}),
        )
        .unwrap()
    }

    fn plain_schema() -> Schema {
        Schema::new("Schema", json!({})).unwrap()
    }

    fn provider(schema: Schema, transport: &MemoryTransport) -> Provider<MemoryTransport> {
        Provider::new(schema, transport.clone(), ProviderOptions::default()).unwrap()
    }

    #[derive(Debug)]
    struct Responder {
        transport: MemoryTransport,
        reply: Bytes,
        seen: Arc<StdMutex<Vec<Bytes>>>,
    }

    #[async_trait]
    impl SubscriptionHandler for Responder {
        async fn handle(&self, message: Message) {
            self.seen.lock().unwrap().push(message.payload.clone());
            if let Some(reply_to) = message.reply {
                let _ = self.transport.publish(&reply_to, self.reply.clone()).await;
            }
        }
    }

    async fn respond(
        transport: &MemoryTransport,
        subject: &str,
        reply: &str,
    ) -> Arc<StdMutex<Vec<Bytes>>> {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        transport
            .subscribe(
                subject,
                Arc::new(Responder {
                    transport: transport.clone(),
                    reply: Bytes::from(reply.to_owned()),
                    seen: Arc::clone(&seen),
                }),
            )
            .await
            .unwrap();
        seen
    }

    fn sent(seen: &Arc<StdMutex<Vec<Bytes>>>, index: usize) -> Value {
        serde_json::from_slice(&seen.lock().unwrap()[index]).unwrap()
    }

    #[tokio::test]
    async fn create_sends_the_exact_wire_payload() {
        let transport = MemoryTransport::new();
        let seen = respond(&transport, "create.schema", r#"{"result":{"a":1,"_id":1}}"#).await;
        let provider = provider(plain_schema(), &transport);

        let created = provider
            .create(json!({"a": 1}), Some(json!({"b": 1})))
            .await
            .unwrap();

        assert_eq!(created, json!({"a": 1, "_id": 1}));
        assert_eq!(
            &seen.lock().unwrap()[0][..],
            br#"{"object":{"a":1},"projection":{"b":1}}"#
        );
    }

    #[tokio::test]
    async fn count_merges_the_default_filter() {
        let transport = MemoryTransport::new();
        let seen = respond(&transport, "count.schema", r#"{"result":7}"#).await;
        let provider = provider(soft_delete_schema(), &transport);

        let count = provider.count(json!({"a": 1})).await.unwrap();

        assert_eq!(count, 7);
        let conditions = &sent(&seen, 0)["conditions"];
        assert_eq!(conditions["a"], json!(1));
        assert_eq!(
            conditions["$or"],
            json!([
                {"metadata": {"$eq": null}},
                {"metadata.deleted": {"$eq": null}},
                {"metadata.deleted": {"$exists": false}},
            ])
        );
    }

    #[tokio::test]
    async fn plain_schemas_send_no_default_filter() {
        let transport = MemoryTransport::new();
        let seen = respond(&transport, "count.schema", r#"{"result":0}"#).await;
        let provider = provider(plain_schema(), &transport);

        provider.count(json!({"a": 1})).await.unwrap();

        assert_eq!(sent(&seen, 0)["conditions"], json!({"a": 1}));
    }

    #[tokio::test]
    async fn null_arguments_fail_locally_without_bus_traffic() {
        let transport = MemoryTransport::new();
        let seen = respond(&transport, "create.schema", r#"{"result":{}}"#).await;
        let provider = provider(plain_schema(), &transport);

        assert!(matches!(
            provider.count(Value::Null).await,
            Err(Error::Argument("conditions"))
        ));
        assert!(matches!(
            provider.create(Value::Null, None).await,
            Err(Error::Argument("object"))
        ));
        assert!(matches!(
            provider.find_by_id(Value::Null, None).await,
            Err(Error::Argument("id"))
        ));

        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_requires_a_soft_delete_schema() {
        let transport = MemoryTransport::new();
        let provider = provider(plain_schema(), &transport);

        assert!(matches!(
            provider.delete(json!({"a": 1}), None).await,
            Err(Error::SoftDeleteUnsupported(name)) if name == "Schema"
        ));
        assert!(matches!(
            provider.delete_by_id(json!(1), None).await,
            Err(Error::SoftDeleteUnsupported(_))
        ));
    }

    #[tokio::test]
    async fn find_by_id_resolves_none_for_zero_or_leaked_results() {
        for (reply, expected) in [
            (r#"{"result":[]}"#, None),
            (r#"{"result":[{"_id":1},{"_id":1}]}"#, None),
            (r#"{"result":[{"_id":1,"a":2}]}"#, Some(json!({"_id": 1, "a": 2}))),
        ] {
            let transport = MemoryTransport::new();
            let seen = respond(&transport, "find.schema", reply).await;
            let provider = provider(plain_schema(), &transport);

            let found = provider.find_by_id(json!(1), None).await.unwrap();

            assert_eq!(found, expected);
            assert_eq!(sent(&seen, 0)["options"], json!({"limit": 1}));
            assert_eq!(sent(&seen, 0)["conditions"], json!({"_id": 1}));
        }
    }

    #[tokio::test]
    async fn delete_tombstones_then_returns_the_tombstoned_documents() {
        let transport = MemoryTransport::new();
        let updates = respond(&transport, "update.schema", r#"{"result":{}}"#).await;
        let finds = respond(
            &transport,
            "find.schema",
            r#"{"result":[{"_id":1,"a":1,"metadata":{"deleted":5}}]}"#,
        )
        .await;
        let provider = provider(soft_delete_schema(), &transport);

        let deleted = provider.delete(json!({"a": 1}), Some(json!({"b": 1}))).await.unwrap();

        assert_eq!(deleted.len(), 1);

        let update = sent(&updates, 0);
        assert_eq!(update["conditions"]["a"], json!(1));
        assert_eq!(update["conditions"]["$or"].as_array().unwrap().len(), 3);
        assert_eq!(
            update["object"],
            json!({"$currentDate": {"metadata.deleted": true, "metadata.updated": true}})
        );

        // The follow-up find matches the fresh tombstones directly; the
        // default filter would exclude them.
        let find = sent(&finds, 0);
        assert_eq!(find["conditions"]["a"], json!(1));
        assert_eq!(
            find["conditions"]["metadata.deleted"],
            json!({"$exists": true})
        );
        assert!(find["conditions"].get("$or").is_none());
    }

    #[tokio::test]
    async fn update_by_id_stamps_and_rereads() {
        let transport = MemoryTransport::new();
        let updates = respond(&transport, "update.schema", r#"{"result":{}}"#).await;
        let _finds = respond(
            &transport,
            "find.schema",
            r#"{"result":[{"_id":1,"a":2}]}"#,
        )
        .await;
        let provider = provider(soft_delete_schema(), &transport);

        let updated = provider
            .update_by_id(json!(1), json!({"$set": {"a": 2}}), None)
            .await
            .unwrap();

        assert_eq!(updated, Some(json!({"_id": 1, "a": 2})));

        let update = sent(&updates, 0);
        assert_eq!(update["conditions"]["_id"], json!(1));
        assert_eq!(update["object"]["$set"], json!({"a": 2}));
        assert_eq!(
            update["object"]["$currentDate"],
            json!({"metadata.updated": true})
        );
    }

    #[tokio::test]
    async fn find_pages_through_the_result_set() {
        let transport = MemoryTransport::new();

        // Replies with a full page every time; the limit stops the loop.
        let seen = respond(&transport, "find.schema", r#"{"result":[{"i":0},{"i":1}]}"#).await;
        let options = ProviderOptions {
            batch_size: 2,
            ..ProviderOptions::default()
        };
        let provider =
            Provider::new(plain_schema(), transport.clone(), options).unwrap();

        let found = provider
            .find(json!({}), None, Some(json!({"limit": 4})))
            .await
            .unwrap();

        assert_eq!(found.len(), 4);
        assert_eq!(sent(&seen, 0)["options"], json!({"limit": 2, "skip": 0}));
        assert_eq!(sent(&seen, 1)["options"], json!({"limit": 2, "skip": 2}));
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn create_and_update_listeners_bridge_bus_traffic() {
        let transport = MemoryTransport::new();
        let provider = provider(plain_schema(), &transport);

        let (sender, mut receiver) = mpsc::channel(10);
        let listener: Listener = Arc::new(move |payload| {
            let _ = sender.try_send(payload);
        });
        provider
            .on(ProviderEvent::Create, listener)
            .await
            .unwrap();

        transport
            .publish("create.schema", Bytes::from(r#"{"object":{"a":1}}"#))
            .await
            .unwrap();
        let payload = timeout(Duration::from_secs(1), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            payload,
            EventPayload::Query(query) if query == json!({"object": {"a": 1}})
        ));

        // The wildcard subject of the group is bridged too.
        transport
            .publish("create.schema.nested", Bytes::from(r#"{"object":{"b":2}}"#))
            .await
            .unwrap();
        let payload = timeout(Duration::from_secs(1), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(payload, EventPayload::Query(_)));

        // Undecodable traffic surfaces as an error payload.
        transport
            .publish("create.schema", Bytes::from("not json"))
            .await
            .unwrap();
        let payload = timeout(Duration::from_secs(1), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(payload, EventPayload::Error(_)));
    }

    #[tokio::test]
    async fn remove_listener_releases_exactly_its_subscriptions() {
        let transport = MemoryTransport::new();
        let provider = provider(plain_schema(), &transport);

        let (sender, mut receiver) = mpsc::channel(10);
        let listener: Listener = Arc::new(move |payload| {
            let _ = sender.try_send(payload);
        });
        let id = provider
            .on(ProviderEvent::Update, listener)
            .await
            .unwrap();

        provider.remove_listener(ProviderEvent::Update, id).await;
        // Removing an unknown registration is a no-op.
        provider.remove_listener(ProviderEvent::Update, id).await;

        transport
            .publish("update.schema", Bytes::from(r#"{"conditions":{}}"#))
            .await
            .unwrap();

        assert!(
            timeout(Duration::from_millis(50), receiver.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn once_listeners_fire_a_single_time() {
        let transport = MemoryTransport::new();
        let provider = provider(plain_schema(), &transport);

        let (sender, mut receiver) = mpsc::channel(10);
        let listener: Listener = Arc::new(move |payload| {
            let _ = sender.try_send(payload);
        });
        provider
            .once(ProviderEvent::Create, listener)
            .await
            .unwrap();

        transport
            .publish("create.schema", Bytes::from(r#"{"object":{"a":1}}"#))
            .await
            .unwrap();
        transport
            .publish("create.schema", Bytes::from(r#"{"object":{"a":2}}"#))
            .await
            .unwrap();

        assert!(timeout(Duration::from_secs(1), receiver.recv())
            .await
            .unwrap()
            .is_some());
        assert!(
            timeout(Duration::from_millis(50), receiver.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn other_events_are_local_only() {
        let transport = MemoryTransport::new();
        let provider = provider(plain_schema(), &transport);

        let (sender, mut receiver) = mpsc::channel(10);
        let listener: Listener = Arc::new(move |payload| {
            let _ = sender.try_send(payload);
        });
        let event = ProviderEvent::Other("drained".to_owned());
        provider.on(event.clone(), listener).await.unwrap();

        provider.emit(&event, EventPayload::Query(json!(1))).await;

        let payload = timeout(Duration::from_secs(1), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(payload, EventPayload::Query(query) if query == json!(1)));
    }
}
