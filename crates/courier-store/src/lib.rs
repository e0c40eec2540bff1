//! CRUD protocol server for the courier layer.
//!
//! A [`Store`] subscribes both subjects of every CRUD group, decodes
//! inbound requests, dispatches them to a pluggable [`Model`] built once
//! at construction, and publishes wrapped results or error envelopes to
//! the reply subject.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::{DispatchError, Error};

use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::Arc;

use async_trait::async_trait;
use courier_core::envelope::{CountRequest, CreateRequest, Envelope, FindRequest, UpdateRequest};
use courier_core::model::{Model, UpdateOptions};
use courier_core::schema::Schema;
use courier_core::subject::{CrudKind, SubjectOptions, SubjectSet};
use courier_core::transport::{SubscriptionHandler, Transport};
use courier_core::Message;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, error};

/// Options configuring a store.
#[derive(Clone, Debug, Default)]
pub struct StoreOptions {
    /// Subject derivation options.
    pub subjects: SubjectOptions,
}

/// A listener for dispatch failures in one CRUD group. Receives the
/// error value.
pub type ErrorListener = Arc<dyn Fn(&DispatchError) + Send + Sync>;

type ErrorListeners = Arc<Mutex<HashMap<CrudKind, Vec<ErrorListener>>>>;

/// A CRUD protocol server bound to one schema, one transport and one
/// model.
pub struct Store<T: Transport, M: Model> {
    schema: Schema,
    transport: T,
    subjects: SubjectSet,
    model: Arc<M>,
    subscription_ids: Mutex<Vec<T::SubscriptionId>>,
    error_listeners: ErrorListeners,
}

impl<T: Transport, M: Model> Store<T, M> {
    /// Creates a store for `schema`, building the model once via
    /// `build_model`.
    ///
    /// # Errors
    /// Returns an error if subject derivation fails.
    pub fn new<F>(
        schema: Schema,
        transport: T,
        options: &StoreOptions,
        build_model: F,
    ) -> Result<Self, Error<T::Error>>
    where
        F: FnOnce(&Schema) -> M,
    {
        let subjects = SubjectSet::build(schema.name(), &options.subjects).map_err(Error::Subject)?;
        let model = Arc::new(build_model(&schema));

        Ok(Self {
            schema,
            transport,
            subjects,
            model,
            subscription_ids: Mutex::new(Vec::new()),
            error_listeners: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// The schema this store serves.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The derived wire subjects.
    #[must_use]
    pub fn subjects(&self) -> &SubjectSet {
        &self.subjects
    }

    /// Whether the store currently holds subscriptions.
    pub async fn is_open(&self) -> bool {
        !self.subscription_ids.lock().await.is_empty()
    }

    /// Subscribes both subjects of every CRUD group, recording the
    /// returned subscription IDs in order.
    ///
    /// # Errors
    /// Fails if the store is already open; transport failures roll back
    /// any partial subscriptions.
    pub async fn open(&self) -> Result<(), Error<T::Error>> {
        let mut ids = self.subscription_ids.lock().await;
        if !ids.is_empty() {
            return Err(Error::AlreadyOpen);
        }

        for kind in CrudKind::ALL {
            let pair = self.subjects.pair(kind);
            let handler: Arc<dyn SubscriptionHandler> = Arc::new(DispatchHandler {
                kind,
                transport: self.transport.clone(),
                model: Arc::clone(&self.model),
                listeners: Arc::clone(&self.error_listeners),
            });

            for subject in [&pair.base, &pair.wildcard] {
                match self.transport.subscribe(subject, Arc::clone(&handler)).await {
                    Ok(sid) => ids.push(sid),
                    Err(err) => {
                        for sid in ids.drain(..) {
                            let _ = self.transport.unsubscribe(sid).await;
                        }
                        return Err(Error::Transport(err));
                    }
                }
            }
        }

        Ok(())
    }

    /// Releases every recorded subscription, in subscription order, then
    /// clears the list.
    ///
    /// # Errors
    /// Fails if the store is not open. Individual unsubscribe failures
    /// are swallowed per the bus driver contract.
    pub async fn close(&self) -> Result<(), Error<T::Error>> {
        let mut ids = self.subscription_ids.lock().await;
        if ids.is_empty() {
            return Err(Error::NotOpen);
        }

        for sid in ids.drain(..) {
            if let Err(err) = self.transport.unsubscribe(sid).await {
                debug!(error = %err, "failed to unsubscribe");
            }
        }

        Ok(())
    }

    /// Registers a listener for dispatch failures in `kind`'s group.
    pub async fn on_error(&self, kind: CrudKind, listener: ErrorListener) {
        self.error_listeners
            .lock()
            .await
            .entry(kind)
            .or_default()
            .push(listener);
    }
}

fn null_to_empty(conditions: Value) -> Value {
    if conditions.is_null() {
        json!({})
    } else {
        conditions
    }
}

fn model_error<E: StdError + Send + Sync + 'static>(err: E) -> DispatchError {
    DispatchError::Model(Arc::new(err))
}

struct DispatchHandler<T: Transport, M: Model> {
    kind: CrudKind,
    transport: T,
    model: Arc<M>,
    listeners: ErrorListeners,
}

impl<T: Transport, M: Model> DispatchHandler<T, M> {
    fn parse<R: DeserializeOwned>(raw: &str) -> Result<R, DispatchError> {
        serde_json::from_str(raw).map_err(|err| DispatchError::Decode(Arc::new(err)))
    }

    async fn emit_error(&self, err: &DispatchError) {
        let listeners = self
            .listeners
            .lock()
            .await
            .get(&self.kind)
            .cloned()
            .unwrap_or_default();
        for listener in listeners {
            listener(err);
        }
    }

    async fn publish_reply(&self, reply: Option<&str>, envelope: &Envelope) {
        // No reply subject means the request was fire-and-forget.
        let Some(reply) = reply else { return };

        match envelope.encode() {
            Ok(payload) => {
                if let Err(err) = self.transport.publish(reply, payload).await {
                    debug!(error = %err, "failed to publish reply");
                }
            }
            Err(err) => error!(error = %err, "failed to encode reply envelope"),
        }
    }

    async fn dispatch_count(&self, raw: &str) -> Result<Value, DispatchError> {
        let request: CountRequest = Self::parse(raw)?;
        let count = self
            .model
            .count(null_to_empty(request.conditions))
            .await
            .map_err(model_error)?;
        Ok(Value::from(count))
    }

    async fn dispatch_create(&self, raw: &str) -> Result<Value, DispatchError> {
        let request: CreateRequest = Self::parse(raw)?;
        self.model
            .create(request.object, request.projection)
            .await
            .map_err(model_error)
    }

    async fn dispatch_find(&self, raw: &str) -> Result<Value, DispatchError> {
        let request: FindRequest = Self::parse(raw)?;
        let found = self
            .model
            .find(
                null_to_empty(request.conditions),
                request.projection,
                request.options,
            )
            .await
            .map_err(model_error)?;
        Ok(Value::Array(found))
    }

    async fn dispatch_update(&self, raw: &str) -> Result<Value, DispatchError> {
        let request: UpdateRequest = Self::parse(raw)?;
        // Multiplicity is forced server-side; the wire payload cannot
        // override it.
        let options = UpdateOptions {
            select: request.projection,
            multi: true,
        };
        self.model
            .update(request.conditions, request.object, options)
            .await
            .map_err(model_error)
    }
}

#[async_trait]
impl<T: Transport, M: Model> SubscriptionHandler for DispatchHandler<T, M> {
    async fn handle(&self, message: Message) {
        // A non-UTF-8 payload is a programming error on the producer
        // side; it is never published back.
        let Ok(raw) = std::str::from_utf8(&message.payload) else {
            error!(subject = %message.subject, "discarding non-UTF-8 request payload");
            return;
        };

        let reply = message.reply.as_deref();

        let result = match self.kind {
            CrudKind::Count => self.dispatch_count(raw).await,
            CrudKind::Create => self.dispatch_create(raw).await,
            CrudKind::Find => self.dispatch_find(raw).await,
            CrudKind::Update => self.dispatch_update(raw).await,
        };

        match result {
            Ok(result) => self.publish_reply(reply, &Envelope::result(result)).await,
            Err(err) => {
                self.emit_error(&err).await;
                self.publish_reply(reply, &Envelope::error(&err)).await;
            }
        }
    }
}
