//! Listener registry for the provider's event bridge.
//!
//! Each registration owns the bus subscription IDs allocated for it, so
//! removal unsubscribes precisely what was subscribed and consumers that
//! come and go never leak bus subscriptions.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::Arc;

use courier_core::subject::CrudKind;
use serde_json::Value;

/// Events observable on a provider.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ProviderEvent {
    /// A create request was observed on the bus.
    Create,

    /// An update request was observed on the bus.
    Update,

    /// A decode or write failure on the object stream. Reported here so
    /// it never terminates the stream itself.
    StreamError,

    /// Any other event name; purely local, no bus interaction.
    Other(String),
}

impl ProviderEvent {
    /// The CRUD group this event bridges to, if any.
    pub(crate) const fn crud_kind(&self) -> Option<CrudKind> {
        match self {
            Self::Create => Some(CrudKind::Create),
            Self::Update => Some(CrudKind::Update),
            Self::StreamError | Self::Other(_) => None,
        }
    }
}

/// Identifies one listener registration on a provider.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ListenerId(pub(crate) u64);

/// Payload delivered to event listeners: exactly one of a decoded query
/// or an error.
#[derive(Clone, Debug)]
pub enum EventPayload {
    /// The decoded message for `create`/`update` dispatch events.
    Query(Value),

    /// A decode failure, or a stream error.
    Error(Arc<dyn StdError + Send + Sync>),
}

/// A provider event listener.
pub type Listener = Arc<dyn Fn(EventPayload) + Send + Sync>;

pub(crate) struct Registration<SID> {
    pub id: ListenerId,
    pub listener: Listener,
    pub once: bool,
    pub sids: Vec<SID>,
}

pub(crate) struct Registry<SID> {
    entries: HashMap<ProviderEvent, Vec<Registration<SID>>>,
}

impl<SID> Default for Registry<SID> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<SID> Registry<SID> {
    /// Appends a registration; arrival order is preserved per event.
    pub fn insert(&mut self, event: ProviderEvent, registration: Registration<SID>) {
        self.entries.entry(event).or_default().push(registration);
    }

    /// Removes one registration, returning it so the caller can release
    /// its subscriptions. Unknown ids are a no-op.
    pub fn remove(&mut self, event: &ProviderEvent, id: ListenerId) -> Option<Registration<SID>> {
        let registrations = self.entries.get_mut(event)?;
        let index = registrations.iter().position(|r| r.id == id)?;
        Some(registrations.remove(index))
    }

    /// Replaces the subscription IDs owned by a registration. Returns the
    /// sids back if the registration is already gone.
    pub fn assign_sids(
        &mut self,
        event: &ProviderEvent,
        id: ListenerId,
        sids: Vec<SID>,
    ) -> Option<Vec<SID>> {
        match self
            .entries
            .get_mut(event)
            .and_then(|rs| rs.iter_mut().find(|r| r.id == id))
        {
            Some(registration) => {
                registration.sids = sids;
                None
            }
            None => Some(sids),
        }
    }

    /// Removes every registration for `event`, or every registration
    /// outright when `event` is `None`.
    pub fn drain(&mut self, event: Option<&ProviderEvent>) -> Vec<Registration<SID>> {
        match event {
            Some(event) => self.entries.remove(event).unwrap_or_default(),
            None => self.entries.drain().flat_map(|(_, rs)| rs).collect(),
        }
    }

    /// Snapshot of the listeners for `event`, in registration order.
    pub fn listeners_for(&self, event: &ProviderEvent) -> Vec<(ListenerId, Listener, bool)> {
        self.entries
            .get(event)
            .map(|registrations| {
                registrations
                    .iter()
                    .map(|r| (r.id, Arc::clone(&r.listener), r.once))
                    .collect()
            })
            .unwrap_or_default()
    }
}
