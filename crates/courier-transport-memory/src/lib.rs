//! In-memory implementation of the courier transport contract.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::HashMap;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use bytes::Bytes;
use courier_core::transport::{SubscriptionHandler, Transport};
use courier_core::Message;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::debug;

struct Entry {
    subject: String,
    sender: mpsc::UnboundedSender<Message>,
}

#[derive(Default)]
struct BusState {
    subscriptions: Mutex<HashMap<u64, Entry>>,
    next_sid: AtomicU64,
    next_inbox: AtomicU64,
}

/// An in-process message bus.
///
/// Clones share the same bus, so a provider and a store handed clones of
/// one `MemoryTransport` talk to each other. Each subscription runs its
/// own delivery task; messages to a single subscription arrive in publish
/// order.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    state: Arc<BusState>,
}

impl Debug for MemoryTransport {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("MemoryTransport").finish_non_exhaustive()
    }
}

impl MemoryTransport {
    /// Creates a new, empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn deliver(&self, subject: &str, payload: Bytes, reply: Option<String>) {
        let subscriptions = self.state.subscriptions.lock().await;
        for entry in subscriptions.values() {
            if subject_matches(&entry.subject, subject) {
                let message = Message {
                    subject: subject.to_owned(),
                    payload: payload.clone(),
                    reply: reply.clone(),
                };
                // Receiver task may have just shut down; nothing to do.
                let _ = entry.sender.send(message);
            }
        }
    }
}

/// Token-wise NATS subject matching: `*` matches one token, `>` matches
/// one or more trailing tokens.
fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

struct InboxHandler {
    sender: StdMutex<Option<oneshot::Sender<Bytes>>>,
}

#[async_trait]
impl SubscriptionHandler for InboxHandler {
    async fn handle(&self, message: Message) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(message.payload);
        }
    }
}

/// Removes the transient request inbox even when the caller's timeout
/// drops the request future mid-await.
struct InboxGuard {
    state: Arc<BusState>,
    sid: u64,
}

impl Drop for InboxGuard {
    fn drop(&mut self) {
        let state = Arc::clone(&self.state);
        let sid = self.sid;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                state.subscriptions.lock().await.remove(&sid);
            });
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    type Error = Error;
    type SubscriptionId = u64;

    async fn subscribe(
        &self,
        subject: &str,
        handler: Arc<dyn SubscriptionHandler>,
    ) -> Result<u64, Error> {
        let sid = self.state.next_sid.fetch_add(1, Ordering::Relaxed);
        let (sender, mut receiver) = mpsc::unbounded_channel::<Message>();

        self.state.subscriptions.lock().await.insert(
            sid,
            Entry {
                subject: subject.to_owned(),
                sender,
            },
        );

        tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                handler.handle(message).await;
            }
        });

        Ok(sid)
    }

    async fn unsubscribe(&self, id: u64) -> Result<(), Error> {
        if self.state.subscriptions.lock().await.remove(&id).is_none() {
            debug!(sid = id, "unsubscribe for unknown subscription");
        }
        Ok(())
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), Error> {
        self.deliver(subject, payload, None).await;
        Ok(())
    }

    async fn request(&self, subject: &str, payload: Bytes) -> Result<Bytes, Error> {
        let inbox = format!(
            "_inbox.{}",
            self.state.next_inbox.fetch_add(1, Ordering::Relaxed)
        );
        let (sender, receiver) = oneshot::channel();
        let handler = Arc::new(InboxHandler {
            sender: StdMutex::new(Some(sender)),
        });

        let sid = self.subscribe(&inbox, handler).await?;
        let _guard = InboxGuard {
            state: Arc::clone(&self.state),
            sid,
        };

        self.deliver(subject, payload, Some(inbox)).await;

        receiver.await.map_err(|_| Error::NoReply)
    }
}
