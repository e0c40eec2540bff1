//! NATS implementation of the courier transport contract.
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

use async_nats::Client;
use async_trait::async_trait;
use bytes::Bytes;
use courier_core::transport::{SubscriptionHandler, Transport};
use courier_core::Message;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Options for the NATS transport.
#[derive(Clone, Debug)]
pub struct NatsTransportOptions {
    /// The NATS client to use.
    pub client: Client,
}

struct ActiveSubscription {
    token: CancellationToken,
}

/// Transport over a core NATS connection.
///
/// Request/reply maps to the client's first-reply request. The protocol
/// layer owns per-call timeouts, so the client should be connected with
/// its own request timeout disabled or set above any caller timeout.
#[derive(Clone)]
pub struct NatsTransport {
    client: Client,
    subscriptions: Arc<Mutex<HashMap<u64, ActiveSubscription>>>,
    next_sid: Arc<AtomicU64>,
}

impl Debug for NatsTransport {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("NatsTransport").finish_non_exhaustive()
    }
}

impl NatsTransport {
    /// Creates a new transport over an established client.
    #[must_use]
    pub fn new(NatsTransportOptions { client }: NatsTransportOptions) -> Self {
        Self {
            client,
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            next_sid: Arc::new(AtomicU64::new(0)),
        }
    }
}

#[async_trait]
impl Transport for NatsTransport {
    type Error = Error;
    type SubscriptionId = u64;

    async fn subscribe(
        &self,
        subject: &str,
        handler: Arc<dyn SubscriptionHandler>,
    ) -> Result<u64, Error> {
        let mut subscriber = self
            .client
            .subscribe(subject.to_owned())
            .await
            .map_err(|_| Error::Subscribe)?;

        let sid = self.next_sid.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        self.subscriptions.lock().await.insert(
            sid,
            ActiveSubscription {
                token: token.clone(),
            },
        );

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => {
                        // Unsubscribe failures are swallowed per the bus
                        // driver contract.
                        let _ = subscriber.unsubscribe().await;
                        break;
                    }
                    message = subscriber.next() => {
                        let Some(msg) = message else { break };
                        let message = Message {
                            subject: msg.subject.to_string(),
                            payload: msg.payload,
                            reply: msg.reply.map(|reply| reply.to_string()),
                        };
                        handler.handle(message).await;
                    }
                }
            }
            debug!("subscription task exited");
        });

        Ok(sid)
    }

    async fn unsubscribe(&self, id: u64) -> Result<(), Error> {
        match self.subscriptions.lock().await.remove(&id) {
            Some(active) => active.token.cancel(),
            None => debug!(sid = id, "unsubscribe for unknown subscription"),
        }
        Ok(())
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), Error> {
        self.client
            .publish(subject.to_owned(), payload)
            .await
            .map_err(|e| Error::Publish(e.kind()))
    }

    async fn request(&self, subject: &str, payload: Bytes) -> Result<Bytes, Error> {
        let reply = self
            .client
            .request(subject.to_owned(), payload)
            .await
            .map_err(|e| Error::Request(e.kind()))?;
        Ok(reply.payload)
    }
}
