//! Bidirectional object streaming over a provider's create group.

use crate::events::{EventPayload, ProviderEvent};
use crate::Provider;

use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use courier_core::transport::Transport;
use futures::future::BoxFuture;
use futures::{FutureExt, Sink, Stream};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};

/// A bidirectional object stream.
///
/// The readable half yields the objects observed in create traffic on the
/// bus, flattening arrays element-wise. The writable half turns every
/// written object into a create request with projection `{"id": 1}`.
/// Failures on either half are re-reported as `stream-error` events on
/// the provider and never terminate the stream, which would unpipe
/// upstreams.
pub struct ObjectDuplex<T: Transport> {
    provider: Provider<T>,
    receiver: mpsc::Receiver<Value>,
    source_sender: Option<mpsc::Sender<Value>>,
    source_sids: Arc<Mutex<Vec<T::SubscriptionId>>>,
    write_buf: Vec<Value>,
    in_flight: Option<BoxFuture<'static, ()>>,
    no_ack: bool,
}

impl<T: Transport> ObjectDuplex<T> {
    pub(crate) fn new(provider: Provider<T>, capacity: usize, no_ack: bool) -> Self {
        let (source_sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            provider,
            receiver,
            source_sender: Some(source_sender),
            source_sids: Arc::new(Mutex::new(Vec::new())),
            write_buf: Vec::new(),
            in_flight: None,
            no_ack,
        }
    }

    fn dispatch(&self, chunks: Vec<Value>) -> BoxFuture<'static, ()> {
        let provider = self.provider.clone();
        if self.no_ack {
            async move {
                provider.publish_create_batch(chunks).await;
            }
            .boxed()
        } else {
            async move {
                let results =
                    futures::future::join_all(chunks.into_iter().map(|chunk| {
                        let provider = provider.clone();
                        async move { provider.create(chunk, Some(json!({"id": 1}))).await }
                    }))
                    .await;
                for result in results {
                    if let Err(err) = result {
                        provider
                            .emit(
                                &ProviderEvent::StreamError,
                                EventPayload::Error(Arc::new(err)),
                            )
                            .await;
                    }
                }
            }
            .boxed()
        }
    }
}

impl<T: Transport> Stream for ObjectDuplex<T> {
    type Item = Value;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Value>> {
        // The bus subscription is reader-driven: allocated on first read.
        if let Some(sender) = self.source_sender.take() {
            let provider = self.provider.clone();
            let sids = Arc::clone(&self.source_sids);
            tokio::spawn(async move {
                provider.attach_stream_source(sender, sids).await;
            });
        }
        self.receiver.poll_recv(cx)
    }
}

impl<T: Transport> Sink<Value> for ObjectDuplex<T> {
    type Error = std::convert::Infallible;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Chunks written while a dispatch is in flight are buffered and
        // coalesced into the next batch.
        Poll::Ready(Ok(()))
    }

    fn start_send(mut self: Pin<&mut Self>, item: Value) -> Result<(), Self::Error> {
        self.write_buf.push(item);
        if self.in_flight.is_none() {
            let chunks = mem::take(&mut self.write_buf);
            self.in_flight = Some(self.dispatch(chunks));
        }
        Ok(())
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        loop {
            if let Some(in_flight) = self.in_flight.as_mut() {
                ready!(in_flight.poll_unpin(cx));
                self.in_flight = None;
            }
            if self.write_buf.is_empty() {
                return Poll::Ready(Ok(()));
            }
            let chunks = mem::take(&mut self.write_buf);
            self.in_flight = Some(self.dispatch(chunks));
        }
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.poll_flush(cx)
    }
}

impl<T: Transport> Drop for ObjectDuplex<T> {
    fn drop(&mut self) {
        let provider = self.provider.clone();
        let sids = Arc::clone(&self.source_sids);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let sids = mem::take(&mut *sids.lock().await);
                provider.release_stream_source(sids).await;
            });
        }
    }
}
