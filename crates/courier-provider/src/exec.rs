//! Single-shot request execution with timeout and result/error
//! demultiplexing.

use crate::error::Error;

use courier_core::envelope::{encode_request, Envelope};
use courier_core::transport::Transport;
use serde::Serialize;
use serde_json::Value;
use tokio::time::{timeout, Duration};

/// How a single request is dispatched.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ExecOptions {
    /// Fire-and-forget: publish without a reply subject, no timer, no
    /// reply handling.
    pub no_ack: bool,

    /// Reply deadline in milliseconds for acknowledged requests.
    pub timeout_ms: u64,
}

/// Sends one request and resolves with the unwrapped result.
///
/// The per-call timer is owned here and implicitly cancelled on first
/// reply. Concurrent calls are independent.
pub(crate) async fn exec<T, Q>(
    transport: &T,
    subject: &str,
    options: ExecOptions,
    query: &Q,
) -> Result<Value, Error<T::Error>>
where
    T: Transport,
    Q: Serialize,
{
    let payload = encode_request(query).map_err(Error::Encode)?;

    if options.no_ack {
        transport
            .publish(subject, payload)
            .await
            .map_err(Error::Transport)?;
        return Ok(Value::Null);
    }

    let reply = timeout(
        Duration::from_millis(options.timeout_ms),
        transport.request(subject, payload.clone()),
    )
    .await
    .map_err(|_| Error::Timeout {
        millis: options.timeout_ms,
        query: String::from_utf8_lossy(&payload).into_owned(),
    })?
    .map_err(Error::Transport)?;

    match Envelope::decode(&reply).map_err(Error::Decode)? {
        Envelope::Result { result } => Ok(result),
        Envelope::Error { error } => Err(Error::Remote(error.message)),
    }
}
