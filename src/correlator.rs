//! Call correlation - turns the asynchronous transport into a `call`
//! primitive.
//!
//! The protocol carries no request identifiers, so correlation relies
//! entirely on ordering: **at most one request may be in flight per
//! connection**, and its response is the next response frame received.
//! The invariant is enforced structurally - the response receiver lives
//! inside the call mutex, so a second call cannot reach the queue until
//! the first has consumed its frame. Concurrent callers serialize; they
//! never corrupt the stream.
//!
//! While waiting, the call also watches the connection state and an
//! optional client-side deadline, so a dead socket fails the call fast
//! instead of blocking forever.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch, Mutex};

use crate::error::{KbError, Result};
use crate::protocol::{encode_request, Frame};
use crate::transport::ConnectionState;
use crate::writer::WriterHandle;

/// Far-future placeholder when no deadline is configured.
const NO_DEADLINE: Duration = Duration::from_secs(86_400 * 365);

/// Correlates each outgoing call with its response frame.
pub struct Correlator {
    writer: WriterHandle,
    /// Single-flight lock; holds the response queue so the invariant
    /// cannot be bypassed.
    slot: Mutex<mpsc::UnboundedReceiver<Frame>>,
    state: watch::Receiver<ConnectionState>,
    timeout: Option<Duration>,
}

impl Correlator {
    /// Create a correlator over the transport's outbound handle and
    /// inbound response queue.
    pub fn new(
        writer: WriterHandle,
        responses: mpsc::UnboundedReceiver<Frame>,
        state: watch::Receiver<ConnectionState>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            writer,
            slot: Mutex::new(responses),
            state,
            timeout,
        }
    }

    /// Issue a remote call and wait for its response.
    ///
    /// Returns the result value (`Value::Null` when the server answered
    /// `ok` without a value).
    ///
    /// # Errors
    ///
    /// - [`KbError::Remote`] if the server answered with `error`.
    /// - [`KbError::ConnectionClosed`] if the connection died first.
    /// - [`KbError::Timeout`] if the configured deadline elapsed.
    ///
    /// Failed calls are never resent; retry policy is a caller concern.
    pub async fn call(&self, method: &str, args: &[Value]) -> Result<Value> {
        let mut responses = self.slot.lock().await;

        if *self.state.borrow() != ConnectionState::Open {
            return Err(KbError::ConnectionClosed);
        }

        tracing::debug!(method, "sending request");
        let request = encode_request(method, args)?;
        self.writer.send(request).await?;

        self.await_response(&mut responses).await
    }

    /// Wait for the next response frame, the connection dying, or the
    /// deadline, whichever comes first.
    async fn await_response(
        &self,
        responses: &mut mpsc::UnboundedReceiver<Frame>,
    ) -> Result<Value> {
        let mut state = self.state.clone();
        // Closed is terminal: a transition that happened before the clone
        // would never fire `changed()`, so re-check the level first.
        if *state.borrow() != ConnectionState::Open {
            return Err(KbError::ConnectionClosed);
        }
        let deadline = tokio::time::sleep(self.timeout.unwrap_or(NO_DEADLINE));
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                frame = responses.recv() => {
                    return match frame {
                        Some(Frame::Ok(value)) => Ok(value.unwrap_or(Value::Null)),
                        Some(Frame::Error { kind, message }) => {
                            Err(KbError::Remote { kind, message })
                        }
                        // The transport never routes events here.
                        Some(Frame::Event { .. }) => Err(KbError::Protocol(
                            "event frame on the response queue".to_string(),
                        )),
                        None => Err(KbError::ConnectionClosed),
                    };
                }
                changed = state.changed() => {
                    if changed.is_err() || *state.borrow() != ConnectionState::Open {
                        return Err(KbError::ConnectionClosed);
                    }
                }
                _ = &mut deadline, if self.timeout.is_some() => {
                    return Err(KbError::Timeout);
                }
            }
        }
    }
}
