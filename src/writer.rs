//! Dedicated writer task for outbound messages.
//!
//! Outgoing requests are queued on an mpsc channel and written to the
//! socket by a single task, so callers never touch the socket directly.
//!
//! ```text
//! Caller 1 ─┐
//! Caller 2 ─┼─► mpsc::Sender<Bytes> ─► Writer Task ─► TCP stream
//! Caller N ─┘
//! ```
//!
//! Ready messages are batched into a single `write_vectored` call; partial
//! writes are continued with the unwritten remainder so message order and
//! byte boundaries are always preserved. Closing the channel (or sending
//! the shutdown signal) flushes whatever is still queued before the task
//! exits.

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{KbError, Result};

/// Default capacity of the outbound channel.
///
/// With the single-flight call invariant the queue never holds more than a
/// handful of messages; the capacity only bounds pathological callers.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Maximum messages to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 16;

/// Handle for sending encoded messages to the writer task.
///
/// Cheaply cloneable.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<Bytes>,
}

impl WriterHandle {
    /// Queue a message for writing.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::ConnectionClosed`] if the writer task is gone.
    pub async fn send(&self, message: Bytes) -> Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| KbError::ConnectionClosed)
    }
}

/// Spawn the writer task and return a handle for sending messages.
///
/// Returns `(handle, shutdown, task)`. Sending on `shutdown` makes the
/// task flush the messages already queued and exit; dropping every handle
/// has the same effect.
pub fn spawn_writer_task<W>(
    writer: W,
    capacity: usize,
) -> (WriterHandle, oneshot::Sender<()>, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let task = tokio::spawn(writer_loop(rx, shutdown_rx, writer));

    (WriterHandle { tx }, shutdown_tx, task)
}

/// Main writer loop - receives messages and writes them to the socket.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<Bytes>,
    mut shutdown_rx: oneshot::Receiver<()>,
    mut writer: W,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    // A dropped (never fired) shutdown sender must not stop the loop;
    // disarm the branch after it resolves so the oneshot is not re-polled.
    let mut shutdown_armed = true;

    loop {
        let first = tokio::select! {
            message = rx.recv() => match message {
                Some(m) => m,
                // All senders dropped: clean shutdown.
                None => return Ok(()),
            },
            signal = &mut shutdown_rx, if shutdown_armed => {
                if signal.is_err() {
                    shutdown_armed = false;
                    continue;
                }
                // Stop accepting new sends; flush what is queued.
                let mut batch = Vec::new();
                while let Ok(message) = rx.try_recv() {
                    batch.push(message);
                }
                rx.close();
                write_batch(&mut writer, &batch).await?;
                return Ok(());
            }
        };

        // Collect additional ready messages (non-blocking).
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(message) => batch.push(message),
                Err(_) => break,
            }
        }

        write_batch(&mut writer, &batch).await?;
    }
}

/// Write a batch of messages using scatter/gather I/O.
///
/// Continues after partial writes with the unwritten remainder, preserving
/// order.
async fn write_batch<W>(writer: &mut W, batch: &[Bytes]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(|m| m.len()).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(KbError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build the IoSlice array for the data remaining after `skip_bytes`.
fn build_remaining_slices(batch: &[Bytes], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut skipped = 0;

    for message in batch {
        let end = skipped + message.len();
        if skip_bytes < end {
            let start = skip_bytes.saturating_sub(skipped);
            slices.push(IoSlice::new(&message[start..]));
        }
        skipped = end;
    }

    slices
}
