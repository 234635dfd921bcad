//! Transport - owns the socket and runs the I/O loops.
//!
//! The transport opens exactly one TCP connection and spawns two tasks:
//! a read loop that reassembles frames from the byte stream, and the
//! [writer task](crate::writer) that drains the outbound queue. No other
//! component ever touches the socket; cross-task handoff happens only
//! through channels.
//!
//! Each decoded frame is classified and routed: event frames go to the
//! dispatcher's inbound queue, response frames to the correlator's inbound
//! queue. Both queues are unbounded so the read loop never blocks on a
//! slow consumer.
//!
//! Connection state is published through a `watch` channel. The state is
//! owned here; the session and correlator only observe it.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::protocol::{Frame, FrameBuffer};
use crate::writer::{spawn_writer_task, WriterHandle};

/// Size of the socket read buffer.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Lifecycle of the connection.
///
/// Transitions only move forward: `Connecting → Open → Closing → Closed`.
/// A socket error or EOF jumps straight to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// TCP connection being established.
    Connecting,
    /// Connected; calls and events flow.
    Open,
    /// Close requested; flushing queued writes.
    Closing,
    /// Socket gone. Terminal.
    Closed,
}

/// Inbound frame queues, split by frame class.
///
/// Handed out once at construction; the receivers move into the
/// correlator and the event dispatcher respectively.
pub struct Inbound {
    /// Call responses (ok / error frames), in stream order.
    pub responses: mpsc::UnboundedReceiver<Frame>,
    /// Event notifications as (event id, payload) pairs, in arrival order.
    pub events: mpsc::UnboundedReceiver<(String, Value)>,
}

/// The transport: one socket, one read loop, one writer task.
pub struct Transport {
    writer: WriterHandle,
    writer_shutdown: oneshot::Sender<()>,
    writer_task: JoinHandle<Result<()>>,
    read_task: JoinHandle<()>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl Transport {
    /// Open a TCP connection to the knowledge base server.
    ///
    /// Connection failure (including connection refused) is returned
    /// synchronously to the caller. No retry, no reconnect: a broken
    /// connection terminates the session.
    pub async fn connect(host: &str, port: u16) -> Result<(Self, Inbound)> {
        let stream = TcpStream::connect((host, port)).await?;
        Ok(Self::from_stream(stream))
    }

    /// Build a transport over an already-connected stream.
    ///
    /// Useful for tests and for callers that configure the socket
    /// themselves.
    pub fn from_stream(stream: TcpStream) -> (Self, Inbound) {
        let (reader, writer) = stream.into_split();
        Self::start(reader, writer)
    }

    /// Spawn the I/O tasks over an arbitrary reader/writer pair.
    fn start<R, W>(reader: R, writer: W) -> (Self, Inbound)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let state_tx = Arc::new(state_tx);

        let (writer_handle, writer_shutdown, writer_task) =
            spawn_writer_task(writer, crate::writer::DEFAULT_CHANNEL_CAPACITY);

        let (response_tx, responses) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();

        let _ = state_tx.send(ConnectionState::Open);

        let loop_state = state_tx.clone();
        let read_task = tokio::spawn(async move {
            read_loop(reader, response_tx, event_tx).await;
            let _ = loop_state.send(ConnectionState::Closed);
        });

        let transport = Self {
            writer: writer_handle,
            writer_shutdown,
            writer_task,
            read_task,
            state_tx,
            state_rx,
        };

        (transport, Inbound { responses, events })
    }

    /// Get a handle for queueing outbound messages.
    pub fn writer(&self) -> WriterHandle {
        self.writer.clone()
    }

    /// Subscribe to connection state changes.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Close the connection.
    ///
    /// Stops accepting new sends, flushes the queued writes, closes the
    /// socket and joins both I/O tasks deterministically.
    pub async fn close(self) -> Result<()> {
        let _ = self.state_tx.send(ConnectionState::Closing);

        // Flush and stop the writer; dropping its write half sends FIN.
        let _ = self.writer_shutdown.send(());
        match self.writer_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("writer error during close: {}", e),
            Err(e) => tracing::warn!("writer task join error: {}", e),
        }

        // The read loop may be blocked on a read; cancel it explicitly.
        self.read_task.abort();
        let _ = self.read_task.await;

        let _ = self.state_tx.send(ConnectionState::Closed);
        Ok(())
    }
}

/// Read loop - reassembles frames and routes them by class.
///
/// Exits on EOF, socket error, or an undecodable chunk; the caller marks
/// the connection `Closed` so blocked calls fail fast instead of hanging.
async fn read_loop<R>(
    mut reader: R,
    response_tx: mpsc::UnboundedSender<Frame>,
    event_tx: mpsc::UnboundedSender<(String, Value)>,
) where
    R: AsyncRead + Unpin,
{
    let mut frame_buffer = FrameBuffer::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!("server closed the connection");
                return;
            }
            Ok(n) => n,
            Err(e) => {
                tracing::error!("socket read error: {}", e);
                return;
            }
        };

        let frames = match frame_buffer.push(&buf[..n]) {
            Ok(frames) => frames,
            Err(e) => {
                tracing::error!("undecodable message from server: {}", e);
                return;
            }
        };

        for frame in frames {
            match frame {
                Frame::Event { id, payload } => {
                    tracing::debug!(event = %id, "event received");
                    let _ = event_tx.send((id, payload));
                }
                response => {
                    let _ = response_tx.send(response);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::AsyncWriteExt;

    /// Build a transport over an in-memory duplex, returning the far end.
    fn duplex_transport() -> (Transport, Inbound, tokio::io::DuplexStream) {
        let (near, far) = tokio::io::duplex(4096);
        let (reader, writer) = tokio::io::split(near);
        let (transport, inbound) = Transport::start(reader, writer);
        (transport, inbound, far)
    }

    #[tokio::test]
    async fn test_routes_responses_and_events() {
        let (_transport, mut inbound, mut far) = duplex_transport();

        far.write_all(b"event\nevt_1\n[\"alfred\"]\n#end#\nok\ntrue\n#end#\n")
            .await
            .unwrap();

        let (id, payload) = inbound.events.recv().await.unwrap();
        assert_eq!(id, "evt_1");
        assert_eq!(payload, json!(["alfred"]));

        let frame = inbound.responses.recv().await.unwrap();
        assert_eq!(frame, Frame::Ok(Some(json!(true))));
    }

    #[tokio::test]
    async fn test_state_open_after_start() {
        let (transport, _inbound, _far) = duplex_transport();
        assert_eq!(*transport.state().borrow(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn test_eof_marks_closed() {
        let (transport, _inbound, far) = duplex_transport();
        let mut state = transport.state();

        drop(far);

        state
            .wait_for(|s| *s == ConnectionState::Closed)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_protocol_error_marks_closed() {
        let (transport, _inbound, mut far) = duplex_transport();
        let mut state = transport.state();

        far.write_all(b"garbage status\n#end#\n").await.unwrap();

        state
            .wait_for(|s| *s == ConnectionState::Closed)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_writes_reach_the_socket() {
        let (transport, _inbound, mut far) = duplex_transport();

        transport
            .writer()
            .send(bytes::Bytes::from_static(b"methods\n#end#\n"))
            .await
            .unwrap();

        let mut buf = vec![0u8; 32];
        let n = tokio::io::AsyncReadExt::read(&mut far, &mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"methods\n#end#\n");
    }

    #[tokio::test]
    async fn test_close_is_observable() {
        let (transport, _inbound, _far) = duplex_transport();
        let mut state = transport.state();

        transport.close().await.unwrap();

        state
            .wait_for(|s| *s == ConnectionState::Closed)
            .await
            .unwrap();
    }
}
