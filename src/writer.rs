//! Dedicated writer task for sending frames on one connection.
//!
//! Every connection (client or server session) owns exactly one writer task
//! fed through an mpsc channel, so frames from the engine thread, the
//! broadcaster and callers never interleave on the socket.
//!
//! # Architecture
//!
//! ```text
//! Caller 1 ──┐
//! Engine   ──┼─► mpsc::UnboundedSender<OutboundFrame> ─► Writer Task ─► TCP write half
//! Broadcast ─┘
//! ```
//!
//! Ready frames are batched into a single `write_vectored` call.
//!
//! The queue itself is unbounded; backpressure is the in-flight count.
//! `send` waits and `try_send` refuses once the count reaches the limit,
//! while `push` always queues, for frames that must never be dropped.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tokio::task::JoinHandle;

use crate::error::{BridgeError, Result};
use crate::protocol::{encode_length, Frame, LENGTH_SIZE};

/// Default maximum pending frames before backpressure kicks in.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Default backpressure timeout.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A frame ready to be written to the socket.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    /// Pre-encoded length field.
    pub length: [u8; LENGTH_SIZE],
    /// Frame content (discriminator, id and payload, or fact text).
    pub content: Bytes,
}

impl OutboundFrame {
    /// Create an outbound frame from already-encoded content.
    ///
    /// Fails when the content does not fit the 16-bit length field.
    #[inline]
    pub fn new(content: Bytes) -> Result<Self> {
        Ok(Self {
            length: encode_length(content.len())?,
            content,
        })
    }

    /// Create an outbound frame from a decoded frame.
    #[inline]
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        Self::new(frame.content())
    }

    /// Total size of this frame on the wire.
    #[inline]
    pub fn size(&self) -> usize {
        LENGTH_SIZE + self.content.len()
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Maximum pending frames before backpressure kicks in.
    pub max_pending_frames: usize,
    /// Timeout when waiting for backpressure to clear.
    pub backpressure_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }
}

/// Frames queued but not yet written, shared by handles and the writer.
#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    /// Signalled after every written batch.
    drained: Notify,
}

impl InFlight {
    fn release(&self, frames: usize) {
        self.count.fetch_sub(frames, Ordering::Release);
        self.drained.notify_waiters();
    }
}

/// Handle for sending frames to the writer task.
///
/// Cheaply cloneable. Dropping every clone ends the writer task, which then
/// shuts down the write half of the socket.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::UnboundedSender<OutboundFrame>,
    in_flight: Arc<InFlight>,
    max_pending: usize,
    timeout: Duration,
}

impl WriterHandle {
    /// Queue a frame, waiting up to the configured timeout while the
    /// connection is saturated.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let drained = self.in_flight.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();

            if !self.is_backpressure_active() {
                break;
            }
            tokio::time::timeout_at(deadline, drained)
                .await
                .map_err(|_| BridgeError::BackpressureTimeout)?;
        }

        self.push(frame)
    }

    /// Queue a frame without waiting.
    ///
    /// Usable from synchronous code such as the engine thread; a saturated
    /// connection fails with `BackpressureTimeout` right away.
    pub fn try_send(&self, frame: OutboundFrame) -> Result<()> {
        if self.is_backpressure_active() {
            return Err(BridgeError::BackpressureTimeout);
        }

        self.push(frame)
    }

    /// Queue a frame regardless of backpressure.
    ///
    /// For frames that must not be dropped, such as replies to requests.
    /// Fails only once the writer task has stopped.
    pub fn push(&self, frame: OutboundFrame) -> Result<()> {
        // Count first so the writer never releases more than was queued.
        self.in_flight.count.fetch_add(1, Ordering::AcqRel);
        self.tx.send(frame).map_err(|_| {
            self.in_flight.release(1);
            BridgeError::ConnectionClosed
        })
    }

    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.pending_count() >= self.max_pending
    }

    /// Frames queued but not yet written.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.in_flight.count.load(Ordering::Acquire)
    }

    /// Whether the writer task has stopped accepting frames.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The returned `JoinHandle` resolves once every handle is dropped and the
/// queued frames are flushed, or on the first write error.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let in_flight = Arc::new(InFlight::default());
    let task = tokio::spawn(writer_loop(rx, writer, in_flight.clone()));

    let handle = WriterHandle {
        tx,
        in_flight,
        max_pending: config.max_pending_frames,
        timeout: config.backpressure_timeout,
    };
    (handle, task)
}

/// Spawn the writer task with default configuration.
pub fn spawn_writer_task_default<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    spawn_writer_task(writer, WriterConfig::default())
}

async fn writer_loop<W>(
    mut rx: mpsc::UnboundedReceiver<OutboundFrame>,
    mut writer: W,
    in_flight: Arc<InFlight>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
    while rx.recv_many(&mut batch, MAX_BATCH_SIZE).await > 0 {
        write_batch(&mut writer, &batch).await?;
        in_flight.release(batch.len());
        batch.clear();
    }

    // Channel closed: tell the peer we are done writing.
    writer.shutdown().await?;
    Ok(())
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(OutboundFrame::size).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        if slices.is_empty() {
            break;
        }

        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(BridgeError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }

        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data left after `skip_bytes` were written.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for frame in batch {
        for part in [&frame.length[..], &frame.content[..]] {
            let end = offset + part.len();
            if skip_bytes < end && !part.is_empty() {
                let start = skip_bytes.saturating_sub(offset);
                slices.push(IoSlice::new(&part[start..]));
            }
            offset = end;
        }
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FrameBuffer, Reply, Request};
    use std::io::Cursor;
    use tokio::io::{duplex, AsyncReadExt};

    fn request_frame(id: u32, command: &str) -> OutboundFrame {
        OutboundFrame::from_frame(&Request::new(id, command, "").to_frame()).unwrap()
    }

    #[test]
    fn test_outbound_frame_creation() {
        let frame = OutboundFrame::new(Bytes::from_static(b"hello")).unwrap();

        assert_eq!(frame.length, [7, 0]);
        assert_eq!(frame.size(), 7);
    }

    #[test]
    fn test_outbound_frame_too_large() {
        let content = Bytes::from(vec![b'x'; u16::MAX as usize]);
        assert!(matches!(
            OutboundFrame::new(content),
            Err(BridgeError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_writer_config_default() {
        let config = WriterConfig::default();
        assert_eq!(config.max_pending_frames, DEFAULT_MAX_PENDING_FRAMES);
        assert_eq!(config.backpressure_timeout, DEFAULT_BACKPRESSURE_TIMEOUT);
    }

    #[tokio::test]
    async fn test_writer_handle_send() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task_default(client);

        let reply = Reply::new(42, true, "ok");
        handle
            .send(OutboundFrame::from_frame(&reply.to_frame()).unwrap())
            .await
            .unwrap();

        let mut buf = vec![0u8; 64];
        let n = server.read(&mut buf).await.unwrap();

        let frames = FrameBuffer::new().push(&buf[..n]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(Reply::from_frame(&frames[0]).unwrap(), reply);
    }

    #[tokio::test]
    async fn test_writer_batching_preserves_order() {
        let (client, mut server) = duplex(4096);
        let (handle, task) = spawn_writer_task_default(client);

        for i in 0..10u32 {
            handle.send(request_frame(i, "reset")).await.unwrap();
        }
        drop(handle);
        task.await.unwrap().unwrap();

        let mut buf = Vec::new();
        server.read_to_end(&mut buf).await.unwrap();

        let frames = FrameBuffer::new().push(&buf).unwrap();
        let ids: Vec<_> = frames.iter().filter_map(Frame::id).collect();
        assert_eq!(ids, (0..10).collect::<Vec<_>>());
    }

    fn handle_with(
        queued: usize,
        max_pending: usize,
    ) -> (WriterHandle, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let in_flight = Arc::new(InFlight::default());
        in_flight.count.store(queued, Ordering::Release);
        let handle = WriterHandle {
            tx,
            in_flight,
            max_pending,
            timeout: Duration::from_millis(50),
        };
        (handle, rx)
    }

    #[tokio::test]
    async fn test_try_send_at_capacity() {
        let (handle, _rx) = handle_with(4, 4);

        let result = handle.try_send(request_frame(1, "clear"));
        assert!(matches!(result, Err(BridgeError::BackpressureTimeout)));
    }

    #[tokio::test]
    async fn test_push_ignores_backpressure() {
        let (handle, mut rx) = handle_with(4, 4);

        handle.push(request_frame(3, "log")).unwrap();
        assert_eq!(handle.pending_count(), 5);
        assert!(rx.recv().await.is_some());

        drop(rx);
        assert!(matches!(
            handle.push(request_frame(4, "log")),
            Err(BridgeError::ConnectionClosed)
        ));
        assert_eq!(handle.pending_count(), 5);
    }

    #[tokio::test]
    async fn test_send_times_out_while_saturated() {
        let (handle, _rx) = handle_with(4, 4);

        let result = handle.send(request_frame(1, "clear")).await;
        assert!(matches!(result, Err(BridgeError::BackpressureTimeout)));
        assert_eq!(handle.pending_count(), 4);
    }

    #[tokio::test]
    async fn test_send_resumes_when_drained() {
        let (handle, mut rx) = handle_with(4, 4);
        let in_flight = handle.in_flight.clone();

        let sender = handle.clone();
        let queued = tokio::spawn(async move { sender.send(request_frame(9, "run")).await });
        tokio::task::yield_now().await;
        in_flight.release(4);

        queued.await.unwrap().unwrap();
        assert_eq!(rx.recv().await.unwrap().content, request_frame(9, "run").content);
        assert_eq!(handle.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_try_send_after_close() {
        let (handle, rx) = handle_with(0, 100);
        drop(rx);

        let result = handle.try_send(request_frame(1, "clear"));
        assert!(matches!(result, Err(BridgeError::ConnectionClosed)));
        assert_eq!(handle.pending_count(), 0);
        assert!(handle.is_closed());
    }

    #[test]
    fn test_build_remaining_slices_no_skip() {
        let batch = vec![OutboundFrame::new(Bytes::from_static(b"hello")).unwrap()];

        let slices = build_remaining_slices(&batch, 0);
        assert_eq!(slices.len(), 2);
    }

    #[test]
    fn test_build_remaining_slices_partial_length() {
        let batch = vec![OutboundFrame::new(Bytes::from_static(b"hello")).unwrap()];

        let slices = build_remaining_slices(&batch, 1);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), 1);
        assert_eq!(slices[1].len(), 5);
    }

    #[test]
    fn test_build_remaining_slices_into_second_frame() {
        let batch = vec![
            OutboundFrame::new(Bytes::from_static(b"abc")).unwrap(),
            OutboundFrame::new(Bytes::from_static(b"defg")).unwrap(),
        ];

        // First frame (5 bytes) plus one byte of the second length field.
        let slices = build_remaining_slices(&batch, 6);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), 1);
        assert_eq!(&*slices[1], b"defg");
    }

    #[tokio::test]
    async fn test_write_batch_multiple() {
        let mut buf = Cursor::new(Vec::new());

        let batch: Vec<_> = (0..5)
            .map(|_| OutboundFrame::new(Bytes::from_static(b"abc")).unwrap())
            .collect();

        write_batch(&mut buf, &batch).await.unwrap();

        let written = buf.into_inner();
        assert_eq!(written.len(), 5 * 5);
        assert_eq!(&written[..5], b"\x05\x00abc");
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_channel_close() {
        let (client, _server) = duplex(4096);
        let (handle, task) = spawn_writer_task_default(client);

        drop(handle);

        let result = task.await.unwrap();
        assert!(result.is_ok());
    }
}
