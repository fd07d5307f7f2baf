//! Per-connection receive loop.
//!
//! A session registers its writer, announces itself to the engine thread,
//! and then forwards every complete frame to the dispatch queue tagged with
//! its endpoint. It unregisters on EOF, read error, an unrecoverable
//! framing error, or server shutdown.

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::dispatch::DispatchSender;
use super::registry::SessionRegistry;
use crate::protocol::FrameBuffer;
use crate::writer::{spawn_writer_task, WriterConfig};

/// Size of a single socket read.
const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionEnd {
    PeerClosed,
    ReadError,
    Desynchronized,
    QueueClosed,
    Shutdown,
}

/// Serve one connection until it ends.
pub(crate) async fn run_session(
    stream: TcpStream,
    endpoint: String,
    registry: SessionRegistry,
    dispatch: DispatchSender,
    mut shutdown: watch::Receiver<bool>,
    writer_config: WriterConfig,
) -> SessionEnd {
    let (mut reader, write_half) = stream.into_split();
    let (writer, writer_task) = spawn_writer_task(write_half, writer_config);

    registry.register(&endpoint, writer);
    info!(%endpoint, "connected client");
    dispatch.opened(&endpoint);

    let mut frames = FrameBuffer::new();
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    let end = loop {
        if *shutdown.borrow() {
            break SessionEnd::Shutdown;
        }

        let n = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break SessionEnd::Shutdown;
                }
                continue;
            }
            read = reader.read(&mut chunk) => match read {
                Ok(0) => break SessionEnd::PeerClosed,
                Ok(n) => n,
                Err(e) => {
                    warn!(%endpoint, error = %e, "read failed");
                    break SessionEnd::ReadError;
                }
            },
        };

        let decoded = match frames.push(&chunk[..n]) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(%endpoint, error = %e, "dropping connection");
                break SessionEnd::Desynchronized;
            }
        };

        if !decoded
            .into_iter()
            .all(|frame| dispatch.enqueue(&endpoint, frame))
        {
            break SessionEnd::QueueClosed;
        }
    };

    registry.unregister(&endpoint);
    drop(dispatch);
    // The registry held the only writer handle; the task now flushes and exits.
    if let Ok(Err(e)) = writer_task.await {
        debug!(%endpoint, error = %e, "writer ended with error");
    }
    info!(%endpoint, reason = ?end, "client disconnected");
    end
}
