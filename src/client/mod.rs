//! Client builder and RPC engine.
//!
//! The [`ClientBuilder`] provides a fluent API for configuring and connecting
//! a client. The [`Client`] correlates requests with replies:
//! 1. Allocate an id and register it in the pending table
//! 2. Queue the request on the writer task
//! 3. Suspend on the call's single-slot channel until the receive task
//!    completes it, or the connection drops
//!
//! Sentinel replies and unstructured messages never touch the pending
//! table; they are turned into [`ClientEvent`]s.
//!
//! # Example
//!
//! ```ignore
//! use clipswire::client::{Client, ClientEvent};
//!
//! #[tokio::main]
//! async fn main() -> clipswire::Result<()> {
//!     let client = Client::builder()
//!         .port(5000)
//!         .on_event(|event| println!("{event:?}"))
//!         .connect()
//!         .await?;
//!
//!     client.assert_fact("(block G)").await?;
//!     let reply = client.query("(facts)").await?;
//!     println!("{}", reply.result);
//!     Ok(())
//! }
//! ```

pub mod blocking;
mod events;
mod ids;
mod pending;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Result};
use crate::protocol::{fact_frame, Frame, FrameBuffer, Reply, Request, SENTINEL_ID};
use crate::status::{EngineStatus, WatchFlags, WatchItem};
use crate::transport;
use crate::writer::{spawn_writer_task, OutboundFrame, WriterConfig, WriterHandle};

pub use events::{ClientEvent, EventBus, EventHandler, SubscriptionId};
pub use ids::IdAllocator;
pub use pending::PendingTable;

/// Default server host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_PORT: u16 = 5000;

/// Size of a single socket read.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Builder for configuring and connecting a client.
pub struct ClientBuilder {
    host: String,
    port: u16,
    writer_config: WriterConfig,
    handlers: Vec<EventHandler>,
    first_id: u32,
}

impl ClientBuilder {
    /// Create a new client builder targeting `127.0.0.1:5000`.
    pub fn new() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            writer_config: WriterConfig::default(),
            handlers: Vec::new(),
            first_id: 1,
        }
    }

    /// Set the server host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the server port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Register an event handler before connecting, so `Connected` is seen.
    pub fn on_event<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Set the first correlation id handed out.
    pub fn first_command_id(mut self, id: u32) -> Self {
        self.first_id = id;
        self
    }

    /// Set the maximum pending frames for backpressure.
    ///
    /// Default: 1024
    pub fn max_pending_frames(mut self, limit: usize) -> Self {
        self.writer_config.max_pending_frames = limit;
        self
    }

    /// Set the backpressure timeout.
    ///
    /// Default: 5 seconds
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.writer_config.backpressure_timeout = timeout;
        self
    }

    /// Connect to the configured server.
    pub async fn connect(self) -> Result<Client> {
        let stream = transport::connect(&self.host, self.port).await?;
        info!(host = %self.host, port = self.port, "connected to server");
        Ok(self.attach(stream))
    }

    /// Run the client over an already connected stream.
    pub fn attach(self, stream: TcpStream) -> Client {
        let (read_half, write_half) = stream.into_split();
        let (writer, writer_task) = spawn_writer_task(write_half, self.writer_config);

        let shared = Arc::new(Shared {
            pending: PendingTable::new(),
            events: EventBus::new(),
            status: Mutex::new(None),
            connected: AtomicBool::new(true),
        });
        for handler in self.handlers {
            shared.events.subscribe(handler);
        }

        let reader_task = tokio::spawn(receive_loop(read_half, shared.clone()));

        Client {
            shared,
            ids: IdAllocator::starting_at(self.first_id),
            writer: Mutex::new(Some(writer)),
            reader_task,
            _writer_task: writer_task,
        }
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared between a client and its receive task.
struct Shared {
    pending: PendingTable,
    events: EventBus,
    status: Mutex<Option<EngineStatus>>,
    connected: AtomicBool,
}

impl Shared {
    fn handle_frame(&self, frame: Frame) {
        if let Some(text) = frame.fact_text() {
            self.events.emit(&ClientEvent::Message(text));
            return;
        }

        let reply = match Reply::from_frame(&frame) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "discarding reply");
                return;
            }
        };

        if reply.id == SENTINEL_ID {
            self.update_status(&reply);
        } else {
            let id = reply.id;
            if !self.pending.complete(reply) {
                debug!(id, "reply without a waiting call");
            }
        }
    }

    fn update_status(&self, reply: &Reply) {
        if !reply.success {
            return;
        }
        match reply.result.parse::<EngineStatus>() {
            Ok(status) => {
                *self.status.lock().unwrap_or_else(PoisonError::into_inner) = Some(status.clone());
                self.events.emit(&ClientEvent::StatusChanged(status));
            }
            Err(e) => debug!(error = %e, "ignoring sentinel reply"),
        }
    }

    /// Abort every call and raise `Disconnected`, once.
    fn finish(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            let aborted = self.pending.abort_all();
            if aborted > 0 {
                warn!(aborted, "connection lost with calls outstanding");
            }
            self.events.emit(&ClientEvent::Disconnected);
        }
    }
}

async fn receive_loop<R>(mut reader: R, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    shared.events.emit(&ClientEvent::Connected);

    let mut frames = FrameBuffer::new();
    let mut buf = vec![0u8; READ_CHUNK_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "read failed");
                break;
            }
        };

        match frames.push(&buf[..n]) {
            Ok(decoded) => {
                for frame in decoded {
                    shared.handle_frame(frame);
                }
            }
            Err(e) => {
                warn!(error = %e, "dropping connection");
                break;
            }
        }
    }

    shared.finish();
}

/// Validate a command the way the server will, normalizing its arguments.
///
/// `run` with no argument becomes `run -1`; `reset` and `clear` drop any
/// argument. Returns the arguments to send.
pub fn validate_command(command: &str, args: &str) -> Result<String> {
    let invalid = || BridgeError::InvalidArgument {
        command: command.to_string(),
        argument: args.to_string(),
    };
    let one_of = |allowed: &[&str]| {
        if allowed.contains(&args) {
            Ok(args.to_string())
        } else {
            Err(invalid())
        }
    };

    match command {
        "reset" | "clear" => Ok(String::new()),
        "run" if args.is_empty() => Ok("-1".to_string()),
        "run" if is_step_count(args) => Ok(args.to_string()),
        "run" => Err(invalid()),
        "print" => one_of(&["facts", "rules", "agenda"]),
        "watch" => one_of(&["functions", "globals", "facts", "rules"]),
        "assert" | "raw" | "path" | "load" | "log" if !args.is_empty() => Ok(args.to_string()),
        "assert" | "raw" | "path" | "load" | "log" => Err(invalid()),
        other => Err(BridgeError::UnknownCommand(other.to_string())),
    }
}

/// `-?\d{1,9}`
fn is_step_count(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    (1..=9).contains(&digits.len()) && digits.bytes().all(|b| b.is_ascii_digit())
}

/// A connected client.
///
/// Calls may be issued concurrently from any number of tasks; each gets its
/// own reply. Dropping the client closes the connection.
pub struct Client {
    shared: Arc<Shared>,
    ids: IdAllocator,
    /// Taken on disconnect; the writer task then shuts the write half.
    writer: Mutex<Option<WriterHandle>>,
    reader_task: JoinHandle<()>,
    _writer_task: JoinHandle<Result<()>>,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Connect to `host:port` with default settings.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        ClientBuilder::new().host(host).port(port).connect().await
    }

    /// Send a request and wait for its reply.
    ///
    /// A reply with `success == false` is still `Ok`. Waits without a
    /// timeout until the reply arrives or the connection drops.
    ///
    /// # Errors
    ///
    /// `ConnectionClosed` if the connection is (or becomes) closed before
    /// the reply arrives.
    pub async fn call(&self, command: &str, args: &str) -> Result<Reply> {
        let id = self.ids.next_id();
        let reply_rx = self.shared.pending.register(id)?;

        if let Err(e) = self.send_request(&Request::new(id, command, args)).await {
            self.shared.pending.remove(id);
            return Err(e);
        }

        reply_rx.await.map_err(|_| {
            debug!(id, command, "call aborted");
            BridgeError::ConnectionClosed
        })
    }

    /// Send a request without waiting for, or registering, its reply.
    ///
    /// Returns whether the request was queued.
    pub async fn send_fire_and_forget(&self, command: &str, args: &str) -> bool {
        let id = self.ids.next_id();
        self.send_request(&Request::new(id, command, args))
            .await
            .is_ok()
    }

    async fn send_request(&self, request: &Request) -> Result<()> {
        let frame = OutboundFrame::from_frame(&request.to_frame())?;
        self.writer()?.send(frame).await
    }

    /// Outbound path, or `ConnectionClosed` once the connection has ended.
    fn writer(&self) -> Result<WriterHandle> {
        if !self.is_connected() {
            return Err(BridgeError::ConnectionClosed);
        }
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(BridgeError::ConnectionClosed)
    }

    /// Validate a command locally, then call it.
    ///
    /// Invalid commands fail with `InvalidArgument` or `UnknownCommand`
    /// without a round-trip.
    pub async fn execute(&self, command: &str, args: &str) -> Result<Reply> {
        let args = validate_command(command, args)?;
        self.call(command, &args).await
    }

    /// Send an unstructured text message, asserted by the server as a fact.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        let frame = OutboundFrame::from_frame(&fact_frame(text)?)?;
        self.writer()?.send(frame).await
    }

    /// Load a `.clp` or `.dat` file on the server.
    pub async fn load_file(&self, path: &str) -> Result<bool> {
        Ok(self.execute("load", path).await?.success)
    }

    /// Reset the knowledge base.
    pub async fn reset(&self) -> Result<bool> {
        Ok(self.call("reset", "").await?.success)
    }

    /// Clear the knowledge base, rules included.
    pub async fn clear(&self) -> Result<bool> {
        Ok(self.call("clear", "").await?.success)
    }

    /// Run at most `steps` rules; anything below `-1` means "until done".
    ///
    /// Returns the number of rules fired.
    pub async fn run(&self, steps: i64) -> Result<Option<u64>> {
        let reply = self.call("run", &steps.max(-1).to_string()).await?;
        Ok(if reply.success {
            reply.result.parse().ok()
        } else {
            None
        })
    }

    /// Assert a fact such as `(block G)`.
    pub async fn assert_fact(&self, fact: &str) -> Result<bool> {
        Ok(self.execute("assert", fact).await?.success)
    }

    /// Retract a fact given by its text or fact index.
    pub async fn retract_fact(&self, fact: &str) -> Result<bool> {
        Ok(self.call("raw", &format!("(retract {fact})")).await?.success)
    }

    /// Change the server's working path.
    pub async fn set_path(&self, path: &str) -> Result<bool> {
        Ok(self.execute("path", path).await?.success)
    }

    /// Evaluate an expression on the server and return its output.
    pub async fn query(&self, expression: &str) -> Result<Reply> {
        self.call("query", expression).await
    }

    /// Toggle a watch category and return the resulting flags.
    pub async fn toggle_watch(&self, item: WatchItem) -> Result<Option<WatchFlags>> {
        let name = item.command_name().ok_or_else(|| BridgeError::InvalidArgument {
            command: "watch".to_string(),
            argument: item.engine_name().to_string(),
        })?;
        self.call("watch", name).await?;
        Ok(self.status().map(|status| status.watching))
    }

    /// Ask the server to republish its status and return the watch flags.
    pub async fn watches(&self) -> Result<Option<WatchFlags>> {
        self.call("watch", "").await?;
        Ok(self.status().map(|status| status.watching))
    }

    /// Most recent status published by the server.
    pub fn status(&self) -> Option<EngineStatus> {
        self.shared
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Add an event handler.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.shared.events.subscribe(Arc::new(handler))
    }

    /// Remove an event handler.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.events.unsubscribe(id)
    }

    /// Whether the connection is still up.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Number of calls waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.shared.pending.len()
    }

    /// Close the connection, failing every outstanding call.
    ///
    /// The server sees end-of-stream once queued frames are flushed; later
    /// sends fail with `ConnectionClosed`.
    pub fn disconnect(&self) {
        self.reader_task.abort();
        self.shared.finish();
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode_reply;
    use crate::transport::Listener;
    use rstest::rstest;
    use std::sync::Mutex as StdMutex;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt};

    #[rstest]
    #[case("run", "", "-1")]
    #[case("run", "-5", "-5")]
    #[case("run", "123456789", "123456789")]
    #[case("reset", "anything", "")]
    #[case("print", "agenda", "agenda")]
    #[case("watch", "functions", "functions")]
    #[case("log", "verbose", "verbose")]
    fn test_validate_accepts(#[case] command: &str, #[case] args: &str, #[case] sent: &str) {
        assert_eq!(validate_command(command, args).unwrap(), sent);
    }

    #[rstest]
    #[case("run", "1234567890")]
    #[case("run", "1.5")]
    #[case("run", "-")]
    #[case("print", "instances")]
    #[case("watch", "")]
    #[case("assert", "")]
    #[case("load", "")]
    fn test_validate_rejects(#[case] command: &str, #[case] args: &str) {
        assert!(matches!(
            validate_command(command, args),
            Err(BridgeError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_validate_unknown() {
        assert!(matches!(
            validate_command("query", "(facts)"),
            Err(BridgeError::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_builder_configuration() {
        let builder = Client::builder()
            .host("10.0.0.1")
            .port(6000)
            .first_command_id(40)
            .max_pending_frames(2048)
            .backpressure_timeout(Duration::from_secs(10))
            .on_event(|_| {});

        assert_eq!(builder.host, "10.0.0.1");
        assert_eq!(builder.port, 6000);
        assert_eq!(builder.first_id, 40);
        assert_eq!(builder.writer_config.max_pending_frames, 2048);
        assert_eq!(builder.handlers.len(), 1);
    }

    /// Accept one connection and hand back the server side.
    async fn pair(builder: ClientBuilder) -> (Client, TcpStream) {
        let listener = Listener::bind("127.0.0.1", 0).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let client = builder.port(port).connect().await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn test_sentinel_status_updates_cache_and_events() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let builder = Client::builder().on_event(move |e| sink.lock().unwrap().push(e.clone()));
        let (client, mut server) = pair(builder).await;

        let mut bytes = encode_reply(SENTINEL_ID, true, "watching:3|path:/x").unwrap();
        bytes.extend(encode_reply(SENTINEL_ID, true, "not a status").unwrap());
        bytes.extend(crate::protocol::encode_fact("hi\n").unwrap());
        server.write_all(&bytes).await.unwrap();
        drop(server);

        tokio::time::timeout(Duration::from_secs(5), async {
            while client.is_connected() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let status = EngineStatus::new(WatchFlags::from_bits(3), "/x");
        assert_eq!(client.status(), Some(status.clone()));
        assert_eq!(
            *seen.lock().unwrap(),
            [
                ClientEvent::Connected,
                ClientEvent::StatusChanged(status),
                ClientEvent::Message("hi\n".to_string()),
                ClientEvent::Disconnected,
            ]
        );
    }

    #[tokio::test]
    async fn test_call_fails_after_disconnect() {
        let (client, server) = pair(Client::builder()).await;
        drop(server);

        client.disconnect();
        assert!(matches!(
            client.call("reset", "").await,
            Err(BridgeError::ConnectionClosed)
        ));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_closes_outbound_path() {
        let (client, mut server) = pair(Client::builder()).await;

        client.disconnect();
        assert!(!client.send_fire_and_forget("log", "x").await);
        assert!(matches!(
            client.send_text("late").await,
            Err(BridgeError::ConnectionClosed)
        ));

        let mut buf = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), server.read_to_end(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(buf.is_empty());
    }
}
