//! Blocking facade over [`Client`](super::Client).
//!
//! Owns a small multi-threaded runtime so the receive loop keeps running
//! between calls. Event handlers run on that runtime's worker threads.

use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};

use super::{ClientBuilder, ClientEvent, SubscriptionId};
use crate::error::Result;
use crate::protocol::Reply;
use crate::status::{EngineStatus, WatchFlags, WatchItem};

/// A connected client for synchronous callers.
///
/// Must not be used from inside an async runtime.
pub struct Client {
    inner: super::Client,
    runtime: Arc<Runtime>,
}

impl Client {
    /// Connect using `builder`'s settings.
    pub fn connect_with(builder: ClientBuilder) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("clipswire-client")
            .enable_all()
            .build()?;
        let inner = runtime.block_on(builder.connect())?;
        Ok(Self {
            inner,
            runtime: Arc::new(runtime),
        })
    }

    /// Connect to `host:port` with default settings.
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        Self::connect_with(ClientBuilder::new().host(host).port(port))
    }

    pub fn call(&self, command: &str, args: &str) -> Result<Reply> {
        self.runtime.block_on(self.inner.call(command, args))
    }

    pub fn send_fire_and_forget(&self, command: &str, args: &str) -> bool {
        self.runtime
            .block_on(self.inner.send_fire_and_forget(command, args))
    }

    pub fn execute(&self, command: &str, args: &str) -> Result<Reply> {
        self.runtime.block_on(self.inner.execute(command, args))
    }

    pub fn send_text(&self, text: &str) -> Result<()> {
        self.runtime.block_on(self.inner.send_text(text))
    }

    pub fn load_file(&self, path: &str) -> Result<bool> {
        self.runtime.block_on(self.inner.load_file(path))
    }

    pub fn reset(&self) -> Result<bool> {
        self.runtime.block_on(self.inner.reset())
    }

    pub fn clear(&self) -> Result<bool> {
        self.runtime.block_on(self.inner.clear())
    }

    pub fn run(&self, steps: i64) -> Result<Option<u64>> {
        self.runtime.block_on(self.inner.run(steps))
    }

    pub fn assert_fact(&self, fact: &str) -> Result<bool> {
        self.runtime.block_on(self.inner.assert_fact(fact))
    }

    pub fn retract_fact(&self, fact: &str) -> Result<bool> {
        self.runtime.block_on(self.inner.retract_fact(fact))
    }

    pub fn set_path(&self, path: &str) -> Result<bool> {
        self.runtime.block_on(self.inner.set_path(path))
    }

    pub fn query(&self, expression: &str) -> Result<Reply> {
        self.runtime.block_on(self.inner.query(expression))
    }

    pub fn toggle_watch(&self, item: WatchItem) -> Result<Option<WatchFlags>> {
        self.runtime.block_on(self.inner.toggle_watch(item))
    }

    pub fn watches(&self) -> Result<Option<WatchFlags>> {
        self.runtime.block_on(self.inner.watches())
    }

    pub fn status(&self) -> Option<EngineStatus> {
        self.inner.status()
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.inner.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.unsubscribe(id)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    pub fn disconnect(&self) {
        self.inner.disconnect();
    }
}
