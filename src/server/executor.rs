//! The engine thread: sole consumer of the dispatch queue.
//!
//! The engine is built inside the thread from a factory, so it never
//! crosses threads and needs no `Send` bound. Each work item runs under
//! `catch_unwind`; a panicking item is logged and the thread moves on to
//! the next one. A request whose command panics still gets a failure
//! reply from the router.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use tracing::{error, info, warn};

use super::dispatch::DispatchReceiver;
use super::registry::SessionRegistry;
use crate::engine::{Engine, FileLoader};
use crate::router::Router;
use crate::status::WatchItem;

/// Work done by the engine thread before it starts consuming the queue.
#[derive(Debug, Clone, Default)]
pub struct Startup {
    /// Absolute working path.
    pub working_path: PathBuf,
    /// Rule file (`.clp` or `.dat`) to load.
    pub file: Option<String>,
    /// Enable the `facts` watch.
    pub watch_facts: bool,
    /// Enable the `rules` watch.
    pub watch_rules: bool,
}

/// Spawn the engine thread.
///
/// The thread exits once every dispatch producer is dropped and the queue
/// is drained.
pub fn spawn_engine_thread<E, F, L>(
    factory: F,
    loader: L,
    mut queue: DispatchReceiver,
    registry: SessionRegistry,
    startup: Startup,
) -> std::io::Result<JoinHandle<()>>
where
    E: Engine + 'static,
    F: FnOnce() -> E + Send + 'static,
    L: FileLoader<E> + Send + 'static,
{
    thread::Builder::new()
        .name("engine".to_string())
        .spawn(move || {
            info!("engine thread started");
            let mut router = Router::new(factory(), loader, registry, startup.working_path);

            if startup.watch_facts {
                router.engine_mut().set_watch(WatchItem::Facts, true);
            }
            if startup.watch_rules {
                router.engine_mut().set_watch(WatchItem::Rules, true);
            }
            if let Some(file) = startup.file.as_deref() {
                if !router.load(file) {
                    warn!(file, "start-up file was not loaded");
                }
            }

            while let Some(work) = queue.dequeue_blocking() {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| router.handle(work)));
                if outcome.is_err() {
                    error!("engine panicked while handling work; continuing");
                }
            }

            info!("engine thread stopped");
        })
}
