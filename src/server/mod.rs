//! Bridge server: accept loop, sessions, dispatch queue and engine thread.
//!
//! ```text
//! Session 1 ─┐                                   ┌─► reply to Session k
//! Session 2 ─┼─► DispatchQueue ─► Engine thread ─┤
//! Session N ─┘   (FIFO, mpsc)     (Router+Engine) └─► status broadcast
//! ```
//!
//! # Example
//!
//! ```ignore
//! use clipswire::config::ServerConfig;
//! use clipswire::engine::{BatchLoader, MemoryEngine};
//! use clipswire::server::Server;
//!
//! let server = Server::bind(ServerConfig::default()).await?;
//! let registry = server.registry();
//! server.run(move || MemoryEngine::with_registry(registry), BatchLoader).await?;
//! ```

mod dispatch;
mod executor;
mod registry;
mod session;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::engine::{Engine, FileLoader};
use crate::error::{BridgeError, Result};
use crate::transport::Listener;
use crate::writer::WriterConfig;

pub use dispatch::{dispatch_queue, DispatchReceiver, DispatchSender, Work};
pub use executor::{spawn_engine_thread, Startup};
pub use registry::{SessionRegistry, DEFAULT_FACT_NAME};

/// Handle for stopping a running server from elsewhere.
#[derive(Clone)]
pub struct ServerHandle {
    shutdown: Arc<watch::Sender<bool>>,
}

impl ServerHandle {
    /// Stop accepting, close every session and let the engine thread drain.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// A bound, not yet running bridge server.
pub struct Server {
    listener: Listener,
    registry: SessionRegistry,
    startup: Startup,
    writer_config: WriterConfig,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Server {
    /// Bind the listener described by `config`.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let working_path = config.working_path()?;
        let listener = Listener::bind(&config.host, config.port).await?;
        info!(addr = %listener.local_addr()?, path = %working_path.display(), "listening");

        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            listener,
            registry: SessionRegistry::new(config.fact_name),
            startup: Startup {
                working_path,
                file: config.file,
                watch_facts: config.watch_facts,
                watch_rules: config.watch_rules,
            },
            writer_config: WriterConfig::default(),
            shutdown: Arc::new(shutdown),
        })
    }

    /// Override the per-session writer configuration.
    pub fn with_writer_config(mut self, writer_config: WriterConfig) -> Self {
        self.writer_config = writer_config;
        self
    }

    /// Address the server listens on.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Registry of connected sessions, e.g. for an engine that sends messages.
    pub fn registry(&self) -> SessionRegistry {
        self.registry.clone()
    }

    /// Handle for shutting the server down.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: self.shutdown.clone(),
        }
    }

    /// Working path the engine thread starts with.
    pub fn working_path(&self) -> &Path {
        &self.startup.working_path
    }

    /// Serve clients until [`ServerHandle::shutdown`] is called.
    ///
    /// `factory` builds the engine on the engine thread. Returns after all
    /// sessions have closed and the engine thread has exited.
    pub async fn run<E, F, L>(self, factory: F, loader: L) -> Result<()>
    where
        E: Engine + 'static,
        F: FnOnce() -> E + Send + 'static,
        L: FileLoader<E> + Send + 'static,
    {
        let Server {
            listener,
            registry,
            startup,
            writer_config,
            shutdown,
        } = self;

        let (dispatch, queue) = dispatch_queue();
        let engine_thread =
            spawn_engine_thread(factory, loader, queue, registry.clone(), startup)?;

        let mut shutdown_rx = shutdown.subscribe();
        let mut sessions = JoinSet::new();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, endpoint)) => {
                        sessions.spawn(session::run_session(
                            stream,
                            endpoint,
                            registry.clone(),
                            dispatch.clone(),
                            shutdown.subscribe(),
                            writer_config.clone(),
                        ));
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = finished {
                        error!(error = %e, "session task failed");
                    }
                }
            }
        }

        info!("shutting down");
        drop(listener);
        drop(dispatch);
        while let Some(finished) = sessions.join_next().await {
            if let Err(e) = finished {
                error!(error = %e, "session task failed");
            }
        }
        registry.clear();

        tokio::task::spawn_blocking(move || engine_thread.join())
            .await
            .map_err(|e| BridgeError::Io(std::io::Error::other(e)))?
            .map_err(|_| BridgeError::Io(std::io::Error::other("engine thread panicked")))?;

        info!("server stopped");
        Ok(())
    }
}
