//! # clipswire
//!
//! TCP bridge between a single-threaded rule engine and any number of
//! concurrent network clients.
//!
//! ## Architecture
//!
//! - **Server**: one task per client session feeds a FIFO dispatch queue;
//!   a dedicated engine thread drains it and replies through a shared
//!   session registry
//! - **Client**: request/reply correlation over one connection, plus
//!   events for status changes and free-form messages
//! - **Wire**: length-prefixed frames, either structured (`id` + payload)
//!   or plain fact text
//!
//! ## Example
//!
//! ```ignore
//! use clipswire::ClientBuilder;
//!
//! #[tokio::main]
//! async fn main() -> clipswire::Result<()> {
//!     let client = ClientBuilder::new()
//!         .host("127.0.0.1")
//!         .port(5000)
//!         .on_event(|event| println!("{event:?}"))
//!         .connect()
//!         .await?;
//!
//!     client.assert_fact("(ready)").await?;
//!     let fired = client.run(-1).await?;
//!     println!("fired {fired:?} rules");
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod router;
pub mod server;
pub mod status;
pub mod telemetry;
pub mod transport;
pub mod writer;

pub use client::{Client, ClientBuilder, ClientEvent};
pub use config::{ServerArgs, ServerConfig};
pub use error::{BridgeError, Result};
pub use server::{Server, ServerHandle};
pub use status::{EngineStatus, WatchFlags, WatchItem};
