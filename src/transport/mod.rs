//! Transport module - TCP sockets and endpoint identities.
//!
//! Every connection is identified by the textual form of its remote
//! endpoint (`ip:port`), which the server uses as the session key and as
//! the source identity of unstructured fact messages.

mod tcp;

pub use tcp::{connect, endpoint_of, Listener};
