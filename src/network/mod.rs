//! Network layer connecting clients to paced program runs.
//!
//! Provides transport abstractions, the per-client session controller and
//! the server that ties them together.
//!
//! - [`transport`]: Transport trait, links and error types
//! - [`tcp_transport`]: Length-prefixed TCP transport
//! - [`local_transport`]: In-memory transport for local runs and testing
//! - [`message`]: Inbound directives and outbound event lines
//! - [`session`]: Paced execution of one program over one link
//! - [`server`]: Spawns one session per accepted link

pub mod local_transport;
pub mod message;
pub mod server;
pub mod session;
pub mod tcp_transport;
pub mod transport;
