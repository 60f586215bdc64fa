//! Real-time broadcast hub: every message one client sends is relayed to
//! everyone else in a shared room.
//!
//! - [`room`] holds the membership map behind a single guard and fans
//!   messages out with non-blocking enqueues; a client whose queue is full
//!   is evicted instead of stalling the others.
//! - [`client`] is one member: an id, the sending half of its bounded
//!   outbound queue, and the token that stops its reader.
//! - [`session`] runs the per-client reader and writer tasks.
//! - [`connection`] abstracts the message-framed transport, with an
//!   in-memory implementation for tests.
//! - [`server`] is the axum front door (index page plus `/ws` upgrade).
//! - [`cli`] and [`config`] cover the binary's flags and the tunables.

pub mod cli;
pub mod client;
pub mod config;
pub mod connection;
pub mod room;
pub mod server;
pub mod session;
