//! # Relay Server
//!
//! The core ([`catalogue`], [`registry`], [`timer`], [`relay`]) is plain
//! synchronous state; [`transport`] wraps it in an axum HTTP/WebSocket
//! server.

pub mod catalogue;
pub mod registry;
pub mod relay;
pub mod timer;
pub mod transport;

pub use catalogue::Catalogue;
pub use relay::{Disposition, Relay};
pub use transport::Server;
