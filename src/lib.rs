pub mod common;
pub mod server;

pub use common::messages::{ClientMessage, ServerMessage};
pub use server::Server;
