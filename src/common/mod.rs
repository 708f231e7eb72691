//! # Common Components
//!
//! Shared data structures used by the relay and its transport.
//!
//! ## Modules
//!
//! - [`messages`]: Wire protocol between browser clients and the relay
//! - [`config`]: Configuration parsing utilities

pub mod config;
pub mod messages;
