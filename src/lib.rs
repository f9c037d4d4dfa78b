//! # peer-lock
//!
//! Peers that find each other through a directory service, call each other
//! over a small JSON-over-TCP RPC layer, and share a token-based distributed
//! lock (with a read/write lock on top).
//!
//! - [`common`]: wire format, connections, errors, configuration, logging
//! - [`rpc`]: proxy, dispatcher, peer
//! - [`server`]: peer registry, lock middleware, fortune server
//! - [`lock`]: distributed lock and distributed read/write lock
//! - [`discovery`]: the directory service

pub mod common;
pub mod discovery;
pub mod lock;
pub mod rpc;
pub mod server;

pub use common::error::{Error, PeerId, Result};
pub use common::messages::Address;
