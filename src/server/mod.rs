//! # Server Side
//!
//! - [`peer_list`]: registry of same-type peers
//! - [`middleware`]: [`LockNode`], a peer running the lock protocol
//! - [`server`]: the replicated fortune server built on top of it
//! - [`chat`]: peers sending each other messages over the registry
//! - [`database`]: the fortune file

pub mod chat;
pub mod database;
pub mod middleware;
pub mod peer_list;
pub mod server;

pub use chat::{ChatMessage, ChatPeer};
pub use database::Database;
pub use middleware::LockNode;
pub use peer_list::{PeerEntry, PeerList};
pub use server::{FortuneCore, FortuneServer};
