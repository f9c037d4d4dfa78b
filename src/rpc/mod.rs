//! # RPC Substrate
//!
//! The pieces that make a remote object look local:
//!
//! - [`proxy`]: client side, one round trip per call
//! - [`dispatcher`]: server side, one task per connection
//! - [`operations`]: the named operations an owner exposes
//! - [`peer`]: dispatcher + directory registration = an addressable peer

pub mod dispatcher;
pub mod operations;
pub mod peer;
pub mod proxy;

pub use dispatcher::{Dispatcher, DispatcherHandle};
pub use operations::{reply, Operations, Params};
pub use peer::{Identity, Peer};
pub use proxy::Proxy;
