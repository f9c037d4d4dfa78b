//! # Common Components
//!
//! Shared utilities and data structures used by every peer, client and the
//! directory service.
//!
//! ## Modules
//!
//! - [`messages`]: request/response wire format and addresses
//! - [`connection`]: TCP connection with line framing
//! - [`config`]: configuration parsing utilities
//! - [`error`]: the error taxonomy and its wire names
//! - [`logging`]: logger setup for the binaries

pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod messages;
