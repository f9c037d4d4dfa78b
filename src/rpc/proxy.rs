//! # Proxy (Stub)
//!
//! Local handle for a remote object. Every call is one round trip on a fresh
//! connection: connect, send the request line, wait for the response line,
//! close. The proxy holds nothing but the address, so it is cheap to clone and
//! safe to share between tasks.
//!
//! Any operation can be reached through [`Proxy::invoke`]; the methods below it
//! are typed wrappers for the operations peers, servers and the directory
//! actually expose.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::common::connection::Connection;
use crate::common::error::{Error, PeerId, Result};
use crate::common::messages::{Address, Request, Response};
use crate::lock::distributed::{LockStatus, TokenVector};
use crate::server::peer_list::PeerEntry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proxy {
    address: Address,
}

impl Proxy {
    pub fn new(address: Address) -> Self {
        Self { address }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Call `method` on the remote object with positional `params`.
    ///
    /// # Returns
    /// - `Ok(Value)`: the remote `result`
    /// - `Err(Error::Remote)`: the remote operation failed; name and args preserved
    /// - `Err(Error::Communication)`: connect, send or receive failed
    pub async fn invoke(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let mut conn = Connection::connect(&self.address).await?;
        conn.write_message(&Request::new(method, params)).await?;

        let response: Response = conn.read_message().await?.ok_or_else(|| {
            Error::communication(format!(
                "{} closed the connection without answering '{}'",
                self.address, method
            ))
        })?;
        response.into_result()
    }

    /// [`Proxy::invoke`] and decode the result into `T`.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T> {
        let value = self.invoke(method, params).await?;
        serde_json::from_value(value).map_err(|e| {
            Error::communication(format!("unexpected result for '{method}': {e}"))
        })
    }

    // ------------------------------------------------------------------------
    // Peer registry / distributed lock
    // ------------------------------------------------------------------------

    /// Answers the callee's pending token request time, if it is waiting.
    pub async fn register_peer(&self, pid: PeerId, address: &Address) -> Result<Option<u64>> {
        self.call("register_peer", vec![json!(pid), json!(address)]).await
    }

    pub async fn unregister_peer(&self, pid: PeerId) -> Result<()> {
        self.call("unregister_peer", vec![json!(pid)]).await
    }

    pub async fn request_token(&self, time: u64, pid: PeerId) -> Result<()> {
        self.call("request_token", vec![json!(time), json!(pid)]).await
    }

    pub async fn obtain_token(&self, token: &TokenVector) -> Result<()> {
        self.call("obtain_token", vec![json!(token)]).await
    }

    pub async fn acquire(&self) -> Result<()> {
        self.call("acquire", vec![]).await
    }

    pub async fn release(&self) -> Result<()> {
        self.call("release", vec![]).await
    }

    pub async fn display_peers(&self) -> Result<Vec<PeerEntry>> {
        self.call("display_peers", vec![]).await
    }

    pub async fn display_status(&self) -> Result<LockStatus> {
        self.call("display_status", vec![]).await
    }

    /// Liveness check; answers `(id, type)`.
    pub async fn check(&self) -> Result<(PeerId, String)> {
        self.call("check", vec![]).await
    }

    // ------------------------------------------------------------------------
    // Chat peer
    // ------------------------------------------------------------------------

    pub async fn print_message(&self, from: PeerId, text: &str) -> Result<()> {
        self.call("print_message", vec![json!(from), json!(text)]).await
    }

    // ------------------------------------------------------------------------
    // Fortune server
    // ------------------------------------------------------------------------

    pub async fn read(&self) -> Result<String> {
        self.call("read", vec![]).await
    }

    pub async fn write(&self, fortune: &str) -> Result<()> {
        self.call("write", vec![json!(fortune)]).await
    }

    pub async fn write_no_lock(&self, fortune: &str) -> Result<()> {
        self.call("write_no_lock", vec![json!(fortune)]).await
    }

    // ------------------------------------------------------------------------
    // Directory service
    // ------------------------------------------------------------------------

    /// Register `address` under `kind`; answers `(id, token)`.
    pub async fn register(&self, kind: &str, address: &Address) -> Result<(PeerId, String)> {
        self.call("register", vec![json!(kind), json!(address)]).await
    }

    pub async fn unregister(&self, pid: PeerId, kind: &str, token: &str) -> Result<()> {
        self.call("unregister", vec![json!(pid), json!(kind), json!(token)])
            .await
    }

    pub async fn require_any(&self, kind: &str) -> Result<Address> {
        self.call("require_any", vec![json!(kind)]).await
    }

    pub async fn require_all(&self, kind: &str) -> Result<Vec<(PeerId, Address)>> {
        self.call("require_all", vec![json!(kind)]).await
    }

    pub async fn require_object(&self, kind: &str, pid: PeerId) -> Result<Address> {
        self.call("require_object", vec![json!(kind), json!(pid)]).await
    }
}
