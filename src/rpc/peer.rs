//! # Peer
//!
//! A peer is a dispatcher (so others can call it) plus a proxy to the
//! directory service (so it can be found). Its identity `(id, type, address)`
//! comes from registering with the directory and never changes afterwards.
//!
//! ## Lifecycle
//!
//! ```text
//! Peer::start      bind listener -> register with directory -> (id, token)
//! Peer::serve      start routing requests to the owner's operations
//! Peer::unregister remove from directory
//! Peer::stop       stop accepting
//! ```
//!
//! Applications compose a peer with whatever they expose; the peer itself only
//! knows how to answer `check`.

use log::info;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use tokio::net::lookup_host;

use super::dispatcher::{Dispatcher, DispatcherHandle};
use super::operations::{reply, Operations};
use super::proxy::Proxy;
use crate::common::config::PeerConfig;
use crate::common::error::{Error, PeerId, Result};
use crate::common::messages::Address;

/// Who a peer is, as assigned by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: PeerId,
    #[serde(rename = "type")]
    pub kind: String,
    pub address: Address,
}

pub struct Peer {
    identity: Identity,
    /// Validation token from the directory, needed to unregister
    token: String,
    directory: Proxy,
    dispatcher: Option<Dispatcher>,
    server: Option<DispatcherHandle>,
}

impl Peer {
    /// Bind the listening socket and register with the directory.
    ///
    /// The configured host is translated to the machine's external interface
    /// first, so other machines get an address they can actually reach. With
    /// port `0` the OS picks the port and the bound one is registered.
    pub async fn start(config: &PeerConfig) -> Result<Self> {
        let requested = external_interface(&config.listen_address()).await?;
        let dispatcher = Dispatcher::bind(&requested).await?;
        let address = Address::new(requested.host, dispatcher.local_addr().port());

        let directory = Proxy::new(config.directory.clone());
        let (id, token) = directory.register(&config.kind, &address).await?;

        info!(
            "🚀 Peer {} of type '{}' registered at {}",
            id, config.kind, address
        );

        Ok(Self {
            identity: Identity {
                id,
                kind: config.kind.clone(),
                address,
            },
            token,
            directory,
            dispatcher: Some(dispatcher),
            server: None,
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn id(&self) -> PeerId {
        self.identity.id
    }

    pub fn kind(&self) -> &str {
        &self.identity.kind
    }

    pub fn address(&self) -> &Address {
        &self.identity.address
    }

    pub fn directory(&self) -> &Proxy {
        &self.directory
    }

    /// Liveness check.
    pub fn check(&self) -> (PeerId, String) {
        (self.identity.id, self.identity.kind.clone())
    }

    /// Start serving `operations`, plus `check`.
    pub fn serve(&mut self, mut operations: Operations) -> Result<()> {
        let dispatcher = self
            .dispatcher
            .take()
            .ok_or_else(|| Error::protocol("peer is already serving"))?;

        let (id, kind) = self.check();
        operations.register("check", move |_| {
            let kind = kind.clone();
            async move { reply((id, kind)) }
        });

        self.server = Some(dispatcher.serve(operations));
        Ok(())
    }

    /// Remove this peer from the directory. It keeps serving until [`Peer::stop`].
    pub async fn unregister(&self) -> Result<()> {
        self.directory
            .unregister(self.identity.id, &self.identity.kind, &self.token)
            .await?;
        info!("👋 Peer {} unregistered from the directory", self.identity.id);
        Ok(())
    }

    /// Stop accepting connections.
    pub async fn stop(&mut self) {
        self.dispatcher = None;
        if let Some(server) = self.server.take() {
            server.stop().await;
        }
    }
}

/// Translate a host name into the address other machines should use.
///
/// A name resolving to several addresses never yields a loopback one if
/// anything else is available (IPv4 first); a name resolving only to loopback
/// addresses keeps one of them.
pub async fn external_interface(address: &Address) -> Result<Address> {
    let resolved: Vec<IpAddr> = lookup_host((address.host.as_str(), address.port))
        .await
        .map_err(|e| Error::communication(format!("cannot resolve '{}': {e}", address.host)))?
        .map(|socket| socket.ip())
        .collect();

    let chosen = pick_interface(&resolved).ok_or_else(|| {
        Error::communication(format!("invalid address to listen to: '{}'", address.host))
    })?;
    Ok(Address::new(chosen.to_string(), address.port))
}

fn pick_interface(candidates: &[IpAddr]) -> Option<IpAddr> {
    match candidates {
        [] => None,
        [only] => Some(*only),
        many => many
            .iter()
            .find(|ip| !ip.is_loopback() && ip.is_ipv4())
            .or_else(|| many.iter().find(|ip| !ip.is_loopback()))
            .or_else(|| many.iter().find(|ip| ip.is_ipv4()))
            .or_else(|| many.first())
            .copied(),
    }
}
