//! # Directory Service
//!
//! In-memory name service: peers register under a type and get back an id and
//! a validation token. Ids are handed out in increasing order starting at 1,
//! across all types. Unregistering requires the token.

use log::info;
use rand::seq::IteratorRandom;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::common::error::{Error, PeerId, Result};
use crate::common::messages::Address;
use crate::rpc::dispatcher::{Dispatcher, DispatcherHandle};
use crate::rpc::operations::{reply, Operations};

struct Registration {
    address: Address,
    token: String,
}

pub struct DirectoryService {
    types: RwLock<HashMap<String, BTreeMap<PeerId, Registration>>>,
    next_id: AtomicU64,
}

impl Default for DirectoryService {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectoryService {
    pub fn new() -> Self {
        Self {
            types: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn register(&self, kind: &str, address: Address) -> (PeerId, String) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let token = Uuid::new_v4().to_string();

        info!("📇 Registered peer {} of type '{}' at {}", id, kind, address);
        self.types
            .write()
            .await
            .entry(kind.to_string())
            .or_default()
            .insert(
                id,
                Registration {
                    address,
                    token: token.clone(),
                },
            );
        (id, token)
    }

    pub async fn unregister(&self, pid: PeerId, kind: &str, token: &str) -> Result<()> {
        let mut types = self.types.write().await;
        let peers = types
            .get_mut(kind)
            .ok_or_else(|| Error::UnknownType(kind.to_string()))?;
        let registration = peers.get(&pid).ok_or(Error::NotFound(pid))?;
        if registration.token != token {
            return Err(Error::protocol(format!("invalid validation token for peer {pid}")));
        }

        peers.remove(&pid);
        if peers.is_empty() {
            types.remove(kind);
        }
        info!("📇 Unregistered peer {} of type '{}'", pid, kind);
        Ok(())
    }

    /// Address of a random peer of `kind`.
    pub async fn require_any(&self, kind: &str) -> Result<Address> {
        let types = self.types.read().await;
        types
            .get(kind)
            .and_then(|peers| peers.values().choose(&mut rand::thread_rng()))
            .map(|registration| registration.address.clone())
            .ok_or_else(|| Error::UnknownType(kind.to_string()))
    }

    /// Every peer of `kind`, ascending by id.
    pub async fn require_all(&self, kind: &str) -> Result<Vec<(PeerId, Address)>> {
        let types = self.types.read().await;
        let peers = types
            .get(kind)
            .ok_or_else(|| Error::UnknownType(kind.to_string()))?;
        Ok(peers
            .iter()
            .map(|(pid, registration)| (*pid, registration.address.clone()))
            .collect())
    }

    pub async fn require_object(&self, kind: &str, pid: PeerId) -> Result<Address> {
        let types = self.types.read().await;
        let peers = types
            .get(kind)
            .ok_or_else(|| Error::UnknownType(kind.to_string()))?;
        peers
            .get(&pid)
            .map(|registration| registration.address.clone())
            .ok_or(Error::NotFound(pid))
    }

    pub fn operations(self: &Arc<Self>) -> Operations {
        let mut ops = Operations::new();

        let service = self.clone();
        ops.register("register", move |mut params| {
            let service = service.clone();
            async move {
                let kind: String = params.next("type")?;
                let address: Address = params.next("address")?;
                reply(service.register(&kind, address).await)
            }
        });

        let service = self.clone();
        ops.register("unregister", move |mut params| {
            let service = service.clone();
            async move {
                let pid: PeerId = params.next("id")?;
                let kind: String = params.next("type")?;
                let token: String = params.next("token")?;
                service.unregister(pid, &kind, &token).await?;
                reply(())
            }
        });

        let service = self.clone();
        ops.register("require_any", move |mut params| {
            let service = service.clone();
            async move {
                let kind: String = params.next("type")?;
                reply(service.require_any(&kind).await?)
            }
        });

        let service = self.clone();
        ops.register("require_all", move |mut params| {
            let service = service.clone();
            async move {
                let kind: String = params.next("type")?;
                reply(service.require_all(&kind).await?)
            }
        });

        let service = self.clone();
        ops.register("require_object", move |mut params| {
            let service = service.clone();
            async move {
                let kind: String = params.next("type")?;
                let pid: PeerId = params.next("id")?;
                reply(service.require_object(&kind, pid).await?)
            }
        });

        ops
    }

    /// Bind `address` and serve this directory until the handle is stopped.
    pub async fn listen(self: Arc<Self>, address: &Address) -> Result<DispatcherHandle> {
        let dispatcher = Dispatcher::bind(address).await?;
        info!("📇 Directory service on {}", dispatcher.local_addr());
        Ok(dispatcher.serve(self.operations()))
    }
}
