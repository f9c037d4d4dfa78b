//! # Peer List - Registry of Same-Type Peers
//!
//! Each peer keeps a registry `id → proxy` of every other live peer of its type.
//!
//! ## Bootstrap Protocol
//!
//! ```text
//! New peer (id N)                Directory            Existing peer (id < N)
//!      |-- require_all(type) -------->|                        |
//!      |<-- [(id, address), ...] -----|                        |
//!      |   keep ids < N                                        |
//!      |-- register_peer(N, address) ------------------------->|
//! ```
//!
//! Peers with a higher id registered after us; they will call our
//! `register_peer` themselves. Both sides end up knowing each other.
//!
//! The registry and the distributed lock state share one mutex, see
//! [`Members`]. Remote calls are always made after it is released.

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use crate::common::error::{Error, PeerId, Result};
use crate::common::messages::Address;
use crate::lock::distributed::{Handoff, LockState};
use crate::rpc::operations::{reply, Operations};
use crate::rpc::peer::Identity;
use crate::rpc::proxy::Proxy;

/// One row of `display_peers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEntry {
    pub id: PeerId,
    pub address: Address,
}

/// Everything guarded by the registry's mutex.
///
/// Membership changes update the lock vectors in the same critical section so
/// that the registry and the lock never disagree about who exists.
#[derive(Debug)]
pub(crate) struct Members {
    pub(crate) peers: BTreeMap<PeerId, Proxy>,
    pub(crate) lock: LockState,
    /// Whether bootstrap found no lower-id peer; `None` before bootstrap
    bootstrap_alone: Option<bool>,
}

impl Members {
    fn new(owner: PeerId) -> Self {
        Self {
            peers: BTreeMap::new(),
            lock: LockState::new(owner),
            bootstrap_alone: None,
        }
    }

    fn join(&mut self, pid: PeerId, address: Address) {
        self.peers.insert(pid, Proxy::new(address));
        self.lock.register_peer(pid);
    }

    fn leave(&mut self, pid: PeerId) -> Result<()> {
        self.peers.remove(&pid).ok_or(Error::NotFound(pid))?;
        self.lock.unregister_peer(pid);
        Ok(())
    }

    pub(crate) fn proxies(&self) -> Vec<(PeerId, Proxy)> {
        self.peers
            .iter()
            .map(|(pid, proxy)| (*pid, proxy.clone()))
            .collect()
    }

    pub(crate) fn initialize_lock(&mut self) -> Option<Handoff> {
        let alone = self.bootstrap_alone.unwrap_or(self.peers.is_empty());
        self.lock.initialize(&self.peers, alone)
    }
}

struct Inner {
    owner: Identity,
    directory: Proxy,
    members: Mutex<Members>,
}

/// Registry of the other live peers of the owner's type.
///
/// Cloning is cheap; all clones share one registry.
#[derive(Clone)]
pub struct PeerList {
    inner: Arc<Inner>,
}

impl PeerList {
    pub fn new(owner: Identity, directory: Proxy) -> Self {
        let members = Mutex::new(Members::new(owner.id));
        Self {
            inner: Arc::new(Inner {
                owner,
                directory,
                members,
            }),
        }
    }

    pub fn owner(&self) -> &Identity {
        &self.inner.owner
    }

    pub(crate) async fn members(&self) -> MutexGuard<'_, Members> {
        self.inner.members.lock().await
    }

    /// Discover the peers of our type and announce ourselves to the lower ids.
    ///
    /// Each announced peer answers with its own pending token request, if it
    /// is waiting for one, so that requests broadcast before we existed are
    /// not lost.
    ///
    /// # Errors
    /// Fails if the directory or any lower-id peer cannot be reached. The
    /// local registry is then rolled back and the peers already told are
    /// asked to forget us again.
    pub async fn initialize(&self) -> Result<()> {
        let owner = self.owner();
        let discovered = self.inner.directory.require_all(&owner.kind).await?;
        let lower: Vec<(PeerId, Address)> = discovered
            .into_iter()
            .filter(|(pid, _)| *pid < owner.id)
            .collect();

        {
            let mut members = self.members().await;
            for (pid, address) in &lower {
                members.join(*pid, address.clone());
            }
            members.bootstrap_alone = Some(lower.is_empty());
        }

        let mut announced = Vec::new();
        for (pid, address) in &lower {
            info!("🔗 Peer {} announcing itself to peer {}", owner.id, pid);
            let proxy = Proxy::new(address.clone());
            match proxy.register_peer(owner.id, &owner.address).await {
                Ok(pending) => {
                    if let Some(time) = pending {
                        debug!("📨 Peer {} is waiting for the token since time {}", pid, time);
                        self.members().await.lock.note_request(*pid, time);
                    }
                    announced.push((*pid, proxy));
                }
                Err(e) => {
                    error!("❌ Peer {} could not reach peer {}: {}", owner.id, pid, e);
                    self.abandon_bootstrap(&lower, &announced).await;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    async fn abandon_bootstrap(
        &self,
        joined: &[(PeerId, Address)],
        announced: &[(PeerId, Proxy)],
    ) {
        let owner = self.owner().id;
        for (pid, proxy) in announced {
            if let Err(e) = proxy.unregister_peer(owner).await {
                warn!("⚠️  Could not withdraw peer {} from peer {}: {}", owner, pid, e);
            }
        }

        let mut members = self.members().await;
        for (pid, _) in joined {
            // Already gone if it left while we were bootstrapping.
            let _ = members.leave(*pid);
        }
        members.bootstrap_alone = None;
    }

    /// Insert or overwrite the entry for `pid`. Answers the time of our own
    /// pending token request, if there is one.
    pub async fn register_peer(&self, pid: PeerId, address: Address) -> Result<Option<u64>> {
        if pid == self.owner().id {
            return Err(Error::protocol(format!(
                "peer {pid} cannot register with itself"
            )));
        }
        let pending = {
            let mut members = self.members().await;
            members.join(pid, address);
            members.lock.pending_request()
        };
        info!("👋 Peer {} has joined the system.", pid);
        Ok(pending)
    }

    pub async fn unregister_peer(&self, pid: PeerId) -> Result<()> {
        self.members().await.leave(pid)?;
        info!("🚪 Peer {} has left the system.", pid);
        Ok(())
    }

    /// Tell every known peer that we are leaving. Every peer is told even if
    /// some of them cannot be reached; the first failure is returned.
    pub async fn destroy(&self) -> Result<()> {
        let owner = self.owner().id;
        let mut outcome = Ok(());
        for (pid, proxy) in self.peers().await {
            if let Err(e) = proxy.unregister_peer(owner).await {
                warn!("⚠️  Could not tell peer {} that peer {} left: {}", pid, owner, e);
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
        }
        outcome
    }

    /// Log the registry and return it in ascending id order.
    pub async fn display_peers(&self) -> Vec<PeerEntry> {
        let entries: Vec<PeerEntry> = self
            .members()
            .await
            .peers
            .iter()
            .map(|(pid, proxy)| PeerEntry {
                id: *pid,
                address: proxy.address().clone(),
            })
            .collect();

        info!("List of peers of type '{}':", self.owner().kind);
        for entry in &entries {
            info!("    id: {:>3}, address: {}", entry.id, entry.address);
        }
        entries
    }

    pub async fn peer(&self, pid: PeerId) -> Result<Proxy> {
        self.members()
            .await
            .peers
            .get(&pid)
            .cloned()
            .ok_or(Error::NotFound(pid))
    }

    /// Snapshot of the registry.
    pub async fn peers(&self) -> Vec<(PeerId, Proxy)> {
        self.members().await.proxies()
    }

    /// `register_peer`, `unregister_peer` and `display_peers`.
    pub fn operations(&self) -> Operations {
        let mut ops = Operations::new();

        let peers = self.clone();
        ops.register("register_peer", move |mut params| {
            let peers = peers.clone();
            async move {
                let pid: PeerId = params.next("id")?;
                let address: Address = params.next("address")?;
                reply(peers.register_peer(pid, address).await?)
            }
        });

        let peers = self.clone();
        ops.register("unregister_peer", move |mut params| {
            let peers = peers.clone();
            async move {
                let pid: PeerId = params.next("id")?;
                peers.unregister_peer(pid).await?;
                reply(())
            }
        });

        let peers = self.clone();
        ops.register("display_peers", move |_| {
            let peers = peers.clone();
            async move { reply(peers.display_peers().await) }
        });

        ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(id: PeerId) -> PeerList {
        let owner = Identity {
            id,
            kind: "peer_list_test".to_string(),
            address: Address::new("127.0.0.1", 1),
        };
        PeerList::new(owner, Proxy::new(Address::new("127.0.0.1", 1)))
    }

    #[tokio::test]
    async fn entries_are_listed_in_ascending_order() {
        let peers = list(5);
        for pid in [9, 2, 7] {
            peers
                .register_peer(pid, Address::new("127.0.0.1", 4000 + pid as u16))
                .await
                .unwrap();
        }
        let ids: Vec<PeerId> = peers.display_peers().await.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![2, 7, 9]);
    }

    #[tokio::test]
    async fn registering_twice_overwrites() {
        let peers = list(1);
        peers.register_peer(2, Address::new("10.0.0.1", 1)).await.unwrap();
        peers.register_peer(2, Address::new("10.0.0.2", 2)).await.unwrap();

        let entries = peers.display_peers().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].address, Address::new("10.0.0.2", 2));
    }

    #[tokio::test]
    async fn unknown_peer_cannot_unregister() {
        let peers = list(1);
        peers.register_peer(2, Address::new("127.0.0.1", 2)).await.unwrap();

        assert!(matches!(peers.unregister_peer(99).await, Err(Error::NotFound(99))));
        assert_eq!(peers.display_peers().await.len(), 1);
    }

    #[tokio::test]
    async fn membership_changes_reach_the_lock_vectors() {
        let peers = list(1);
        peers.members().await.initialize_lock();

        peers.register_peer(3, Address::new("127.0.0.1", 3)).await.unwrap();
        let status = peers.members().await.lock.status();
        assert_eq!(status.request.get(&3), Some(&0));
        assert_eq!(status.token.as_ref().and_then(|t| t.get(&3)), Some(&0));

        peers.unregister_peer(3).await.unwrap();
        let status = peers.members().await.lock.status();
        assert!(!status.request.contains_key(&3));
        assert!(!status.token.unwrap().contains_key(&3));
    }

    #[tokio::test]
    async fn peer_lookup() {
        let peers = list(1);
        peers.register_peer(4, Address::new("127.0.0.1", 44)).await.unwrap();
        assert_eq!(
            peers.peer(4).await.unwrap().address(),
            &Address::new("127.0.0.1", 44)
        );
        assert!(matches!(peers.peer(5).await, Err(Error::NotFound(5))));
    }

    #[tokio::test]
    async fn owner_is_never_its_own_member() {
        let peers = list(1);
        assert!(matches!(
            peers.register_peer(1, Address::new("127.0.0.1", 1)).await,
            Err(Error::Protocol(_))
        ));
        assert!(peers.display_peers().await.is_empty());
    }
}
