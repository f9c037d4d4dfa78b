//! # Server Middleware - Peer Coordination
//!
//! Everything a lock-coordinated peer does that is not application logic:
//!
//! ## Core Responsibilities
//!
//! ### 1. Identity
//! - Binds the listener and registers with the directory ([`Peer`])
//!
//! ### 2. Membership
//! - Discovers same-type peers and announces itself to them ([`PeerList`])
//! - Answers `register_peer` / `unregister_peer` from peers joining or leaving
//!
//! ### 3. Mutual Exclusion
//! - Runs the token protocol ([`DistributedLock`]): `request_token`,
//!   `obtain_token`, plus remote console control via `acquire` / `release`
//!
//! ## Startup Order
//!
//! ```text
//! LockNode::start   bind + register with directory   (identity known)
//! LockNode::serve   accept requests                  (peers can reach us)
//!                   peer list bootstrap              (lower ids learn about us,
//!                                                     undone on failure)
//!                   lock initialization              (token or no token)
//! ```
//!
//! Applications such as the fortune server add their own operations on top of
//! [`LockNode::operations`] before calling [`LockNode::serve`].

use log::{info, warn};

use crate::common::config::PeerConfig;
use crate::common::error::{PeerId, Result};
use crate::common::messages::Address;
use crate::lock::distributed::{DistributedLock, TokenVector};
use crate::rpc::operations::{reply, Operations};
use crate::rpc::peer::{Identity, Peer};
use crate::server::peer_list::PeerList;

/// A peer taking part in the distributed lock.
pub struct LockNode {
    peer: Peer,
    peers: PeerList,
    lock: DistributedLock,
}

impl LockNode {
    pub async fn start(config: &PeerConfig) -> Result<Self> {
        let peer = Peer::start(config).await?;
        let peers = PeerList::new(peer.identity().clone(), peer.directory().clone());
        let lock = DistributedLock::new(peers.clone());
        Ok(Self { peer, peers, lock })
    }

    pub fn identity(&self) -> &Identity {
        self.peer.identity()
    }

    pub fn id(&self) -> PeerId {
        self.peer.id()
    }

    pub fn address(&self) -> &Address {
        self.peer.address()
    }

    pub fn peers(&self) -> &PeerList {
        &self.peers
    }

    pub fn lock(&self) -> &DistributedLock {
        &self.lock
    }

    /// The operations every lock peer exposes.
    pub fn operations(&self) -> Operations {
        let mut ops = self.peers.operations();

        let lock = self.lock.clone();
        ops.register("request_token", move |mut params| {
            let lock = lock.clone();
            async move {
                let time: u64 = params.next("time")?;
                let pid: PeerId = params.next("id")?;
                lock.request_token(time, pid).await?;
                reply(())
            }
        });

        let lock = self.lock.clone();
        ops.register("obtain_token", move |mut params| {
            let lock = lock.clone();
            async move {
                let token: TokenVector = params.next("token")?;
                lock.obtain_token(token).await?;
                reply(())
            }
        });

        let lock = self.lock.clone();
        ops.register("acquire", move |_| {
            let lock = lock.clone();
            async move {
                lock.acquire().await?;
                reply(())
            }
        });

        let lock = self.lock.clone();
        ops.register("release", move |_| {
            let lock = lock.clone();
            async move {
                lock.release().await?;
                reply(())
            }
        });

        let lock = self.lock.clone();
        ops.register("display_status", move |_| {
            let lock = lock.clone();
            async move { reply(lock.display_status().await) }
        });

        ops
    }

    /// Start serving `operations`, then join the peer group and set up the lock.
    ///
    /// If the peer group cannot be joined the peer unregisters from the
    /// directory and stops serving before the error is returned.
    pub async fn serve(&mut self, operations: Operations) -> Result<()> {
        self.peer.serve(operations)?;
        join_peers(&mut self.peer, &self.peers).await?;
        self.lock.initialize().await;
        info!(
            "✅ Peer {} of type '{}' is up at {}",
            self.peer.id(),
            self.peer.kind(),
            self.peer.address()
        );
        Ok(())
    }

    /// Leave the system: unregister from the directory, hand the token on,
    /// tell the other peers, stop serving. Every step runs even if an earlier
    /// one failed; the first failure is returned.
    pub async fn destroy(mut self) -> Result<()> {
        let id = self.peer.id();
        info!("🛑 Peer {} leaving the system...", id);

        let steps = [
            ("directory", self.peer.unregister().await),
            ("token handoff", self.lock.destroy().await),
            ("peer notification", self.peers.destroy().await),
        ];
        self.peer.stop().await;

        let mut outcome = Ok(());
        for (step, result) in steps {
            if let Err(e) = result {
                warn!("⚠️  Peer {} shutdown step '{}' failed: {}", id, step, e);
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
        }
        outcome
    }
}

/// Bootstrap `peers` for a peer that is already serving. On failure the peer
/// unregisters from the directory and stops serving before the error is
/// returned.
pub(crate) async fn join_peers(peer: &mut Peer, peers: &PeerList) -> Result<()> {
    let Err(e) = peers.initialize().await else {
        return Ok(());
    };
    warn!("⚠️  Peer {} failed to join its peers: {}", peer.id(), e);
    if let Err(unregistered) = peer.unregister().await {
        warn!("⚠️  Peer {} could not leave the directory: {}", peer.id(), unregistered);
    }
    peer.stop().await;
    Err(e)
}
