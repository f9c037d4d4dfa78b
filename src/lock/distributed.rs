//! # Distributed Lock - Token-Based Mutual Exclusion
//!
//! One token circulates among the peers of a [`PeerList`]; whoever holds it may
//! enter the critical section.
//!
//! ## State Machine
//!
//! ```text
//!              request broadcast,
//!              token received              acquire
//!  NO_TOKEN  ------------------->  TOKEN_PRESENT  ⇄  TOKEN_HELD
//!     ^                                 |         release
//!     +---------------------------------+
//!              token forwarded
//! ```
//!
//! ## Vectors
//!
//! - **request**: peer id → highest request timestamp seen from that peer
//! - **token**: travels with the token; peer id → logical time of that peer's
//!   last grant
//!
//! A peer is owed the token when `request[pid] > token[pid]`. On release the
//! holder scans the ring: ids above its own in ascending order, then ids below
//! its own in ascending order, and forwards to the first peer that is owed.
//!
//! ## Locking
//!
//! All state lives next to the registry, behind the registry's mutex. Every
//! transition is decided and applied inside that critical section; the network
//! hop that follows (broadcasting requests, shipping the token) happens after
//! the mutex is released, so two peers can never wait on each other's locks.

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Notify;

use crate::common::error::{Error, PeerId, Result};
use crate::rpc::proxy::Proxy;
use crate::server::peer_list::PeerList;

/// Peer id → logical timestamp.
pub type TokenVector = BTreeMap<PeerId, u64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenState {
    NoToken,
    TokenPresent,
    TokenHeld,
}

/// Snapshot returned by `display_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStatus {
    pub state: TokenState,
    pub time: u64,
    pub request: TokenVector,
    pub token: Option<TokenVector>,
}

/// Outcome of starting an acquisition.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Acquire {
    /// The token was idle here; the lock is now held.
    Granted,
    /// The token is elsewhere; broadcast a request stamped with this time.
    Request(u64),
}

/// Outcome of a token arriving.
#[derive(Debug)]
pub(crate) enum Arrival {
    /// A local acquisition was waiting for it and now holds the lock.
    Granted,
    /// Nobody here wanted it; possibly somebody else is owed it already.
    Idle(Option<Handoff>),
}

/// A token that has left this peer's state and is about to go over the wire.
#[derive(Debug)]
pub(crate) struct Handoff {
    pub(crate) to: PeerId,
    proxy: Proxy,
    token: TokenVector,
    /// Grant time of `to` before this handoff, put back if the handoff fails
    previous_grant: u64,
}

/// Per-peer lock state. Always accessed under the registry's mutex.
#[derive(Debug)]
pub(crate) struct LockState {
    owner: PeerId,
    state: TokenState,
    time: u64,
    request: TokenVector,
    token: Option<TokenVector>,
    /// A local `acquire` has broadcast its request and waits for the token
    waiting: bool,
}

impl LockState {
    pub(crate) fn new(owner: PeerId) -> Self {
        Self {
            owner,
            state: TokenState::NoToken,
            time: 0,
            request: TokenVector::from([(owner, 0)]),
            token: None,
            waiting: false,
        }
    }

    /// Seed the vectors from the current membership. A peer that found nobody
    /// to join at bootstrap creates the token, and hands it over right away
    /// if a peer that joined meanwhile already asked for it.
    pub(crate) fn initialize(
        &mut self,
        peers: &BTreeMap<PeerId, Proxy>,
        alone: bool,
    ) -> Option<Handoff> {
        for pid in peers.keys().copied().chain([self.owner]) {
            self.request.entry(pid).or_insert(0);
        }
        if alone && self.token.is_none() {
            self.token = Some(self.request.keys().map(|pid| (*pid, 0)).collect());
            self.state = TokenState::TokenPresent;
        }
        self.next_holder(peers)
    }

    pub(crate) fn register_peer(&mut self, pid: PeerId) {
        self.request.entry(pid).or_insert(0);
        if let Some(token) = self.token.as_mut() {
            token.entry(pid).or_insert(0);
        }
    }

    pub(crate) fn unregister_peer(&mut self, pid: PeerId) {
        self.request.remove(&pid);
        if let Some(token) = self.token.as_mut() {
            token.remove(&pid);
        }
    }

    pub(crate) fn is_waiting(&self) -> bool {
        self.waiting
    }

    pub(crate) fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// Timestamp of the local request still waiting for the token, if any.
    /// Handed to joining peers, which never saw the broadcast.
    pub(crate) fn pending_request(&self) -> Option<u64> {
        self.waiting
            .then(|| self.request.get(&self.owner).copied().unwrap_or(0))
    }

    /// Learn about a request made before `pid` knew of us. The token is never
    /// here during bootstrap, so nothing is forwarded.
    pub(crate) fn note_request(&mut self, pid: PeerId, time: u64) {
        if let Some(seen) = self.request.get_mut(&pid) {
            *seen = (*seen).max(time);
            self.time = self.time.max(time);
        }
    }

    pub(crate) fn begin_acquire(&mut self) -> Result<Acquire> {
        if self.state == TokenState::TokenHeld {
            return Err(Error::protocol("the lock is already held by this peer"));
        }
        if self.waiting {
            return Err(Error::protocol("an acquisition is already in progress on this peer"));
        }

        self.time += 1;
        match self.state {
            TokenState::TokenPresent => {
                self.state = TokenState::TokenHeld;
                Ok(Acquire::Granted)
            }
            _ => {
                self.waiting = true;
                self.request.insert(self.owner, self.time);
                Ok(Acquire::Request(self.time))
            }
        }
    }

    /// Give up a request whose broadcast reached nobody. Returns `false` when
    /// the token arrived in the meantime and the lock is held after all.
    pub(crate) fn cancel_request(&mut self) -> bool {
        if !self.waiting {
            return false;
        }
        self.waiting = false;
        true
    }

    pub(crate) fn begin_release(
        &mut self,
        peers: &BTreeMap<PeerId, Proxy>,
    ) -> Result<Option<Handoff>> {
        if self.state != TokenState::TokenHeld {
            return Err(Error::protocol("release called without holding the lock"));
        }
        self.state = TokenState::TokenPresent;
        Ok(self.next_holder(peers))
    }

    pub(crate) fn record_request(
        &mut self,
        time: u64,
        pid: PeerId,
        peers: &BTreeMap<PeerId, Proxy>,
    ) -> Result<Option<Handoff>> {
        let seen = self.request.get_mut(&pid).ok_or(Error::NotFound(pid))?;
        *seen = (*seen).max(time);
        self.time = self.time.max(time);
        Ok(self.next_holder(peers))
    }

    pub(crate) fn install_token(
        &mut self,
        token: TokenVector,
        peers: &BTreeMap<PeerId, Proxy>,
    ) -> Result<Arrival> {
        if self.token.is_some() {
            return Err(Error::protocol("received a token while already possessing one"));
        }

        let granted_at = token.get(&self.owner).copied().unwrap_or(0);
        self.time = self.time.max(granted_at + 1);
        self.token = Some(self.reconcile(token, peers));

        if self.waiting {
            self.waiting = false;
            self.state = TokenState::TokenHeld;
            Ok(Arrival::Granted)
        } else {
            self.state = TokenState::TokenPresent;
            Ok(Arrival::Idle(self.next_holder(peers)))
        }
    }

    /// Take back a token whose handoff failed. Returns `true` if a waiting
    /// local acquisition got the lock as a result.
    pub(crate) fn restore(&mut self, handoff: Handoff, peers: &BTreeMap<PeerId, Proxy>) -> bool {
        if self.token.is_some() {
            return false;
        }

        let mut token = handoff.token;
        token.insert(handoff.to, handoff.previous_grant);
        self.token = Some(self.reconcile(token, peers));

        if self.waiting {
            self.waiting = false;
            self.state = TokenState::TokenHeld;
            true
        } else {
            self.state = TokenState::TokenPresent;
            false
        }
    }

    /// Pick someone to inherit the token when this peer leaves: the first
    /// owed peer in ring order, otherwise the first peer in ring order.
    pub(crate) fn departure(&mut self, peers: &BTreeMap<PeerId, Proxy>) -> Option<Handoff> {
        let token = self.token.as_ref()?;
        let heir = ring(self.owner, peers)
            .find(|pid| self.is_owed(*pid, token))
            .or_else(|| ring(self.owner, peers).next())?;
        self.hand_over(heir, peers)
    }

    pub(crate) fn status(&self) -> LockStatus {
        LockStatus {
            state: self.state,
            time: self.time,
            request: self.request.clone(),
            token: self.token.clone(),
        }
    }

    /// If the token sits idle here and somebody is owed it, take it out of the
    /// local state for shipping.
    fn next_holder(&mut self, peers: &BTreeMap<PeerId, Proxy>) -> Option<Handoff> {
        if self.state != TokenState::TokenPresent {
            return None;
        }
        let token = self.token.as_ref()?;
        let next = ring(self.owner, peers).find(|pid| self.is_owed(*pid, token))?;
        self.hand_over(next, peers)
    }

    fn hand_over(&mut self, to: PeerId, peers: &BTreeMap<PeerId, Proxy>) -> Option<Handoff> {
        let proxy = peers.get(&to)?.clone();
        let mut token = self.token.take()?;
        let previous_grant = token.insert(to, self.time).unwrap_or(0);
        self.time += 1;
        self.state = TokenState::NoToken;
        Some(Handoff {
            to,
            proxy,
            token,
            previous_grant,
        })
    }

    fn is_owed(&self, pid: PeerId, token: &TokenVector) -> bool {
        let requested = self.request.get(&pid).copied().unwrap_or(0);
        let granted = token.get(&pid).copied().unwrap_or(0);
        requested > granted
    }

    /// Make the token's keys match the current membership plus the owner.
    fn reconcile(&self, mut token: TokenVector, peers: &BTreeMap<PeerId, Proxy>) -> TokenVector {
        token.retain(|pid, _| *pid == self.owner || peers.contains_key(pid));
        for pid in peers.keys().copied().chain([self.owner]) {
            token.entry(pid).or_insert(0);
        }
        token
    }
}

/// Ids above `owner` ascending, then ids below `owner` ascending.
fn ring(owner: PeerId, peers: &BTreeMap<PeerId, Proxy>) -> impl Iterator<Item = PeerId> + '_ {
    let above = peers.range(owner + 1..).map(|(pid, _)| *pid);
    let below = peers.range(..owner).map(|(pid, _)| *pid);
    above.chain(below)
}

// ============================================================================
// DISTRIBUTED LOCK - network side of the protocol
// ============================================================================

/// Token-based mutual exclusion across the peers of a [`PeerList`].
///
/// Cloning is cheap; all clones drive the same state.
#[derive(Clone)]
pub struct DistributedLock {
    peers: PeerList,
    token_arrived: Arc<Notify>,
}

impl DistributedLock {
    pub fn new(peers: PeerList) -> Self {
        Self {
            peers,
            token_arrived: Arc::new(Notify::new()),
        }
    }

    fn owner(&self) -> PeerId {
        self.peers.owner().id
    }

    /// Seed the request/token vectors. Must run after the peer list has been
    /// initialized.
    pub async fn initialize(&self) {
        let handoff = {
            let mut guard = self.peers.members().await;
            let handoff = guard.initialize_lock();
            if guard.lock.has_token() || handoff.is_some() {
                info!("🪙 Peer {} starts with the token", self.owner());
            } else {
                info!("⏳ Peer {} starts without the token", self.owner());
            }
            handoff
        };
        if let Some(handoff) = handoff {
            let _ = self.ship(handoff).await;
        }
    }

    /// Block until this peer holds the lock.
    ///
    /// # Errors
    /// - `Protocol` if the lock is already held or being acquired by this peer,
    ///   or if there is neither a token here nor a peer to ask for it
    /// - `Communication` if the request reached no peer at all
    pub async fn acquire(&self) -> Result<()> {
        let owner = self.owner();
        info!("🔒 Peer {} trying to acquire the lock...", owner);

        let (time, targets) = {
            let mut guard = self.peers.members().await;
            match guard.lock.begin_acquire()? {
                Acquire::Granted => {
                    info!("✅ Peer {} acquired the lock (token was idle here)", owner);
                    return Ok(());
                }
                Acquire::Request(time) => (time, guard.proxies()),
            }
        };

        if targets.is_empty() {
            return self
                .abandon_request(Error::protocol("no token here and no peer to request it from"))
                .await;
        }

        debug!("📤 Peer {} broadcasting token request at time {}", owner, time);
        let mut delivered = 0;
        let mut failure = None;
        for (pid, proxy) in &targets {
            match proxy.request_token(time, owner).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!("⚠️  Token request to peer {} failed: {}", pid, e);
                    failure = Some(e);
                }
            }
        }
        if delivered == 0 {
            if let Some(e) = failure {
                return self.abandon_request(e).await;
            }
        }

        loop {
            let notified = self.token_arrived.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.peers.members().await.lock.is_waiting() {
                info!("✅ Peer {} acquired the lock", owner);
                return Ok(());
            }
            notified.await;
        }
    }

    async fn abandon_request(&self, error: Error) -> Result<()> {
        if self.peers.members().await.lock.cancel_request() {
            Err(error)
        } else {
            Ok(())
        }
    }

    /// Release the lock and hand the token to the next owed peer, if any.
    pub async fn release(&self) -> Result<()> {
        info!("🔓 Peer {} releasing the lock...", self.owner());
        let handoff = {
            let mut guard = self.peers.members().await;
            let members = &mut *guard;
            members.lock.begin_release(&members.peers)?
        };
        match handoff {
            Some(handoff) => self.ship(handoff).await,
            None => Ok(()),
        }
    }

    /// Another peer asks for the token.
    pub async fn request_token(&self, time: u64, pid: PeerId) -> Result<()> {
        debug!(
            "📨 Peer {} got a token request from peer {} at time {}",
            self.owner(),
            pid,
            time
        );
        let handoff = {
            let mut guard = self.peers.members().await;
            let members = &mut *guard;
            members.lock.record_request(time, pid, &members.peers)?
        };
        if let Some(handoff) = handoff {
            // The request itself was recorded; a failed handoff is logged by ship.
            let _ = self.ship(handoff).await;
        }
        Ok(())
    }

    /// Another peer hands us the token.
    pub async fn obtain_token(&self, token: TokenVector) -> Result<()> {
        info!("📥 Peer {} receiving the token...", self.owner());
        let arrival = {
            let mut guard = self.peers.members().await;
            let members = &mut *guard;
            members.lock.install_token(token, &members.peers)?
        };
        match arrival {
            Arrival::Granted => self.token_arrived.notify_waiters(),
            Arrival::Idle(Some(handoff)) => {
                let _ = self.ship(handoff).await;
            }
            Arrival::Idle(None) => {}
        }
        Ok(())
    }

    /// Leaving: pass the token on so the lock stays live without us.
    pub async fn destroy(&self) -> Result<()> {
        let (had_token, handoff) = {
            let mut guard = self.peers.members().await;
            let members = &mut *guard;
            (members.lock.has_token(), members.lock.departure(&members.peers))
        };
        match handoff {
            Some(handoff) => self.ship(handoff).await,
            None => {
                if had_token {
                    info!("🪙 Peer {} was the last one; the token leaves with it", self.owner());
                }
                Ok(())
            }
        }
    }

    pub async fn display_status(&self) -> LockStatus {
        let status = self.peers.members().await.lock.status();
        info!("State   :: {:?}", status.state);
        info!("Request :: {:?}", status.request);
        info!("Token   :: {:?}", status.token);
        info!("Time    :: {}", status.time);
        status
    }

    /// Send a token that already left the local state. If it cannot be
    /// delivered it is put back here.
    async fn ship(&self, handoff: Handoff) -> Result<()> {
        let owner = self.owner();
        let to = handoff.to;
        info!("📤 Peer {} forwarding the token to peer {}", owner, to);

        let delivered = handoff.proxy.obtain_token(&handoff.token).await;
        match delivered {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("❌ Token could not reach peer {}: {}; keeping it", to, e);
                let woke = {
                    let mut guard = self.peers.members().await;
                    let members = &mut *guard;
                    members.lock.restore(handoff, &members.peers)
                };
                if woke {
                    self.token_arrived.notify_waiters();
                }
                Err(e)
            }
        }
    }
}
