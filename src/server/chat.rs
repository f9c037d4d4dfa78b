//! # Chat Peer
//!
//! The smallest application on top of the peer registry: every chat peer of a
//! type knows every other one and can drop a line into its inbox.
//!
//! ```text
//! Peer 2                                 Peer 5
//!   |-- print_message(2, "hi") ------------>|  inbox <- ChatMessage { from: 2, .. }
//! ```
//!
//! There is no lock and no ordering between senders; a message goes straight
//! to the addressed peer.

use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::common::config::PeerConfig;
use crate::common::error::{PeerId, Result};
use crate::rpc::operations::reply;
use crate::rpc::peer::Peer;
use crate::server::middleware::join_peers;
use crate::server::peer_list::PeerList;

/// A message delivered through `print_message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub from: PeerId,
    pub text: String,
}

pub struct ChatPeer {
    peer: Peer,
    peers: PeerList,
}

impl ChatPeer {
    /// Register, serve and join the other chat peers of the configured type.
    /// Incoming messages arrive on the returned receiver.
    pub async fn start(
        config: &PeerConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ChatMessage>)> {
        let mut peer = Peer::start(config).await?;
        let peers = PeerList::new(peer.identity().clone(), peer.directory().clone());

        let (inbox, messages) = mpsc::unbounded_channel();
        let mut ops = peers.operations();
        ops.register("print_message", move |mut params| {
            let inbox = inbox.clone();
            async move {
                let from: PeerId = params.next("from")?;
                let text: String = params.next("text")?;
                debug!("💬 Message from peer {}: {}", from, text);
                if inbox.send(ChatMessage { from, text }).is_err() {
                    warn!("⚠️  Inbox closed, dropping message from peer {}", from);
                }
                reply(())
            }
        });

        peer.serve(ops)?;
        join_peers(&mut peer, &peers).await?;
        info!("💬 Chat peer {} of type '{}' is up", peer.id(), peer.kind());
        Ok((Self { peer, peers }, messages))
    }

    pub fn id(&self) -> PeerId {
        self.peer.id()
    }

    pub fn peers(&self) -> &PeerList {
        &self.peers
    }

    /// Deliver `text` to peer `to`.
    ///
    /// # Errors
    /// - `NotFound` if `to` is not in the registry
    /// - `Communication` if the peer cannot be reached
    pub async fn send_message(&self, to: PeerId, text: &str) -> Result<()> {
        let proxy = self.peers.peer(to).await?;
        proxy.print_message(self.peer.id(), text).await
    }

    /// Unregister, tell the other peers, stop serving. The first failure is
    /// returned.
    pub async fn destroy(mut self) -> Result<()> {
        info!("🛑 Chat peer {} leaving the system...", self.peer.id());
        let unregistered = self.peer.unregister().await;
        let notified = self.peers.destroy().await;
        self.peer.stop().await;
        unregistered.and(notified)
    }
}
