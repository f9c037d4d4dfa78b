//! # Fortune Server - Replicated Fortune Database
//!
//! Every fortune server of the same type holds a full copy of the database.
//!
//! - `read()` serves from the local copy under the read lock; no network.
//! - `write(fortune)` takes the distributed write lock, stores the fortune
//!   locally and pushes it to every other server with `write_no_lock`
//!   ("write all"), then releases.
//! - `write_no_lock(fortune)` stores locally; only called by a server that
//!   already holds the write lock.
//!
//! [`FortuneCore`] is the application logic; membership and the lock protocol
//! come from the [`LockNode`] middleware.

use log::{info, warn};
use std::sync::Arc;

use crate::common::config::ServerConfig;
use crate::common::error::Result;
use crate::lock::read_write::DistributedRwLock;
use crate::rpc::operations::{reply, Operations};
use crate::server::database::Database;
use crate::server::middleware::LockNode;
use crate::server::peer_list::PeerList;

/// Fortune reads and writes, coordinated through the read/write lock.
///
/// Cloning is cheap; clones share the database and the lock.
#[derive(Clone)]
pub struct FortuneCore {
    database: Arc<Database>,
    rw_lock: DistributedRwLock,
    peers: PeerList,
}

impl FortuneCore {
    pub fn new(database: Arc<Database>, rw_lock: DistributedRwLock, peers: PeerList) -> Self {
        Self {
            database,
            rw_lock,
            peers,
        }
    }

    pub async fn read(&self) -> String {
        let _guard = self.rw_lock.read_acquire().await;
        self.database.read().await
    }

    /// Store `fortune` on every server of this type.
    ///
    /// # Errors
    /// - lock acquisition failures
    /// - `Storage` if the local write fails
    /// - the first replication failure; every peer is still tried
    pub async fn write(&self, fortune: &str) -> Result<()> {
        let guard = self.rw_lock.write_acquire().await?;
        let written = self.write_all(fortune).await;
        let released = guard.release().await;
        written.and(released)
    }

    pub async fn write_no_lock(&self, fortune: &str) -> Result<()> {
        self.database.write(fortune).await
    }

    async fn write_all(&self, fortune: &str) -> Result<()> {
        self.database.write(fortune).await?;

        let mut outcome = Ok(());
        for (pid, proxy) in self.peers.peers().await {
            if let Err(e) = proxy.write_no_lock(fortune).await {
                warn!("⚠️  Replicating fortune to peer {} failed: {}", pid, e);
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
        }
        outcome
    }

    pub fn operations(&self) -> Operations {
        let mut ops = Operations::new();

        let core = self.clone();
        ops.register("read", move |_| {
            let core = core.clone();
            async move { reply(core.read().await) }
        });

        let core = self.clone();
        ops.register("write", move |mut params| {
            let core = core.clone();
            async move {
                let fortune: String = params.next("fortune")?;
                core.write(&fortune).await?;
                reply(())
            }
        });

        let core = self.clone();
        ops.register("write_no_lock", move |mut params| {
            let core = core.clone();
            async move {
                let fortune: String = params.next("fortune")?;
                core.write_no_lock(&fortune).await?;
                reply(())
            }
        });

        ops
    }
}

/// A running fortune server peer.
pub struct FortuneServer {
    node: LockNode,
    core: FortuneCore,
}

impl FortuneServer {
    /// Open the database, register with the directory and start serving.
    pub async fn start(config: &ServerConfig) -> Result<Self> {
        let database = Arc::new(Database::open(&config.database.file).await?);
        let mut node = LockNode::start(&config.peer).await?;

        let rw_lock = DistributedRwLock::new(node.lock().clone());
        let core = FortuneCore::new(database, rw_lock, node.peers().clone());

        let mut ops = node.operations();
        ops.extend(core.operations());
        node.serve(ops).await?;

        info!("🥠 Fortune server {} ready", node.id());
        Ok(Self { node, core })
    }

    pub fn node(&self) -> &LockNode {
        &self.node
    }

    pub fn core(&self) -> &FortuneCore {
        &self.core
    }

    pub async fn destroy(self) -> Result<()> {
        self.node.destroy().await
    }
}
