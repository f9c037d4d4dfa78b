//! # Dispatcher (Skeleton)
//!
//! Listens on a bound address and serves one request per connection:
//!
//! 1. Accept the connection and spawn a task for it
//! 2. Read exactly one request line
//! 3. Resolve the method in the owner's [`Operations`] and run it
//! 4. Write `{result}` or `{error}` back and close
//!
//! A failing connection is logged and dropped; it never takes the accept loop
//! down. The loop only ends when [`DispatcherHandle::stop`] is called.

use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use super::operations::Operations;
use crate::common::connection::Connection;
use crate::common::error::{Error, Result};
use crate::common::messages::{Address, Request, Response};

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A bound listener that is not serving yet.
///
/// Binding and serving are separate steps so that a peer can learn its real
/// address (and register it) before it has built the operations it exposes.
/// Connections arriving in between wait in the listen backlog.
pub struct Dispatcher {
    listener: TcpListener,
    local_addr: SocketAddr,
}

/// Running accept loop.
pub struct DispatcherHandle {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Dispatcher {
    pub async fn bind(address: &Address) -> Result<Self> {
        let listener = TcpListener::bind((address.host.as_str(), address.port))
            .await
            .map_err(|e| Error::communication(format!("failed to bind to {address}: {e}")))?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Start accepting connections and routing them to `operations`.
    pub fn serve(self, operations: Operations) -> DispatcherHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let local_addr = self.local_addr;

        info!("📡 Dispatcher listening on {}", local_addr);
        let task = tokio::spawn(accept_loop(
            self.listener,
            Arc::new(operations),
            shutdown_rx,
        ));

        DispatcherHandle {
            local_addr,
            shutdown,
            task,
        }
    }
}

impl DispatcherHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting new connections. Requests already being served finish
    /// on their own tasks.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!("❌ Dispatcher task on {} failed: {}", self.local_addr, e);
        }
        info!("🛑 Dispatcher on {} stopped", self.local_addr);
    }
}

async fn accept_loop(
    listener: TcpListener,
    operations: Arc<Operations>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((socket, addr)) => {
                    debug!("🔗 Serving a request from {}", addr);
                    let operations = operations.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(socket, &operations).await {
                            warn!("⚠️  Request from {} failed: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("❌ Accept error: {}", e);
                    sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }
}

/// Serve the single request carried by `socket`.
async fn handle_connection(socket: TcpStream, operations: &Operations) -> Result<()> {
    let mut conn = Connection::new(socket);

    let response = match conn.read_message::<Request>().await {
        Ok(Some(request)) => operations.dispatch(request).await,
        Ok(None) => {
            debug!("🔌 Connection closed before a request arrived");
            return Ok(());
        }
        Err(e) => {
            warn!("⚠️  Unreadable request: {}", e);
            Response::from(Err(e))
        }
    };

    conn.write_message(&response).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::operations::reply;
    use crate::rpc::proxy::Proxy;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    async fn echo_server() -> (DispatcherHandle, Proxy) {
        let mut ops = Operations::new();
        ops.register("echo", |mut params| async move {
            let value: serde_json::Value = params.next("value")?;
            reply(value)
        });
        let dispatcher = Dispatcher::bind(&Address::new("127.0.0.1", 0)).await.unwrap();
        let port = dispatcher.local_addr().port();
        (dispatcher.serve(ops), Proxy::new(Address::new("127.0.0.1", port)))
    }

    #[tokio::test]
    async fn serves_concurrent_requests() {
        let (handle, proxy) = echo_server().await;

        let calls = (0..8).map(|i| {
            let proxy = proxy.clone();
            tokio::spawn(async move { proxy.invoke("echo", vec![json!({"n": i})]).await })
        });
        for (i, call) in calls.enumerate() {
            assert_eq!(call.await.unwrap().unwrap(), json!({"n": i}));
        }

        handle.stop().await;
    }

    #[tokio::test]
    async fn malformed_request_gets_an_error_and_the_loop_survives() {
        let (handle, proxy) = echo_server().await;

        let mut raw = TcpStream::connect(handle.local_addr()).await.unwrap();
        raw.write_all(b"this is not json\n").await.unwrap();
        let mut line = String::new();
        BufReader::new(&mut raw).read_line(&mut line).await.unwrap();
        let response: Response = serde_json::from_str(line.trim_end()).unwrap();
        match response {
            Response::Error(e) => assert_eq!(e.name, "CommunicationError"),
            other => panic!("expected an error, got {other:?}"),
        }

        // A client that connects and hangs up without a request is harmless too.
        drop(TcpStream::connect(handle.local_addr()).await.unwrap());

        assert_eq!(proxy.invoke("echo", vec![json!(1)]).await.unwrap(), json!(1));
        handle.stop().await;
    }

    #[tokio::test]
    async fn stopped_dispatcher_refuses_calls() {
        let (handle, proxy) = echo_server().await;
        handle.stop().await;

        let err = proxy.invoke("echo", vec![json!(1)]).await.unwrap_err();
        assert!(matches!(err, Error::Communication(_)));
    }
}
