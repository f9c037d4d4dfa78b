//! End-to-end tests: an in-process directory and real peers on loopback.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use peer_lock::common::config::{DatabaseConfig, PeerConfig, ServerConfig};
use peer_lock::discovery::DirectoryService;
use peer_lock::lock::TokenState;
use peer_lock::rpc::{reply, Dispatcher, DispatcherHandle, Operations, Proxy};
use peer_lock::server::{ChatMessage, ChatPeer, FortuneServer, LockNode};
use peer_lock::{Address, Error, PeerId};
use tempfile::tempdir;

async fn directory() -> (DispatcherHandle, Address) {
    let handle = Arc::new(DirectoryService::new())
        .listen(&Address::new("127.0.0.1", 0))
        .await
        .unwrap();
    let address = Address::new("127.0.0.1", handle.local_addr().port());
    (handle, address)
}

fn peer_config(kind: &str, directory: &Address) -> PeerConfig {
    PeerConfig {
        host: "127.0.0.1".to_string(),
        port: Some(0),
        kind: kind.to_string(),
        directory: directory.clone(),
    }
}

async fn lock_node(kind: &str, directory: &Address) -> LockNode {
    let mut node = LockNode::start(&peer_config(kind, directory)).await.unwrap();
    let operations = node.operations();
    node.serve(operations).await.unwrap();
    node
}

async fn cluster(size: usize) -> (DispatcherHandle, Vec<LockNode>) {
    let (handle, address) = directory().await;
    let mut nodes = Vec::new();
    for _ in 0..size {
        nodes.push(lock_node("mutex_test", &address).await);
    }
    (handle, nodes)
}

async fn state(node: &LockNode) -> TokenState {
    node.lock().display_status().await.state
}

async fn known_ids(node: &LockNode) -> Vec<PeerId> {
    node.peers()
        .display_peers()
        .await
        .into_iter()
        .map(|entry| entry.id)
        .collect()
}

/// Wait until `node` has recorded a token request from `pid`.
async fn request_seen(node: &LockNode, pid: PeerId) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let status = node.lock().display_status().await;
            if status.request.get(&pid).is_some_and(|time| *time > 0) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("request never arrived");
}

fn remote_name(error: Error) -> String {
    match error {
        Error::Remote { name, .. } => name,
        other => panic!("expected a remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn peers_know_each_other_after_bootstrap() {
    let (_directory, nodes) = cluster(3).await;
    let ids: Vec<PeerId> = nodes.iter().map(|node| node.id()).collect();
    assert_eq!(ids, vec![1, 2, 3]);

    assert_eq!(known_ids(&nodes[0]).await, vec![2, 3]);
    assert_eq!(known_ids(&nodes[1]).await, vec![1, 3]);
    assert_eq!(known_ids(&nodes[2]).await, vec![1, 2]);

    let remote = Proxy::new(nodes[0].address().clone());
    let listed = remote.display_peers().await.unwrap();
    assert_eq!(listed[0].address, *nodes[1].address());
    assert_eq!(remote.check().await.unwrap(), (1, "mutex_test".to_string()));
}

#[tokio::test]
async fn only_the_first_peer_starts_with_the_token() {
    let (_directory, nodes) = cluster(3).await;
    assert_eq!(state(&nodes[0]).await, TokenState::TokenPresent);
    assert_eq!(state(&nodes[1]).await, TokenState::NoToken);
    assert_eq!(state(&nodes[2]).await, TokenState::NoToken);
}

#[tokio::test]
async fn token_travels_to_the_requester() {
    let (_directory, nodes) = cluster(3).await;

    nodes[2].lock().acquire().await.unwrap();
    assert_eq!(state(&nodes[2]).await, TokenState::TokenHeld);
    assert_eq!(state(&nodes[0]).await, TokenState::NoToken);
    assert_eq!(state(&nodes[1]).await, TokenState::NoToken);

    nodes[2].lock().release().await.unwrap();
    assert_eq!(state(&nodes[2]).await, TokenState::TokenPresent);

    nodes[1].lock().acquire().await.unwrap();
    assert_eq!(state(&nodes[1]).await, TokenState::TokenHeld);
    assert_eq!(state(&nodes[2]).await, TokenState::NoToken);
    nodes[1].lock().release().await.unwrap();
}

#[tokio::test]
async fn lone_peer_locks_locally() {
    let (_directory, nodes) = cluster(1).await;
    let lock = nodes[0].lock();
    for _ in 0..3 {
        lock.acquire().await.unwrap();
        lock.release().await.unwrap();
    }
    assert_eq!(state(&nodes[0]).await, TokenState::TokenPresent);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn at_most_one_holder_at_a_time() {
    let (_directory, nodes) = cluster(3).await;
    let inside = Arc::new(AtomicUsize::new(0));
    let entries = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = nodes
        .iter()
        .map(|node| {
            let lock = node.lock().clone();
            let inside = inside.clone();
            let entries = entries.clone();
            tokio::spawn(async move {
                for _ in 0..4 {
                    lock.acquire().await.unwrap();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                    entries.fetch_add(1, Ordering::SeqCst);
                    lock.release().await.unwrap();
                }
            })
        })
        .collect();

    for worker in workers {
        tokio::time::timeout(Duration::from_secs(30), worker)
            .await
            .expect("lock protocol stalled")
            .unwrap();
    }
    assert_eq!(entries.load(Ordering::SeqCst), 12);

    let mut holders = 0;
    for node in &nodes {
        if state(node).await != TokenState::NoToken {
            holders += 1;
        }
    }
    assert_eq!(holders, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn late_joiner_serves_a_request_made_before_it_joined() {
    let (directory_handle, nodes) = cluster(2).await;
    let address = Address::new("127.0.0.1", directory_handle.local_addr().port());

    nodes[1].lock().acquire().await.unwrap();

    let first = nodes[0].lock().clone();
    let waiting = tokio::spawn(async move { first.acquire().await });
    request_seen(&nodes[1], 1).await;

    let third = lock_node("mutex_test", &address).await;
    assert_eq!(third.id(), 3);
    let lock = third.lock().clone();
    let joining = tokio::spawn(async move { lock.acquire().await });
    request_seen(&nodes[1], 3).await;

    // Ring order from peer 2 reaches peer 3 before peer 1.
    nodes[1].lock().release().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), joining)
        .await
        .expect("peer 3 never got the token")
        .unwrap()
        .unwrap();
    assert_eq!(state(&third).await, TokenState::TokenHeld);

    third.lock().release().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), waiting)
        .await
        .expect("peer 1 starved")
        .unwrap()
        .unwrap();
    assert_eq!(state(&nodes[0]).await, TokenState::TokenHeld);
    assert_eq!(state(&third).await, TokenState::NoToken);
}

#[tokio::test]
async fn failed_bootstrap_leaves_nothing_behind() {
    let (_directory, address) = directory().await;
    let directory = Proxy::new(address.clone());

    let first = lock_node("mutex_test", &address).await;
    let dead = Address::new("127.0.0.1", 1);
    let (dead_id, _) = directory.register("mutex_test", &dead).await.unwrap();
    assert_eq!(dead_id, 2);

    let mut node = LockNode::start(&peer_config("mutex_test", &address))
        .await
        .unwrap();
    assert_eq!(node.id(), 3);
    let listening = node.address().clone();
    let operations = node.operations();
    let err = node.serve(operations).await.unwrap_err();
    assert!(matches!(err, Error::Communication(_)));

    // Peer 1 was told before peer 2 failed, and was told to forget again.
    assert!(known_ids(&first).await.is_empty());
    assert!(known_ids(&node).await.is_empty());
    assert_eq!(
        directory.require_all("mutex_test").await.unwrap(),
        vec![(1, first.address().clone()), (dead_id, dead)]
    );
    assert!(matches!(
        Proxy::new(listening).check().await,
        Err(Error::Communication(_))
    ));
}

#[tokio::test]
async fn lowest_peer_announces_itself_to_nobody() {
    let (_directory, address) = directory().await;
    let directory = Proxy::new(address.clone());

    let mut first = LockNode::start(&peer_config("mutex_test", &address))
        .await
        .unwrap();
    assert_eq!(first.id(), 1);

    // A stand-in for peer 2 that only counts announcements.
    let announcements = Arc::new(AtomicUsize::new(0));
    let counter = announcements.clone();
    let mut ops = Operations::new();
    ops.register("register_peer", move |_| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            reply(Option::<u64>::None)
        }
    });
    let listener = Dispatcher::bind(&Address::new("127.0.0.1", 0)).await.unwrap();
    let counted = Address::new("127.0.0.1", listener.local_addr().port());
    let counting = listener.serve(ops);
    let (counted_id, _) = directory.register("mutex_test", &counted).await.unwrap();
    assert_eq!(counted_id, 2);

    let operations = first.operations();
    first.serve(operations).await.unwrap();
    assert_eq!(announcements.load(Ordering::SeqCst), 0);
    assert!(known_ids(&first).await.is_empty());

    let third = lock_node("mutex_test", &address).await;
    assert_eq!(third.id(), 3);
    assert_eq!(announcements.load(Ordering::SeqCst), 1);
    assert_eq!(known_ids(&first).await, vec![3]);

    counting.stop().await;
}

#[tokio::test]
async fn chat_messages_reach_the_addressed_peer() {
    let (_directory, address) = directory().await;
    let config = peer_config("chat_test", &address);

    let (first, _first_inbox) = ChatPeer::start(&config).await.unwrap();
    let (second, mut second_inbox) = ChatPeer::start(&config).await.unwrap();
    assert_eq!((first.id(), second.id()), (1, 2));

    first.send_message(2, "hello from one").await.unwrap();
    assert_eq!(
        second_inbox.recv().await.unwrap(),
        ChatMessage {
            from: 1,
            text: "hello from one".to_string()
        }
    );

    assert!(matches!(
        first.send_message(9, "anyone?").await,
        Err(Error::NotFound(9))
    ));

    second.destroy().await.unwrap();
    assert!(matches!(
        first.send_message(2, "gone").await,
        Err(Error::NotFound(2))
    ));
    first.destroy().await.unwrap();
}

#[tokio::test]
async fn remote_console_controls_the_lock() {
    let (_directory, nodes) = cluster(2).await;
    let second = Proxy::new(nodes[1].address().clone());

    let err = second.release().await.unwrap_err();
    assert_eq!(remote_name(err), "ProtocolError");

    second.acquire().await.unwrap();
    assert_eq!(second.display_status().await.unwrap().state, TokenState::TokenHeld);
    second.release().await.unwrap();
    assert_eq!(
        second.display_status().await.unwrap().state,
        TokenState::TokenPresent
    );
}

#[tokio::test]
async fn unknown_peer_cannot_leave() {
    let (_directory, nodes) = cluster(2).await;
    let first = Proxy::new(nodes[0].address().clone());

    let err = first.unregister_peer(99).await.unwrap_err();
    assert_eq!(remote_name(err), "NotFoundError");
    assert_eq!(known_ids(&nodes[0]).await, vec![2]);

    let err = first.invoke("no_such_method", vec![]).await.unwrap_err();
    assert_eq!(remote_name(err), "UnknownMethodError");
}

#[tokio::test]
async fn leaving_holder_hands_the_token_on() {
    let (directory_handle, mut nodes) = cluster(2).await;
    let directory = Proxy::new(Address::new(
        "127.0.0.1",
        directory_handle.local_addr().port(),
    ));

    let second = nodes.pop().unwrap();
    let first = nodes.pop().unwrap();
    first.destroy().await.unwrap();

    assert_eq!(state(&second).await, TokenState::TokenPresent);
    assert!(known_ids(&second).await.is_empty());
    assert_eq!(
        directory.require_all("mutex_test").await.unwrap(),
        vec![(2, second.address().clone())]
    );

    second.lock().acquire().await.unwrap();
    second.lock().release().await.unwrap();
    second.destroy().await.unwrap();
}

#[tokio::test]
async fn fortunes_are_written_everywhere() {
    let (_directory, address) = directory().await;
    let dir = tempdir().unwrap();

    let mut servers = Vec::new();
    for name in ["one.db", "two.db"] {
        let config = ServerConfig {
            peer: peer_config("fortune_test", &address),
            database: DatabaseConfig {
                file: dir.path().join(name),
            },
        };
        servers.push(FortuneServer::start(&config).await.unwrap());
    }

    let first = Proxy::new(servers[0].node().address().clone());
    let second = Proxy::new(servers[1].node().address().clone());
    assert_eq!(second.read().await.unwrap(), "");

    second.write("A journey of a thousand miles.").await.unwrap();
    assert_eq!(first.read().await.unwrap(), "A journey of a thousand miles.");
    assert_eq!(second.read().await.unwrap(), "A journey of a thousand miles.");

    for name in ["one.db", "two.db"] {
        let content = std::fs::read_to_string(dir.path().join(name)).unwrap();
        assert_eq!(content, "A journey of a thousand miles.\n%\n");
    }

    // The write lock went back: server 1 can write too.
    first.write("Second fortune.").await.unwrap();
    assert!(!servers[1].core().read().await.is_empty());
}
