//! Peer connection and its background worker
//!
//! A `PeerConnection` is the coordinator's handle on a peer: its canonical
//! address, the chain height it last reported and its outbound queue. The
//! socket itself belongs to the worker task spawned by `start_peer`, which
//! drains the outbound queue to the wire and turns inbound messages into
//! replies or control messages for the coordinator.

use crate::codec::{read_frame, write_frame};
use crate::context::{HashAnnouncement, NetworkContext};
use crate::coordinator::ControlMessage;
use crate::error::NetworkError;
use crate::protocol::NetworkMessage;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Receiving end of a peer's outbound queue, owned by its worker
pub type OutboundQueue = mpsc::Receiver<NetworkMessage>;

#[derive(Debug)]
pub struct PeerConnection {
    address: String,
    chain_height: AtomicU64,
    to_peer: mpsc::Sender<NetworkMessage>,
    connected_at: DateTime<Utc>,
    shutdown: Notify,
}

impl PeerConnection {
    pub fn new(address: impl Into<String>, queue_capacity: usize) -> (Arc<Self>, OutboundQueue) {
        let (to_peer, outbound) = mpsc::channel(queue_capacity.max(1));
        let conn = PeerConnection {
            address: address.into(),
            chain_height: AtomicU64::new(0),
            to_peer,
            connected_at: Utc::now(),
            shutdown: Notify::new(),
        };
        (Arc::new(conn), outbound)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn chain_height(&self) -> u64 {
        self.chain_height.load(Ordering::Relaxed)
    }

    pub fn set_chain_height(&self, height: u64) {
        self.chain_height.store(height, Ordering::Relaxed);
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Queue without waiting; fails if the queue is full or the worker is gone
    pub fn try_enqueue(&self, msg: NetworkMessage) -> Result<(), TrySendError<NetworkMessage>> {
        self.to_peer.try_send(msg)
    }

    /// Queue a message, waiting at most `timeout` for room
    pub async fn enqueue(&self, msg: NetworkMessage, timeout: Duration) -> Result<(), NetworkError> {
        let msg = match self.to_peer.try_send(msg) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Closed(_)) => {
                return Err(NetworkError::ConnectionClosed(self.address.clone()))
            }
            Err(TrySendError::Full(msg)) => msg,
        };
        match self.to_peer.send_timeout(msg, timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => {
                Err(NetworkError::Backpressure(self.address.clone()))
            }
            Err(SendTimeoutError::Closed(_)) => {
                Err(NetworkError::ConnectionClosed(self.address.clone()))
            }
        }
    }

    /// Ask the worker to stop. The permit is stored, so this works even if
    /// the worker is not currently waiting.
    pub fn close(&self) {
        self.shutdown.notify_one();
    }

    /// True once the worker has dropped its end of the outbound queue
    pub fn is_closed(&self) -> bool {
        self.to_peer.is_closed()
    }
}

/// Register a freshly dialed or accepted stream and spawn its worker.
///
/// Registration and spawn happen together: a connection is never in the
/// registry without a running worker.
pub fn start_peer(
    ctx: &Arc<NetworkContext>,
    address: String,
    stream: TcpStream,
) -> Result<Arc<PeerConnection>, NetworkError> {
    let (conn, outbound) = PeerConnection::new(address, ctx.config.queue_capacity);
    if !ctx.registry.add(conn.clone()) {
        return Err(NetworkError::AlreadyConnected(conn.address().to_string()));
    }
    spawn_worker(ctx.clone(), conn.clone(), stream, outbound);
    Ok(conn)
}

pub fn spawn_worker(
    ctx: Arc<NetworkContext>,
    conn: Arc<PeerConnection>,
    stream: TcpStream,
    outbound: OutboundQueue,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match run_worker(&ctx, &conn, stream, outbound).await {
            Ok(()) | Err(NetworkError::ConnectionClosed(_)) => {
                info!(peer = %conn.address(), "connection closed")
            }
            Err(NetworkError::Backpressure(_)) => {
                warn!(peer = %conn.address(), "peer stopped reading");
                ctx.quarantine(conn.address(), "write stalled");
            }
            Err(e) => warn!(peer = %conn.address(), error = %e, "connection failed"),
        }
        ctx.registry.remove_if_same(&conn);
    })
}

enum Action {
    Nothing,
    Reply(NetworkMessage),
    Disconnect,
}

async fn run_worker(
    ctx: &Arc<NetworkContext>,
    conn: &Arc<PeerConnection>,
    stream: TcpStream,
    mut outbound: OutboundQueue,
) -> Result<(), NetworkError> {
    let hello = NetworkMessage::Hello {
        header: ctx.header(),
        chain_height: ctx.local_height()?,
    };
    let (mut reader, mut writer) = stream.into_split();
    let (inbound_tx, mut inbound) = mpsc::channel(ctx.config.queue_capacity.max(1));

    let peer = conn.address().to_string();
    let reader_task = tokio::spawn(async move {
        loop {
            match read_frame(&mut reader).await {
                Ok(Some(msg)) => {
                    if inbound_tx.send(msg).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(peer = %peer, error = %e, "read failed");
                    break;
                }
            }
        }
    });

    let result = pump(ctx, conn, &mut writer, &mut outbound, &mut inbound, hello).await;
    reader_task.abort();
    result
}

async fn pump(
    ctx: &NetworkContext,
    conn: &Arc<PeerConnection>,
    writer: &mut OwnedWriteHalf,
    outbound: &mut OutboundQueue,
    inbound: &mut mpsc::Receiver<NetworkMessage>,
    hello: NetworkMessage,
) -> Result<(), NetworkError> {
    send_frame(ctx, conn, writer, &hello).await?;
    loop {
        tokio::select! {
            _ = conn.shutdown.notified() => return Ok(()),
            outgoing = outbound.recv() => match outgoing {
                Some(msg) => send_frame(ctx, conn, writer, &msg).await?,
                None => return Ok(()),
            },
            incoming = inbound.recv() => match incoming {
                Some(msg) => match handle_inbound(ctx, conn, msg)? {
                    Action::Nothing => {}
                    Action::Reply(reply) => send_frame(ctx, conn, writer, &reply).await?,
                    Action::Disconnect => return Ok(()),
                },
                // Reader hit EOF or an error
                None => return Ok(()),
            },
        }
    }
}

/// Write one frame. A write that cannot finish within the send timeout
/// fails with `Backpressure`; a `close()` while writing fails with
/// `ConnectionClosed`.
async fn send_frame(
    ctx: &NetworkContext,
    conn: &PeerConnection,
    writer: &mut OwnedWriteHalf,
    msg: &NetworkMessage,
) -> Result<(), NetworkError> {
    tokio::select! {
        _ = conn.shutdown.notified() => {
            Err(NetworkError::ConnectionClosed(conn.address().to_string()))
        }
        written = tokio::time::timeout(ctx.config.send_timeout(), write_frame(writer, msg)) => {
            match written {
                Ok(result) => result,
                Err(_) => Err(NetworkError::Backpressure(conn.address().to_string())),
            }
        }
    }
}

fn handle_inbound(
    ctx: &NetworkContext,
    conn: &Arc<PeerConnection>,
    msg: NetworkMessage,
) -> Result<Action, NetworkError> {
    let header = msg.header();
    if header.root != ctx.params.genesis_hash {
        ctx.quarantine(conn.address(), "genesis mismatch");
        return Ok(Action::Disconnect);
    }
    debug!(peer = %conn.address(), kind = msg.kind(), "received message");

    match msg {
        NetworkMessage::Hello {
            header,
            chain_height,
        } => {
            if header.p2p_id == ctx.p2p_id {
                ctx.quarantine(conn.address(), "connected to ourselves");
                return Ok(Action::Disconnect);
            }
            info!(
                peer = %conn.address(),
                height = chain_height,
                version = %header.version,
                "✅ peer handshake"
            );
            conn.set_chain_height(chain_height);
            search_if_ahead(ctx, conn)?;
            Ok(Action::Reply(NetworkMessage::GetPeers {
                header: ctx.header(),
            }))
        }
        NetworkMessage::ChainHeight { height, .. } => {
            conn.set_chain_height(height);
            search_if_ahead(ctx, conn)?;
            Ok(Action::Nothing)
        }
        NetworkMessage::GetBlockHashes {
            min_block_height,
            max_block_height,
            ..
        } => {
            let cap = min_block_height.saturating_add(ctx.config.max_hashes_per_reply as u64);
            let hashes = ctx
                .store
                .hashes_in_range(min_block_height, max_block_height.min(cap))?;
            debug!(
                peer = %conn.address(),
                min = min_block_height,
                max = max_block_height,
                count = hashes.len(),
                "serving block hashes"
            );
            Ok(Action::Reply(NetworkMessage::BlockHashes {
                header: ctx.header(),
                hashes,
            }))
        }
        NetworkMessage::BlockHashes { hashes, .. } => {
            let fresh: Vec<_> = hashes
                .into_iter()
                .filter(|hash| {
                    let key = hash.to_hex();
                    if ctx.recently_requested_blocks.contains(&key) {
                        return false;
                    }
                    ctx.recently_requested_blocks.insert(key);
                    true
                })
                .collect();
            if fresh.is_empty() {
                return Ok(Action::Nothing);
            }
            debug!(peer = %conn.address(), count = fresh.len(), "new block hashes");
            if let Some(sink) = &ctx.announcements {
                let _ = sink.send(HashAnnouncement {
                    peer: conn.address().to_string(),
                    hashes: fresh,
                });
            }
            Ok(Action::Nothing)
        }
        NetworkMessage::GetPeers { .. } => {
            let addresses = ctx
                .registry
                .addresses()
                .into_iter()
                .filter(|address| address != conn.address())
                .collect();
            Ok(Action::Reply(NetworkMessage::Peers {
                header: ctx.header(),
                addresses,
            }))
        }
        NetworkMessage::Peers { addresses, .. } => {
            if !addresses.is_empty() {
                let _ = ctx.control.send(ControlMessage::DiscoverPeers { addresses });
            }
            Ok(Action::Nothing)
        }
    }
}

fn search_if_ahead(ctx: &NetworkContext, conn: &Arc<PeerConnection>) -> Result<(), NetworkError> {
    if conn.chain_height() > ctx.local_height()? {
        let _ = ctx
            .control
            .send(ControlMessage::SearchForBlocks { peer: conn.clone() });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crate::protocol::MessageHeader;
    use crate::registry::PeerRegistry;
    use blockmesh_core::{BlockHash, ChainParams};
    use blockmesh_storage::MemoryStore;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn context(height: u64) -> (NetworkContext, UnboundedReceiver<ControlMessage>) {
        NetworkContext::new(
            ChainParams::testnet(),
            NetworkConfig::default(),
            Arc::new(MemoryStore::with_chain(height)),
            Arc::new(PeerRegistry::new()),
        )
    }

    fn worker_context(send_timeout_ms: u64) -> Arc<NetworkContext> {
        let config = NetworkConfig {
            send_timeout_ms,
            ..NetworkConfig::default()
        };
        let (ctx, _control) = NetworkContext::new(
            ChainParams::testnet(),
            config,
            Arc::new(MemoryStore::with_chain(1)),
            Arc::new(PeerRegistry::new()),
        );
        Arc::new(ctx)
    }

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (local, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (local.unwrap(), accepted.unwrap().0)
    }

    /// Queue close-to-limit frames for a peer that never reads until the
    /// queue stays full or the worker gives up
    async fn fill_until_stalled(ctx: &NetworkContext, conn: &PeerConnection) {
        let frame = NetworkMessage::BlockHashes {
            header: ctx.header(),
            hashes: vec![BlockHash::digest(b"stall"); 14_000],
        };
        for _ in 0..200 {
            match conn.enqueue(frame.clone(), Duration::from_millis(200)).await {
                Ok(()) => {}
                Err(NetworkError::Backpressure(_)) | Err(NetworkError::ConnectionClosed(_)) => {
                    return
                }
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        panic!("outbound queue never filled");
    }

    async fn wait_closed(conn: &PeerConnection) -> bool {
        for _ in 0..100 {
            if conn.is_closed() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        conn.is_closed()
    }

    fn remote_header(ctx: &NetworkContext) -> MessageHeader {
        MessageHeader::new(ctx.p2p_id.wrapping_add(1), ctx.params.genesis_hash)
    }

    #[tokio::test]
    async fn test_enqueue_times_out_when_queue_stays_full() {
        let (conn, _outbound) = PeerConnection::new("10.0.0.1:2016", 1);
        let msg = NetworkMessage::GetPeers {
            header: MessageHeader::new(1, BlockHash::digest(b"genesis")),
        };

        conn.enqueue(msg.clone(), Duration::from_millis(10))
            .await
            .unwrap();
        let err = conn
            .enqueue(msg, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::Backpressure(_)));
    }

    #[tokio::test]
    async fn test_enqueue_reports_closed_worker() {
        let (conn, outbound) = PeerConnection::new("10.0.0.1:2016", 1);
        drop(outbound);

        assert!(conn.is_closed());
        let err = conn
            .enqueue(
                NetworkMessage::GetPeers {
                    header: MessageHeader::new(1, BlockHash::digest(b"genesis")),
                },
                Duration::from_millis(10),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::ConnectionClosed(_)));
    }

    #[tokio::test]
    async fn test_evicted_worker_exits_during_blocked_write() {
        let ctx = worker_context(30_000);
        let (local, _remote) = connected_pair().await;
        let conn = start_peer(&ctx, "127.0.0.1:2016".to_string(), local).unwrap();
        fill_until_stalled(&ctx, &conn).await;

        ctx.evict(&conn, "outbound queue stalled");

        assert!(wait_closed(&conn).await);
        assert!(!ctx.registry.contains("127.0.0.1:2016"));
        assert!(ctx.bad_peers.contains("127.0.0.1:2016"));
    }

    #[tokio::test]
    async fn test_stalled_write_ends_worker_and_quarantines() {
        let ctx = worker_context(200);
        let (local, _remote) = connected_pair().await;
        let conn = start_peer(&ctx, "127.0.0.1:2016".to_string(), local).unwrap();
        fill_until_stalled(&ctx, &conn).await;

        assert!(wait_closed(&conn).await);
        for _ in 0..50 {
            if !ctx.registry.contains("127.0.0.1:2016") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!ctx.registry.contains("127.0.0.1:2016"));
        assert!(ctx.bad_peers.contains("127.0.0.1:2016"));
    }

    #[test]
    fn test_hello_from_taller_peer_requests_search() {
        let (ctx, mut control) = context(100);
        let (conn, _outbound) = PeerConnection::new("10.0.0.1:2016", 5);

        let action = handle_inbound(
            &ctx,
            &conn,
            NetworkMessage::Hello {
                header: remote_header(&ctx),
                chain_height: 120,
            },
        )
        .unwrap();

        assert!(matches!(action, Action::Reply(NetworkMessage::GetPeers { .. })));
        assert_eq!(conn.chain_height(), 120);
        match control.try_recv().unwrap() {
            ControlMessage::SearchForBlocks { peer } => assert!(Arc::ptr_eq(&peer, &conn)),
            other => panic!("unexpected control message: {:?}", other),
        }
    }

    #[test]
    fn test_hello_from_shorter_peer_is_quiet() {
        let (ctx, mut control) = context(100);
        let (conn, _outbound) = PeerConnection::new("10.0.0.1:2016", 5);

        handle_inbound(
            &ctx,
            &conn,
            NetworkMessage::Hello {
                header: remote_header(&ctx),
                chain_height: 90,
            },
        )
        .unwrap();

        assert!(control.try_recv().is_err());
    }

    #[test]
    fn test_genesis_mismatch_quarantines() {
        let (ctx, _control) = context(10);
        let (conn, _outbound) = PeerConnection::new("10.0.0.9:2016", 5);

        let action = handle_inbound(
            &ctx,
            &conn,
            NetworkMessage::ChainHeight {
                header: MessageHeader::new(5, ChainParams::mainnet().genesis_hash),
                height: 50,
            },
        )
        .unwrap();

        assert!(matches!(action, Action::Disconnect));
        assert!(ctx.bad_peers.contains("10.0.0.9:2016"));
    }

    #[test]
    fn test_self_connection_is_dropped() {
        let (ctx, _control) = context(10);
        let (conn, _outbound) = PeerConnection::new("127.0.0.1:2016", 5);

        let action = handle_inbound(
            &ctx,
            &conn,
            NetworkMessage::Hello {
                header: ctx.header(),
                chain_height: 10,
            },
        )
        .unwrap();

        assert!(matches!(action, Action::Disconnect));
        assert!(ctx.bad_peers.contains("127.0.0.1:2016"));
    }

    #[test]
    fn test_serves_requested_hash_range() {
        let (ctx, _control) = context(10);
        let (conn, _outbound) = PeerConnection::new("10.0.0.1:2016", 5);

        let action = handle_inbound(
            &ctx,
            &conn,
            NetworkMessage::GetBlockHashes {
                header: remote_header(&ctx),
                min_block_height: 7,
                max_block_height: 20,
            },
        )
        .unwrap();

        match action {
            Action::Reply(NetworkMessage::BlockHashes { hashes, .. }) => {
                assert_eq!(hashes, ctx.store.hashes_in_range(7, 10).unwrap());
                assert_eq!(hashes.len(), 3);
            }
            _ => panic!("expected block hashes reply"),
        }
    }

    #[test]
    fn test_block_hashes_are_announced_once() {
        let (ctx, _control) = context(0);
        let (sink, mut announcements) = mpsc::unbounded_channel();
        let ctx = ctx.with_announcements(sink);
        let (conn, _outbound) = PeerConnection::new("10.0.0.1:2016", 5);
        let hashes = vec![BlockHash::digest(b"a"), BlockHash::digest(b"b")];

        for _ in 0..2 {
            handle_inbound(
                &ctx,
                &conn,
                NetworkMessage::BlockHashes {
                    header: remote_header(&ctx),
                    hashes: hashes.clone(),
                },
            )
            .unwrap();
        }

        let first = announcements.try_recv().unwrap();
        assert_eq!(first.hashes, hashes);
        assert_eq!(first.peer, "10.0.0.1:2016");
        assert!(announcements.try_recv().is_err());
    }

    #[test]
    fn test_peer_gossip_becomes_discovery() {
        let (ctx, mut control) = context(0);
        let (conn, _outbound) = PeerConnection::new("10.0.0.1:2016", 5);

        handle_inbound(
            &ctx,
            &conn,
            NetworkMessage::Peers {
                header: remote_header(&ctx),
                addresses: vec!["10.0.0.2:9999".to_string()],
            },
        )
        .unwrap();

        match control.try_recv().unwrap() {
            ControlMessage::DiscoverPeers { addresses } => {
                assert_eq!(addresses, vec!["10.0.0.2:9999".to_string()])
            }
            other => panic!("unexpected control message: {:?}", other),
        }
    }
}
