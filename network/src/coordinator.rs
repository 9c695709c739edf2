//! P2P coordinator
//!
//! The single decision point of the P2P layer. One task runs `Coordinator::run`
//! and is the only code that touches the coordinator's own fields, so none of
//! them need a lock. Everything else talks to it through the control channel:
//!
//! - connection workers post `SearchForBlocks` when a peer reports a taller chain
//! - address gossip (and startup seeds) arrive as `DiscoverPeers`
//! - a separate tick source drives height-growth floods and the periodic
//!   reconnect to saved peers

use crate::connection::{start_peer, PeerConnection};
use crate::context::NetworkContext;
use crate::discovery::{canonical_address, dial};
use crate::error::NetworkError;
use crate::protocol::NetworkMessage;
use crate::tick::spawn_tick_source;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

#[derive(Debug)]
pub enum ControlMessage {
    /// `peer` advertised a chain taller than ours
    SearchForBlocks { peer: Arc<PeerConnection> },
    /// Candidate addresses to probe and possibly adopt
    DiscoverPeers { addresses: Vec<String> },
}

pub struct Coordinator {
    ctx: Arc<NetworkContext>,
    control: mpsc::UnboundedReceiver<ControlMessage>,
    last_tick_blockchain_height: u64,
    last_reconnect_time: Instant,
}

impl Coordinator {
    pub fn new(ctx: Arc<NetworkContext>, control: mpsc::UnboundedReceiver<ControlMessage>) -> Self {
        Coordinator {
            ctx,
            control,
            last_tick_blockchain_height: 0,
            last_reconnect_time: Instant::now(),
        }
    }

    pub fn context(&self) -> &Arc<NetworkContext> {
        &self.ctx
    }

    pub fn last_tick_blockchain_height(&self) -> u64 {
        self.last_tick_blockchain_height
    }

    pub fn last_reconnect_time(&self) -> Instant {
        self.last_reconnect_time
    }

    /// Read the persisted height so the first tick only floods real growth
    pub fn init_height(&mut self) {
        match self.ctx.local_height() {
            Ok(height) => self.last_tick_blockchain_height = height,
            Err(e) => error!(error = %e, "failed to read chain height"),
        }
    }

    /// Run until `shutdown` flips to true or every control sender is gone
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        self.init_height();
        let (mut ticks, tick_task) = spawn_tick_source(self.ctx.config.tick_interval());
        info!(
            height = self.last_tick_blockchain_height,
            p2p_id = self.ctx.p2p_id,
            "🌐 p2p coordinator started"
        );

        loop {
            tokio::select! {
                msg = self.control.recv() => match msg {
                    Some(msg) => self.handle_control(msg).await,
                    None => break,
                },
                tick = ticks.recv() => match tick {
                    Some(()) => self.handle_time_tick().await,
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tick_task.abort();
        info!("p2p coordinator stopped");
    }

    /// Process whatever is already queued, without waiting for more.
    /// Returns the number of control messages handled.
    pub async fn drain_control(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(msg) = self.control.try_recv() {
            self.handle_control(msg).await;
            handled += 1;
        }
        handled
    }

    pub async fn handle_control(&mut self, msg: ControlMessage) {
        match msg {
            ControlMessage::SearchForBlocks { peer } => self.handle_search_for_blocks(peer).await,
            ControlMessage::DiscoverPeers { addresses } => {
                self.handle_discover_peers(addresses).await
            }
        }
    }

    /// Ask a taller peer for the hashes we are missing.
    ///
    /// The first peer seen with a taller chain is trusted; there is no quorum.
    pub async fn handle_search_for_blocks(&mut self, peer: Arc<PeerConnection>) {
        let local_height = match self.ctx.local_height() {
            Ok(height) => height,
            Err(e) => {
                error!(error = %e, "failed to read chain height");
                return;
            }
        };
        let peer_height = peer.chain_height();
        if peer_height <= local_height {
            return;
        }

        let range_key = format!("{}-{}", local_height, peer_height);
        if self.ctx.recently_requested_blocks.contains(&range_key) {
            debug!(range = %range_key, "hash range recently requested, skipping");
            return;
        }
        self.ctx.recently_requested_blocks.insert(range_key);

        info!(
            peer = %peer.address(),
            from = local_height,
            to = peer_height,
            "🔍 searching for blocks"
        );
        let msg = NetworkMessage::GetBlockHashes {
            header: self.ctx.header(),
            min_block_height: local_height,
            max_block_height: peer_height,
        };
        if let Err(e) = peer.enqueue(msg, self.ctx.config.send_timeout()).await {
            self.drop_unresponsive(&peer, e);
        }
    }

    /// Canonicalize, filter, dial and register each candidate. A failing
    /// candidate is logged and skipped; the rest of the batch still runs.
    pub async fn handle_discover_peers(&mut self, addresses: Vec<String>) {
        for address in addresses {
            let canonical = match canonical_address(&address, self.ctx.params.default_port) {
                Some(canonical) => canonical,
                None => {
                    debug!(address = %address, "ignoring empty peer address");
                    continue;
                }
            };
            if self.ctx.is_known_or_bad(&canonical) || self.is_own_address(&canonical) {
                continue;
            }

            match self.connect(&canonical).await {
                Ok(_) => {
                    info!(peer = %canonical, "🤝 discovered canonical peer");
                    if let Err(e) = self.ctx.store.save_peer_address(&canonical) {
                        error!(peer = %canonical, error = %e, "failed to save peer address");
                    }
                }
                Err(NetworkError::AlreadyConnected(_)) => {
                    debug!(peer = %canonical, "peer connected while we were dialing");
                }
                Err(e) => {
                    warn!(peer = %canonical, error = %e, "discovery dial failed");
                    self.ctx.quarantine(&canonical, "dial failed");
                }
            }
        }
    }

    /// Periodic maintenance. Timing is imprecise; nothing here depends on
    /// the exact tick period.
    pub async fn handle_time_tick(&mut self) {
        self.on_tick(Instant::now()).await;
    }

    /// Tick handling against an explicit clock reading
    pub async fn on_tick(&mut self, now: Instant) {
        match self.ctx.local_height() {
            Ok(new_height) if new_height > self.last_tick_blockchain_height => {
                self.flood_new_blocks(self.last_tick_blockchain_height, new_height)
                    .await;
                self.last_tick_blockchain_height = new_height;
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "failed to read chain height"),
        }

        self.ctx.recently_requested_blocks.purge_expired();
        self.ctx.bad_peers.purge_expired();

        if now.saturating_duration_since(self.last_reconnect_time)
            >= self.ctx.config.reconnect_interval()
        {
            self.last_reconnect_time = now;
            self.log_peer_status();
            self.connect_saved_peers().await;
        }
    }

    /// Send the hashes for `(min_exclusive, max_inclusive]` to every
    /// registered peer, once each. The range goes out as consecutive
    /// `BlockHashes` frames of at most `max_hashes_per_reply` hashes, in
    /// height order, followed by a single `ChainHeight`.
    pub async fn flood_new_blocks(&mut self, min_exclusive: u64, max_inclusive: u64) {
        let hashes = match self.ctx.store.hashes_in_range(min_exclusive, max_inclusive) {
            Ok(hashes) => hashes,
            Err(e) => {
                error!(error = %e, "failed to load block hashes for flood");
                return;
            }
        };
        let mut messages: Vec<NetworkMessage> = hashes
            .chunks(self.ctx.config.max_hashes_per_reply.max(1))
            .map(|chunk| NetworkMessage::BlockHashes {
                header: self.ctx.header(),
                hashes: chunk.to_vec(),
            })
            .collect();
        messages.push(NetworkMessage::ChainHeight {
            header: self.ctx.header(),
            height: max_inclusive,
        });

        // Enqueue under the registry lock without waiting; whatever does not
        // fit is retried below once the lock is released.
        let mut lagging: Vec<(Arc<PeerConnection>, Vec<NetworkMessage>)> = Vec::new();
        let mut reached = 0usize;
        self.ctx.registry.for_each(|peer| {
            let mut pending = Vec::new();
            for msg in &messages {
                if !pending.is_empty() {
                    pending.push(msg.clone());
                    continue;
                }
                match peer.try_enqueue(msg.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(msg)) => pending.push(msg),
                    Err(TrySendError::Closed(_)) => {
                        debug!(peer = %peer.address(), "skipping closed connection");
                        return;
                    }
                }
            }
            if pending.is_empty() {
                reached += 1;
            } else {
                lagging.push((peer.clone(), pending));
            }
        });

        let timeout = self.ctx.config.send_timeout();
        for (peer, pending) in lagging {
            let mut delivered = true;
            for msg in pending {
                if let Err(e) = peer.enqueue(msg, timeout).await {
                    self.drop_unresponsive(&peer, e);
                    delivered = false;
                    break;
                }
            }
            if delivered {
                reached += 1;
            }
        }

        info!(
            from = min_exclusive,
            to = max_inclusive,
            frames = messages.len() - 1,
            peers = reached,
            "📡 flooded new block hashes"
        );
    }

    fn log_peer_status(&self) {
        let peers = self.ctx.registry.snapshot();
        info!(
            peers = peers.len(),
            height = self.last_tick_blockchain_height,
            quarantined = self.ctx.bad_peers.len(),
            "📊 peer status"
        );
        for peer in peers {
            debug!(
                peer = %peer.address,
                height = peer.chain_height,
                connected_at = %peer.connected_at,
                "peer"
            );
        }
    }

    /// Redial saved peers that are neither connected nor quarantined
    pub async fn connect_saved_peers(&mut self) {
        let saved = match self.ctx.store.saved_peer_addresses() {
            Ok(saved) => saved,
            Err(e) => {
                error!(error = %e, "failed to load saved peers");
                return;
            }
        };
        debug!(count = saved.len(), "reconnecting to saved peers");

        for address in saved {
            if self.ctx.is_known_or_bad(&address) {
                continue;
            }
            match self.connect(&address).await {
                Ok(_) => info!(peer = %address, "🔄 reconnected to saved peer"),
                Err(NetworkError::AlreadyConnected(_)) => {}
                Err(e) => {
                    warn!(peer = %address, error = %e, "error connecting to saved peer");
                    self.ctx.quarantine(&address, "dial failed");
                }
            }
        }
    }

    async fn connect(&self, address: &str) -> Result<Arc<PeerConnection>, NetworkError> {
        let stream = dial(address, self.ctx.config.dial_timeout()).await?;
        start_peer(&self.ctx, address.to_string(), stream)
    }

    /// A send that timed out is the peer's failure, never the coordinator's
    fn drop_unresponsive(&self, peer: &Arc<PeerConnection>, e: NetworkError) {
        match e {
            NetworkError::ConnectionClosed(_) => {
                debug!(peer = %peer.address(), "peer went away before send");
            }
            e => {
                warn!(peer = %peer.address(), error = %e, "dropping unresponsive peer");
                self.ctx.evict(peer, "outbound queue stalled");
            }
        }
    }

    fn is_own_address(&self, canonical: &str) -> bool {
        match self.ctx.config.listen_addr {
            Some(listen) if !listen.ip().is_unspecified() => {
                canonical_address(&listen.to_string(), self.ctx.params.default_port).as_deref()
                    == Some(canonical)
            }
            _ => false,
        }
    }
}
