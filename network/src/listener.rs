//! Inbound peer listener
use crate::connection::start_peer;
use crate::context::NetworkContext;
use crate::discovery::canonical_address;
use crate::error::NetworkError;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub struct PeerListener {
    listener: TcpListener,
    ctx: Arc<NetworkContext>,
}

impl PeerListener {
    pub async fn bind(ctx: Arc<NetworkContext>, listen_addr: SocketAddr) -> Result<Self, NetworkError> {
        let listener = TcpListener::bind(listen_addr).await?;
        info!(addr = %listener.local_addr()?, "👂 listening for peers");
        Ok(PeerListener { listener, ctx })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, remote)) => self.admit(stream, remote),
                    Err(e) => warn!(error = %e, "accept failed"),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Register an accepted stream under the canonical form of the remote IP.
    /// Known and quarantined peers are turned away by dropping the socket.
    fn admit(&self, stream: TcpStream, remote: SocketAddr) {
        let address = match canonical_address(&remote.to_string(), self.ctx.params.default_port) {
            Some(address) => address,
            None => return,
        };
        if self.ctx.bad_peers.contains(&address) {
            debug!(peer = %address, "rejecting quarantined peer");
            return;
        }
        match start_peer(&self.ctx, address.clone(), stream) {
            Ok(_) => info!(peer = %address, "📥 accepted peer"),
            Err(e) => debug!(peer = %address, error = %e, "rejecting inbound connection"),
        }
    }
}
