//! WebSocket hub: accepts peer sessions, learns each peer's source MAC, and
//! fans frames out to the peers that should receive them.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Notify, RwLock};
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use tb_common::mac::{format_mac, is_whitelisted_multicast, BROADCAST_MAC};

struct Peer {
    mac: RwLock<Option<String>>,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

/// Accepts WebSocket sessions and fans Ethernet frames out to the subset of
/// peers matching each frame's destination MAC.
pub struct Hub {
    peers: Arc<RwLock<HashMap<u64, Arc<Peer>>>>,
    next_id: Arc<AtomicU64>,
    on_message: Arc<dyn Fn(Vec<u8>) + Send + Sync>,
    tasks: Arc<tokio::sync::Mutex<JoinSet<()>>>,
    accept_task: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    shutdown: Arc<Notify>,
}

impl Hub {
    /// `on_message` is invoked with every frame received from a peer —
    /// normally wired to the tap adapter's write.
    pub fn new(on_message: impl Fn(Vec<u8>) + Send + Sync + 'static) -> Self {
        Self {
            peers: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
            on_message: Arc::new(on_message),
            tasks: Arc::new(tokio::sync::Mutex::new(JoinSet::new())),
            accept_task: tokio::sync::Mutex::new(None),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Binds `host:port` and begins accepting sessions. Optionally wraps
    /// accepted sockets with TLS.
    pub async fn start(
        &self,
        host: Ipv4Addr,
        port: u16,
        tls: Option<Arc<rustls::ServerConfig>>,
    ) -> Result<()> {
        let listener = TcpListener::bind((host, port))
            .await
            .with_context(|| format!("binding websocket listener on {host}:{port}"))?;
        info!("websocket hub listening on {host}:{port}");

        let peers = self.peers.clone();
        let on_message = self.on_message.clone();
        let tasks = self.tasks.clone();
        let shutdown = self.shutdown.clone();
        let next_id = self.next_id.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    accepted = listener.accept() => {
                        let (stream, addr) = match accepted {
                            Ok(r) => r,
                            Err(e) => {
                                warn!("websocket accept error: {e}");
                                continue;
                            }
                        };
                        let peers = peers.clone();
                        let on_message = on_message.clone();
                        let tls = tls.clone();
                        let id = next_id.fetch_add(1, Ordering::Relaxed);
                        tasks.lock().await.spawn(async move {
                            if let Some(tls_config) = tls {
                                let acceptor = tokio_rustls::TlsAcceptor::from(tls_config);
                                match acceptor.accept(stream).await {
                                    Ok(tls_stream) => {
                                        accept_session(id, tls_stream, peers, on_message).await
                                    }
                                    Err(e) => debug!("TLS handshake failed from {addr}: {e}"),
                                }
                            } else {
                                accept_session(id, stream, peers, on_message).await
                            }
                        });
                    }
                }
            }
        });

        *self.accept_task.lock().await = Some(handle);
        Ok(())
    }

    /// Closes the listener, cancels accept, and drains per-session cleanups.
    pub async fn stop(&self) {
        self.shutdown.notify_one();
        if let Some(handle) = self.accept_task.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }

        let mut tasks = self.tasks.lock().await;
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}

        self.peers.write().await.clear();
    }

    /// Sends `frame` to every peer whose claimed MAC matches its
    /// destination, plus broadcast and whitelisted multicast destinations.
    pub async fn broadcast(&self, frame: &[u8]) {
        if frame.len() < 6 {
            return;
        }
        let dst = match format_mac(&frame[0..6]) {
            Ok(m) => m,
            Err(_) => return,
        };

        let snapshot: Vec<Arc<Peer>> = { self.peers.read().await.values().cloned().collect() };

        for peer in snapshot {
            let claimed = peer.mac.read().await.clone();
            let deliver = dst == BROADCAST_MAC
                || claimed.as_deref() == Some(dst.as_str())
                || is_whitelisted_multicast(&dst);

            if deliver && peer.tx.send(frame.to_vec()).is_err() {
                warn!("dropping frame for a peer that already disconnected");
            }
        }
    }
}

async fn accept_session<S>(
    id: u64,
    stream: S,
    peers: Arc<RwLock<HashMap<u64, Arc<Peer>>>>,
    on_message: Arc<dyn Fn(Vec<u8>) + Send + Sync>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(s) => s,
        Err(e) => {
            debug!("websocket handshake failed: {e}");
            return;
        }
    };

    let (mut sink, mut stream) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();

    let peer = Arc::new(Peer {
        mac: RwLock::new(None),
        tx,
    });
    peers.write().await.insert(id, peer.clone());

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = sink.send(Message::Binary(frame.into())).await {
                warn!("websocket send failed: {e}");
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        match stream.next().await {
            Some(Ok(Message::Binary(data))) => {
                if data.len() >= 12 {
                    let mac = format_mac(&data[6..12]).ok();
                    *peer.mac.write().await = mac;
                    on_message(data.to_vec());
                }
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                use tokio_tungstenite::tungstenite::Error;
                match e {
                    Error::ConnectionClosed | Error::AlreadyClosed => {
                        info!("client disconnected: {e}");
                    }
                    other => error!("unknown exception raised: {other}"),
                }
                break;
            }
        }
    }

    peers.write().await.remove(&id);
    writer.abort();
}

#[cfg(test)]
mod tests {
    use super::*;

    // Exercises the broadcast fan-out policy over a snapshot of fake peers.
    async fn make_peer(mac: Option<&'static str>) -> (Arc<Peer>, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Peer {
                mac: RwLock::new(mac.map(String::from)),
                tx,
            }),
            rx,
        )
    }

    #[tokio::test]
    async fn broadcast_matches_claimed_mac_only() {
        let (peer_a, mut rx_a) = make_peer(Some("aa:aa:aa:aa:aa:01")).await;
        let (peer_b, mut rx_b) = make_peer(Some("aa:aa:aa:aa:aa:02")).await;

        let peers: Arc<RwLock<HashMap<u64, Arc<Peer>>>> = Arc::new(RwLock::new(HashMap::new()));
        peers.write().await.insert(0, peer_a);
        peers.write().await.insert(1, peer_b);

        let hub = Hub {
            peers,
            next_id: Arc::new(AtomicU64::new(0)),
            on_message: Arc::new(|_| {}),
            tasks: Arc::new(tokio::sync::Mutex::new(JoinSet::new())),
            accept_task: tokio::sync::Mutex::new(None),
            shutdown: Arc::new(Notify::new()),
        };

        let mut frame = vec![0u8; 14];
        frame[0..6].copy_from_slice(&[0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0x02]);

        hub.broadcast(&frame).await;

        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap(), frame);
    }

    #[tokio::test]
    async fn broadcast_reaches_everyone_on_broadcast_mac() {
        let (peer_a, mut rx_a) = make_peer(Some("aa:aa:aa:aa:aa:01")).await;
        let (peer_b, mut rx_b) = make_peer(Some("aa:aa:aa:aa:aa:02")).await;
        let peers: Arc<RwLock<HashMap<u64, Arc<Peer>>>> = Arc::new(RwLock::new(HashMap::new()));
        peers.write().await.insert(0, peer_a);
        peers.write().await.insert(1, peer_b);

        let hub = Hub {
            peers,
            next_id: Arc::new(AtomicU64::new(0)),
            on_message: Arc::new(|_| {}),
            tasks: Arc::new(tokio::sync::Mutex::new(JoinSet::new())),
            accept_task: tokio::sync::Mutex::new(None),
            shutdown: Arc::new(Notify::new()),
        };

        let mut frame = vec![0u8; 14];
        frame[0..6].copy_from_slice(&[0xff; 6]);
        hub.broadcast(&frame).await;

        assert_eq!(rx_a.try_recv().unwrap(), frame);
        assert_eq!(rx_b.try_recv().unwrap(), frame);
    }

    #[tokio::test]
    async fn broadcast_reaches_unclaimed_multicast() {
        let (peer_a, mut rx_a) = make_peer(None).await;
        let peers: Arc<RwLock<HashMap<u64, Arc<Peer>>>> = Arc::new(RwLock::new(HashMap::new()));
        peers.write().await.insert(0, peer_a);

        let hub = Hub {
            peers,
            next_id: Arc::new(AtomicU64::new(0)),
            on_message: Arc::new(|_| {}),
            tasks: Arc::new(tokio::sync::Mutex::new(JoinSet::new())),
            accept_task: tokio::sync::Mutex::new(None),
            shutdown: Arc::new(Notify::new()),
        };

        let mut frame = vec![0u8; 14];
        frame[0..6].copy_from_slice(&[0x01, 0x00, 0x5e, 0x00, 0x00, 0xfb]);
        hub.broadcast(&frame).await;

        assert_eq!(rx_a.try_recv().unwrap(), frame);
    }
}
