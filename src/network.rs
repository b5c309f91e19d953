//! Stream transport and peer registry.
//!
//! Grounded in `examples/original_source/network/transport.go` (the
//! `Transport` interface shape: `Consume`/`Connect`/`Addr`/`Send`/
//! `Broadcast`) and `network/handshake.go` (`DefaultTPCHandshake`/
//! `DefaultHandshakeReply`, the three-message Syn/SynAck/Ack exchange keyed
//! by declared node id rather than socket address). The teacher's
//! `sync.rs::MessageFrame` supplies the length-prefix framing shape, but its
//! 4-byte prefix is little-endian; this implementation uses big-endian per
//! the wire format this spec pins.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::sync::RwLock;

use crate::codec;

pub type NetAddr = String;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NetworkError {
    #[error("handshake failed")]
    HandshakeFailed,
    #[error("peer not found")]
    PeerNotFound,
    #[error("dial failed")]
    DialFailed,
    #[error("frame too short")]
    FrameTooShort,
}

/// An inbound message, tagged with the sending peer's declared node id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rpc {
    pub from: NetAddr,
    pub payload: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Syn {
    from_id: NetAddr,
}

#[derive(Debug, Serialize, Deserialize)]
struct SynAck {
    node_id: NetAddr,
}

#[derive(Debug, Serialize, Deserialize)]
struct Ack {
    ok: bool,
}

/// A connected remote, reachable by handing it outbound bytes via `accept`.
#[derive(Clone)]
pub struct Peer {
    addr: NetAddr,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
}

impl Peer {
    pub fn addr(&self) -> &NetAddr {
        &self.addr
    }

    /// Queues `payload` for delivery to this peer's writer task.
    pub fn accept(&self, payload: Vec<u8>) -> Result<(), NetworkError> {
        self.outbound.send(payload).map_err(|_| NetworkError::PeerNotFound)
    }
}

/// Writes a length-prefixed frame: a 4-byte big-endian length followed by
/// the canonical encoding of `msg`.
async fn write_framed<W: AsyncWriteExt + Unpin, T: Serialize>(
    writer: &mut W,
    msg: &T,
) -> std::io::Result<()> {
    let bytes = codec::encode(msg);
    writer.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
    writer.write_all(&bytes).await
}

async fn read_framed<R: AsyncReadExt + Unpin, T: for<'de> Deserialize<'de>>(
    reader: &mut R,
) -> Result<T, NetworkError> {
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|_| NetworkError::FrameTooShort)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|_| NetworkError::FrameTooShort)?;
    codec::decode(&buf).map_err(|_| NetworkError::FrameTooShort)
}

/// Initiator side: writes `Syn{from_id}`, reads `SynAck{node_id}`, writes
/// `Ack{true}`. Returns the remote's declared node id.
async fn handshake_initiate(
    stream: &mut TcpStream,
    our_id: &NetAddr,
) -> Result<NetAddr, NetworkError> {
    write_framed(stream, &Syn { from_id: our_id.clone() })
        .await
        .map_err(|_| NetworkError::HandshakeFailed)?;
    let synack: SynAck = read_framed(stream).await.map_err(|_| NetworkError::HandshakeFailed)?;
    write_framed(stream, &Ack { ok: true })
        .await
        .map_err(|_| NetworkError::HandshakeFailed)?;
    Ok(synack.node_id)
}

/// Responder side: reads `Syn{from_id}`, writes `SynAck{node_id}`, reads
/// `Ack`. `Ack{ok:false}` is a hard failure. Returns the remote's id.
async fn handshake_accept(
    stream: &mut TcpStream,
    our_id: &NetAddr,
) -> Result<NetAddr, NetworkError> {
    let syn: Syn = read_framed(stream).await.map_err(|_| NetworkError::HandshakeFailed)?;
    write_framed(stream, &SynAck { node_id: our_id.clone() })
        .await
        .map_err(|_| NetworkError::HandshakeFailed)?;
    let ack: Ack = read_framed(stream).await.map_err(|_| NetworkError::HandshakeFailed)?;
    if !ack.ok {
        return Err(NetworkError::HandshakeFailed);
    }
    Ok(syn.from_id)
}

/// TCP-backed transport. Owns the accept loop and one writer task per peer;
/// inbound RPCs and newly-handshaken peers are exposed as channels the
/// server drains.
pub struct TcpTransport {
    addr: NetAddr,
    peers: Arc<RwLock<HashMap<NetAddr, Peer>>>,
    rpc_tx: mpsc::UnboundedSender<Rpc>,
    rpc_rx: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<Rpc>>>,
    peer_tx: mpsc::UnboundedSender<Peer>,
    peer_rx: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<Peer>>>,
}

impl TcpTransport {
    pub fn new(addr: NetAddr) -> Self {
        let (rpc_tx, rpc_rx) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        TcpTransport {
            addr,
            peers: Arc::new(RwLock::new(HashMap::new())),
            rpc_tx,
            rpc_rx: tokio::sync::Mutex::new(Some(rpc_rx)),
            peer_tx,
            peer_rx: tokio::sync::Mutex::new(Some(peer_rx)),
        }
    }

    pub fn addr(&self) -> &NetAddr {
        &self.addr
    }

    /// Takes ownership of the inbound RPC channel. May only be called once.
    pub async fn take_rpc_receiver(&self) -> Option<mpsc::UnboundedReceiver<Rpc>> {
        self.rpc_rx.lock().await.take()
    }

    /// Takes ownership of the newly-connected-peer channel. May only be
    /// called once.
    pub async fn take_peer_receiver(&self) -> Option<mpsc::UnboundedReceiver<Peer>> {
        self.peer_rx.lock().await.take()
    }

    /// Binds and runs the accept loop. Runs until the listener errors.
    pub async fn listen(self: &Arc<Self>) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.addr).await?;
        loop {
            let (socket, _) = listener.accept().await?;
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(err) = this.serve_inbound(socket).await {
                    tracing::warn!(?err, "inbound connection failed");
                }
            });
        }
    }

    async fn serve_inbound(self: Arc<Self>, mut socket: TcpStream) -> Result<(), NetworkError> {
        let remote_id = handshake_accept(&mut socket, &self.addr).await?;
        self.spawn_peer(remote_id, socket).await;
        Ok(())
    }

    /// Dials `addr`, performs the handshake as initiator, and registers the
    /// resulting peer.
    pub async fn dial(self: &Arc<Self>, addr: &str) -> Result<(), NetworkError> {
        let mut socket = TcpStream::connect(addr)
            .await
            .map_err(|_| NetworkError::DialFailed)?;
        let remote_id = handshake_initiate(&mut socket, &self.addr).await?;
        self.spawn_peer(remote_id, socket).await;
        Ok(())
    }

    async fn spawn_peer(self: &Arc<Self>, remote_id: NetAddr, socket: TcpStream) {
        let (read_half, mut write_half) = socket.into_split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        let peer = Peer { addr: remote_id.clone(), outbound: out_tx };
        self.peers.write().await.insert(remote_id.clone(), peer.clone());
        let _ = self.peer_tx.send(peer);

        let writer_id = remote_id.clone();
        tokio::spawn(async move {
            while let Some(payload) = out_rx.recv().await {
                let rpc = Rpc { from: writer_id.clone(), payload };
                if write_framed(&mut write_half, &rpc).await.is_err() {
                    break;
                }
            }
        });

        let rpc_tx = self.rpc_tx.clone();
        let peers = self.peers.clone();
        let reader_id = remote_id;
        tokio::spawn(async move {
            let mut read_half = read_half;
            loop {
                match read_framed::<_, Rpc>(&mut read_half).await {
                    Ok(rpc) => {
                        if rpc_tx.send(rpc).is_err() {
                            break;
                        }
                    }
                    Err(_) => {
                        peers.write().await.remove(&reader_id);
                        break;
                    }
                }
            }
        });
    }

    pub async fn send(&self, to: &NetAddr, payload: Vec<u8>) -> Result<(), NetworkError> {
        let peers = self.peers.read().await;
        let peer = peers.get(to).ok_or(NetworkError::PeerNotFound)?;
        peer.accept(payload)
    }

    pub async fn broadcast(&self, payload: Vec<u8>) {
        let peers = self.peers.read().await;
        for peer in peers.values() {
            if let Err(err) = peer.accept(payload.clone()) {
                tracing::warn!(peer = %peer.addr(), ?err, "broadcast to peer failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips_through_codec() {
        let rpc = Rpc { from: "node-a".into(), payload: vec![1, 2, 3] };
        let bytes = codec::encode(&rpc);
        let decoded: Rpc = codec::decode(&bytes).unwrap();
        assert_eq!(decoded.from, rpc.from);
        assert_eq!(decoded.payload, rpc.payload);
    }

    #[tokio::test]
    async fn handshake_completes_over_a_loopback_pair() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            handshake_accept(&mut socket, &"responder".to_string()).await
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let remote_id = handshake_initiate(&mut client, &"initiator".to_string())
            .await
            .unwrap();

        assert_eq!(remote_id, "responder");
        assert_eq!(server.await.unwrap().unwrap(), "initiator");
    }
}
