//! Orchestrator: wires the transport, the mempool, and the chain together,
//! dispatches the gossip protocol, and runs the validator tick.
//!
//! Grounded in `examples/original_source/network/server.go` (`Server`'s
//! peer/rpc select loop, `processGetStatusMessage`/`processStatusMessage`/
//! `processRequestBlocksMessage`/`processResponseBlocksMessage`, and
//! `validatorLoop`/`createNewBlock`) translated from a blocking
//! channel-select loop into per-source tokio tasks, since this crate's
//! transport already hands out async mpsc receivers rather than raw Go
//! channels.

use std::sync::Arc;
use std::time::Duration;

use crate::chain::Chain;
use crate::crypto::PrivateKey;
use crate::gossip::{Envelope, Message};
use crate::mempool::Mempool;
use crate::network::{NetAddr, TcpTransport};
use crate::storage::Storage;
use crate::tx::Transaction;

pub struct Server<S: Storage + 'static> {
    id: NetAddr,
    version: u32,
    transport: Arc<TcpTransport>,
    mempool: Arc<Mempool>,
    chain: Arc<Chain<S>>,
    validator_key: Option<PrivateKey>,
    block_time: Duration,
}

impl<S: Storage + 'static> Server<S> {
    pub fn new(
        id: NetAddr,
        transport: Arc<TcpTransport>,
        mempool: Arc<Mempool>,
        chain: Arc<Chain<S>>,
        validator_key: Option<PrivateKey>,
        block_time: Duration,
    ) -> Self {
        Server { id, version: 1, transport, mempool, chain, validator_key, block_time }
    }

    /// Spawns the peer-up handler, the RPC dispatcher, the transport's
    /// accept loop, and (if configured with a validator key) the block
    /// ticker. Returns once every task has been spawned; the tasks
    /// themselves run until the process exits.
    pub async fn run(self: Arc<Self>) {
        let transport = self.transport.clone();
        tokio::spawn(async move {
            if let Err(err) = transport.listen().await {
                tracing::warn!(?err, "transport accept loop exited");
            }
        });

        if let Some(mut peer_rx) = self.transport.take_peer_receiver().await {
            let this = self.clone();
            tokio::spawn(async move {
                while let Some(peer) = peer_rx.recv().await {
                    this.on_peer_up(peer.addr().clone()).await;
                }
            });
        }

        if let Some(mut rpc_rx) = self.transport.take_rpc_receiver().await {
            let this = self.clone();
            tokio::spawn(async move {
                while let Some(rpc) = rpc_rx.recv().await {
                    this.handle_rpc(rpc.from, rpc.payload).await;
                }
            });
        }

        if let Some(key) = self.validator_key.clone() {
            let this = self.clone();
            tokio::spawn(async move {
                this.validator_loop(key).await;
            });
        }
    }

    async fn on_peer_up(&self, peer_addr: NetAddr) {
        let msg = Message::RequestStatus { id: self.id.clone() };
        let envelope = Envelope::wrap(&msg);
        if let Err(err) = self.transport.send(&peer_addr, crate::codec::encode(&envelope)).await {
            tracing::warn!(peer = %peer_addr, ?err, "failed to send status request to new peer");
        }
    }

    async fn handle_rpc(&self, from: NetAddr, payload: Vec<u8>) {
        let envelope: Envelope = match crate::codec::decode(&payload) {
            Ok(e) => e,
            Err(err) => {
                tracing::warn!(?err, %from, "malformed rpc envelope");
                return;
            }
        };
        let msg = match envelope.unwrap() {
            Ok(m) => m,
            Err(err) => {
                tracing::warn!(?err, %from, "malformed gossip message");
                return;
            }
        };

        match msg {
            Message::Tx(tx) => self.on_tx(tx).await,
            Message::Block(block) => self.on_block(block).await,
            Message::RequestStatus { .. } => self.on_request_status(&from).await,
            Message::ResponseStatus { current_height, .. } => {
                self.on_response_status(&from, current_height).await
            }
            Message::RequestBlocks { from: lo, to } => self.on_request_blocks(lo, to).await,
            Message::ResponseBlocks { blocks } => self.on_response_blocks(blocks).await,
        }
    }

    async fn on_tx(&self, mut tx: Transaction) {
        if tx.verify().is_err() {
            return;
        }
        let hash = tx.rehash();
        if self.mempool.contains(&hash).await {
            return;
        }
        tx.first_seen_ts = now_unix_nanos();
        if self.mempool.add(tx.clone()).await.is_err() {
            return;
        }
        self.rebroadcast(&Message::Tx(tx)).await;
    }

    async fn on_block(&self, block: crate::block::Block) {
        if self.chain.add_block(block.clone()).is_ok() {
            self.rebroadcast(&Message::Block(block)).await;
        }
    }

    async fn on_request_status(&self, from: &NetAddr) {
        let msg = Message::ResponseStatus {
            id: self.id.clone(),
            version: self.version,
            current_height: self.chain.height(),
        };
        let envelope = Envelope::wrap(&msg);
        let _ = self.transport.send(from, crate::codec::encode(&envelope)).await;
    }

    async fn on_response_status(&self, from: &NetAddr, their_height: u32) {
        let our_height = self.chain.height();
        if our_height < their_height {
            let msg = Message::RequestBlocks { from: our_height + 1, to: their_height };
            let envelope = Envelope::wrap(&msg);
            let _ = self.transport.send(from, crate::codec::encode(&envelope)).await;
        }
    }

    async fn on_request_blocks(&self, from_height: u32, to_height: u32) {
        let to = if to_height == 0 { self.chain.height() } else { to_height };
        let blocks: Vec<_> = (from_height..=to)
            .filter_map(|h| self.chain.get_block(h))
            .collect();
        self.rebroadcast(&Message::ResponseBlocks { blocks }).await;
    }

    async fn on_response_blocks(&self, blocks: Vec<crate::block::Block>) {
        for block in blocks {
            if self.chain.add_block(block).is_err() {
                // Expected when multiple peers answer the same backfill
                // request; stop silently rather than treat it as fatal.
                break;
            }
        }
    }

    async fn rebroadcast(&self, msg: &Message) {
        let envelope = Envelope::wrap(msg);
        self.transport.broadcast(crate::codec::encode(&envelope)).await;
    }

    /// Present only when constructed with a validator key. Fires every
    /// `block_time`; see §4.8 for the seven-step sequence this follows.
    async fn validator_loop(&self, key: PrivateKey) {
        let mut ticker = tokio::time::interval(self.block_time);
        loop {
            ticker.tick().await;
            if let Err(err) = self.validator_tick(&key).await {
                tracing::warn!(?err, "validator tick failed, skipping");
            }
        }
    }

    async fn validator_tick(&self, key: &PrivateKey) -> Result<(), crate::chain::ChainError> {
        let height = self.chain.height();
        let parent_header = self.chain.get_header(height).expect("current height always has a header");

        let now = now_unix_nanos();
        let mut txs = self.mempool.pending(now).await;

        let drop = self.chain.soft_check(&txs);
        if !drop.is_empty() {
            self.mempool.denied(&drop);
            txs = self.mempool.pending(now).await;
        }

        let header = crate::block::Header {
            version: 1,
            prev_block_hash: parent_header.hash(),
            data_hash: crate::hash::Hash::ZERO,
            height: height + 1,
            timestamp: now,
        };
        let mut block = crate::block::Block::new(header, txs.clone());
        block.refresh_data_hash();
        block.sign(key);

        match self.chain.add_block(block.clone()) {
            Ok(()) => {
                self.mempool.processed(&txs);
                self.rebroadcast(&Message::Block(block)).await;
                Ok(())
            }
            Err(err) => {
                self.mempool.unlock_pending();
                Err(err)
            }
        }
    }
}

fn now_unix_nanos() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
