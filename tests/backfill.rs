//! Status-driven backfill over a real loopback TCP pair: a node ten blocks
//! ahead hands its history to a fresh node through RequestStatus /
//! ResponseStatus / RequestBlocks / ResponseBlocks, with no manual wiring
//! beyond `Server::run`.

use std::sync::Arc;
use std::time::Duration;

use ledgerd::block::Block;
use ledgerd::chain::Chain;
use ledgerd::crypto::PrivateKey;
use ledgerd::mempool::Mempool;
use ledgerd::network::TcpTransport;
use ledgerd::server::Server;
use ledgerd::storage::InMemoryStorage;
use rand::rngs::OsRng;

fn next_block(parent: &mut Block, key: &PrivateKey) -> Block {
    let header = ledgerd::block::Header {
        version: 1,
        prev_block_hash: parent.hash(),
        data_hash: ledgerd::hash::Hash::ZERO,
        height: parent.header.height + 1,
        timestamp: parent.header.height as i64 + 1,
    };
    let mut block = Block::new(header, Vec::new());
    block.refresh_data_hash();
    block.sign(key);
    block
}

#[tokio::test]
async fn backfill_brings_a_fresh_peer_up_to_the_ahead_peer_s_height() {
    let key = PrivateKey::generate(&mut OsRng);

    let genesis = Block::genesis(Vec::new());
    let storage_a = Arc::new(InMemoryStorage::new());
    let chain_a = Arc::new(Chain::new(genesis.clone(), storage_a));

    let mut parent = genesis.clone();
    let mut expected_hashes = vec![genesis.clone().hash()];
    for _ in 0..10 {
        let block = next_block(&mut parent, &key);
        parent = block.clone();
        expected_hashes.push(block.clone().hash());
        chain_a.add_block(block).unwrap();
    }
    assert_eq!(chain_a.height(), 10);

    let storage_b = Arc::new(InMemoryStorage::new());
    let chain_b = Arc::new(Chain::new(genesis, storage_b));
    assert_eq!(chain_b.height(), 0);

    let addr_a = "127.0.0.1:19191".to_string();
    let addr_b = "127.0.0.1:19192".to_string();

    let transport_a = Arc::new(TcpTransport::new(addr_a.clone()));
    let transport_b = Arc::new(TcpTransport::new(addr_b.clone()));

    let server_a = Arc::new(Server::new(
        addr_a.clone(),
        transport_a.clone(),
        Arc::new(Mempool::new(1024)),
        chain_a.clone(),
        None,
        Duration::from_secs(600),
    ));
    let server_b = Arc::new(Server::new(
        addr_b.clone(),
        transport_b.clone(),
        Arc::new(Mempool::new(1024)),
        chain_b.clone(),
        None,
        Duration::from_secs(600),
    ));

    server_a.run().await;
    server_b.run().await;

    // Give both accept loops a moment to bind before dialing.
    tokio::time::sleep(Duration::from_millis(50)).await;
    transport_b.dial(&addr_a).await.expect("b dials a");

    let mut waited = Duration::ZERO;
    while chain_b.height() < 10 && waited < Duration::from_secs(5) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        waited += Duration::from_millis(50);
    }

    assert_eq!(chain_b.height(), 10);
    for h in 0..=10u32 {
        let mut block_b = chain_b.get_block(h).unwrap();
        assert_eq!(block_b.hash(), expected_hashes[h as usize]);
    }
}
