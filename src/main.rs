use std::sync::Arc;
use std::time::Duration;

use ledgerd::block::Block;
use ledgerd::chain::Chain;
use ledgerd::config::NodeConfig;
use ledgerd::crypto::PrivateKey;
use ledgerd::hash::Address;
use ledgerd::mempool::Mempool;
use ledgerd::network::TcpTransport;
use ledgerd::server::Server;
use ledgerd::storage::InMemoryStorage;
use ledgerd::tx::{Inner, Transaction};

const GENESIS_SUPPLY: u64 = 1_000_000_000;

fn coinbase_genesis() -> Block {
    let coinbase_tx = Transaction::new(
        Inner::Transfer {
            signer: None,
            sig: None,
            from: Address::COINBASE,
            to: Address::COINBASE,
            value: GENESIS_SUPPLY,
        },
        Vec::new(),
        0,
        0,
    );
    Block::genesis(vec![coinbase_tx])
}

fn load_config() -> NodeConfig {
    match std::env::var("LEDGERD_CONFIG") {
        Ok(path) => {
            let bytes = std::fs::read(&path).expect("reading config file");
            serde_json::from_slice(&bytes).expect("config file is valid JSON")
        }
        Err(_) => NodeConfig::default(),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = load_config();
    let validator_key = config.validator_key.as_deref().map(|hex_key| {
        let bytes = hex::decode(hex_key).expect("validator_key must be hex");
        let arr: [u8; 32] = bytes.try_into().expect("validator_key must be 32 bytes");
        PrivateKey::from_bytes(&arr)
    });

    let storage = Arc::new(InMemoryStorage::new());
    let genesis = coinbase_genesis();
    let chain = Arc::new(
        Chain::new(genesis, storage)
            .with_confirms_level(config.confirms_level),
    );
    let mempool = Arc::new(Mempool::new(config.max_pool_len));
    let transport = Arc::new(TcpTransport::new(config.listen_addr.clone()));

    for peer_addr in &config.seed_peers {
        if let Err(err) = transport.dial(peer_addr).await {
            tracing::warn!(peer = %peer_addr, ?err, "failed to dial seed peer");
        }
    }

    let server = Arc::new(Server::new(
        config.listen_addr.clone(),
        transport,
        mempool,
        chain,
        validator_key,
        Duration::from_secs(config.block_time_secs),
    ));

    tracing::info!(addr = %config.listen_addr, "node starting");
    server.run().await;

    // Keep the process alive; every task spawned by `run` lives on the
    // tokio runtime independently of this handle.
    std::future::pending::<()>().await;
}
