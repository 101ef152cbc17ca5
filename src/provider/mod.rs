//! Foreign-chain query abstraction.
//!
//! One [`ChainProvider`] per network instance, backed by a pool of public
//! servers. Every method transparently retries against other servers in the
//! pool before surfacing a failure; callers only ever see an error once the
//! whole pool has been exhausted (or the chain itself says "no").

pub mod electrum;
pub mod light;
pub mod pool;
mod verbose;

pub use self::electrum::ElectrumClient;
pub use self::light::LightClient;
pub use self::pool::{ConnectionType, Server, ServerPool};

use crate::error::ForeignChainError;

pub const INCLUDE_UNCONFIRMED: bool = true;
pub const EXCLUDE_UNCONFIRMED: bool = false;

/// An unspent transaction output, as reported by a foreign chain.
///
/// `height == 0` means the funding transaction is still unconfirmed.
/// `tx_hash` is in display order (the byte order used by RPC interfaces and
/// block explorers).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnspentOutput {
    pub tx_hash: Vec<u8>,
    pub output_index: u32,
    pub height: u32,
    pub value: u64,
    pub script: Vec<u8>,
    pub address: Option<String>,
}

impl UnspentOutput {
    pub fn tx_hash_hex(&self) -> String {
        hex::encode(&self.tx_hash)
    }
}

/// A transaction hash paired with the height it confirmed at (zero while
/// unconfirmed).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionHash {
    pub height: u32,
    pub tx_hash: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionInput {
    /// Hex-encoded unlocking script.
    pub script_sig: String,
    pub sequence: u32,
    pub output_tx_hash: String,
    pub output_vout: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionOutput {
    /// Hex-encoded scriptPubKey.
    pub script_pub_key: String,
    pub value: u64,
    pub addresses: Vec<String>,
}

/// Read-only structured view of a foreign-chain transaction. Never mutated
/// locally, only cached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainTransaction {
    pub tx_hash: String,
    pub size: u32,
    pub locktime: u32,
    /// Absent while the transaction is unconfirmed.
    pub timestamp: Option<u32>,
    /// Zero while the transaction is unconfirmed.
    pub height: u32,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
}

impl ChainTransaction {
    pub fn is_confirmed(&self) -> bool {
        self.height > 0
    }
}

/// Uniform query surface over a foreign UTXO chain, implemented once per
/// wire protocol.
///
/// All calls block the calling thread for the duration of the network round
/// trip; concurrency is achieved by running multiple threads, never multiple
/// in-flight requests per connection.
pub trait ChainProvider: Send + Sync {
    /// ID unique to this network instance, e.g. `"Litecoin-MAIN"`.
    fn net_id(&self) -> &str;

    fn current_height(&self) -> Result<u32, ForeignChainError>;

    /// Raw block headers, starting at `start_height` inclusive.
    fn raw_block_headers(&self, start_height: u32, count: u32)
        -> Result<Vec<Vec<u8>>, ForeignChainError>;

    /// Block timestamps (seconds), starting at `start_height` inclusive.
    fn block_timestamps(&self, start_height: u32, count: u32)
        -> Result<Vec<u64>, ForeignChainError>;

    /// Confirmed balance of the given scriptPubKey.
    fn confirmed_balance(&self, script_pub_key: &[u8]) -> Result<u64, ForeignChainError>;

    /// Confirmed balance of the given base58 address.
    fn confirmed_address_balance(&self, address: &str) -> Result<u64, ForeignChainError>;

    /// Raw, serialized transaction bytes for `tx_hash` (display-order hex).
    fn raw_transaction(&self, tx_hash: &str) -> Result<Vec<u8>, ForeignChainError>;

    /// Structured view of the transaction with `tx_hash`.
    fn transaction(&self, tx_hash: &str) -> Result<ChainTransaction, ForeignChainError>;

    /// Hashes (and heights) of transactions touching `script_pub_key`.
    fn address_transactions(
        &self,
        script_pub_key: &[u8],
        include_unconfirmed: bool,
    ) -> Result<Vec<TransactionHash>, ForeignChainError>;

    /// Structured views of transactions touching `address`.
    ///
    /// Backends that can only scan a bounded block range return confirmed
    /// transactions regardless of `include_unconfirmed`.
    fn address_chain_transactions(
        &self,
        address: &str,
        include_unconfirmed: bool,
    ) -> Result<Vec<ChainTransaction>, ForeignChainError>;

    fn unspent_outputs(
        &self,
        script_pub_key: &[u8],
        include_unconfirmed: bool,
    ) -> Result<Vec<UnspentOutput>, ForeignChainError>;

    fn address_unspent_outputs(
        &self,
        address: &str,
        include_unconfirmed: bool,
    ) -> Result<Vec<UnspentOutput>, ForeignChainError>;

    /// Broadcasts raw transaction bytes to the network.
    fn broadcast_transaction(&self, raw_transaction: &[u8]) -> Result<(), ForeignChainError>;

    // Pool snapshots, for diagnostics.
    fn servers(&self) -> Vec<Server>;
    fn remaining_servers(&self) -> Vec<Server>;
    fn useless_servers(&self) -> Vec<Server>;
    fn current_server(&self) -> Option<Server>;
}

/// Byte offset of the timestamp field within a standard 80-byte block
/// header (version 4 + prev hash 32 + merkle root 32).
const HEADER_TIMESTAMP_OFFSET: usize = 68;

/// Median timestamp of the latest 11 blocks, in seconds.
///
/// Used to judge whether a refund locktime has matured, since consensus
/// rules compare locktimes against the median-time-past rather than any
/// single block's timestamp.
pub fn median_block_time(provider: &dyn ChainProvider) -> Result<u64, ForeignChainError> {
    const BLOCK_COUNT: u32 = 11;

    let height = provider.current_height()?;
    if height < BLOCK_COUNT {
        return Err(ForeignChainError::network("chain too short for median block time"));
    }

    let headers = provider.raw_block_headers(height - BLOCK_COUNT + 1, BLOCK_COUNT)?;
    if headers.len() < BLOCK_COUNT as usize {
        return Err(ForeignChainError::network("not enough block headers for median block time"));
    }

    let mut timestamps = Vec::with_capacity(headers.len());
    for header in &headers {
        if header.len() < HEADER_TIMESTAMP_OFFSET + 4 {
            return Err(ForeignChainError::network("block header too short"));
        }
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&header[HEADER_TIMESTAMP_OFFSET..HEADER_TIMESTAMP_OFFSET + 4]);
        timestamps.push(u32::from_le_bytes(raw) as u64);
    }

    timestamps.sort_unstable();
    Ok(timestamps[timestamps.len() / 2])
}
