//! Supported foreign chains as plain configuration records.
//!
//! Each network is a [`ChainSpec`]: net id, genesis hash, address version
//! bytes, bootstrap servers and fee policy. Providers are constructed *from*
//! a spec by the registry; nothing in here is a singleton.

use crate::error::HtlcError;
use crate::htlc::{p2pkh_script_pubkey, p2sh_script_pubkey};
use crate::provider::{ConnectionType, Server};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum ChainId {
    Bitcoin,
    Litecoin,
    Dogecoin,
    PirateChain,
}

/// Bootstrap server entry: hostname, connection type, port.
type ServerEntry = (&'static str, ConnectionType, u16);

/// Static description of one foreign network.
pub struct ChainSpec {
    pub chain: ChainId,
    /// ID unique to this network instance, e.g. "Litecoin-MAIN".
    pub net_id: &'static str,
    pub currency_code: &'static str,
    /// Expected genesis block hash; `None` disables the connect-time check
    /// (regtest instances have per-instance genesis hashes).
    pub genesis_hash: Option<&'static str>,
    /// Base58 address version prefix for P2PKH outputs (1 or 2 bytes).
    pub p2pkh_prefix: &'static [u8],
    /// Base58 address version prefix for P2SH outputs (1 or 2 bytes).
    pub p2sh_prefix: &'static [u8],
    pub default_tcp_port: u16,
    pub default_ssl_port: u16,
    /// Flat fee reserved when spending a P2SH, in the chain's smallest unit.
    pub p2sh_fee: u64,
    /// Nominal seconds between blocks, used for locktime arithmetic.
    pub block_time_seconds: u32,
    bootstrap_servers: &'static [ServerEntry],
}

pub static BITCOIN_MAIN: ChainSpec = ChainSpec {
    chain: ChainId::Bitcoin,
    net_id: "Bitcoin-MAIN",
    currency_code: "BTC",
    genesis_hash: Some("000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"),
    p2pkh_prefix: &[0x00],
    p2sh_prefix: &[0x05],
    default_tcp_port: 50001,
    default_ssl_port: 50002,
    p2sh_fee: 10_000,
    block_time_seconds: 600,
    bootstrap_servers: &[
        ("electrum.emzy.de", ConnectionType::Ssl, 50002),
        ("electrum.emzy.de", ConnectionType::Tcp, 50001),
        ("electrum.bitaroo.net", ConnectionType::Ssl, 50002),
        ("electrum.acinq.co", ConnectionType::Ssl, 50002),
        ("kirsche.emzy.de", ConnectionType::Ssl, 50002),
        ("xtrum.com", ConnectionType::Ssl, 50002),
        ("alviss.coinjoined.com", ConnectionType::Ssl, 50002),
        ("hodlers.beer", ConnectionType::Ssl, 50002),
    ],
};

pub static BITCOIN_TEST3: ChainSpec = ChainSpec {
    chain: ChainId::Bitcoin,
    net_id: "Bitcoin-TEST3",
    currency_code: "BTC",
    genesis_hash: Some("000000000933ea01ad0ee984209779baaec3ced90fa3f408719526f8d77f4943"),
    p2pkh_prefix: &[0x6f],
    p2sh_prefix: &[0xc4],
    default_tcp_port: 51001,
    default_ssl_port: 51002,
    p2sh_fee: 1_000,
    block_time_seconds: 600,
    bootstrap_servers: &[
        ("testnet.aranguren.org", ConnectionType::Tcp, 51001),
        ("testnet.aranguren.org", ConnectionType::Ssl, 51002),
        ("testnet.qtornado.com", ConnectionType::Ssl, 51002),
    ],
};

pub static BITCOIN_REGTEST: ChainSpec = ChainSpec {
    chain: ChainId::Bitcoin,
    net_id: "Bitcoin-REGTEST",
    currency_code: "BTC",
    genesis_hash: None,
    p2pkh_prefix: &[0x6f],
    p2sh_prefix: &[0xc4],
    default_tcp_port: 50001,
    default_ssl_port: 50002,
    p2sh_fee: 1_000,
    block_time_seconds: 600,
    bootstrap_servers: &[
        ("localhost", ConnectionType::Tcp, 50001),
        ("localhost", ConnectionType::Ssl, 50002),
    ],
};

pub static LITECOIN_MAIN: ChainSpec = ChainSpec {
    chain: ChainId::Litecoin,
    net_id: "Litecoin-MAIN",
    currency_code: "LTC",
    genesis_hash: Some("12a765e31ffd4059bada1e25190f6e98c99d9714d334efa41a195a7e7e04bfe2"),
    p2pkh_prefix: &[0x30],
    p2sh_prefix: &[0x32],
    default_tcp_port: 50001,
    default_ssl_port: 50002,
    p2sh_fee: 10_000,
    block_time_seconds: 150,
    bootstrap_servers: &[
        ("backup.electrum-ltc.org", ConnectionType::Ssl, 443),
        ("electrum-ltc.bysh.me", ConnectionType::Ssl, 50002),
        ("electrum.ltc.xurious.com", ConnectionType::Ssl, 50002),
        ("electrum-ltc.petrkr.net", ConnectionType::Ssl, 60002),
    ],
};

pub static DOGECOIN_MAIN: ChainSpec = ChainSpec {
    chain: ChainId::Dogecoin,
    net_id: "Dogecoin-MAIN",
    currency_code: "DOGE",
    genesis_hash: Some("1a91e3dace36e2be3bf030a65679fe821aa1d6ef92e7c9902eb318182c355691"),
    p2pkh_prefix: &[0x1e],
    p2sh_prefix: &[0x16],
    default_tcp_port: 50001,
    default_ssl_port: 50002,
    p2sh_fee: 100_000_000,
    block_time_seconds: 60,
    bootstrap_servers: &[
        ("electrum1.cipig.net", ConnectionType::Ssl, 20060),
        ("electrum2.cipig.net", ConnectionType::Ssl, 20060),
        ("electrum3.cipig.net", ConnectionType::Ssl, 20060),
    ],
};

pub static PIRATECHAIN_MAIN: ChainSpec = ChainSpec {
    chain: ChainId::PirateChain,
    net_id: "PirateChain-MAIN",
    currency_code: "ARRR",
    genesis_hash: Some("027e3758c3a65b12aa1046462b486d0a63bfa1beae327897f56c5cfb7daaae71"),
    p2pkh_prefix: &[0x1c, 0xb8],
    p2sh_prefix: &[0x1c, 0xbd],
    default_tcp_port: 9067,
    default_ssl_port: 443,
    p2sh_fee: 10_000,
    block_time_seconds: 60,
    bootstrap_servers: &[
        ("lightd.pirate.black", ConnectionType::Ssl, 443),
        ("lightd1.pirate.black", ConnectionType::Ssl, 443),
    ],
};

impl ChainSpec {
    pub fn bootstrap_servers(&self) -> Vec<Server> {
        self.bootstrap_servers
            .iter()
            .map(|(hostname, connection_type, port)| Server::new(*hostname, *connection_type, *port))
            .collect()
    }

    pub fn p2pkh_address(&self, pubkey_hash: &[u8; 20]) -> String {
        encode_base58_address(self.p2pkh_prefix, pubkey_hash)
    }

    pub fn p2sh_address(&self, script_hash: &[u8; 20]) -> String {
        encode_base58_address(self.p2sh_prefix, script_hash)
    }

    /// Returns the 20-byte script hash of a P2SH address on this network.
    pub fn p2sh_address_hash(&self, address: &str) -> Result<[u8; 20], HtlcError> {
        let (prefix, hash) = decode_base58_address(address)?;
        if prefix != self.p2sh_prefix {
            return Err(HtlcError::InvalidAddress);
        }
        Ok(hash)
    }

    /// scriptPubKey paying the given base58 address (P2PKH or P2SH).
    pub fn script_pubkey_for_address(&self, address: &str) -> Result<Vec<u8>, HtlcError> {
        let (prefix, hash) = decode_base58_address(address)?;
        if prefix == self.p2sh_prefix {
            Ok(p2sh_script_pubkey(&hash))
        } else if prefix == self.p2pkh_prefix {
            Ok(p2pkh_script_pubkey(&hash))
        } else {
            Err(HtlcError::InvalidAddress)
        }
    }

    /// Base58 address for a standard P2PKH or P2SH scriptPubKey, if it is
    /// one of the two recognized templates.
    pub fn address_for_script(&self, script: &[u8]) -> Option<String> {
        // OP_HASH160 <20 bytes> OP_EQUAL
        if script.len() == 23 && script[0] == 0xa9 && script[1] == 0x14 && script[22] == 0x87 {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&script[2..22]);
            return Some(self.p2sh_address(&hash));
        }

        // OP_DUP OP_HASH160 <20 bytes> OP_EQUALVERIFY OP_CHECKSIG
        if script.len() == 25
            && script[0] == 0x76
            && script[1] == 0xa9
            && script[2] == 0x14
            && script[23] == 0x88
            && script[24] == 0xac
        {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&script[3..23]);
            return Some(self.p2pkh_address(&hash));
        }

        None
    }
}

fn encode_base58_address(prefix: &[u8], hash: &[u8; 20]) -> String {
    let mut payload = Vec::with_capacity(prefix.len() + hash.len());
    payload.extend_from_slice(prefix);
    payload.extend_from_slice(hash);
    bs58::encode(payload).with_check().into_string()
}

/// Splits a base58check address into (version prefix, 20-byte hash).
fn decode_base58_address(address: &str) -> Result<(Vec<u8>, [u8; 20]), HtlcError> {
    let payload = bs58::decode(address)
        .with_check(None)
        .into_vec()
        .map_err(|_| HtlcError::InvalidAddress)?;

    if payload.len() < 21 {
        return Err(HtlcError::InvalidAddress);
    }

    let split = payload.len() - 20;
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&payload[split..]);
    Ok((payload[..split].to_vec(), hash))
}
