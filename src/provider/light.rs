//! Light-wallet backend for the shielded-UTXO chain family.
//!
//! Speaks the light-wallet RPC set (latest block, block range, transparent
//! address lookups, raw transactions, broadcast) with protobuf-encoded
//! messages over a managed framed connection. A call is one method byte
//! followed by a message frame (`flag u8, length u32 BE, body`); responses
//! are a status byte per item; `0` message frame, `1` error frame, `2` end
//! of stream. Unary calls carry exactly one item.
//!
//! Two server quirks are encapsulated here and must not leak: raw
//! transactions fetched by hash wrap a JSON document rather than consensus
//! bytes, and address history requires a bounded block range (from a
//! configured birthday height), so unconfirmed transactions are never
//! visible through this backend.

use std::io::{self, Read, Write};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Instant;

use bitcoin::consensus::encode::deserialize;
use bitcoin::Transaction;
use lru::LruCache;
use prost::Message;

use crate::chains::ChainSpec;
use crate::error::ForeignChainError;
use crate::provider::pool::{connect_stream, RemoteStream, ServerPool};
use crate::provider::verbose::{parse_verbose_transaction, VerboseParseError};
use crate::provider::{
    ChainProvider, ChainTransaction, Server, TransactionHash, TransactionInput,
    TransactionOutput, UnspentOutput,
};

const MAX_AVG_RESPONSE_TIME: u64 = 500; // ms

const TX_CACHE_SIZE: usize = 1_000;

/// Upper bound on a single response frame; anything larger is a misbehaving
/// server.
const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

const STATUS_MESSAGE: u8 = 0;
const STATUS_ERROR: u8 = 1;
const STATUS_END_OF_STREAM: u8 = 2;

/// RPC status code a server answers with when a transaction is unknown.
const REMOTE_NOT_FOUND: i64 = 5;

mod methods {
    pub const GET_LIGHTD_INFO: u8 = 1;
    pub const GET_LATEST_BLOCK: u8 = 2;
    pub const GET_BLOCK_RANGE: u8 = 3;
    pub const GET_TADDRESS_BALANCE: u8 = 4;
    pub const GET_TADDRESS_TXIDS: u8 = 5;
    pub const GET_TRANSACTION: u8 = 6;
    pub const SEND_TRANSACTION: u8 = 7;
    pub const GET_ADDRESS_UTXOS: u8 = 8;
}

// Wire messages. Field numbers are part of the server compatibility
// surface; do not renumber.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Empty {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BlockId {
    #[prost(uint64, tag = "1")]
    pub height: u64,
    #[prost(bytes = "vec", tag = "2")]
    pub hash: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BlockRange {
    #[prost(message, optional, tag = "1")]
    pub start: Option<BlockId>,
    #[prost(message, optional, tag = "2")]
    pub end: Option<BlockId>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TxFilter {
    #[prost(message, optional, tag = "1")]
    pub block: Option<BlockId>,
    #[prost(uint64, tag = "2")]
    pub index: u64,
    #[prost(bytes = "vec", tag = "3")]
    pub hash: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RawTransaction {
    #[prost(bytes = "vec", tag = "1")]
    pub data: Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub height: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SendResponse {
    #[prost(int32, tag = "1")]
    pub error_code: i32,
    #[prost(string, tag = "2")]
    pub error_message: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LightdInfo {
    #[prost(string, tag = "1")]
    pub version: String,
    #[prost(string, tag = "2")]
    pub vendor: String,
    #[prost(bool, tag = "3")]
    pub taddr_support: bool,
    #[prost(string, tag = "4")]
    pub chain_name: String,
    #[prost(uint64, tag = "5")]
    pub sapling_activation_height: u64,
    #[prost(string, tag = "6")]
    pub consensus_branch_id: String,
    #[prost(uint64, tag = "7")]
    pub block_height: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TransparentAddressBlockFilter {
    #[prost(string, tag = "1")]
    pub address: String,
    #[prost(message, optional, tag = "2")]
    pub range: Option<BlockRange>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AddressList {
    #[prost(string, repeated, tag = "1")]
    pub addresses: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Balance {
    #[prost(int64, tag = "1")]
    pub value_zat: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetAddressUtxosArg {
    #[prost(string, repeated, tag = "1")]
    pub addresses: Vec<String>,
    #[prost(uint64, tag = "2")]
    pub start_height: u64,
    #[prost(uint32, tag = "3")]
    pub max_entries: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetAddressUtxosReply {
    #[prost(bytes = "vec", tag = "1")]
    pub txid: Vec<u8>,
    #[prost(int32, tag = "2")]
    pub index: i32,
    #[prost(bytes = "vec", tag = "3")]
    pub script: Vec<u8>,
    #[prost(int64, tag = "4")]
    pub value_zat: i64,
    #[prost(uint64, tag = "5")]
    pub height: u64,
    #[prost(string, tag = "6")]
    pub address: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetAddressUtxosReplyList {
    #[prost(message, repeated, tag = "1")]
    pub address_utxos: Vec<GetAddressUtxosReply>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CompactBlock {
    #[prost(uint32, tag = "1")]
    pub proto_version: u32,
    #[prost(uint64, tag = "2")]
    pub height: u64,
    #[prost(bytes = "vec", tag = "3")]
    pub hash: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub prev_hash: Vec<u8>,
    #[prost(uint32, tag = "5")]
    pub time: u32,
    #[prost(bytes = "vec", tag = "6")]
    pub header: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RpcError {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
}

struct Channel {
    server: Server,
    stream: RemoteStream,
}

impl Channel {
    fn send_request<Request: Message>(&mut self, method: u8, request: &Request) -> io::Result<()> {
        let body = request.encode_to_vec();
        let mut frame = Vec::with_capacity(6 + body.len());
        frame.push(method);
        frame.push(0); // uncompressed
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(&body);
        self.stream.write_all(&frame)
    }

    fn read_status(&mut self) -> io::Result<u8> {
        let mut status = [0u8; 1];
        self.stream.read_exact(&mut status)?;
        Ok(status[0])
    }

    fn read_frame(&mut self) -> io::Result<Vec<u8>> {
        let mut prefix = [0u8; 5];
        self.stream.read_exact(&mut prefix)?;

        let mut length = [0u8; 4];
        length.copy_from_slice(&prefix[1..5]);
        let length = u32::from_be_bytes(length) as usize;
        if length > MAX_FRAME_LENGTH {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "oversized frame"));
        }

        let mut body = vec![0u8; length];
        self.stream.read_exact(&mut body)?;
        Ok(body)
    }
}

/// `Ok(None)` means the transport or the response shape failed and another
/// server should be tried; `Err` is a well-formed error from the server.
fn call_unary<Request: Message, Response: Message + Default>(
    channel: &mut Channel,
    method: u8,
    request: &Request,
) -> Result<Option<Response>, ForeignChainError> {
    if channel.send_request(method, request).is_err() {
        return Ok(None);
    }

    match channel.read_status() {
        Ok(STATUS_MESSAGE) => {
            let body = match channel.read_frame() {
                Ok(body) => body,
                Err(_) => return Ok(None),
            };
            match Response::decode(body.as_slice()) {
                Ok(response) => Ok(Some(response)),
                Err(_) => Ok(None),
            }
        }
        Ok(STATUS_ERROR) => remote_error(channel),
        _ => Ok(None),
    }
}

fn call_streaming<Request: Message, Response: Message + Default>(
    channel: &mut Channel,
    method: u8,
    request: &Request,
) -> Result<Option<Vec<Response>>, ForeignChainError> {
    if channel.send_request(method, request).is_err() {
        return Ok(None);
    }

    let mut items = Vec::new();
    loop {
        match channel.read_status() {
            Ok(STATUS_MESSAGE) => {
                let body = match channel.read_frame() {
                    Ok(body) => body,
                    Err(_) => return Ok(None),
                };
                match Response::decode(body.as_slice()) {
                    Ok(response) => items.push(response),
                    Err(_) => return Ok(None),
                }
            }
            Ok(STATUS_END_OF_STREAM) => return Ok(Some(items)),
            Ok(STATUS_ERROR) => {
                return match remote_error::<Response>(channel) {
                    Ok(_) => Ok(None),
                    Err(error) => Err(error),
                }
            }
            _ => return Ok(None),
        }
    }
}

fn remote_error<Response>(channel: &mut Channel) -> Result<Option<Response>, ForeignChainError> {
    let body = match channel.read_frame() {
        Ok(body) => body,
        Err(_) => return Ok(None),
    };

    match RpcError::decode(body.as_slice()) {
        Ok(error) => Err(ForeignChainError::Network {
            message: error.message,
            daemon_error_code: Some(i64::from(error.code)),
            server: Some(channel.server.clone()),
        }),
        Err(_) => Ok(None),
    }
}

fn block_range(start_height: u32, count: u32) -> BlockRange {
    BlockRange {
        start: Some(BlockId {
            height: u64::from(start_height),
            hash: Vec::new(),
        }),
        end: Some(BlockId {
            height: u64::from(start_height) + u64::from(count.saturating_sub(1)),
            hash: Vec::new(),
        }),
    }
}

struct Inner {
    pool: ServerPool,
    channel: Option<Channel>,
}

/// Light-wallet [`ChainProvider`], one per network instance.
pub struct LightClient {
    spec: &'static ChainSpec,
    /// First height worth scanning for this wallet's history; the servers
    /// demand a bounded block range.
    birthday_height: u32,
    inner: Mutex<Inner>,
    transaction_cache: Mutex<LruCache<String, ChainTransaction>>,
}

impl LightClient {
    pub fn new(spec: &'static ChainSpec, extra_servers: Vec<Server>, birthday_height: u32) -> Self {
        let mut servers = spec.bootstrap_servers();
        servers.extend(extra_servers);
        Self::with_servers(spec, servers, birthday_height)
    }

    pub fn with_servers(
        spec: &'static ChainSpec,
        servers: Vec<Server>,
        birthday_height: u32,
    ) -> Self {
        LightClient {
            spec,
            birthday_height,
            inner: Mutex::new(Inner {
                pool: ServerPool::new(servers),
                channel: None,
            }),
            transaction_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(TX_CACHE_SIZE).unwrap(),
            )),
        }
    }

    /// Runs `call` against a healthy channel, failing over until the pool is
    /// exhausted. A `Err` from `call` is a statement from the server and is
    /// surfaced without further retries.
    fn with_channel<T>(
        &self,
        call: impl Fn(&mut Channel) -> Result<Option<T>, ForeignChainError>,
    ) -> Result<T, ForeignChainError> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;

        inner.pool.refill_if_empty();

        while self.ensure_channel(inner) {
            if !inner.pool.remaining_is_empty() {
                if let Some(channel) = &inner.channel {
                    let average = channel.server.average_response_time();
                    if average > MAX_AVG_RESPONSE_TIME {
                        tracing::info!(
                            average_ms = average,
                            server = %channel.server,
                            "slow average response time - trying another server"
                        );
                        inner.channel = None;
                        continue;
                    }
                }
            }

            let channel = match inner.channel.as_mut() {
                Some(channel) => channel,
                None => continue,
            };

            let started = Instant::now();
            match call(channel) {
                Ok(Some(result)) => {
                    let elapsed = started.elapsed().as_millis() as u64;
                    channel.server.add_response_time(elapsed);
                    return Ok(result);
                }
                Ok(None) => inner.channel = None,
                Err(error) => return Err(error),
            }
        }

        tracing::info!("no reachable light-client servers");
        Err(ForeignChainError::network(
            "no reachable light-client servers",
        ))
    }

    /// Connects and health-checks a server from the pool: it must report a
    /// live chain tip before being accepted.
    fn ensure_channel(&self, inner: &mut Inner) -> bool {
        if inner.channel.is_some() {
            return true;
        }

        while let Some(server) = inner.pool.pick_random() {
            tracing::trace!(%server, "connecting");

            let stream = match connect_stream(&server) {
                Ok(stream) => stream,
                Err(error) => {
                    tracing::trace!(%server, %error, "connect failed");
                    continue;
                }
            };

            let mut channel = Channel {
                server: server.clone(),
                stream,
            };

            match call_unary::<Empty, LightdInfo>(
                &mut channel,
                methods::GET_LIGHTD_INFO,
                &Empty::default(),
            ) {
                Ok(Some(info)) if info.block_height > 0 => {
                    tracing::debug!(%server, chain = %info.chain_name, "connected");
                    inner.channel = Some(channel);
                    return true;
                }
                _ => {
                    tracing::trace!(%server, "health check failed");
                }
            }
        }

        false
    }

    /// Marks the server behind the current channel useless and drops the
    /// channel.
    fn quarantine_current(&self) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(channel) = inner.channel.take() {
            inner.pool.mark_useless(&channel.server);
        }
    }

    fn latest_block(channel: &mut Channel) -> Result<Option<BlockId>, ForeignChainError> {
        call_unary::<Empty, BlockId>(channel, methods::GET_LATEST_BLOCK, &Empty::default())
    }

    fn compact_blocks(&self, start_height: u32, count: u32) -> Result<Vec<CompactBlock>, ForeignChainError> {
        let range = block_range(start_height, count);
        self.with_channel(|channel| {
            call_streaming::<BlockRange, CompactBlock>(channel, methods::GET_BLOCK_RANGE, &range)
        })
    }

    /// Converts consensus-serialized transaction bytes into the structured
    /// view, deriving output addresses from the script templates.
    fn view_from_raw(&self, raw: &[u8], height: u32) -> Result<ChainTransaction, ForeignChainError> {
        let transaction: Transaction = deserialize(raw)
            .map_err(|_| ForeignChainError::network("undecodable raw transaction from server"))?;

        let inputs = transaction
            .input
            .iter()
            .map(|input| TransactionInput {
                script_sig: hex::encode(input.script_sig.as_bytes()),
                sequence: input.sequence.0,
                output_tx_hash: input.previous_output.txid.to_string(),
                output_vout: input.previous_output.vout,
            })
            .collect();

        let outputs = transaction
            .output
            .iter()
            .map(|output| TransactionOutput {
                script_pub_key: hex::encode(output.script_pubkey.as_bytes()),
                value: output.value.to_sat(),
                addresses: self
                    .spec
                    .address_for_script(output.script_pubkey.as_bytes())
                    .into_iter()
                    .collect(),
            })
            .collect();

        Ok(ChainTransaction {
            tx_hash: transaction.compute_txid().to_string(),
            size: raw.len() as u32,
            locktime: transaction.lock_time.to_consensus_u32(),
            timestamp: None,
            height,
            inputs,
            outputs,
        })
    }
}

impl ChainProvider for LightClient {
    fn net_id(&self) -> &str {
        self.spec.net_id
    }

    fn current_height(&self) -> Result<u32, ForeignChainError> {
        let block = self.with_channel(Self::latest_block)?;
        Ok(block.height as u32)
    }

    fn raw_block_headers(
        &self,
        start_height: u32,
        count: u32,
    ) -> Result<Vec<Vec<u8>>, ForeignChainError> {
        let blocks = self.compact_blocks(start_height, count)?;

        let mut headers = Vec::with_capacity(blocks.len());
        for block in blocks {
            if block.header.is_empty() {
                return Err(ForeignChainError::network(
                    "missing block header in block range response",
                ));
            }
            headers.push(block.header);
        }
        Ok(headers)
    }

    fn block_timestamps(
        &self,
        start_height: u32,
        count: u32,
    ) -> Result<Vec<u64>, ForeignChainError> {
        let blocks = self.compact_blocks(start_height, count)?;

        let mut timestamps = Vec::with_capacity(blocks.len());
        for block in blocks {
            if block.time == 0 {
                return Err(ForeignChainError::network(
                    "missing block time in block range response",
                ));
            }
            timestamps.push(u64::from(block.time));
        }
        Ok(timestamps)
    }

    fn confirmed_balance(&self, script_pub_key: &[u8]) -> Result<u64, ForeignChainError> {
        match self.spec.address_for_script(script_pub_key) {
            Some(address) => self.confirmed_address_balance(&address),
            None => Err(ForeignChainError::Unsupported(
                "confirmed_balance for non-standard scripts",
            )),
        }
    }

    fn confirmed_address_balance(&self, address: &str) -> Result<u64, ForeignChainError> {
        let request = AddressList {
            addresses: vec![address.to_string()],
        };
        let balance = self.with_channel(|channel| {
            call_unary::<AddressList, Balance>(channel, methods::GET_TADDRESS_BALANCE, &request)
        })?;
        Ok(balance.value_zat.max(0) as u64)
    }

    fn raw_transaction(&self, tx_hash: &str) -> Result<Vec<u8>, ForeignChainError> {
        let hash = hex::decode(tx_hash)
            .map_err(|_| ForeignChainError::network("invalid transaction hash hex"))?;
        let request = TxFilter {
            block: None,
            index: 0,
            hash,
        };

        let raw = self.with_channel(|channel| {
            call_unary::<TxFilter, RawTransaction>(channel, methods::GET_TRANSACTION, &request)
        });

        match raw {
            Ok(raw) => Ok(raw.data),
            Err(error) if error.daemon_error_code() == Some(REMOTE_NOT_FOUND) => {
                Err(ForeignChainError::NotFound(tx_hash.to_string()))
            }
            Err(error) => Err(error),
        }
    }

    fn transaction(&self, tx_hash: &str) -> Result<ChainTransaction, ForeignChainError> {
        if let Some(transaction) = self.transaction_cache.lock().unwrap().get(tx_hash) {
            return Ok(transaction.clone());
        }

        // Server quirk: transactions fetched by hash arrive as a JSON
        // document inside the raw-transaction blob.
        let data = self.raw_transaction(tx_hash)?;
        let value: serde_json::Value = serde_json::from_slice(&data)
            .map_err(|_| ForeignChainError::network("expected JSON transaction from server"))?;

        let transaction = match parse_verbose_transaction(tx_hash, &value) {
            Ok(transaction) => transaction,
            Err(VerboseParseError::Shape) => {
                return Err(ForeignChainError::network(
                    "unexpected JSON transaction shape from server",
                ))
            }
            Err(VerboseParseError::MissingAddresses) => {
                self.quarantine_current();
                tracing::info!(tx_hash, "no output addresses returned for transaction");
                return Err(ForeignChainError::network(format!(
                    "no output addresses returned for transaction {}",
                    tx_hash
                )));
            }
        };

        self.transaction_cache
            .lock()
            .unwrap()
            .put(tx_hash.to_string(), transaction.clone());
        Ok(transaction)
    }

    fn address_transactions(
        &self,
        _script_pub_key: &[u8],
        _include_unconfirmed: bool,
    ) -> Result<Vec<TransactionHash>, ForeignChainError> {
        Err(ForeignChainError::Unsupported("address_transactions"))
    }

    // The block range is bounded, so only confirmed transactions are ever
    // visible through this backend, whatever the caller's flag says.
    fn address_chain_transactions(
        &self,
        address: &str,
        _include_unconfirmed: bool,
    ) -> Result<Vec<ChainTransaction>, ForeignChainError> {
        let birthday_height = self.birthday_height;
        let address = address.to_string();

        let raw_transactions = self.with_channel(move |channel| {
            let latest = match Self::latest_block(channel)? {
                Some(latest) => latest,
                None => return Ok(None),
            };

            let filter = TransparentAddressBlockFilter {
                address: address.clone(),
                range: Some(BlockRange {
                    start: Some(BlockId {
                        height: u64::from(birthday_height),
                        hash: Vec::new(),
                    }),
                    end: Some(latest),
                }),
            };

            call_streaming::<TransparentAddressBlockFilter, RawTransaction>(
                channel,
                methods::GET_TADDRESS_TXIDS,
                &filter,
            )
        })?;

        let mut transactions = Vec::with_capacity(raw_transactions.len());
        for raw in raw_transactions {
            if raw.height == 0 {
                continue;
            }

            transactions.push(self.view_from_raw(&raw.data, raw.height as u32)?);
        }

        Ok(transactions)
    }

    fn unspent_outputs(
        &self,
        script_pub_key: &[u8],
        include_unconfirmed: bool,
    ) -> Result<Vec<UnspentOutput>, ForeignChainError> {
        match self.spec.address_for_script(script_pub_key) {
            Some(address) => self.address_unspent_outputs(&address, include_unconfirmed),
            None => Err(ForeignChainError::Unsupported(
                "unspent_outputs for non-standard scripts",
            )),
        }
    }

    fn address_unspent_outputs(
        &self,
        address: &str,
        include_unconfirmed: bool,
    ) -> Result<Vec<UnspentOutput>, ForeignChainError> {
        let request = GetAddressUtxosArg {
            addresses: vec![address.to_string()],
            start_height: u64::from(self.birthday_height),
            max_entries: 0,
        };

        let reply = self.with_channel(|channel| {
            call_unary::<GetAddressUtxosArg, GetAddressUtxosReplyList>(
                channel,
                methods::GET_ADDRESS_UTXOS,
                &request,
            )
        })?;

        let mut unspent_outputs = Vec::with_capacity(reply.address_utxos.len());
        for unspent in reply.address_utxos {
            if !include_unconfirmed && unspent.height == 0 {
                continue;
            }

            unspent_outputs.push(UnspentOutput {
                tx_hash: unspent.txid,
                output_index: unspent.index.max(0) as u32,
                height: unspent.height as u32,
                value: unspent.value_zat.max(0) as u64,
                script: unspent.script,
                address: if unspent.address.is_empty() {
                    Some(address.to_string())
                } else {
                    Some(unspent.address)
                },
            });
        }

        Ok(unspent_outputs)
    }

    fn broadcast_transaction(&self, raw_transaction: &[u8]) -> Result<(), ForeignChainError> {
        let request = RawTransaction {
            data: raw_transaction.to_vec(),
            height: 0,
        };

        let response = self.with_channel(|channel| {
            call_unary::<RawTransaction, SendResponse>(
                channel,
                methods::SEND_TRANSACTION,
                &request,
            )
        })?;

        if response.error_code != 0 {
            return Err(ForeignChainError::network(format!(
                "broadcast rejected with code {}: {}",
                response.error_code, response.error_message
            )));
        }
        Ok(())
    }

    fn servers(&self) -> Vec<Server> {
        self.inner.lock().unwrap().pool.known_servers()
    }

    fn remaining_servers(&self) -> Vec<Server> {
        self.inner.lock().unwrap().pool.remaining_servers()
    }

    fn useless_servers(&self) -> Vec<Server> {
        self.inner.lock().unwrap().pool.useless_servers()
    }

    fn current_server(&self) -> Option<Server> {
        self.inner
            .lock()
            .unwrap()
            .channel
            .as_ref()
            .map(|channel| channel.server.clone())
    }
}
