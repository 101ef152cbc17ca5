//! Electrum-style backend: line-delimited JSON-RPC 2.0 over a raw or TLS
//! socket.
//!
//! Method names and parameter order are a compatibility surface shared with
//! third-party server operators and must not change. Addresses are queried
//! by *script hash*, the reversed SHA-256 of the scriptPubKey, per the
//! protocol.

use std::collections::HashSet;
use std::io::{Read, Write};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Instant;

use bitcoin::hashes::{sha256, Hash};
use lazy_static::lazy_static;
use lru::LruCache;
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::chains::ChainSpec;
use crate::error::ForeignChainError;
use crate::provider::pool::{connect_stream, RemoteStream, ServerPool};
use crate::provider::verbose::{parse_verbose_transaction, VerboseParseError};
use crate::provider::{
    ChainProvider, ChainTransaction, Server, TransactionHash, UnspentOutput,
};

// See https://electrumx.readthedocs.io/en/latest/protocol.html
const MIN_PROTOCOL_VERSION: f64 = 1.2;
const MAX_PROTOCOL_VERSION: f64 = 2.0;
const CLIENT_NAME: &str = "crosschain";

const BLOCK_HEADER_LENGTH: usize = 80;

const MAX_AVG_RESPONSE_TIME: u64 = 1_000; // ms

const TX_CACHE_SIZE: usize = 1_000;

/// Sent by some servers instead of a verbose transaction; such a server is
/// quarantined rather than retried.
const VERBOSE_TRANSACTIONS_UNSUPPORTED: &str = "verbose transactions are currently unsupported";

lazy_static! {
    // Some error 'messages' wrap upstream daemon errors, e.g.
    // "daemon error: DaemonError({'code': -5, 'message': 'No such mempool or
    // blockchain transaction. ...'})"; capture the code for callers.
    static ref DAEMON_ERROR_REGEX: Regex =
        Regex::new(r"DaemonError\(\{.*'code': ?(-?[0-9]+).*\}\)\z").unwrap();
}

struct Connection {
    server: Server,
    stream: RemoteStream,
    pending: Vec<u8>,
}

impl Connection {
    /// Next newline-terminated response, or `None` once the socket dies.
    fn read_line(&mut self) -> Option<String> {
        loop {
            if let Some(newline) = self.pending.iter().position(|byte| *byte == b'\n') {
                let mut line: Vec<u8> = self.pending.drain(..=newline).collect();
                line.pop();
                return String::from_utf8(line).ok();
            }

            let mut chunk = [0u8; 4096];
            match self.stream.read(&mut chunk) {
                Ok(0) => return None,
                Ok(read) => self.pending.extend_from_slice(&chunk[..read]),
                Err(_) => return None,
            }
        }
    }
}

struct Inner {
    pool: ServerPool,
    connection: Option<Connection>,
    next_id: u64,
}

/// Electrum-protocol [`ChainProvider`].
///
/// All connection state lives behind one mutex: request issuance, failure
/// handling and reconnection are a single critical section, so concurrent
/// trade workers can never interleave a request with another thread's
/// reconnect.
pub struct ElectrumClient {
    spec: &'static ChainSpec,
    inner: Mutex<Inner>,
    transaction_cache: Mutex<LruCache<String, ChainTransaction>>,
}

impl ElectrumClient {
    pub fn new(spec: &'static ChainSpec, extra_servers: Vec<Server>) -> Self {
        let mut servers = spec.bootstrap_servers();
        servers.extend(extra_servers);
        Self::with_servers(spec, servers)
    }

    /// Construction from an explicit server list, bypassing the spec's
    /// bootstrap set.
    pub fn with_servers(spec: &'static ChainSpec, servers: Vec<Server>) -> Self {
        ElectrumClient {
            spec,
            inner: Mutex::new(Inner {
                pool: ServerPool::new(servers),
                connection: None,
                next_id: 1,
            }),
            transaction_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(TX_CACHE_SIZE).unwrap(),
            )),
        }
    }

    /// Performs an RPC, reconnecting to other servers as needed. Fails only
    /// once the remaining-servers pool is exhausted, or with a well-formed
    /// error from a server (which is a fact about the chain, not retried).
    fn rpc(&self, method: &str, params: Vec<Value>) -> Result<Value, ForeignChainError> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;

        inner.pool.refill_if_empty();

        while self.ensure_connection(inner) {
            // If other servers remain and this one has become slow, move on.
            if !inner.pool.remaining_is_empty() {
                if let Some(connection) = &inner.connection {
                    let average = connection.server.average_response_time();
                    if average > MAX_AVG_RESPONSE_TIME {
                        tracing::info!(
                            average_ms = average,
                            server = %connection.server,
                            "slow average response time - trying another server"
                        );
                        inner.connection = None;
                        continue;
                    }
                }
            }

            match self.connected_rpc(inner, method, &params)? {
                Some(result) => return Ok(result),
                None => inner.connection = None,
            }
        }

        tracing::info!(method, "no reachable servers for RPC");
        Err(ForeignChainError::network(format!(
            "failed to perform RPC {}",
            method
        )))
    }

    /// Ensures a negotiated connection exists, drawing from the pool.
    fn ensure_connection(&self, inner: &mut Inner) -> bool {
        if inner.connection.is_some() {
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

            inner.connection = Some(Connection {
                server: server.clone(),
                stream,
                pending: Vec::new(),
            });

            match self.negotiate(inner) {
                Ok(true) => {
                    tracing::debug!(%server, "connected");
                    return true;
                }
                Ok(false) | Err(_) => inner.connection = None,
            }
        }

        false
    }

    /// Health check on a fresh connection: version negotiation, minimum
    /// protocol version, genesis hash (when known), then peer discovery.
    /// A failure disqualifies the server for this attempt without
    /// quarantining it.
    fn negotiate(&self, inner: &mut Inner) -> Result<bool, ForeignChainError> {
        if self.connected_rpc(inner, "server.version", &[])?.is_none() {
            return Ok(false);
        }

        let features = match self.connected_rpc(inner, "server.features", &[])? {
            Some(Value::Object(features)) => features,
            _ => return Ok(false),
        };

        let protocol_min = features
            .get("protocol_min")
            .and_then(Value::as_str)
            .and_then(|version| version.parse::<f64>().ok());
        match protocol_min {
            Some(version) if version >= MIN_PROTOCOL_VERSION => {}
            _ => return Ok(false),
        }

        if let Some(expected) = self.spec.genesis_hash {
            if features.get("genesis_hash").and_then(Value::as_str) != Some(expected) {
                return Ok(false);
            }
        }

        if let Some(peers) = self.connected_rpc(inner, "server.peers.subscribe", &[])? {
            inner.pool.merge_discovered(self.parse_peers(&peers));
        }

        Ok(true)
    }

    /// Peer entries look like `[ip, hostname, [feature, ...]]` where a
    /// feature of `"s"`/`"t"` (optionally followed by a port) advertises an
    /// SSL/TCP endpoint.
    fn parse_peers(&self, peers: &Value) -> HashSet<Server> {
        let mut discovered = HashSet::new();

        let entries = match peers.as_array() {
            Some(entries) => entries,
            None => return discovered,
        };

        for entry in entries {
            let entry = match entry.as_array() {
                Some(entry) if entry.len() >= 3 => entry,
                _ => continue,
            };

            let hostname = match entry[1].as_str() {
                Some(hostname) if !hostname.is_empty() => hostname,
                _ => continue,
            };

            let features = match entry[2].as_array() {
                Some(features) => features,
                None => continue,
            };

            for feature in features {
                let feature = match feature.as_str() {
                    Some(feature) => feature,
                    None => continue,
                };

                let (connection_type, default_port) = match feature.chars().next() {
                    Some('s') => (super::ConnectionType::Ssl, self.spec.default_ssl_port),
                    Some('t') => (super::ConnectionType::Tcp, self.spec.default_tcp_port),
                    // e.g. 'v' for protocol version, 'p' for pruning limit
                    _ => continue,
                };

                let port = if feature.len() > 1 {
                    match feature[1..].parse::<u16>() {
                        Ok(port) => port,
                        Err(_) => continue,
                    }
                } else {
                    default_port
                };

                discovered.insert(Server::new(hostname, connection_type, port));
            }
        }

        discovered
    }

    /// One request/response on the current connection.
    ///
    /// `Ok(None)` means the server misbehaved at the transport or protocol
    /// level and the caller should reconnect elsewhere; `Err` carries a
    /// well-formed error response from the server itself.
    fn connected_rpc(
        &self,
        inner: &mut Inner,
        method: &str,
        params: &[Value],
    ) -> Result<Option<Value>, ForeignChainError> {
        let id = inner.next_id;
        inner.next_id += 1;

        let connection = match inner.connection.as_mut() {
            Some(connection) => connection,
            None => return Ok(None),
        };

        let mut rpc_params = params.to_vec();
        if method == "server.version" {
            rpc_params.push(json!(CLIENT_NAME));
            rpc_params.push(json!([
                format!("{:.1}", MIN_PROTOCOL_VERSION),
                format!("{:.1}", MAX_PROTOCOL_VERSION)
            ]));
        }

        let request = json!({
            "id": id,
            "method": method,
            "params": rpc_params,
            "jsonrpc": "2.0",
        });
        tracing::trace!(%request, "electrum request");

        let started = Instant::now();
        if connection
            .stream
            .write_all(format!("{}\n", request).as_bytes())
            .is_err()
        {
            return Ok(None);
        }

        let response = match connection.read_line() {
            Some(response) => response,
            None => return Ok(None),
        };
        let elapsed = started.elapsed().as_millis() as u64;
        tracing::trace!(response = %response, elapsed_ms = elapsed, "electrum response");

        if response.is_empty() {
            return Ok(None);
        }

        let response: Map<String, Value> = match serde_json::from_str::<Value>(&response) {
            Ok(Value::Object(response)) => response,
            _ => return Ok(None),
        };

        connection.server.add_response_time(elapsed);

        match response.get("error") {
            None | Some(Value::Null) => {}
            Some(Value::String(message)) => {
                tracing::debug!(
                    server = %connection.server,
                    method,
                    %message,
                    "unexpected error string from server"
                );
                return Ok(None);
            }
            Some(Value::Object(error)) => {
                let message = match error.get("message").and_then(Value::as_str) {
                    Some(message) => message.to_string(),
                    None => {
                        tracing::debug!(
                            server = %connection.server,
                            method,
                            "missing message in error response"
                        );
                        return Ok(None);
                    }
                };

                let daemon_error_code = DAEMON_ERROR_REGEX
                    .captures(&message)
                    .and_then(|captures| captures[1].parse::<i64>().ok());

                return Err(ForeignChainError::Network {
                    message,
                    daemon_error_code,
                    server: Some(connection.server.clone()),
                });
            }
            Some(_) => return Ok(None),
        }

        Ok(response.get("result").cloned())
    }

    /// Permanently deprioritizes `server` and drops its connection if it is
    /// the current one.
    fn quarantine(&self, server: &Server) {
        let mut inner = self.inner.lock().unwrap();
        inner.pool.mark_useless(server);
        if inner
            .connection
            .as_ref()
            .map(|connection| &connection.server == server)
            .unwrap_or(false)
        {
            inner.connection = None;
        }
    }

    fn verbose_transaction(
        &self,
        tx_hash: &str,
        transaction: &Value,
    ) -> Result<ChainTransaction, ForeignChainError> {
        match parse_verbose_transaction(tx_hash, transaction) {
            Ok(transaction) => Ok(transaction),
            Err(VerboseParseError::Shape) => Err(protocol_error("blockchain.transaction.get")),
            // Balance accounting downstream requires output addresses. A
            // server that omits them is quarantined, not retried.
            Err(VerboseParseError::MissingAddresses) => {
                if let Some(server) = self.current_server() {
                    self.quarantine(&server);
                }
                tracing::info!(tx_hash, "no output addresses returned for transaction");
                Err(ForeignChainError::network(format!(
                    "no output addresses returned for transaction {}",
                    tx_hash
                )))
            }
        }
    }
}

/// Electrum indexes by reversed SHA-256 of the scriptPubKey.
fn electrum_script_hash(script_pub_key: &[u8]) -> String {
    let mut hash = sha256::Hash::hash(script_pub_key).to_byte_array();
    hash.reverse();
    hex::encode(hash)
}

fn protocol_error(method: &str) -> ForeignChainError {
    ForeignChainError::network(format!("unexpected response shape from {}", method))
}

/// Splits a concatenated raw-headers blob into individual headers.
///
/// Most chains use fixed 80-byte headers. Merge-mined chains interleave
/// AuxPoW data, so there the start of each header is located by its version
/// word instead; the version at offset zero is taken as the reference.
fn split_block_headers(
    raw: &[u8],
    returned_count: usize,
    requested_count: usize,
) -> Result<Vec<Vec<u8>>, ForeignChainError> {
    if raw.len() == returned_count * BLOCK_HEADER_LENGTH {
        return Ok(raw
            .chunks(BLOCK_HEADER_LENGTH)
            .map(|header| header.to_vec())
            .collect());
    }

    if raw.len() > returned_count * BLOCK_HEADER_LENGTH && raw.len() >= 4 {
        let mut reference = [0u8; 4];
        reference.copy_from_slice(&raw[..4]);

        let mut headers = Vec::new();
        for offset in 0..raw.len().saturating_sub(4) {
            if raw[offset..offset + 4] == reference && offset + BLOCK_HEADER_LENGTH <= raw.len() {
                headers.push(raw[offset..offset + BLOCK_HEADER_LENGTH].to_vec());
            }
        }

        if headers.len() != requested_count {
            return Err(ForeignChainError::network(
                "unexpected raw header contents from blockchain.block.headers",
            ));
        }
        return Ok(headers);
    }

    Err(ForeignChainError::network(
        "unexpected raw header length from blockchain.block.headers",
    ))
}

impl ChainProvider for ElectrumClient {
    fn net_id(&self) -> &str {
        self.spec.net_id
    }

    fn current_height(&self) -> Result<u32, ForeignChainError> {
        let result = self.rpc("blockchain.headers.subscribe", Vec::new())?;
        result
            .get("height")
            .and_then(Value::as_u64)
            .map(|height| height as u32)
            .ok_or_else(|| protocol_error("blockchain.headers.subscribe"))
    }

    fn raw_block_headers(
        &self,
        start_height: u32,
        count: u32,
    ) -> Result<Vec<Vec<u8>>, ForeignChainError> {
        let result = self.rpc(
            "blockchain.block.headers",
            vec![json!(start_height), json!(count)],
        )?;

        let returned_count = result
            .get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| protocol_error("blockchain.block.headers"))?;
        let raw = result
            .get("hex")
            .and_then(Value::as_str)
            .and_then(|raw| hex::decode(raw).ok())
            .ok_or_else(|| protocol_error("blockchain.block.headers"))?;

        split_block_headers(&raw, returned_count as usize, count as usize)
    }

    fn block_timestamps(
        &self,
        start_height: u32,
        count: u32,
    ) -> Result<Vec<u64>, ForeignChainError> {
        let headers = self.raw_block_headers(start_height, count)?;
        headers
            .iter()
            .map(|header| {
                if header.len() < 72 {
                    return Err(ForeignChainError::network("block header too short"));
                }
                let mut raw = [0u8; 4];
                raw.copy_from_slice(&header[68..72]);
                Ok(u32::from_le_bytes(raw) as u64)
            })
            .collect()
    }

    fn confirmed_balance(&self, script_pub_key: &[u8]) -> Result<u64, ForeignChainError> {
        let result = self.rpc(
            "blockchain.scripthash.get_balance",
            vec![json!(electrum_script_hash(script_pub_key))],
        )?;

        result
            .get("confirmed")
            .and_then(Value::as_u64)
            .ok_or_else(|| protocol_error("blockchain.scripthash.get_balance"))
    }

    fn confirmed_address_balance(&self, address: &str) -> Result<u64, ForeignChainError> {
        let script = self
            .spec
            .script_pubkey_for_address(address)
            .map_err(|_| ForeignChainError::InvalidAddress(address.to_string()))?;
        self.confirmed_balance(&script)
    }

    fn raw_transaction(&self, tx_hash: &str) -> Result<Vec<u8>, ForeignChainError> {
        let result = match self.rpc(
            "blockchain.transaction.get",
            vec![json!(tx_hash), json!(false)],
        ) {
            Ok(result) => result,
            // Upstream daemon code -5: no such transaction; that's a fact
            // about the chain.
            Err(error) if error.daemon_error_code() == Some(-5) => {
                return Err(ForeignChainError::NotFound(tx_hash.to_string()))
            }
            Err(error) => return Err(error),
        };

        result
            .as_str()
            .and_then(|raw| hex::decode(raw).ok())
            .ok_or_else(|| protocol_error("blockchain.transaction.get"))
    }

    fn transaction(&self, tx_hash: &str) -> Result<ChainTransaction, ForeignChainError> {
        if let Some(transaction) = self.transaction_cache.lock().unwrap().get(tx_hash) {
            return Ok(transaction.clone());
        }

        loop {
            let result = match self.rpc(
                "blockchain.transaction.get",
                vec![json!(tx_hash), json!(true)],
            ) {
                Ok(result) => result,
                Err(error) if error.daemon_error_code() == Some(-5) => {
                    return Err(ForeignChainError::NotFound(tx_hash.to_string()))
                }
                Err(error) => {
                    if let ForeignChainError::Network {
                        message,
                        server: Some(server),
                        ..
                    } = &error
                    {
                        if message.contains(VERBOSE_TRANSACTIONS_UNSUPPORTED) {
                            tracing::trace!(
                                %server,
                                "server does not support verbose transactions - barring it"
                            );
                            self.quarantine(&server.clone());
                            continue;
                        }
                    }
                    return Err(error);
                }
            };

            let transaction = self.verbose_transaction(tx_hash, &result)?;
            self.transaction_cache
                .lock()
                .unwrap()
                .put(tx_hash.to_string(), transaction.clone());
            return Ok(transaction);
        }
    }

    fn address_transactions(
        &self,
        script_pub_key: &[u8],
        include_unconfirmed: bool,
    ) -> Result<Vec<TransactionHash>, ForeignChainError> {
        let result = self.rpc(
            "blockchain.scripthash.get_history",
            vec![json!(electrum_script_hash(script_pub_key))],
        )?;

        let entries = result
            .as_array()
            .ok_or_else(|| protocol_error("blockchain.scripthash.get_history"))?;

        let mut transaction_hashes = Vec::new();
        for entry in entries {
            let height = entry.get("height").and_then(Value::as_i64).unwrap_or(0);
            if !include_unconfirmed && height <= 0 {
                continue;
            }

            let tx_hash = entry
                .get("tx_hash")
                .and_then(Value::as_str)
                .ok_or_else(|| protocol_error("blockchain.scripthash.get_history"))?;

            transaction_hashes.push(TransactionHash {
                height: height.max(0) as u32,
                tx_hash: tx_hash.to_string(),
            });
        }

        Ok(transaction_hashes)
    }

    fn address_chain_transactions(
        &self,
        address: &str,
        include_unconfirmed: bool,
    ) -> Result<Vec<ChainTransaction>, ForeignChainError> {
        let script = self
            .spec
            .script_pubkey_for_address(address)
            .map_err(|_| ForeignChainError::InvalidAddress(address.to_string()))?;

        let history = self.address_transactions(&script, include_unconfirmed)?;

        let mut transactions = Vec::with_capacity(history.len());
        for entry in history {
            let mut transaction = self.transaction(&entry.tx_hash)?;
            transaction.height = entry.height;
            transactions.push(transaction);
        }

        Ok(transactions)
    }

    fn unspent_outputs(
        &self,
        script_pub_key: &[u8],
        include_unconfirmed: bool,
    ) -> Result<Vec<UnspentOutput>, ForeignChainError> {
        let result = self.rpc(
            "blockchain.scripthash.listunspent",
            vec![json!(electrum_script_hash(script_pub_key))],
        )?;

        let entries = result
            .as_array()
            .ok_or_else(|| protocol_error("blockchain.scripthash.listunspent"))?;

        let mut unspent_outputs = Vec::new();
        for entry in entries {
            let height = entry.get("height").and_then(Value::as_i64).unwrap_or(0);
            // Definitely no mempool duplicates with height zero unless asked.
            if !include_unconfirmed && height <= 0 {
                continue;
            }

            let tx_hash = entry
                .get("tx_hash")
                .and_then(Value::as_str)
                .and_then(|tx_hash| hex::decode(tx_hash).ok())
                .ok_or_else(|| protocol_error("blockchain.scripthash.listunspent"))?;
            let output_index = entry
                .get("tx_pos")
                .and_then(Value::as_u64)
                .ok_or_else(|| protocol_error("blockchain.scripthash.listunspent"))?;
            let value = entry
                .get("value")
                .and_then(Value::as_u64)
                .ok_or_else(|| protocol_error("blockchain.scripthash.listunspent"))?;

            unspent_outputs.push(UnspentOutput {
                tx_hash,
                output_index: output_index as u32,
                height: height.max(0) as u32,
                value,
                script: script_pub_key.to_vec(),
                address: None,
            });
        }

        Ok(unspent_outputs)
    }

    fn address_unspent_outputs(
        &self,
        address: &str,
        include_unconfirmed: bool,
    ) -> Result<Vec<UnspentOutput>, ForeignChainError> {
        let script = self
            .spec
            .script_pubkey_for_address(address)
            .map_err(|_| ForeignChainError::InvalidAddress(address.to_string()))?;

        let mut unspent_outputs = self.unspent_outputs(&script, include_unconfirmed)?;
        for unspent in &mut unspent_outputs {
            unspent.address = Some(address.to_string());
        }
        Ok(unspent_outputs)
    }

    fn broadcast_transaction(&self, raw_transaction: &[u8]) -> Result<(), ForeignChainError> {
        let result = self.rpc(
            "blockchain.transaction.broadcast",
            vec![json!(hex::encode(raw_transaction))],
        )?;

        // The response should simply be the transaction hash.
        if result.as_str().is_none() {
            return Err(protocol_error("blockchain.transaction.broadcast"));
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
            .connection
            .as_ref()
            .map(|connection| connection.server.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::BITCOIN_REGTEST;
    use crate::provider::ConnectionType;
    use std::io::{BufRead, BufReader, Write as IoWrite};
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    /// Minimal in-process Electrum server speaking just enough protocol for
    /// negotiation plus a height query.
    fn spawn_mock_server(height_requests: Arc<AtomicUsize>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        thread::spawn(move || {
            let (stream, _) = match listener.accept() {
                Ok(accepted) => accepted,
                Err(_) => return,
            };
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;

            let mut line = String::new();
            loop {
                line.clear();
                if reader.read_line(&mut line).unwrap_or(0) == 0 {
                    return;
                }

                let request: Value = match serde_json::from_str(&line) {
                    Ok(request) => request,
                    Err(_) => return,
                };
                let id = request["id"].clone();
                let result = match request["method"].as_str() {
                    Some("server.version") => json!(["MockElectrum 1.0", "1.4"]),
                    Some("server.features") => json!({"protocol_min": "1.4"}),
                    Some("server.peers.subscribe") => json!([]),
                    Some("blockchain.headers.subscribe") => {
                        height_requests.fetch_add(1, Ordering::SeqCst);
                        json!({"height": 654_321, "hex": ""})
                    }
                    _ => Value::Null,
                };

                let response = json!({"id": id, "result": result, "jsonrpc": "2.0"});
                if writeln!(writer, "{}", response).is_err() {
                    return;
                }
            }
        });

        port
    }

    #[test]
    fn failover_reaches_the_healthy_server() {
        let height_requests = Arc::new(AtomicUsize::new(0));
        let port = spawn_mock_server(height_requests.clone());

        // Nothing listens on port 1; the pool must fail over to the mock.
        let servers = vec![
            Server::new("127.0.0.1", ConnectionType::Tcp, 1),
            Server::new("127.0.0.1", ConnectionType::Tcp, port),
        ];
        let client = ElectrumClient::with_servers(&BITCOIN_REGTEST, servers);

        assert_eq!(client.current_height().unwrap(), 654_321);

        // Exactly one successful round trip, recorded against the healthy
        // server; the dead one was dropped from the remaining pool.
        assert_eq!(height_requests.load(Ordering::SeqCst), 1);
        assert_eq!(client.current_server().unwrap().port, port);
        assert!(client
            .remaining_servers()
            .iter()
            .all(|server| server.port != 1));
    }

    #[test]
    fn exhausted_pool_fails_the_call() {
        let servers = vec![Server::new("127.0.0.1", ConnectionType::Tcp, 1)];
        let client = ElectrumClient::with_servers(&BITCOIN_REGTEST, servers);

        let error = client.current_height().unwrap_err();
        assert!(matches!(error, ForeignChainError::Network { .. }));
    }

    #[test]
    fn script_hash_is_reversed_sha256() {
        // SHA-256 of the empty script, reversed.
        let hash = electrum_script_hash(&[]);
        assert_eq!(
            hash,
            "55b852781b9995a44c939b64e441ae2724b96f99c8f4fb9a141cfc9842c4b0e3"
        );
    }

    #[test]
    fn fixed_length_headers_split_cleanly() {
        let mut raw = Vec::new();
        for i in 0..3u8 {
            raw.extend_from_slice(&[i; BLOCK_HEADER_LENGTH]);
        }

        let headers = split_block_headers(&raw, 3, 3).unwrap();
        assert_eq!(headers.len(), 3);
        assert_eq!(headers[1], vec![1u8; BLOCK_HEADER_LENGTH]);
    }

    #[test]
    fn variable_length_headers_are_located_by_version() {
        // Two 100-byte "AuxPoW" headers sharing the version word 0x00620004.
        let version = [0x04, 0x00, 0x62, 0x00];
        let mut raw = Vec::new();
        for _ in 0..2 {
            raw.extend_from_slice(&version);
            raw.extend_from_slice(&[0xee; 96]);
        }

        let headers = split_block_headers(&raw, 2, 2).unwrap();
        assert_eq!(headers.len(), 2);
        assert_eq!(&headers[0][..4], &version);
        assert_eq!(headers[0].len(), BLOCK_HEADER_LENGTH);
    }

    #[test]
    fn wrong_header_count_is_a_protocol_error() {
        let raw = vec![0u8; BLOCK_HEADER_LENGTH];
        assert!(split_block_headers(&raw, 2, 2).is_err());
    }

    #[test]
    fn daemon_error_code_is_unwrapped() {
        let message = "daemon error: DaemonError({'code': -5, 'message': 'No such mempool or blockchain transaction. Use gettransaction for wallet transactions.'})";
        let captures = DAEMON_ERROR_REGEX.captures(message).unwrap();
        assert_eq!(captures[1].parse::<i64>().unwrap(), -5);
    }

    #[test]
    fn missing_output_addresses_is_an_error() {
        let client = ElectrumClient::with_servers(&BITCOIN_REGTEST, Vec::new());
        let raw = json!({
            "size": 100,
            "locktime": 0,
            "vin": [],
            "vout": [{
                "value": 0.1,
                "scriptPubKey": {"hex": "51"},
            }],
        });

        assert!(client.verbose_transaction(&"cc".repeat(32), &raw).is_err());
    }
}
