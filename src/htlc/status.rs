//! Trade-status inference.
//!
//! Derives the lifecycle state of a swap purely from transactions observed
//! on the foreign chain: a spend of the HTLC (redeem or refund, depending on
//! whether the scriptSig carries the secret chunk) beats a funding output,
//! and unconfirmed transactions map to the `_IN_PROGRESS` variants.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use lru::LruCache;

use crate::chains::ChainSpec;
use crate::error::ForeignChainError;
use crate::htlc::{match_htlc_spend, p2sh_script_pubkey, SECRET_LENGTH};
use crate::provider::{ChainProvider, ChainTransaction, INCLUDE_UNCONFIRMED};

/// Assuming a node runs no more than this many concurrent trades.
const MAX_CACHE_ENTRIES: usize = 100;

/// Cache entries live for one time bucket of this width (milliseconds); the
/// bucket index is part of the key, so staleness needs no per-entry timers.
const CACHE_TIMEOUT_MILLIS: u128 = 30_000;

/// Swap lifecycle states. `REDEEMED` and `REFUNDED` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, strum_macros::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum HtlcStatus {
    Unfunded,
    FundingInProgress,
    Funded,
    RedeemInProgress,
    Redeemed,
    RefundInProgress,
    Refunded,
}

impl HtlcStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, HtlcStatus::Redeemed | HtlcStatus::Refunded)
    }
}

/// Status and secret lookups over a foreign chain, with bounded caches.
///
/// One engine instance is shared by all trade workers of a process; both
/// caches are safe for concurrent use. Negative results are cached like
/// positive ones so that addresses with no activity yet don't trigger a full
/// rescan on every poll.
pub struct TradeStatusEngine {
    status_cache: Mutex<LruCache<String, HtlcStatus>>,
    secret_cache: Mutex<LruCache<String, Option<Vec<u8>>>>,
}

impl Default for TradeStatusEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TradeStatusEngine {
    pub fn new() -> Self {
        let capacity = NonZeroUsize::new(MAX_CACHE_ENTRIES).unwrap();
        TradeStatusEngine {
            status_cache: Mutex::new(LruCache::new(capacity)),
            secret_cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Classifies the state of the HTLC at `p2sh_address`, expecting a
    /// funding output of at least `minimum_amount`.
    pub fn determine_htlc_status(
        &self,
        provider: &dyn ChainProvider,
        spec: &ChainSpec,
        p2sh_address: &str,
        minimum_amount: u64,
    ) -> Result<HtlcStatus, ForeignChainError> {
        let cache_key = compound_key(provider.net_id(), p2sh_address);
        if let Some(status) = self.status_cache.lock().unwrap().get(&cache_key) {
            return Ok(*status);
        }

        let redeem_script_hash = spec
            .p2sh_address_hash(p2sh_address)
            .map_err(|_| ForeignChainError::InvalidAddress(p2sh_address.to_string()))?;
        let our_script_pub_key = hex::encode(p2sh_script_pubkey(&redeem_script_hash));

        let mut transactions =
            provider.address_chain_transactions(p2sh_address, INCLUDE_UNCONFIRMED)?;

        // Confirmed before unconfirmed, then by ascending height.
        transactions.sort_by_key(|transaction| (!transaction.is_confirmed(), transaction.height));

        // Spends win over funding, so check them first.
        for transaction in &transactions {
            if let Some(status) = classify_spend(transaction, &redeem_script_hash) {
                self.status_cache.lock().unwrap().put(cache_key, status);
                return Ok(status);
            }
        }

        for transaction in &transactions {
            for output in &transaction.outputs {
                if output.value < minimum_amount {
                    continue;
                }
                if output.script_pub_key != our_script_pub_key {
                    continue;
                }

                let status = if transaction.is_confirmed() {
                    HtlcStatus::Funded
                } else {
                    HtlcStatus::FundingInProgress
                };
                self.status_cache.lock().unwrap().put(cache_key, status);
                return Ok(status);
            }
        }

        self.status_cache
            .lock()
            .unwrap()
            .put(cache_key, HtlcStatus::Unfunded);
        Ok(HtlcStatus::Unfunded)
    }

    /// Returns the secret revealed by a redeem of `p2sh_address`, if one has
    /// been broadcast yet.
    pub fn find_htlc_secret(
        &self,
        provider: &dyn ChainProvider,
        spec: &ChainSpec,
        p2sh_address: &str,
    ) -> Result<Option<Vec<u8>>, ForeignChainError> {
        let cache_key = compound_key(provider.net_id(), p2sh_address);
        if let Some(secret) = self.secret_cache.lock().unwrap().get(&cache_key) {
            return Ok(secret.clone());
        }

        let redeem_script_hash = spec
            .p2sh_address_hash(p2sh_address)
            .map_err(|_| ForeignChainError::InvalidAddress(p2sh_address.to_string()))?;

        let transactions =
            provider.address_chain_transactions(p2sh_address, INCLUDE_UNCONFIRMED)?;

        for transaction in &transactions {
            for input in &transaction.inputs {
                let script_sig = match hex::decode(&input.script_sig) {
                    Ok(script_sig) => script_sig,
                    Err(_) => continue,
                };

                let chunks = match match_htlc_spend(&script_sig, &redeem_script_hash) {
                    Some(chunks) => chunks,
                    None => continue,
                };

                if chunks.len() != 4 {
                    continue;
                }

                let secret = chunks[0].clone();
                if secret.len() != SECRET_LENGTH {
                    continue;
                }

                self.secret_cache
                    .lock()
                    .unwrap()
                    .put(cache_key, Some(secret.clone()));
                return Ok(Some(secret));
            }
        }

        self.secret_cache.lock().unwrap().put(cache_key, None);
        Ok(None)
    }
}

/// Returns the txid of the transaction that funded `p2sh_address`, spent or
/// not.
///
/// An unspent output paying our script is checked first; failing that, the
/// HTLC must already have been spent, so the spending transaction's input
/// points back at the funding txid.
pub fn funding_txid(
    provider: &dyn ChainProvider,
    spec: &ChainSpec,
    p2sh_address: &str,
) -> Result<Option<String>, ForeignChainError> {
    let redeem_script_hash = spec
        .p2sh_address_hash(p2sh_address)
        .map_err(|_| ForeignChainError::InvalidAddress(p2sh_address.to_string()))?;
    let our_script_pub_key = p2sh_script_pubkey(&redeem_script_hash);

    let unspent_outputs =
        provider.address_unspent_outputs(p2sh_address, crate::provider::EXCLUDE_UNCONFIRMED)?;
    for unspent in &unspent_outputs {
        if unspent.script != our_script_pub_key {
            continue;
        }
        return Ok(Some(unspent.tx_hash_hex()));
    }

    // No valid unspent outputs, so the HTLC must already be spent.
    let mut transactions =
        provider.address_chain_transactions(p2sh_address, crate::provider::EXCLUDE_UNCONFIRMED)?;
    transactions.sort_by_key(|transaction| (!transaction.is_confirmed(), transaction.height));

    for transaction in &transactions {
        if transaction.inputs.len() != 1 {
            continue;
        }

        let script_sig = match hex::decode(&transaction.inputs[0].script_sig) {
            Ok(script_sig) => script_sig,
            Err(_) => continue,
        };

        if match_htlc_spend(&script_sig, &redeem_script_hash).is_none() {
            continue;
        }

        return Ok(Some(transaction.inputs[0].output_tx_hash.clone()));
    }

    Ok(None)
}

/// Returns the txid of the still-unspent output funding `p2sh_address` with
/// at least `minimum_amount`, or `None` if it has been spent (or never
/// funded to that level).
pub fn unspent_funding_txid(
    provider: &dyn ChainProvider,
    spec: &ChainSpec,
    p2sh_address: &str,
    minimum_amount: u64,
) -> Result<Option<String>, ForeignChainError> {
    let redeem_script_hash = spec
        .p2sh_address_hash(p2sh_address)
        .map_err(|_| ForeignChainError::InvalidAddress(p2sh_address.to_string()))?;
    let our_script_pub_key = p2sh_script_pubkey(&redeem_script_hash);

    let unspent_outputs =
        provider.address_unspent_outputs(p2sh_address, crate::provider::EXCLUDE_UNCONFIRMED)?;
    for unspent in &unspent_outputs {
        if unspent.script != our_script_pub_key {
            continue;
        }
        if unspent.value < minimum_amount {
            continue;
        }
        return Ok(Some(unspent.tx_hash_hex()));
    }

    Ok(None)
}

/// If `transaction` spends our HTLC, returns the resulting status.
///
/// Acceptable funding is a single transaction output, so a valid spend has
/// exactly one input; anything multi-input is not ours.
fn classify_spend(
    transaction: &ChainTransaction,
    redeem_script_hash: &[u8; 20],
) -> Option<HtlcStatus> {
    if transaction.inputs.len() != 1 {
        return None;
    }

    let script_sig = hex::decode(&transaction.inputs[0].script_sig).ok()?;
    let chunks = match_htlc_spend(&script_sig, redeem_script_hash)?;

    // A fourth chunk means the secret is present, hence a redeem.
    let status = if chunks.len() == 4 {
        if transaction.is_confirmed() {
            HtlcStatus::Redeemed
        } else {
            HtlcStatus::RedeemInProgress
        }
    } else if transaction.is_confirmed() {
        HtlcStatus::Refunded
    } else {
        HtlcStatus::RefundInProgress
    };

    Some(status)
}

fn compound_key(net_id: &str, address: &str) -> String {
    let bucket = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() / CACHE_TIMEOUT_MILLIS)
        .unwrap_or(0);
    format!("{}-{}-{}", net_id, address, bucket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::BITCOIN_MAIN;
    use crate::htlc::{push_chunk, push_chunk_pushdata1};
    use crate::provider::{
        Server, TransactionHash, TransactionInput, TransactionOutput, UnspentOutput,
    };
    use bitcoin::hashes::{hash160, Hash};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fixed-history chain used to drive the engine without a network.
    struct MockChain {
        transactions: Vec<ChainTransaction>,
        unspent: Vec<UnspentOutput>,
        fetches: AtomicUsize,
    }

    impl MockChain {
        fn new(transactions: Vec<ChainTransaction>) -> Self {
            MockChain {
                transactions,
                unspent: Vec::new(),
                fetches: AtomicUsize::new(0),
            }
        }

        fn with_unspent(unspent: Vec<UnspentOutput>) -> Self {
            MockChain {
                transactions: Vec::new(),
                unspent,
                fetches: AtomicUsize::new(0),
            }
        }
    }

    impl ChainProvider for MockChain {
        fn net_id(&self) -> &str {
            "Mock-MAIN"
        }

        fn current_height(&self) -> Result<u32, ForeignChainError> {
            Ok(100)
        }

        fn raw_block_headers(
            &self,
            start_height: u32,
            count: u32,
        ) -> Result<Vec<Vec<u8>>, ForeignChainError> {
            // Synthetic 80-byte headers, one block every 600 seconds.
            Ok((start_height..start_height + count)
                .map(|height| {
                    let mut header = vec![0u8; 80];
                    let timestamp = 1_000_000 + height * 600;
                    header[68..72].copy_from_slice(&timestamp.to_le_bytes());
                    header
                })
                .collect())
        }

        fn block_timestamps(&self, _: u32, _: u32) -> Result<Vec<u64>, ForeignChainError> {
            Err(ForeignChainError::Unsupported("block_timestamps"))
        }

        fn confirmed_balance(&self, _: &[u8]) -> Result<u64, ForeignChainError> {
            Ok(0)
        }

        fn confirmed_address_balance(&self, _: &str) -> Result<u64, ForeignChainError> {
            Ok(0)
        }

        fn raw_transaction(&self, tx_hash: &str) -> Result<Vec<u8>, ForeignChainError> {
            Err(ForeignChainError::NotFound(tx_hash.to_string()))
        }

        fn transaction(&self, tx_hash: &str) -> Result<ChainTransaction, ForeignChainError> {
            self.transactions
                .iter()
                .find(|transaction| transaction.tx_hash == tx_hash)
                .cloned()
                .ok_or_else(|| ForeignChainError::NotFound(tx_hash.to_string()))
        }

        fn address_transactions(
            &self,
            _: &[u8],
            _: bool,
        ) -> Result<Vec<TransactionHash>, ForeignChainError> {
            Ok(self
                .transactions
                .iter()
                .map(|transaction| TransactionHash {
                    height: transaction.height,
                    tx_hash: transaction.tx_hash.clone(),
                })
                .collect())
        }

        fn address_chain_transactions(
            &self,
            _: &str,
            _: bool,
        ) -> Result<Vec<ChainTransaction>, ForeignChainError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.transactions.clone())
        }

        fn unspent_outputs(&self, _: &[u8], _: bool) -> Result<Vec<UnspentOutput>, ForeignChainError> {
            Ok(self.unspent.clone())
        }

        fn address_unspent_outputs(
            &self,
            _: &str,
            _: bool,
        ) -> Result<Vec<UnspentOutput>, ForeignChainError> {
            Ok(self.unspent.clone())
        }

        fn broadcast_transaction(&self, _: &[u8]) -> Result<(), ForeignChainError> {
            Ok(())
        }

        fn servers(&self) -> Vec<Server> {
            Vec::new()
        }

        fn remaining_servers(&self) -> Vec<Server> {
            Vec::new()
        }

        fn useless_servers(&self) -> Vec<Server> {
            Vec::new()
        }

        fn current_server(&self) -> Option<Server> {
            None
        }
    }

    fn redeem_script() -> Vec<u8> {
        vec![0x51; 81]
    }

    fn p2sh_address() -> String {
        let hash = hash160::Hash::hash(&redeem_script()).to_byte_array();
        BITCOIN_MAIN.p2sh_address(&hash)
    }

    fn funding_transaction(height: u32, value: u64) -> ChainTransaction {
        let hash = hash160::Hash::hash(&redeem_script()).to_byte_array();
        ChainTransaction {
            tx_hash: "11".repeat(32),
            size: 200,
            locktime: 0,
            timestamp: (height > 0).then_some(1_700_000_000),
            height,
            inputs: vec![
                TransactionInput {
                    script_sig: String::new(),
                    sequence: 0xffff_ffff,
                    output_tx_hash: "00".repeat(32),
                    output_vout: 0,
                },
                TransactionInput {
                    script_sig: String::new(),
                    sequence: 0xffff_ffff,
                    output_tx_hash: "00".repeat(32),
                    output_vout: 1,
                },
            ],
            outputs: vec![TransactionOutput {
                script_pub_key: hex::encode(p2sh_script_pubkey(&hash)),
                value,
                addresses: vec![p2sh_address()],
            }],
        }
    }

    fn spend_transaction(height: u32, with_secret: bool) -> ChainTransaction {
        let mut script_sig = Vec::new();
        if with_secret {
            push_chunk(&mut script_sig, &[0x5a; 32]);
        }
        push_chunk(&mut script_sig, &[0x01; 71]);
        push_chunk(&mut script_sig, &[0x02; 33]);
        push_chunk_pushdata1(&mut script_sig, &redeem_script());

        ChainTransaction {
            tx_hash: "22".repeat(32),
            size: 250,
            locktime: 0,
            timestamp: (height > 0).then_some(1_700_001_000),
            height,
            inputs: vec![TransactionInput {
                script_sig: hex::encode(script_sig),
                sequence: 0xffff_fffe,
                output_tx_hash: "11".repeat(32),
                output_vout: 0,
            }],
            outputs: vec![TransactionOutput {
                script_pub_key: hex::encode(p2pkh_script_pubkey_for_tests()),
                value: 49_990_000,
                addresses: vec!["1BitcoinEaterAddressDontSendf59kuE".to_string()],
            }],
        }
    }

    fn p2pkh_script_pubkey_for_tests() -> Vec<u8> {
        crate::htlc::p2pkh_script_pubkey(&[0x09; 20])
    }

    #[test]
    fn empty_history_is_unfunded() {
        let chain = MockChain::new(Vec::new());
        let engine = TradeStatusEngine::new();

        let status = engine
            .determine_htlc_status(&chain, &BITCOIN_MAIN, &p2sh_address(), 50_000_000)
            .unwrap();
        assert_eq!(status, HtlcStatus::Unfunded);
    }

    #[test]
    fn sufficient_confirmed_output_is_funded() {
        let chain = MockChain::new(vec![funding_transaction(100, 50_000_000)]);
        let engine = TradeStatusEngine::new();

        let status = engine
            .determine_htlc_status(&chain, &BITCOIN_MAIN, &p2sh_address(), 50_000_000)
            .unwrap();
        assert_eq!(status, HtlcStatus::Funded);
    }

    #[test]
    fn undersized_output_does_not_fund() {
        let chain = MockChain::new(vec![funding_transaction(100, 49_999_999)]);
        let engine = TradeStatusEngine::new();

        let status = engine
            .determine_htlc_status(&chain, &BITCOIN_MAIN, &p2sh_address(), 50_000_000)
            .unwrap();
        assert_eq!(status, HtlcStatus::Unfunded);
    }

    #[test]
    fn unconfirmed_funding_is_in_progress() {
        let chain = MockChain::new(vec![funding_transaction(0, 50_000_000)]);
        let engine = TradeStatusEngine::new();

        let status = engine
            .determine_htlc_status(&chain, &BITCOIN_MAIN, &p2sh_address(), 50_000_000)
            .unwrap();
        assert_eq!(status, HtlcStatus::FundingInProgress);
    }

    #[test]
    fn three_chunk_spend_is_a_refund() {
        let chain = MockChain::new(vec![
            funding_transaction(100, 50_000_000),
            spend_transaction(0, false),
        ]);
        let engine = TradeStatusEngine::new();

        let status = engine
            .determine_htlc_status(&chain, &BITCOIN_MAIN, &p2sh_address(), 50_000_000)
            .unwrap();
        assert_eq!(status, HtlcStatus::RefundInProgress);

        let chain = MockChain::new(vec![
            funding_transaction(100, 50_000_000),
            spend_transaction(105, false),
        ]);
        let engine = TradeStatusEngine::new();
        let status = engine
            .determine_htlc_status(&chain, &BITCOIN_MAIN, &p2sh_address(), 50_000_000)
            .unwrap();
        assert_eq!(status, HtlcStatus::Refunded);
    }

    #[test]
    fn four_chunk_spend_is_a_redeem() {
        let chain = MockChain::new(vec![
            funding_transaction(100, 50_000_000),
            spend_transaction(104, true),
        ]);
        let engine = TradeStatusEngine::new();

        let status = engine
            .determine_htlc_status(&chain, &BITCOIN_MAIN, &p2sh_address(), 50_000_000)
            .unwrap();
        assert_eq!(status, HtlcStatus::Redeemed);
        assert!(status.is_terminal());
    }

    #[test]
    fn status_is_cached_within_a_bucket() {
        let chain = MockChain::new(vec![funding_transaction(100, 50_000_000)]);
        let engine = TradeStatusEngine::new();
        let address = p2sh_address();

        let first = engine
            .determine_htlc_status(&chain, &BITCOIN_MAIN, &address, 50_000_000)
            .unwrap();
        let second = engine
            .determine_htlc_status(&chain, &BITCOIN_MAIN, &address, 50_000_000)
            .unwrap();

        assert_eq!(first, second);
        // One fetch, one cache hit; unless the test straddled a bucket edge.
        let fetches = chain.fetches.load(Ordering::SeqCst);
        assert!(fetches <= 2);
        assert!(fetches >= 1);
    }

    #[test]
    fn secret_is_found_and_negative_results_cached() {
        let chain = MockChain::new(vec![
            funding_transaction(100, 50_000_000),
            spend_transaction(104, true),
        ]);
        let engine = TradeStatusEngine::new();

        let secret = engine
            .find_htlc_secret(&chain, &BITCOIN_MAIN, &p2sh_address())
            .unwrap();
        assert_eq!(secret, Some(vec![0x5a; 32]));

        let unspent_chain = MockChain::new(vec![funding_transaction(100, 50_000_000)]);
        let fresh_engine = TradeStatusEngine::new();
        let secret = fresh_engine
            .find_htlc_secret(&unspent_chain, &BITCOIN_MAIN, &p2sh_address())
            .unwrap();
        assert_eq!(secret, None);

        // The negative result is now served from cache.
        let secret = fresh_engine
            .find_htlc_secret(&unspent_chain, &BITCOIN_MAIN, &p2sh_address())
            .unwrap();
        assert_eq!(secret, None);
    }

    #[test]
    fn funding_txid_prefers_unspent_outputs() {
        let hash = hash160::Hash::hash(&redeem_script()).to_byte_array();
        let mut chain = MockChain::with_unspent(vec![UnspentOutput {
            tx_hash: vec![0x11; 32],
            output_index: 0,
            height: 100,
            value: 50_000_000,
            script: p2sh_script_pubkey(&hash),
            address: Some(p2sh_address()),
        }]);
        chain.transactions = vec![funding_transaction(100, 50_000_000)];

        let txid = funding_txid(&chain, &BITCOIN_MAIN, &p2sh_address()).unwrap();
        assert_eq!(txid, Some("11".repeat(32)));

        let txid =
            unspent_funding_txid(&chain, &BITCOIN_MAIN, &p2sh_address(), 50_000_000).unwrap();
        assert_eq!(txid, Some("11".repeat(32)));

        // Minimum amount not met: no qualifying unspent funding.
        let txid =
            unspent_funding_txid(&chain, &BITCOIN_MAIN, &p2sh_address(), 50_000_001).unwrap();
        assert_eq!(txid, None);
    }

    #[test]
    fn funding_txid_follows_a_spend_back_to_its_outpoint() {
        // HTLC already spent: no unspent outputs, but the spend's input
        // names the funding transaction.
        let chain = MockChain::new(vec![
            funding_transaction(100, 50_000_000),
            spend_transaction(104, true),
        ]);

        let txid = funding_txid(&chain, &BITCOIN_MAIN, &p2sh_address()).unwrap();
        assert_eq!(txid, Some("11".repeat(32)));

        let unspent =
            unspent_funding_txid(&chain, &BITCOIN_MAIN, &p2sh_address(), 1).unwrap();
        assert_eq!(unspent, None);
    }

    #[test]
    fn median_block_time_is_the_middle_of_eleven() {
        let chain = MockChain::new(Vec::new());
        // Heights 90..=100, timestamps 1_000_000 + h * 600; the median is
        // the sixth, at height 95.
        let median = crate::provider::median_block_time(&chain).unwrap();
        assert_eq!(median, 1_000_000 + 95 * 600);
    }

    #[test]
    fn output_gathering_reports_shortfalls() {
        use crate::htlc::{gather_spendable_outputs, FundingOutput};

        let script = p2sh_script_pubkey(&[0x10; 20]);
        let unspent = |height: u32, value: u64| UnspentOutput {
            tx_hash: vec![height as u8; 32],
            output_index: 0,
            height,
            value,
            script: script.clone(),
            address: None,
        };

        let chain = MockChain::with_unspent(vec![unspent(200, 30_000), unspent(100, 30_000)]);

        // Oldest output first, stops once the amount plus fee is covered.
        let selected =
            gather_spendable_outputs(&chain, &BITCOIN_MAIN, &script, 40_000).unwrap();
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].height, 100);

        let funding = FundingOutput::from_unspent(&selected[0]);
        assert_eq!(funding.tx_hash, "64".repeat(32));

        let error = gather_spendable_outputs(&chain, &BITCOIN_MAIN, &script, 60_000).unwrap_err();
        match error {
            ForeignChainError::InsufficientFunds {
                required,
                available,
            } => {
                assert_eq!(required, 60_000 + BITCOIN_MAIN.p2sh_fee);
                assert_eq!(available, 60_000);
            }
            other => panic!("expected InsufficientFunds, got {:?}", other),
        }
    }

    #[test]
    fn display_matches_wire_names() {
        assert_eq!(HtlcStatus::RedeemInProgress.to_string(), "REDEEM_IN_PROGRESS");
        assert_eq!(HtlcStatus::Unfunded.to_string(), "UNFUNDED");
    }
}
