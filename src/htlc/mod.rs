//! HTLC script codec.
//!
//! Builds and inspects the P2SH hash-time-locked contracts used on the
//! foreign side of a trade, in two template families:
//!
//! - [`legacy`]: the 20-byte pubkey-hash form used by most chains;
//! - [`push_only`]: the 33-byte raw-pubkey form whose redeem script is also
//!   broadcast as an `OP_RETURN` output, for chains whose light clients
//!   cannot otherwise discover it.
//!
//! Byte layouts here are consensus-critical. A deviation does not degrade
//! gracefully; it makes funds unspendable.

pub mod legacy;
pub mod push_only;
pub mod status;

pub use self::status::{HtlcStatus, TradeStatusEngine};

use std::str::FromStr;

use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::deserialize;
use bitcoin::hashes::{hash160, Hash};
use bitcoin::secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};

use crate::chains::ChainSpec;
use crate::error::{ForeignChainError, HtlcError};
use crate::provider::{ChainProvider, UnspentOutput};

pub const SECRET_LENGTH: usize = 32;

/// Lock times below this are rejected outright: they would be interpreted as
/// block heights rather than timestamps, silently changing the refund
/// semantics.
pub const MIN_LOCKTIME: u32 = 1_500_000_000;

/// Sequence for inputs that do not use nLockTime; disables replace-by-fee.
pub const NO_LOCKTIME_NO_RBF_SEQUENCE: u32 = 0xFFFF_FFFF;
/// Sequence for inputs that do use nLockTime (refund path); one below the
/// maximum so locktime is enforced while replace-by-fee stays disabled.
pub const LOCKTIME_NO_RBF_SEQUENCE: u32 = 0xFFFF_FFFE;

const OP_PUSHDATA1: u8 = 0x4c;

/// Key able to spend an HTLC output (for either the refund or redeem path).
#[derive(Clone)]
pub struct SpendKey {
    secret: SecretKey,
}

impl SpendKey {
    pub fn new(secret: SecretKey) -> Self {
        SpendKey { secret }
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, HtlcError> {
        SecretKey::from_slice(bytes)
            .map(SpendKey::new)
            .map_err(|e| HtlcError::Signing(e.to_string()))
    }

    /// 33-byte compressed public key.
    pub fn public_key(&self) -> [u8; 33] {
        let secp = Secp256k1::new();
        PublicKey::from_secret_key(&secp, &self.secret).serialize()
    }

    /// HASH160 of the compressed public key.
    pub fn pubkey_hash(&self) -> [u8; 20] {
        hash160::Hash::hash(&self.public_key()).to_byte_array()
    }
}

/// One HTLC-funding output to be spent.
#[derive(Clone, Debug)]
pub struct FundingOutput {
    pub tx_hash: String,
    pub output_index: u32,
}

impl FundingOutput {
    pub fn from_unspent(unspent: &UnspentOutput) -> Self {
        FundingOutput {
            tx_hash: unspent.tx_hash_hex(),
            output_index: unspent.output_index,
        }
    }
}

pub fn p2pkh_script_pubkey(pubkey_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.push(0x76); // OP_DUP
    script.push(0xa9); // OP_HASH160
    script.push(0x14);
    script.extend_from_slice(pubkey_hash);
    script.push(0x88); // OP_EQUALVERIFY
    script.push(0xac); // OP_CHECKSIG
    script
}

pub fn p2sh_script_pubkey(script_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(23);
    script.push(0xa9); // OP_HASH160
    script.push(0x14);
    script.extend_from_slice(script_hash);
    script.push(0x87); // OP_EQUAL
    script
}

/// Appends `data` as a direct-length push (opcodes 0x00-0x4b).
pub(crate) fn push_chunk(script: &mut Vec<u8>, data: &[u8]) {
    debug_assert!(data.len() <= 0x4b);
    script.push(data.len() as u8);
    script.extend_from_slice(data);
}

/// Appends `data` as an OP_PUSHDATA1 push, the encoding always used for the
/// redeem script chunk.
pub(crate) fn push_chunk_pushdata1(script: &mut Vec<u8>, data: &[u8]) {
    debug_assert!(data.len() <= 0xff);
    script.push(OP_PUSHDATA1);
    script.push(data.len() as u8);
    script.extend_from_slice(data);
}

/// Decodes a scriptSig into its push-data chunks.
///
/// Handles direct-length pushes (0x00-0x4b) and OP_PUSHDATA1. Any other
/// opcode aborts decoding of this input only; the result is empty and the
/// caller moves on to the next candidate; it is never an error.
pub fn extract_script_sig_chunks(script_sig: &[u8]) -> Vec<Vec<u8>> {
    let mut chunks = Vec::new();
    let mut offset = 0;

    while offset < script_sig.len() {
        let mut push_op = script_sig[offset] as usize;
        offset += 1;

        if push_op > OP_PUSHDATA1 as usize {
            return Vec::new();
        }

        if push_op == OP_PUSHDATA1 as usize {
            if offset >= script_sig.len() {
                return Vec::new();
            }
            push_op = script_sig[offset] as usize;
            offset += 1;
        }

        if offset + push_op > script_sig.len() {
            return Vec::new();
        }

        chunks.push(script_sig[offset..offset + push_op].to_vec());
        offset += push_op;
    }

    chunks
}

/// Returns the scriptSig's chunks if it looks like a spend of our HTLC:
/// 3 chunks (refund) or 4 chunks (redeem), with the final chunk hashing to
/// the expected redeem script hash. Anything else is simply not ours.
pub(crate) fn match_htlc_spend(
    script_sig: &[u8],
    redeem_script_hash: &[u8; 20],
) -> Option<Vec<Vec<u8>>> {
    let chunks = extract_script_sig_chunks(script_sig);
    if chunks.len() < 3 || chunks.len() > 4 {
        return None;
    }

    let redeem_script = chunks.last()?;
    let candidate_hash = hash160::Hash::hash(redeem_script).to_byte_array();
    if &candidate_hash != redeem_script_hash {
        return None;
    }

    Some(chunks)
}

/// Returns the revealed secret, if any, from raw candidate transactions that
/// may spend the given P2SH address.
///
/// A redeem spend carries exactly four chunks `[secret, sig, pubkey,
/// redeem_script]`; a refund carries three and reveals nothing. Absence
/// across all candidates is the normal "not yet spent" outcome, not an
/// error.
pub fn find_secret(
    spec: &ChainSpec,
    p2sh_address: &str,
    raw_transactions: &[Vec<u8>],
) -> Result<Option<Vec<u8>>, HtlcError> {
    let expected_hash = spec.p2sh_address_hash(p2sh_address)?;

    for raw_transaction in raw_transactions {
        let transaction: Transaction = match deserialize(raw_transaction) {
            Ok(transaction) => transaction,
            Err(_) => continue,
        };

        for input in &transaction.input {
            let chunks = match match_htlc_spend(input.script_sig.as_bytes(), &expected_hash) {
                Some(chunks) => chunks,
                None => continue,
            };

            if chunks.len() != 4 {
                // Refund spend, no secret on display.
                continue;
            }

            let secret = &chunks[0];
            if secret.len() != SECRET_LENGTH {
                continue;
            }

            return Ok(Some(secret.clone()));
        }
    }

    Ok(None)
}

/// Builds and signs a transaction spending one or more HTLC outputs back to
/// a single P2PKH output owned by `spend_key`.
///
/// Inputs are signed with SIGHASH_ALL (not anyone-can-pay) only after every
/// input and output is in place; each signature commits to the other
/// inputs' outpoints. The scriptSig shape (refund vs redeem) is supplied by
/// the caller.
pub fn build_spend_transaction(
    amount: u64,
    spend_key: &SpendKey,
    funding_outputs: &[FundingOutput],
    redeem_script: &[u8],
    lock_time: Option<u32>,
    script_sig_builder: impl Fn(&[u8]) -> Vec<u8>,
) -> Result<Transaction, HtlcError> {
    let output_script = p2pkh_script_pubkey(&spend_key.pubkey_hash());

    let mut transaction = Transaction {
        version: Version::TWO,
        lock_time: match lock_time {
            Some(lock_time) => LockTime::from_consensus(lock_time),
            None => LockTime::ZERO,
        },
        input: Vec::with_capacity(funding_outputs.len()),
        output: vec![TxOut {
            value: Amount::from_sat(amount),
            script_pubkey: ScriptBuf::from_bytes(output_script),
        }],
    };

    let sequence = if lock_time.is_some() {
        Sequence(LOCKTIME_NO_RBF_SEQUENCE)
    } else {
        Sequence(NO_LOCKTIME_NO_RBF_SEQUENCE)
    };

    for funding_output in funding_outputs {
        let txid = Txid::from_str(&funding_output.tx_hash)
            .map_err(|e| HtlcError::Signing(e.to_string()))?;

        transaction.input.push(TxIn {
            previous_output: OutPoint {
                txid,
                vout: funding_output.output_index,
            },
            script_sig: ScriptBuf::new(),
            sequence,
            witness: Witness::new(),
        });
    }

    let secp = Secp256k1::new();
    let redeem_script_buf = ScriptBuf::from_bytes(redeem_script.to_vec());

    let mut script_sigs = Vec::with_capacity(funding_outputs.len());
    {
        let sighash_cache = SighashCache::new(&transaction);
        for input_index in 0..funding_outputs.len() {
            let sighash = sighash_cache
                .legacy_signature_hash(
                    input_index,
                    &redeem_script_buf,
                    EcdsaSighashType::All.to_u32(),
                )
                .map_err(|e| HtlcError::Signing(e.to_string()))?;

            let message = Message::from_digest(sighash.to_byte_array());
            let signature = secp.sign_ecdsa(&message, &spend_key.secret);

            let mut signature_bytes = signature.serialize_der().to_vec();
            signature_bytes.push(EcdsaSighashType::All.to_u32() as u8);

            script_sigs.push(script_sig_builder(&signature_bytes));
        }
    }

    for (input, script_sig) in transaction.input.iter_mut().zip(script_sigs) {
        input.script_sig = ScriptBuf::from_bytes(script_sig);
    }

    Ok(transaction)
}

/// Selects unspent outputs covering `amount` plus the chain's P2SH fee,
/// oldest first. Shortfall is a distinguished condition, separate from any
/// network failure.
pub fn gather_spendable_outputs(
    provider: &dyn ChainProvider,
    spec: &ChainSpec,
    script_pub_key: &[u8],
    amount: u64,
) -> Result<Vec<UnspentOutput>, ForeignChainError> {
    let required = amount + spec.p2sh_fee;

    let mut unspent = provider.unspent_outputs(script_pub_key, crate::provider::EXCLUDE_UNCONFIRMED)?;
    unspent.sort_by_key(|output| output.height);

    let mut selected = Vec::new();
    let mut available = 0u64;
    for output in unspent {
        available += output.value;
        selected.push(output);
        if available >= required {
            return Ok(selected);
        }
    }

    Err(ForeignChainError::InsufficientFunds {
        required,
        available,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_decoder_handles_direct_and_pushdata1() {
        let mut script_sig = Vec::new();
        push_chunk(&mut script_sig, &[0xaa; 32]);
        push_chunk(&mut script_sig, &[0xbb; 71]);
        push_chunk_pushdata1(&mut script_sig, &[0xcc; 81]);

        let chunks = extract_script_sig_chunks(&script_sig);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], vec![0xaa; 32]);
        assert_eq!(chunks[1], vec![0xbb; 71]);
        assert_eq!(chunks[2], vec![0xcc; 81]);
    }

    #[test]
    fn chunk_decoder_rejects_non_push_opcodes() {
        // OP_DUP is not a push.
        assert!(extract_script_sig_chunks(&[0x76, 0x01, 0xff]).is_empty());
    }

    #[test]
    fn chunk_decoder_rejects_truncated_pushes() {
        assert!(extract_script_sig_chunks(&[0x05, 0x01, 0x02]).is_empty());
        assert!(extract_script_sig_chunks(&[0x4c]).is_empty());
        assert!(extract_script_sig_chunks(&[0x4c, 0x10, 0x00]).is_empty());
    }

    #[test]
    fn empty_push_is_a_chunk() {
        let chunks = extract_script_sig_chunks(&[0x00]);
        assert_eq!(chunks, vec![Vec::<u8>::new()]);
    }

    #[test]
    fn spend_match_requires_three_or_four_chunks() {
        let redeem_script = vec![0x51u8; 10];
        let redeem_script_hash = hash160::Hash::hash(&redeem_script).to_byte_array();

        let mut two_chunks = Vec::new();
        push_chunk(&mut two_chunks, &[0x01; 71]);
        push_chunk_pushdata1(&mut two_chunks, &redeem_script);
        assert!(match_htlc_spend(&two_chunks, &redeem_script_hash).is_none());

        let mut three_chunks = Vec::new();
        push_chunk(&mut three_chunks, &[0x01; 71]);
        push_chunk(&mut three_chunks, &[0x02; 33]);
        push_chunk_pushdata1(&mut three_chunks, &redeem_script);
        let chunks = match_htlc_spend(&three_chunks, &redeem_script_hash).unwrap();
        assert_eq!(chunks.len(), 3);

        // Wrong redeem script hash: not our HTLC.
        assert!(match_htlc_spend(&three_chunks, &[0u8; 20]).is_none());
    }
}
