//! Legacy 20-byte pubkey-hash HTLC template, used by the Bitcoin-like
//! chains.
//!
//! Redeem script structure:
//!
//! ```text
//! OP_TUCK OP_CHECKSIGVERIFY
//! OP_HASH160 OP_DUP push(0x14) <refunder pubkey hash> OP_EQUAL
//! OP_IF
//!     OP_DROP push(0x04) <lock time> OP_CHECKLOCKTIMEVERIFY
//! OP_ELSE
//!     push(0x14) <redeemer pubkey hash> OP_EQUALVERIFY
//!     OP_HASH160 push(0x14) <hash of secret> OP_EQUAL
//! OP_ENDIF
//! ```
//!
//! The signature is checked up front for both paths; the branch then either
//! enforces the lock time (refund) or demands the secret preimage (redeem).

use bitcoin::Transaction;

use crate::error::HtlcError;
use crate::htlc::{
    build_spend_transaction, push_chunk, push_chunk_pushdata1, FundingOutput, SpendKey,
    MIN_LOCKTIME,
};

// Script fragments between the variable fields. Consensus-critical; the
// offsets of every field follow from these lengths.
const SCRIPT_PART_1: &[u8] = &[0x7d, 0xad, 0xa9, 0x76, 0x14]; // OP_TUCK OP_CHECKSIGVERIFY OP_HASH160 OP_DUP push(0x14)
const SCRIPT_PART_2: &[u8] = &[0x87, 0x63, 0x75, 0x04]; // OP_EQUAL OP_IF OP_DROP push(0x04)
const SCRIPT_PART_3: &[u8] = &[0xb1, 0x67, 0x14]; // OP_CHECKLOCKTIMEVERIFY OP_ELSE push(0x14)
const SCRIPT_PART_4: &[u8] = &[0x88, 0xa9, 0x14]; // OP_EQUALVERIFY OP_HASH160 push(0x14)
const SCRIPT_PART_5: &[u8] = &[0x87, 0x68]; // OP_EQUAL OP_ENDIF

/// Byte length of a legacy redeem script: 17 template bytes plus the two
/// pubkey hashes, the lock time and the secret hash.
pub const REDEEM_SCRIPT_LENGTH: usize = 17 + 20 + 4 + 20 + 20;

/// Builds the redeem script for a trade.
///
/// `lock_time` is seconds since epoch, after which the refunder may claim
/// the funds back; `secret_hash` is the HASH160 of the 32-byte secret the
/// redeemer must reveal.
pub fn build_script(
    refunder_pubkey_hash: &[u8; 20],
    lock_time: u32,
    redeemer_pubkey_hash: &[u8; 20],
    secret_hash: &[u8; 20],
) -> Result<Vec<u8>, HtlcError> {
    if lock_time < MIN_LOCKTIME {
        return Err(HtlcError::LockTimeTooLow(lock_time));
    }

    let mut script = Vec::with_capacity(REDEEM_SCRIPT_LENGTH);
    script.extend_from_slice(SCRIPT_PART_1);
    script.extend_from_slice(refunder_pubkey_hash);
    script.extend_from_slice(SCRIPT_PART_2);
    script.extend_from_slice(&lock_time.to_le_bytes());
    script.extend_from_slice(SCRIPT_PART_3);
    script.extend_from_slice(redeemer_pubkey_hash);
    script.extend_from_slice(SCRIPT_PART_4);
    script.extend_from_slice(secret_hash);
    script.extend_from_slice(SCRIPT_PART_5);

    debug_assert_eq!(script.len(), REDEEM_SCRIPT_LENGTH);
    Ok(script)
}

/// Signed transaction claiming a refund once the lock time has passed.
///
/// scriptSig shape: `[signature, pubkey, redeem_script]`: the missing
/// secret chunk is what later classifies this spend as a refund.
pub fn build_refund_transaction(
    refund_amount: u64,
    refund_key: &SpendKey,
    funding_outputs: &[FundingOutput],
    redeem_script: &[u8],
    lock_time: u32,
) -> Result<Transaction, HtlcError> {
    let refund_pubkey = refund_key.public_key();

    build_spend_transaction(
        refund_amount,
        refund_key,
        funding_outputs,
        redeem_script,
        Some(lock_time),
        |signature| {
            let mut script_sig = Vec::new();
            push_chunk(&mut script_sig, signature);
            push_chunk(&mut script_sig, &refund_pubkey);
            push_chunk_pushdata1(&mut script_sig, redeem_script);
            script_sig
        },
    )
}

/// Signed transaction redeeming the funds by revealing the secret.
///
/// scriptSig shape: `[secret, signature, pubkey, redeem_script]`.
pub fn build_redeem_transaction(
    redeem_amount: u64,
    redeem_key: &SpendKey,
    funding_outputs: &[FundingOutput],
    redeem_script: &[u8],
    secret: &[u8; 32],
) -> Result<Transaction, HtlcError> {
    let redeem_pubkey = redeem_key.public_key();

    build_spend_transaction(
        redeem_amount,
        redeem_key,
        funding_outputs,
        redeem_script,
        None,
        |signature| {
            let mut script_sig = Vec::new();
            push_chunk(&mut script_sig, secret);
            push_chunk(&mut script_sig, signature);
            push_chunk(&mut script_sig, &redeem_pubkey);
            push_chunk_pushdata1(&mut script_sig, redeem_script);
            script_sig
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::BITCOIN_MAIN;
    use crate::htlc::{find_secret, LOCKTIME_NO_RBF_SEQUENCE, NO_LOCKTIME_NO_RBF_SEQUENCE};
    use bitcoin::consensus::encode::serialize;
    use bitcoin::hashes::{hash160, Hash};

    fn test_key(fill: u8) -> SpendKey {
        SpendKey::from_bytes(&[fill; 32]).unwrap()
    }

    fn test_funding_output() -> FundingOutput {
        FundingOutput {
            tx_hash: "aa".repeat(32),
            output_index: 0,
        }
    }

    #[test]
    fn script_layout_is_fixed() {
        let script = build_script(&[0x11; 20], 1_700_000_000, &[0x22; 20], &[0x33; 20]).unwrap();

        // Fixed template length plus 60 bytes of payload.
        assert_eq!(script.len(), 21 + 60);
        assert_eq!(script.len(), REDEEM_SCRIPT_LENGTH);

        // Refund pubkey hash starts right after the 5-byte preamble.
        assert_eq!(&script[..5], SCRIPT_PART_1);
        assert_eq!(&script[5..25], &[0x11; 20]);

        // Lock time is little-endian, after the second fragment.
        assert_eq!(&script[29..33], &1_700_000_000u32.to_le_bytes());

        assert_eq!(&script[36..56], &[0x22; 20]);
        assert_eq!(&script[59..79], &[0x33; 20]);
        assert_eq!(&script[79..], SCRIPT_PART_5);
    }

    #[test]
    fn lock_time_below_minimum_is_rejected() {
        assert_eq!(
            build_script(&[0x11; 20], 1_400_000_000, &[0x22; 20], &[0x33; 20]),
            Err(HtlcError::LockTimeTooLow(1_400_000_000))
        );
    }

    #[test]
    fn redeem_transaction_reveals_the_secret() {
        let secret = [0x5au8; 32];
        let secret_hash = hash160::Hash::hash(&secret).to_byte_array();

        let refund_key = test_key(0x01);
        let redeem_key = test_key(0x02);

        let redeem_script = build_script(
            &refund_key.pubkey_hash(),
            1_700_000_000,
            &redeem_key.pubkey_hash(),
            &secret_hash,
        )
        .unwrap();

        let script_hash = hash160::Hash::hash(&redeem_script).to_byte_array();
        let p2sh_address = BITCOIN_MAIN.p2sh_address(&script_hash);

        let transaction = build_redeem_transaction(
            49_990_000,
            &redeem_key,
            &[test_funding_output()],
            &redeem_script,
            &secret,
        )
        .unwrap();

        assert_eq!(transaction.version.0, 2);
        assert_eq!(
            transaction.input[0].sequence.0,
            NO_LOCKTIME_NO_RBF_SEQUENCE
        );

        let raw = serialize(&transaction);
        let found = find_secret(&BITCOIN_MAIN, &p2sh_address, &[raw]).unwrap();
        assert_eq!(found, Some(secret.to_vec()));
    }

    #[test]
    fn refund_transaction_reveals_nothing() {
        let secret = [0x5au8; 32];
        let secret_hash = hash160::Hash::hash(&secret).to_byte_array();

        let refund_key = test_key(0x01);
        let redeem_key = test_key(0x02);

        let lock_time = 1_700_000_000;
        let redeem_script = build_script(
            &refund_key.pubkey_hash(),
            lock_time,
            &redeem_key.pubkey_hash(),
            &secret_hash,
        )
        .unwrap();

        let script_hash = hash160::Hash::hash(&redeem_script).to_byte_array();
        let p2sh_address = BITCOIN_MAIN.p2sh_address(&script_hash);

        let transaction = build_refund_transaction(
            49_990_000,
            &refund_key,
            &[test_funding_output()],
            &redeem_script,
            lock_time,
        )
        .unwrap();

        assert_eq!(transaction.lock_time.to_consensus_u32(), lock_time);
        assert_eq!(transaction.input[0].sequence.0, LOCKTIME_NO_RBF_SEQUENCE);

        let raw = serialize(&transaction);
        let found = find_secret(&BITCOIN_MAIN, &p2sh_address, &[raw]).unwrap();
        assert_eq!(found, None);
    }

    #[test]
    fn each_input_is_signed_independently() {
        let key = test_key(0x03);
        let redeem_script =
            build_script(&key.pubkey_hash(), 1_700_000_000, &[0x22; 20], &[0x33; 20]).unwrap();

        let funding_outputs = vec![
            FundingOutput {
                tx_hash: "bb".repeat(32),
                output_index: 1,
            },
            FundingOutput {
                tx_hash: "cc".repeat(32),
                output_index: 0,
            },
        ];

        let transaction = build_refund_transaction(
            99_980_000,
            &key,
            &funding_outputs,
            &redeem_script,
            1_700_000_000,
        )
        .unwrap();

        assert_eq!(transaction.input.len(), 2);
        assert_eq!(transaction.output.len(), 1);

        // Signatures commit to different inputs, so the scriptSigs differ.
        assert_ne!(
            transaction.input[0].script_sig,
            transaction.input[1].script_sig
        );
    }
}
