//! Raw-pubkey HTLC template for the shielded-UTXO chain family.
//!
//! These chains' light clients cannot look a redeem script up by hash, so
//! the script is additionally broadcast inside a "push only" `OP_RETURN`
//! output when funding the P2SH; see [`build_script_with_prefix`].
//!
//! Redeem script structure:
//!
//! ```text
//! OP_IF                           (true = refund, false = redeem)
//!     push(0x04) <lock time> OP_CHECKLOCKTIMEVERIFY OP_DROP
//!     push(0x21) <refunder pubkey> OP_CHECKSIG
//! OP_ELSE
//!     OP_SIZE push(0x01) 32 OP_EQUALVERIFY
//!     OP_HASH160 push(0x14) <hash of secret> OP_EQUALVERIFY
//!     push(0x21) <redeemer pubkey> OP_CHECKSIG
//! OP_ENDIF
//! ```

use crate::error::HtlcError;
use crate::htlc::MIN_LOCKTIME;

// OP_RETURN OP_PUSHDATA1, ahead of the length byte and script.
const PUSH_ONLY_PREFIX: &[u8] = &[0x6a, 0x4c];

const SCRIPT_PART_1: &[u8] = &[0x63, 0x04]; // OP_IF push(0x04)
const SCRIPT_PART_2: &[u8] = &[0xb1, 0x75, 0x21]; // OP_CHECKLOCKTIMEVERIFY OP_DROP push(0x21)
const SCRIPT_PART_3: &[u8] = &[0xac, 0x67, 0x82, 0x01, 0x20, 0x88, 0xa9, 0x14]; // OP_CHECKSIG OP_ELSE OP_SIZE push(0x01) 32 OP_EQUALVERIFY OP_HASH160 push(0x14)
const SCRIPT_PART_4: &[u8] = &[0x88, 0x21]; // OP_EQUALVERIFY push(0x21)
const SCRIPT_PART_5: &[u8] = &[0xac, 0x68]; // OP_CHECKSIG OP_ENDIF

/// Byte length of a push-only redeem script: 17 template bytes plus the two
/// raw pubkeys, the lock time and the secret hash.
pub const REDEEM_SCRIPT_LENGTH: usize = 17 + 4 + 33 + 20 + 33;

/// Builds the redeem script for a trade on a push-only chain.
///
/// Unlike the legacy template this embeds full 33-byte compressed public
/// keys rather than their hashes.
pub fn build_script(
    refunder_pubkey: &[u8; 33],
    lock_time: u32,
    redeemer_pubkey: &[u8; 33],
    secret_hash: &[u8; 20],
) -> Result<Vec<u8>, HtlcError> {
    if lock_time < MIN_LOCKTIME {
        return Err(HtlcError::LockTimeTooLow(lock_time));
    }

    let mut script = Vec::with_capacity(REDEEM_SCRIPT_LENGTH);
    script.extend_from_slice(SCRIPT_PART_1);
    script.extend_from_slice(&lock_time.to_le_bytes());
    script.extend_from_slice(SCRIPT_PART_2);
    script.extend_from_slice(refunder_pubkey);
    script.extend_from_slice(SCRIPT_PART_3);
    script.extend_from_slice(secret_hash);
    script.extend_from_slice(SCRIPT_PART_4);
    script.extend_from_slice(redeemer_pubkey);
    script.extend_from_slice(SCRIPT_PART_5);

    debug_assert_eq!(script.len(), REDEEM_SCRIPT_LENGTH);
    Ok(script)
}

/// The redeem script wrapped for broadcast as transaction data:
/// `OP_RETURN OP_PUSHDATA1 <length> <script>`.
pub fn build_script_with_prefix(
    refunder_pubkey: &[u8; 33],
    lock_time: u32,
    redeemer_pubkey: &[u8; 33],
    secret_hash: &[u8; 20],
) -> Result<Vec<u8>, HtlcError> {
    let script = build_script(refunder_pubkey, lock_time, redeemer_pubkey, secret_hash)?;

    let mut prefixed = Vec::with_capacity(PUSH_ONLY_PREFIX.len() + 1 + script.len());
    prefixed.extend_from_slice(PUSH_ONLY_PREFIX);
    prefixed.push(script.len() as u8);
    prefixed.extend_from_slice(&script);
    Ok(prefixed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_layout_is_fixed() {
        let script =
            build_script(&[0x44; 33], 1_650_000_000, &[0x55; 33], &[0x66; 20]).unwrap();

        assert_eq!(script.len(), REDEEM_SCRIPT_LENGTH);

        // Lock time right after OP_IF.
        assert_eq!(&script[..2], SCRIPT_PART_1);
        assert_eq!(&script[2..6], &1_650_000_000u32.to_le_bytes());

        // Refunder pubkey, secret hash, redeemer pubkey in order.
        assert_eq!(&script[9..42], &[0x44; 33]);
        assert_eq!(&script[50..70], &[0x66; 20]);
        assert_eq!(&script[72..105], &[0x55; 33]);
        assert_eq!(&script[105..], SCRIPT_PART_5);
    }

    #[test]
    fn prefixed_script_is_an_op_return_push() {
        let prefixed =
            build_script_with_prefix(&[0x44; 33], 1_650_000_000, &[0x55; 33], &[0x66; 20])
                .unwrap();

        assert_eq!(prefixed[0], 0x6a);
        assert_eq!(prefixed[1], 0x4c);
        assert_eq!(prefixed[2] as usize, REDEEM_SCRIPT_LENGTH);
        assert_eq!(&prefixed[3..], &build_script(&[0x44; 33], 1_650_000_000, &[0x55; 33], &[0x66; 20]).unwrap()[..]);
    }

    #[test]
    fn lock_time_below_minimum_is_rejected() {
        assert_eq!(
            build_script(&[0x44; 33], 1_000, &[0x55; 33], &[0x66; 20]),
            Err(HtlcError::LockTimeTooLow(1_000))
        );
    }
}
