//! The offer/trade/redeem/refund contract.
//!
//! Lifecycle, driven entirely by transactions the contract observes:
//!
//! 1. *Offer*: wait for a message from the creator naming a trade partner.
//!    The creator naming themselves is the cancel signal and refunds
//!    immediately. Otherwise the partner receives a small initial payout
//!    (so they can afford to message the contract back) and the refund
//!    deadline starts counting.
//! 2. *Trade*: wait for a message from the partner whose payload hashes to
//!    the stored secret hash. A match pays the partner the redeem payout and
//!    falls through into refund of the remainder; the fallthrough ordering
//!    is load-bearing, downstream balance accounting assumes it. Past the
//!    deadline, refund unconditionally.
//! 3. *Refund*: the entire remaining balance returns to the creator and the
//!    contract terminates for good.
//!
//! There is no explicit mode field: a non-zero refund timestamp *is* trade
//! mode.

use sha2::{Digest, Sha256};

use crate::contract::asm::{assemble, Assembler};
use crate::contract::isa::{creation_bytes, function, timestamp_block_height, VALUE_SIZE};

/// Contract format version carried in the creation bytes.
pub const CONTRACT_VERSION: u16 = 2;

/// Nominal minutes per native-chain block, for translating VM timestamps
/// into human-relevant heights.
pub const NATIVE_BLOCK_MINUTES: u64 = 1;

/// SHA-256 of the assembled code bytes. The generator must reproduce this
/// exactly; a mismatch means the build itself is broken and compilation
/// aborts the process rather than deploying a contract nobody audited.
pub const CODE_BYTES_HASH: &str =
    "648e0862dc371bae67267c02980e9dfadf2f2d60b2370f40d9d28d742b701207";

/// Message-type transactions are the only kind the contract reacts to.
const MESSAGE_TX_TYPE: u64 = 1;

/// Data-segment layout, one 64-bit word per slot. Constants first, then the
/// variables the contract mutates as it runs. Every offset is re-asserted
/// while the segment is built; an off-by-one here corrupts every field
/// after it.
pub(crate) mod layout {
    /// Creator's trade address (4 words, 32 bytes).
    pub const CREATOR_ADDRESS: u32 = 0;
    /// Creator's foreign-chain pubkey hash (20 bytes, zero-padded).
    pub const FOREIGN_PUBKEY_HASH: u32 = 4;
    /// HASH160 of the trade secret (20 bytes, zero-padded).
    pub const SECRET_HASH: u32 = 8;
    /// Trade timeout, in minutes.
    pub const TRADE_TIMEOUT: u32 = 12;
    /// Bootstrap payout sent to the partner when the trade begins.
    pub const INITIAL_PAYOUT: u32 = 13;
    /// Payout sent to the partner on a successful secret reveal.
    pub const REDEEM_PAYOUT: u32 = 14;
    /// Amount the counterparty is expected to lock on the foreign chain.
    pub const EXPECTED_FOREIGN_AMOUNT: u32 = 15;
    /// Transaction-type filter (messages only).
    pub const EXPECTED_TX_TYPE: u32 = 16;
    /// Pointer slots: each holds another field's slot index, for the VM's
    /// indirect-addressing functions.
    pub const PARTNER_ADDRESS_POINTER: u32 = 17;
    pub const MESSAGE_SENDER_POINTER: u32 = 18;
    pub const SECRET_HASH_POINTER: u32 = 19;
    /// Source location and length for hashing a message payload.
    pub const MESSAGE_PAYLOAD_POINTER: u32 = 20;
    pub const MESSAGE_PAYLOAD_LENGTH: u32 = 21;

    // Variables.

    /// Partner's trade address once the trade begins (4 words).
    pub const PARTNER_ADDRESS: u32 = 22;
    /// Refund deadline as a VM timestamp; zero while still in offer mode.
    pub const REFUND_TIMESTAMP: u32 = 26;
    /// VM timestamp of the last transaction processed.
    pub const LAST_TX_TIMESTAMP: u32 = 27;
    /// Current block's VM timestamp (per-iteration scratch).
    pub const BLOCK_TIMESTAMP: u32 = 28;
    /// Transaction-type scratch.
    pub const TX_TYPE: u32 = 29;
    /// Boolean/result scratch.
    pub const RESULT: u32 = 30;
    /// Sender-address scratch (4 words).
    pub const MESSAGE_SENDER: u32 = 31;
    /// Message-payload scratch (4 words).
    pub const MESSAGE_PAYLOAD: u32 = 35;

    pub const DATA_SEGMENT_WORDS: u32 = 39;
}

pub const DATA_SEGMENT_BYTES: usize = layout::DATA_SEGMENT_WORDS as usize * VALUE_SIZE;

/// Protocol parameters baked into a deployed trade contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TradeContractParams {
    pub creator_trade_address: [u8; 32],
    pub foreign_pubkey_hash: [u8; 20],
    pub secret_hash: [u8; 20],
    pub trade_timeout_minutes: u64,
    pub initial_payout: u64,
    pub redeem_payout: u64,
    pub expected_foreign_amount: u64,
}

/// Mode of a deployed contract, inferred by readers from whether the refund
/// timestamp has been set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, strum_macros::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeMode {
    Offer,
    Trade,
}

/// Structured view of a deployed contract's live state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TradeData {
    pub creator_trade_address: [u8; 32],
    pub foreign_pubkey_hash: [u8; 20],
    pub secret_hash: [u8; 20],
    pub trade_timeout_minutes: u64,
    pub initial_payout: u64,
    pub redeem_payout: u64,
    pub expected_foreign_amount: u64,
    pub mode: TradeMode,
    /// Set once the trade has begun.
    pub partner_trade_address: Option<[u8; 32]>,
    /// Raw VM refund deadline; zero in offer mode.
    pub refund_timestamp: u64,
    /// Native-chain height at which refund becomes possible, once trading.
    pub refund_height: Option<u32>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("contract data segment is truncated")]
pub struct StateDecodeError;

/// Compiles the trade contract for deployment.
///
/// Panics if the assembled code does not hash to [`CODE_BYTES_HASH`]; that
/// is a broken build, not a runtime condition.
pub fn compile_trade_contract(params: &TradeContractParams) -> Vec<u8> {
    let code = assemble(trade_program);

    let code_hash = hex::encode(Sha256::digest(&code));
    assert_eq!(
        code_hash, CODE_BYTES_HASH,
        "trade contract code hash mismatch: the generator is broken"
    );

    let data = build_data_segment(params);

    creation_bytes(CONTRACT_VERSION, &code, &data, 0, 0, 0)
}

fn trade_program(asm: &mut Assembler) {
    use layout::*;

    let offer_loop = asm.new_label();
    let offer_check = asm.new_label();
    let begin_trade = asm.new_label();
    let trade_mode = asm.new_label();
    let trade_loop = asm.new_label();
    let trade_check = asm.new_label();
    let secret_matched = asm.new_label();
    let refund = asm.new_label();

    // Scan for transactions from the contract's own creation onwards.
    asm.ext_fun_ret(function::GET_CREATION_TIMESTAMP, LAST_TX_TIMESTAMP);
    // Execution resumes below here on every subsequent block.
    asm.set_pcs();

    // A non-zero refund timestamp means the trade has already begun.
    asm.branch_if_zero(REFUND_TIMESTAMP, offer_loop);
    asm.jump(trade_mode);

    /* Offer phase */

    asm.define(offer_loop);
    asm.ext_fun_dat(function::PUT_TX_AFTER_TIMESTAMP_INTO_A, LAST_TX_TIMESTAMP);
    asm.ext_fun_ret(function::CHECK_A_IS_ZERO, RESULT);
    asm.branch_if_zero(RESULT, offer_check);
    asm.stop();

    asm.define(offer_check);
    asm.ext_fun_ret(function::GET_TIMESTAMP_FROM_TX_IN_A, LAST_TX_TIMESTAMP);
    asm.ext_fun_ret(function::GET_TYPE_FROM_TX_IN_A, TX_TYPE);
    asm.branch_if_not_equal(TX_TYPE, EXPECTED_TX_TYPE, offer_loop);

    // Only the creator chooses the partner.
    asm.ext_fun(function::PUT_ADDRESS_FROM_TX_IN_A_INTO_B);
    asm.ext_fun_dat(function::GET_B_IND, MESSAGE_SENDER_POINTER);
    for word in 0..4 {
        asm.branch_if_not_equal(MESSAGE_SENDER + word, CREATOR_ADDRESS + word, offer_loop);
    }

    // The message payload is the proposed partner address.
    asm.ext_fun(function::PUT_MESSAGE_FROM_TX_IN_A_INTO_B);
    asm.ext_fun_dat(function::GET_B_IND, PARTNER_ADDRESS_POINTER);

    // Creator naming themselves is the cancel signal.
    for word in 0..4 {
        asm.branch_if_not_equal(PARTNER_ADDRESS + word, CREATOR_ADDRESS + word, begin_trade);
    }
    asm.jump(refund);

    asm.define(begin_trade);
    // Deadline counts from the message that started the trade.
    asm.ext_fun_ret_dat_2(
        function::ADD_MINUTES_TO_TIMESTAMP,
        REFUND_TIMESTAMP,
        LAST_TX_TIMESTAMP,
        TRADE_TIMEOUT,
    );
    // Bootstrap the partner so they can afford to message us back.
    asm.ext_fun_dat(function::SET_B_IND, PARTNER_ADDRESS_POINTER);
    asm.ext_fun_dat(function::PAY_TO_ADDRESS_IN_B, INITIAL_PAYOUT);
    asm.stop();

    /* Trade phase */

    asm.define(trade_mode);
    asm.ext_fun_ret(function::GET_BLOCK_TIMESTAMP, BLOCK_TIMESTAMP);
    asm.branch_if_less_than(BLOCK_TIMESTAMP, REFUND_TIMESTAMP, trade_loop);
    asm.jump(refund);

    asm.define(trade_loop);
    asm.ext_fun_dat(function::PUT_TX_AFTER_TIMESTAMP_INTO_A, LAST_TX_TIMESTAMP);
    asm.ext_fun_ret(function::CHECK_A_IS_ZERO, RESULT);
    asm.branch_if_zero(RESULT, trade_check);
    asm.stop();

    asm.define(trade_check);
    asm.ext_fun_ret(function::GET_TIMESTAMP_FROM_TX_IN_A, LAST_TX_TIMESTAMP);
    asm.ext_fun_ret(function::GET_TYPE_FROM_TX_IN_A, TX_TYPE);
    asm.branch_if_not_equal(TX_TYPE, EXPECTED_TX_TYPE, trade_loop);

    // Only the chosen partner can redeem.
    asm.ext_fun(function::PUT_ADDRESS_FROM_TX_IN_A_INTO_B);
    asm.ext_fun_dat(function::GET_B_IND, MESSAGE_SENDER_POINTER);
    for word in 0..4 {
        asm.branch_if_not_equal(MESSAGE_SENDER + word, PARTNER_ADDRESS + word, trade_loop);
    }

    // Does the message payload hash to the agreed secret hash?
    asm.ext_fun(function::PUT_MESSAGE_FROM_TX_IN_A_INTO_B);
    asm.ext_fun_dat(function::GET_B_IND, MESSAGE_PAYLOAD_POINTER);
    asm.ext_fun_dat(function::SET_B_IND, SECRET_HASH_POINTER);
    asm.ext_fun_ret_dat_2(
        function::CHECK_HASH160_WITH_B,
        RESULT,
        MESSAGE_PAYLOAD_POINTER,
        MESSAGE_PAYLOAD_LENGTH,
    );
    asm.branch_if_not_zero(RESULT, secret_matched);
    asm.jump(trade_loop);

    // Pay the redeem payout, then fall through into refund: the remainder
    // always goes back to the creator in the same pass.
    asm.define(secret_matched);
    asm.ext_fun_dat(function::SET_B_IND, PARTNER_ADDRESS_POINTER);
    asm.ext_fun_dat(function::PAY_TO_ADDRESS_IN_B, REDEEM_PAYOUT);

    /* Refund */

    asm.define(refund);
    asm.ext_fun(function::PUT_CREATOR_INTO_B);
    asm.ext_fun(function::PAY_ALL_TO_ADDRESS_IN_B);
    asm.finish();
}

struct DataSegment {
    bytes: Vec<u8>,
}

impl DataSegment {
    fn new() -> Self {
        DataSegment {
            bytes: Vec::with_capacity(DATA_SEGMENT_BYTES),
        }
    }

    fn word_position(&self) -> u32 {
        (self.bytes.len() / VALUE_SIZE) as u32
    }

    fn put_word(&mut self, value: u64) {
        self.bytes.extend_from_slice(&value.to_be_bytes());
    }

    /// Writes up to 32 bytes into four words, zero-padded at the tail.
    fn put_hash(&mut self, hash: &[u8]) {
        let mut padded = [0u8; 32];
        padded[..hash.len()].copy_from_slice(hash);
        self.bytes.extend_from_slice(&padded);
    }
}

fn build_data_segment(params: &TradeContractParams) -> Vec<u8> {
    use layout::*;

    let mut segment = DataSegment::new();

    assert_eq!(segment.word_position(), CREATOR_ADDRESS);
    segment.put_hash(&params.creator_trade_address);

    assert_eq!(segment.word_position(), FOREIGN_PUBKEY_HASH);
    segment.put_hash(&params.foreign_pubkey_hash);

    assert_eq!(segment.word_position(), SECRET_HASH);
    segment.put_hash(&params.secret_hash);

    assert_eq!(segment.word_position(), TRADE_TIMEOUT);
    segment.put_word(params.trade_timeout_minutes);

    assert_eq!(segment.word_position(), INITIAL_PAYOUT);
    segment.put_word(params.initial_payout);

    assert_eq!(segment.word_position(), REDEEM_PAYOUT);
    segment.put_word(params.redeem_payout);

    assert_eq!(segment.word_position(), EXPECTED_FOREIGN_AMOUNT);
    segment.put_word(params.expected_foreign_amount);

    assert_eq!(segment.word_position(), EXPECTED_TX_TYPE);
    segment.put_word(MESSAGE_TX_TYPE);

    assert_eq!(segment.word_position(), PARTNER_ADDRESS_POINTER);
    segment.put_word(u64::from(PARTNER_ADDRESS));

    assert_eq!(segment.word_position(), MESSAGE_SENDER_POINTER);
    segment.put_word(u64::from(MESSAGE_SENDER));

    assert_eq!(segment.word_position(), SECRET_HASH_POINTER);
    segment.put_word(u64::from(SECRET_HASH));

    assert_eq!(segment.word_position(), MESSAGE_PAYLOAD_POINTER);
    segment.put_word(u64::from(MESSAGE_PAYLOAD));

    assert_eq!(segment.word_position(), MESSAGE_PAYLOAD_LENGTH);
    segment.put_word(32);

    // Variables start zeroed.
    while segment.word_position() < DATA_SEGMENT_WORDS {
        segment.put_word(0);
    }

    assert_eq!(segment.word_position(), DATA_SEGMENT_WORDS);
    segment.bytes
}

fn read_word(raw: &[u8], slot: u32) -> u64 {
    let offset = slot as usize * VALUE_SIZE;
    let mut word = [0u8; 8];
    word.copy_from_slice(&raw[offset..offset + 8]);
    u64::from_be_bytes(word)
}

fn read_bytes<const N: usize>(raw: &[u8], slot: u32) -> [u8; N] {
    let offset = slot as usize * VALUE_SIZE;
    let mut bytes = [0u8; N];
    bytes.copy_from_slice(&raw[offset..offset + N]);
    bytes
}

/// Decodes a deployed contract's exposed data segment into a [`TradeData`]
/// view. Pure; the same bytes always decode to the same view.
pub fn decode_state(raw: &[u8]) -> Result<TradeData, StateDecodeError> {
    use layout::*;

    if raw.len() < DATA_SEGMENT_BYTES {
        return Err(StateDecodeError);
    }

    let refund_timestamp = read_word(raw, REFUND_TIMESTAMP);

    let partner: [u8; 32] = read_bytes(raw, PARTNER_ADDRESS);
    let partner_trade_address = if partner.iter().any(|byte| *byte != 0) {
        Some(partner)
    } else {
        None
    };

    let mode = if refund_timestamp == 0 {
        TradeMode::Offer
    } else {
        TradeMode::Trade
    };

    let refund_height = match mode {
        TradeMode::Offer => None,
        TradeMode::Trade => Some(timestamp_block_height(refund_timestamp)),
    };

    Ok(TradeData {
        creator_trade_address: read_bytes(raw, CREATOR_ADDRESS),
        foreign_pubkey_hash: read_bytes(raw, FOREIGN_PUBKEY_HASH),
        secret_hash: read_bytes(raw, SECRET_HASH),
        trade_timeout_minutes: read_word(raw, TRADE_TIMEOUT),
        initial_payout: read_word(raw, INITIAL_PAYOUT),
        redeem_payout: read_word(raw, REDEEM_PAYOUT),
        expected_foreign_amount: read_word(raw, EXPECTED_FOREIGN_AMOUNT),
        mode,
        partner_trade_address,
        refund_timestamp,
        refund_height,
    })
}

/// Refund height a contract still in offer mode would get if the trade
/// began at `start_height`.
pub fn projected_refund_height(start_height: u32, trade_timeout_minutes: u64) -> u32 {
    start_height + (trade_timeout_minutes / NATIVE_BLOCK_MINUTES) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> TradeContractParams {
        TradeContractParams {
            creator_trade_address: [0x41; 32],
            foreign_pubkey_hash: [0x42; 20],
            secret_hash: [0x43; 20],
            trade_timeout_minutes: 10_080,
            initial_payout: 100_000,
            redeem_payout: 80_000_000,
            expected_foreign_amount: 50_000_000,
        }
    }

    #[test]
    fn compilation_is_deterministic_and_hash_checked() {
        let first = compile_trade_contract(&params());
        let second = compile_trade_contract(&params());
        assert_eq!(first, second);

        let code = assemble(trade_program);
        assert_eq!(hex::encode(Sha256::digest(&code)), CODE_BYTES_HASH);
    }

    #[test]
    fn creation_bytes_carry_version_and_data() {
        let creation = compile_trade_contract(&params());
        assert_eq!(&creation[0..2], &CONTRACT_VERSION.to_be_bytes());

        // Data segment sits at the tail, after its length word.
        let data = &creation[creation.len() - DATA_SEGMENT_BYTES..];
        assert_eq!(&data[..32], &[0x41; 32]);
    }

    #[test]
    fn fresh_state_decodes_as_offer() {
        let data = build_data_segment(&params());
        let trade = decode_state(&data).unwrap();

        assert_eq!(trade.mode, TradeMode::Offer);
        assert_eq!(trade.partner_trade_address, None);
        assert_eq!(trade.refund_height, None);
        assert_eq!(trade.creator_trade_address, [0x41; 32]);
        assert_eq!(trade.foreign_pubkey_hash, [0x42; 20]);
        assert_eq!(trade.secret_hash, [0x43; 20]);
        assert_eq!(trade.trade_timeout_minutes, 10_080);
        assert_eq!(trade.initial_payout, 100_000);
        assert_eq!(trade.redeem_payout, 80_000_000);
        assert_eq!(trade.expected_foreign_amount, 50_000_000);
    }

    #[test]
    fn traded_state_decodes_partner_and_refund_height() {
        let mut data = build_data_segment(&params());

        // Simulate the contract having accepted a partner...
        let partner_offset = layout::PARTNER_ADDRESS as usize * VALUE_SIZE;
        data[partner_offset..partner_offset + 32].copy_from_slice(&[0x77; 32]);

        // ...and computed a refund deadline at height 123456.
        let refund_timestamp = (123_456u64 << 32) | 2;
        let refund_offset = layout::REFUND_TIMESTAMP as usize * VALUE_SIZE;
        data[refund_offset..refund_offset + 8].copy_from_slice(&refund_timestamp.to_be_bytes());

        let trade = decode_state(&data).unwrap();
        assert_eq!(trade.mode, TradeMode::Trade);
        assert_eq!(trade.partner_trade_address, Some([0x77; 32]));
        assert_eq!(trade.refund_timestamp, refund_timestamp);
        assert_eq!(trade.refund_height, Some(123_456));
    }

    #[test]
    fn decode_is_idempotent() {
        let data = build_data_segment(&params());
        assert_eq!(decode_state(&data).unwrap(), decode_state(&data).unwrap());
    }

    #[test]
    fn truncated_state_is_rejected() {
        let data = build_data_segment(&params());
        assert_eq!(decode_state(&data[..64]), Err(StateDecodeError));
    }

    #[test]
    fn projected_refund_height_spans_the_timeout() {
        assert_eq!(projected_refund_height(1_000, 10_080), 11_080);
    }
}
