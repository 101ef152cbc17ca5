//! Native-chain trade contract compiler.
//!
//! Generates the bytecode deployed on the native chain to mirror the foreign
//! HTLC's redeem/refund logic, and decodes a deployed contract's live data
//! segment back into a structured trade view. The executing VM is external;
//! only the compiler targeting it lives here.

pub mod asm;
pub mod isa;
pub mod trade;

pub use self::trade::{
    compile_trade_contract, decode_state, StateDecodeError, TradeContractParams, TradeData,
    TradeMode,
};
