//! Instruction-set constants for the native chain's contract VM.
//!
//! The VM itself is external; this module only pins down the byte encodings
//! the compiler must emit. All multi-byte fields are big-endian. Code
//! addresses are byte offsets; data addresses are 8-byte-word slot indices.
//!
//! Instruction encodings:
//!
//! ```text
//! SET_VAL            opcode u8, dest u32, value u64
//! SET_DAT            opcode u8, dest u32, src u32
//! JMP_ADR            opcode u8, code address u32
//! BZR/BNZ            opcode u8, addr u32, offset i8
//! BGT/BLT/BGE/BLE/BEQ/BNE  opcode u8, addr1 u32, addr2 u32, offset i8
//! SET_PCS, STP_IMD, FIN_IMD  opcode u8
//! EXT_FUN            opcode u8, function u16
//! EXT_FUN_DAT        opcode u8, function u16, param u32
//! EXT_FUN_DAT_2      opcode u8, function u16, param1 u32, param2 u32
//! EXT_FUN_RET        opcode u8, function u16, dest u32
//! EXT_FUN_RET_DAT_2  opcode u8, function u16, dest u32, param1 u32, param2 u32
//! ```
//!
//! Branch offsets are signed bytes relative to the branch opcode itself;
//! anything further away has to go through `JMP_ADR`.

/// One data-segment slot is a 64-bit machine word.
pub const VALUE_SIZE: usize = 8;

/// Code/data sizes are allocated to the VM in pages of this many bytes.
pub const PAGE_SIZE: usize = 256;

pub mod opcode {
    pub const SET_VAL: u8 = 0x01;
    pub const SET_DAT: u8 = 0x02;
    pub const CLR_DAT: u8 = 0x03;
    pub const ADD_DAT: u8 = 0x06;
    pub const SUB_DAT: u8 = 0x07;
    pub const JMP_ADR: u8 = 0x1a;
    pub const BZR_DAT: u8 = 0x1b;
    pub const BNZ_DAT: u8 = 0x1e;
    pub const BGT_DAT: u8 = 0x1f;
    pub const BLT_DAT: u8 = 0x20;
    pub const BGE_DAT: u8 = 0x21;
    pub const BLE_DAT: u8 = 0x22;
    pub const BEQ_DAT: u8 = 0x23;
    pub const BNE_DAT: u8 = 0x24;
    pub const FIN_IMD: u8 = 0x28;
    pub const STP_IMD: u8 = 0x29;
    pub const SET_PCS: u8 = 0x30;
    pub const EXT_FUN: u8 = 0x32;
    pub const EXT_FUN_DAT: u8 = 0x33;
    pub const EXT_FUN_DAT_2: u8 = 0x34;
    pub const EXT_FUN_RET: u8 = 0x35;
    pub const EXT_FUN_RET_DAT: u8 = 0x36;
    pub const EXT_FUN_RET_DAT_2: u8 = 0x37;
}

pub mod function {
    /// Current block's VM timestamp → dest.
    pub const GET_BLOCK_TIMESTAMP: u16 = 0x0301;
    /// Contract creation VM timestamp → dest.
    pub const GET_CREATION_TIMESTAMP: u16 = 0x0302;
    /// Loads A with the next transaction to this contract after the VM
    /// timestamp in the param slot (A is zeroed if there is none).
    pub const PUT_TX_AFTER_TIMESTAMP_INTO_A: u16 = 0x0305;
    /// Transaction type of the transaction in A → dest.
    pub const GET_TYPE_FROM_TX_IN_A: u16 = 0x0306;
    /// VM timestamp of the transaction in A → dest.
    pub const GET_TIMESTAMP_FROM_TX_IN_A: u16 = 0x0308;
    /// Message payload of the transaction in A → B.
    pub const PUT_MESSAGE_FROM_TX_IN_A_INTO_B: u16 = 0x030a;
    /// Sender address of the transaction in A → B.
    pub const PUT_ADDRESS_FROM_TX_IN_A_INTO_B: u16 = 0x030b;
    /// Contract creator's address → B.
    pub const PUT_CREATOR_INTO_B: u16 = 0x030c;
    /// 1 → dest if A is all-zero, else 0.
    pub const CHECK_A_IS_ZERO: u16 = 0x0125;
    /// Pays the amount in the param slot to the address in B.
    pub const PAY_TO_ADDRESS_IN_B: u16 = 0x0402;
    /// Pays the contract's entire remaining balance to the address in B.
    pub const PAY_ALL_TO_ADDRESS_IN_B: u16 = 0x0403;
    /// dest ← VM timestamp in param1 advanced by the minutes in param2.
    pub const ADD_MINUTES_TO_TIMESTAMP: u16 = 0x0406;

    // Platform extensions (0x0500-0x06ff).

    /// B ← the four data words starting at the slot index held in the param
    /// slot (pointer indirection).
    pub const SET_B_IND: u16 = 0x0510;
    /// The four data words starting at the slot index held in the param
    /// slot ← B.
    pub const GET_B_IND: u16 = 0x0511;
    /// 1 → dest if HASH160 over the data bytes described by the (index,
    /// length) param slots equals B, else 0.
    pub const CHECK_HASH160_WITH_B: u16 = 0x0512;
}

/// VM timestamps pack a block height in the upper half and an intra-block
/// sequence number in the lower half.
pub fn timestamp_block_height(vm_timestamp: u64) -> u32 {
    (vm_timestamp >> 32) as u32
}

/// Wraps assembled code and the initial data segment into the deployment
/// ("creation bytes") format consumed by the VM:
///
/// ```text
/// version u16, reserved u16,
/// code pages u16, data pages u16, call-stack pages u16, user-stack pages u16,
/// minimum activation amount u64,
/// code length u32, code bytes,
/// data length u32, data bytes
/// ```
pub fn creation_bytes(
    version: u16,
    code: &[u8],
    data: &[u8],
    call_stack_pages: u16,
    user_stack_pages: u16,
    min_activation_amount: u64,
) -> Vec<u8> {
    let code_pages = code.len().div_ceil(PAGE_SIZE) as u16;
    let data_pages = data.len().div_ceil(PAGE_SIZE) as u16;

    let mut bytes = Vec::with_capacity(24 + code.len() + data.len());
    bytes.extend_from_slice(&version.to_be_bytes());
    bytes.extend_from_slice(&0u16.to_be_bytes());
    bytes.extend_from_slice(&code_pages.to_be_bytes());
    bytes.extend_from_slice(&data_pages.to_be_bytes());
    bytes.extend_from_slice(&call_stack_pages.to_be_bytes());
    bytes.extend_from_slice(&user_stack_pages.to_be_bytes());
    bytes.extend_from_slice(&min_activation_amount.to_be_bytes());
    bytes.extend_from_slice(&(code.len() as u32).to_be_bytes());
    bytes.extend_from_slice(code);
    bytes.extend_from_slice(&(data.len() as u32).to_be_bytes());
    bytes.extend_from_slice(data);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creation_bytes_layout() {
        let code = vec![0x30, 0x28];
        let data = vec![0u8; 16];
        let bytes = creation_bytes(2, &code, &data, 0, 0, 0);

        assert_eq!(&bytes[0..2], &[0x00, 0x02]); // version
        assert_eq!(&bytes[4..6], &[0x00, 0x01]); // one code page
        assert_eq!(&bytes[6..8], &[0x00, 0x01]); // one data page
        assert_eq!(&bytes[12..20], &[0u8; 8]); // min activation amount
        assert_eq!(&bytes[20..24], &2u32.to_be_bytes());
        assert_eq!(&bytes[24..26], &code[..]);
        assert_eq!(&bytes[26..30], &16u32.to_be_bytes());
        assert_eq!(bytes.len(), 24 + 2 + 16);
    }

    #[test]
    fn timestamps_carry_block_heights() {
        let vm_timestamp = (1234u64 << 32) | 7;
        assert_eq!(timestamp_block_height(vm_timestamp), 1234);
    }
}
