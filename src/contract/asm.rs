//! Two-pass assembler for the contract VM.
//!
//! Several branches in the trade contract jump *forward* to code whose final
//! byte offset is unknown until everything after it has been emitted, so the
//! same instruction sequence is emitted exactly twice: pass one records
//! where every label lands (branch targets are emitted as zero), pass two
//! re-emits with every label resolved. Straight-line code with only
//! intra-function jumps needs nothing more; no patch lists, no fixpoint.

use crate::contract::isa::opcode;

/// Symbolic code position, an index into the assembler's label table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Clone, Copy, PartialEq, Eq)]
enum Pass {
    /// Label positions are being recorded; unresolved targets emit as zero.
    Locate,
    /// All labels are known; emitting final bytes.
    Resolve,
}

pub struct Assembler {
    code: Vec<u8>,
    labels: Vec<Option<u32>>,
    next_label: usize,
    pass: Pass,
}

/// Runs `program` through both passes and returns the final code bytes.
///
/// The program closure must be deterministic; it is invoked twice and must
/// allocate and define labels in the same order both times. The assembler
/// asserts this: a label that lands on a different offset in pass two means
/// the generator itself is broken, which is fatal.
pub fn assemble(program: impl Fn(&mut Assembler)) -> Vec<u8> {
    let mut first = Assembler {
        code: Vec::new(),
        labels: Vec::new(),
        next_label: 0,
        pass: Pass::Locate,
    };
    program(&mut first);

    let mut second = Assembler {
        code: Vec::with_capacity(first.code.len()),
        labels: first.labels,
        next_label: 0,
        pass: Pass::Resolve,
    };
    program(&mut second);

    assert_eq!(
        first.code.len(),
        second.code.len(),
        "assembler passes emitted different code sizes"
    );

    second.code
}

impl Assembler {
    pub fn position(&self) -> u32 {
        self.code.len() as u32
    }

    pub fn new_label(&mut self) -> Label {
        let index = self.next_label;
        self.next_label += 1;
        if self.pass == Pass::Locate {
            self.labels.push(None);
        }
        Label(index)
    }

    /// Pins `label` to the current code position.
    pub fn define(&mut self, label: Label) {
        let position = self.position();
        match self.pass {
            Pass::Locate => self.labels[label.0] = Some(position),
            Pass::Resolve => assert_eq!(
                self.labels[label.0],
                Some(position),
                "label moved between assembler passes"
            ),
        }
    }

    /// Target position of `label`, or zero during the locating pass.
    fn target(&self, label: Label) -> u32 {
        match self.pass {
            Pass::Locate => self.labels[label.0].unwrap_or(0),
            Pass::Resolve => self.labels[label.0].expect("undefined label in resolve pass"),
        }
    }

    /// Signed byte offset from the branch instruction at `from` to `label`.
    fn branch_offset(&self, from: u32, label: Label) -> i8 {
        if self.pass == Pass::Locate && self.labels[label.0].is_none() {
            return 0;
        }

        let offset = i64::from(self.target(label)) - i64::from(from);
        assert!(
            (i64::from(i8::MIN)..=i64::from(i8::MAX)).contains(&offset),
            "branch target out of range ({}); use jump() via a skip branch",
            offset
        );
        offset as i8
    }

    fn put_u16(&mut self, value: u16) {
        self.code.extend_from_slice(&value.to_be_bytes());
    }

    fn put_u32(&mut self, value: u32) {
        self.code.extend_from_slice(&value.to_be_bytes());
    }

    fn put_u64(&mut self, value: u64) {
        self.code.extend_from_slice(&value.to_be_bytes());
    }

    pub fn set_val(&mut self, dest: u32, value: u64) {
        self.code.push(opcode::SET_VAL);
        self.put_u32(dest);
        self.put_u64(value);
    }

    pub fn set_dat(&mut self, dest: u32, src: u32) {
        self.code.push(opcode::SET_DAT);
        self.put_u32(dest);
        self.put_u32(src);
    }

    pub fn ext_fun(&mut self, function: u16) {
        self.code.push(opcode::EXT_FUN);
        self.put_u16(function);
    }

    pub fn ext_fun_dat(&mut self, function: u16, param: u32) {
        self.code.push(opcode::EXT_FUN_DAT);
        self.put_u16(function);
        self.put_u32(param);
    }

    pub fn ext_fun_ret(&mut self, function: u16, dest: u32) {
        self.code.push(opcode::EXT_FUN_RET);
        self.put_u16(function);
        self.put_u32(dest);
    }

    pub fn ext_fun_ret_dat_2(&mut self, function: u16, dest: u32, param1: u32, param2: u32) {
        self.code.push(opcode::EXT_FUN_RET_DAT_2);
        self.put_u16(function);
        self.put_u32(dest);
        self.put_u32(param1);
        self.put_u32(param2);
    }

    fn branch_one(&mut self, op: u8, addr: u32, label: Label) {
        let from = self.position();
        let offset = self.branch_offset(from, label);
        self.code.push(op);
        self.put_u32(addr);
        self.code.push(offset as u8);
    }

    fn branch_two(&mut self, op: u8, addr1: u32, addr2: u32, label: Label) {
        let from = self.position();
        let offset = self.branch_offset(from, label);
        self.code.push(op);
        self.put_u32(addr1);
        self.put_u32(addr2);
        self.code.push(offset as u8);
    }

    pub fn branch_if_zero(&mut self, addr: u32, label: Label) {
        self.branch_one(opcode::BZR_DAT, addr, label);
    }

    pub fn branch_if_not_zero(&mut self, addr: u32, label: Label) {
        self.branch_one(opcode::BNZ_DAT, addr, label);
    }

    pub fn branch_if_not_equal(&mut self, addr1: u32, addr2: u32, label: Label) {
        self.branch_two(opcode::BNE_DAT, addr1, addr2, label);
    }

    pub fn branch_if_less_than(&mut self, addr1: u32, addr2: u32, label: Label) {
        self.branch_two(opcode::BLT_DAT, addr1, addr2, label);
    }

    /// Unconditional absolute jump; the escape hatch for targets beyond a
    /// branch's signed-byte reach.
    pub fn jump(&mut self, label: Label) {
        let target = self.target(label);
        self.code.push(opcode::JMP_ADR);
        self.put_u32(target);
    }

    pub fn set_pcs(&mut self) {
        self.code.push(opcode::SET_PCS);
    }

    pub fn stop(&mut self) {
        self.code.push(opcode::STP_IMD);
    }

    pub fn finish(&mut self) {
        self.code.push(opcode::FIN_IMD);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_branch_resolves_in_second_pass() {
        let code = assemble(|asm| {
            let skip = asm.new_label();
            asm.branch_if_zero(7, skip);
            asm.stop();
            asm.define(skip);
            asm.finish();
        });

        // BZR(1 + 4 + 1) then STP then FIN; offset from the BZR opcode to
        // the FIN is 7 bytes.
        assert_eq!(code, vec![opcode::BZR_DAT, 0, 0, 0, 7, 7, opcode::STP_IMD, opcode::FIN_IMD]);
    }

    #[test]
    fn backward_branch_is_negative() {
        let code = assemble(|asm| {
            let top = asm.new_label();
            asm.define(top);
            asm.stop();
            asm.branch_if_not_zero(3, top);
        });

        assert_eq!(code[0], opcode::STP_IMD);
        assert_eq!(code[1], opcode::BNZ_DAT);
        assert_eq!(code[6] as i8, -1);
    }

    #[test]
    fn absolute_jump_targets_forward_code() {
        let code = assemble(|asm| {
            let far = asm.new_label();
            asm.jump(far);
            asm.stop();
            asm.define(far);
            asm.finish();
        });

        assert_eq!(code, vec![opcode::JMP_ADR, 0, 0, 0, 6, opcode::STP_IMD, opcode::FIN_IMD]);
    }

    #[test]
    fn assembly_is_deterministic() {
        let program = |asm: &mut Assembler| {
            let loop_top = asm.new_label();
            asm.define(loop_top);
            asm.ext_fun_ret(0x0301, 5);
            asm.branch_if_zero(5, loop_top);
            asm.finish();
        };

        assert_eq!(assemble(program), assemble(program));
    }

    #[test]
    #[should_panic(expected = "branch target out of range")]
    fn overlong_branch_is_fatal() {
        assemble(|asm| {
            let far = asm.new_label();
            asm.branch_if_zero(0, far);
            for _ in 0..40 {
                asm.ext_fun_ret(0x0301, 1);
            }
            asm.define(far);
        });
    }
}
