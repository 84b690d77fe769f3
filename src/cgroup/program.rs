//! Generation of `BPF_PROG_TYPE_CGROUP_DEVICE` instructions.
//!
//! The kernel hands device programs a `struct bpf_cgroup_dev_ctx`:
//!
//! ```text
//! u32 access_type   (access << 16) | type
//! u32 major
//! u32 minor
//! ```
//!
//! Rules are emitted as self-contained blocks that return on a match and fall
//! through otherwise. They never clobber `r1`, so they can be placed in front of an
//! existing program which then sees an untouched context.
use rbpf::insn_builder::{Arch as RbpfArch, *};

use crate::device::DeviceType;

use super::{DeviceAccess, DeviceRule};

pub const BPF_DEVCG_ACC_MKNOD: u32 = 1;
pub const BPF_DEVCG_ACC_READ: u32 = 2;
pub const BPF_DEVCG_ACC_WRITE: u32 = 4;
pub const BPF_DEVCG_DEV_BLOCK: u32 = 1;
pub const BPF_DEVCG_DEV_CHAR: u32 = 2;

/// Size in bytes of one `struct bpf_insn`.
pub const INSN_SIZE: usize = 8;

#[derive(thiserror::Error, Debug)]
pub enum ProgramError {
    #[error("device number {0} does not fit into a bpf immediate")]
    ImmediateOutOfRange(u32),
    #[error("program of {0} bytes is not a whole number of instructions")]
    TruncatedProgram(usize),
}

/// Rule blocks meant to be prepended to an attached device program.
pub struct RulePrelude {
    code: BpfCode,
}

impl RulePrelude {
    pub fn from_rules(rules: &[DeviceRule]) -> Result<Self, ProgramError> {
        let mut prelude = RulePrelude {
            code: BpfCode::new(),
        };
        for rule in rules {
            prelude.add_rule(rule)?;
        }
        Ok(prelude)
    }

    pub fn bytecodes(&self) -> &[u8] {
        self.code.into_bytes()
    }

    /// Returns the prelude followed by `program`.
    pub fn prepend_to(&self, program: &[u8]) -> Result<Vec<u8>, ProgramError> {
        if program.len() % INSN_SIZE != 0 {
            return Err(ProgramError::TruncatedProgram(program.len()));
        }
        let prelude = self.bytecodes();
        let mut out = Vec::with_capacity(prelude.len() + program.len());
        out.extend_from_slice(prelude);
        out.extend_from_slice(program);
        Ok(out)
    }

    // R2 <- type   (lower 16 bit of access_type at R1[0])
    // R3 <- access (upper 16 bit of access_type at R1[0])
    // R4 <- major  (R1[4])
    // R5 <- minor  (R1[8])
    // R6 <- scratch
    fn add_rule(&mut self, rule: &DeviceRule) -> Result<(), ProgramError> {
        let major = immediate(rule.major)?;
        let minor = immediate(rule.minor)?;
        let has_access = !rule.access.is_all();

        let len: i16 = 9 + if has_access { 5 } else { 0 };
        // offset of a jump at `pos` to the first instruction after this block
        let skip = |pos: i16| len - pos - 1;

        self.code
            .load_x(MemSize::Word)
            .set_src(1)
            .set_off(0)
            .set_dst(2)
            .push();
        self.code
            .bit_and(Source::Imm, RbpfArch::X32)
            .set_dst(2)
            .set_imm(0xFFFF)
            .push();
        self.code
            .jump_conditional(Cond::NotEquals, Source::Imm)
            .set_dst(2)
            .set_imm(bpf_dev_type(rule.kind) as i32)
            .set_off(skip(2))
            .push();

        let mut pos = 3;
        if has_access {
            self.code
                .load_x(MemSize::Word)
                .set_src(1)
                .set_off(0)
                .set_dst(3)
                .push();
            self.code
                .right_shift(Source::Imm, RbpfArch::X32)
                .set_dst(3)
                .set_imm(16)
                .push();
            self.code
                .mov(Source::Reg, RbpfArch::X32)
                .set_dst(6)
                .set_src(3)
                .push();
            self.code
                .bit_and(Source::Imm, RbpfArch::X32)
                .set_dst(6)
                .set_imm(bpf_access(&rule.access) as i32)
                .push();
            // requested access must be a subset of the granted one
            self.code
                .jump_conditional(Cond::NotEquals, Source::Reg)
                .set_dst(6)
                .set_src(3)
                .set_off(skip(pos + 4))
                .push();
            pos += 5;
        }

        self.code
            .load_x(MemSize::Word)
            .set_src(1)
            .set_off(4)
            .set_dst(4)
            .push();
        self.code
            .jump_conditional(Cond::NotEquals, Source::Imm)
            .set_dst(4)
            .set_imm(major)
            .set_off(skip(pos + 1))
            .push();
        self.code
            .load_x(MemSize::Word)
            .set_src(1)
            .set_off(8)
            .set_dst(5)
            .push();
        self.code
            .jump_conditional(Cond::NotEquals, Source::Imm)
            .set_dst(5)
            .set_imm(minor)
            .set_off(skip(pos + 3))
            .push();

        self.code
            .mov(Source::Imm, RbpfArch::X32)
            .set_dst(0)
            .set_imm(rule.allow as i32)
            .push();
        self.code.exit().push();

        Ok(())
    }
}

fn immediate(value: u32) -> Result<i32, ProgramError> {
    i32::try_from(value).map_err(|_| ProgramError::ImmediateOutOfRange(value))
}

fn bpf_dev_type(kind: DeviceType) -> u32 {
    match kind {
        DeviceType::Block => BPF_DEVCG_DEV_BLOCK,
        DeviceType::Character => BPF_DEVCG_DEV_CHAR,
    }
}

fn bpf_access(access: &DeviceAccess) -> u32 {
    let mut v = 0;
    if access.read {
        v |= BPF_DEVCG_ACC_READ;
    }
    if access.write {
        v |= BPF_DEVCG_ACC_WRITE;
    }
    if access.mknod {
        v |= BPF_DEVCG_ACC_MKNOD;
    }
    v
}
