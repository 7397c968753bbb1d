//! Per-cycle execution recording for interactive inspection tools.
//!
//! The interpreter is generic over [`ShaderTracer`] so the fast path pays
//! nothing: [`NullTracer`]'s empty methods compile away, while [`DebugData`]
//! appends one [`DebugDataRecord`] per executed instruction.

use bitflags::bitflags;

use crate::setup::MAX_PROGRAM_CODE_LENGTH;
use crate::state::Attribute;

bitflags! {
    /// Which fields of a [`DebugDataRecord`] were written for an instruction.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RecordMask: u32 {
        const SRC1 = 1 << 0;
        const SRC2 = 1 << 1;
        const SRC3 = 1 << 2;
        const DEST_IN = 1 << 3;
        const DEST_OUT = 1 << 4;
        const ADDR_REG_OUT = 1 << 5;
        const CMP_RESULT = 1 << 6;
        const COND_BOOL_IN = 1 << 7;
        const COND_CMP_IN = 1 << 8;
        const LOOP_INT_IN = 1 << 9;
        const NEXT_INSTR = 1 << 10;
    }
}

/// Snapshot of one executed instruction's data flow.
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugDataRecord {
    pub mask: RecordMask,
    /// Word offset of the executed instruction.
    pub instruction_offset: u32,
    /// Word offset of its successor.
    pub next_instruction: u32,
    pub src1: Attribute,
    pub src2: Attribute,
    pub src3: Attribute,
    pub dest_in: Attribute,
    pub dest_out: Attribute,
    pub address_registers: [i32; 3],
    pub cmp_result: [bool; 2],
    pub cond_bool: bool,
    pub cond_cmp: [bool; 2],
    pub loop_int: [u8; 4],
}

/// Recording capability the interpreter is parameterized over. Every method
/// defaults to a no-op.
pub trait ShaderTracer {
    fn begin(&mut self, _offset: u32) {}
    fn src1(&mut self, _value: Attribute) {}
    fn src2(&mut self, _value: Attribute) {}
    fn src3(&mut self, _value: Attribute) {}
    fn dest_in(&mut self, _value: Attribute) {}
    fn dest_out(&mut self, _value: Attribute) {}
    fn addr_reg_out(&mut self, _regs: [i32; 3]) {}
    fn cmp_result(&mut self, _flags: [bool; 2]) {}
    fn cond_bool_in(&mut self, _value: bool) {}
    fn cond_cmp_in(&mut self, _flags: [bool; 2]) {}
    fn loop_int_in(&mut self, _value: [u8; 4]) {}
    fn next_instr(&mut self, _offset: u32) {}
}

/// The fast path: records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTracer;

impl ShaderTracer for NullTracer {}

/// Append-only record sequence, one entry per executed instruction, capped
/// at the program store size.
#[derive(Debug, Default)]
pub struct DebugData {
    records: Vec<DebugDataRecord>,
    active: bool,
}

impl DebugData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[DebugDataRecord] {
        &self.records
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.active = false;
    }

    fn with_current(&mut self, f: impl FnOnce(&mut DebugDataRecord)) {
        if self.active {
            f(self.records.last_mut().expect("active record"));
        }
    }
}

impl ShaderTracer for DebugData {
    fn begin(&mut self, offset: u32) {
        if self.records.len() >= MAX_PROGRAM_CODE_LENGTH {
            self.active = false;
            return;
        }
        self.records.push(DebugDataRecord {
            instruction_offset: offset,
            ..Default::default()
        });
        self.active = true;
    }

    fn src1(&mut self, value: Attribute) {
        self.with_current(|r| {
            r.src1 = value;
            r.mask |= RecordMask::SRC1;
        });
    }

    fn src2(&mut self, value: Attribute) {
        self.with_current(|r| {
            r.src2 = value;
            r.mask |= RecordMask::SRC2;
        });
    }

    fn src3(&mut self, value: Attribute) {
        self.with_current(|r| {
            r.src3 = value;
            r.mask |= RecordMask::SRC3;
        });
    }

    fn dest_in(&mut self, value: Attribute) {
        self.with_current(|r| {
            r.dest_in = value;
            r.mask |= RecordMask::DEST_IN;
        });
    }

    fn dest_out(&mut self, value: Attribute) {
        self.with_current(|r| {
            r.dest_out = value;
            r.mask |= RecordMask::DEST_OUT;
        });
    }

    fn addr_reg_out(&mut self, regs: [i32; 3]) {
        self.with_current(|r| {
            r.address_registers = regs;
            r.mask |= RecordMask::ADDR_REG_OUT;
        });
    }

    fn cmp_result(&mut self, flags: [bool; 2]) {
        self.with_current(|r| {
            r.cmp_result = flags;
            r.mask |= RecordMask::CMP_RESULT;
        });
    }

    fn cond_bool_in(&mut self, value: bool) {
        self.with_current(|r| {
            r.cond_bool = value;
            r.mask |= RecordMask::COND_BOOL_IN;
        });
    }

    fn cond_cmp_in(&mut self, flags: [bool; 2]) {
        self.with_current(|r| {
            r.cond_cmp = flags;
            r.mask |= RecordMask::COND_CMP_IN;
        });
    }

    fn loop_int_in(&mut self, value: [u8; 4]) {
        self.with_current(|r| {
            r.loop_int = value;
            r.mask |= RecordMask::LOOP_INT_IN;
        });
    }

    fn next_instr(&mut self, offset: u32) {
        self.with_current(|r| {
            r.next_instruction = offset;
            r.mask |= RecordMask::NEXT_INSTR;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pica_types::Float24;

    #[test]
    fn records_accumulate_fields_and_mask() {
        let mut data = DebugData::new();
        data.begin(4);
        data.src1([Float24::from_f32(1.0); 4]);
        data.next_instr(5);
        data.begin(5);
        data.cmp_result([true, false]);

        let records = data.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].instruction_offset, 4);
        assert_eq!(records[0].mask, RecordMask::SRC1 | RecordMask::NEXT_INSTR);
        assert_eq!(records[0].next_instruction, 5);
        assert_eq!(records[1].mask, RecordMask::CMP_RESULT);
        assert_eq!(records[1].cmp_result, [true, false]);
    }

    #[test]
    fn recording_stops_at_the_program_length_cap() {
        let mut data = DebugData::new();
        for i in 0..(MAX_PROGRAM_CODE_LENGTH as u32 + 10) {
            data.begin(i);
            data.next_instr(i + 1);
        }
        assert_eq!(data.records().len(), MAX_PROGRAM_CODE_LENGTH);
        // The overflow writes must not touch the last stored record.
        let last = data.records().last().unwrap();
        assert_eq!(last.instruction_offset, MAX_PROGRAM_CODE_LENGTH as u32 - 1);
    }

    #[test]
    fn clear_resets_the_sequence() {
        let mut data = DebugData::new();
        data.begin(0);
        data.clear();
        assert!(data.records().is_empty());
        data.src1([Float24::zero(); 4]);
        assert!(data.records().is_empty());
    }
}
