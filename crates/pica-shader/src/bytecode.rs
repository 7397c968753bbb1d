//! Raw PICA200 shader instruction and swizzle-word decoding.
//!
//! Instructions are 32-bit words with the opcode in bits 26..32. Operand
//! swizzles live in a separate table of 32-bit descriptor words referenced by
//! each instruction's `operand_desc_id`.

use std::fmt;

use bitflags::bitflags;

/// A decoded 6-bit opcode. `MAD`/`MADI` and `CMP` span several raw encodings
/// because their formats steal low opcode bits for operand fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Add,
    Dp3,
    Dp4,
    Dph,
    Dst,
    Ex2,
    Lg2,
    Lit,
    Mul,
    Sge,
    Slt,
    Flr,
    Max,
    Min,
    Rcp,
    Rsq,
    Mova,
    Mov,
    Dphi,
    Dsti,
    Sgei,
    Slti,
    Nop,
    End,
    Breakc,
    Call,
    Callc,
    Callu,
    Ifu,
    Ifc,
    Loop,
    Emit,
    Setemit,
    Jmpc,
    Jmpu,
    Cmp,
    Madi,
    Mad,
    Unknown(u8),
}

/// Broad execution class used by both the interpreter and the disassembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpType {
    Trivial,
    Arithmetic,
    MultiplyAdd,
    Conditional,
    UniformFlowControl,
    SetEmit,
    Unknown,
}

bitflags! {
    /// Operand/format traits of an opcode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpFlags: u32 {
        const DEST              = 1 << 0;
        const SRC1              = 1 << 1;
        const SRC2              = 1 << 2;
        const SRC3              = 1 << 3;
        /// Wide/narrow source fields are swapped and relative addressing
        /// moves to the other eligible operand.
        const SRC_INVERTED      = 1 << 4;
        /// Writes the address registers instead of a vector destination.
        const MOVA              = 1 << 5;
        /// Evaluates the two condition-code flags.
        const HAS_CONDITION     = 1 << 6;
        /// Reads a boolean (or, for LOOP, integer) uniform.
        const HAS_UNIFORM_INDEX = 1 << 7;
        const HAS_EXPLICIT_DEST = 1 << 8;
        /// Branch with an implicit else-path (IF*).
        const HAS_ALTERNATIVE   = 1 << 9;
        /// Runs until `dest_offset + num_instructions` (CALL*/IF*).
        const HAS_FINISH_POINT  = 1 << 10;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OpInfo {
    pub name: &'static str,
    pub ty: OpType,
    pub flags: OpFlags,
}

impl OpCode {
    pub fn from_raw(raw: u8) -> Self {
        match raw & 0x3f {
            0x00 => Self::Add,
            0x01 => Self::Dp3,
            0x02 => Self::Dp4,
            0x03 => Self::Dph,
            0x04 => Self::Dst,
            0x05 => Self::Ex2,
            0x06 => Self::Lg2,
            0x07 => Self::Lit,
            0x08 => Self::Mul,
            0x09 => Self::Sge,
            0x0a => Self::Slt,
            0x0b => Self::Flr,
            0x0c => Self::Max,
            0x0d => Self::Min,
            0x0e => Self::Rcp,
            0x0f => Self::Rsq,
            0x12 => Self::Mova,
            0x13 => Self::Mov,
            0x18 => Self::Dphi,
            0x19 => Self::Dsti,
            0x1a => Self::Sgei,
            0x1b => Self::Slti,
            0x21 => Self::Nop,
            0x22 => Self::End,
            0x23 => Self::Breakc,
            0x24 => Self::Call,
            0x25 => Self::Callc,
            0x26 => Self::Callu,
            0x27 => Self::Ifu,
            0x28 => Self::Ifc,
            0x29 => Self::Loop,
            0x2a => Self::Emit,
            0x2b => Self::Setemit,
            0x2c => Self::Jmpc,
            0x2d => Self::Jmpu,
            0x2e | 0x2f => Self::Cmp,
            0x30..=0x37 => Self::Madi,
            0x38..=0x3f => Self::Mad,
            other => Self::Unknown(other),
        }
    }

    pub fn info(self) -> OpInfo {
        use OpFlags as F;
        let (name, ty, flags) = match self {
            Self::Add => ("add", OpType::Arithmetic, F::DEST | F::SRC1 | F::SRC2),
            Self::Dp3 => ("dp3", OpType::Arithmetic, F::DEST | F::SRC1 | F::SRC2),
            Self::Dp4 => ("dp4", OpType::Arithmetic, F::DEST | F::SRC1 | F::SRC2),
            Self::Dph => ("dph", OpType::Arithmetic, F::DEST | F::SRC1 | F::SRC2),
            Self::Dst => ("dst", OpType::Arithmetic, F::DEST | F::SRC1 | F::SRC2),
            Self::Ex2 => ("ex2", OpType::Arithmetic, F::DEST | F::SRC1),
            Self::Lg2 => ("lg2", OpType::Arithmetic, F::DEST | F::SRC1),
            Self::Lit => ("lit", OpType::Unknown, F::empty()),
            Self::Mul => ("mul", OpType::Arithmetic, F::DEST | F::SRC1 | F::SRC2),
            Self::Sge => ("sge", OpType::Arithmetic, F::DEST | F::SRC1 | F::SRC2),
            Self::Slt => ("slt", OpType::Arithmetic, F::DEST | F::SRC1 | F::SRC2),
            Self::Flr => ("flr", OpType::Arithmetic, F::DEST | F::SRC1),
            Self::Max => ("max", OpType::Arithmetic, F::DEST | F::SRC1 | F::SRC2),
            Self::Min => ("min", OpType::Arithmetic, F::DEST | F::SRC1 | F::SRC2),
            Self::Rcp => ("rcp", OpType::Arithmetic, F::DEST | F::SRC1),
            Self::Rsq => ("rsq", OpType::Arithmetic, F::DEST | F::SRC1),
            Self::Mova => ("mova", OpType::Arithmetic, F::MOVA | F::SRC1),
            Self::Mov => ("mov", OpType::Arithmetic, F::DEST | F::SRC1),
            Self::Dphi => {
                ("dphi", OpType::Arithmetic, F::DEST | F::SRC1 | F::SRC2 | F::SRC_INVERTED)
            }
            Self::Dsti => {
                ("dsti", OpType::Arithmetic, F::DEST | F::SRC1 | F::SRC2 | F::SRC_INVERTED)
            }
            Self::Sgei => {
                ("sgei", OpType::Arithmetic, F::DEST | F::SRC1 | F::SRC2 | F::SRC_INVERTED)
            }
            Self::Slti => {
                ("slti", OpType::Arithmetic, F::DEST | F::SRC1 | F::SRC2 | F::SRC_INVERTED)
            }
            Self::Nop => ("nop", OpType::Trivial, F::empty()),
            Self::End => ("end", OpType::Trivial, F::empty()),
            Self::Breakc => ("breakc", OpType::Conditional, F::HAS_CONDITION),
            Self::Call => {
                ("call", OpType::Conditional, F::HAS_EXPLICIT_DEST | F::HAS_FINISH_POINT)
            }
            Self::Callc => (
                "callc",
                OpType::Conditional,
                F::HAS_CONDITION | F::HAS_EXPLICIT_DEST | F::HAS_FINISH_POINT,
            ),
            Self::Callu => (
                "callu",
                OpType::UniformFlowControl,
                F::HAS_UNIFORM_INDEX | F::HAS_EXPLICIT_DEST | F::HAS_FINISH_POINT,
            ),
            Self::Ifu => (
                "ifu",
                OpType::UniformFlowControl,
                F::HAS_UNIFORM_INDEX | F::HAS_ALTERNATIVE | F::HAS_FINISH_POINT,
            ),
            Self::Ifc => (
                "ifc",
                OpType::Conditional,
                F::HAS_CONDITION | F::HAS_ALTERNATIVE | F::HAS_FINISH_POINT,
            ),
            Self::Loop => ("loop", OpType::UniformFlowControl, F::HAS_UNIFORM_INDEX),
            Self::Emit => ("emit", OpType::Trivial, F::empty()),
            Self::Setemit => ("setemit", OpType::SetEmit, F::empty()),
            Self::Jmpc => ("jmpc", OpType::Conditional, F::HAS_CONDITION | F::HAS_EXPLICIT_DEST),
            Self::Jmpu => {
                ("jmpu", OpType::Conditional, F::HAS_UNIFORM_INDEX | F::HAS_EXPLICIT_DEST)
            }
            Self::Cmp => ("cmp", OpType::Arithmetic, F::SRC1 | F::SRC2),
            Self::Madi => {
                ("madi", OpType::MultiplyAdd, F::DEST | F::SRC1 | F::SRC2 | F::SRC3 | F::SRC_INVERTED)
            }
            Self::Mad => ("mad", OpType::MultiplyAdd, F::DEST | F::SRC1 | F::SRC2 | F::SRC3),
            Self::Unknown(_) => ("???", OpType::Unknown, F::empty()),
        };
        OpInfo { name, ty, flags }
    }
}

/// A source operand in the unified register index space: `0x00..0x10` input,
/// `0x10..0x20` temporary, `0x20..0x80` float uniform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRegister {
    Input(u32),
    Temporary(u32),
    FloatUniform(u32),
}

impl SourceRegister {
    pub fn from_unified(index: u32) -> Self {
        match index & 0x7f {
            i @ 0x00..=0x0f => Self::Input(i),
            i @ 0x10..=0x1f => Self::Temporary(i - 0x10),
            i => Self::FloatUniform(i - 0x20),
        }
    }

    /// Resolves a unified index after relative addressing. Indices pushed out
    /// of the register file map to `None` (the hardware reads zeros there).
    pub fn resolve_unified(index: i32) -> Option<Self> {
        match index {
            0x00..=0x7f => Some(Self::from_unified(index as u32)),
            _ => None,
        }
    }

    pub fn unified(self) -> u32 {
        match self {
            Self::Input(i) => i,
            Self::Temporary(i) => 0x10 + i,
            Self::FloatUniform(i) => 0x20 + i,
        }
    }
}

impl fmt::Display for SourceRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input(i) => write!(f, "v{i}"),
            Self::Temporary(i) => write!(f, "r{i}"),
            Self::FloatUniform(i) => write!(f, "c{i}"),
        }
    }
}

/// A destination register: `0x00..0x10` output, `0x10..0x20` temporary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestRegister {
    Output(u32),
    Temporary(u32),
}

impl DestRegister {
    pub fn from_raw(raw: u32) -> Self {
        match raw & 0x1f {
            i @ 0x00..=0x0f => Self::Output(i),
            i => Self::Temporary(i - 0x10),
        }
    }
}

impl fmt::Display for DestRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Output(i) => write!(f, "o{i}"),
            Self::Temporary(i) => write!(f, "r{i}"),
        }
    }
}

/// Index into `UnitState::address_registers`; 0 means no relative addressing.
pub const ADDR_REG_NONE: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommonFormat {
    pub operand_desc_id: u32,
    pub src1: SourceRegister,
    pub src2: SourceRegister,
    pub address_register_index: u32,
    pub dest: DestRegister,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MadFormat {
    pub operand_desc_id: u32,
    pub src1: SourceRegister,
    pub src2: SourceRegister,
    pub src3: SourceRegister,
    pub address_register_index: u32,
    pub dest: DestRegister,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    LessThan,
    LessEqualThan,
    GreaterThan,
    GreaterEqualThan,
    Unknown(u32),
}

impl CompareOp {
    pub fn from_raw(raw: u32) -> Self {
        match raw & 7 {
            0 => Self::Equal,
            1 => Self::NotEqual,
            2 => Self::LessThan,
            3 => Self::LessEqualThan,
            4 => Self::GreaterThan,
            5 => Self::GreaterEqualThan,
            other => Self::Unknown(other),
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::LessThan => "<",
            Self::LessEqualThan => "<=",
            Self::GreaterThan => ">",
            Self::GreaterEqualThan => ">=",
            Self::Unknown(_) => "??",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompareFormat {
    pub operand_desc_id: u32,
    pub src1: SourceRegister,
    pub src2: SourceRegister,
    pub address_register_index: u32,
    pub op_x: CompareOp,
    pub op_y: CompareOp,
}

/// How a flow-control instruction combines the two condition-code flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondOp {
    Or,
    And,
    JustX,
    JustY,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowControlFormat {
    pub num_instructions: u32,
    pub dest_offset: u32,
    pub bool_uniform_id: u32,
    pub int_uniform_id: u32,
    pub op: CondOp,
    pub refx: bool,
    pub refy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetEmitFormat {
    pub vertex_id: u32,
    pub prim_emit: bool,
    pub winding: bool,
}

/// One raw 32-bit shader instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction(pub u32);

impl Instruction {
    pub fn opcode(self) -> OpCode {
        OpCode::from_raw((self.0 >> 26) as u8)
    }

    /// The common single/two-operand arithmetic format. The inverted variants
    /// (`DPHI`/`DSTI`/`SGEI`/`SLTI`) swap the wide and narrow source fields.
    pub fn common(self) -> CommonFormat {
        let inverted = self.opcode().info().flags.contains(OpFlags::SRC_INVERTED);
        let (src1, src2) = if inverted {
            (
                SourceRegister::from_unified((self.0 >> 14) & 0x1f),
                SourceRegister::from_unified((self.0 >> 7) & 0x7f),
            )
        } else {
            (
                SourceRegister::from_unified((self.0 >> 12) & 0x7f),
                SourceRegister::from_unified((self.0 >> 7) & 0x1f),
            )
        };
        CommonFormat {
            operand_desc_id: self.0 & 0x7f,
            src1,
            src2,
            address_register_index: (self.0 >> 19) & 3,
            dest: DestRegister::from_raw((self.0 >> 21) & 0x1f),
        }
    }

    /// `MAD`/`MADI`. The wide (uniform-capable, relative-addressable) operand
    /// is src2 for `MAD` and src3 for `MADI`.
    pub fn mad(self) -> MadFormat {
        let inverted = self.opcode() == OpCode::Madi;
        let (src2, src3) = if inverted {
            (
                SourceRegister::from_unified((self.0 >> 12) & 0x1f),
                SourceRegister::from_unified((self.0 >> 5) & 0x7f),
            )
        } else {
            (
                SourceRegister::from_unified((self.0 >> 10) & 0x7f),
                SourceRegister::from_unified((self.0 >> 5) & 0x1f),
            )
        };
        MadFormat {
            operand_desc_id: self.0 & 0x1f,
            src1: SourceRegister::from_unified((self.0 >> 17) & 0x1f),
            src2,
            src3,
            address_register_index: (self.0 >> 22) & 3,
            dest: DestRegister::from_raw((self.0 >> 24) & 0x1f),
        }
    }

    /// `CMP`. The x compare op's top bit overlaps the opcode field, which is
    /// why `CMP` occupies two raw opcodes.
    pub fn compare(self) -> CompareFormat {
        CompareFormat {
            operand_desc_id: self.0 & 0x7f,
            src1: SourceRegister::from_unified((self.0 >> 12) & 0x7f),
            src2: SourceRegister::from_unified((self.0 >> 7) & 0x1f),
            address_register_index: (self.0 >> 19) & 3,
            op_y: CompareOp::from_raw((self.0 >> 21) & 7),
            op_x: CompareOp::from_raw((self.0 >> 24) & 7),
        }
    }

    pub fn flow_control(self) -> FlowControlFormat {
        FlowControlFormat {
            num_instructions: self.0 & 0xff,
            dest_offset: (self.0 >> 10) & 0xfff,
            bool_uniform_id: (self.0 >> 22) & 0xf,
            int_uniform_id: (self.0 >> 22) & 3,
            op: match (self.0 >> 22) & 3 {
                0 => CondOp::Or,
                1 => CondOp::And,
                2 => CondOp::JustX,
                _ => CondOp::JustY,
            },
            refy: (self.0 >> 24) & 1 != 0,
            refx: (self.0 >> 25) & 1 != 0,
        }
    }

    pub fn setemit(self) -> SetEmitFormat {
        SetEmitFormat {
            vertex_id: (self.0 >> 22) & 3,
            prim_emit: (self.0 >> 24) & 1 != 0,
            winding: (self.0 >> 25) & 1 != 0,
        }
    }
}

/// One 32-bit operand descriptor word from the swizzle table.
///
/// Bits 0..4 are the destination write mask (x in bit 3), followed by a
/// negate bit and four 2-bit component selectors per source operand, with
/// component 0's selector in the highest pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SwizzlePattern(pub u32);

impl SwizzlePattern {
    pub fn dest_mask(self) -> u32 {
        self.0 & 0xf
    }

    pub fn dest_component_enabled(self, comp: usize) -> bool {
        self.0 & (0x8 >> comp) != 0
    }

    pub fn negate_src1(self) -> bool {
        self.0 & (1 << 4) != 0
    }

    pub fn negate_src2(self) -> bool {
        self.0 & (1 << 13) != 0
    }

    pub fn negate_src3(self) -> bool {
        self.0 & (1 << 22) != 0
    }

    pub fn src1_selector(self, comp: usize) -> usize {
        ((self.0 >> (11 - 2 * comp)) & 3) as usize
    }

    pub fn src2_selector(self, comp: usize) -> usize {
        ((self.0 >> (20 - 2 * comp)) & 3) as usize
    }

    pub fn src3_selector(self, comp: usize) -> usize {
        ((self.0 >> (29 - 2 * comp)) & 3) as usize
    }

    pub fn selector(self, src: usize, comp: usize) -> usize {
        match src {
            0 => self.src1_selector(comp),
            1 => self.src2_selector(comp),
            _ => self.src3_selector(comp),
        }
    }

    pub fn negate(self, src: usize) -> bool {
        match src {
            0 => self.negate_src1(),
            1 => self.negate_src2(),
            _ => self.negate_src3(),
        }
    }

    pub fn selector_string(self, src: usize) -> String {
        (0..4).map(|c| ['x', 'y', 'z', 'w'][self.selector(src, c)]).collect()
    }

    pub fn dest_mask_string(self) -> String {
        (0..4)
            .map(|c| {
                if self.dest_component_enabled(c) {
                    ['x', 'y', 'z', 'w'][c]
                } else {
                    '_'
                }
            })
            .collect()
    }
}
