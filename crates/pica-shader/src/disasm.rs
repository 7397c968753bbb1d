//! Textual disassembly for debugger views.

use std::fmt::Write;

use crate::bytecode::{
    CondOp, FlowControlFormat, Instruction, OpCode, OpFlags, OpType, SourceRegister,
    SwizzlePattern,
};

const ADDR_REG_NAMES: [&str; 4] = ["", "[a0.x]", "[a0.y]", "[aL]"];

fn source_operand(
    reg: SourceRegister,
    negate: bool,
    pattern: SwizzlePattern,
    src: usize,
    address_register_index: u32,
) -> String {
    format!(
        "{}{}{}.{}",
        if negate { "-" } else { "" },
        reg,
        ADDR_REG_NAMES[address_register_index as usize & 3],
        pattern.selector_string(src),
    )
}

fn condition(flow: FlowControlFormat) -> String {
    let x = if flow.refx { "cc.x" } else { "!cc.x" };
    let y = if flow.refy { "cc.y" } else { "!cc.y" };
    match flow.op {
        CondOp::Or => format!("{x} || {y}"),
        CondOp::And => format!("{x} && {y}"),
        CondOp::JustX => x.to_owned(),
        CondOp::JustY => y.to_owned(),
    }
}

/// Renders one instruction as `mnemonic operands`, without offset or raw
/// word. Undecodable words render as a diagnostic placeholder.
pub fn disassemble_instruction(word: u32, swizzle_data: &[u32]) -> String {
    let instr = Instruction(word);
    let opcode = instr.opcode();
    let info = opcode.info();
    let swizzle_word = |id: u32| swizzle_data.get(id as usize).copied().unwrap_or(0);

    match info.ty {
        OpType::Trivial => info.name.to_owned(),

        OpType::Arithmetic => {
            let common = instr.common();
            let pattern = SwizzlePattern(swizzle_word(common.operand_desc_id));
            let inverted = info.flags.contains(OpFlags::SRC_INVERTED);
            // Only the wide operand takes the address register.
            let (addr1, addr2) = if inverted {
                (0, common.address_register_index)
            } else {
                (common.address_register_index, 0)
            };
            let src1 = source_operand(common.src1, pattern.negate_src1(), pattern, 0, addr1);
            let src2 = source_operand(common.src2, pattern.negate_src2(), pattern, 1, addr2);

            match opcode {
                OpCode::Cmp => {
                    let cmp = instr.compare();
                    format!(
                        "{:<7} cc.xy, {}.x {} {}.x, {}.y {} {}.y",
                        info.name,
                        common.src1,
                        cmp.op_x.symbol(),
                        common.src2,
                        common.src1,
                        cmp.op_y.symbol(),
                        common.src2,
                    )
                }
                OpCode::Mova => {
                    format!("{:<7} a0.{}, {}", info.name, pattern.dest_mask_string(), src1)
                }
                _ => {
                    let dest = format!("{}.{}", common.dest, pattern.dest_mask_string());
                    if info.flags.contains(OpFlags::SRC2) {
                        format!("{:<7} {}, {}, {}", info.name, dest, src1, src2)
                    } else {
                        format!("{:<7} {}, {}", info.name, dest, src1)
                    }
                }
            }
        }

        OpType::MultiplyAdd => {
            let mad = instr.mad();
            let pattern = SwizzlePattern(swizzle_word(mad.operand_desc_id));
            let inverted = opcode == OpCode::Madi;
            let (addr2, addr3) = if inverted {
                (0, mad.address_register_index)
            } else {
                (mad.address_register_index, 0)
            };
            format!(
                "{:<7} {}.{}, {}, {}, {}",
                info.name,
                mad.dest,
                pattern.dest_mask_string(),
                source_operand(mad.src1, pattern.negate_src1(), pattern, 0, 0),
                source_operand(mad.src2, pattern.negate_src2(), pattern, 1, addr2),
                source_operand(mad.src3, pattern.negate_src3(), pattern, 2, addr3),
            )
        }

        OpType::Conditional | OpType::UniformFlowControl => {
            let flow = instr.flow_control();
            match opcode {
                OpCode::Breakc => format!("{:<7} ({})", info.name, condition(flow)),
                OpCode::Jmpc => {
                    format!("{:<7} ({}) jump to 0x{:03x}", info.name, condition(flow), flow.dest_offset)
                }
                OpCode::Jmpu => {
                    let negated = flow.num_instructions & 1 != 0;
                    format!(
                        "{:<7} ({}b{}) jump to 0x{:03x}",
                        info.name,
                        if negated { "!" } else { "" },
                        flow.bool_uniform_id,
                        flow.dest_offset,
                    )
                }
                OpCode::Call => format!(
                    "{:<7} 0x{:03x} ({} instructions)",
                    info.name, flow.dest_offset, flow.num_instructions
                ),
                OpCode::Callc => format!(
                    "{:<7} ({}) 0x{:03x} ({} instructions)",
                    info.name,
                    condition(flow),
                    flow.dest_offset,
                    flow.num_instructions,
                ),
                OpCode::Callu => format!(
                    "{:<7} (b{}) 0x{:03x} ({} instructions)",
                    info.name, flow.bool_uniform_id, flow.dest_offset, flow.num_instructions
                ),
                OpCode::Ifc => format!(
                    "{:<7} ({}) else at 0x{:03x}, end at 0x{:03x}",
                    info.name,
                    condition(flow),
                    flow.dest_offset,
                    flow.dest_offset + flow.num_instructions,
                ),
                OpCode::Ifu => format!(
                    "{:<7} (b{}) else at 0x{:03x}, end at 0x{:03x}",
                    info.name,
                    flow.bool_uniform_id,
                    flow.dest_offset,
                    flow.dest_offset + flow.num_instructions,
                ),
                OpCode::Loop => format!(
                    "{:<7} i{}, end at 0x{:03x}",
                    info.name, flow.int_uniform_id, flow.dest_offset
                ),
                _ => "(unknown instruction format)".to_owned(),
            }
        }

        OpType::SetEmit => {
            let params = instr.setemit();
            format!(
                "{:<7} (vertex_id: {}; prim_emit: {}; winding: {})",
                info.name,
                params.vertex_id,
                if params.prim_emit { "yes" } else { "no" },
                if params.winding { "ccw" } else { "cw" },
            )
        }

        OpType::Unknown => "(unknown instruction format)".to_owned(),
    }
}

/// Renders a whole program range with offsets and raw words, one line per
/// instruction.
pub fn disassemble(program: &[u32], swizzle_data: &[u32]) -> String {
    let mut out = String::new();
    for (offset, &word) in program.iter().enumerate() {
        let _ = writeln!(
            out,
            "{offset:03x}  {word:08x}    {}",
            disassemble_instruction(word, swizzle_data)
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::tests::{enc_common, enc_swizzle};
    use pretty_assertions::assert_eq;

    #[test]
    fn renders_arithmetic_operands() {
        let swizzles = [enc_swizzle(0xf, 0b00_01_10_11, 1, 0b11_10_01_00, 0, 0, 0)];
        // add o1, -c92[a0.x].xyzw, v3.wzyx
        let word = enc_common(0x00, 0x01, 1, 0x7c, 0x03, 0);
        assert_eq!(
            disassemble_instruction(word, &swizzles),
            "add     o1.xyzw, -c92[a0.x].xyzw, v3.wzyx"
        );
    }

    #[test]
    fn renders_single_source_and_mova() {
        let swizzles = [enc_swizzle(0b1100, 0b00_01_10_11, 0, 0, 0, 0, 0)];
        let mov = enc_common(0x13, 0x12, 0, 0x10, 0, 0);
        assert_eq!(disassemble_instruction(mov, &swizzles), "mov     r2.xy__, r0.xyzw");

        let mova = enc_common(0x12, 0, 0, 0x15, 0, 0);
        assert_eq!(disassemble_instruction(mova, &swizzles), "mova    a0.xy__, r5.xyzw");
    }

    #[test]
    fn renders_compare_against_both_flags() {
        let swizzles = [0u32];
        let word = enc_common(0x2e, 0, 0, 0x01, 0x02, 0) | (0b000 << 24) | (0b010 << 21);
        assert_eq!(
            disassemble_instruction(word, &swizzles),
            "cmp     cc.xy, v1.x == v2.x, v1.y < v2.y"
        );
    }

    #[test]
    fn renders_flow_control_targets() {
        let ifc = (0x28 << 26) | (1 << 25) | (2 << 22) | (0x010 << 10) | 4;
        assert_eq!(
            disassemble_instruction(ifc, &[]),
            "ifc     (cc.x) else at 0x010, end at 0x014"
        );

        let jmpu_negated = (0x2d << 26) | (3 << 22) | (0x020 << 10) | 1;
        assert_eq!(
            disassemble_instruction(jmpu_negated, &[]),
            "jmpu    (!b3) jump to 0x020"
        );

        let looped = (0x29 << 26) | (2 << 22) | (0x00f << 10);
        assert_eq!(disassemble_instruction(looped, &[]), "loop    i2, end at 0x00f");

        let call = (0x24 << 26) | (0x005 << 10) | 3;
        assert_eq!(disassemble_instruction(call, &[]), "call    0x005 (3 instructions)");
    }

    #[test]
    fn renders_setemit_parameters() {
        let word = (0x2b << 26) | (1 << 25) | (1 << 24) | (1 << 22);
        assert_eq!(
            disassemble_instruction(word, &[]),
            "setemit (vertex_id: 1; prim_emit: yes; winding: ccw)"
        );
    }

    #[test]
    fn unknown_words_get_a_placeholder() {
        assert_eq!(disassemble_instruction(0x1f << 26, &[]), "(unknown instruction format)");
    }

    #[test]
    fn full_listing_carries_offsets_and_raw_words() {
        let program = [(0x21u32 << 26), 0x22 << 26];
        let listing = disassemble(&program, &[]);
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines[0], "000  84000000    nop");
        assert_eq!(lines[1], "001  88000000    end");
    }
}
