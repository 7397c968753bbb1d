//! The reference execution engine: a straight interpreter over the raw
//! instruction words.
//!
//! Execution is generic over a [`ShaderTracer`] so the same loop serves both
//! bulk rendering (with [`crate::debug::NullTracer`]) and instrumented runs.

use pica_types::Float24;
use tracing::{debug, error};

use crate::bytecode::{
    CompareOp, CondOp, DestRegister, FlowControlFormat, Instruction, OpCode, OpFlags, OpType,
    SourceRegister, SwizzlePattern,
};
use crate::debug::ShaderTracer;
use crate::setup::ShaderSetup;
use crate::state::{Attribute, UnitState};

/// Hardware call-stack depth, shared by CALL*, IF* and LOOP frames.
pub const CALL_STACK_DEPTH: usize = 16;

#[derive(Debug, Clone, Copy)]
struct CallStackElement {
    /// Reaching this offset ends the frame (or restarts a loop body).
    final_address: u32,
    return_address: u32,
    repeat_counter: u8,
    loop_increment: u8,
    loop_address: u32,
}

fn evaluate_condition(code: [bool; 2], flow: FlowControlFormat) -> bool {
    let result_x = flow.refx == code[0];
    let result_y = flow.refy == code[1];
    match flow.op {
        CondOp::Or => result_x || result_y,
        CondOp::And => result_x && result_y,
        CondOp::JustX => result_x,
        CondOp::JustY => result_y,
    }
}

fn read_source(
    setup: &ShaderSetup,
    state: &UnitState,
    reg: SourceRegister,
    address_offset: i32,
) -> Attribute {
    let unified = reg.unified() as i32 + address_offset;
    match SourceRegister::resolve_unified(unified) {
        Some(SourceRegister::Input(i)) => state.registers.input[i as usize],
        Some(SourceRegister::Temporary(i)) => state.registers.temporary[i as usize],
        Some(SourceRegister::FloatUniform(i)) => setup.uniforms.f[i as usize],
        // Relative addressing left the register file; reads are zero.
        None => [Float24::zero(); 4],
    }
}

fn swizzled(value: Attribute, pattern: SwizzlePattern, src: usize) -> Attribute {
    let mut out = [Float24::zero(); 4];
    for (comp, slot) in out.iter_mut().enumerate() {
        *slot = value[pattern.selector(src, comp)];
    }
    if pattern.negate(src) {
        for slot in &mut out {
            *slot = -*slot;
        }
    }
    out
}

fn compare(op: CompareOp, lhs: Float24, rhs: Float24, previous: bool) -> bool {
    match op {
        CompareOp::Equal => lhs == rhs,
        CompareOp::NotEqual => lhs != rhs,
        CompareOp::LessThan => lhs < rhs,
        CompareOp::LessEqualThan => lhs <= rhs,
        CompareOp::GreaterThan => lhs > rhs,
        CompareOp::GreaterEqualThan => lhs >= rhs,
        CompareOp::Unknown(raw) => {
            error!(raw, "unknown compare op, flag left unchanged");
            previous
        }
    }
}

fn push_call(
    stack: &mut Vec<CallStackElement>,
    next: &mut u32,
    offset: u32,
    num_instructions: u32,
    return_offset: u32,
    repeat_count: u8,
    loop_increment: u8,
) {
    if stack.len() >= CALL_STACK_DEPTH {
        error!(offset, "call stack exhausted, call ignored");
        return;
    }
    *next = offset;
    stack.push(CallStackElement {
        final_address: offset.wrapping_add(num_instructions),
        return_address: return_offset,
        repeat_counter: repeat_count,
        loop_increment,
        loop_address: offset,
    });
}

/// Runs the program in `setup` from `entry_point` until END, an exhausted
/// call path, or the program counter leaving the code store.
pub fn run<T: ShaderTracer>(
    setup: &ShaderSetup,
    state: &mut UnitState,
    tracer: &mut T,
    entry_point: u32,
) {
    let mut call_stack: Vec<CallStackElement> = Vec::with_capacity(CALL_STACK_DEPTH);
    let mut pc = entry_point;

    loop {
        // Frame boundary check comes before the fetch: a frame whose body
        // just finished either restarts (LOOP) or returns.
        if let Some(top) = call_stack.last_mut() {
            if pc == top.final_address {
                state.address_registers[2] += top.loop_increment as i32;
                let done = top.repeat_counter == 0;
                top.repeat_counter = top.repeat_counter.wrapping_sub(1);
                if done {
                    pc = top.return_address;
                    call_stack.pop();
                } else {
                    pc = top.loop_address;
                }
                continue;
            }
        }

        let Some(&word) = setup.program_code.get(pc as usize) else {
            debug!(pc, "program counter left the code store, stopping");
            return;
        };
        let instr = Instruction(word);
        let opcode = instr.opcode();
        let info = opcode.info();
        tracer.begin(pc);
        let mut next = pc.wrapping_add(1);

        match info.ty {
            OpType::Arithmetic => {
                let common = instr.common();
                let pattern = SwizzlePattern(setup.swizzle_data[common.operand_desc_id as usize]);
                let inverted = info.flags.contains(OpFlags::SRC_INVERTED);
                let address_offset = match common.address_register_index {
                    0 => 0,
                    i => state.address_registers[i as usize - 1],
                };
                // Relative addressing applies to the wide operand only.
                let src1 = swizzled(
                    read_source(setup, state, common.src1, if inverted { 0 } else { address_offset }),
                    pattern,
                    0,
                );
                let src2 = swizzled(
                    read_source(setup, state, common.src2, if inverted { address_offset } else { 0 }),
                    pattern,
                    1,
                );
                tracer.src1(src1);
                if info.flags.contains(OpFlags::SRC2) {
                    tracer.src2(src2);
                }

                match opcode {
                    OpCode::Cmp => {
                        let ops = instr.compare();
                        let flags = [
                            compare(ops.op_x, src1[0], src2[0], state.conditional_code[0]),
                            compare(ops.op_y, src1[1], src2[1], state.conditional_code[1]),
                        ];
                        state.conditional_code = flags;
                        tracer.cmp_result(flags);
                    }
                    OpCode::Mova => {
                        for comp in 0..2 {
                            if pattern.dest_component_enabled(comp) {
                                // Saturating truncation, NaN becomes 0.
                                state.address_registers[comp] = src1[comp].to_f32() as i32;
                            }
                        }
                        tracer.addr_reg_out(state.address_registers);
                    }
                    _ => {
                        let dest = match common.dest {
                            DestRegister::Output(i) => &mut state.registers.output[i as usize],
                            DestRegister::Temporary(i) => {
                                &mut state.registers.temporary[i as usize]
                            }
                        };
                        tracer.dest_in(*dest);
                        match opcode {
                            OpCode::Add => {
                                for comp in 0..4 {
                                    if pattern.dest_component_enabled(comp) {
                                        dest[comp] = src1[comp] + src2[comp];
                                    }
                                }
                            }
                            OpCode::Mul => {
                                for comp in 0..4 {
                                    if pattern.dest_component_enabled(comp) {
                                        dest[comp] = src1[comp] * src2[comp];
                                    }
                                }
                            }
                            OpCode::Dp3 | OpCode::Dp4 | OpCode::Dph | OpCode::Dphi => {
                                let mut src1 = src1;
                                if matches!(opcode, OpCode::Dph | OpCode::Dphi) {
                                    src1[3] = Float24::from_f32(1.0);
                                }
                                let components = if opcode == OpCode::Dp3 { 3 } else { 4 };
                                let mut dot = Float24::zero();
                                for comp in 0..components {
                                    dot += src1[comp] * src2[comp];
                                }
                                for comp in 0..4 {
                                    if pattern.dest_component_enabled(comp) {
                                        dest[comp] = dot;
                                    }
                                }
                            }
                            OpCode::Dst | OpCode::Dsti => {
                                let result = [
                                    Float24::from_f32(1.0),
                                    src1[1] * src2[1],
                                    src1[2],
                                    src2[3],
                                ];
                                for comp in 0..4 {
                                    if pattern.dest_component_enabled(comp) {
                                        dest[comp] = result[comp];
                                    }
                                }
                            }
                            OpCode::Ex2 => {
                                let result = Float24::from_f32(src1[0].to_f32().exp2());
                                for comp in 0..4 {
                                    if pattern.dest_component_enabled(comp) {
                                        dest[comp] = result;
                                    }
                                }
                            }
                            OpCode::Lg2 => {
                                let result = Float24::from_f32(src1[0].to_f32().log2());
                                for comp in 0..4 {
                                    if pattern.dest_component_enabled(comp) {
                                        dest[comp] = result;
                                    }
                                }
                            }
                            OpCode::Sge | OpCode::Sgei => {
                                for comp in 0..4 {
                                    if pattern.dest_component_enabled(comp) {
                                        dest[comp] = Float24::from_f32(
                                            if src1[comp] >= src2[comp] { 1.0 } else { 0.0 },
                                        );
                                    }
                                }
                            }
                            OpCode::Slt | OpCode::Slti => {
                                for comp in 0..4 {
                                    if pattern.dest_component_enabled(comp) {
                                        dest[comp] = Float24::from_f32(
                                            if src1[comp] < src2[comp] { 1.0 } else { 0.0 },
                                        );
                                    }
                                }
                            }
                            OpCode::Flr => {
                                for comp in 0..4 {
                                    if pattern.dest_component_enabled(comp) {
                                        dest[comp] =
                                            Float24::from_f32(src1[comp].to_f32().floor());
                                    }
                                }
                            }
                            OpCode::Max => {
                                // Comparison-select form: max(0, NaN) is NaN,
                                // max(NaN, 0) is 0.
                                for comp in 0..4 {
                                    if pattern.dest_component_enabled(comp) {
                                        dest[comp] = if src1[comp] > src2[comp] {
                                            src1[comp]
                                        } else {
                                            src2[comp]
                                        };
                                    }
                                }
                            }
                            OpCode::Min => {
                                for comp in 0..4 {
                                    if pattern.dest_component_enabled(comp) {
                                        dest[comp] = if src1[comp] < src2[comp] {
                                            src1[comp]
                                        } else {
                                            src2[comp]
                                        };
                                    }
                                }
                            }
                            OpCode::Rcp => {
                                let result = Float24::from_f32(1.0 / src1[0].to_f32());
                                for comp in 0..4 {
                                    if pattern.dest_component_enabled(comp) {
                                        dest[comp] = result;
                                    }
                                }
                            }
                            OpCode::Rsq => {
                                let result = Float24::from_f32(1.0 / src1[0].to_f32().sqrt());
                                for comp in 0..4 {
                                    if pattern.dest_component_enabled(comp) {
                                        dest[comp] = result;
                                    }
                                }
                            }
                            OpCode::Mov => {
                                for comp in 0..4 {
                                    if pattern.dest_component_enabled(comp) {
                                        dest[comp] = src1[comp];
                                    }
                                }
                            }
                            _ => error!(pc, op = info.name, "unhandled arithmetic instruction"),
                        }
                        tracer.dest_out(*dest);
                    }
                }
            }

            OpType::MultiplyAdd => {
                let mad = instr.mad();
                let pattern = SwizzlePattern(setup.swizzle_data[mad.operand_desc_id as usize]);
                let inverted = opcode == OpCode::Madi;
                let address_offset = match mad.address_register_index {
                    0 => 0,
                    i => state.address_registers[i as usize - 1],
                };
                let src1 = swizzled(read_source(setup, state, mad.src1, 0), pattern, 0);
                let src2 = swizzled(
                    read_source(setup, state, mad.src2, if inverted { 0 } else { address_offset }),
                    pattern,
                    1,
                );
                let src3 = swizzled(
                    read_source(setup, state, mad.src3, if inverted { address_offset } else { 0 }),
                    pattern,
                    2,
                );
                tracer.src1(src1);
                tracer.src2(src2);
                tracer.src3(src3);

                let dest = match mad.dest {
                    DestRegister::Output(i) => &mut state.registers.output[i as usize],
                    DestRegister::Temporary(i) => &mut state.registers.temporary[i as usize],
                };
                tracer.dest_in(*dest);
                for comp in 0..4 {
                    if pattern.dest_component_enabled(comp) {
                        dest[comp] = src1[comp] * src2[comp] + src3[comp];
                    }
                }
                tracer.dest_out(*dest);
            }

            _ => match opcode {
                OpCode::Nop => {}
                OpCode::End => {
                    tracer.next_instr(next);
                    return;
                }
                OpCode::Emit => {
                    let output = state.registers.output;
                    let emitter = state
                        .emitter
                        .as_mut()
                        .expect("emit executed without a geometry emitter");
                    emitter.emit(&output);
                }
                OpCode::Setemit => {
                    let params = instr.setemit();
                    let emitter = state
                        .emitter
                        .as_mut()
                        .expect("setemit executed without a geometry emitter");
                    emitter.set_params(params.vertex_id as u8, params.prim_emit, params.winding);
                }
                OpCode::Breakc => {
                    let flow = instr.flow_control();
                    tracer.cond_cmp_in(state.conditional_code);
                    if evaluate_condition(state.conditional_code, flow) {
                        match call_stack.pop() {
                            Some(top) => next = top.return_address,
                            None => error!(pc, "breakc with empty call stack ignored"),
                        }
                    }
                }
                OpCode::Call => {
                    let flow = instr.flow_control();
                    push_call(
                        &mut call_stack,
                        &mut next,
                        flow.dest_offset,
                        flow.num_instructions,
                        pc.wrapping_add(1),
                        0,
                        0,
                    );
                }
                OpCode::Callu => {
                    let flow = instr.flow_control();
                    let value = setup.uniforms.b[flow.bool_uniform_id as usize];
                    tracer.cond_bool_in(value);
                    if value {
                        push_call(
                            &mut call_stack,
                            &mut next,
                            flow.dest_offset,
                            flow.num_instructions,
                            pc.wrapping_add(1),
                            0,
                            0,
                        );
                    }
                }
                OpCode::Callc => {
                    let flow = instr.flow_control();
                    tracer.cond_cmp_in(state.conditional_code);
                    if evaluate_condition(state.conditional_code, flow) {
                        push_call(
                            &mut call_stack,
                            &mut next,
                            flow.dest_offset,
                            flow.num_instructions,
                            pc.wrapping_add(1),
                            0,
                            0,
                        );
                    }
                }
                OpCode::Ifu | OpCode::Ifc => {
                    let flow = instr.flow_control();
                    let taken = if opcode == OpCode::Ifu {
                        let value = setup.uniforms.b[flow.bool_uniform_id as usize];
                        tracer.cond_bool_in(value);
                        value
                    } else {
                        tracer.cond_cmp_in(state.conditional_code);
                        evaluate_condition(state.conditional_code, flow)
                    };
                    let finish = flow.dest_offset.wrapping_add(flow.num_instructions);
                    if taken {
                        // Run the if-body, then skip over the else-body.
                        push_call(
                            &mut call_stack,
                            &mut next,
                            pc.wrapping_add(1),
                            flow.dest_offset.wrapping_sub(pc).wrapping_sub(1),
                            finish,
                            0,
                            0,
                        );
                    } else {
                        push_call(
                            &mut call_stack,
                            &mut next,
                            flow.dest_offset,
                            flow.num_instructions,
                            finish,
                            0,
                            0,
                        );
                    }
                }
                OpCode::Loop => {
                    let flow = instr.flow_control();
                    let param = setup.uniforms.i[flow.int_uniform_id as usize];
                    state.address_registers[2] = param[1] as i32;
                    tracer.loop_int_in(param);
                    // Body runs x+1 times; aL starts at y and steps by z at
                    // each end-of-body boundary.
                    push_call(
                        &mut call_stack,
                        &mut next,
                        pc.wrapping_add(1),
                        flow.dest_offset.wrapping_sub(pc),
                        flow.dest_offset.wrapping_add(1),
                        param[0],
                        param[2],
                    );
                }
                OpCode::Jmpc => {
                    let flow = instr.flow_control();
                    tracer.cond_cmp_in(state.conditional_code);
                    if evaluate_condition(state.conditional_code, flow) {
                        next = flow.dest_offset;
                    }
                }
                OpCode::Jmpu => {
                    let flow = instr.flow_control();
                    let value = setup.uniforms.b[flow.bool_uniform_id as usize];
                    tracer.cond_bool_in(value);
                    // Bit 0 of the count field inverts the test.
                    if value == (flow.num_instructions & 1 == 0) {
                        next = flow.dest_offset;
                    }
                }
                _ => error!(pc, op = info.name, "unhandled instruction"),
            },
        }

        tracer.next_instr(next);
        pc = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow(op: CondOp, refx: bool, refy: bool) -> FlowControlFormat {
        FlowControlFormat {
            num_instructions: 0,
            dest_offset: 0,
            bool_uniform_id: 0,
            int_uniform_id: 0,
            op,
            refx,
            refy,
        }
    }

    #[test]
    fn condition_compares_flags_against_references() {
        assert!(evaluate_condition([true, false], flow(CondOp::JustX, true, false)));
        assert!(!evaluate_condition([false, false], flow(CondOp::JustX, true, false)));
        assert!(evaluate_condition([false, true], flow(CondOp::JustY, false, true)));
        assert!(evaluate_condition([true, false], flow(CondOp::Or, true, true)));
        assert!(!evaluate_condition([true, false], flow(CondOp::And, true, true)));
        assert!(evaluate_condition([true, true], flow(CondOp::And, true, true)));
        // Matching a false flag against a false reference counts as true.
        assert!(evaluate_condition([false, false], flow(CondOp::And, false, false)));
    }

    #[test]
    fn unknown_compare_op_keeps_the_previous_flag() {
        let one = Float24::from_f32(1.0);
        assert!(compare(CompareOp::Unknown(7), one, one, true));
        assert!(!compare(CompareOp::Unknown(7), one, one, false));
        assert!(compare(CompareOp::Equal, one, one, false));
    }
}
