//! Translates a shader program into a WebAssembly module.
//!
//! The generated module imports one linear memory holding the register file,
//! uniforms, condition codes, address registers and the call stack, plus four
//! host helpers (`exp2`, `log2`, `emit`, `setemit`). Each instruction becomes
//! a dispatch arm of a `br_table` over the program counter, so arbitrary
//! branch targets resolve without control-flow reconstruction.
//!
//! Register reads use the same f32 values the interpreter works on, and
//! multiplication lowers to the same compare/select sequence, so both engines
//! produce bit-identical results.

use std::borrow::Cow;

use wasm_encoder::{
    BlockType, CodeSection, ConstExpr, ExportKind, ExportSection, Function, FunctionSection,
    GlobalSection, GlobalType, ImportSection, Instruction as I, MemArg, MemoryType, Module,
    TypeSection, ValType,
};

use pica_shader::bytecode::{
    CompareOp, CondOp, DestRegister, FlowControlFormat, Instruction, OpCode, OpFlags, OpType,
    SourceRegister, SwizzlePattern,
};
use pica_shader::interpreter::CALL_STACK_DEPTH;
use pica_shader::setup::MAX_PROGRAM_CODE_LENGTH;
use tracing::warn;

// Linear memory layout. Every vector register occupies 16 bytes (4 f32
// components); the unified source index maps directly to `index * 16`.
pub const OFF_INPUT: u32 = 0x000;
pub const OFF_TEMPORARY: u32 = 0x100;
pub const OFF_FLOAT_UNIFORM: u32 = 0x200;
pub const OFF_OUTPUT: u32 = 0x800;
/// Reads that relative addressing pushed out of the register file land here.
pub const OFF_ZERO: u32 = 0x900;
pub const OFF_INT_UNIFORM: u32 = 0x910;
pub const OFF_BOOL_UNIFORM: u32 = 0x920;
pub const OFF_COND: u32 = 0x930;
pub const OFF_ADDR: u32 = 0x938;
pub const OFF_CALL_STACK: u32 = 0x950;
const STACK_ENTRY_BYTES: u32 = 20;
pub const MEMORY_BYTES: u32 = OFF_CALL_STACK + CALL_STACK_DEPTH as u32 * STACK_ENTRY_BYTES;
pub const MEMORY_PAGES: u64 = 1;

// Function indices. Imports come first.
const FN_EXP2: u32 = 0;
const FN_LOG2: u32 = 1;
const FN_EMIT: u32 = 2;
const FN_SETEMIT: u32 = 3;
const FN_FRAME_CHECK: u32 = 4;
const FN_PUSH_CALL: u32 = 5;
const FN_RUN: u32 = 6;

const GLOBAL_SP: u32 = 0;

// Locals of the generated `run` function. Local 0 is the entry-point
// parameter, reused as the program counter.
const LOCAL_PC: u32 = 0;
const LOCAL_SCRATCH_I32: u32 = 1;
const LOCAL_SCRATCH_F32_A: u32 = 2;
const LOCAL_SCRATCH_F32_B: u32 = 3;

fn mem(offset: u32) -> MemArg {
    MemArg { offset: offset as u64, align: 2, memory_index: 0 }
}

fn mem8(offset: u32) -> MemArg {
    MemArg { offset: offset as u64, align: 0, memory_index: 0 }
}

/// Base byte offset of a unified source index.
fn source_base(reg: SourceRegister) -> u32 {
    reg.unified() * 16
}

fn dest_base(dest: DestRegister) -> u32 {
    match dest {
        DestRegister::Output(i) => OFF_OUTPUT + i * 16,
        DestRegister::Temporary(i) => OFF_TEMPORARY + i * 16,
    }
}

/// Compiles `program` into a WebAssembly module exporting `run: (i32) -> ()`.
///
/// Only the prefix of the code store that can contain instructions is
/// compiled: everything past the last non-zero word (and past `entry_point`)
/// is unreachable padding, and a program counter leaving the compiled range
/// stops execution exactly like the interpreter leaving the code store.
pub fn compile(
    program: &[u32; MAX_PROGRAM_CODE_LENGTH],
    swizzle_data: &[u32; MAX_PROGRAM_CODE_LENGTH],
    entry_point: u32,
) -> Vec<u8> {
    // Everything past the last non-zero word is zero padding. One padding
    // word still gets a dispatch arm: an all-zero word decodes to an
    // idempotent ADD, so executing it once leaves the registers exactly as
    // the interpreter's walk across the whole padded tail does.
    let last_used = program.iter().rposition(|&w| w != 0).map_or(0, |i| i + 1);
    let code_len =
        (last_used.max(entry_point as usize + 1) + 1).min(MAX_PROGRAM_CODE_LENGTH) as u32;

    let mut types = TypeSection::new();
    types.ty().function([ValType::F32], [ValType::F32]); // exp2, log2
    types.ty().function([], []); // emit
    types.ty().function([ValType::I32; 3], []); // setemit
    types.ty().function([ValType::I32], []); // run
    types.ty().function([ValType::I32], [ValType::I32]); // frame_check
    types.ty().function([ValType::I32; 6], [ValType::I32]); // push_call

    let mut imports = ImportSection::new();
    imports.import(
        "env",
        "memory",
        MemoryType {
            minimum: MEMORY_PAGES,
            maximum: None,
            memory64: false,
            shared: false,
            page_size_log2: None,
        },
    );
    imports.import("env", "exp2", wasm_encoder::EntityType::Function(0));
    imports.import("env", "log2", wasm_encoder::EntityType::Function(0));
    imports.import("env", "emit", wasm_encoder::EntityType::Function(1));
    imports.import("env", "setemit", wasm_encoder::EntityType::Function(2));

    let mut functions = FunctionSection::new();
    functions.function(4); // frame_check
    functions.function(5); // push_call
    functions.function(3); // run

    let mut globals = GlobalSection::new();
    // Call stack pointer, reset on every run.
    globals.global(
        GlobalType { val_type: ValType::I32, mutable: true, shared: false },
        &ConstExpr::i32_const(0),
    );

    let mut exports = ExportSection::new();
    exports.export("run", ExportKind::Func, FN_RUN);

    let mut code = CodeSection::new();
    code.function(&frame_check_function());
    code.function(&push_call_function());
    code.function(&run_function(program, swizzle_data, code_len));

    let mut module = Module::new();
    module.section(&types);
    module.section(&imports);
    module.section(&functions);
    module.section(&globals);
    module.section(&exports);
    module.section(&code);
    module.finish()
}

/// `frame_check(pc) -> i32`: the per-cycle frame boundary test. Returns the
/// redirected program counter, or -1 when the fetch should proceed at `pc`.
/// On a boundary hit it steps `aL`, decrements the repeat counter and either
/// restarts the body or pops the frame.
fn frame_check_function() -> Function {
    let top = 1;
    let repeat = 2;
    let mut f = Function::new([(2, ValType::I32)]);

    f.instruction(&I::GlobalGet(GLOBAL_SP));
    f.instruction(&I::I32Eqz);
    f.instruction(&I::If(BlockType::Empty));
    f.instruction(&I::I32Const(-1));
    f.instruction(&I::Return);
    f.instruction(&I::End);

    // top = OFF_CALL_STACK + (sp - 1) * entry_size
    f.instruction(&I::GlobalGet(GLOBAL_SP));
    f.instruction(&I::I32Const(1));
    f.instruction(&I::I32Sub);
    f.instruction(&I::I32Const(STACK_ENTRY_BYTES as i32));
    f.instruction(&I::I32Mul);
    f.instruction(&I::I32Const(OFF_CALL_STACK as i32));
    f.instruction(&I::I32Add);
    f.instruction(&I::LocalSet(top));

    f.instruction(&I::LocalGet(0));
    f.instruction(&I::LocalGet(top));
    f.instruction(&I::I32Load(mem(0)));
    f.instruction(&I::I32Ne);
    f.instruction(&I::If(BlockType::Empty));
    f.instruction(&I::I32Const(-1));
    f.instruction(&I::Return);
    f.instruction(&I::End);

    // aL += loop increment
    f.instruction(&I::I32Const(0));
    f.instruction(&I::I32Const(0));
    f.instruction(&I::I32Load(mem(OFF_ADDR + 8)));
    f.instruction(&I::LocalGet(top));
    f.instruction(&I::I32Load(mem(12)));
    f.instruction(&I::I32Add);
    f.instruction(&I::I32Store(mem(OFF_ADDR + 8)));

    f.instruction(&I::LocalGet(top));
    f.instruction(&I::I32Load(mem(8)));
    f.instruction(&I::LocalSet(repeat));

    // repeat counter wraps like the hardware's 8-bit field
    f.instruction(&I::LocalGet(top));
    f.instruction(&I::LocalGet(repeat));
    f.instruction(&I::I32Const(1));
    f.instruction(&I::I32Sub);
    f.instruction(&I::I32Const(0xff));
    f.instruction(&I::I32And);
    f.instruction(&I::I32Store(mem(8)));

    f.instruction(&I::LocalGet(repeat));
    f.instruction(&I::I32Eqz);
    f.instruction(&I::If(BlockType::Empty));
    f.instruction(&I::GlobalGet(GLOBAL_SP));
    f.instruction(&I::I32Const(1));
    f.instruction(&I::I32Sub);
    f.instruction(&I::GlobalSet(GLOBAL_SP));
    f.instruction(&I::LocalGet(top));
    f.instruction(&I::I32Load(mem(4)));
    f.instruction(&I::Return);
    f.instruction(&I::End);

    f.instruction(&I::LocalGet(top));
    f.instruction(&I::I32Load(mem(16)));
    f.instruction(&I::End);
    f
}

/// `push_call(offset, num, return, repeat, increment, fallback) -> i32`:
/// pushes a frame and returns `offset`, or `fallback` unchanged when the
/// stack is full (the call is ignored, matching the interpreter).
fn push_call_function() -> Function {
    let base = 6;
    let mut f = Function::new([(1, ValType::I32)]);

    f.instruction(&I::GlobalGet(GLOBAL_SP));
    f.instruction(&I::I32Const(CALL_STACK_DEPTH as i32));
    f.instruction(&I::I32GeU);
    f.instruction(&I::If(BlockType::Empty));
    f.instruction(&I::LocalGet(5));
    f.instruction(&I::Return);
    f.instruction(&I::End);

    f.instruction(&I::GlobalGet(GLOBAL_SP));
    f.instruction(&I::I32Const(STACK_ENTRY_BYTES as i32));
    f.instruction(&I::I32Mul);
    f.instruction(&I::I32Const(OFF_CALL_STACK as i32));
    f.instruction(&I::I32Add);
    f.instruction(&I::LocalSet(base));

    // final address
    f.instruction(&I::LocalGet(base));
    f.instruction(&I::LocalGet(0));
    f.instruction(&I::LocalGet(1));
    f.instruction(&I::I32Add);
    f.instruction(&I::I32Store(mem(0)));
    // return address
    f.instruction(&I::LocalGet(base));
    f.instruction(&I::LocalGet(2));
    f.instruction(&I::I32Store(mem(4)));
    // repeat counter
    f.instruction(&I::LocalGet(base));
    f.instruction(&I::LocalGet(3));
    f.instruction(&I::I32Store(mem(8)));
    // loop increment
    f.instruction(&I::LocalGet(base));
    f.instruction(&I::LocalGet(4));
    f.instruction(&I::I32Store(mem(12)));
    // loop address
    f.instruction(&I::LocalGet(base));
    f.instruction(&I::LocalGet(0));
    f.instruction(&I::I32Store(mem(16)));

    f.instruction(&I::GlobalGet(GLOBAL_SP));
    f.instruction(&I::I32Const(1));
    f.instruction(&I::I32Add);
    f.instruction(&I::GlobalSet(GLOBAL_SP));

    f.instruction(&I::LocalGet(0));
    f.instruction(&I::End);
    f
}

fn run_function(
    program: &[u32; MAX_PROGRAM_CODE_LENGTH],
    swizzle_data: &[u32; MAX_PROGRAM_CODE_LENGTH],
    code_len: u32,
) -> Function {
    let mut f = Function::new([(1, ValType::I32), (2, ValType::F32)]);

    f.instruction(&I::I32Const(0));
    f.instruction(&I::GlobalSet(GLOBAL_SP));

    f.instruction(&I::Block(BlockType::Empty)); // exit
    f.instruction(&I::Loop(BlockType::Empty)); // cycle

    // pc redirect from a frame boundary?
    f.instruction(&I::LocalGet(LOCAL_PC));
    f.instruction(&I::Call(FN_FRAME_CHECK));
    f.instruction(&I::LocalTee(LOCAL_SCRATCH_I32));
    f.instruction(&I::I32Const(-1));
    f.instruction(&I::I32Ne);
    f.instruction(&I::If(BlockType::Empty));
    f.instruction(&I::LocalGet(LOCAL_SCRATCH_I32));
    f.instruction(&I::LocalSet(LOCAL_PC));
    f.instruction(&I::Br(1)); // back to cycle
    f.instruction(&I::End);

    // One nested block per instruction; leaving the compiled range falls
    // through to exit, like the interpreter leaving the code store.
    for _ in 0..code_len {
        f.instruction(&I::Block(BlockType::Empty));
    }
    let targets: Vec<u32> = (0..code_len).collect();
    f.instruction(&I::LocalGet(LOCAL_PC));
    f.instruction(&I::BrTable(Cow::Owned(targets), code_len + 1));

    for pc in 0..code_len {
        f.instruction(&I::End);
        let cycle = code_len - 1 - pc;
        let exit = code_len - pc;
        emit_instruction(&mut f, program[pc as usize], pc, swizzle_data, cycle, exit);
    }

    f.instruction(&I::End); // cycle loop
    f.instruction(&I::End); // exit block
    f.instruction(&I::End); // function
    f
}

/// Pushes `pc = value; continue` at the end of a dispatch arm.
fn set_pc_and_continue(f: &mut Function, value: u32, cycle: u32) {
    f.instruction(&I::I32Const(value as i32));
    f.instruction(&I::LocalSet(LOCAL_PC));
    f.instruction(&I::Br(cycle));
}

/// Pushes one swizzled f32 source component. With relative addressing the
/// resolved index is range-checked and out-of-file reads come from the zero
/// word, before negation is applied.
fn emit_source_component(
    f: &mut Function,
    reg: SourceRegister,
    address_register_index: u32,
    pattern: SwizzlePattern,
    src: usize,
    comp: usize,
) {
    let sel = pattern.selector(src, comp) as u32;
    if address_register_index == 0 {
        f.instruction(&I::I32Const(source_base(reg) as i32));
        f.instruction(&I::F32Load(mem(sel * 4)));
    } else {
        // index = unified + addr; addr regs live as i32 words
        f.instruction(&I::I32Const(reg.unified() as i32));
        f.instruction(&I::I32Const(0));
        f.instruction(&I::I32Load(mem(OFF_ADDR + (address_register_index - 1) * 4)));
        f.instruction(&I::I32Add);
        f.instruction(&I::LocalTee(LOCAL_SCRATCH_I32));
        f.instruction(&I::I32Const(4));
        f.instruction(&I::I32Shl);
        f.instruction(&I::I32Const(OFF_ZERO as i32));
        f.instruction(&I::LocalGet(LOCAL_SCRATCH_I32));
        f.instruction(&I::I32Const(0x80));
        f.instruction(&I::I32LtU); // unsigned: negative indices also miss
        f.instruction(&I::Select);
        f.instruction(&I::F32Load(mem(sel * 4)));
    }
    if pattern.negate(src) {
        f.instruction(&I::F32Neg);
    }
}

/// Multiplies the two f32 values on the stack with the hardware rule: exact
/// zero times anything non-NaN is exact zero.
fn emit_pica_multiply(f: &mut Function) {
    f.instruction(&I::LocalSet(LOCAL_SCRATCH_F32_B));
    f.instruction(&I::LocalSet(LOCAL_SCRATCH_F32_A));
    f.instruction(&I::F32Const(0.0f32.into()));
    f.instruction(&I::LocalGet(LOCAL_SCRATCH_F32_A));
    f.instruction(&I::LocalGet(LOCAL_SCRATCH_F32_B));
    f.instruction(&I::F32Mul);
    // (a == 0 && b == b) || (b == 0 && a == a)
    f.instruction(&I::LocalGet(LOCAL_SCRATCH_F32_A));
    f.instruction(&I::F32Const(0.0f32.into()));
    f.instruction(&I::F32Eq);
    f.instruction(&I::LocalGet(LOCAL_SCRATCH_F32_B));
    f.instruction(&I::LocalGet(LOCAL_SCRATCH_F32_B));
    f.instruction(&I::F32Eq);
    f.instruction(&I::I32And);
    f.instruction(&I::LocalGet(LOCAL_SCRATCH_F32_B));
    f.instruction(&I::F32Const(0.0f32.into()));
    f.instruction(&I::F32Eq);
    f.instruction(&I::LocalGet(LOCAL_SCRATCH_F32_A));
    f.instruction(&I::LocalGet(LOCAL_SCRATCH_F32_A));
    f.instruction(&I::F32Eq);
    f.instruction(&I::I32And);
    f.instruction(&I::I32Or);
    f.instruction(&I::Select);
}

/// Evaluates a conditional-branch predicate onto the stack as i32.
fn emit_condition(f: &mut Function, flow: FlowControlFormat) {
    let flag = |f: &mut Function, comp: u32, reference: bool| {
        f.instruction(&I::I32Const(0));
        f.instruction(&I::I32Load(mem(OFF_COND + comp * 4)));
        f.instruction(&I::I32Const(reference as i32));
        f.instruction(&I::I32Eq);
    };
    match flow.op {
        CondOp::JustX => flag(f, 0, flow.refx),
        CondOp::JustY => flag(f, 1, flow.refy),
        CondOp::Or => {
            flag(f, 0, flow.refx);
            flag(f, 1, flow.refy);
            f.instruction(&I::I32Or);
        }
        CondOp::And => {
            flag(f, 0, flow.refx);
            flag(f, 1, flow.refy);
            f.instruction(&I::I32And);
        }
    }
}

fn emit_bool_uniform(f: &mut Function, id: u32) {
    f.instruction(&I::I32Const(0));
    f.instruction(&I::I32Load8U(mem8(OFF_BOOL_UNIFORM + id)));
}

fn emit_int_uniform_byte(f: &mut Function, id: u32, comp: u32) {
    f.instruction(&I::I32Const(0));
    f.instruction(&I::I32Load8U(mem8(OFF_INT_UNIFORM + id * 4 + comp)));
}

/// Emits a `push_call(...)` dispatch followed by `continue`. `fallback` is
/// the pc used when the call stack is already full.
fn emit_push_call_const(
    f: &mut Function,
    offset: u32,
    num: u32,
    return_offset: u32,
    repeat: u32,
    increment: u32,
    fallback: u32,
    cycle: u32,
) {
    f.instruction(&I::I32Const(offset as i32));
    f.instruction(&I::I32Const(num as i32));
    f.instruction(&I::I32Const(return_offset as i32));
    f.instruction(&I::I32Const(repeat as i32));
    f.instruction(&I::I32Const(increment as i32));
    f.instruction(&I::I32Const(fallback as i32));
    f.instruction(&I::Call(FN_PUSH_CALL));
    f.instruction(&I::LocalSet(LOCAL_PC));
    f.instruction(&I::Br(cycle));
}

fn emit_instruction(
    f: &mut Function,
    word: u32,
    pc: u32,
    swizzle_data: &[u32; MAX_PROGRAM_CODE_LENGTH],
    cycle: u32,
    exit: u32,
) {
    let instr = Instruction(word);
    let opcode = instr.opcode();
    let info = opcode.info();
    let next = pc.wrapping_add(1);

    match info.ty {
        OpType::Arithmetic => {
            emit_arithmetic(f, instr, swizzle_data);
            set_pc_and_continue(f, next, cycle);
        }

        OpType::MultiplyAdd => {
            let mad = instr.mad();
            let pattern = SwizzlePattern(swizzle_data[mad.operand_desc_id as usize]);
            let inverted = opcode == OpCode::Madi;
            let (addr2, addr3) = if inverted {
                (0, mad.address_register_index)
            } else {
                (mad.address_register_index, 0)
            };
            let enabled: Vec<usize> =
                (0..4).filter(|&c| pattern.dest_component_enabled(c)).collect();
            let base = dest_base(mad.dest);
            for &comp in &enabled {
                f.instruction(&I::I32Const(base as i32));
                emit_source_component(f, mad.src1, 0, pattern, 0, comp);
                emit_source_component(f, mad.src2, addr2, pattern, 1, comp);
                emit_pica_multiply(f);
                emit_source_component(f, mad.src3, addr3, pattern, 2, comp);
                f.instruction(&I::F32Add);
            }
            for &comp in enabled.iter().rev() {
                f.instruction(&I::F32Store(mem(comp as u32 * 4)));
            }
            set_pc_and_continue(f, next, cycle);
        }

        _ => match opcode {
            OpCode::Nop => set_pc_and_continue(f, next, cycle),
            OpCode::End => {
                f.instruction(&I::Br(exit));
            }
            OpCode::Emit => {
                f.instruction(&I::Call(FN_EMIT));
                set_pc_and_continue(f, next, cycle);
            }
            OpCode::Setemit => {
                let params = instr.setemit();
                f.instruction(&I::I32Const(params.vertex_id as i32));
                f.instruction(&I::I32Const(params.prim_emit as i32));
                f.instruction(&I::I32Const(params.winding as i32));
                f.instruction(&I::Call(FN_SETEMIT));
                set_pc_and_continue(f, next, cycle);
            }
            OpCode::Breakc => {
                let flow = instr.flow_control();
                emit_condition(f, flow);
                f.instruction(&I::If(BlockType::Empty));
                // pop the innermost frame and resume at its return address;
                // with an empty stack the break is ignored
                f.instruction(&I::GlobalGet(GLOBAL_SP));
                f.instruction(&I::I32Eqz);
                f.instruction(&I::If(BlockType::Empty));
                f.instruction(&I::I32Const(next as i32));
                f.instruction(&I::LocalSet(LOCAL_PC));
                f.instruction(&I::Else);
                f.instruction(&I::GlobalGet(GLOBAL_SP));
                f.instruction(&I::I32Const(1));
                f.instruction(&I::I32Sub);
                f.instruction(&I::GlobalSet(GLOBAL_SP));
                f.instruction(&I::GlobalGet(GLOBAL_SP));
                f.instruction(&I::I32Const(STACK_ENTRY_BYTES as i32));
                f.instruction(&I::I32Mul);
                f.instruction(&I::I32Const(OFF_CALL_STACK as i32));
                f.instruction(&I::I32Add);
                f.instruction(&I::I32Load(mem(4)));
                f.instruction(&I::LocalSet(LOCAL_PC));
                f.instruction(&I::End);
                f.instruction(&I::Else);
                f.instruction(&I::I32Const(next as i32));
                f.instruction(&I::LocalSet(LOCAL_PC));
                f.instruction(&I::End);
                f.instruction(&I::Br(cycle));
            }
            OpCode::Call => {
                let flow = instr.flow_control();
                emit_push_call_const(
                    f,
                    flow.dest_offset,
                    flow.num_instructions,
                    next,
                    0,
                    0,
                    next,
                    cycle,
                );
            }
            OpCode::Callu | OpCode::Callc => {
                let flow = instr.flow_control();
                if opcode == OpCode::Callu {
                    emit_bool_uniform(f, flow.bool_uniform_id);
                } else {
                    emit_condition(f, flow);
                }
                f.instruction(&I::If(BlockType::Empty));
                // the If adds one label between the arm and the loop
                emit_push_call_const(
                    f,
                    flow.dest_offset,
                    flow.num_instructions,
                    next,
                    0,
                    0,
                    next,
                    cycle + 1,
                );
                f.instruction(&I::End);
                set_pc_and_continue(f, next, cycle);
            }
            OpCode::Ifu | OpCode::Ifc => {
                let flow = instr.flow_control();
                if opcode == OpCode::Ifu {
                    emit_bool_uniform(f, flow.bool_uniform_id);
                } else {
                    emit_condition(f, flow);
                }
                let finish = flow.dest_offset.wrapping_add(flow.num_instructions);
                f.instruction(&I::If(BlockType::Empty));
                // if-body, then skip the else-body
                emit_push_call_const(
                    f,
                    next,
                    flow.dest_offset.wrapping_sub(pc).wrapping_sub(1),
                    finish,
                    0,
                    0,
                    next,
                    cycle + 1,
                );
                f.instruction(&I::Else);
                emit_push_call_const(
                    f,
                    flow.dest_offset,
                    flow.num_instructions,
                    finish,
                    0,
                    0,
                    next,
                    cycle + 1,
                );
                f.instruction(&I::End);
                // unreachable; both arms branch
                f.instruction(&I::Br(cycle));
            }
            OpCode::Loop => {
                let flow = instr.flow_control();
                let id = flow.int_uniform_id;
                // aL = i.y
                f.instruction(&I::I32Const(0));
                emit_int_uniform_byte(f, id, 1);
                f.instruction(&I::I32Store(mem(OFF_ADDR + 8)));
                // body runs i.x + 1 times, stepping aL by i.z
                f.instruction(&I::I32Const(next as i32));
                f.instruction(&I::I32Const(flow.dest_offset.wrapping_sub(pc) as i32));
                f.instruction(&I::I32Const(flow.dest_offset.wrapping_add(1) as i32));
                emit_int_uniform_byte(f, id, 0);
                emit_int_uniform_byte(f, id, 2);
                f.instruction(&I::I32Const(next as i32));
                f.instruction(&I::Call(FN_PUSH_CALL));
                f.instruction(&I::LocalSet(LOCAL_PC));
                f.instruction(&I::Br(cycle));
            }
            OpCode::Jmpc => {
                let flow = instr.flow_control();
                emit_condition(f, flow);
                f.instruction(&I::If(BlockType::Empty));
                f.instruction(&I::I32Const(flow.dest_offset as i32));
                f.instruction(&I::LocalSet(LOCAL_PC));
                f.instruction(&I::Else);
                f.instruction(&I::I32Const(next as i32));
                f.instruction(&I::LocalSet(LOCAL_PC));
                f.instruction(&I::End);
                f.instruction(&I::Br(cycle));
            }
            OpCode::Jmpu => {
                let flow = instr.flow_control();
                // bit 0 of the count field inverts the test
                emit_bool_uniform(f, flow.bool_uniform_id);
                f.instruction(&I::I32Const((flow.num_instructions & 1 == 0) as i32));
                f.instruction(&I::I32Eq);
                f.instruction(&I::If(BlockType::Empty));
                f.instruction(&I::I32Const(flow.dest_offset as i32));
                f.instruction(&I::LocalSet(LOCAL_PC));
                f.instruction(&I::Else);
                f.instruction(&I::I32Const(next as i32));
                f.instruction(&I::LocalSet(LOCAL_PC));
                f.instruction(&I::End);
                f.instruction(&I::Br(cycle));
            }
            _ => {
                warn!(pc, op = info.name, "unhandled instruction compiled as no-op");
                set_pc_and_continue(f, next, cycle);
            }
        },
    }
}

fn emit_arithmetic(
    f: &mut Function,
    instr: Instruction,
    swizzle_data: &[u32; MAX_PROGRAM_CODE_LENGTH],
) {
    let opcode = instr.opcode();
    let info = instr.opcode().info();
    let common = instr.common();
    let pattern = SwizzlePattern(swizzle_data[common.operand_desc_id as usize]);
    let inverted = info.flags.contains(OpFlags::SRC_INVERTED);
    let (addr1, addr2) = if inverted {
        (0, common.address_register_index)
    } else {
        (common.address_register_index, 0)
    };
    let src1 = |f: &mut Function, comp: usize| {
        emit_source_component(f, common.src1, addr1, pattern, 0, comp);
    };
    let src2 = |f: &mut Function, comp: usize| {
        emit_source_component(f, common.src2, addr2, pattern, 1, comp);
    };
    let enabled: Vec<usize> = (0..4).filter(|&c| pattern.dest_component_enabled(c)).collect();
    let base = dest_base(common.dest);

    // Sources are loaded for every enabled component before any store runs,
    // so in-place updates read the pre-instruction values.
    let store_enabled = |f: &mut Function| {
        for &comp in enabled.iter().rev() {
            f.instruction(&I::F32Store(mem(comp as u32 * 4)));
        }
    };
    let broadcast_scratch = |f: &mut Function| {
        f.instruction(&I::LocalSet(LOCAL_SCRATCH_F32_A));
        for _ in &enabled {
            f.instruction(&I::I32Const(base as i32));
            f.instruction(&I::LocalGet(LOCAL_SCRATCH_F32_A));
        }
        store_enabled(f);
    };

    match opcode {
        OpCode::Cmp => {
            let cmp = instr.compare();
            for (comp, op) in [(0u32, cmp.op_x), (1u32, cmp.op_y)] {
                let wasm_op = match op {
                    CompareOp::Equal => I::F32Eq,
                    CompareOp::NotEqual => I::F32Ne,
                    CompareOp::LessThan => I::F32Lt,
                    CompareOp::LessEqualThan => I::F32Le,
                    CompareOp::GreaterThan => I::F32Gt,
                    CompareOp::GreaterEqualThan => I::F32Ge,
                    // flag keeps its previous value
                    CompareOp::Unknown(_) => continue,
                };
                f.instruction(&I::I32Const(0));
                src1(f, comp as usize);
                src2(f, comp as usize);
                f.instruction(&wasm_op);
                f.instruction(&I::I32Store(mem(OFF_COND + comp * 4)));
            }
        }

        OpCode::Mova => {
            let enabled_addr: Vec<usize> =
                (0..2).filter(|&c| pattern.dest_component_enabled(c)).collect();
            for &comp in &enabled_addr {
                f.instruction(&I::I32Const(0));
                src1(f, comp);
                // saturating truncation, NaN becomes 0
                f.instruction(&I::I32TruncSatF32S);
            }
            for &comp in enabled_addr.iter().rev() {
                f.instruction(&I::I32Store(mem(OFF_ADDR + comp as u32 * 4)));
            }
        }

        OpCode::Add => {
            for &comp in &enabled {
                f.instruction(&I::I32Const(base as i32));
                src1(f, comp);
                src2(f, comp);
                f.instruction(&I::F32Add);
            }
            store_enabled(f);
        }
        OpCode::Mul => {
            for &comp in &enabled {
                f.instruction(&I::I32Const(base as i32));
                src1(f, comp);
                src2(f, comp);
                emit_pica_multiply(f);
            }
            store_enabled(f);
        }
        OpCode::Dp3 | OpCode::Dp4 | OpCode::Dph | OpCode::Dphi => {
            let components = if opcode == OpCode::Dp3 { 3 } else { 4 };
            f.instruction(&I::F32Const(0.0f32.into()));
            for comp in 0..components {
                if matches!(opcode, OpCode::Dph | OpCode::Dphi) && comp == 3 {
                    f.instruction(&I::F32Const(1.0f32.into()));
                } else {
                    src1(f, comp);
                }
                src2(f, comp);
                emit_pica_multiply(f);
                f.instruction(&I::F32Add);
            }
            broadcast_scratch(f);
        }
        OpCode::Dst | OpCode::Dsti => {
            for &comp in &enabled {
                f.instruction(&I::I32Const(base as i32));
                match comp {
                    0 => {
                        f.instruction(&I::F32Const(1.0f32.into()));
                    }
                    1 => {
                        src1(f, 1);
                        src2(f, 1);
                        emit_pica_multiply(f);
                    }
                    2 => src1(f, 2),
                    _ => src2(f, 3),
                }
            }
            store_enabled(f);
        }
        OpCode::Ex2 | OpCode::Lg2 => {
            src1(f, 0);
            f.instruction(&I::Call(if opcode == OpCode::Ex2 { FN_EXP2 } else { FN_LOG2 }));
            broadcast_scratch(f);
        }
        OpCode::Sge | OpCode::Sgei | OpCode::Slt | OpCode::Slti => {
            let cmp = if matches!(opcode, OpCode::Sge | OpCode::Sgei) { I::F32Ge } else { I::F32Lt };
            for &comp in &enabled {
                f.instruction(&I::I32Const(base as i32));
                f.instruction(&I::F32Const(1.0f32.into()));
                f.instruction(&I::F32Const(0.0f32.into()));
                src1(f, comp);
                src2(f, comp);
                f.instruction(&cmp);
                f.instruction(&I::Select);
            }
            store_enabled(f);
        }
        OpCode::Flr => {
            for &comp in &enabled {
                f.instruction(&I::I32Const(base as i32));
                src1(f, comp);
                f.instruction(&I::F32Floor);
            }
            store_enabled(f);
        }
        OpCode::Max | OpCode::Min => {
            // comparison-select form, not IEEE min/max: the second operand
            // wins whenever the compare is false, including on NaN
            let cmp = if opcode == OpCode::Max { I::F32Gt } else { I::F32Lt };
            for &comp in &enabled {
                f.instruction(&I::I32Const(base as i32));
                src1(f, comp);
                f.instruction(&I::LocalSet(LOCAL_SCRATCH_F32_A));
                src2(f, comp);
                f.instruction(&I::LocalSet(LOCAL_SCRATCH_F32_B));
                f.instruction(&I::LocalGet(LOCAL_SCRATCH_F32_A));
                f.instruction(&I::LocalGet(LOCAL_SCRATCH_F32_B));
                f.instruction(&I::LocalGet(LOCAL_SCRATCH_F32_A));
                f.instruction(&I::LocalGet(LOCAL_SCRATCH_F32_B));
                f.instruction(&cmp);
                f.instruction(&I::Select);
            }
            store_enabled(f);
        }
        OpCode::Rcp => {
            f.instruction(&I::F32Const(1.0f32.into()));
            src1(f, 0);
            f.instruction(&I::F32Div);
            broadcast_scratch(f);
        }
        OpCode::Rsq => {
            f.instruction(&I::F32Const(1.0f32.into()));
            src1(f, 0);
            f.instruction(&I::F32Sqrt);
            f.instruction(&I::F32Div);
            broadcast_scratch(f);
        }
        OpCode::Mov => {
            for &comp in &enabled {
                f.instruction(&I::I32Const(base as i32));
                src1(f, comp);
            }
            store_enabled(f);
        }
        _ => {
            warn!(op = info.name, "unhandled arithmetic instruction compiled as no-op");
        }
    }
}
