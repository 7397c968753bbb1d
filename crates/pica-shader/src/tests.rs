//! Program-level interpreter tests built from hand-encoded instruction words.

use pica_types::Float24;
use pretty_assertions::assert_eq;

use crate::bytecode::tests::{enc_common, enc_swizzle};
use crate::debug::RecordMask;
use crate::setup::{ShaderKind, ShaderSetup};
use crate::state::UnitState;
use crate::{InterpreterEngine, ShaderEngine, ShaderError};

const OP_ADD: u32 = 0x00;
const OP_DP3: u32 = 0x01;
const OP_DP4: u32 = 0x02;
const OP_DPH: u32 = 0x03;
const OP_MUL: u32 = 0x08;
const OP_FLR: u32 = 0x0b;
const OP_MAX: u32 = 0x0c;
const OP_RCP: u32 = 0x0e;
const OP_MOVA: u32 = 0x12;
const OP_MOV: u32 = 0x13;
const OP_NOP: u32 = 0x21;
const OP_END: u32 = 0x22;
const OP_BREAKC: u32 = 0x23;
const OP_CALLU: u32 = 0x26;
const OP_IFC: u32 = 0x28;
const OP_LOOP: u32 = 0x29;
const OP_JMPU: u32 = 0x2d;

/// Full mask, xyzw selectors on all sources, no negation.
const IDENTITY: u32 = 0;

fn enc_flow(op: u32, dest: u32, num: u32) -> u32 {
    (op << 26) | ((dest & 0xfff) << 10) | (num & 0xff)
}

fn enc_flow_cond(op: u32, dest: u32, num: u32, cond: u32, refx: bool, refy: bool) -> u32 {
    enc_flow(op, dest, num) | ((cond & 3) << 22) | ((refy as u32) << 24) | ((refx as u32) << 25)
}

fn enc_flow_uniform(op: u32, dest: u32, num: u32, id: u32) -> u32 {
    enc_flow(op, dest, num) | ((id & 0xf) << 22)
}

fn enc_cmp(src1: u32, src2: u32, op_x: u32, op_y: u32) -> u32 {
    ((0x2e | (op_x >> 2)) << 26)
        | ((op_x & 3) << 24)
        | ((op_y & 7) << 21)
        | ((src1 & 0x7f) << 12)
        | ((src2 & 0x1f) << 7)
}

fn enc_mad(dest: u32, src1: u32, src2: u32, src3: u32, desc: u32) -> u32 {
    (0x38 << 26)
        | ((dest & 0x1f) << 24)
        | ((src1 & 0x1f) << 17)
        | ((src2 & 0x7f) << 10)
        | ((src3 & 0x1f) << 5)
        | (desc & 0x1f)
}

fn f24(v: f32) -> Float24 {
    Float24::from_f32(v)
}

fn vec4(x: f32, y: f32, z: f32, w: f32) -> [Float24; 4] {
    [f24(x), f24(y), f24(z), f24(w)]
}

fn setup_with(program: &[u32], swizzles: &[u32]) -> ShaderSetup {
    let mut setup = ShaderSetup::new(ShaderKind::Vertex);
    setup.program_code[..program.len()].copy_from_slice(program);
    let identity = enc_swizzle(0xf, 0x1b, 0, 0x1b, 0, 0x1b, 0);
    setup.swizzle_data[0] = identity;
    setup.swizzle_data[1..1 + swizzles.len()].copy_from_slice(swizzles);
    setup
}

fn run(setup: &ShaderSetup, state: &mut UnitState) {
    let mut engine = InterpreterEngine::new();
    engine.run(setup, state).expect("interpreter run");
}

fn output_f32(state: &UnitState, reg: usize) -> [f32; 4] {
    state.registers.output[reg].map(Float24::to_f32)
}

#[test]
fn mov_copies_input_to_output() {
    let setup = setup_with(
        &[enc_common(OP_MOV, 0x00, 0, 0x00, 0, IDENTITY), enc_flow(OP_END, 0, 0)],
        &[],
    );
    let mut state = UnitState::default();
    state.registers.input[0] = vec4(1.0, 2.0, 3.0, 4.0);
    run(&setup, &mut state);
    assert_eq!(output_f32(&state, 0), [1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn multiply_by_zero_beats_infinity_and_loses_to_nan() {
    let mut setup = setup_with(
        &[enc_common(OP_MUL, 0x00, 0, 0x20, 0x00, IDENTITY), enc_flow(OP_END, 0, 0)],
        &[],
    );
    setup.uniforms.f[0] = [
        f24(f32::INFINITY),
        f24(f32::INFINITY),
        f24(3.0),
        f24(f32::NAN),
    ];
    let mut state = UnitState::default();
    state.registers.input[0] = vec4(0.0, 5.0, 2.0, 0.0);
    run(&setup, &mut state);

    let out = state.registers.output[0];
    assert_eq!(out[0].to_f32(), 0.0);
    assert_eq!(out[1].to_f32(), f32::INFINITY);
    assert_eq!(out[2].to_f32(), 6.0);
    assert!(out[3].to_f32().is_nan());
}

#[test]
fn dot_products_use_three_or_four_components() {
    let setup = setup_with(
        &[
            enc_common(OP_DP3, 0x00, 0, 0x00, 0x01, IDENTITY),
            enc_common(OP_DP4, 0x01, 0, 0x00, 0x01, IDENTITY),
            enc_common(OP_DPH, 0x02, 0, 0x00, 0x01, IDENTITY),
            enc_flow(OP_END, 0, 0),
        ],
        &[],
    );
    let mut state = UnitState::default();
    state.registers.input[0] = vec4(1.0, 2.0, 3.0, 4.0);
    state.registers.input[1] = vec4(10.0, 20.0, 30.0, 40.0);
    run(&setup, &mut state);

    assert_eq!(output_f32(&state, 0), [140.0; 4]);
    assert_eq!(output_f32(&state, 1), [300.0; 4]);
    // DPH forces src1.w to 1 before the 4-component dot.
    assert_eq!(output_f32(&state, 2), [180.0; 4]);
}

#[test]
fn swizzle_negate_and_write_mask_apply() {
    // o0.xy__ = (-v0).wzyx
    let swizzles = [enc_swizzle(0b1100, 0b11_10_01_00, 1, 0x1b, 0, 0x1b, 0)];
    let setup = setup_with(
        &[enc_common(OP_MOV, 0x00, 0, 0x00, 0, 1), enc_flow(OP_END, 0, 0)],
        &swizzles,
    );
    let mut state = UnitState::default();
    state.registers.input[0] = vec4(1.0, 2.0, 3.0, 4.0);
    state.registers.output[0] = vec4(9.0, 9.0, 9.0, 9.0);
    run(&setup, &mut state);
    assert_eq!(output_f32(&state, 0), [-4.0, -3.0, 9.0, 9.0]);
}

#[test]
fn max_follows_the_comparison_select_form() {
    let mut setup = setup_with(
        &[enc_common(OP_MAX, 0x00, 0, 0x20, 0x00, IDENTITY), enc_flow(OP_END, 0, 0)],
        &[],
    );
    setup.uniforms.f[0] = [f24(1.0), f24(f32::NAN), f24(0.0), f24(-2.0)];
    let mut state = UnitState::default();
    state.registers.input[0] = vec4(0.0, 0.0, f32::NAN, -1.0);
    run(&setup, &mut state);

    let out = state.registers.output[0];
    assert_eq!(out[0].to_f32(), 1.0);
    // max(NaN, 0) takes the second operand.
    assert_eq!(out[1].to_f32(), 0.0);
    // max(0, NaN) keeps the NaN.
    assert!(out[2].to_f32().is_nan());
    assert_eq!(out[3].to_f32(), -1.0);
}

#[test]
fn rcp_and_flr_broadcast_and_round() {
    let setup = setup_with(
        &[
            enc_common(OP_RCP, 0x00, 0, 0x00, 0, IDENTITY),
            enc_common(OP_FLR, 0x01, 0, 0x01, 0, IDENTITY),
            enc_flow(OP_END, 0, 0),
        ],
        &[],
    );
    let mut state = UnitState::default();
    state.registers.input[0] = vec4(4.0, 99.0, 99.0, 99.0);
    state.registers.input[1] = vec4(1.7, -1.7, 2.0, -0.5);
    run(&setup, &mut state);
    assert_eq!(output_f32(&state, 0), [0.25; 4]);
    assert_eq!(output_f32(&state, 1), [1.0, -2.0, 2.0, -1.0]);
}

#[test]
fn mova_truncation_steers_relative_addressing() {
    // a0.x = trunc(-2.7) = -2, then read c5[a0.x] = c3.
    let mova_mask = [enc_swizzle(0b1000, 0x1b, 0, 0x1b, 0, 0x1b, 0)];
    let mut setup = setup_with(
        &[
            enc_common(OP_MOVA, 0, 0, 0x00, 0, 1),
            enc_common(OP_MOV, 0x00, 1, 0x25, 0, IDENTITY),
            enc_flow(OP_END, 0, 0),
        ],
        &mova_mask,
    );
    setup.uniforms.f[3] = vec4(7.0, 8.0, 9.0, 10.0);
    setup.uniforms.f[5] = vec4(1.0, 1.0, 1.0, 1.0);
    let mut state = UnitState::default();
    state.registers.input[0] = vec4(-2.7, 0.0, 0.0, 0.0);
    run(&setup, &mut state);
    assert_eq!(output_f32(&state, 0), [7.0, 8.0, 9.0, 10.0]);
}

#[test]
fn relative_addressing_outside_the_file_reads_zero() {
    let mova_mask = [enc_swizzle(0b1000, 0x1b, 0, 0x1b, 0, 0x1b, 0)];
    let mut setup = setup_with(
        &[
            enc_common(OP_MOVA, 0, 0, 0x00, 0, 1),
            enc_common(OP_MOV, 0x00, 1, 0x24, 0, IDENTITY),
            enc_flow(OP_END, 0, 0),
        ],
        &mova_mask,
    );
    setup.uniforms.f[4] = vec4(5.0, 5.0, 5.0, 5.0);
    let mut state = UnitState::default();
    // c4 + 200 is far past the uniform bank.
    state.registers.input[0] = vec4(200.0, 0.0, 0.0, 0.0);
    state.registers.output[0] = vec4(9.0, 9.0, 9.0, 9.0);
    run(&setup, &mut state);
    assert_eq!(output_f32(&state, 0), [0.0, 0.0, 0.0, 0.0]);
}

#[test]
fn cmp_then_ifc_selects_the_taken_branch() {
    let program = [
        // cc.x = (v0.x == v0.x) = true, cc.y = (v0.y < v0.y) = false
        enc_cmp(0x00, 0x00, 0, 2),
        // if (cc.x): body 2..=3, else 4, finish 5
        enc_flow_cond(OP_IFC, 4, 1, 2, true, false),
        enc_common(OP_MOV, 0x00, 0, 0x01, 0, IDENTITY),
        enc_flow(OP_NOP, 0, 0),
        enc_common(OP_MOV, 0x00, 0, 0x02, 0, IDENTITY),
        enc_flow(OP_END, 0, 0),
    ];
    let setup = setup_with(&program, &[]);
    let mut state = UnitState::default();
    state.registers.input[0] = vec4(1.0, 0.5, 0.0, 0.0);
    state.registers.input[1] = vec4(11.0, 11.0, 11.0, 11.0);
    state.registers.input[2] = vec4(22.0, 22.0, 22.0, 22.0);
    run(&setup, &mut state);
    assert_eq!(output_f32(&state, 0), [11.0; 4]);
    assert_eq!(state.conditional_code, [true, false]);

    // Flip the reference so the condition fails and the else branch runs.
    let mut program = program;
    program[1] = enc_flow_cond(OP_IFC, 4, 1, 2, false, false);
    let setup = setup_with(&program, &[]);
    let mut state = UnitState::default();
    state.registers.input[0] = vec4(1.0, 0.5, 0.0, 0.0);
    state.registers.input[1] = vec4(11.0, 11.0, 11.0, 11.0);
    state.registers.input[2] = vec4(22.0, 22.0, 22.0, 22.0);
    run(&setup, &mut state);
    assert_eq!(output_f32(&state, 0), [22.0; 4]);
}

#[test]
fn callu_runs_the_subroutine_when_the_bool_is_set() {
    let program = [
        enc_flow_uniform(OP_CALLU, 4, 2, 0),
        enc_flow(OP_END, 0, 0),
        0,
        0,
        enc_common(OP_MOV, 0x00, 0, 0x00, 0, IDENTITY),
        enc_common(OP_MOV, 0x01, 0, 0x01, 0, IDENTITY),
    ];
    let mut setup = setup_with(&program, &[]);
    setup.set_bool_uniforms(0b1);
    let mut state = UnitState::default();
    state.registers.input[0] = vec4(1.0, 1.0, 1.0, 1.0);
    state.registers.input[1] = vec4(2.0, 2.0, 2.0, 2.0);
    run(&setup, &mut state);
    assert_eq!(output_f32(&state, 0), [1.0; 4]);
    assert_eq!(output_f32(&state, 1), [2.0; 4]);

    // With b0 clear the subroutine never runs.
    setup.set_bool_uniforms(0);
    let mut state = UnitState::default();
    state.registers.input[0] = vec4(1.0, 1.0, 1.0, 1.0);
    run(&setup, &mut state);
    assert_eq!(output_f32(&state, 0), [0.0; 4]);
}

#[test]
fn loop_repeats_and_steps_the_loop_counter() {
    let program = [
        // i0 = (x: 2 repeats -> 3 iterations, y: 5 initial aL, z: 1 step)
        enc_flow_uniform(OP_LOOP, 1, 0, 0),
        enc_common(OP_ADD, 0x10, 0, 0x10, 0x00, IDENTITY),
        enc_common(OP_MOV, 0x00, 0, 0x10, 0, IDENTITY),
        enc_flow(OP_END, 0, 0),
    ];
    let mut setup = setup_with(&program, &[]);
    setup.set_int_uniform(0, u32::from_le_bytes([2, 5, 1, 0]));
    let mut state = UnitState::default();
    state.registers.input[0] = vec4(1.0, 0.0, 0.0, 0.0);
    run(&setup, &mut state);

    assert_eq!(output_f32(&state, 0)[0], 3.0);
    // aL started at 5 and stepped once per completed body.
    assert_eq!(state.address_registers[2], 8);
}

#[test]
fn jmpu_bit_zero_inverts_the_test() {
    let program = [
        // num bit 0 set: jump when b1 is clear.
        enc_flow_uniform(OP_JMPU, 2, 1, 1),
        enc_common(OP_MOV, 0x00, 0, 0x00, 0, IDENTITY),
        enc_flow(OP_END, 0, 0),
    ];
    let mut setup = setup_with(&program, &[]);
    setup.set_bool_uniforms(0);
    let mut state = UnitState::default();
    state.registers.input[0] = vec4(1.0, 1.0, 1.0, 1.0);
    run(&setup, &mut state);
    assert_eq!(output_f32(&state, 0), [0.0; 4]);

    setup.set_bool_uniforms(0b10);
    let mut state = UnitState::default();
    state.registers.input[0] = vec4(1.0, 1.0, 1.0, 1.0);
    run(&setup, &mut state);
    assert_eq!(output_f32(&state, 0), [1.0; 4]);
}

#[test]
fn breakc_leaves_the_loop_early() {
    let program = [
        enc_cmp(0x00, 0x00, 0, 0),
        enc_flow_uniform(OP_LOOP, 3, 0, 0),
        enc_flow_cond(OP_BREAKC, 0, 0, 2, true, false),
        enc_common(OP_ADD, 0x10, 0, 0x10, 0x00, IDENTITY),
        enc_common(OP_MOV, 0x00, 0, 0x10, 0, IDENTITY),
        enc_flow(OP_END, 0, 0),
    ];
    let mut setup = setup_with(&program, &[]);
    setup.set_int_uniform(0, u32::from_le_bytes([2, 0, 0, 0]));
    let mut state = UnitState::default();
    state.registers.input[0] = vec4(1.0, 1.0, 0.0, 0.0);
    run(&setup, &mut state);
    // cc.x is true, so the first breakc pops the frame before any add runs.
    assert_eq!(output_f32(&state, 0)[0], 0.0);

    // An always-false condition lets the loop complete all 3 iterations.
    let mut program = program;
    program[2] = enc_flow_cond(OP_BREAKC, 0, 0, 2, false, false);
    let mut setup = setup_with(&program, &[]);
    setup.set_int_uniform(0, u32::from_le_bytes([2, 0, 0, 0]));
    let mut state = UnitState::default();
    state.registers.input[0] = vec4(1.0, 1.0, 0.0, 0.0);
    run(&setup, &mut state);
    assert_eq!(output_f32(&state, 0)[0], 3.0);
}

#[test]
fn mad_fuses_multiply_and_add() {
    let mut setup = setup_with(
        &[enc_mad(0x00, 0x00, 0x20, 0x01, IDENTITY), enc_flow(OP_END, 0, 0)],
        &[],
    );
    setup.uniforms.f[0] = vec4(2.0, 3.0, 4.0, 0.0);
    let mut state = UnitState::default();
    state.registers.input[0] = vec4(1.0, 2.0, 3.0, 5.0);
    state.registers.input[1] = vec4(10.0, 10.0, 10.0, 10.0);
    run(&setup, &mut state);
    assert_eq!(output_f32(&state, 0), [12.0, 16.0, 22.0, 10.0]);
}

#[test]
fn run_without_end_stops_at_the_code_store_boundary() {
    // All-zero words decode as ADD of the zeroed inputs; execution just
    // walks across them, falls off the end of the store and stops.
    let setup = setup_with(&[], &[]);
    let mut state = UnitState::default();
    run(&setup, &mut state);
}

#[test]
fn entry_point_outside_the_store_is_rejected() {
    let mut setup = setup_with(&[], &[]);
    let mut engine = InterpreterEngine::new();
    let err = engine.setup_batch(&mut setup, 4096).unwrap_err();
    assert!(matches!(err, ShaderError::InvalidEntryPoint(4096)));
    assert!(engine.setup_batch(&mut setup, 4095).is_ok());
}

#[test]
fn debug_records_cover_the_executed_sequence() {
    let setup = setup_with(
        &[enc_common(OP_ADD, 0x00, 0, 0x00, 0x01, IDENTITY), enc_flow(OP_END, 0, 0)],
        &[],
    );
    let mut state = UnitState::default();
    state.registers.input[0] = vec4(1.0, 2.0, 3.0, 4.0);
    state.registers.input[1] = vec4(1.0, 1.0, 1.0, 1.0);

    let engine = InterpreterEngine::new();
    let data = engine.produce_debug_info(&setup, &mut state);
    let records = data.records();
    assert_eq!(records.len(), 2);

    let add = &records[0];
    assert_eq!(add.instruction_offset, 0);
    assert_eq!(add.next_instruction, 1);
    assert_eq!(
        add.mask,
        RecordMask::SRC1
            | RecordMask::SRC2
            | RecordMask::DEST_IN
            | RecordMask::DEST_OUT
            | RecordMask::NEXT_INSTR
    );
    assert_eq!(add.src1.map(Float24::to_f32), [1.0, 2.0, 3.0, 4.0]);
    assert_eq!(add.dest_out.map(Float24::to_f32), [2.0, 3.0, 4.0, 5.0]);

    let end = &records[1];
    assert_eq!(end.instruction_offset, 1);
    assert_eq!(end.mask, RecordMask::NEXT_INSTR);
}
