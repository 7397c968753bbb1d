//! Hosts compiled shader modules in a wasmtime instance.
//!
//! One linear memory is shared by every compiled program; register banks,
//! uniforms and flow-control state are copied in before a run and copied back
//! out afterwards. Geometry emission crosses the host boundary through the
//! `emit`/`setemit` imports, which buffer into [`EmitContext`] until the run
//! finishes.

use pica_types::Float24;
use tracing::trace;
use wasmtime::{Caller, Engine, Linker, Memory, MemoryType, Module, Store, TypedFunc};

use pica_shader::output::{OutputLayout, OutputVertex};
use pica_shader::setup::{ShaderSetup, NUM_BOOL_UNIFORMS, NUM_FLOAT_UNIFORMS, NUM_INT_UNIFORMS};
use pica_shader::state::{Attribute, AttributeBuffer, UnitState};
use pica_shader::ShaderError;

use crate::codegen::{
    MEMORY_BYTES, MEMORY_PAGES, OFF_ADDR, OFF_BOOL_UNIFORM, OFF_COND, OFF_FLOAT_UNIFORM,
    OFF_INPUT, OFF_INT_UNIFORM, OFF_OUTPUT, OFF_TEMPORARY,
};

/// Per-run geometry-emission state mirrored into the wasm host.
struct EmitContext {
    vertex_id: u8,
    prim_emit: bool,
    winding: bool,
    output_mask: u32,
    layout: OutputLayout,
    buffers: [[Attribute; 16]; 3],
    /// Triangles assembled during the run, drained by the caller afterwards.
    triangles: Vec<[OutputVertex; 3]>,
}

#[derive(Default)]
struct HostState {
    memory: Option<Memory>,
    emit: Option<EmitContext>,
}

impl EmitContext {
    /// Mirror of the interpreter-side emitter: snapshot the output bank, and
    /// on an armed emit compact each corner and queue the triangle.
    fn emit(&mut self, output_regs: [Attribute; 16]) {
        assert!(
            self.vertex_id < 3,
            "emit vertex id {} out of range",
            self.vertex_id
        );
        self.buffers[self.vertex_id as usize] = output_regs;
        if !self.prim_emit {
            return;
        }
        trace!(winding = self.winding, "emitting triangle");
        let vertices = self.buffers.map(|regs| {
            let mut compacted = AttributeBuffer::default();
            let mut slot = 0;
            for (reg, value) in regs.iter().enumerate() {
                if self.output_mask & (1 << reg) != 0 {
                    compacted.attr[slot] = *value;
                    slot += 1;
                }
            }
            OutputVertex::from_attribute_buffer(&self.layout, &compacted)
        });
        let [v0, v1, v2] = vertices;
        if self.winding {
            self.triangles.push([v2, v1, v0]);
        } else {
            self.triangles.push([v0, v1, v2]);
        }
    }
}

/// Owns the wasmtime store and every program instantiated into it.
pub struct WasmtimeBackend {
    engine: Engine,
    store: Store<HostState>,
    linker: Linker<HostState>,
    memory: Memory,
    programs: Vec<TypedFunc<i32, ()>>,
}

impl WasmtimeBackend {
    pub fn new() -> Self {
        let engine = Engine::default();
        Self::with_engine(engine)
    }

    fn with_engine(engine: Engine) -> Self {
        let mut store = Store::new(&engine, HostState::default());
        let mut linker: Linker<HostState> = Linker::new(&engine);

        let memory = Memory::new(&mut store, MemoryType::new(MEMORY_PAGES as u32, None))
            .expect("create shader register memory");
        linker
            .define(&mut store, "env", "memory", memory)
            .expect("define env.memory");
        store.data_mut().memory = Some(memory);

        linker
            .func_wrap("env", "exp2", |x: f32| x.exp2())
            .expect("define env.exp2");
        linker
            .func_wrap("env", "log2", |x: f32| x.log2())
            .expect("define env.log2");
        linker
            .func_wrap(
                "env",
                "setemit",
                |mut caller: Caller<'_, HostState>, vertex_id: i32, prim_emit: i32, winding: i32| {
                    let ctx = caller
                        .data_mut()
                        .emit
                        .as_mut()
                        .expect("setemit executed without a geometry emitter");
                    ctx.vertex_id = vertex_id as u8;
                    ctx.prim_emit = prim_emit != 0;
                    ctx.winding = winding != 0;
                },
            )
            .expect("define env.setemit");
        linker
            .func_wrap("env", "emit", |mut caller: Caller<'_, HostState>| {
                let memory = caller.data().memory.expect("memory not bound");
                let mut raw = [0u8; 256];
                memory
                    .read(&caller, OFF_OUTPUT as usize, &mut raw)
                    .expect("read output registers");
                let mut regs = [[Float24::zero(); 4]; 16];
                for (reg, value) in regs.iter_mut().enumerate() {
                    for (comp, slot) in value.iter_mut().enumerate() {
                        let at = reg * 16 + comp * 4;
                        let bits: [u8; 4] = raw[at..at + 4].try_into().unwrap();
                        *slot = Float24::from_f32(f32::from_le_bytes(bits));
                    }
                }
                caller
                    .data_mut()
                    .emit
                    .as_mut()
                    .expect("emit executed without a geometry emitter")
                    .emit(regs);
            })
            .expect("define env.emit");

        Self {
            engine,
            store,
            linker,
            memory,
            programs: Vec::new(),
        }
    }

    /// Drops every instantiated program and its memory. Used when the program
    /// cache is flushed.
    pub fn reset(&mut self) {
        *self = Self::with_engine(self.engine.clone());
    }

    /// Instantiates a compiled module and returns its program index.
    pub fn add_program(&mut self, wasm: &[u8]) -> Result<u32, ShaderError> {
        let module =
            Module::new(&self.engine, wasm).map_err(|e| ShaderError::Compile(e.to_string()))?;
        let instance = self
            .linker
            .instantiate(&mut self.store, &module)
            .map_err(|e| ShaderError::Compile(e.to_string()))?;
        let func = instance
            .get_typed_func::<i32, ()>(&mut self.store, "run")
            .map_err(|e| ShaderError::Compile(e.to_string()))?;
        let index = self.programs.len() as u32;
        self.programs.push(func);
        Ok(index)
    }

    /// Runs program `index` against `state`, mirroring registers and uniforms
    /// through the shared memory and replaying any emitted triangles into the
    /// unit's handler.
    pub fn run(
        &mut self,
        index: u32,
        setup: &ShaderSetup,
        state: &mut UnitState,
        entry_point: u32,
    ) -> Result<(), ShaderError> {
        state.reset_run_state();
        self.write_unit(setup, state);
        self.store.data_mut().emit = state.emitter.as_ref().map(|e| EmitContext {
            vertex_id: e.vertex_id,
            prim_emit: e.prim_emit,
            winding: e.winding,
            output_mask: e.output_mask,
            layout: e.layout,
            buffers: e.buffers,
            triangles: Vec::new(),
        });

        let func = self.programs[index as usize].clone();
        let result = func
            .call(&mut self.store, entry_point as i32)
            .map_err(|e| ShaderError::Execute(e.to_string()));
        if result.is_ok() {
            self.read_unit(state);
        }

        if let Some(ctx) = self.store.data_mut().emit.take() {
            let emitter = state.emitter.as_mut().expect("emitter disappeared mid-run");
            emitter.vertex_id = ctx.vertex_id;
            emitter.prim_emit = ctx.prim_emit;
            emitter.winding = ctx.winding;
            emitter.buffers = ctx.buffers;
            if !ctx.triangles.is_empty() {
                let handler = emitter
                    .handler
                    .as_mut()
                    .expect("no triangle handler bound at primitive emission");
                for [v0, v1, v2] in ctx.triangles {
                    handler(v0, v1, v2);
                }
            }
        }
        result
    }

    fn write_unit(&mut self, setup: &ShaderSetup, state: &UnitState) {
        let mut image = vec![0u8; MEMORY_BYTES as usize];
        let put_bank = |image: &mut [u8], base: u32, bank: &[Attribute]| {
            for (reg, value) in bank.iter().enumerate() {
                for (comp, slot) in value.iter().enumerate() {
                    let at = base as usize + reg * 16 + comp * 4;
                    image[at..at + 4].copy_from_slice(&slot.to_f32().to_le_bytes());
                }
            }
        };
        put_bank(&mut image, OFF_INPUT, &state.registers.input);
        put_bank(&mut image, OFF_TEMPORARY, &state.registers.temporary);
        put_bank(&mut image, OFF_OUTPUT, &state.registers.output);
        put_bank(&mut image, OFF_FLOAT_UNIFORM, &setup.uniforms.f[..NUM_FLOAT_UNIFORMS]);

        for (i, lanes) in setup.uniforms.i.iter().enumerate().take(NUM_INT_UNIFORMS) {
            let at = OFF_INT_UNIFORM as usize + i * 4;
            image[at..at + 4].copy_from_slice(lanes);
        }
        for (i, &flag) in setup.uniforms.b.iter().enumerate().take(NUM_BOOL_UNIFORMS) {
            image[OFF_BOOL_UNIFORM as usize + i] = flag as u8;
        }
        for (i, &flag) in state.conditional_code.iter().enumerate() {
            let at = OFF_COND as usize + i * 4;
            image[at..at + 4].copy_from_slice(&(flag as i32).to_le_bytes());
        }
        for (i, &reg) in state.address_registers.iter().enumerate() {
            let at = OFF_ADDR as usize + i * 4;
            image[at..at + 4].copy_from_slice(&reg.to_le_bytes());
        }

        self.memory
            .write(&mut self.store, 0, &image)
            .expect("write shader register memory");
    }

    fn read_unit(&mut self, state: &mut UnitState) {
        let mut image = vec![0u8; MEMORY_BYTES as usize];
        self.memory
            .read(&self.store, 0, &mut image)
            .expect("read shader register memory");

        let get_bank = |base: u32, bank: &mut [Attribute]| {
            for (reg, value) in bank.iter_mut().enumerate() {
                for (comp, slot) in value.iter_mut().enumerate() {
                    let at = base as usize + reg * 16 + comp * 4;
                    let bits: [u8; 4] = image[at..at + 4].try_into().unwrap();
                    *slot = Float24::from_f32(f32::from_le_bytes(bits));
                }
            }
        };
        get_bank(OFF_TEMPORARY, &mut state.registers.temporary);
        get_bank(OFF_OUTPUT, &mut state.registers.output);

        for (i, flag) in state.conditional_code.iter_mut().enumerate() {
            let at = OFF_COND as usize + i * 4;
            let bits: [u8; 4] = image[at..at + 4].try_into().unwrap();
            *flag = i32::from_le_bytes(bits) != 0;
        }
        for (i, reg) in state.address_registers.iter_mut().enumerate() {
            let at = OFF_ADDR as usize + i * 4;
            let bits: [u8; 4] = image[at..at + 4].try_into().unwrap();
            *reg = i32::from_le_bytes(bits);
        }
    }
}

impl Default for WasmtimeBackend {
    fn default() -> Self {
        Self::new()
    }
}
