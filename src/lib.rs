//! PICA200 programmable vertex and geometry shader pipeline.
//!
//! [`ShaderContext`] is the external surface: it owns the four shader units,
//! both execution engines and the vertex-work scheduler. Program and uniform
//! configuration goes through [`setup::ShaderSetup`]; per-batch priming goes
//! through [`ShaderContext::setup_batch`].

pub use pica_shader::{
    bytecode, debug, disasm, interpreter, output, setup, state, InterpreterEngine, ShaderEngine,
    ShaderError,
};
pub use pica_types::{Fixed, FixedS28P4, Float16, Float20, Float24};

#[cfg(not(target_arch = "wasm32"))]
pub use pica_shader_jit::JitShaderEngine;

use tracing::debug;

use crate::debug::DebugData;
use crate::output::{OutputLayout, OutputVertex};
use crate::setup::{ShaderConfig, ShaderSetup};
use crate::state::{AttributeBuffer, GeometryEmitter, TriangleHandler, UnitState};

pub const NUM_SHADER_UNITS: usize = 4;
/// Geometry work always runs on the last unit.
pub const GEOMETRY_UNIT: usize = 3;
/// Vertex work round-robins over the remaining units.
const NUM_VERTEX_UNITS: usize = 3;

/// Which engine executes shader programs. The JIT exists only on native
/// targets; elsewhere vertex and geometry programs always interpret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineKind {
    #[default]
    Interpreter,
    Jit,
}

/// Owns all execution state of the shader pipeline. Single-threaded: units
/// are an allocation scheme, not parallelism.
pub struct ShaderContext {
    units: [UnitState; NUM_SHADER_UNITS],
    vertex_unit_counter: usize,
    interpreter: InterpreterEngine,
    #[cfg(not(target_arch = "wasm32"))]
    jit: Option<JitShaderEngine>,
    engine_kind: EngineKind,
}

impl ShaderContext {
    pub fn new(engine_kind: EngineKind) -> Self {
        #[cfg(target_arch = "wasm32")]
        let engine_kind = EngineKind::Interpreter;
        debug!(?engine_kind, "shader context created");
        Self {
            units: Default::default(),
            vertex_unit_counter: 0,
            interpreter: InterpreterEngine::new(),
            #[cfg(not(target_arch = "wasm32"))]
            jit: match engine_kind {
                EngineKind::Jit => Some(JitShaderEngine::new()),
                EngineKind::Interpreter => None,
            },
            engine_kind,
        }
    }

    pub fn engine_kind(&self) -> EngineKind {
        self.engine_kind
    }

    pub fn units(&self) -> &[UnitState; NUM_SHADER_UNITS] {
        &self.units
    }

    /// Validates the entry point and primes the active engine for a batch
    /// (for the JIT: compilation or a cache hit).
    pub fn setup_batch(
        &mut self,
        setup: &mut ShaderSetup,
        entry_point: u32,
    ) -> Result<(), ShaderError> {
        #[cfg(not(target_arch = "wasm32"))]
        if let Some(jit) = self.jit.as_mut() {
            return jit.setup_batch(setup, entry_point);
        }
        self.interpreter.setup_batch(setup, entry_point)
    }

    fn run_on_unit(&mut self, setup: &ShaderSetup, unit: usize) -> Result<(), ShaderError> {
        let state = &mut self.units[unit];
        #[cfg(not(target_arch = "wasm32"))]
        if let Some(jit) = self.jit.as_mut() {
            return jit.run(setup, state);
        }
        self.interpreter.run(setup, state)
    }

    fn next_vertex_unit(&mut self) -> usize {
        let unit = self.vertex_unit_counter % NUM_VERTEX_UNITS;
        self.vertex_unit_counter += 1;
        unit
    }

    /// Runs one vertex through the program, on the next vertex unit in the
    /// rotation, and maps the outputs to their semantics.
    pub fn run_vertex_shader(
        &mut self,
        setup: &ShaderSetup,
        config: &ShaderConfig,
        layout: &OutputLayout,
        input: &AttributeBuffer,
    ) -> Result<OutputVertex, ShaderError> {
        let unit = self.next_vertex_unit();
        self.units[unit].load_input(config, input);
        self.run_on_unit(setup, unit)?;

        let mut output = AttributeBuffer::default();
        self.units[unit].write_output(config, &mut output);
        Ok(OutputVertex::from_attribute_buffer(layout, &output))
    }

    /// Installs the primitive-assembly state on the geometry unit. Must be
    /// called before geometry work runs; emitted triangles go to `handler`.
    pub fn bind_geometry_emitter(
        &mut self,
        output_mask: u32,
        layout: OutputLayout,
        handler: TriangleHandler,
    ) {
        let mut emitter = GeometryEmitter::new(output_mask, layout);
        emitter.handler = Some(handler);
        self.units[GEOMETRY_UNIT].emitter = Some(emitter);
    }

    /// Feeds one input set to the geometry program on its pinned unit.
    /// Triangles assembled by EMIT are delivered through the bound handler
    /// before this returns.
    pub fn run_geometry_shader(
        &mut self,
        setup: &ShaderSetup,
        config: &ShaderConfig,
        input: &AttributeBuffer,
    ) -> Result<(), ShaderError> {
        assert!(
            self.units[GEOMETRY_UNIT].emitter.is_some(),
            "geometry shader run without a bound emitter"
        );
        self.units[GEOMETRY_UNIT].load_input(config, input);
        self.run_on_unit(setup, GEOMETRY_UNIT)
    }

    /// Instrumented vertex-shader run, always on the interpreter, producing
    /// the per-instruction record stream for debugger views.
    pub fn trace_vertex_shader(
        &mut self,
        setup: &ShaderSetup,
        config: &ShaderConfig,
        input: &AttributeBuffer,
    ) -> DebugData {
        let unit = self.next_vertex_unit();
        self.units[unit].load_input(config, input);
        self.interpreter.produce_debug_info(setup, &mut self.units[unit])
    }
}

impl Default for ShaderContext {
    fn default() -> Self {
        Self::new(EngineKind::Interpreter)
    }
}
