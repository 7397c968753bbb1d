//! PICA200 programmable shader pipeline: instruction decoding, per-unit
//! execution state, the interpreter engine, and the debug tooling surface.
//!
//! The alternative JIT engine lives in `pica-shader-jit` and implements the
//! same [`ShaderEngine`] contract with identical observable results.

pub mod bytecode;
pub mod debug;
pub mod disasm;
pub mod interpreter;
pub mod output;
pub mod setup;
pub mod state;

#[cfg(test)]
mod tests;

use thiserror::Error;

use crate::debug::{DebugData, NullTracer, ShaderTracer};
use crate::setup::{ShaderSetup, MAX_PROGRAM_CODE_LENGTH};
use crate::state::UnitState;

#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("entry point 0x{0:03x} is outside the program store")]
    InvalidEntryPoint(u32),
    #[error("shader compilation failed: {0}")]
    Compile(String),
    #[error("shader execution failed: {0}")]
    Execute(String),
}

/// An execution strategy for shader programs. Both engines must produce
/// bit-identical register and emission results for the same program.
pub trait ShaderEngine {
    /// Validates the entry point and prepares per-batch engine state
    /// (compilation, cache lookups).
    fn setup_batch(&mut self, setup: &mut ShaderSetup, entry_point: u32) -> Result<(), ShaderError>;

    /// Runs one invocation on `state`. Inputs must already be loaded.
    fn run(&mut self, setup: &ShaderSetup, state: &mut UnitState) -> Result<(), ShaderError>;
}

/// The reference engine; always available, on every target.
#[derive(Debug, Default)]
pub struct InterpreterEngine;

impl InterpreterEngine {
    pub fn new() -> Self {
        Self
    }

    /// Runs with an explicit tracer, used by the instrumented path.
    pub fn run_traced<T: ShaderTracer>(
        &self,
        setup: &ShaderSetup,
        state: &mut UnitState,
        tracer: &mut T,
    ) {
        state.reset_run_state();
        interpreter::run(setup, state, tracer, setup.entry_point);
    }

    /// Convenience wrapper producing the per-cycle record sequence for one
    /// invocation.
    pub fn produce_debug_info(&self, setup: &ShaderSetup, state: &mut UnitState) -> DebugData {
        let mut data = DebugData::new();
        self.run_traced(setup, state, &mut data);
        data
    }
}

impl ShaderEngine for InterpreterEngine {
    fn setup_batch(&mut self, setup: &mut ShaderSetup, entry_point: u32) -> Result<(), ShaderError> {
        if entry_point as usize >= MAX_PROGRAM_CODE_LENGTH {
            return Err(ShaderError::InvalidEntryPoint(entry_point));
        }
        setup.entry_point = entry_point;
        Ok(())
    }

    fn run(&mut self, setup: &ShaderSetup, state: &mut UnitState) -> Result<(), ShaderError> {
        self.run_traced(setup, state, &mut NullTracer);
        Ok(())
    }
}
